//! Stream handles.
//!
//! A [`Stream`] owns exactly one registered backend. Operations never panic
//! on their own account and never return `Err` for I/O trouble: failures come
//! back as `None`, `false` or a [`Transfer`] whose status says what happened.
//! The one exception is a user [`StreamBackend`] that panics. Its panic is
//! carried across the callback boundary and resumed here, on the caller's
//! stack.
//!
//! Closing is idempotent and also happens on drop, where failures are
//! swallowed.
//!
//! # Examples
//! ```
//! use embeddenator_aio::{Stream, StreamStatus, Whence};
//!
//! let (mut stream, shared) = Stream::from_dynamic_memory();
//! assert!(stream.write_all(b"hello, world"));
//! assert_eq!(stream.seek(0, Whence::Set), Some(0));
//!
//! let mut buf = [0u8; 5];
//! let t = stream.read(&mut buf);
//! assert_eq!((t.bytes, t.status), (5, StreamStatus::Ready));
//! assert!(stream.close());
//! assert_eq!(&*shared.lock(), b"hello, world");
//! ```

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use super::adapter::{self, StreamInterface, Token, ADAPTER_INTERFACE};
use super::backend::{
    ConstMemoryBackend, DynamicMemoryBackend, FileBackend, IoAdapter, MemoryBackend,
    ReadOnlyAdapter, SharedBuffer, StreamBackend,
};
use super::buffer::DEFAULT_BUFFER_SIZE;
use super::error::{get_error, set_error, Error, Result};
use super::status::{FileMode, StreamStatus, Whence};

/// Result of one read or write call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: usize,
    pub status: StreamStatus,
}

impl Transfer {
    fn failed(status: StreamStatus) -> Self {
        Self { bytes: 0, status }
    }
}

struct RawStream {
    interface: &'static StreamInterface,
    token: Token,
}

/// Owning handle to an open stream.
pub struct Stream {
    raw: Option<RawStream>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("token", &self.token()).finish()
    }
}

impl Stream {
    /// Wrap a capability implementation.
    pub fn from_backend<B: StreamBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn StreamBackend>) -> Self {
        Self {
            raw: Some(RawStream {
                interface: &ADAPTER_INTERFACE,
                token: adapter::register(backend),
            }),
        }
    }

    /// Open `path` with an fopen-style `mode` (`"r"`, `"w+"`, `"ab"`, ...).
    pub fn from_file<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        let mode = FileMode::parse(mode)?;
        let backend = FileBackend::open(path, mode).map_err(|e| {
            set_error(e.to_string());
            Error::Io(e)
        })?;
        Ok(Self::from_backend(backend))
    }

    /// Adopt an already open file.
    pub fn from_std_file(file: File, mode: FileMode) -> Self {
        Self::from_backend(FileBackend::from_file(file, mode))
    }

    /// Fixed-size read-write memory.
    pub fn from_memory(data: Vec<u8>) -> Self {
        Self::from_backend(MemoryBackend::new(data))
    }

    /// Read-only memory.
    pub fn from_const_memory(data: impl Into<Arc<[u8]>>) -> Self {
        Self::from_backend(ConstMemoryBackend::new(data))
    }

    /// Growable memory; the returned buffer outlives the stream.
    pub fn from_dynamic_memory() -> (Self, SharedBuffer) {
        let shared = SharedBuffer::default();
        (Self::from_shared(Arc::clone(&shared)), shared)
    }

    pub fn from_shared(shared: SharedBuffer) -> Self {
        Self::from_backend(DynamicMemoryBackend::new(shared))
    }

    /// Wrap a foreign std stream.
    pub fn from_io<T: Read + Write + Seek + Send + 'static>(inner: T) -> Self {
        Self::from_backend(IoAdapter::new(inner))
    }

    pub fn from_reader<T: Read + Seek + Send + 'static>(inner: T) -> Self {
        Self::from_backend(ReadOnlyAdapter::new(inner))
    }

    /// Registry token of the backend, or `None` once closed.
    pub fn token(&self) -> Option<Token> {
        self.raw.as_ref().map(|raw| raw.token)
    }

    pub fn is_open(&self) -> bool {
        self.raw.is_some()
    }

    fn open_raw(&self) -> Option<&RawStream> {
        if self.raw.is_none() {
            set_error("stream is closed");
        }
        self.raw.as_ref()
    }

    pub(crate) fn size_contained(&self) -> Option<u64> {
        let raw = self.open_raw()?;
        u64::try_from((raw.interface.size)(raw.token)).ok()
    }

    pub(crate) fn seek_contained(&self, offset: i64, whence: Whence) -> Option<u64> {
        let raw = self.open_raw()?;
        u64::try_from((raw.interface.seek)(raw.token, offset, whence)).ok()
    }

    pub(crate) fn read_contained(&self, buf: &mut [u8]) -> Transfer {
        let Some(raw) = self.open_raw() else {
            return Transfer::failed(StreamStatus::Error);
        };
        let mut status = StreamStatus::Ready;
        let bytes = (raw.interface.read)(raw.token, buf, &mut status);
        Transfer { bytes, status }
    }

    pub(crate) fn write_contained(&self, buf: &[u8]) -> Transfer {
        let Some(raw) = self.open_raw() else {
            return Transfer::failed(StreamStatus::Error);
        };
        let mut status = StreamStatus::Ready;
        let bytes = (raw.interface.write)(raw.token, buf, &mut status);
        Transfer { bytes, status }
    }

    pub(crate) fn flush_contained(&self) -> std::result::Result<(), StreamStatus> {
        let Some(raw) = self.open_raw() else {
            return Err(StreamStatus::Error);
        };
        let mut status = StreamStatus::Ready;
        if (raw.interface.flush)(raw.token, &mut status) {
            Ok(())
        } else {
            Err(status)
        }
    }

    pub(crate) fn close_contained(&mut self) -> bool {
        match self.raw.take() {
            Some(raw) => (raw.interface.close)(raw.token),
            None => true,
        }
    }

    /// Total length, or `None` when unknown. See [`get_error`].
    pub fn size(&mut self) -> Option<u64> {
        let size = self.size_contained();
        adapter::resume_pending_panic();
        size
    }

    /// New absolute position, or `None` when seeking is unsupported or failed.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Option<u64> {
        let pos = self.seek_contained(offset, whence);
        adapter::resume_pending_panic();
        pos
    }

    pub fn tell(&mut self) -> Option<u64> {
        self.seek(0, Whence::Current)
    }

    /// Read into `buf`. A short count with [`StreamStatus::Ready`] means no
    /// more bytes are available right now.
    pub fn read(&mut self, buf: &mut [u8]) -> Transfer {
        let transfer = self.read_contained(buf);
        adapter::resume_pending_panic();
        transfer
    }

    /// Write all of `buf` or report an error status.
    pub fn write(&mut self, buf: &[u8]) -> Transfer {
        let transfer = self.write_contained(buf);
        adapter::resume_pending_panic();
        transfer
    }

    pub fn flush(&mut self) -> std::result::Result<(), StreamStatus> {
        let flushed = self.flush_contained();
        adapter::resume_pending_panic();
        flushed
    }

    /// Release the backend. Later calls return `true` and do nothing.
    pub fn close(&mut self) -> bool {
        let closed = self.close_contained();
        adapter::resume_pending_panic();
        closed
    }

    /// `true` if every byte of `data` was written.
    pub fn write_all(&mut self, data: &[u8]) -> bool {
        let t = self.write(data);
        t.bytes == data.len() && !t.status.is_terminal()
    }

    pub(crate) fn load_all_contained(&self) -> Option<Vec<u8>> {
        let hint = self
            .size_contained()
            .and_then(|total| Some(total.saturating_sub(self.seek_contained(0, Whence::Current)?)))
            .unwrap_or(0);
        let mut out = Vec::with_capacity(usize::try_from(hint).unwrap_or(0));
        let mut chunk = vec![0u8; DEFAULT_BUFFER_SIZE];
        loop {
            let t = self.read_contained(&mut chunk);
            out.extend_from_slice(&chunk[..t.bytes]);
            match t.status {
                StreamStatus::Ready if t.bytes > 0 => {}
                StreamStatus::Ready | StreamStatus::Eof => return Some(out),
                StreamStatus::NotReady if t.bytes > 0 => {}
                _ => return None,
            }
        }
    }

    /// Read from the current position to end of data.
    pub fn load_all(&mut self) -> Option<Vec<u8>> {
        let data = self.load_all_contained();
        adapter::resume_pending_panic();
        data
    }

    /// Read a whole file.
    ///
    /// # Examples
    /// ```no_run
    /// use embeddenator_aio::Stream;
    ///
    /// let bytes = Stream::load_file("input.bin").unwrap();
    /// println!("{} bytes", bytes.len());
    /// ```
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let mut stream = Self::from_file(path, "rb")?;
        let data = stream
            .load_all()
            .ok_or_else(|| Error::Io(io::Error::other(last_error_or("read failed"))))?;
        stream.close();
        Ok(data)
    }

    /// Create or truncate `path` and write `data` to it.
    pub fn save_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
        let mut stream = Self::from_file(path, "wb")?;
        if !stream.write_all(data) {
            return Err(Error::Io(io::Error::other(last_error_or("write failed"))));
        }
        if !stream.close() {
            return Err(Error::Io(io::Error::other(last_error_or("close failed"))));
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut bytes = [0u8; N];
        let t = self.read(&mut bytes);
        (t.bytes == N).then_some(bytes)
    }
}

fn last_error_or(fallback: &str) -> String {
    get_error().unwrap_or_else(|| fallback.to_string())
}

macro_rules! endian_io {
    ($($read:ident, $write:ident, $ty:ty, $from:ident, $to:ident;)*) => {
        /// Typed reads and writes with explicit byte order.
        impl Stream {
            $(
                pub fn $read(&mut self) -> Option<$ty> {
                    self.read_array::<{ std::mem::size_of::<$ty>() }>()
                        .map(<$ty>::$from)
                }

                pub fn $write(&mut self, value: $ty) -> bool {
                    self.write_all(&value.$to())
                }
            )*
        }
    };
}

endian_io! {
    read_u8, write_u8, u8, from_le_bytes, to_le_bytes;
    read_i8, write_i8, i8, from_le_bytes, to_le_bytes;
    read_u16_le, write_u16_le, u16, from_le_bytes, to_le_bytes;
    read_u16_be, write_u16_be, u16, from_be_bytes, to_be_bytes;
    read_i16_le, write_i16_le, i16, from_le_bytes, to_le_bytes;
    read_i16_be, write_i16_be, i16, from_be_bytes, to_be_bytes;
    read_u32_le, write_u32_le, u32, from_le_bytes, to_le_bytes;
    read_u32_be, write_u32_be, u32, from_be_bytes, to_be_bytes;
    read_i32_le, write_i32_le, i32, from_le_bytes, to_le_bytes;
    read_i32_be, write_i32_be, i32, from_be_bytes, to_be_bytes;
    read_u64_le, write_u64_le, u64, from_le_bytes, to_le_bytes;
    read_u64_be, write_u64_be, u64, from_be_bytes, to_be_bytes;
    read_i64_le, write_i64_le, i64, from_le_bytes, to_le_bytes;
    read_i64_be, write_i64_be, i64, from_be_bytes, to_be_bytes;
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close_contained();
        // Nothing can act on a close failure here.
        drop(adapter::take_pending_panic());
    }
}

fn status_error(status: StreamStatus) -> io::Error {
    let kind = match status {
        StreamStatus::NotReady => io::ErrorKind::WouldBlock,
        StreamStatus::ReadOnly | StreamStatus::WriteOnly => io::ErrorKind::PermissionDenied,
        StreamStatus::Eof => io::ErrorKind::UnexpectedEof,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, last_error_or("stream operation failed"))
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let t = Stream::read(self, buf);
        match t.status {
            StreamStatus::Ready | StreamStatus::Eof => Ok(t.bytes),
            _ if t.bytes > 0 => Ok(t.bytes),
            status => Err(status_error(status)),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let t = Stream::write(self, buf);
        if t.bytes > 0 || buf.is_empty() {
            Ok(t.bytes)
        } else {
            Err(status_error(t.status))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(self).map_err(status_error)
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
                Whence::Set,
            ),
            SeekFrom::Current(n) => (n, Whence::Current),
            SeekFrom::End(n) => (n, Whence::End),
        };
        Stream::seek(self, offset, whence).ok_or_else(|| status_error(StreamStatus::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_roundtrip() {
        let mut stream = Stream::from_memory(vec![0u8; 8]);
        assert!(stream.write_all(b"abcdefgh"));
        assert_eq!(stream.seek(0, Whence::Set), Some(0));
        assert_eq!(stream.load_all().unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_closed_stream_fails_cleanly() {
        let mut stream = Stream::from_const_memory(&b"xyz"[..]);
        assert!(stream.close());
        assert!(!stream.is_open());
        assert!(stream.close());

        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf), Transfer::failed(StreamStatus::Error));
        assert_eq!(stream.size(), None);
        assert_eq!(stream.seek(0, Whence::Set), None);
        assert_eq!(stream.flush(), Err(StreamStatus::Error));
        assert_eq!(get_error().as_deref(), Some("stream is closed"));
    }

    #[test]
    fn test_close_releases_registration() {
        let stream = Stream::from_memory(vec![1]);
        let token = stream.token().unwrap();
        drop(stream);

        let mut stale = Stream {
            raw: Some(RawStream {
                interface: &ADAPTER_INTERFACE,
                token,
            }),
        };
        assert_eq!(stale.size(), None);
        assert!(stale.close());
    }

    #[test]
    fn test_endian_helpers() {
        let (mut stream, shared) = Stream::from_dynamic_memory();
        assert!(stream.write_u16_le(0x1234));
        assert!(stream.write_u32_be(0xdead_beef));
        assert!(stream.write_i64_le(-2));
        assert_eq!(shared.lock()[..2], [0x34, 0x12]);

        stream.seek(0, Whence::Set).unwrap();
        assert_eq!(stream.read_u16_le(), Some(0x1234));
        assert_eq!(stream.read_u32_be(), Some(0xdead_beef));
        assert_eq!(stream.read_i64_le(), Some(-2));
        assert_eq!(stream.read_u8(), None);
    }

    #[test]
    fn test_std_traits() {
        let mut stream = Stream::from_io(Cursor::new(Vec::new()));
        stream.write_all_std(b"line one\nline two\n");
        std::io::Seek::seek(&mut stream, SeekFrom::Start(5)).unwrap();

        let mut text = String::new();
        std::io::Read::read_to_string(&mut stream, &mut text).unwrap();
        assert_eq!(text, "one\nline two\n");
    }

    #[test]
    fn test_read_only_write_maps_to_permission_denied() {
        let mut stream = Stream::from_const_memory(&b"ro"[..]);
        let err = std::io::Write::write(&mut stream, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    impl Stream {
        fn write_all_std(&mut self, data: &[u8]) {
            std::io::Write::write_all(self, data).unwrap();
        }
    }
}

//! Stream capability contract and the built-in backends.
//!
//! Anything that implements [`StreamBackend`] can be turned into a
//! [`Stream`](super::stream::Stream) and used for synchronous access or handed
//! to the async engine. The built-in file and memory backends go through the
//! exact same path as user implementations.
//!
//! # Contract
//!
//! - `size` returns the total length or `-1`.
//! - `seek` returns the new absolute offset or `-1` (unsupported or failed).
//! - `read` returns bytes read, `0` on end of data or error. It sets
//!   [`StreamStatus::Eof`], [`StreamStatus::Error`] or
//!   [`StreamStatus::WriteOnly`] as appropriate. A short read is not an error.
//! - `write` either writes the whole buffer or reports [`StreamStatus::Error`]
//!   (or [`StreamStatus::ReadOnly`]).
//! - `close` is idempotent: after the first successful close, later calls
//!   return `true` without touching the resource again.
//!
//! After `close`, every other operation must fail cleanly.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{record, set_error};
use super::status::{FileMode, StreamStatus, Whence};

/// Growable byte buffer shared between a dynamic memory stream and its owner.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// The operation set every I/O provider supports.
pub trait StreamBackend: Send {
    /// Total length in bytes, or `-1`.
    fn size(&mut self) -> i64;

    /// Move the cursor. Returns the new absolute offset, or `-1`.
    fn seek(&mut self, offset: i64, whence: Whence) -> i64;

    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize;

    /// Write `buf`, all of it or report an error.
    fn write(&mut self, buf: &[u8], status: &mut StreamStatus) -> usize;

    /// Push buffered data to the resource. Resources without buffering keep
    /// the default.
    fn flush(&mut self, _status: &mut StreamStatus) -> bool {
        true
    }

    /// Release the resource. Must be idempotent.
    fn close(&mut self) -> bool;
}

fn closed_failure(status: &mut StreamStatus) -> usize {
    set_error("stream is closed");
    *status = StreamStatus::Error;
    0
}

fn to_seek_from(offset: i64, whence: Whence) -> Option<SeekFrom> {
    match whence {
        Whence::Set => u64::try_from(offset).ok().map(SeekFrom::Start),
        Whence::Current => Some(SeekFrom::Current(offset)),
        Whence::End => Some(SeekFrom::End(offset)),
    }
}

fn seek_std<S: Seek>(inner: &mut S, offset: i64, whence: Whence) -> i64 {
    let Some(from) = to_seek_from(offset, whence) else {
        set_error("seek before start of stream");
        return -1;
    };
    match inner.seek(from) {
        Ok(pos) => i64::try_from(pos).unwrap_or(-1),
        Err(e) => {
            record(e);
            -1
        }
    }
}

fn size_std<S: Seek>(inner: &mut S) -> i64 {
    let measure = |s: &mut S| -> io::Result<u64> {
        let current = s.stream_position()?;
        let end = s.seek(SeekFrom::End(0))?;
        if end != current {
            s.seek(SeekFrom::Start(current))?;
        }
        Ok(end)
    };
    match measure(inner) {
        Ok(len) => i64::try_from(len).unwrap_or(-1),
        Err(e) => {
            record(e);
            -1
        }
    }
}

fn read_std<R: Read>(inner: &mut R, buf: &mut [u8], status: &mut StreamStatus) -> usize {
    if buf.is_empty() {
        return 0;
    }
    loop {
        match inner.read(buf) {
            Ok(0) => {
                *status = StreamStatus::Eof;
                return 0;
            }
            Ok(n) => return n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                *status = StreamStatus::NotReady;
                return 0;
            }
            Err(e) => {
                record(e);
                *status = StreamStatus::Error;
                return 0;
            }
        }
    }
}

fn write_std<W: Write>(inner: &mut W, buf: &[u8], status: &mut StreamStatus) -> usize {
    let mut written = 0;
    while written < buf.len() {
        match inner.write(&buf[written..]) {
            Ok(0) => {
                set_error("failed to write whole buffer");
                *status = StreamStatus::Error;
                break;
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                *status = StreamStatus::NotReady;
                break;
            }
            Err(e) => {
                record(e);
                *status = StreamStatus::Error;
                break;
            }
        }
    }
    written
}

fn flush_std<W: Write>(inner: &mut W, status: &mut StreamStatus) -> bool {
    match inner.flush() {
        Ok(()) => true,
        Err(e) => {
            record(e);
            *status = StreamStatus::Error;
            false
        }
    }
}

/// Seek inside an in-memory buffer, clamping to `0..=len`.
fn clamp_seek(offset: i64, whence: Whence, pos: usize, len: usize) -> usize {
    match whence.resolve(offset, pos as u64, len as u64) {
        Some(target) => target.min(len as u64) as usize,
        None if offset < 0 => 0,
        None => len,
    }
}

fn read_slice(data: &[u8], pos: &mut usize, buf: &mut [u8], status: &mut StreamStatus) -> usize {
    if buf.is_empty() {
        return 0;
    }
    let remaining = data.len().saturating_sub(*pos);
    if remaining == 0 {
        *status = StreamStatus::Eof;
        return 0;
    }
    let n = remaining.min(buf.len());
    buf[..n].copy_from_slice(&data[*pos..*pos + n]);
    *pos += n;
    n
}

/// File on disk.
pub struct FileBackend {
    file: Option<File>,
    mode: FileMode,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P, mode: FileMode) -> io::Result<Self> {
        let file = mode.open_options().open(path)?;
        Ok(Self::from_file(file, mode))
    }

    /// Wrap an already open file. `mode` decides which operations are
    /// permitted.
    pub fn from_file(file: File, mode: FileMode) -> Self {
        Self {
            file: Some(file),
            mode,
        }
    }
}

impl StreamBackend for FileBackend {
    fn size(&mut self) -> i64 {
        let Some(file) = self.file.as_ref() else {
            set_error("stream is closed");
            return -1;
        };
        match file.metadata() {
            Ok(meta) => i64::try_from(meta.len()).unwrap_or(-1),
            Err(e) => {
                record(e);
                -1
            }
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        match self.file.as_mut() {
            Some(file) => seek_std(file, offset, whence),
            None => {
                set_error("stream is closed");
                -1
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        let Some(file) = self.file.as_mut() else {
            return closed_failure(status);
        };
        if !self.mode.read {
            set_error("file was not opened for reading");
            *status = StreamStatus::WriteOnly;
            return 0;
        }
        read_std(file, buf, status)
    }

    fn write(&mut self, buf: &[u8], status: &mut StreamStatus) -> usize {
        let Some(file) = self.file.as_mut() else {
            return closed_failure(status);
        };
        if !self.mode.write {
            set_error("file was not opened for writing");
            *status = StreamStatus::ReadOnly;
            return 0;
        }
        write_std(file, buf, status)
    }

    fn flush(&mut self, status: &mut StreamStatus) -> bool {
        match self.file.as_mut() {
            Some(file) => flush_std(file, status),
            None => {
                closed_failure(status);
                false
            }
        }
    }

    fn close(&mut self) -> bool {
        let Some(mut file) = self.file.take() else {
            return true;
        };
        if self.mode.write {
            if let Err(e) = file.flush() {
                record(e);
                return false;
            }
        }
        true
    }
}

/// Fixed-size read-write memory. Writes never grow the buffer.
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl MemoryBackend {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            closed: false,
        }
    }
}

impl StreamBackend for MemoryBackend {
    fn size(&mut self) -> i64 {
        if self.closed {
            return -1;
        }
        self.data.len() as i64
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        if self.closed {
            set_error("stream is closed");
            return -1;
        }
        self.pos = clamp_seek(offset, whence, self.pos, self.data.len());
        self.pos as i64
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        read_slice(&self.data, &mut self.pos, buf, status)
    }

    fn write(&mut self, buf: &[u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        let room = self.data.len().saturating_sub(self.pos);
        let n = room.min(buf.len());
        self.data[self.pos..self.pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        if n < buf.len() {
            set_error("memory stream is full");
            *status = StreamStatus::Error;
        }
        n
    }

    fn close(&mut self) -> bool {
        self.closed = true;
        true
    }
}

/// Read-only memory.
pub struct ConstMemoryBackend {
    data: Arc<[u8]>,
    pos: usize,
    closed: bool,
}

impl ConstMemoryBackend {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            closed: false,
        }
    }
}

impl StreamBackend for ConstMemoryBackend {
    fn size(&mut self) -> i64 {
        if self.closed {
            return -1;
        }
        self.data.len() as i64
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        if self.closed {
            set_error("stream is closed");
            return -1;
        }
        self.pos = clamp_seek(offset, whence, self.pos, self.data.len());
        self.pos as i64
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        read_slice(&self.data, &mut self.pos, buf, status)
    }

    fn write(&mut self, _buf: &[u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        set_error("memory stream is read-only");
        *status = StreamStatus::ReadOnly;
        0
    }

    fn close(&mut self) -> bool {
        self.closed = true;
        true
    }
}

/// Growable memory. The buffer stays reachable through the [`SharedBuffer`]
/// after the stream is closed.
pub struct DynamicMemoryBackend {
    data: SharedBuffer,
    pos: usize,
    closed: bool,
}

impl DynamicMemoryBackend {
    pub fn new(data: SharedBuffer) -> Self {
        Self {
            data,
            pos: 0,
            closed: false,
        }
    }
}

impl StreamBackend for DynamicMemoryBackend {
    fn size(&mut self) -> i64 {
        if self.closed {
            return -1;
        }
        self.data.lock().len() as i64
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        if self.closed {
            set_error("stream is closed");
            return -1;
        }
        let len = self.data.lock().len();
        self.pos = clamp_seek(offset, whence, self.pos, len);
        self.pos as i64
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        let data = self.data.lock();
        read_slice(&data, &mut self.pos, buf, status)
    }

    fn write(&mut self, buf: &[u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        let mut data = self.data.lock();
        let end = self.pos + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        buf.len()
    }

    fn close(&mut self) -> bool {
        self.closed = true;
        true
    }
}

/// Wraps a foreign `Read + Write + Seek` value.
///
/// Failures of the wrapped value become [`StreamStatus::Error`] and are
/// recorded as the thread's last error.
pub struct IoAdapter<T> {
    inner: T,
    closed: bool,
}

impl<T: Read + Write + Seek + Send> IoAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

impl<T: Read + Write + Seek + Send> StreamBackend for IoAdapter<T> {
    fn size(&mut self) -> i64 {
        if self.closed {
            return -1;
        }
        size_std(&mut self.inner)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        if self.closed {
            return -1;
        }
        seek_std(&mut self.inner, offset, whence)
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        read_std(&mut self.inner, buf, status)
    }

    fn write(&mut self, buf: &[u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        write_std(&mut self.inner, buf, status)
    }

    fn flush(&mut self, status: &mut StreamStatus) -> bool {
        if self.closed {
            closed_failure(status);
            return false;
        }
        flush_std(&mut self.inner, status)
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        let mut status = StreamStatus::Ready;
        flush_std(&mut self.inner, &mut status)
    }
}

/// Wraps a foreign `Read + Seek` value; writes report
/// [`StreamStatus::ReadOnly`].
pub struct ReadOnlyAdapter<T> {
    inner: T,
    closed: bool,
}

impl<T: Read + Seek + Send> ReadOnlyAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

impl<T: Read + Seek + Send> StreamBackend for ReadOnlyAdapter<T> {
    fn size(&mut self) -> i64 {
        if self.closed {
            return -1;
        }
        size_std(&mut self.inner)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        if self.closed {
            return -1;
        }
        seek_std(&mut self.inner, offset, whence)
    }

    fn read(&mut self, buf: &mut [u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        read_std(&mut self.inner, buf, status)
    }

    fn write(&mut self, _buf: &[u8], status: &mut StreamStatus) -> usize {
        if self.closed {
            return closed_failure(status);
        }
        set_error("stream is read-only");
        *status = StreamStatus::ReadOnly;
        0
    }

    fn close(&mut self) -> bool {
        self.closed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_backend_read_to_eof() {
        let mut mem = MemoryBackend::new(b"abcdef".to_vec());
        let mut status = StreamStatus::Ready;
        let mut buf = [0u8; 4];

        assert_eq!(mem.read(&mut buf, &mut status), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(mem.read(&mut buf, &mut status), 2);
        assert_eq!(status, StreamStatus::Ready);
        assert_eq!(mem.read(&mut buf, &mut status), 0);
        assert_eq!(status, StreamStatus::Eof);
    }

    #[test]
    fn test_memory_backend_is_fixed_size() {
        let mut mem = MemoryBackend::new(vec![0u8; 3]);
        let mut status = StreamStatus::Ready;
        assert_eq!(mem.write(b"hel", &mut status), 3);
        assert_eq!(status, StreamStatus::Ready);
        mem.seek(0, Whence::Set);
        assert_eq!(mem.write(b"hello", &mut status), 3);
        assert_eq!(status, StreamStatus::Error);
        assert_eq!(crate::get_error().as_deref(), Some("memory stream is full"));

        let mut status = StreamStatus::Ready;
        assert_eq!(mem.write(b"lo", &mut status), 0);
        assert_eq!(status, StreamStatus::Error);
        assert_eq!(mem.size(), 3);
    }

    #[test]
    fn test_memory_seek_clamps() {
        let mut mem = MemoryBackend::new(vec![0u8; 10]);
        assert_eq!(mem.seek(20, Whence::Set), 10);
        assert_eq!(mem.seek(-3, Whence::End), 7);
        assert_eq!(mem.seek(-100, Whence::Current), 0);
        assert_eq!(mem.seek(i64::MAX, Whence::End), 10);
        assert_eq!(mem.seek(i64::MIN, Whence::End), 0);
    }

    #[test]
    fn test_const_memory_rejects_writes() {
        let mut mem = ConstMemoryBackend::new(&b"ro"[..]);
        let mut status = StreamStatus::Ready;
        assert_eq!(mem.write(b"x", &mut status), 0);
        assert_eq!(status, StreamStatus::ReadOnly);
    }

    #[test]
    fn test_dynamic_memory_grows() {
        let shared: SharedBuffer = Default::default();
        let mut mem = DynamicMemoryBackend::new(shared.clone());
        let mut status = StreamStatus::Ready;
        assert_eq!(mem.write(b"grow", &mut status), 4);
        assert_eq!(mem.seek(2, Whence::Set), 2);
        assert_eq!(mem.write(b"OWING", &mut status), 5);
        assert!(mem.close());
        assert_eq!(&*shared.lock(), b"grOWING");
    }

    #[test]
    fn test_close_is_idempotent_and_fails_later_ops() {
        let mut mem = MemoryBackend::new(vec![1, 2, 3]);
        assert!(mem.close());
        assert!(mem.close());

        let mut status = StreamStatus::Ready;
        let mut buf = [0u8; 2];
        assert_eq!(mem.read(&mut buf, &mut status), 0);
        assert_eq!(status, StreamStatus::Error);
        assert_eq!(mem.size(), -1);
        assert_eq!(mem.seek(0, Whence::Set), -1);
    }

    #[test]
    fn test_io_adapter_size_preserves_position() {
        let mut adapter = IoAdapter::new(Cursor::new(vec![0u8; 16]));
        assert_eq!(adapter.seek(5, Whence::Set), 5);
        assert_eq!(adapter.size(), 16);
        assert_eq!(adapter.seek(0, Whence::Current), 5);
    }

    #[test]
    fn test_io_adapter_rejects_negative_absolute_seek() {
        let mut adapter = IoAdapter::new(Cursor::new(vec![0u8; 4]));
        assert_eq!(adapter.seek(-1, Whence::Set), -1);
    }

    #[test]
    fn test_read_only_adapter() {
        let mut adapter = ReadOnlyAdapter::new(Cursor::new(b"data".to_vec()));
        let mut status = StreamStatus::Ready;
        assert_eq!(adapter.write(b"x", &mut status), 0);
        assert_eq!(status, StreamStatus::ReadOnly);

        let mut buf = [0u8; 8];
        status = StreamStatus::Ready;
        assert_eq!(adapter.read(&mut buf, &mut status), 4);
        assert_eq!(&buf[..4], b"data");
    }
}

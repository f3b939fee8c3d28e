//! Buffer sizing and stream-to-stream copying.

use super::stream::Stream;
use super::status::StreamStatus;

/// Default buffer size for I/O operations (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Small buffer size for memory-constrained scenarios (4KB)
pub const SMALL_BUFFER_SIZE: usize = 4 * 1024;

/// Copy from `src` to `dst` until `src` reports end of data.
///
/// Returns the number of bytes copied, or the status that stopped the copy.
///
/// # Examples
/// ```
/// use embeddenator_aio::{copy_stream, Stream};
///
/// let mut src = Stream::from_const_memory(&b"copy me"[..]);
/// let (mut dst, shared) = Stream::from_dynamic_memory();
/// assert_eq!(copy_stream(&mut src, &mut dst, 4), Ok(7));
/// assert_eq!(&*shared.lock(), b"copy me");
/// ```
pub fn copy_stream(
    src: &mut Stream,
    dst: &mut Stream,
    buffer_size: usize,
) -> Result<u64, StreamStatus> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let read = src.read(&mut buffer);
        if read.bytes > 0 {
            let written = dst.write(&buffer[..read.bytes]);
            if written.bytes < read.bytes || written.status.is_terminal() {
                return Err(written.status);
            }
            total += read.bytes as u64;
        }
        match read.status {
            StreamStatus::Ready if read.bytes > 0 => {}
            StreamStatus::Ready | StreamStatus::Eof => return Ok(total),
            StreamStatus::NotReady if read.bytes > 0 => {}
            status => return Err(status),
        }
    }
}

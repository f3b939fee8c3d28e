//! Asynchronous access to a stream.
//!
//! An [`AsyncIo`] wraps any [`Stream`] (file, memory or a user backend) and
//! runs reads, writes and the final close on the engine's workers. Every
//! submission names the [`AsyncIoQueue`] that receives its outcome and an
//! opaque `userdata` tag that comes back unchanged.
//!
//! Submitting never reports I/O failures; they arrive later as outcomes with
//! [`TaskResult::Failure`]. Only a shut-down engine makes submission fail.
//!
//! # Examples
//! ```no_run
//! use embeddenator_aio::{AsyncIo, AsyncIoQueue, TaskResult};
//!
//! let queue = AsyncIoQueue::new();
//! let file = AsyncIo::from_file("data.bin", "r").unwrap();
//! file.read(0, vec![0u8; 4096], &queue, 1).unwrap();
//!
//! let outcome = queue.try_wait_for_outcome(None).unwrap();
//! assert_eq!(outcome.result(), TaskResult::Complete);
//! let bytes = outcome.into_buffer().unwrap();
//! # let _ = bytes;
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::adapter;
use super::engine::{Engine, EngineHandle};
use super::error::Result;
use super::outcome::{AsyncIoId, OutcomeHeader, TaskResult, TaskType};
use super::queue::AsyncIoQueue;
use super::status::{StreamStatus, Whence};
use super::stream::Stream;
use crate::logging::warn;

struct AsyncIoInner {
    stream: Mutex<Option<Stream>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl AsyncIoInner {
    fn begin(&self) {
        *self.in_flight.lock() += 1;
    }

    fn end(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.idle.wait(&mut in_flight);
        }
    }
}

/// Decrements the in-flight count even if the job unwinds.
struct InFlight<'a>(&'a AsyncIoInner);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

type Completion = (TaskResult, Option<Vec<u8>>, u64);

fn failure() -> Completion {
    (TaskResult::Failure, None, 0)
}

/// Drop a panic captured on this worker. Returns `true` if there was one.
#[cfg_attr(not(feature = "logging"), allow(unused_variables))]
fn discard_panic(id: AsyncIoId) -> bool {
    match adapter::take_pending_panic() {
        Some(_) => {
            warn!(asyncio = id.get(), "stream backend panicked during async task");
            true
        }
        None => false,
    }
}

/// Handle for asynchronous operations on one stream.
pub struct AsyncIo {
    id: AsyncIoId,
    inner: Arc<AsyncIoInner>,
    engine: EngineHandle,
}

impl AsyncIo {
    /// Open `path` for asynchronous access on the global engine.
    pub fn from_file<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        let stream = Stream::from_file(path, mode)?;
        Self::from_stream(stream)
    }

    /// Move `stream` onto the global engine.
    pub fn from_stream(stream: Stream) -> Result<Self> {
        Ok(Self::with_engine(stream, Engine::global()?))
    }

    pub fn with_engine(stream: Stream, engine: &Engine) -> Self {
        Self {
            id: AsyncIoId::next(),
            inner: Arc::new(AsyncIoInner {
                stream: Mutex::new(Some(stream)),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
            }),
            engine: engine.handle(),
        }
    }

    pub fn id(&self) -> AsyncIoId {
        self.id
    }

    /// Size of the underlying stream. Blocks while a task holds the stream.
    pub fn size(&self) -> Option<u64> {
        self.inner.stream.lock().as_mut()?.size()
    }

    fn submit<F>(&self, queue: &AsyncIoQueue, header: OutcomeHeader, job: F) -> Result<()>
    where
        F: FnOnce(&AsyncIoInner) -> Completion + Send + 'static,
    {
        let permit = self.engine.permit()?;
        let ticket = queue.ticket(header);
        self.inner.begin();
        let inner = Arc::clone(&self.inner);
        permit.submit(move || {
            let _in_flight = InFlight(&inner);
            let (result, buffer, transferred) = job(&inner);
            ticket.finish(result, buffer, transferred);
        });
        Ok(())
    }

    /// Read `buffer.len()` bytes at `offset`. The buffer comes back in the
    /// outcome; fewer bytes than requested means end of data was reached.
    pub fn read(
        &self,
        offset: u64,
        buffer: Vec<u8>,
        queue: &AsyncIoQueue,
        userdata: u64,
    ) -> Result<()> {
        let id = self.id;
        let header = OutcomeHeader {
            asyncio: id,
            task: TaskType::Read,
            offset,
            bytes_requested: buffer.len() as u64,
            userdata,
        };
        self.submit(queue, header, move |inner| {
            let completion = perform_read(inner, offset, buffer);
            if discard_panic(id) {
                return failure();
            }
            completion
        })
    }

    /// Write all of `data` at `offset`. The data comes back in the outcome.
    pub fn write(
        &self,
        offset: u64,
        data: Vec<u8>,
        queue: &AsyncIoQueue,
        userdata: u64,
    ) -> Result<()> {
        let id = self.id;
        let header = OutcomeHeader {
            asyncio: id,
            task: TaskType::Write,
            offset,
            bytes_requested: data.len() as u64,
            userdata,
        };
        self.submit(queue, header, move |inner| {
            let completion = perform_write(inner, offset, data);
            if discard_panic(id) {
                return failure();
            }
            completion
        })
    }

    /// Close the stream once every earlier task on this handle has finished,
    /// flushing first if `flush` is set.
    pub fn close(self, flush: bool, queue: &AsyncIoQueue, userdata: u64) -> Result<()> {
        let id = self.id;
        let permit = self.engine.permit()?;
        let ticket = queue.ticket(OutcomeHeader {
            asyncio: id,
            task: TaskType::Close,
            offset: 0,
            bytes_requested: 0,
            userdata,
        });
        let inner = Arc::clone(&self.inner);
        permit.submit(move || {
            inner.wait_idle();
            let Some(mut stream) = inner.stream.lock().take() else {
                ticket.finish(TaskResult::Complete, None, 0);
                return;
            };
            let flushed = !flush || stream.flush_contained().is_ok();
            let closed = stream.close_contained();
            let panicked = discard_panic(id);
            let result = if flushed && closed && !panicked {
                TaskResult::Complete
            } else {
                TaskResult::Failure
            };
            ticket.finish(result, None, 0);
        });
        Ok(())
    }
}

impl std::fmt::Debug for AsyncIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIo").field("id", &self.id).finish()
    }
}

/// Position of the stream after seeking to `offset`. Memory streams stop at
/// their length, so the result can be smaller than `offset`.
fn seek_to(stream: &Stream, offset: u64) -> Option<u64> {
    let target = i64::try_from(offset).ok()?;
    stream.seek_contained(target, Whence::Set)
}

fn perform_read(inner: &AsyncIoInner, offset: u64, mut buffer: Vec<u8>) -> Completion {
    let guard = inner.stream.lock();
    let Some(stream) = guard.as_ref() else {
        return failure();
    };
    match seek_to(stream, offset) {
        Some(pos) if pos == offset => {}
        // Past end of data: nothing to read, same as a file.
        Some(pos) if pos < offset => return (TaskResult::Complete, Some(buffer), 0),
        _ => return failure(),
    }

    let mut total = 0;
    while total < buffer.len() {
        let t = stream.read_contained(&mut buffer[total..]);
        total += t.bytes;
        match t.status {
            StreamStatus::Ready if t.bytes > 0 => {}
            StreamStatus::Ready | StreamStatus::Eof | StreamStatus::NotReady => break,
            StreamStatus::Error | StreamStatus::WriteOnly | StreamStatus::ReadOnly => {
                return failure();
            }
        }
    }
    (TaskResult::Complete, Some(buffer), total as u64)
}

fn perform_write(inner: &AsyncIoInner, offset: u64, data: Vec<u8>) -> Completion {
    let guard = inner.stream.lock();
    let Some(stream) = guard.as_ref() else {
        return failure();
    };
    if seek_to(stream, offset) != Some(offset) {
        return failure();
    }

    let t = stream.write_contained(&data);
    if t.bytes < data.len() || t.status.is_terminal() {
        return failure();
    }
    (TaskResult::Complete, Some(data), t.bytes as u64)
}

/// Read a whole file in the background on the global engine. The outcome is a
/// [`TaskType::Read`] whose buffer holds the file contents.
pub fn load_file_async<P: AsRef<Path>>(
    path: P,
    queue: &AsyncIoQueue,
    userdata: u64,
) -> Result<()> {
    load_file_async_on(Engine::global()?, path, queue, userdata)
}

pub fn load_file_async_on<P: AsRef<Path>>(
    engine: &Engine,
    path: P,
    queue: &AsyncIoQueue,
    userdata: u64,
) -> Result<()> {
    let mut stream = Stream::from_file(path, "rb")?;
    let id = AsyncIoId::next();
    let requested = stream.size().unwrap_or(0);
    let handle = engine.handle();
    let permit = handle.permit()?;
    let ticket = queue.ticket(OutcomeHeader {
        asyncio: id,
        task: TaskType::Read,
        offset: 0,
        bytes_requested: requested,
        userdata,
    });
    permit.submit(move || {
        let loaded = stream.load_all_contained();
        stream.close_contained();
        if discard_panic(id) {
            ticket.finish(TaskResult::Failure, None, 0);
            return;
        }
        match loaded {
            Some(data) => {
                let len = data.len() as u64;
                ticket.finish(TaskResult::Complete, Some(data), len);
            }
            None => ticket.finish(TaskResult::Failure, None, 0),
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::io::backend::StreamBackend;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            worker_threads: 2,
            thread_name_prefix: "aio-test".into(),
            stack_size: None,
        })
        .unwrap()
    }

    fn wait(queue: &AsyncIoQueue) -> crate::AsyncIoOutcome {
        for _ in 0..500 {
            if let Some(o) = queue.try_wait_for_outcome(Some(Duration::from_millis(10))) {
                return o;
            }
        }
        panic!("no outcome delivered");
    }

    #[test]
    fn test_read_memory() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let aio = AsyncIo::with_engine(Stream::from_const_memory(&b"0123456789"[..]), &engine);
        assert_eq!(aio.size(), Some(10));

        aio.read(3, vec![0u8; 4], &queue, 42).unwrap();
        let outcome = wait(&queue);
        assert_eq!(outcome.task(), TaskType::Read);
        assert_eq!(outcome.result(), TaskResult::Complete);
        assert_eq!(outcome.userdata(), 42);
        assert_eq!(outcome.asyncio(), aio.id());
        assert_eq!(outcome.data(), Some(&b"3456"[..]));
    }

    #[test]
    fn test_read_past_end_is_short() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let aio = AsyncIo::with_engine(Stream::from_const_memory(&b"abc"[..]), &engine);

        aio.read(1, vec![0u8; 10], &queue, 0).unwrap();
        let outcome = wait(&queue);
        assert_eq!(outcome.result(), TaskResult::Complete);
        assert_eq!(outcome.bytes_requested(), 10);
        assert_eq!(outcome.bytes_transferred(), 2);
    }

    #[test]
    fn test_read_past_end_matches_across_backends() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();

        let file = AsyncIo::with_engine(Stream::from_file(&path, "rb").unwrap(), &engine);
        let memory = AsyncIo::with_engine(Stream::from_const_memory(&b"abc"[..]), &engine);
        let fixed = AsyncIo::with_engine(Stream::from_memory(b"abc".to_vec()), &engine);
        for aio in [&file, &memory, &fixed] {
            aio.read(10, vec![0u8; 4], &queue, aio.id().get()).unwrap();
            let outcome = wait(&queue);
            assert_eq!(outcome.userdata(), aio.id().get());
            assert_eq!(outcome.result(), TaskResult::Complete);
            assert_eq!(outcome.bytes_transferred(), 0);
            assert_eq!(outcome.data(), Some(&[][..]));
        }
    }

    #[test]
    fn test_write_to_read_only_fails() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let aio = AsyncIo::with_engine(Stream::from_const_memory(&b"abc"[..]), &engine);

        aio.write(0, b"zz".to_vec(), &queue, 7).unwrap();
        let outcome = wait(&queue);
        assert_eq!(outcome.result(), TaskResult::Failure);
        assert!(outcome.buffer().is_none());
    }

    #[test]
    fn test_close_waits_for_earlier_tasks() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let shared: crate::SharedBuffer = Arc::new(Mutex::new(vec![0u8; 16]));
        let aio = AsyncIo::with_engine(Stream::from_shared(Arc::clone(&shared)), &engine);

        for i in 0..8u64 {
            aio.write(i * 2, vec![b'a' + i as u8; 2], &queue, i).unwrap();
        }
        aio.close(true, &queue, 100).unwrap();

        let mut seen = Vec::new();
        for _ in 0..9 {
            let outcome = wait(&queue);
            assert_eq!(outcome.result(), TaskResult::Complete);
            seen.push(outcome.userdata());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 100]);
        assert_eq!(&*shared.lock(), b"aabbccddeeffgghh");
    }

    #[test]
    fn test_submission_after_shutdown_fails_without_outcome() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let aio = AsyncIo::with_engine(Stream::from_memory(vec![0; 4]), &engine);
        engine.shutdown();

        assert!(aio.read(0, vec![0; 4], &queue, 0).is_err());
        assert_eq!(queue.outstanding(), 0);
        assert!(queue.try_get_outcome().is_none());
    }

    struct Panicky;

    impl StreamBackend for Panicky {
        fn size(&mut self) -> i64 {
            4
        }

        fn seek(&mut self, offset: i64, _whence: Whence) -> i64 {
            offset
        }

        fn read(&mut self, _buf: &mut [u8], _status: &mut StreamStatus) -> usize {
            panic!("backend exploded")
        }

        fn write(&mut self, buf: &[u8], _status: &mut StreamStatus) -> usize {
            buf.len()
        }

        fn close(&mut self) -> bool {
            true
        }
    }

    #[test]
    fn test_backend_panic_becomes_failure() {
        let engine = engine();
        let queue = AsyncIoQueue::new();
        let aio = AsyncIo::with_engine(Stream::from_backend(Panicky), &engine);

        aio.read(0, vec![0; 4], &queue, 1).unwrap();
        assert_eq!(wait(&queue).result(), TaskResult::Failure);

        aio.write(0, vec![1; 4], &queue, 2).unwrap();
        assert_eq!(wait(&queue).result(), TaskResult::Complete);
    }

    #[test]
    fn test_load_file_async() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let contents: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        std::fs::write(&path, &contents).unwrap();

        let queue = AsyncIoQueue::new();
        load_file_async_on(&engine, &path, &queue, 9).unwrap();
        let outcome = wait(&queue);
        assert_eq!(outcome.result(), TaskResult::Complete);
        assert_eq!(outcome.bytes_requested(), contents.len() as u64);
        assert_eq!(outcome.into_buffer().unwrap(), contents);
    }

    #[test]
    fn test_load_missing_file_fails_synchronously() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        let queue = AsyncIoQueue::new();
        assert!(load_file_async_on(&engine, dir.path().join("missing"), &queue, 0).is_err());
        assert_eq!(queue.outstanding(), 0);
    }
}

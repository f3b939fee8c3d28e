//! Record of one finished asynchronous operation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies the [`AsyncIo`](super::async_io::AsyncIo) an outcome belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsyncIoId(u64);

impl AsyncIoId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AsyncIoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asyncio#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    Read,
    Write,
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskResult {
    Complete,
    Failure,
    Canceled,
}

/// Fields known when the operation is submitted.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OutcomeHeader {
    pub asyncio: AsyncIoId,
    pub task: TaskType,
    pub offset: u64,
    pub bytes_requested: u64,
    pub userdata: u64,
}

/// Outcome of a finished read, write or close.
///
/// Produced once per operation and handed to exactly one consumer. For reads
/// and writes that completed, the consumer takes the data buffer with
/// [`into_buffer`](Self::into_buffer). Failed and canceled operations carry
/// no buffer.
#[derive(Debug)]
pub struct AsyncIoOutcome {
    asyncio: AsyncIoId,
    task: TaskType,
    result: TaskResult,
    buffer: Option<Vec<u8>>,
    offset: u64,
    bytes_requested: u64,
    bytes_transferred: u64,
    userdata: u64,
}

impl AsyncIoOutcome {
    pub(crate) fn finish(
        header: OutcomeHeader,
        result: TaskResult,
        buffer: Option<Vec<u8>>,
        bytes_transferred: u64,
    ) -> Self {
        let buffer = match result {
            TaskResult::Complete => buffer,
            TaskResult::Failure | TaskResult::Canceled => None,
        };
        Self {
            asyncio: header.asyncio,
            task: header.task,
            result,
            buffer,
            offset: header.offset,
            bytes_requested: header.bytes_requested,
            bytes_transferred,
            userdata: header.userdata,
        }
    }

    pub fn asyncio(&self) -> AsyncIoId {
        self.asyncio
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn result(&self) -> TaskResult {
        self.result
    }

    pub fn is_complete(&self) -> bool {
        self.result == TaskResult::Complete
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// The bytes that were actually transferred.
    pub fn data(&self) -> Option<&[u8]> {
        let len = usize::try_from(self.bytes_transferred).ok()?;
        self.buffer.as_deref().map(|b| &b[..len.min(b.len())])
    }

    /// Take ownership of the data buffer.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        self.buffer
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn bytes_requested(&self) -> u64 {
        self.bytes_requested
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn userdata(&self) -> u64 {
        self.userdata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(task: TaskType) -> OutcomeHeader {
        OutcomeHeader {
            asyncio: AsyncIoId::next(),
            task,
            offset: 4,
            bytes_requested: 8,
            userdata: 77,
        }
    }

    #[test]
    fn test_failure_drops_buffer() {
        let outcome = AsyncIoOutcome::finish(
            header(TaskType::Read),
            TaskResult::Failure,
            Some(vec![1; 8]),
            0,
        );
        assert!(outcome.buffer().is_none());
        assert_eq!(outcome.userdata(), 77);
        assert_eq!(outcome.offset(), 4);
    }

    #[test]
    fn test_data_is_trimmed_to_transferred() {
        let outcome = AsyncIoOutcome::finish(
            header(TaskType::Read),
            TaskResult::Complete,
            Some(vec![9; 8]),
            3,
        );
        assert_eq!(outcome.data(), Some(&[9u8, 9, 9][..]));
        assert_eq!(outcome.bytes_requested(), 8);
        assert_eq!(outcome.into_buffer().map(|b| b.len()), Some(8));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(AsyncIoId::next(), AsyncIoId::next());
    }
}

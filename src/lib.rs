//! # embeddenator-aio
//!
//! Pluggable streams and an asynchronous I/O completion queue.
//!
//! A [`Stream`] wraps a file, a memory buffer or any user type implementing
//! [`StreamBackend`]. An [`AsyncIo`] moves a stream onto the background
//! [`Engine`]; finished operations are collected from an [`AsyncIoQueue`] as
//! [`AsyncIoOutcome`]s.
//!
//! ```
//! use embeddenator_aio::{AsyncIo, AsyncIoQueue, Stream, TaskResult};
//!
//! let queue = AsyncIoQueue::new();
//! let file = AsyncIo::from_stream(Stream::from_const_memory(&b"payload"[..])).unwrap();
//! file.read(0, vec![0u8; 7], &queue, 1).unwrap();
//!
//! let outcome = loop {
//!     if let Some(outcome) = queue.try_wait_for_outcome(None) {
//!         break outcome;
//!     }
//! };
//! assert_eq!(outcome.result(), TaskResult::Complete);
//! assert_eq!(outcome.data(), Some(&b"payload"[..]));
//! ```

pub mod config;
pub mod io;
pub mod logging;

pub use config::EngineConfig;
pub use io::*;

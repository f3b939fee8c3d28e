pub mod adapter;
pub mod async_io;
pub mod backend;
pub mod buffer;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod outcome;
pub mod queue;
pub mod status;
pub mod storage;
pub mod stream;

pub use adapter::{StreamInterface, Token, ADAPTER_INTERFACE};
pub use async_io::*;
pub use backend::*;
pub use buffer::*;
pub use engine::{Engine, EngineHandle};
pub use enumerate::*;
pub use error::{clear_error, get_error, set_error, Error, Result};
pub use outcome::*;
pub use queue::{AsyncIoQueue, QueuePhase};
pub use status::*;
pub use storage::*;
pub use stream::*;

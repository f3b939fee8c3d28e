//! Error type for construction failures, plus the per-thread last-error
//! message that explains failed stream operations.

use std::cell::RefCell;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid file mode `{0}`")]
    InvalidMode(String),

    #[error("async i/o engine is shut down")]
    EngineShutdown,

    #[error("directory enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("path escapes storage root: {}", .0.display())]
    PathOutsideRoot(PathBuf),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("storage quota exceeded: need {needed} bytes, {remaining} remaining")]
    QuotaExceeded { needed: u64, remaining: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record `message` as the calling thread's last error.
pub fn set_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// The calling thread's last error message, if any.
pub fn get_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

pub fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Record `err` as the last error and hand it back, for use in `map_err`.
pub(crate) fn record<E: std::fmt::Display>(err: E) -> E {
    set_error(err.to_string());
    err
}

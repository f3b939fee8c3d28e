//! Logging facade.
//!
//! With the `logging` feature the macros below are `tracing`'s; without it
//! they expand to nothing.

#[cfg(feature = "logging")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "logging"))]
mod noop {
    #[doc(hidden)]
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }
}

// Imported by path so `warn` does not clash with the built-in lint attribute.
#[cfg(not(feature = "logging"))]
pub(crate) use crate::{debug, trace, warn};

/// Install a `RUST_LOG`-filtered fmt subscriber.
///
/// Safe to call more than once; only the first call installs anything. A no-op
/// when the `logging` feature is disabled.
pub fn init() {
    #[cfg(feature = "logging")]
    {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        super::debug!(attempt = 2, "logging initialised twice");
        super::trace!("trace macro resolves");
        super::warn!(attempt = 2, "warn macro resolves");
    }
}

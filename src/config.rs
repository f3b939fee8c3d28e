//! Engine configuration.
//!
//! Loaded from JSON or built from defaults, then optionally overridden from
//! the environment:
//!
//! | Variable                          | Field                |
//! |-----------------------------------|----------------------|
//! | `EMBEDDENATOR_AIO_WORKERS`        | `worker_threads`     |
//! | `EMBEDDENATOR_AIO_THREAD_PREFIX`  | `thread_name_prefix` |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::error::{Error, Result};

pub const ENV_WORKERS: &str = "EMBEDDENATOR_AIO_WORKERS";
pub const ENV_THREAD_PREFIX: &str = "EMBEDDENATOR_AIO_THREAD_PREFIX";

const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of background worker threads.
    pub worker_threads: usize,
    /// Worker threads are named `{prefix}-worker-{n}`.
    pub thread_name_prefix: String,
    /// Stack size for workers; platform default when unset.
    pub stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_DEFAULT_WORKERS);
        Self {
            worker_threads: workers,
            thread_name_prefix: "aio".to_string(),
            stack_size: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Examples
    /// ```
    /// use embeddenator_aio::EngineConfig;
    ///
    /// let config = EngineConfig::from_json_str(r#"{ "worker_threads": 2 }"#).unwrap();
    /// assert_eq!(config.worker_threads, 2);
    /// assert_eq!(config.thread_name_prefix, "aio");
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self =
            serde_json::from_reader(file).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_WORKERS) {
            self.worker_threads = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_WORKERS}={raw} is not a number")))?;
        }
        if let Some(prefix) = lookup(ENV_THREAD_PREFIX) {
            self.thread_name_prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".into()));
        }
        if self.stack_size == Some(0) {
            return Err(Error::Config("stack_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&config.worker_threads));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig {
            worker_threads: 3,
            thread_name_prefix: "io".into(),
            stack_size: Some(256 * 1024),
        };
        let json = config.to_json_pretty().unwrap();
        assert!(json.contains('\n'));
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "worker_threads": 0 }"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_WORKERS, " 5 "), (ENV_THREAD_PREFIX, "bg")].into();
        let config = EngineConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.worker_threads, 5);
        assert_eq!(config.thread_name_prefix, "bg");

        let bad = EngineConfig::default()
            .with_overrides(|k| (k == ENV_WORKERS).then(|| "many".into()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "worker_threads": 2, "thread_name_prefix": "disk" }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.thread_name_prefix, "disk");
        assert_eq!(config.stack_size, None);
    }
}

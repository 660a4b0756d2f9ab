//! Operator configuration.
//!
//! Configuration is read from TOML. Every section is optional and falls back
//! to defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! [engine]
//! worker_threads = 4
//! drain_grace_ms = 30000
//!
//! [calls]
//! timeout_ms = 5000
//! max_retries = 5
//! retry_not_found = false
//!
//! [calls.backoff]
//! kind = "exponential"
//! initial_ms = 200
//! multiplier = 2.0
//! max_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Scheduler settings.
    pub engine: EngineSettings,
    /// Defaults applied to every asynchronous remote call.
    pub calls: CallSettings,
}

impl OperatorConfig {
    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlParseFailed` for malformed input and
    /// `Error::InvalidConfig` when a value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileReadFailed` when the file cannot be read, otherwise
    /// the errors of [`OperatorConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        debug!(path = %path.display(), "Loaded operator configuration");
        Self::from_toml_str(&contents)
    }

    /// Check that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.calls.validate()
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Size of the worker pool fibers are multiplexed onto.
    pub worker_threads: usize,
    /// How long a drain waits for live fibers before cancelling them.
    pub drain_grace_ms: u64,
}

impl EngineSettings {
    /// Drain grace period as a `Duration`.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::invalid_config(
                "engine.worker_threads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            drain_grace_ms: 30_000,
        }
    }
}

/// Defaults for asynchronous remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay curve between attempts.
    pub backoff: BackoffSettings,
    /// Treat 404 as transient instead of terminal.
    pub retry_not_found: bool,
}

impl CallSettings {
    /// Per-attempt timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::invalid_config(
                "calls.timeout_ms",
                "must be greater than zero",
            ));
        }
        self.backoff.validate()
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 5,
            backoff: BackoffSettings::default(),
            retry_not_found: false,
        }
    }
}

/// Backoff curve between call attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSettings {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay multiplied on every retry, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl BackoffSettings {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Fixed { delay_ms } => {
                if *delay_ms == 0 {
                    return Err(Error::invalid_config(
                        "calls.backoff.delay_ms",
                        "must be greater than zero",
                    ));
                }
            }
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                if *initial_ms == 0 {
                    return Err(Error::invalid_config(
                        "calls.backoff.initial_ms",
                        "must be greater than zero",
                    ));
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(Error::invalid_config(
                        "calls.backoff.multiplier",
                        "must be a finite value of at least 1.0",
                    ));
                }
                if max_ms < initial_ms {
                    return Err(Error::invalid_config(
                        "calls.backoff.max_ms",
                        "must not be below initial_ms",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 200,
            multiplier: 2.0,
            max_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OperatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.engine.worker_threads, 4);
        assert_eq!(config.calls.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_merges_defaults() {
        let config = OperatorConfig::from_toml_str(
            r#"
            [calls]
            max_retries = 2

            [calls.backoff]
            kind = "fixed"
            delay_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.calls.max_retries, 2);
        assert_eq!(config.calls.timeout_ms, 5_000);
        assert_eq!(config.calls.backoff, BackoffSettings::Fixed { delay_ms: 50 });
        assert_eq!(config.engine, EngineSettings::default());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = OperatorConfig::from_toml_str("[engine]\nworker_threads = 0\n");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        let result = OperatorConfig::from_toml_str(
            r#"
            [calls.backoff]
            kind = "exponential"
            initial_ms = 100
            multiplier = 0.5
            max_ms = 1000
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig { field, .. }) if field == "calls.backoff.multiplier"));
    }

    #[test]
    fn test_malformed_toml() {
        let result = OperatorConfig::from_toml_str("[engine\nworker_threads = 2");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[engine]\nworker_threads = 2\ndrain_grace_ms = 100").unwrap();

        let config = OperatorConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.worker_threads, 2);
        assert_eq!(config.engine.drain_grace(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_missing_file() {
        let result = OperatorConfig::load("/nonexistent/operator.toml");
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}

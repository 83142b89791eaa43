//! Configuration management
//!
//! Settings come from the environment (a `.env` file is honored), each with a
//! named default. The binary layers a few CLI overrides on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarvestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default control-plane host.
pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";

/// Default MySQL port for the control plane.
pub const DEFAULT_CONTROL_PORT: u16 = 3306;

/// Default control-plane database name.
pub const DEFAULT_CONTROL_DATABASE: &str = "control";

/// Default control-plane user.
pub const DEFAULT_CONTROL_USER: &str = "root";

/// Default location of the local checkpoint database.
pub const DEFAULT_CHECKPOINT_PATH: &str = "./db.sqlite";

/// Default bulk indexing endpoint.
pub const DEFAULT_INDEXER_URL: &str = "http://localhost:8080/index";

/// Default number of concurrent shard workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default batch flush threshold (records per sink call).
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of rows read ahead of the consumer.
pub const DEFAULT_READ_AHEAD: usize = 10_000;

/// Default session limit on concatenated field length.
pub const DEFAULT_CONCAT_MAX_LEN: u64 = 100_000;

/// Default replica connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default progress report interval in seconds.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 1;

/// Top-level harvester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub control: ControlDatabaseConfig,

    /// Credentials used against shard replicas
    pub shard_credentials: Credentials,

    pub checkpoint_path: PathBuf,
    pub indexer: IndexerConfig,
    pub extraction: ExtractionConfig,
    pub pool: PoolConfig,
    pub progress_interval_secs: u64,

    /// Exit non-zero when any shard failed
    pub fail_on_shard_errors: bool,
}

/// Control-plane (shard directory) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub credentials: Credentials,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Indexing sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub url: String,

    /// Per-request ceiling; `None` waits indefinitely
    pub timeout_secs: Option<u64>,
}

impl IndexerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Per-shard extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub batch_size: usize,
    pub read_ahead: usize,
    pub concat_max_len: u64,
    pub connect_timeout_secs: u64,
}

impl ExtractionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            read_ahead: DEFAULT_READ_AHEAD,
            concat_max_len: DEFAULT_CONCAT_MAX_LEN,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// A set but malformed value is an error rather than a silent default.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| HarvestError::config(format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    env_var(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(HarvestError::config(format!(
                "{key} has invalid value '{raw}', expected true or false"
            ))),
        })
        .transpose()
}

impl HarvestConfig {
    /// Load configuration from the environment and defaults
    ///
    /// Environment variables:
    /// - `SHARDFEED_CONTROL_HOST`, `SHARDFEED_CONTROL_PORT`,
    ///   `SHARDFEED_CONTROL_DATABASE`, `SHARDFEED_CONTROL_USER`,
    ///   `SHARDFEED_CONTROL_PASSWORD`
    /// - `SHARDFEED_SHARD_USER`, `SHARDFEED_SHARD_PASSWORD` (default to the
    ///   control credentials)
    /// - `SHARDFEED_CHECKPOINT_PATH`
    /// - `SHARDFEED_INDEXER_URL`, `SHARDFEED_SINK_TIMEOUT_SECS`
    /// - `SHARDFEED_WORKERS`, `SHARDFEED_BATCH_SIZE`, `SHARDFEED_READ_AHEAD`,
    ///   `SHARDFEED_CONCAT_MAX_LEN`, `SHARDFEED_CONNECT_TIMEOUT_SECS`
    /// - `SHARDFEED_PROGRESS_INTERVAL_SECS`, `SHARDFEED_FAIL_ON_SHARD_ERRORS`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let control_credentials = Credentials {
            user: env_var("SHARDFEED_CONTROL_USER")
                .unwrap_or_else(|| DEFAULT_CONTROL_USER.to_string()),
            password: env_var("SHARDFEED_CONTROL_PASSWORD").unwrap_or_default(),
        };

        let shard_credentials = Credentials {
            user: env_var("SHARDFEED_SHARD_USER")
                .unwrap_or_else(|| control_credentials.user.clone()),
            password: env_var("SHARDFEED_SHARD_PASSWORD")
                .unwrap_or_else(|| control_credentials.password.clone()),
        };

        let config = HarvestConfig {
            control: ControlDatabaseConfig {
                host: env_var("SHARDFEED_CONTROL_HOST")
                    .unwrap_or_else(|| DEFAULT_CONTROL_HOST.to_string()),
                port: env_parse("SHARDFEED_CONTROL_PORT")?.unwrap_or(DEFAULT_CONTROL_PORT),
                database: env_var("SHARDFEED_CONTROL_DATABASE")
                    .unwrap_or_else(|| DEFAULT_CONTROL_DATABASE.to_string()),
                credentials: control_credentials,
            },
            shard_credentials,
            checkpoint_path: env_var("SHARDFEED_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            indexer: IndexerConfig {
                url: env_var("SHARDFEED_INDEXER_URL")
                    .unwrap_or_else(|| DEFAULT_INDEXER_URL.to_string()),
                timeout_secs: env_parse("SHARDFEED_SINK_TIMEOUT_SECS")?,
            },
            extraction: ExtractionConfig {
                batch_size: env_parse("SHARDFEED_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
                read_ahead: env_parse("SHARDFEED_READ_AHEAD")?.unwrap_or(DEFAULT_READ_AHEAD),
                concat_max_len: env_parse("SHARDFEED_CONCAT_MAX_LEN")?
                    .unwrap_or(DEFAULT_CONCAT_MAX_LEN),
                connect_timeout_secs: env_parse("SHARDFEED_CONNECT_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            pool: PoolConfig {
                workers: env_parse("SHARDFEED_WORKERS")?.unwrap_or(DEFAULT_WORKERS),
            },
            progress_interval_secs: env_parse("SHARDFEED_PROGRESS_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_PROGRESS_INTERVAL_SECS),
            fail_on_shard_errors: env_flag("SHARDFEED_FAIL_ON_SHARD_ERRORS")?.unwrap_or(true),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.control.host.is_empty() {
            return Err(HarvestError::config("Control database host cannot be empty"));
        }

        if self.control.database.is_empty() {
            return Err(HarvestError::config("Control database name cannot be empty"));
        }

        if self.indexer.url.is_empty() {
            return Err(HarvestError::config("Indexer URL cannot be empty"));
        }

        if self.indexer.timeout_secs == Some(0) {
            return Err(HarvestError::config(
                "SHARDFEED_SINK_TIMEOUT_SECS must be greater than 0 when set",
            ));
        }

        if self.pool.workers == 0 {
            return Err(HarvestError::config("SHARDFEED_WORKERS must be greater than 0"));
        }

        if self.extraction.batch_size == 0 {
            return Err(HarvestError::config("SHARDFEED_BATCH_SIZE must be greater than 0"));
        }

        if self.extraction.read_ahead == 0 {
            return Err(HarvestError::config("SHARDFEED_READ_AHEAD must be greater than 0"));
        }

        if self.progress_interval_secs == 0 {
            return Err(HarvestError::config(
                "SHARDFEED_PROGRESS_INTERVAL_SECS must be greater than 0",
            ));
        }

        if self.indexer.timeout_secs.is_none() {
            tracing::debug!("No sink timeout configured - a stalled indexer blocks its worker");
        }

        Ok(())
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let credentials = Credentials {
            user: DEFAULT_CONTROL_USER.to_string(),
            password: String::new(),
        };

        Self {
            control: ControlDatabaseConfig {
                host: DEFAULT_CONTROL_HOST.to_string(),
                port: DEFAULT_CONTROL_PORT,
                database: DEFAULT_CONTROL_DATABASE.to_string(),
                credentials: credentials.clone(),
            },
            shard_credentials: credentials,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            indexer: IndexerConfig {
                url: DEFAULT_INDEXER_URL.to_string(),
                timeout_secs: None,
            },
            extraction: ExtractionConfig::default(),
            pool: PoolConfig::default(),
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
            fail_on_shard_errors: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SHARDFEED_CONTROL_HOST",
        "SHARDFEED_CONTROL_USER",
        "SHARDFEED_CONTROL_PASSWORD",
        "SHARDFEED_SHARD_USER",
        "SHARDFEED_SHARD_PASSWORD",
        "SHARDFEED_WORKERS",
        "SHARDFEED_BATCH_SIZE",
        "SHARDFEED_READ_AHEAD",
        "SHARDFEED_SINK_TIMEOUT_SECS",
        "SHARDFEED_FAIL_ON_SHARD_ERRORS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = HarvestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction.batch_size, 500);
        assert_eq!(config.extraction.read_ahead, 10_000);
        assert!(config.indexer.timeout().is_none());
        assert!(config.fail_on_shard_errors);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("SHARDFEED_CONTROL_USER", "harvester");
        std::env::set_var("SHARDFEED_CONTROL_PASSWORD", "s3cret");
        std::env::set_var("SHARDFEED_WORKERS", "12");
        std::env::set_var("SHARDFEED_SINK_TIMEOUT_SECS", "90");
        std::env::set_var("SHARDFEED_FAIL_ON_SHARD_ERRORS", "false");

        let config = HarvestConfig::from_env().unwrap();
        assert_eq!(config.pool.workers, 12);
        assert_eq!(config.indexer.timeout(), Some(Duration::from_secs(90)));
        assert!(!config.fail_on_shard_errors);
        // shard credentials fall back to the control credentials
        assert_eq!(config.shard_credentials.user, "harvester");
        assert_eq!(config.shard_credentials.password, "s3cret");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_workers() {
        clear_env();
        std::env::set_var("SHARDFEED_WORKERS", "0");
        let err = HarvestConfig::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_fail_on_shard_errors_accepts_numeric_flags() {
        clear_env();
        std::env::set_var("SHARDFEED_FAIL_ON_SHARD_ERRORS", "0");
        assert!(!HarvestConfig::from_env().unwrap().fail_on_shard_errors);

        std::env::set_var("SHARDFEED_FAIL_ON_SHARD_ERRORS", "1");
        assert!(HarvestConfig::from_env().unwrap().fail_on_shard_errors);

        std::env::set_var("SHARDFEED_FAIL_ON_SHARD_ERRORS", "sometimes");
        let err = HarvestConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SHARDFEED_FAIL_ON_SHARD_ERRORS"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_malformed_number_is_rejected() {
        clear_env();
        std::env::set_var("SHARDFEED_READ_AHEAD", "10k");
        let err = HarvestConfig::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
        assert!(err.to_string().contains("SHARDFEED_READ_AHEAD has invalid value '10k'"));
        clear_env();
    }

    #[test]
    fn test_zero_sink_timeout_rejected() {
        let mut config = HarvestConfig::default();
        config.indexer.timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let credentials = Credentials {
            user: "u".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
    }
}

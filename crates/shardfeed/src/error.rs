//! Error types for the harvester
//!
//! Shard-level failures (everything except [`HarvestError::Directory`] at
//! startup and [`HarvestError::Config`]) are caught at the shard worker
//! boundary and counted; they never stop sibling shards.

use thiserror::Error;

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Control-plane query failed
    #[error("Shard directory error: {0}")]
    Directory(String),

    /// Every replica candidate failed to connect or was not read-only
    #[error("No usable replica for shard group {shard_group} ({attempted} candidates tried)")]
    NoReplicaAvailable { shard_group: i64, attempted: usize },

    /// A single replica connection attempt failed
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Source query or row decoding failed mid-stream
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Bulk delivery to the indexing endpoint failed
    #[error("Sink error: {0}")]
    Sink(String),

    /// Checkpoint read or write failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    pub fn directory(err: impl std::fmt::Display) -> Self {
        Self::Directory(err.to_string())
    }

    pub fn connection(endpoint: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }

    pub fn extraction(err: impl std::fmt::Display) -> Self {
        Self::Extraction(err.to_string())
    }

    pub fn sink(err: impl std::fmt::Display) -> Self {
        Self::Sink(err.to_string())
    }

    pub fn checkpoint(err: impl std::fmt::Display) -> Self {
        Self::Checkpoint(err.to_string())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short label used in logs and per-shard outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::NoReplicaAvailable { .. } => "no_replica",
            Self::Connection { .. } => "connection",
            Self::Extraction(_) => "extraction",
            Self::Sink(_) => "sink",
            Self::Checkpoint(_) => "checkpoint",
            Self::Config(_) => "config",
        }
    }
}

impl From<shardfeed_common::CommonError> for HarvestError {
    fn from(err: shardfeed_common::CommonError) -> Self {
        match err {
            shardfeed_common::CommonError::InvalidWatermark(msg) => Self::Checkpoint(msg),
        }
    }
}

//! High-water marks: the per-shard resume point.
//!
//! A watermark is always held in one canonical ISO-8601 form
//! (`YYYY-MM-DDTHH:MM:SS.mmmZ`, UTC). Because every value shares that fixed
//! width layout, ordinal string comparison is chronological comparison, and
//! the value round-trips through the checkpoint table byte for byte.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

/// Canonical text of the "never synced" sentinel.
pub const EPOCH_WATERMARK: &str = "1970-01-01T00:00:00.000Z";

/// Latest source modification time known to be fully ingested for a shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Watermark(String);

impl Watermark {
    /// The epoch-zero sentinel used for shards without a checkpoint.
    pub fn epoch() -> Self {
        Self(EPOCH_WATERMARK.to_string())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Source databases hand back zone-less timestamps; they are read as UTC.
    pub fn from_naive_utc(at: NaiveDateTime) -> Self {
        Self::from_datetime(at.and_utc())
    }

    /// Parse any RFC 3339 timestamp and normalize it to canonical form.
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| CommonError::InvalidWatermark(format!("{raw}: {e}")))?;
        Ok(Self::from_datetime(parsed.with_timezone(&Utc)))
    }

    pub fn is_epoch(&self) -> bool {
        self.0 == EPOCH_WATERMARK
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Zone-less UTC value, for binding into source-side time predicates.
    pub fn to_naive_utc(&self) -> Result<NaiveDateTime> {
        DateTime::parse_from_rfc3339(&self.0)
            .map(|at| at.naive_utc())
            .map_err(|e| CommonError::InvalidWatermark(format!("{}: {e}", self.0)))
    }

    /// Raise this mark to `candidate` if the candidate is later.
    pub fn advance_to(&mut self, candidate: &Watermark) -> bool {
        if candidate > self {
            self.0.clone_from(&candidate.0);
            true
        } else {
            false
        }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Watermark {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Watermark {
    type Error = CommonError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Watermark> for String {
    fn from(value: Watermark) -> Self {
        value.0
    }
}

//! The persisted unit of idempotency state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a [`DataRecord`].
///
/// `Expired` is never written to a store. It is what [`DataRecord::status_at`]
/// reports once the record's expiry has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// A winner is currently executing the handler.
    InProgress,
    /// The handler finished and its response is stored.
    Completed,
    /// The record outlived its expiry and counts as absent.
    #[serde(skip)]
    Expired,
}

impl RecordStatus {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parses the stored string form. `EXPIRED` is derived, never stored, so
    /// it does not parse.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency state for one key.
///
/// A live record holds exactly one of `response_data` (COMPLETED) or
/// `in_progress_expiry` (IN_PROGRESS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Idempotency key, `{namespace}#{digest}`
    #[serde(rename = "id")]
    pub key: String,

    /// Stored status
    pub status: RecordStatus,

    /// Absolute expiry in epoch seconds
    #[serde(rename = "expiration")]
    pub expiry: i64,

    /// Deadline for the IN_PROGRESS marker in epoch milliseconds
    #[serde(rename = "in_progress_expiration", default)]
    pub in_progress_expiry: Option<i64>,

    /// Serialized handler response
    #[serde(rename = "data", default)]
    pub response_data: Option<String>,

    /// Fingerprint of the originating payload
    #[serde(default)]
    pub validation: Option<String>,
}

impl DataRecord {
    /// Returns true once `expiry <= now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now.timestamp()
    }

    /// Returns the status as observed at `now`, deriving `Expired`.
    pub fn status_at(&self, now: DateTime<Utc>) -> RecordStatus {
        if self.is_expired(now) {
            RecordStatus::Expired
        } else {
            self.status
        }
    }

    /// Returns true while an IN_PROGRESS marker still protects its winner.
    ///
    /// A marker without an in-progress deadline is never considered live.
    pub fn in_progress_is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::InProgress
            && self
                .in_progress_expiry
                .map(|deadline| deadline > now.timestamp_millis())
                .unwrap_or(false)
    }

    /// Returns true if a conditional insert may replace this record at `now`.
    ///
    /// Only `expiry` decides. A timed-out IN_PROGRESS marker still blocks the
    /// insert until the record itself expires.
    pub fn is_replaceable(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now)
    }
}

//! Persistence layer for idempotency records.
//!
//! [`PersistenceStore`] abstracts the key-value backend. Every backend must
//! implement [`save_in_progress`](PersistenceStore::save_in_progress) as one
//! atomic conditional write; that single guarantee is what lets exactly one
//! concurrent caller, across any number of processes, win a key.
//!
//! Backends build records through [`StoreSettings`] so that expirations are
//! computed identically everywhere.

pub mod memory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{IdempotencyConfig, DEFAULT_EXPIRES_AFTER, DEFAULT_IN_PROGRESS_TTL};
use crate::error::StoreError;
use crate::record::{DataRecord, RecordStatus};

pub use memory::InMemoryStore;

#[cfg(feature = "dynamodb")]
pub use dynamodb::{DynamoDbStore, DynamoDbStoreConfig};

/// Settings a store receives through [`PersistenceStore::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Namespace of the keys this store will see
    pub namespace: String,
    /// Lifetime of every written record
    pub expires_after: Duration,
    /// Default lifetime of an IN_PROGRESS marker
    pub in_progress_ttl: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            expires_after: DEFAULT_EXPIRES_AFTER,
            in_progress_ttl: DEFAULT_IN_PROGRESS_TTL,
        }
    }
}

impl StoreSettings {
    /// Extracts the store-relevant part of a configuration.
    pub fn from_config(config: &IdempotencyConfig) -> Self {
        Self {
            namespace: config.namespace(),
            expires_after: config.expires_after,
            in_progress_ttl: config.in_progress_ttl,
        }
    }

    /// Record expiry in epoch seconds for a write at `now`.
    pub fn expiry_at(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp()
            .saturating_add(i64::try_from(self.expires_after.as_secs()).unwrap_or(i64::MAX))
    }

    /// IN_PROGRESS deadline in epoch milliseconds for a marker written at `now`.
    ///
    /// The deadline hint, typically the caller's remaining execution time, caps
    /// the configured TTL.
    pub fn in_progress_expiry_at(&self, now: DateTime<Utc>, deadline_hint: Option<Duration>) -> i64 {
        let ttl = match deadline_hint {
            Some(hint) => hint.min(self.in_progress_ttl),
            None => self.in_progress_ttl,
        };
        now.timestamp_millis()
            .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Builds the IN_PROGRESS record written by a winning caller.
    pub fn in_progress_record(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        deadline_hint: Option<Duration>,
    ) -> DataRecord {
        DataRecord {
            key: key.to_string(),
            status: RecordStatus::InProgress,
            expiry: self.expiry_at(now),
            in_progress_expiry: Some(self.in_progress_expiry_at(now, deadline_hint)),
            response_data: None,
            validation: fingerprint.map(str::to_string),
        }
    }

    /// Builds the COMPLETED record that replaces the marker.
    pub fn completed_record(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        response_data: &str,
        now: DateTime<Utc>,
    ) -> DataRecord {
        DataRecord {
            key: key.to_string(),
            status: RecordStatus::Completed,
            expiry: self.expiry_at(now),
            in_progress_expiry: None,
            response_data: Some(response_data.to_string()),
            validation: fingerprint.map(str::to_string),
        }
    }
}

/// Key-value backend for idempotency records.
///
/// Implementations report conflicts and misses through [`StoreError`] and never
/// retry on their own; retry policy belongs to the coordinator.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Applies namespace and expiry settings. Called once before first use.
    fn configure(&mut self, settings: &StoreSettings);

    /// Atomically writes an IN_PROGRESS record for `key`.
    ///
    /// Succeeds only if no record exists or the existing record's expiry is at
    /// or before `now`. Otherwise returns [`StoreError::AlreadyExists`]. An
    /// IN_PROGRESS marker whose own deadline has passed still blocks the write.
    async fn save_in_progress(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        deadline_hint: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Reads the raw record for `key`, expired or not.
    ///
    /// Returns [`StoreError::ItemNotFound`] when nothing is stored.
    async fn get_record(&self, key: &str) -> Result<DataRecord, StoreError>;

    /// Unconditionally overwrites `key` with a COMPLETED record.
    async fn save_success(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        response_data: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Removes `key`. Deleting an absent key succeeds.
    async fn delete_record(&self, key: &str) -> Result<(), StoreError>;
}

/// Type alias for a shared PersistenceStore.
pub type SharedPersistenceStore = Arc<dyn PersistenceStore>;

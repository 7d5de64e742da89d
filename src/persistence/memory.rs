//! In-process persistence backend.
//!
//! Clones of an [`InMemoryStore`] share one table, so several coordinators can
//! race against the same "remote" state inside a single test or process. The
//! conditional insert runs under the table lock, which makes it atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{PersistenceStore, StoreSettings};
use crate::error::StoreError;
use crate::record::DataRecord;

/// Table-backed store living in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    table: Arc<Mutex<HashMap<String, DataRecord>>>,
    settings: StoreSettings,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The settings applied by the last [`configure`](PersistenceStore::configure).
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Returns a copy of the stored record, if any.
    pub async fn snapshot(&self, key: &str) -> Option<DataRecord> {
        self.table.lock().await.get(key).cloned()
    }

    /// Writes a record as-is, bypassing all conditions.
    pub async fn put_raw(&self, record: DataRecord) {
        self.table.lock().await.insert(record.key.clone(), record);
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    fn configure(&mut self, settings: &StoreSettings) {
        self.settings = settings.clone();
    }

    async fn save_in_progress(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        deadline_hint: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        if let Some(existing) = table.get(key) {
            if !existing.is_replaceable(now) {
                return Err(StoreError::AlreadyExists);
            }
        }
        let record = self
            .settings
            .in_progress_record(key, fingerprint, now, deadline_hint);
        table.insert(key.to_string(), record);
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<DataRecord, StoreError> {
        self.table
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or(StoreError::ItemNotFound)
    }

    async fn save_success(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        response_data: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = self
            .settings
            .completed_record(key, fingerprint, response_data, now);
        self.table.lock().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete_record(&self, key: &str) -> Result<(), StoreError> {
        self.table.lock().await.remove(key);
        Ok(())
    }
}

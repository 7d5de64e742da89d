//! Scripted implementation of PersistenceStore for testing.
//!
//! [`MockPersistenceStore`] answers each store operation from a FIFO queue of
//! scripted responses. Once a queue is empty, calls fall through to an embedded
//! [`InMemoryStore`], so a test only scripts the calls it cares about. Every call
//! is recorded for later verification.
//!
//! # Examples
//!
//! ```
//! use lambda_idempotency::StoreError;
//! use lambda_idempotency_testing::MockPersistenceStore;
//!
//! // The first claim conflicts and the follow-up read finds nothing.
//! let store = MockPersistenceStore::new()
//!     .with_save_in_progress_response(Err(StoreError::AlreadyExists))
//!     .with_get_record_response(Err(StoreError::ItemNotFound));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lambda_idempotency::{DataRecord, InMemoryStore, PersistenceStore, StoreError, StoreSettings};

/// A call made to the mock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `save_in_progress`
    SaveInProgress {
        /// The idempotency key
        key: String,
        /// The payload fingerprint
        fingerprint: Option<String>,
        /// The instant passed by the caller
        now: DateTime<Utc>,
        /// The deadline hint passed by the caller
        deadline_hint: Option<Duration>,
    },
    /// `get_record`
    GetRecord {
        /// The idempotency key
        key: String,
    },
    /// `save_success`
    SaveSuccess {
        /// The idempotency key
        key: String,
        /// The payload fingerprint
        fingerprint: Option<String>,
        /// The serialized response
        response_data: String,
        /// The instant passed by the caller
        now: DateTime<Utc>,
    },
    /// `delete_record`
    DeleteRecord {
        /// The idempotency key
        key: String,
    },
}

impl StoreCall {
    /// The key the call was made for.
    pub fn key(&self) -> &str {
        match self {
            Self::SaveInProgress { key, .. }
            | Self::GetRecord { key }
            | Self::SaveSuccess { key, .. }
            | Self::DeleteRecord { key } => key,
        }
    }
}

#[derive(Default)]
struct Script {
    save_in_progress: Mutex<VecDeque<Result<(), StoreError>>>,
    get_record: Mutex<VecDeque<Result<DataRecord, StoreError>>>,
    save_success: Mutex<VecDeque<Result<(), StoreError>>>,
    delete_record: Mutex<VecDeque<Result<(), StoreError>>>,
    calls: Mutex<Vec<StoreCall>>,
}

/// Mock implementation of PersistenceStore for testing.
///
/// Clones share the script and the call log, so a test can keep one clone
/// after handing the other to a coordinator.
///
/// # Thread Safety
///
/// The script and call log sit behind mutexes; concurrent tasks may use the
/// same mock.
///
/// # Examples
///
/// ```
/// use lambda_idempotency::{IdempotencyConfig, IdempotencyCoordinator, IdempotencyError};
/// use lambda_idempotency_testing::{MockPersistenceStore, StoreCall};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let store = MockPersistenceStore::new();
/// let coordinator = IdempotencyCoordinator::new(IdempotencyConfig::default(), store.clone()).unwrap();
///
/// let key = coordinator.derive_key(&json!({"id": 1})).unwrap();
/// let _: u32 = coordinator
///     .execute(&key, || async { Ok::<_, IdempotencyError>(1) }, Default::default())
///     .await
///     .unwrap();
///
/// let calls = store.calls();
/// assert!(matches!(calls[0], StoreCall::SaveInProgress { .. }));
/// assert!(matches!(calls[1], StoreCall::SaveSuccess { .. }));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockPersistenceStore {
    script: Arc<Script>,
    fallback: InMemoryStore,
}

impl MockPersistenceStore {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next unscripted `save_in_progress` call.
    pub fn with_save_in_progress_response(self, response: Result<(), StoreError>) -> Self {
        self.script
            .save_in_progress
            .lock()
            .unwrap()
            .push_back(response);
        self
    }

    /// Queues `count` responses produced by `response`.
    pub fn with_save_in_progress_responses(
        self,
        count: usize,
        response: impl Fn() -> Result<(), StoreError>,
    ) -> Self {
        let mut queue = self.script.save_in_progress.lock().unwrap();
        for _ in 0..count {
            queue.push_back(response());
        }
        drop(queue);
        self
    }

    /// Queues a response for the next `get_record` call.
    pub fn with_get_record_response(self, response: Result<DataRecord, StoreError>) -> Self {
        self.script.get_record.lock().unwrap().push_back(response);
        self
    }

    /// Queues `count` responses produced by `response`.
    pub fn with_get_record_responses(
        self,
        count: usize,
        response: impl Fn() -> Result<DataRecord, StoreError>,
    ) -> Self {
        let mut queue = self.script.get_record.lock().unwrap();
        for _ in 0..count {
            queue.push_back(response());
        }
        drop(queue);
        self
    }

    /// Queues a response for the next `save_success` call.
    pub fn with_save_success_response(self, response: Result<(), StoreError>) -> Self {
        self.script.save_success.lock().unwrap().push_back(response);
        self
    }

    /// Queues a response for the next `delete_record` call.
    pub fn with_delete_record_response(self, response: Result<(), StoreError>) -> Self {
        self.script.delete_record.lock().unwrap().push_back(response);
        self
    }

    /// Gets all calls made to this mock, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.script.calls.lock().unwrap().clone()
    }

    /// Number of `save_in_progress` calls made.
    pub fn save_in_progress_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::SaveInProgress { .. }))
    }

    /// Number of `get_record` calls made.
    pub fn get_record_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::GetRecord { .. }))
    }

    /// Number of `save_success` calls made.
    pub fn save_success_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::SaveSuccess { .. }))
    }

    /// Number of `delete_record` calls made.
    pub fn delete_record_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::DeleteRecord { .. }))
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.script.calls.lock().unwrap().clear();
    }

    /// The in-memory store answering unscripted calls.
    pub fn fallback(&self) -> &InMemoryStore {
        &self.fallback
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.script
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn record(&self, call: StoreCall) {
        self.script.calls.lock().unwrap().push(call);
    }

    fn next<T>(queue: &Mutex<VecDeque<Result<T, StoreError>>>) -> Option<Result<T, StoreError>> {
        queue.lock().unwrap().pop_front()
    }
}

impl std::fmt::Debug for MockPersistenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPersistenceStore")
            .field("calls", &self.script.calls.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistenceStore for MockPersistenceStore {
    fn configure(&mut self, settings: &StoreSettings) {
        self.fallback.configure(settings);
    }

    async fn save_in_progress(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
        deadline_hint: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::SaveInProgress {
            key: key.to_string(),
            fingerprint: fingerprint.map(str::to_string),
            now,
            deadline_hint,
        });
        match Self::next(&self.script.save_in_progress) {
            Some(response) => response,
            None => {
                self.fallback
                    .save_in_progress(key, fingerprint, now, deadline_hint)
                    .await
            }
        }
    }

    async fn get_record(&self, key: &str) -> Result<DataRecord, StoreError> {
        self.record(StoreCall::GetRecord {
            key: key.to_string(),
        });
        match Self::next(&self.script.get_record) {
            Some(response) => response,
            None => self.fallback.get_record(key).await,
        }
    }

    async fn save_success(
        &self,
        key: &str,
        fingerprint: Option<&str>,
        response_data: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::SaveSuccess {
            key: key.to_string(),
            fingerprint: fingerprint.map(str::to_string),
            response_data: response_data.to_string(),
            now,
        });
        match Self::next(&self.script.save_success) {
            Some(response) => response,
            None => {
                self.fallback
                    .save_success(key, fingerprint, response_data, now)
                    .await
            }
        }
    }

    async fn delete_record(&self, key: &str) -> Result<(), StoreError> {
        self.record(StoreCall::DeleteRecord {
            key: key.to_string(),
        });
        match Self::next(&self.script.delete_record) {
            Some(response) => response,
            None => self.fallback.delete_record(key).await,
        }
    }
}

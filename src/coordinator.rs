//! The idempotent execution state machine.
//!
//! An [`IdempotencyCoordinator`] owns the three collaborators of an idempotent
//! call: the [`KeyExtractor`], a [`PersistenceStore`] and the optional
//! [`LocalCache`]. [`execute`](IdempotencyCoordinator::execute) runs an operation
//! at most once per key within the expiry window and replays the stored response
//! for every duplicate.
//!
//! # Protocol
//!
//! 1. Write an IN_PROGRESS marker with a conditional insert.
//! 2. If the insert wins, run the operation and store its response (or delete the
//!    marker if it failed).
//! 3. If the insert conflicts, read the existing record: replay a COMPLETED one,
//!    reject a live IN_PROGRESS one, and retry anything contradictory at most
//!    [`MAX_INCONSISTENCY_RETRIES`] times.
//!
//! ```rust
//! use lambda_idempotency::{IdempotencyConfig, IdempotencyCoordinator, IdempotencyError};
//! use lambda_idempotency::coordinator::ExecuteOptions;
//! use lambda_idempotency::persistence::InMemoryStore;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = IdempotencyConfig::for_operation("charge").with_event_key_selector("order_id");
//! let coordinator = IdempotencyCoordinator::new(config, InMemoryStore::new())?;
//!
//! let key = coordinator.derive_key(&json!({"order_id": "42"}))?;
//! let total: u32 = coordinator
//!     .execute(&key, || async { Ok::<_, IdempotencyError>(1) }, ExecuteOptions::default())
//!     .await?;
//! assert_eq!(total, 1);
//! # Ok::<(), IdempotencyError>(())
//! # }).unwrap();
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::LocalCache;
use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, StoreError};
use crate::key::{IdempotencyKey, KeyExtractor};
use crate::persistence::{PersistenceStore, SharedPersistenceStore, StoreSettings};
use crate::record::{DataRecord, RecordStatus};
use crate::serdes::{JsonSerDes, SerDes, SerDesContext};

/// Number of extra attempts made when the store reports contradictory state.
pub const MAX_INCONSISTENCY_RETRIES: u32 = 2;

/// Per-call options for [`IdempotencyCoordinator::execute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Time the caller has left. Caps how long the IN_PROGRESS marker lives.
    pub deadline_hint: Option<Duration>,
    /// Skip the local cache and always consult the store.
    pub force_fresh: bool,
}

impl ExecuteOptions {
    /// Options carrying a deadline hint.
    pub fn with_deadline(deadline_hint: Duration) -> Self {
        Self {
            deadline_hint: Some(deadline_hint),
            ..Default::default()
        }
    }
}

/// Result of trying to take ownership of a key.
enum Claim {
    Won,
    Replay(DataRecord),
}

/// What a conflicting record means for this call.
enum Lookup {
    Completed(DataRecord),
    InProgress,
    Inconsistent(&'static str),
}

/// Coordinates idempotent execution against a persistence store.
///
/// Cloning is cheap; clones share the store, cache and clock.
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    config: Arc<IdempotencyConfig>,
    extractor: Arc<KeyExtractor>,
    store: SharedPersistenceStore,
    cache: Option<Arc<LocalCache<String, DataRecord>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdempotencyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCoordinator")
            .field("config", &self.config)
            .field("extractor", &self.extractor)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl IdempotencyCoordinator {
    /// Creates a coordinator, configuring `store` with the namespace and expiry
    /// settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns a Configuration error for invalid settings and a Key error for an
    /// unparsable selector.
    pub fn new<S>(config: IdempotencyConfig, mut store: S) -> Result<Self, IdempotencyError>
    where
        S: PersistenceStore + 'static,
    {
        config.validate()?;
        let extractor = KeyExtractor::from_config(&config)?;
        store.configure(&StoreSettings::from_config(&config));

        let cache = if config.use_local_cache {
            let cache = LocalCache::new(config.local_cache_max_items).ok_or_else(|| {
                IdempotencyError::configuration("local_cache_max_items must be positive")
            })?;
            Some(Arc::new(cache))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            extractor: Arc::new(extractor),
            store: Arc::new(store),
            cache,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configuration this coordinator was built from.
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// The local cache, if enabled.
    pub fn cache(&self) -> Option<&LocalCache<String, DataRecord>> {
        self.cache.as_deref()
    }

    /// Derives the idempotency key for a request.
    pub fn derive_key<R: Serialize + ?Sized>(
        &self,
        request: &R,
    ) -> Result<IdempotencyKey, IdempotencyError> {
        self.extractor.derive_from(request)
    }

    /// Runs `operation` at most once for `key`, encoding responses as JSON.
    ///
    /// Returns the fresh or replayed response, the operation's own error after
    /// its marker has been removed, or an [`IdempotencyError`] converted into `E`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let serdes = JsonSerDes::<T>::new();
        self.execute_with_serdes(key, operation, options, &serdes)
            .await
    }

    /// Like [`execute`](Self::execute) with a custom response encoding.
    pub async fn execute_with_serdes<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        operation: F,
        options: ExecuteOptions,
        serdes: &dyn SerDes<T>,
    ) -> Result<T, E>
    where
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.config.disabled {
            return operation().await;
        }

        let context = SerDesContext::new(key.as_str());

        if !options.force_fresh {
            if let Some(record) = self.cached(key, self.clock.now()) {
                self.validate_payload(key, &record)?;
                tracing::debug!(key = %key, "Replaying idempotent response from local cache");
                return Ok(self.replay(key, &record, serdes, &context)?);
            }
        }

        match self.claim(key, options).await? {
            Claim::Replay(record) => Ok(self.replay(key, &record, serdes, &context)?),
            Claim::Won => self.run(key, operation, serdes, &context).await,
        }
    }

    /// Takes ownership of `key` or finds the record to replay.
    async fn claim(
        &self,
        key: &IdempotencyKey,
        options: ExecuteOptions,
    ) -> Result<Claim, IdempotencyError> {
        for attempt in 0..=MAX_INCONSISTENCY_RETRIES {
            let now = self.clock.now();
            match self
                .store
                .save_in_progress(
                    key.as_str(),
                    key.fingerprint.as_deref(),
                    now,
                    options.deadline_hint,
                )
                .await
            {
                Ok(()) => return Ok(Claim::Won),
                Err(StoreError::AlreadyExists) => {}
                Err(error) => {
                    return Err(error.into_persistence("Failed to save in-progress record"))
                }
            }

            if !options.force_fresh {
                if let Some(record) = self.cached(key, now) {
                    self.validate_payload(key, &record)?;
                    return Ok(Claim::Replay(record));
                }
            }

            match self.lookup(key).await? {
                Lookup::Completed(record) => {
                    self.validate_payload(key, &record)?;
                    self.remember(&record);
                    return Ok(Claim::Replay(record));
                }
                Lookup::InProgress => {
                    return Err(IdempotencyError::already_in_progress(key.as_str()));
                }
                Lookup::Inconsistent(reason) => {
                    tracing::debug!(
                        key = %key,
                        attempt = attempt,
                        reason = reason,
                        "Inconsistent idempotency record, retrying"
                    );
                }
            }
        }

        tracing::warn!(
            key = %key,
            attempts = MAX_INCONSISTENCY_RETRIES + 1,
            "Idempotency record stayed inconsistent: max retries exceeded"
        );
        Err(IdempotencyError::inconsistent_state(
            key.as_str(),
            MAX_INCONSISTENCY_RETRIES + 1,
        ))
    }

    /// Classifies the record that made the conditional insert fail.
    async fn lookup(&self, key: &IdempotencyKey) -> Result<Lookup, IdempotencyError> {
        let record = match self.store.get_record(key.as_str()).await {
            Ok(record) => record,
            Err(StoreError::ItemNotFound) => {
                return Ok(Lookup::Inconsistent("record vanished after conflict"))
            }
            Err(error) => return Err(error.into_persistence("Failed to read record")),
        };

        let now = self.clock.now();
        Ok(match record.status_at(now) {
            RecordStatus::Expired => Lookup::Inconsistent("record expired but still conflicts"),
            RecordStatus::Completed => Lookup::Completed(record),
            RecordStatus::InProgress if record.in_progress_is_live(now) => Lookup::InProgress,
            RecordStatus::InProgress => Lookup::Inconsistent("in-progress marker timed out"),
        })
    }

    /// Runs the operation after a won claim and settles the record.
    async fn run<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        operation: F,
        serdes: &dyn SerDes<T>,
        context: &SerDesContext,
    ) -> Result<T, E>
    where
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let response = match operation().await {
            Ok(response) => response,
            Err(error) => {
                self.release(key).await;
                return Err(error);
            }
        };

        let data = match serdes.serialize(&response, context) {
            Ok(data) => data,
            Err(error) => {
                self.release(key).await;
                return Err(IdempotencyError::from(error).into());
            }
        };

        let now = self.clock.now();
        self.store
            .save_success(key.as_str(), key.fingerprint.as_deref(), &data, now)
            .await
            .map_err(|e| e.into_persistence("Failed to save completed record"))?;

        if let Some(cache) = &self.cache {
            let settings = StoreSettings::from_config(&self.config);
            cache.set(
                key.key.clone(),
                settings.completed_record(key.as_str(), key.fingerprint.as_deref(), &data, now),
            );
        }
        Ok(response)
    }

    /// Best-effort removal of the marker after a failed operation.
    async fn release(&self, key: &IdempotencyKey) {
        if let Err(error) = self.store.delete_record(key.as_str()).await {
            tracing::warn!(key = %key, error = %error, "Failed to delete idempotency record");
        }
        if let Some(cache) = &self.cache {
            cache.delete(&key.key);
        }
    }

    fn cached(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Option<DataRecord> {
        let cache = self.cache.as_ref()?;
        let record = cache.try_get(&key.key)?;
        if record.is_expired(now) || record.status != RecordStatus::Completed {
            cache.delete(&key.key);
            return None;
        }
        Some(record)
    }

    fn remember(&self, record: &DataRecord) {
        if let Some(cache) = &self.cache {
            cache.set(record.key.clone(), record.clone());
        }
    }

    fn validate_payload(
        &self,
        key: &IdempotencyKey,
        record: &DataRecord,
    ) -> Result<(), IdempotencyError> {
        match &key.fingerprint {
            Some(fingerprint) if record.validation.as_deref() != Some(fingerprint.as_str()) => {
                Err(IdempotencyError::validation(
                    key.as_str(),
                    "Payload does not match the payload of the stored record",
                ))
            }
            _ => Ok(()),
        }
    }

    fn replay<T>(
        &self,
        key: &IdempotencyKey,
        record: &DataRecord,
        serdes: &dyn SerDes<T>,
        context: &SerDesContext,
    ) -> Result<T, IdempotencyError> {
        let data = record.response_data.as_deref().ok_or_else(|| {
            IdempotencyError::persistence(format!(
                "Completed record for {} has no response data",
                key
            ))
        })?;
        Ok(serdes.deserialize(data, context)?)
    }

    /// Wraps a request handler so every call runs idempotently.
    pub fn wrap<F>(&self, handler: F) -> IdempotentHandler<F> {
        IdempotentHandler {
            coordinator: self.clone(),
            handler,
        }
    }
}

/// A handler whose calls are deduplicated by an [`IdempotencyCoordinator`].
///
/// ```rust
/// use lambda_idempotency::{IdempotencyConfig, IdempotencyCoordinator, IdempotencyError};
/// use lambda_idempotency::persistence::InMemoryStore;
/// use serde_json::{json, Value};
///
/// # tokio_test::block_on(async {
/// let coordinator = IdempotencyCoordinator::new(IdempotencyConfig::default(), InMemoryStore::new())?;
/// let handler = coordinator.wrap(|event: Value| async move {
///     Ok::<_, IdempotencyError>(json!({"echo": event}))
/// });
///
/// let first = handler.call(json!({"id": 1}), None).await?;
/// let second = handler.call(json!({"id": 1}), None).await?;
/// assert_eq!(first, second);
/// # Ok::<(), IdempotencyError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct IdempotentHandler<F> {
    coordinator: IdempotencyCoordinator,
    handler: F,
}

impl<F> std::fmt::Debug for IdempotentHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentHandler")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl<F> IdempotentHandler<F> {
    /// Handles `request`, replaying the stored response for duplicates.
    ///
    /// `deadline_hint` is the time the invocation has left, if known.
    pub async fn call<Req, T, E, Fut>(
        &self,
        request: Req,
        deadline_hint: Option<Duration>,
    ) -> Result<T, E>
    where
        F: Fn(Req) -> Fut,
        Req: Serialize,
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.coordinator.config.disabled {
            return (self.handler)(request).await;
        }

        let key = self.coordinator.derive_key(&request).map_err(E::from)?;
        let handler = &self.handler;
        let options = ExecuteOptions {
            deadline_hint,
            ..Default::default()
        };
        self.coordinator
            .execute(&key, move || handler(request), options)
            .await
    }

    /// The coordinator behind this handler.
    pub fn coordinator(&self) -> &IdempotencyCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use crate::serdes::SerDesError;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct TestClock(Mutex<DateTime<Utc>>);

    impl TestClock {
        fn at(secs: i64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc.timestamp_opt(secs, 0).unwrap())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Debug, PartialEq)]
    enum OrderError {
        OutOfStock,
        Idempotency(String),
    }

    impl From<IdempotencyError> for OrderError {
        fn from(error: IdempotencyError) -> Self {
            Self::Idempotency(error.to_string())
        }
    }

    fn coordinator(config: IdempotencyConfig, store: &InMemoryStore) -> IdempotencyCoordinator {
        IdempotencyCoordinator::new(config, store.clone()).unwrap()
    }

    fn key(c: &IdempotencyCoordinator, id: &str) -> IdempotencyKey {
        c.derive_key(&json!({ "id": id })).unwrap()
    }

    #[tokio::test]
    async fn test_second_call_replays_without_running() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default(), &store);
        let k = key(&c, "42");
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let response: Value = c
                .execute(
                    &k,
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, IdempotencyError>(json!({"total": 1}))
                    },
                    ExecuteOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(response, json!({"total": 1}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = store.snapshot(k.as_str()).await.unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.response_data.as_deref(), Some("{\"total\":1}"));
    }

    #[tokio::test]
    async fn test_failed_operation_removes_marker_and_passes_error_through() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default(), &store);
        let k = key(&c, "42");

        let result: Result<u32, OrderError> = c
            .execute(&k, || async { Err(OrderError::OutOfStock) }, ExecuteOptions::default())
            .await;
        assert_eq!(result, Err(OrderError::OutOfStock));
        assert!(store.is_empty().await);

        let retried: Result<u32, OrderError> = c
            .execute(&k, || async { Ok(5) }, ExecuteOptions::default())
            .await;
        assert_eq!(retried, Ok(5));
    }

    #[tokio::test]
    async fn test_live_marker_rejects_duplicate() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default(), &store);
        let k = key(&c, "7");
        store
            .put_raw(
                StoreSettings::from_config(c.config()).in_progress_record(
                    k.as_str(),
                    None,
                    Utc::now(),
                    None,
                ),
            )
            .await;

        let error = c
            .execute(&k, || async { Ok::<u32, IdempotencyError>(1) }, ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_already_in_progress());
    }

    #[tokio::test]
    async fn test_expired_record_runs_again() {
        let store = InMemoryStore::new();
        let clock = TestClock::at(1_000);
        let config = IdempotencyConfig {
            expires_after: Duration::from_secs(10),
            ..Default::default()
        };
        let c = coordinator(config, &store).with_clock(clock.clone());
        let k = key(&c, "1");
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let op = move || async move {
            Ok::<_, IdempotencyError>(calls.fetch_add(1, Ordering::SeqCst))
        };

        assert_eq!(c.execute(&k, op, ExecuteOptions::default()).await.unwrap(), 0);
        clock.advance(Duration::from_secs(9));
        assert_eq!(c.execute(&k, op, ExecuteOptions::default()).await.unwrap(), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(c.execute(&k, op, ExecuteOptions::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_marker_is_not_taken_over() {
        let store = InMemoryStore::new();
        let clock = TestClock::at(1_000);
        let c = coordinator(IdempotencyConfig::default(), &store).with_clock(clock.clone());
        let k = key(&c, "1");
        store
            .put_raw(StoreSettings::from_config(c.config()).in_progress_record(
                k.as_str(),
                None,
                clock.now(),
                Some(Duration::from_secs(5)),
            ))
            .await;

        clock.advance(Duration::from_secs(5));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let error = c
            .execute(
                &k,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, IdempotencyError>(3)
                },
                ExecuteOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(error.is_inconsistent_state());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let record = store.snapshot(k.as_str()).await.unwrap();
        assert_eq!(record.status, RecordStatus::InProgress);
    }

    #[tokio::test]
    async fn test_unreadable_stored_response_names_the_key() {
        let store = InMemoryStore::new();
        let clock = TestClock::at(1_000);
        let c = coordinator(IdempotencyConfig::default(), &store).with_clock(clock.clone());
        let k = IdempotencyKey::new("handler#bad");
        store
            .put_raw(StoreSettings::from_config(c.config()).completed_record(
                k.as_str(),
                None,
                "{not json",
                clock.now(),
            ))
            .await;

        let error = c
            .execute(&k, || async { Ok::<u32, IdempotencyError>(1) }, ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_persistence());
        assert!(error.to_string().contains("handler#bad"));
    }

    #[tokio::test]
    async fn test_payload_mismatch_is_validation_error() {
        let store = InMemoryStore::new();
        let config = IdempotencyConfig::default()
            .with_event_key_selector("id")
            .with_payload_validation_selector("amount");
        let c = coordinator(config, &store);

        let first = c.derive_key(&json!({"id": "1", "amount": 10})).unwrap();
        let _: u32 = c
            .execute(&first, || async { Ok::<_, IdempotencyError>(10) }, ExecuteOptions::default())
            .await
            .unwrap();

        let tampered = c.derive_key(&json!({"id": "1", "amount": 99})).unwrap();
        let error = c
            .execute(&tampered, || async { Ok::<u32, IdempotencyError>(99) }, ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default().with_local_cache(4), &store);
        let k = key(&c, "1");

        let _: u32 = c
            .execute(&k, || async { Ok::<_, IdempotencyError>(1) }, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(c.cache().unwrap().len(), 1);

        // The cache alone can answer once the store forgets the record.
        store.delete_record(k.as_str()).await.unwrap();
        let replayed: u32 = c
            .execute(&k, || async { Ok::<_, IdempotencyError>(2) }, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(replayed, 1);

        let fresh: u32 = c
            .execute(
                &k,
                || async { Ok::<_, IdempotencyError>(2) },
                ExecuteOptions {
                    force_fresh: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fresh, 2);
    }

    #[tokio::test]
    async fn test_disabled_runs_operation_directly() {
        let store = InMemoryStore::new();
        let config = IdempotencyConfig {
            disabled: true,
            ..Default::default()
        };
        let c = coordinator(config, &store);
        let k = key(&c, "1");
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..3 {
            let _: u32 = c
                .execute(
                    &k,
                    move || async move { Ok::<_, IdempotencyError>(calls.fetch_add(1, Ordering::SeqCst)) },
                    ExecuteOptions::default(),
                )
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_wrapped_handler_deduplicates_requests() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default().with_event_key_selector("id"), &store);
        let calls = AtomicU32::new(0);
        let handler = c.wrap(|event: Value| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, IdempotencyError>(json!({"id": event["id"], "n": n})) }
        });

        let a = handler.call(json!({"id": "x", "ts": 1}), None).await.unwrap();
        let b = handler.call(json!({"id": "x", "ts": 2}), None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let error = handler.call(json!({"other": 1}), None).await.unwrap_err();
        assert!(error.is_key());
    }

    struct UpperCase;

    impl SerDes<String> for UpperCase {
        fn serialize(&self, value: &String, _context: &SerDesContext) -> Result<String, SerDesError> {
            Ok(value.to_uppercase())
        }

        fn deserialize(&self, data: &str, context: &SerDesContext) -> Result<String, SerDesError> {
            Ok(format!("{}@{}", data, context.idempotency_key))
        }
    }

    #[tokio::test]
    async fn test_custom_serdes_encodes_stored_response() {
        let store = InMemoryStore::new();
        let c = coordinator(IdempotencyConfig::default(), &store);
        let k = IdempotencyKey::new("handler#k");
        let run = || async { Ok::<_, IdempotencyError>("done".to_string()) };

        let fresh = c
            .execute_with_serdes(&k, run, ExecuteOptions::default(), &UpperCase)
            .await
            .unwrap();
        assert_eq!(fresh, "done");
        let record = store.snapshot("handler#k").await.unwrap();
        assert_eq!(record.response_data.as_deref(), Some("DONE"));

        let replayed = c
            .execute_with_serdes(&k, run, ExecuteOptions::default(), &UpperCase)
            .await
            .unwrap();
        assert_eq!(replayed, "DONE@handler#k");
    }

    #[test]
    fn test_zero_cache_capacity_is_rejected() {
        let config = IdempotencyConfig {
            use_local_cache: true,
            local_cache_max_items: 0,
            ..Default::default()
        };
        let error = IdempotencyCoordinator::new(config, InMemoryStore::new()).unwrap_err();
        assert!(error.is_configuration());
    }
}

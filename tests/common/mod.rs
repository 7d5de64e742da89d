//! Shared test utilities for integration tests.
//!
//! The scripted store and manual clock come from `lambda-idempotency-testing`;
//! this module adds helper functions, record builders and proptest strategies
//! used across integration tests.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::sync::Arc;

use lambda_idempotency::{
    DataRecord, IdempotencyConfig, IdempotencyCoordinator, IdempotencyError, PersistenceStore,
    RecordStatus, StoreError,
};
use lambda_idempotency_testing::{ManualClock, MockPersistenceStore};
use proptest::prelude::*;
use serde_json::{json, Value};

// =============================================================================
// Store Scripts
// =============================================================================

/// Scripts `times` conflicting claims on `store`, each followed by a read
/// returning `read()`.
pub fn with_conflicts(
    store: MockPersistenceStore,
    times: usize,
    read: impl Fn() -> Result<DataRecord, StoreError>,
) -> MockPersistenceStore {
    store
        .with_save_in_progress_responses(times, || Err(StoreError::AlreadyExists))
        .with_get_record_responses(times, read)
}

// =============================================================================
// Test Helper Functions
// =============================================================================

/// Error type of the protected operations in these tests.
#[derive(Debug, PartialEq)]
pub enum OrderError {
    IndexOutOfRange,
    Idempotency(String),
}

impl From<IdempotencyError> for OrderError {
    fn from(error: IdempotencyError) -> Self {
        Self::Idempotency(error.to_string())
    }
}

/// Builds a coordinator over `store` that reads time from `clock`.
pub fn coordinator_with_clock<S>(
    config: IdempotencyConfig,
    store: S,
    clock: &ManualClock,
) -> IdempotencyCoordinator
where
    S: PersistenceStore + 'static,
{
    IdempotencyCoordinator::new(config, store)
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

/// Builds a coordinator with default settings at a fixed instant.
pub fn coordinator<S>(store: S) -> IdempotencyCoordinator
where
    S: PersistenceStore + 'static,
{
    coordinator_with_clock(
        IdempotencyConfig::default(),
        store,
        &ManualClock::at_timestamp(TEST_EPOCH),
    )
}

/// A COMPLETED record as the default settings would write it at `TEST_EPOCH`.
pub fn completed_record(key: &str, data: &str) -> DataRecord {
    DataRecord {
        key: key.to_string(),
        status: RecordStatus::Completed,
        expiry: TEST_EPOCH + 3600,
        in_progress_expiry: None,
        response_data: Some(data.to_string()),
        validation: None,
    }
}

/// An IN_PROGRESS record whose marker ends at `in_progress_expiry` (epoch ms).
pub fn in_progress_record(key: &str, in_progress_expiry: Option<i64>) -> DataRecord {
    DataRecord {
        key: key.to_string(),
        status: RecordStatus::InProgress,
        expiry: TEST_EPOCH + 3600,
        in_progress_expiry,
        response_data: None,
        validation: None,
    }
}

/// Installs a tracing subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The instant every [`coordinator`] starts at.
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// A typical order event.
pub fn order_event(order_id: &str) -> Value {
    json!({
        "order_id": order_id,
        "customer": {"id": "c-1", "tier": "gold"},
        "items": [{"sku": "A", "qty": 1}],
    })
}

// =============================================================================
// Proptest Strategies
// =============================================================================

/// Strategy for scalar JSON values.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for flat JSON objects with distinct field names.
pub fn json_object_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,8}", json_scalar_strategy(), 1..8)
        .prop_map(|fields| fields.into_iter().collect())
}

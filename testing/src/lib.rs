//! Testing utilities for lambda-idempotency
//!
//! This crate provides tools for testing idempotent handlers without a real
//! persistence backend.
//!
//! # Features
//!
//! - **MockPersistenceStore**: Scripted store responses with call recording
//! - **ManualClock**: Deterministic time for expiry scenarios
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lambda_idempotency::{IdempotencyConfig, IdempotencyCoordinator, IdempotencyError};
//! use lambda_idempotency_testing::{ManualClock, MockPersistenceStore};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let clock = ManualClock::at_timestamp(1_700_000_000);
//! let store = MockPersistenceStore::new();
//! let coordinator = IdempotencyCoordinator::new(IdempotencyConfig::default(), store.clone())
//!     .unwrap()
//!     .with_clock(Arc::new(clock.clone()));
//!
//! let key = coordinator.derive_key(&json!({"id": 1})).unwrap();
//! let run = || async { Ok::<_, IdempotencyError>(1u32) };
//! coordinator.execute(&key, run, Default::default()).await.unwrap();
//!
//! // One hour later the record has expired and the operation runs again.
//! clock.advance(Duration::from_secs(3600));
//! coordinator.execute(&key, run, Default::default()).await.unwrap();
//! assert_eq!(store.save_success_count(), 2);
//! # });
//! ```

pub mod mock_store;
pub mod time_control;

pub use mock_store::{MockPersistenceStore, StoreCall};
pub use time_control::ManualClock;

// Re-export the traits the mocks implement
pub use lambda_idempotency::{Clock, PersistenceStore};

//! # Idempotent execution for AWS Lambda handlers
//!
//! This crate makes a handler run at most once per logical request. Duplicate
//! deliveries of the same request, whether retries, redeliveries or concurrent
//! invocations, receive the response of the first successful run instead of
//! executing the side effects again.
//!
//! ## Overview
//!
//! Every request is reduced to an **idempotency key**: a BLAKE2 digest of the
//! request, or of a part of it picked by a JMESPath-style selector, prefixed with
//! a per-operation namespace. Before running the handler, the
//! [`IdempotencyCoordinator`] writes an IN_PROGRESS marker for that key with an
//! atomic conditional write. Exactly one caller wins the write; the others either
//! replay the stored response or are told the request is already in progress.
//!
//! ### Key Features
//!
//! - **Cross-process exclusion**: correctness rests only on the store's
//!   conditional write, so any number of processes can share a table.
//! - **Failure cleanup**: a handler error deletes the marker and is returned
//!   unchanged, so the next delivery runs the handler again.
//! - **Payload validation**: an optional fingerprint detects reuse of a key with
//!   a different payload.
//! - **Local cache**: completed records can be mirrored in an in-process LRU.
//! - **Pluggable storage**: DynamoDB (feature `dynamodb`, on by default) and an
//!   in-memory store ship with the crate; anything implementing
//!   [`PersistenceStore`] works.
//!
//! ## Getting Started
//!
//! ```rust
//! use lambda_idempotency::{IdempotencyConfig, IdempotencyCoordinator, IdempotencyError};
//! use lambda_idempotency::persistence::InMemoryStore;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderEvent {
//!     order_id: String,
//!     amount: u64,
//! }
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Receipt {
//!     order_id: String,
//!     charged: u64,
//! }
//!
//! # tokio_test::block_on(async {
//! let config = IdempotencyConfig::for_operation("charge")
//!     .with_event_key_selector("order_id")
//!     .with_payload_validation_selector("amount");
//! let coordinator = IdempotencyCoordinator::new(config, InMemoryStore::new())?;
//!
//! let charge = coordinator.wrap(|event: OrderEvent| async move {
//!     // Side effects go here.
//!     Ok::<_, IdempotencyError>(Receipt { order_id: event.order_id, charged: event.amount })
//! });
//!
//! let event = || OrderEvent { order_id: "42".to_string(), amount: 10 };
//! let first = charge.call(event(), None).await?;
//! let again = charge.call(event(), None).await?;
//! assert_eq!(first, again);
//! # Ok::<(), IdempotencyError>(())
//! # }).unwrap();
//! ```
//!
//! ## Errors
//!
//! The handler's own error type only needs `From<IdempotencyError>`. Handler
//! errors pass through untouched; coordination failures arrive as one of the
//! [`IdempotencyError`] variants.
//!
//! ## Disabling
//!
//! Setting `POWERTOOLS_IDEMPOTENCY_DISABLED=true` and building the configuration
//! with [`IdempotencyConfig::from_env`] turns every call into a plain handler call.

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod persistence;
pub mod record;
pub mod serdes;

// Re-export main types at crate root
pub use cache::LocalCache;
pub use clock::{Clock, SystemClock};
pub use config::IdempotencyConfig;
pub use coordinator::{
    ExecuteOptions, IdempotencyCoordinator, IdempotentHandler, MAX_INCONSISTENCY_RETRIES,
};
pub use error::{BoxError, IdempotencyError, StoreError};
pub use key::{HashAlgorithm, IdempotencyKey, KeyExtractor, Selector};
pub use persistence::{InMemoryStore, PersistenceStore, SharedPersistenceStore, StoreSettings};
pub use record::{DataRecord, RecordStatus};
pub use serdes::{JsonSerDes, SerDes, SerDesContext, SerDesError};

#[cfg(feature = "dynamodb")]
pub use persistence::{DynamoDbStore, DynamoDbStoreConfig};

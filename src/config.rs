//! Configuration for idempotent execution.
//!
//! [`IdempotencyConfig`] is a plain struct; build it with struct-update syntax
//! and the defaults:
//!
//! ```rust
//! use std::time::Duration;
//! use lambda_idempotency::IdempotencyConfig;
//!
//! let config = IdempotencyConfig {
//!     operation_name: "process_order".to_string(),
//!     event_key_selector: Some("order_id".to_string()),
//!     expires_after: Duration::from_secs(15 * 60),
//!     use_local_cache: true,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::IdempotencyError;
use crate::key::HashAlgorithm;

/// Environment variable that switches idempotency off entirely.
pub const DISABLED_ENV: &str = "POWERTOOLS_IDEMPOTENCY_DISABLED";

/// Environment variable carrying the Lambda function name.
pub const FUNCTION_NAME_ENV: &str = "AWS_LAMBDA_FUNCTION_NAME";

/// Default lifetime of a stored record.
pub const DEFAULT_EXPIRES_AFTER: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of an IN_PROGRESS marker when no deadline is known.
pub const DEFAULT_IN_PROGRESS_TTL: Duration = Duration::from_secs(60);

/// Default number of records kept in the local cache.
pub const DEFAULT_LOCAL_CACHE_MAX_ITEMS: usize = 256;

/// Settings for an [`IdempotencyCoordinator`](crate::IdempotencyCoordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// Name of the deployed function; prefixes the key namespace when set.
    pub function_name: Option<String>,
    /// Name of the protected operation. Two operations never share keys.
    pub operation_name: String,
    /// Selector for the part of the request that identifies it.
    /// `None` hashes the whole request.
    pub event_key_selector: Option<String>,
    /// Selector for the part of the request fingerprinted to detect key reuse
    /// with a different payload.
    pub payload_validation_selector: Option<String>,
    /// How long a record stays valid after each write.
    pub expires_after: Duration,
    /// Upper bound for an IN_PROGRESS marker; a shorter deadline hint wins.
    pub in_progress_ttl: Duration,
    /// Mirror completed records in an in-process LRU cache.
    pub use_local_cache: bool,
    /// Capacity of the local cache.
    pub local_cache_max_items: usize,
    /// Digest used for keys and fingerprints.
    pub hash_algorithm: HashAlgorithm,
    /// Run operations directly without any idempotency bookkeeping.
    pub disabled: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            function_name: None,
            operation_name: "handler".to_string(),
            event_key_selector: None,
            payload_validation_selector: None,
            expires_after: DEFAULT_EXPIRES_AFTER,
            in_progress_ttl: DEFAULT_IN_PROGRESS_TTL,
            use_local_cache: false,
            local_cache_max_items: DEFAULT_LOCAL_CACHE_MAX_ITEMS,
            hash_algorithm: HashAlgorithm::default(),
            disabled: false,
        }
    }
}

impl IdempotencyConfig {
    /// Creates a default configuration for the named operation.
    pub fn for_operation(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with the Lambda environment.
    ///
    /// Reads the function name from `AWS_LAMBDA_FUNCTION_NAME` and the kill switch
    /// from `POWERTOOLS_IDEMPOTENCY_DISABLED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            function_name: lookup(FUNCTION_NAME_ENV).filter(|name| !name.is_empty()),
            disabled: lookup(DISABLED_ENV)
                .map(|value| is_truthy(&value))
                .unwrap_or(false),
            ..Default::default()
        }
    }

    /// Sets the key selector.
    pub fn with_event_key_selector(mut self, selector: impl Into<String>) -> Self {
        self.event_key_selector = Some(selector.into());
        self
    }

    /// Sets the payload validation selector.
    pub fn with_payload_validation_selector(mut self, selector: impl Into<String>) -> Self {
        self.payload_validation_selector = Some(selector.into());
        self
    }

    /// Enables the local cache with the given capacity.
    pub fn with_local_cache(mut self, max_items: usize) -> Self {
        self.use_local_cache = true;
        self.local_cache_max_items = max_items;
        self
    }

    /// Namespace that prefixes every key derived under this configuration.
    pub fn namespace(&self) -> String {
        match &self.function_name {
            Some(function_name) => format!("{}.{}", function_name, self.operation_name),
            None => self.operation_name.clone(),
        }
    }

    /// Checks the settings for values the coordinator cannot work with.
    pub fn validate(&self) -> Result<(), IdempotencyError> {
        if self.operation_name.trim().is_empty() {
            return Err(IdempotencyError::configuration("operation_name must not be empty"));
        }
        if self.expires_after.as_secs() == 0 {
            return Err(IdempotencyError::configuration(
                "expires_after must be at least one second",
            ));
        }
        if self.in_progress_ttl.is_zero() {
            return Err(IdempotencyError::configuration("in_progress_ttl must be positive"));
        }
        if self.use_local_cache && self.local_cache_max_items == 0 {
            return Err(IdempotencyError::configuration(
                "local_cache_max_items must be positive when the local cache is enabled",
            ));
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| env.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IdempotencyConfig::default();
        assert_eq!(config.expires_after, Duration::from_secs(3600));
        assert_eq!(config.in_progress_ttl, Duration::from_secs(60));
        assert!(!config.use_local_cache);
        assert_eq!(config.local_cache_max_items, 256);
        assert!(!config.disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_namespace() {
        let config = IdempotencyConfig::for_operation("charge");
        assert_eq!(config.namespace(), "charge");

        let config = IdempotencyConfig {
            function_name: Some("payments".to_string()),
            ..IdempotencyConfig::for_operation("charge")
        };
        assert_eq!(config.namespace(), "payments.charge");
    }

    #[test]
    fn test_from_env_reads_function_name_and_kill_switch() {
        let config = IdempotencyConfig::from_lookup(lookup_from(&[
            (FUNCTION_NAME_ENV, "orders-fn"),
            (DISABLED_ENV, "TRUE"),
        ]));
        assert_eq!(config.function_name.as_deref(), Some("orders-fn"));
        assert!(config.disabled);
    }

    #[test]
    fn test_from_env_without_variables() {
        let config = IdempotencyConfig::from_lookup(lookup_from(&[(DISABLED_ENV, "0")]));
        assert_eq!(config.function_name, None);
        assert!(!config.disabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = IdempotencyConfig::for_operation("  ");
        assert!(config.validate().unwrap_err().is_configuration());

        let config = IdempotencyConfig {
            expires_after: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IdempotencyConfig {
            in_progress_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IdempotencyConfig::default().with_local_cache(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = IdempotencyConfig::for_operation("op")
            .with_event_key_selector("body.id")
            .with_payload_validation_selector("body.amount")
            .with_local_cache(8);
        assert_eq!(config.event_key_selector.as_deref(), Some("body.id"));
        assert_eq!(config.payload_validation_selector.as_deref(), Some("body.amount"));
        assert!(config.use_local_cache);
        assert_eq!(config.local_cache_max_items, 8);
    }
}

//! Idempotency key derivation.
//!
//! A key is `{namespace}#{digest}`. The digest is a BLAKE2 hash of the selected
//! request element, serialized canonically so that logically equal requests
//! hash identically regardless of field order.

pub mod selector;

use blake2::{Blake2b512, Blake2s256, Digest};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::IdempotencyConfig;
use crate::error::IdempotencyError;

pub use selector::Selector;

/// Digest used for keys and payload fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// BLAKE2b with a 512-bit digest (128 hex characters).
    #[default]
    Blake2b512,
    /// BLAKE2s with a 256-bit digest (64 hex characters).
    Blake2s256,
}

impl HashAlgorithm {
    /// Hashes `bytes` and returns the lowercase hex digest.
    pub fn hex_digest(&self, bytes: &[u8]) -> String {
        match self {
            Self::Blake2b512 => hex::encode(Blake2b512::digest(bytes)),
            Self::Blake2s256 => hex::encode(Blake2s256::digest(bytes)),
        }
    }
}

/// A derived idempotency key plus the optional payload fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// The full key, `{namespace}#{digest}`
    pub key: String,
    /// Digest of the validated part of the payload
    pub fingerprint: Option<String>,
}

impl IdempotencyKey {
    /// Creates a key without a fingerprint.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fingerprint: None,
        }
    }

    /// Attaches a payload fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Derives idempotency keys from requests.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    namespace: String,
    key_selector: Option<Selector>,
    validation_selector: Option<Selector>,
    hash_algorithm: HashAlgorithm,
}

impl KeyExtractor {
    /// Creates an extractor. Empty selectors are treated as absent.
    ///
    /// Fails with a Key error if either selector does not parse.
    pub fn new(
        namespace: impl Into<String>,
        key_selector: Option<&str>,
        validation_selector: Option<&str>,
        hash_algorithm: HashAlgorithm,
    ) -> Result<Self, IdempotencyError> {
        Ok(Self {
            namespace: namespace.into(),
            key_selector: parse_optional(key_selector)?,
            validation_selector: parse_optional(validation_selector)?,
            hash_algorithm,
        })
    }

    /// Builds the extractor described by a configuration.
    pub fn from_config(config: &IdempotencyConfig) -> Result<Self, IdempotencyError> {
        Self::new(
            config.namespace(),
            config.event_key_selector.as_deref(),
            config.payload_validation_selector.as_deref(),
            config.hash_algorithm,
        )
    }

    /// The namespace prefix of every derived key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derives the key and fingerprint for a JSON request.
    ///
    /// A request, or selected element, that is `null` (or a multi-select of only
    /// `null`s) cannot identify anything and is rejected with a Key error.
    pub fn derive(&self, request: &Value) -> Result<IdempotencyKey, IdempotencyError> {
        let selected = match &self.key_selector {
            Some(selector) => selector.select(request)?,
            None => request.clone(),
        };
        if is_missing(&selected) {
            return Err(IdempotencyError::key(match &self.key_selector {
                Some(selector) => format!("Selector '{}' found no data in the request", selector),
                None => "Cannot derive an idempotency key from a null request".to_string(),
            }));
        }

        let digest = self.digest(&selected)?;
        let mut key = IdempotencyKey::new(format!("{}#{}", self.namespace, digest));

        if let Some(selector) = &self.validation_selector {
            let payload = selector.select(request)?;
            key = key.with_fingerprint(self.digest(&payload)?);
        }
        Ok(key)
    }

    /// Derives the key for any serializable request.
    pub fn derive_from<R: Serialize + ?Sized>(
        &self,
        request: &R,
    ) -> Result<IdempotencyKey, IdempotencyError> {
        let value = serde_json::to_value(request).map_err(|e| {
            IdempotencyError::key(format!("Request could not be serialized: {}", e))
        })?;
        self.derive(&value)
    }

    fn digest(&self, value: &Value) -> Result<String, IdempotencyError> {
        let canonical = serde_json::to_vec(&canonicalize(value)).map_err(|e| {
            IdempotencyError::key(format!("Selected data could not be serialized: {}", e))
        })?;
        Ok(self.hash_algorithm.hex_digest(&canonical))
    }
}

fn parse_optional(selector: Option<&str>) -> Result<Option<Selector>, IdempotencyError> {
    match selector.map(str::trim) {
        None | Some("") => Ok(None),
        Some(source) => Selector::parse(source).map(Some),
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_null),
        _ => false,
    }
}

/// Rebuilds `value` with object keys in sorted order at every level.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (name, inner) in entries {
                sorted.insert(name.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor(key: Option<&str>, validation: Option<&str>) -> KeyExtractor {
        KeyExtractor::new("orders.handler", key, validation, HashAlgorithm::default()).unwrap()
    }

    #[test]
    fn test_key_format() {
        let key = extractor(None, None).derive(&json!({"id": 1})).unwrap();
        let (namespace, digest) = key.key.split_once('#').unwrap();
        assert_eq!(namespace, "orders.handler");
        assert_eq!(digest.len(), 128);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.fingerprint, None);
    }

    #[test]
    fn test_blake2s_digest_length() {
        let extractor =
            KeyExtractor::new("ns", None, None, HashAlgorithm::Blake2s256).unwrap();
        let key = extractor.derive(&json!("x")).unwrap();
        assert_eq!(key.key.len(), "ns#".len() + 64);
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let extractor = extractor(None, None);
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": {"x": 3, "y": 2}, "a": 1}"#).unwrap();
        // Test builds keep insertion order, so the two inputs really differ.
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(extractor.derive(&a).unwrap(), extractor.derive(&b).unwrap());
    }

    #[test]
    fn test_canonical_form_sorts_nested_fields() {
        let value: Value =
            serde_json::from_str(r#"{"b": {"y": 2, "x": [{"q": 1, "p": 0}]}, "a": 1}"#).unwrap();
        assert_eq!(
            canonicalize(&value).to_string(),
            r#"{"a":1,"b":{"x":[{"p":0,"q":1}],"y":2}}"#
        );
    }

    #[test]
    fn test_selector_ignores_other_fields() {
        let extractor = extractor(Some("order_id"), None);
        let first = extractor
            .derive(&json!({"order_id": "42", "request_id": "r-1"}))
            .unwrap();
        let second = extractor
            .derive(&json!({"order_id": "42", "request_id": "r-2"}))
            .unwrap();
        assert_eq!(first, second);

        let other = extractor.derive(&json!({"order_id": "43"})).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_namespaces_never_collide() {
        let event = json!({"id": 1});
        let a = KeyExtractor::new("fn.charge", None, None, HashAlgorithm::default())
            .unwrap()
            .derive(&event)
            .unwrap();
        let b = KeyExtractor::new("fn.refund", None, None, HashAlgorithm::default())
            .unwrap()
            .derive(&event)
            .unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_missing_selection_is_a_key_error() {
        let extractor = extractor(Some("order_id"), None);
        assert!(extractor.derive(&json!({"other": 1})).unwrap_err().is_key());
        assert!(extractor.derive(&json!({"order_id": null})).unwrap_err().is_key());

        let multi = extractor_multi();
        assert!(multi.derive(&json!({})).unwrap_err().is_key());
        assert!(multi.derive(&json!({"user": "u"})).is_ok());
    }

    fn extractor_multi() -> KeyExtractor {
        extractor(Some("[user, product]"), None)
    }

    #[test]
    fn test_null_request_is_rejected() {
        assert!(extractor(None, None).derive(&Value::Null).unwrap_err().is_key());
    }

    #[test]
    fn test_empty_selector_uses_whole_request() {
        let whole = extractor(None, None).derive(&json!({"a": 1})).unwrap();
        let empty = extractor(Some("  "), None).derive(&json!({"a": 1})).unwrap();
        assert_eq!(whole, empty);
    }

    #[test]
    fn test_invalid_selector_fails_fast() {
        let error = KeyExtractor::new("ns", Some("a..b"), None, HashAlgorithm::default())
            .unwrap_err();
        assert!(error.is_key());
    }

    #[test]
    fn test_fingerprint_is_independent_digest() {
        let extractor = extractor(Some("order_id"), Some("amount"));
        let first = extractor
            .derive(&json!({"order_id": "42", "amount": 10}))
            .unwrap();
        let second = extractor
            .derive(&json!({"order_id": "42", "amount": 11}))
            .unwrap();

        assert_eq!(first.key, second.key);
        assert!(first.fingerprint.is_some());
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_derive_from_serializable_request() {
        #[derive(Serialize)]
        struct Order {
            order_id: String,
        }
        let extractor = extractor(Some("order_id"), None);
        let typed = extractor
            .derive_from(&Order {
                order_id: "7".to_string(),
            })
            .unwrap();
        let raw = extractor.derive(&json!({"order_id": "7"})).unwrap();
        assert_eq!(typed, raw);
    }

    #[test]
    fn test_from_config_uses_namespace() {
        let config = IdempotencyConfig {
            function_name: Some("checkout".to_string()),
            ..IdempotencyConfig::for_operation("pay")
        };
        let extractor = KeyExtractor::from_config(&config).unwrap();
        assert_eq!(extractor.namespace(), "checkout.pay");
    }
}

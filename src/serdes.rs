//! Encoding of handler responses into stored records.
//!
//! A completed record keeps the handler's response as a string so late arrivals
//! can replay it. The [`SerDes`] trait decides how that string is produced;
//! [`JsonSerDes`] is the default.
//!
//! # Example
//!
//! ```rust
//! use lambda_idempotency::serdes::{SerDes, JsonSerDes, SerDesContext};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Receipt {
//!     total: u32,
//! }
//!
//! let serdes = JsonSerDes::<Receipt>::new();
//! let context = SerDesContext::new("checkout.handler#5f2c");
//!
//! let stored = serdes.serialize(&Receipt { total: 1 }, &context).unwrap();
//! let replayed = serdes.deserialize(&stored, &context).unwrap();
//! assert_eq!(replayed, Receipt { total: 1 });
//! ```

use std::fmt;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// A response could not be written to, or read back from, its record.
///
/// Both variants carry the idempotency key so a failed replay can be traced to
/// the stored record that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerDesError {
    /// The fresh response could not be encoded for storage.
    #[error("Cannot store response for idempotency key {key}: {reason}")]
    Encode {
        /// The key the response was to be stored under
        key: String,
        /// Why encoding failed
        reason: String,
    },

    /// The stored response could not be decoded for replay.
    #[error("Cannot replay stored response for idempotency key {key}: {reason}")]
    Decode {
        /// The key of the unreadable record
        key: String,
        /// Why decoding failed
        reason: String,
    },
}

impl SerDesError {
    /// An encoding failure for the record named by `context`.
    pub fn encode(context: &SerDesContext, reason: impl fmt::Display) -> Self {
        Self::Encode {
            key: context.idempotency_key.clone(),
            reason: reason.to_string(),
        }
    }

    /// A decoding failure for the record named by `context`.
    pub fn decode(context: &SerDesContext, reason: impl fmt::Display) -> Self {
        Self::Decode {
            key: context.idempotency_key.clone(),
            reason: reason.to_string(),
        }
    }

    /// The idempotency key of the affected record.
    pub fn key(&self) -> &str {
        match self {
            Self::Encode { key, .. } | Self::Decode { key, .. } => key,
        }
    }

    /// Returns true if a stored response failed to decode.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// Identifies the record a response is written to or replayed from.
#[derive(Debug, Clone)]
pub struct SerDesContext {
    /// The idempotency key the response is stored under
    pub idempotency_key: String,
}

impl SerDesContext {
    pub fn new(idempotency_key: impl Into<String>) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Converts a handler response to and from its stored representation.
///
/// Implementations must be `Send + Sync`; one instance may serve concurrent
/// executions.
///
/// ```rust
/// use lambda_idempotency::serdes::{SerDes, SerDesContext, SerDesError};
///
/// struct Passthrough;
///
/// impl SerDes<String> for Passthrough {
///     fn serialize(&self, value: &String, _context: &SerDesContext) -> Result<String, SerDesError> {
///         Ok(value.clone())
///     }
///
///     fn deserialize(&self, data: &str, _context: &SerDesContext) -> Result<String, SerDesError> {
///         Ok(data.to_string())
///     }
/// }
/// ```
pub trait SerDes<T>: Send + Sync {
    /// Serializes a response for storage.
    fn serialize(&self, value: &T, context: &SerDesContext) -> Result<String, SerDesError>;

    /// Restores a response from its stored form.
    fn deserialize(&self, data: &str, context: &SerDesContext) -> Result<T, SerDesError>;
}

/// Stores responses as JSON text. The default codec.
pub struct JsonSerDes<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerDes<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerDes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerDes<T> for JsonSerDes<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T, context: &SerDesContext) -> Result<String, SerDesError> {
        serde_json::to_string(value).map_err(|e| SerDesError::encode(context, e))
    }

    fn deserialize(&self, data: &str, context: &SerDesContext) -> Result<T, SerDesError> {
        serde_json::from_str(data).map_err(|e| SerDesError::decode(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Receipt {
        order_id: String,
        total: u32,
    }

    fn context() -> SerDesContext {
        SerDesContext::new("checkout.handler#0a1b")
    }

    #[test]
    fn test_json_serdes_serialize() {
        let serdes = JsonSerDes::<Receipt>::new();
        let data = Receipt {
            order_id: "o-1".to_string(),
            total: 42,
        };

        let result = serdes.serialize(&data, &context()).unwrap();
        assert!(result.contains("\"order_id\":\"o-1\""));
        assert!(result.contains("\"total\":42"));
    }

    #[test]
    fn test_json_serdes_replays_stored_response() {
        let serdes = JsonSerDes::<Receipt>::new();
        let stored = r#"{"order_id":"o-9","total":7}"#;

        let result = serdes.deserialize(stored, &context()).unwrap();
        assert_eq!(
            result,
            Receipt {
                order_id: "o-9".to_string(),
                total: 7
            }
        );
    }

    #[test]
    fn test_unreadable_record_names_its_key() {
        let serdes = JsonSerDes::<Receipt>::new();
        let error = serdes
            .deserialize(r#"{"order_id":"o-9"}"#, &context())
            .unwrap_err();

        assert!(error.is_decode());
        assert_eq!(error.key(), "checkout.handler#0a1b");
        let message = error.to_string();
        assert!(message.starts_with("Cannot replay stored response for idempotency key checkout.handler#0a1b"));
        assert!(message.contains("total"));
    }

    #[test]
    fn test_unencodable_response_names_its_key() {
        // JSON object keys must be strings.
        let serdes = JsonSerDes::<HashMap<(u8, u8), u32>>::new();
        let response = HashMap::from([((1, 2), 3)]);

        let error = serdes.serialize(&response, &context()).unwrap_err();
        assert!(!error.is_decode());
        assert!(matches!(&error, SerDesError::Encode { key, .. } if key == "checkout.handler#0a1b"));
    }

    #[test]
    fn test_json_serdes_unit_response() {
        let serdes = JsonSerDes::<()>::new();
        let stored = serdes.serialize(&(), &context()).unwrap();
        assert_eq!(stored, "null");
        serdes.deserialize(&stored, &context()).unwrap();
    }
}

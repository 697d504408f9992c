//! Serializer Module
//!
//! Injectable value codec used on every persisted path (storage backends,
//! dumps). Each cache owns its serializer; there is no process-wide default.

use std::fmt;

use serde_json::Value;

use crate::error::{CacheError, Result};

pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<String>;
    fn deserialize(&self, raw: &str) -> Result<Value>;
}

// == JSON Serializer ==
/// Compact JSON, the default codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        serde_json::from_str(raw).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

impl fmt::Debug for dyn Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Serializer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer_roundtrip() {
        let value = json!({"name": "ada", "tags": [1, 2], "ok": true});
        let raw = JsonSerializer.serialize(&value).unwrap();

        assert_eq!(JsonSerializer.deserialize(&raw).unwrap(), value);
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let result = JsonSerializer.deserialize("{oops");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}

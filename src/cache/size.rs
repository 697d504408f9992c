//! Size Estimator Module
//!
//! Approximates the in-memory footprint of a cached value. Strings count two
//! bytes per UTF-16 code unit, numbers eight and booleans four. Containers are
//! the sum of their parts, object keys included.

use serde_json::Value;

/// Bytes charged for a number.
pub const NUMBER_SIZE: usize = 8;
/// Bytes charged for a boolean.
pub const BOOL_SIZE: usize = 4;

// == Estimate Size ==
/// Types whose footprint can be estimated for memory-bounded eviction.
pub trait EstimateSize {
    /// Approximate size in bytes.
    fn estimate_size(&self) -> usize;
}

impl EstimateSize for str {
    fn estimate_size(&self) -> usize {
        self.encode_utf16().count() * 2
    }
}

impl EstimateSize for String {
    fn estimate_size(&self) -> usize {
        self.as_str().estimate_size()
    }
}

impl EstimateSize for Value {
    fn estimate_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => BOOL_SIZE,
            Value::Number(_) => NUMBER_SIZE,
            Value::String(s) => s.estimate_size(),
            Value::Array(items) => items.iter().map(EstimateSize::estimate_size).sum(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| k.estimate_size() + v.estimate_size())
                .sum(),
        }
    }
}

/// Estimates the footprint of a JSON value.
pub fn estimate_size(value: &Value) -> usize {
    value.estimate_size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(estimate_size(&Value::Null), 0);
        assert_eq!(estimate_size(&json!(true)), BOOL_SIZE);
        assert_eq!(estimate_size(&json!(42)), NUMBER_SIZE);
        assert_eq!(estimate_size(&json!(4.5)), NUMBER_SIZE);
    }

    #[test]
    fn test_string_counts_utf16_units() {
        assert_eq!(estimate_size(&json!("abc")), 6);
        // one astral-plane char is two UTF-16 units
        assert_eq!(estimate_size(&json!("😀")), 4);
    }

    #[test]
    fn test_nested_containers() {
        let value = json!({"ab": [1, true, "x"], "c": null});
        // "ab" = 4, [8 + 4 + 2] = 14, "c" = 2, null = 0
        assert_eq!(estimate_size(&value), 20);
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(estimate_size(&json!([])), 0);
        assert_eq!(estimate_size(&json!({})), 0);
    }
}

//! Typed preference values and the text decode path
//!
//! Preferences arrive over the RPC surface as untyped text and are decoded
//! with a fixed inference order: boolean literal, integer (narrowed to i32
//! when in range), decimal, JSON array of strings, raw string fallback.
//! Persisted form is the bare JSON value, so `true`, `42`, `3.14`,
//! `["a","b"]` and `"hello"` all round-trip.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single typed preference value.
///
/// Untagged so the persisted representation is the bare JSON value. Variant
/// order matters for deserialization: integers narrow to `Int` when they fit
/// in 32 bits, otherwise `Long`; any other number becomes `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    Str(String),
    StringSet(BTreeSet<String>),
}

impl PreferenceValue {
    /// Decode an untyped text value.
    ///
    /// Inference order: boolean literal -> integer (i32 if in range, else
    /// i64) -> decimal -> JSON array of strings -> raw string.
    pub fn decode(raw: &str) -> Self {
        let value = raw.trim();

        if value.eq_ignore_ascii_case("true") {
            return PreferenceValue::Bool(true);
        }
        if value.eq_ignore_ascii_case("false") {
            return PreferenceValue::Bool(false);
        }

        if let Ok(n) = value.parse::<i64>() {
            return if n >= i64::from(i32::MIN) && n <= i64::from(i32::MAX) {
                PreferenceValue::Int(n as i32)
            } else {
                PreferenceValue::Long(n)
            };
        }

        if let Ok(f) = value.parse::<f64>() {
            if f.is_finite() {
                return PreferenceValue::Float(f);
            }
        }

        if value.starts_with('[') {
            if let Ok(serde_json::Value::Array(items)) =
                serde_json::from_str::<serde_json::Value>(value)
            {
                let set: BTreeSet<String> = items
                    .into_iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect();
                return PreferenceValue::StringSet(set);
            }
        }

        PreferenceValue::Str(raw.to_string())
    }

    /// The bare JSON representation, as handed to a loaded source
    pub fn to_json(&self) -> serde_json::Value {
        // Serialization of these variants cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_boolean() {
        assert_eq!(PreferenceValue::decode("true"), PreferenceValue::Bool(true));
        assert_eq!(
            PreferenceValue::decode("False"),
            PreferenceValue::Bool(false)
        );
    }

    #[test]
    fn test_decode_int_narrowing() {
        assert_eq!(PreferenceValue::decode("42"), PreferenceValue::Int(42));
        assert_eq!(
            PreferenceValue::decode("-2147483648"),
            PreferenceValue::Int(i32::MIN)
        );
        assert_eq!(
            PreferenceValue::decode("9999999999"),
            PreferenceValue::Long(9_999_999_999)
        );
    }

    #[test]
    fn test_decode_decimal() {
        assert_eq!(PreferenceValue::decode("3.14"), PreferenceValue::Float(3.14));
    }

    #[test]
    fn test_decode_string_set() {
        let decoded = PreferenceValue::decode(r#"["a","b"]"#);
        let expected: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert_eq!(decoded, PreferenceValue::StringSet(expected));
    }

    #[test]
    fn test_decode_string_fallback() {
        assert_eq!(
            PreferenceValue::decode("hello"),
            PreferenceValue::Str("hello".to_string())
        );
        // Malformed arrays fall back to raw text
        assert_eq!(
            PreferenceValue::decode("[broken"),
            PreferenceValue::Str("[broken".to_string())
        );
    }

    #[test]
    fn test_persisted_form_is_bare_json() {
        assert_eq!(
            serde_json::to_string(&PreferenceValue::Bool(true)).unwrap(),
            "true"
        );
        assert_eq!(
            serde_json::to_string(&PreferenceValue::Int(7)).unwrap(),
            "7"
        );
        assert_eq!(
            serde_json::to_string(&PreferenceValue::Str("x".into())).unwrap(),
            "\"x\""
        );
    }

    #[test]
    fn test_roundtrip_narrows_numbers() {
        let long: PreferenceValue = serde_json::from_str("9999999999").unwrap();
        assert_eq!(long, PreferenceValue::Long(9_999_999_999));

        let int: PreferenceValue = serde_json::from_str("7").unwrap();
        assert_eq!(int, PreferenceValue::Int(7));

        let float: PreferenceValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(float, PreferenceValue::Float(2.5));
    }
}

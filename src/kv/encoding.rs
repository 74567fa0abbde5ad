/// Chain-safe value encoding.
///
/// The chain-backed store cannot accept values containing literal newline or
/// comma characters (both are wire separators for its client). Writers
/// therefore re-compact the JSON and Base64-encode it to ASCII; readers
/// decode and re-validate.
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{EngramError, EngramResult};

/// Encode a JSON string for chain submission.
///
/// The input is parsed (validation), re-serialized compactly (no whitespace,
/// no newlines), then Base64-encoded.
pub fn encode_value(json_string: &str) -> EngramResult<String> {
    let parsed: JsonValue = serde_json::from_str(json_string)?;
    let compact = serde_json::to_string(&parsed)?;
    Ok(BASE64.encode(compact.as_bytes()))
}

/// Decode a Base64 value read back from the chain into its JSON string.
pub fn decode_value(encoded: &str) -> EngramResult<String> {
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| EngramError::Storage(format!("base64 decode failed: {e}")))?;
    let json_string = String::from_utf8(bytes)
        .map_err(|e| EngramError::Storage(format!("decoded value is not utf-8: {e}")))?;
    // Round-trip validation: the stored value must still be JSON.
    let _: JsonValue = serde_json::from_str(&json_string)?;
    Ok(json_string)
}

/// Decode a batch of values, skipping tombstones and undecodable entries.
///
/// Empty values mark deleted keys and are omitted so they appear absent.
pub fn decode_values_batch(encoded: HashMap<String, String>) -> HashMap<String, String> {
    let mut decoded = HashMap::with_capacity(encoded.len());
    for (key, value) in encoded {
        if value.is_empty() {
            continue;
        }
        match decode_value(&value) {
            Ok(json) => {
                decoded.insert(key, json);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to decode chain value, skipping");
            }
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_values_are_wire_safe() {
        let json = "{\n  \"user_id\": \"u1\",\n  \"content\": \"a, b, c\"\n}";
        let encoded = encode_value(json).unwrap();
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains(','));
    }

    #[test]
    fn round_trip_returns_compact_json() {
        let json = r#"{"user_id": "123", "name": "test"}"#;
        let encoded = encode_value(json).unwrap();
        let decoded = decode_value(&encoded).unwrap();
        assert_eq!(decoded, r#"{"user_id":"123","name":"test"}"#);
    }

    #[test]
    fn non_json_input_is_rejected() {
        assert!(encode_value("not json").is_err());
    }

    #[test]
    fn batch_decode_skips_tombstones() {
        let mut batch = HashMap::new();
        batch.insert("a".to_string(), encode_value(r#"{"x":1}"#).unwrap());
        batch.insert("b".to_string(), String::new());
        batch.insert("c".to_string(), "!!not-base64!!".to_string());
        let decoded = decode_values_batch(batch);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["a"], r#"{"x":1}"#);
    }
}

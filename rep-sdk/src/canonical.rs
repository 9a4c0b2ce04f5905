//! Canonical JSON and SHA-256 hashing.
//!
//! The AEAD associated data and every signed handshake payload are
//! authenticated as raw bytes, so both ends must produce the exact same
//! serialization: keys sorted lexicographically, no whitespace, UTF-8.
//! Anything that is signed or used as AAD goes through here first.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize a value to its canonical JSON string.
///
/// Round-trips through `serde_json::Value` so key ordering is normalized at
/// every nesting level regardless of struct field order.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    canonical_value(&v)
}

/// Canonical JSON as UTF-8 bytes, ready for signing or AEAD AAD.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    Ok(to_canonical_json(value)?.into_bytes())
}

fn canonical_value(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);

            let mut out = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k)?);
                out.push(':');
                out.push_str(&canonical_value(v)?);
            }
            out.push('}');
            Ok(out)
        }
        serde_json::Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_value(v)?);
            }
            out.push(']');
            Ok(out)
        }
        _ => serde_json::to_string(value),
    }
}

/// Hex-encoded SHA-256 of raw bytes.
///
/// Also the document file-handle function: `file_handle = sha256_hex(plaintext)`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_top_level() {
        let v = json!({"session_id": 7, "msg_id": 3});
        assert_eq!(
            to_canonical_json(&v).unwrap(),
            r#"{"msg_id":3,"session_id":7}"#
        );
    }

    #[test]
    fn sorts_keys_in_nested_objects() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": [{"y": 0, "x": 1}]});
        assert_eq!(
            to_canonical_json(&v).unwrap(),
            r#"{"a":[{"x":1,"y":0}],"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn no_whitespace_anywhere() {
        let v = json!({"roles": ["managers", "auditors"], "n": 1});
        let c = to_canonical_json(&v).unwrap();
        assert!(!c.contains(' '));
    }

    #[test]
    fn escapes_strings_like_serde() {
        let v = json!({"name": "a \"quoted\" name"});
        assert_eq!(
            to_canonical_json(&v).unwrap(),
            r#"{"name":"a \"quoted\" name"}"#
        );
    }

    #[test]
    fn struct_field_order_is_irrelevant() {
        #[derive(serde::Serialize)]
        struct A {
            b: u32,
            a: u32,
        }
        assert_eq!(to_canonical_json(&A { b: 1, a: 2 }).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sha256_known_vector() {
        // The handle of the byte string "hello".
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}

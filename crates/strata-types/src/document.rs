//! Serde representation of opaque payload documents.
//!
//! `body`, `meta` and `status` are stored as raw bytes. When rendered to
//! JSON (CLI input/output), a payload that is itself valid JSON is embedded
//! as a JSON value, an empty payload becomes `null`, and anything else is
//! wrapped as `{"$bytes": "<hex>"}`. JSON payloads that would read back as
//! something else (a literal `null`, or an object shaped like the wrapper)
//! are wrapped too.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const BYTES_FIELD: &str = "$bytes";

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    if bytes.is_empty() {
        return serializer.serialize_none();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) if !is_ambiguous(&value) => value.serialize(serializer),
        _ => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(BYTES_FIELD.into(), Value::String(hex::encode(bytes)));
            Value::Object(wrapped).serialize(serializer)
        }
    }
}

fn is_ambiguous(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.len() == 1 && map.contains_key(BYTES_FIELD),
        _ => false,
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) if map.len() == 1 && map.contains_key(BYTES_FIELD) => {
            let encoded = map[BYTES_FIELD]
                .as_str()
                .ok_or_else(|| D::Error::custom("$bytes must be a hex string"))?;
            hex::decode(encoded).map_err(D::Error::custom)
        }
        Some(other) => serde_json::to_vec(&other).map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super", default)]
        doc: Vec<u8>,
    }

    #[test]
    fn json_payload_is_embedded() {
        let holder = Holder {
            doc: br#"{"title":"hello"}"#.to_vec(),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"doc":{"title":"hello"}}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn empty_payload_is_null() {
        let holder = Holder { doc: Vec::new() };
        assert_eq!(serde_json::to_string(&holder).unwrap(), r#"{"doc":null}"#);
        let back: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(back.doc.is_empty());
    }

    #[test]
    fn literal_null_payload_is_wrapped() {
        let holder = Holder {
            doc: b"null".to_vec(),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"doc":{"$bytes":"6e756c6c"}}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn wrapper_shaped_json_payload_is_wrapped() {
        let holder = Holder {
            doc: br#"{"$bytes":"ff"}"#.to_vec(),
        };
        let json = serde_json::to_string(&holder).unwrap();
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);

        let nested = Holder {
            doc: br#"{"$bytes":"ff","other":1}"#.to_vec(),
        };
        let json = serde_json::to_string(&nested).unwrap();
        assert_eq!(json, r#"{"doc":{"$bytes":"ff","other":1}}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nested);
    }

    #[test]
    fn binary_payload_is_hex_wrapped() {
        let holder = Holder {
            doc: vec![0xff, 0x00, 0x10],
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"doc":{"$bytes":"ff0010"}}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }
}

//! Records stored in collections.

use crate::error::{StoreError, StoreResult};
use crate::types::RecordKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields the application recomputes after loading (decrypted names,
/// attributes and keys). They are stripped before persisting except for
/// collections that retain them.
pub const DERIVED_FIELDS: [&str; 3] = ["name", "ar", "key"];

/// A single record: a JSON object.
///
/// Records are schemaless apart from the collection's key field, which must
/// be present (as a string or number) for the record to be written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns a codec error for any other JSON type.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StoreError::Codec(format!(
                "record must be a JSON object, got {other}"
            ))),
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Sets a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns a field if it is a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Extracts the primary key stored under `key_field`.
    ///
    /// Strings are used as-is and numbers are rendered in decimal; any
    /// other type (or an absent field) yields `None`.
    #[must_use]
    pub fn key(&self, key_field: &str) -> Option<RecordKey> {
        match self.0.get(key_field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Removes every derived field.
    pub fn strip_derived(&mut self) {
        for field in DERIVED_FIELDS {
            self.0.remove(field);
        }
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts the record into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Encodes the record as CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.0, &mut buf)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a record from CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a CBOR map.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        ciborium::from_reader::<Map<String, Value>, _>(bytes)
            .map(Self)
            .map_err(|e| StoreError::Codec(e.to_string()))
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> Record {
        Record::from_value(json!({
            "h": "n1",
            "p": "root",
            "name": "Holiday.jpg",
            "ar": { "n": "Holiday.jpg" },
            "key": "abc",
            "k": "owner:enc",
            "s": 2048
        }))
        .unwrap()
    }

    #[test]
    fn key_extraction() {
        let record = node();
        assert_eq!(record.key("h").as_deref(), Some("n1"));
        assert_eq!(record.key("u"), None);

        let numeric = Record::new().with("u", 17);
        assert_eq!(numeric.key("u").as_deref(), Some("17"));

        let nested = Record::new().with("u", json!({ "x": 1 }));
        assert_eq!(nested.key("u"), None);
    }

    #[test]
    fn strip_removes_only_derived_fields() {
        let mut record = node();
        record.strip_derived();
        assert!(!record.contains("name"));
        assert!(!record.contains("ar"));
        assert!(!record.contains("key"));
        assert_eq!(record.get_str("k"), Some("owner:enc"));
        assert_eq!(record.get("s"), Some(&json!(2048)));
    }

    #[test]
    fn cbor_encoding_preserves_contents() {
        let record = node();
        let bytes = record.encode().unwrap();
        assert_eq!(Record::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Record::decode(&[0xff, 0x00, 0x13]).is_err());
        // A CBOR integer is valid CBOR but not a record.
        assert!(Record::decode(&[0x05]).is_err());
    }

    #[test]
    fn from_value_requires_object() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!({})).is_ok());
    }
}

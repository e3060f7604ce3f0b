//! Result records.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::DriverError;
use crate::graph::value::Value;

/// One row of a result stream.
///
/// A record owns its values; the field names are shared by reference with
/// every other record of the same stream. Records outlive the cursor that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

/// Addresses a field by position or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for RecordKey<'_> {
    fn from(index: usize) -> Self {
        RecordKey::Index(index)
    }
}

impl<'a> From<&'a str> for RecordKey<'a> {
    fn from(name: &'a str) -> Self {
        RecordKey::Name(name)
    }
}

impl Record {
    /// Creates a record. `values` must line up with `keys`.
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self { keys, values }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The shared field-name vector.
    pub fn shared_keys(&self) -> &Arc<[String]> {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == name)
    }

    /// Looks a value up by position.
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Looks a value up by field name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Looks a value up by position or name.
    pub fn lookup<'k>(&self, key: impl Into<RecordKey<'k>>) -> Option<&Value> {
        match key.into() {
            RecordKey::Index(i) => self.value_at(i),
            RecordKey::Name(name) => self.value(name),
        }
    }

    /// Gets a value from the record by field name, deserializing to the requested type.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is not found or if deserialization fails.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let name: String = record.get("name")?;
    /// let count: i64 = record.get("count")?;
    /// ```
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, DriverError> {
        let value = self
            .value(name)
            .ok_or_else(|| DriverError::Client(format!("field not found: {}", name)))?;
        decode(name, value)
    }

    /// Gets a value from the record, returning `None` if the field is missing or null.
    ///
    /// Still returns an error if the field exists but deserialization fails.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, DriverError> {
        match self.value(name) {
            Some(v) if v.is_null() => Ok(None),
            Some(v) => decode(name, v).map(Some),
            None => Ok(None),
        }
    }

    /// Iterates over `(name, value)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Copies the record into a name → value map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Consumes the record and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, DriverError> {
    let json = value.to_json()?;
    serde_json::from_value(json)
        .map_err(|e| DriverError::Client(format!("failed to deserialize '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let keys: Arc<[String]> = vec!["name".to_string(), "age".to_string(), "nick".to_string()].into();
        Record::new(
            keys,
            vec![Value::from("Ada"), Value::from(36), Value::Null],
        )
    }

    #[test]
    fn test_lookup_by_index_and_name_agree() {
        let record = record();
        for (i, key) in record.keys().iter().enumerate() {
            assert_eq!(record.lookup(i), record.lookup(key.as_str()));
        }
    }

    #[test]
    fn test_get_typed() {
        let record = record();
        let name: String = record.get("name").unwrap();
        let age: i64 = record.get("age").unwrap();
        assert_eq!(name, "Ada");
        assert_eq!(age, 36);
    }

    #[test]
    fn test_get_missing_field() {
        let result: Result<String, _> = record().get("missing");
        assert!(result.is_err());
    }

    #[test]
    fn test_get_wrong_type() {
        let result: Result<i64, _> = record().get("name");
        assert!(result.is_err());
    }

    #[test]
    fn test_get_opt_null_and_missing() {
        let record = record();
        let nick: Option<String> = record.get_opt("nick").unwrap();
        let other: Option<String> = record.get_opt("other").unwrap();
        assert_eq!(nick, None);
        assert_eq!(other, None);
    }

    #[test]
    fn test_records_share_keys() {
        let keys: Arc<[String]> = vec!["x".to_string()].into();
        let a = Record::new(keys.clone(), vec![Value::from(1)]);
        let b = Record::new(keys.clone(), vec![Value::from(2)]);
        assert!(Arc::ptr_eq(a.shared_keys(), b.shared_keys()));
    }

    #[test]
    fn test_to_map() {
        let map = record().to_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["age"], Value::from(36));
    }
}

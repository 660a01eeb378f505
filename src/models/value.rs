//! Bind values and cell values.
//!
//! A single [`Value`] type is used both for statement parameters and for the
//! decoded cells of a fetched row, so that foreign-key cells can be looked up
//! directly against primary-key cells during row stitching.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A parameter or column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Render as a JSON value (bytes become base64 strings).
    pub fn to_json(&self) -> serde_json::Value {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
            Self::Text(v) => serde_json::Value::String(v.clone()),
            Self::Bytes(v) => serde_json::Value::String(STANDARD.encode(v)),
            Self::Json(v) => v.clone(),
        }
    }
}

// Floats compare by bit pattern so values can key identity maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
            Self::Json(v) => v.to_string().hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Primary-key value of a stitched instance.
///
/// Single-column keys hold one component; composite keys hold their components
/// in declaration order and compare as ordered tuples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    /// A key is null when it is empty or any component is NULL.
    pub fn is_null(&self) -> bool {
        self.0.is_empty() || self.0.iter().any(Value::is_null)
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Int(42).type_name(), "int");
        assert_eq!(Value::from("hello").type_name(), "text");
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_value_hash_eq_distinguishes_types() {
        let mut set = HashSet::new();
        set.insert(Value::Int(1));
        set.insert(Value::Float(1.0));
        set.insert(Value::Text("1".into()));
        set.insert(Value::Int(1));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_primary_key_nullness() {
        assert!(PrimaryKey::single(Value::Null).is_null());
        assert!(PrimaryKey::new(vec![Value::Int(1), Value::Null]).is_null());
        assert!(PrimaryKey::new(vec![]).is_null());
        assert!(!PrimaryKey::new(vec![Value::Int(1), Value::Int(2)]).is_null());
    }

    #[test]
    fn test_composite_keys_compare_as_ordered_tuples() {
        let a = PrimaryKey::new(vec![Value::Int(1), Value::Int(2)]);
        let b = PrimaryKey::new(vec![Value::Int(2), Value::Int(1)]);
        assert_ne!(a, b);
        assert_eq!(a, PrimaryKey::new(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Int(5).to_json(), serde_json::json!(5));
        assert_eq!(
            Value::Bytes(b"hello world".to_vec()).to_json(),
            serde_json::json!("aGVsbG8gd29ybGQ=")
        );
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
    }
}

//! Literal values.

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// A literal value appearing in an expression or stored on an object.
///
/// Object references are carried as [`Value::Object`]; tuples appear as the
/// result of composite constraint subject expressions such as `(.a, .b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Reference to a stored object.
    Object(ObjectId),
    /// Fixed-size tuple of values.
    Tuple(Vec<Value>),
}

impl Value {
    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::String(_) => "str",
            Value::Object(_) => "object",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an object reference.
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::Object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::String("a".into()).as_str(), Some("a"));
        assert_eq!(Value::Int(1).as_str(), None);

        let id = ObjectId::from_u128(5);
        assert_eq!(Value::Object(id).as_object(), Some(id));
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = 42i32.into();
        assert_eq!(v, Value::Int(42));

        let v: Value = "hello".into();
        assert_eq!(v.type_name(), "str");
    }

    #[test]
    fn test_tuple_equality() {
        let a = Value::Tuple(vec![Value::from("x"), Value::from(1i64)]);
        let b = Value::Tuple(vec![Value::from("x"), Value::from(1i64)]);
        let c = Value::Tuple(vec![Value::from("x"), Value::from(2i64)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

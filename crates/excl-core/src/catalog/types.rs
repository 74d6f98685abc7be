//! Core type definitions for the catalog.

use excl_proto::TypeId;
use serde::{Deserialize, Serialize};

/// Scalar data types a property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    Str,
    /// UUID (128-bit identifier).
    Uuid,
}

impl ScalarType {
    /// Qualified name, as used in casts such as `<std::str>{}`.
    pub fn qualified_name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "std::bool",
            ScalarType::Int64 => "std::int64",
            ScalarType::Float64 => "std::float64",
            ScalarType::Str => "std::str",
            ScalarType::Uuid => "std::uuid",
        }
    }

    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int64 | ScalarType::Float64)
    }
}

/// How many values a pointer holds per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one value.
    #[default]
    Single,
    /// Any number of values.
    Multi,
}

impl Cardinality {
    /// Check if this is a single cardinality.
    pub fn is_single(&self) -> bool {
        matches!(self, Cardinality::Single)
    }
}

/// Target of a resolved pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerTarget {
    /// A property holding scalar values.
    Scalar(ScalarType),
    /// A link to objects of a type.
    Object(TypeId),
}

impl PointerTarget {
    /// Check if this target is an object type (the pointer is a link).
    pub fn is_object(&self) -> bool {
        matches!(self, PointerTarget::Object(_))
    }
}

/// Target of a declared pointer, before type names are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetDecl {
    /// A property holding scalar values.
    Scalar(ScalarType),
    /// A link to objects of the named type.
    Object(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_names() {
        assert_eq!(ScalarType::Str.qualified_name(), "std::str");
        assert!(ScalarType::Int64.is_numeric());
        assert!(!ScalarType::Uuid.is_numeric());
    }

    #[test]
    fn test_cardinality_default() {
        assert!(Cardinality::default().is_single());
        assert!(!Cardinality::Multi.is_single());
    }
}

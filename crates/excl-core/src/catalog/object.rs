//! Object type definitions.

use super::pointer::{ConstraintDecl, PointerDecl};
use excl_proto::{ConstraintId, PointerId, TypeId};
use serde::{Deserialize, Serialize};

/// A resolved object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeDef {
    /// Type id.
    pub id: TypeId,
    /// Qualified name (`module::Name`).
    pub name: String,
    /// Direct bases, in declaration order.
    pub bases: Vec<TypeId>,
    /// Direct children, in creation order. Includes expression aliases.
    pub children: Vec<TypeId>,
    /// All pointers, inherited ones first.
    pub pointers: Vec<PointerId>,
    /// Object-level constraints, inherited ones first.
    pub constraints: Vec<ConstraintId>,
    /// Abstract types cannot be inserted into.
    pub is_abstract: bool,
    /// Expression aliases are views over another type.
    pub is_view: bool,
    /// Type this one was derived from, for expression aliases.
    pub derived_from: Option<TypeId>,
}

/// Declaration of an object type for the [`SchemaBuilder`](super::SchemaBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Qualified name.
    pub name: String,
    /// Names of the direct bases. Empty means the universal base type.
    pub bases: Vec<String>,
    /// Pointers declared (or overridden) on this type.
    pub pointers: Vec<PointerDecl>,
    /// Object-level constraints declared on this type.
    pub constraints: Vec<ConstraintDecl>,
    /// Abstract types cannot be inserted into.
    pub is_abstract: bool,
}

impl TypeDecl {
    /// Declare an object type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
            pointers: Vec::new(),
            constraints: Vec::new(),
            is_abstract: false,
        }
    }

    /// Declare an abstract object type.
    pub fn abstract_type(name: impl Into<String>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    /// Add a base type.
    pub fn extending(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    /// Add a pointer.
    pub fn with_pointer(mut self, pointer: PointerDecl) -> Self {
        self.pointers.push(pointer);
        self
    }

    /// Add multiple pointers.
    pub fn with_pointers(mut self, pointers: impl IntoIterator<Item = PointerDecl>) -> Self {
        self.pointers.extend(pointers);
        self
    }

    /// Add an object-level constraint.
    pub fn with_constraint(mut self, constraint: ConstraintDecl) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;
    use excl_proto::Expr;

    #[test]
    fn test_type_decl_builder() {
        let decl = TypeDecl::new("default::Person")
            .extending("default::Named")
            .with_pointer(PointerDecl::property("first", ScalarType::Str))
            .with_pointer(PointerDecl::property("last", ScalarType::Str))
            .with_constraint(ConstraintDecl::new("std::exclusive").on(Expr::Tuple(vec![
                Expr::partial("first"),
                Expr::partial("last"),
            ])));

        assert_eq!(decl.bases, vec!["default::Named".to_string()]);
        assert_eq!(decl.pointers.len(), 2);
        assert_eq!(decl.constraints.len(), 1);
        assert!(!decl.is_abstract);
    }

    #[test]
    fn test_abstract_decl() {
        let decl = TypeDecl::abstract_type("default::Named");
        assert!(decl.is_abstract);
        assert!(decl.bases.is_empty());
    }
}

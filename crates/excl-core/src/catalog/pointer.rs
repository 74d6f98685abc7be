//! Pointer (property and link) definitions.

use super::types::{Cardinality, PointerTarget, ScalarType, TargetDecl};
use excl_proto::{ConstraintId, Expr, PointerId, TypeId};
use serde::{Deserialize, Serialize};

/// A resolved pointer on an object type.
///
/// Every object type owns its own pointer records, including the ones it
/// inherits; an inherited pointer lists the pointers it was inherited from
/// in `bases`. Pointers of expression aliases are copies of the aliased
/// type's pointers and point back at them through `derived_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerDef {
    /// Pointer id.
    pub id: PointerId,
    /// Short name (unique within the source type).
    pub name: String,
    /// Type the pointer is defined on.
    pub source: TypeId,
    /// Target type.
    pub target: PointerTarget,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Defining expression for computed pointers.
    pub expr: Option<Expr>,
    /// Constraints whose subject is this pointer.
    pub constraints: Vec<ConstraintId>,
    /// Pointers this one was inherited from.
    pub bases: Vec<PointerId>,
    /// Pointer this one is an unmodified derivation of.
    pub derived_from: Option<PointerId>,
}

impl PointerDef {
    /// Check if this pointer is computed.
    pub fn is_computed(&self) -> bool {
        self.expr.is_some()
    }

    /// Check if this pointer is a link.
    pub fn is_link(&self) -> bool {
        self.target.is_object()
    }

    /// Check if this pointer holds at most one value.
    pub fn is_single(&self) -> bool {
        self.cardinality.is_single()
    }
}

/// Declaration of a pointer in a [`TypeDecl`](super::TypeDecl).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerDecl {
    /// Short name.
    pub name: String,
    /// Target type.
    pub target: TargetDecl,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Defining expression for computed pointers.
    pub expr: Option<Expr>,
    /// Constraints declared on the pointer.
    pub constraints: Vec<ConstraintDecl>,
}

/// Declaration of a concrete constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDecl {
    /// Name of the abstract constraint this one instantiates.
    pub name: String,
    /// Subject expression over `__subject__`.
    pub subject_expr: Option<Expr>,
    /// Delegated constraints are enforced only on descendants.
    pub delegated: bool,
}

impl ConstraintDecl {
    /// Declare an instance of the named abstract constraint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_expr: None,
            delegated: false,
        }
    }

    /// Set the subject expression.
    pub fn on(mut self, subject_expr: Expr) -> Self {
        self.subject_expr = Some(subject_expr);
        self
    }

    /// Mark the constraint as delegated.
    pub fn delegated(mut self) -> Self {
        self.delegated = true;
        self
    }
}

impl PointerDecl {
    /// Declare a single property.
    pub fn property(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            target: TargetDecl::Scalar(scalar),
            cardinality: Cardinality::Single,
            expr: None,
            constraints: Vec::new(),
        }
    }

    /// Declare a single link.
    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: TargetDecl::Object(target.into()),
            cardinality: Cardinality::Single,
            expr: None,
            constraints: Vec::new(),
        }
    }

    /// Make the pointer multi.
    pub fn multi(mut self) -> Self {
        self.cardinality = Cardinality::Multi;
        self
    }

    /// Make the pointer computed.
    pub fn computed(mut self, expr: Expr) -> Self {
        self.expr = Some(expr);
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: ConstraintDecl) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Add a plain `std::exclusive` constraint.
    pub fn exclusive(self) -> Self {
        self.with_constraint(ConstraintDecl::new(super::EXCLUSIVE_CONSTRAINT))
    }
}

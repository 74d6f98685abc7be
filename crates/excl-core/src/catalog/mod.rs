//! Schema catalog.
//!
//! The catalog holds object types, their pointers and constraints, and
//! answers the hierarchy questions the conflict compiler asks: ancestors,
//! descendants, nearest common ancestors and constraint ownership.

mod builder;
mod constraint;
mod object;
mod pointer;
mod schema;
mod types;

pub use builder::SchemaBuilder;
pub use constraint::{derive_constraint_id, ConstraintDef, ConstraintSubject};
pub use object::{ObjectTypeDef, TypeDecl};
pub use pointer::{ConstraintDecl, PointerDecl, PointerDef};
pub use schema::Schema;
pub use types::{Cardinality, PointerTarget, ScalarType, TargetDecl};

/// Universal base type every object type extends.
pub const BASE_OBJECT: &str = "std::BaseObject";

/// Identity pointer defined on [`BASE_OBJECT`].
pub const ID_POINTER: &str = "id";

/// Root abstract exclusivity constraint.
pub const EXCLUSIVE_CONSTRAINT: &str = "std::exclusive";

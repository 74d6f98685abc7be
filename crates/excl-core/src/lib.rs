//! Schema catalog and reference evaluator for the exclusivity-conflict
//! compiler.
//!
//! - [`catalog`] - object types, pointers, constraints and the builder that
//!   materialises inheritance
//! - [`query`] - in-memory object store and evaluator for compiled sets

pub mod catalog;
pub mod error;
pub mod query;

pub use catalog::{
    Cardinality, ConstraintDecl, ConstraintDef, ConstraintSubject, ObjectTypeDef, PointerDecl,
    PointerDef, PointerTarget, ScalarType, Schema, SchemaBuilder, TargetDecl, TypeDecl,
    BASE_OBJECT, EXCLUSIVE_CONSTRAINT, ID_POINTER,
};
pub use error::Error;
pub use query::{Evaluator, ObjectStore, StoredObject};

/// Re-export shared vocabulary.
pub use excl_proto as proto;

//! Shared vocabulary for the exclusivity-conflict compiler.
//!
//! This crate holds the types every other crate in the workspace agrees on:
//!
//! - [`ids`] - stable identifiers for schema objects and statements
//! - [`value`] - literal values appearing in expressions
//! - [`span`] - source positions used for diagnostics
//! - [`ql`] - the surface expression tree and path-substitution utilities
//! - [`ir`] - compiled sets, mutating statements and on-conflict clauses
//! - [`error`] - encoding errors
//!
//! All IR types derive `serde` traits so that compiled clauses can be handed
//! to the code generation stage as JSON:
//!
//! ```ignore
//! use excl_proto::ir::OnConflictClause;
//!
//! let json = excl_proto::to_json(&clause)?;
//! let decoded: OnConflictClause = excl_proto::from_json(&json)?;
//! ```

pub mod error;
pub mod ids;
pub mod ir;
pub mod ql;
pub mod span;
pub mod value;

pub use error::Error;

pub use ids::{ConstraintId, ObjectId, PointerId, StmtId, TypeId};
pub use ir::{
    ConstraintRef, IrSet, MutatingStmt, OnConflictClause, PathId, PathRoot, PointerRef,
    SetExpr, SetScope, ShapeElement, StmtKind, SubjectSet,
};
pub use ql::{BinOp, Expr, Path, PathStart};
pub use span::{Span, Spanned};
pub use value::Value;

/// Encode any IR value as JSON.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?)
}

/// Decode an IR value from JSON.
pub fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, Error> {
    Ok(serde_json::from_str(json)?)
}

//! Core error types.

use excl_proto::{ConstraintId, PointerId, TypeId};
use thiserror::Error;

/// Schema and evaluation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No object type with that name.
    #[error("unknown object type '{0}'")]
    UnknownType(String),

    /// Type id outside the schema snapshot.
    #[error("unknown object type id {0:?}")]
    UnknownTypeId(TypeId),

    /// Pointer id outside the schema snapshot.
    #[error("unknown pointer id {0:?}")]
    UnknownPointerId(PointerId),

    /// No constraint with that name.
    #[error("unknown constraint '{0}'")]
    UnknownConstraint(String),

    /// Constraint id not in the schema snapshot.
    #[error("unknown constraint {0}")]
    UnknownConstraintId(ConstraintId),

    /// Schema declarations are inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Evaluation error in the reference evaluator.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] excl_proto::Error),
}

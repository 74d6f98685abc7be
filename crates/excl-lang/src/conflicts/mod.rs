//! Exclusivity conflict compilation.
//!
//! Turns the exclusive constraints that apply to an insert or update into
//! detached selects of the existing objects the write would collide with.
//!
//! - [`partition`] - group enforcing constraints by declaring type
//! - [`anchors`] - bind each needed pointer to a value of the written row
//! - [`conditions`] - build the collision predicate from the bindings
//! - [`select`] - assemble and compile the per-type selects
//! - [`clause`] - `UNLESS CONFLICT [ON ... [ELSE ...]]`
//! - [`inheritance`] - checks between statements of one query writing
//!   related types

pub mod anchors;
pub mod clause;
pub mod conditions;
pub mod inheritance;
pub mod partition;
pub mod select;

pub use anchors::{AnchorMap, AnchorRequest};
pub use clause::{compile_unless_conflict, compile_unless_conflict_on, exclusive_pointer_constraints};
pub use inheritance::compile_inheritance_conflict_checks;
pub use partition::{constraint_matters, partition, ConstraintBucket, PointerConstraints};
pub use select::{compile_conflict_select, ConflictRequest, ConflictSelect};

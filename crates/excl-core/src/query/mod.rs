//! Reference evaluation of compiled sets.
//!
//! This is not a query engine. It runs the selects the conflict compiler
//! produces against a small in-memory store so their runtime meaning can
//! be checked.

mod evaluator;
mod store;

pub use evaluator::Evaluator;
pub use store::{ObjectStore, StoredObject};

//! Conflict compiler configuration.

use std::collections::BTreeSet;

use excl_core::Schema;
use excl_proto::Span;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileErrorKind, LangError};

/// Default name of the identity pointer.
pub const DEFAULT_IDENTITY_POINTER: &str = "id";

/// Default universal base type.
pub const DEFAULT_BASE_OBJECT: &str = "std::BaseObject";

/// Default root exclusivity constraint.
pub const DEFAULT_EXCLUSIVE_CONSTRAINT: &str = "std::exclusive";

/// Default separator between an anchor's pointer name and its counter.
pub const DEFAULT_ANCHOR_SEPARATOR: &str = "~";

/// Functions the reference expression compiler treats as volatile.
pub const DEFAULT_VOLATILE_FUNCTIONS: &[&str] = &[
    "random",
    "uuid_generate_v1mc",
    "uuid_generate_v4",
    "datetime_current",
    "std::random",
    "std::uuid_generate_v1mc",
    "std::uuid_generate_v4",
    "std::datetime_current",
];

/// Conflict compiler configuration.
///
/// The names refer into the schema being compiled against. A schema from
/// `SchemaBuilder` always roots its hierarchy at `std::BaseObject` with an
/// exclusive `id` pointer, so overriding `base_object` or
/// `identity_pointer` only makes sense for schemas built some other way;
/// [`validate`](Self::validate) rejects names the schema does not define.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Pointer carrying object identity; never checked for conflicts and
    /// used for self-exclusion.
    pub identity_pointer: String,

    /// Universal base type; never considered a shared ancestor.
    pub base_object: String,

    /// Abstract constraint whose descendants are exclusivity constraints.
    pub exclusive_constraint: String,

    /// Functions whose results may differ between evaluations.
    pub volatile_functions: BTreeSet<String>,

    /// Separator used when naming fresh anchors (`name~3`).
    pub anchor_separator: String,
}

impl ConflictConfig {
    /// Create a configuration with the default names.
    pub fn new() -> Self {
        Self {
            identity_pointer: DEFAULT_IDENTITY_POINTER.to_string(),
            base_object: DEFAULT_BASE_OBJECT.to_string(),
            exclusive_constraint: DEFAULT_EXCLUSIVE_CONSTRAINT.to_string(),
            volatile_functions: DEFAULT_VOLATILE_FUNCTIONS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            anchor_separator: DEFAULT_ANCHOR_SEPARATOR.to_string(),
        }
    }

    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, LangError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the identity pointer name.
    pub fn with_identity_pointer(mut self, name: impl Into<String>) -> Self {
        self.identity_pointer = name.into();
        self
    }

    /// Set the universal base type.
    pub fn with_base_object(mut self, name: impl Into<String>) -> Self {
        self.base_object = name.into();
        self
    }

    /// Set the root exclusivity constraint.
    pub fn with_exclusive_constraint(mut self, name: impl Into<String>) -> Self {
        self.exclusive_constraint = name.into();
        self
    }

    /// Mark an additional function as volatile.
    pub fn with_volatile_function(mut self, name: impl Into<String>) -> Self {
        self.volatile_functions.insert(name.into());
        self
    }

    /// Set the anchor separator.
    pub fn with_anchor_separator(mut self, separator: impl Into<String>) -> Self {
        self.anchor_separator = separator.into();
        self
    }

    /// Check that the base object, its identity pointer and the root
    /// exclusivity constraint exist in `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<(), CompileError> {
        let base = schema.get_type_by_name(&self.base_object)?;
        if schema.getptr(base.id, &self.identity_pointer)?.is_none() {
            return Err(CompileError::new(
                format!(
                    "identity pointer '{}' is not defined on '{}'",
                    self.identity_pointer, self.base_object
                ),
                Span::default(),
                CompileErrorKind::Schema,
            ));
        }
        schema.get_constraint_by_name(&self.exclusive_constraint)?;
        Ok(())
    }

    /// Check whether a function is volatile.
    pub fn is_volatile_function(&self, name: &str) -> bool {
        self.volatile_functions.contains(name)
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self::new()
    }
}

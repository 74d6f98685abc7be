//! Constraint definitions.

use excl_proto::{ConstraintId, Expr, PointerId, TypeId};
use serde::{Deserialize, Serialize};

/// What a concrete constraint is declared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSubject {
    /// A property or link.
    Pointer(PointerId),
    /// An object type.
    ObjectType(TypeId),
}

/// A resolved constraint.
///
/// Abstract constraints (`std::exclusive` and user-defined ones extending
/// it) are `generic` and have no subject. Every concrete constraint a type
/// inherits is materialised as its own record with `owned = false` and the
/// constraint it was inherited from at the head of `ancestors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Stable id.
    pub id: ConstraintId,
    /// Name of the abstract constraint (for generic constraints, its own name).
    pub name: String,
    /// Subject, absent for generic constraints.
    pub subject: Option<ConstraintSubject>,
    /// Subject expression over `__subject__` (pointer constraints) or over
    /// partial paths (object constraints).
    pub subject_expr: Option<Expr>,
    /// Abstract constraint.
    pub generic: bool,
    /// Enforced only on descendants of the declaring type.
    pub delegated: bool,
    /// Declared directly on the subject rather than purely inherited.
    pub owned: bool,
    /// Ancestor constraints, nearest first, ending with the generic chain.
    pub ancestors: Vec<ConstraintId>,
}

impl ConstraintDef {
    /// Check if this constraint is declared on a pointer.
    pub fn is_pointer_constraint(&self) -> bool {
        matches!(self.subject, Some(ConstraintSubject::Pointer(_)))
    }

    /// Check if this constraint is declared on an object type.
    pub fn is_object_constraint(&self) -> bool {
        matches!(self.subject, Some(ConstraintSubject::ObjectType(_)))
    }
}

/// Derive the stable id of a constraint from its qualified subject path.
///
/// The key has the shape `<subject path>@<constraint name>[(<subject expr>)]`,
/// e.g. `default::User.email@std::exclusive(str_lower(__subject__))`.
pub fn derive_constraint_id(
    subject_path: &str,
    name: &str,
    subject_expr: Option<&Expr>,
) -> ConstraintId {
    let key = match subject_expr {
        Some(expr) => format!("{}@{}({})", subject_path, name, expr),
        None => format!("{}@{}", subject_path, name),
    };
    let hash = blake3::hash(key.as_bytes());
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash.as_bytes()[..16]);
    ConstraintId(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_id_is_stable() {
        let a = derive_constraint_id("default::User.name", "std::exclusive", None);
        let b = derive_constraint_id("default::User.name", "std::exclusive", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constraint_id_depends_on_subject() {
        let plain = derive_constraint_id("default::User.name", "std::exclusive", None);
        let other = derive_constraint_id("default::Admin.name", "std::exclusive", None);
        let lowered = derive_constraint_id(
            "default::User.name",
            "std::exclusive",
            Some(&Expr::call("str_lower", vec![Expr::subject()])),
        );

        assert_ne!(plain, other);
        assert_ne!(plain, lowered);
    }
}

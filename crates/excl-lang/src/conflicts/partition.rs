//! Constraint partitioning.
//!
//! A constraint inherited down a hierarchy exists once per type that has
//! it. Only one level actually enforces it; [`constraint_matters`] picks
//! that level and [`partition`] groups the enforcing constraints by the
//! object type that owns their subject, so that one conflict query can be
//! generated per declaring type.

use excl_core::{ConstraintDef, ConstraintSubject, Schema};
use excl_proto::{ConstraintId, PointerId, TypeId};
use tracing::debug;

use crate::error::CompileError;

/// Exclusive constraints of one pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerConstraints {
    /// Short name of the pointer.
    pub name: String,
    /// The pointer the constraints are declared on.
    pub pointer: PointerId,
    /// The constraints.
    pub constraints: Vec<ConstraintId>,
}

impl PointerConstraints {
    /// Create an entry.
    pub fn new(name: impl Into<String>, pointer: PointerId, constraints: Vec<ConstraintId>) -> Self {
        Self {
            name: name.into(),
            pointer,
            constraints,
        }
    }
}

/// Constraints enforced at one declaring type.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintBucket {
    /// Type owning the constraints' subjects.
    pub owner: TypeId,
    /// Pointer-level constraints, by pointer.
    pub pointers: Vec<PointerConstraints>,
    /// Object-level constraints.
    pub objects: Vec<ConstraintId>,
}

impl ConstraintBucket {
    /// Create an empty bucket.
    pub fn new(owner: TypeId) -> Self {
        Self {
            owner,
            pointers: Vec::new(),
            objects: Vec::new(),
        }
    }

    fn add_pointer_constraint(&mut self, name: &str, pointer: PointerId, id: ConstraintId) {
        let entry = match self.pointers.iter().position(|p| p.name == name) {
            Some(i) => &mut self.pointers[i],
            None => {
                self.pointers
                    .push(PointerConstraints::new(name, pointer, Vec::new()));
                let last = self.pointers.len() - 1;
                &mut self.pointers[last]
            }
        };
        if !entry.constraints.contains(&id) {
            entry.constraints.push(id);
        }
    }

    fn add_object_constraint(&mut self, id: ConstraintId) {
        if !self.objects.contains(&id) {
            self.objects.push(id);
        }
    }
}

/// Check whether a constraint is enforced at its own level.
///
/// It is when it is concrete, not delegated, and either declared right
/// there or inherited only from delegated or abstract constraints.
pub fn constraint_matters(schema: &Schema, constraint: &ConstraintDef) -> Result<bool, CompileError> {
    if constraint.generic || constraint.delegated {
        return Ok(false);
    }
    if constraint.owned {
        return Ok(true);
    }
    for ancestor in &constraint.ancestors {
        let ancestor = schema.get_constraint(*ancestor)?;
        if !(ancestor.delegated || ancestor.generic) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The constraint followed by its ancestors, nearest first.
fn with_ancestors<'s>(
    schema: &'s Schema,
    id: ConstraintId,
) -> Result<Vec<&'s ConstraintDef>, CompileError> {
    let constraint = schema.get_constraint(id)?;
    let mut chain = vec![constraint];
    for ancestor in &constraint.ancestors {
        chain.push(schema.get_constraint(*ancestor)?);
    }
    Ok(chain)
}

/// Group the enforcing constraints by declaring type.
///
/// Buckets come out in first-seen order.
pub fn partition(
    schema: &Schema,
    pointer_constraints: &[PointerConstraints],
    object_constraints: &[ConstraintId],
) -> Result<Vec<ConstraintBucket>, CompileError> {
    let mut buckets: Vec<ConstraintBucket> = Vec::new();

    for entry in pointer_constraints {
        for id in &entry.constraints {
            for constraint in with_ancestors(schema, *id)? {
                if !constraint_matters(schema, constraint)? {
                    continue;
                }
                let Some(ConstraintSubject::Pointer(ptr)) = constraint.subject else {
                    return Err(CompileError::internal(format!(
                        "constraint on '{}' is not a pointer constraint",
                        entry.name
                    )));
                };
                let owner = schema.get_pointer(ptr)?.source;
                bucket_for(&mut buckets, owner).add_pointer_constraint(&entry.name, ptr, constraint.id);
            }
        }
    }

    for id in object_constraints {
        for constraint in with_ancestors(schema, *id)? {
            if !constraint_matters(schema, constraint)? {
                continue;
            }
            let owner = schema.constraint_subject_owner(constraint.id)?;
            bucket_for(&mut buckets, owner).add_object_constraint(constraint.id);
        }
    }

    for bucket in &buckets {
        debug!(
            owner = %schema.type_name(bucket.owner).unwrap_or("?"),
            pointers = bucket.pointers.len(),
            objects = bucket.objects.len(),
            "partitioned constraints"
        );
    }
    Ok(buckets)
}

fn bucket_for(buckets: &mut Vec<ConstraintBucket>, owner: TypeId) -> &mut ConstraintBucket {
    match buckets.iter().position(|b| b.owner == owner) {
        Some(i) => &mut buckets[i],
        None => {
            buckets.push(ConstraintBucket::new(owner));
            let last = buckets.len() - 1;
            &mut buckets[last]
        }
    }
}

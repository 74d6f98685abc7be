//! Schema snapshot and hierarchy queries.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use excl_proto::ql::subst::find_subject_ptrs;
use excl_proto::{ConstraintId, PointerId, TypeId};
use serde::{Deserialize, Serialize};

use super::{ConstraintDef, ConstraintSubject, ObjectTypeDef, PointerDef};
use crate::error::Error;

/// An immutable snapshot of the schema.
///
/// Types and pointers are stored densely by id; lookups by name and by
/// constraint id go through indexes rebuilt on construction and after
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Schema version.
    pub version: u64,
    types: Vec<ObjectTypeDef>,
    pointers: Vec<PointerDef>,
    constraints: Vec<ConstraintDef>,
    #[serde(skip)]
    type_index: HashMap<String, TypeId>,
    #[serde(skip)]
    constraint_index: HashMap<ConstraintId, usize>,
    #[serde(skip)]
    generic_index: HashMap<String, ConstraintId>,
}

impl Schema {
    pub(crate) fn from_parts(
        version: u64,
        types: Vec<ObjectTypeDef>,
        pointers: Vec<PointerDef>,
        constraints: Vec<ConstraintDef>,
    ) -> Self {
        let mut schema = Self {
            version,
            types,
            pointers,
            constraints,
            type_index: HashMap::new(),
            constraint_index: HashMap::new(),
            generic_index: HashMap::new(),
        };
        schema.reindex();
        schema
    }

    fn reindex(&mut self) {
        self.type_index = self
            .types
            .iter()
            .map(|t| (t.name.clone(), t.id))
            .collect();
        self.constraint_index = self
            .constraints
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
        self.generic_index = self
            .constraints
            .iter()
            .filter(|c| c.generic)
            .map(|c| (c.name.clone(), c.id))
            .collect();
    }

    /// Serialize the schema to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut schema: Schema = serde_json::from_str(json)?;
        schema.reindex();
        Ok(schema)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get an object type by id.
    pub fn get_type(&self, id: TypeId) -> Result<&ObjectTypeDef, Error> {
        self.types
            .get(id.0 as usize)
            .ok_or(Error::UnknownTypeId(id))
    }

    /// Get an object type by qualified name.
    pub fn get_type_by_name(&self, name: &str) -> Result<&ObjectTypeDef, Error> {
        self.type_index
            .get(name)
            .and_then(|id| self.types.get(id.0 as usize))
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Qualified name of a type.
    pub fn type_name(&self, id: TypeId) -> Result<&str, Error> {
        Ok(self.get_type(id)?.name.as_str())
    }

    /// Iterate over all object types.
    pub fn types(&self) -> impl Iterator<Item = &ObjectTypeDef> {
        self.types.iter()
    }

    /// Get a pointer by id.
    pub fn get_pointer(&self, id: PointerId) -> Result<&PointerDef, Error> {
        self.pointers
            .get(id.0 as usize)
            .ok_or(Error::UnknownPointerId(id))
    }

    /// Get a constraint by id.
    pub fn get_constraint(&self, id: ConstraintId) -> Result<&ConstraintDef, Error> {
        self.constraint_index
            .get(&id)
            .and_then(|i| self.constraints.get(*i))
            .ok_or(Error::UnknownConstraintId(id))
    }

    /// Get an abstract constraint by name.
    pub fn get_constraint_by_name(&self, name: &str) -> Result<&ConstraintDef, Error> {
        self.generic_index
            .get(name)
            .ok_or_else(|| Error::UnknownConstraint(name.to_string()))
            .and_then(|id| self.get_constraint(*id))
    }

    /// All pointers of a type, inherited ones included.
    pub fn type_pointers(&self, id: TypeId) -> Result<Vec<&PointerDef>, Error> {
        self.get_type(id)?
            .pointers
            .iter()
            .map(|p| self.get_pointer(*p))
            .collect()
    }

    /// Look up a pointer of a type by short name.
    pub fn getptr(&self, id: TypeId, name: &str) -> Result<Option<&PointerDef>, Error> {
        for ptr in self.get_type(id)?.pointers.iter() {
            let ptr = self.get_pointer(*ptr)?;
            if ptr.name == name {
                return Ok(Some(ptr));
            }
        }
        Ok(None)
    }

    /// Object-level constraints of a type.
    pub fn type_constraints(&self, id: TypeId) -> Result<Vec<&ConstraintDef>, Error> {
        self.get_type(id)?
            .constraints
            .iter()
            .map(|c| self.get_constraint(*c))
            .collect()
    }

    /// Constraints declared on a pointer.
    pub fn pointer_constraints(&self, id: PointerId) -> Result<Vec<&ConstraintDef>, Error> {
        self.get_pointer(id)?
            .constraints
            .iter()
            .map(|c| self.get_constraint(*c))
            .collect()
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// All ancestors of a type, nearest first, without duplicates.
    pub fn ancestors(&self, id: TypeId) -> Result<Vec<TypeId>, Error> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TypeId> = self.get_type(id)?.bases.iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            result.push(next);
            queue.extend(self.get_type(next)?.bases.iter().copied());
        }
        Ok(result)
    }

    /// Direct children of a type.
    pub fn children(&self, id: TypeId) -> Result<&[TypeId], Error> {
        Ok(&self.get_type(id)?.children)
    }

    /// All descendants of a type, breadth first, without duplicates.
    pub fn descendants(&self, id: TypeId) -> Result<Vec<TypeId>, Error> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TypeId> = self.children(id)?.iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            result.push(next);
            queue.extend(self.children(next)?.iter().copied());
        }
        Ok(result)
    }

    /// Check whether `id` is `ancestor` or one of its descendants.
    pub fn is_subtype(&self, id: TypeId, ancestor: TypeId) -> Result<bool, Error> {
        if id == ancestor {
            return Ok(true);
        }
        Ok(self.ancestors(id)?.contains(&ancestor))
    }

    /// The most specific types that every type in `ids` is (or inherits
    /// from).
    ///
    /// Results follow the ancestor order of the first type.
    pub fn nearest_common_ancestors(&self, ids: &[TypeId]) -> Result<Vec<TypeId>, Error> {
        let Some((first, rest)) = ids.split_first() else {
            return Ok(Vec::new());
        };

        let mut common = vec![*first];
        common.extend(self.ancestors(*first)?);
        for id in rest {
            let mut lineage: HashSet<TypeId> = self.ancestors(*id)?.into_iter().collect();
            lineage.insert(*id);
            common.retain(|t| lineage.contains(t));
        }

        let mut nearest = Vec::new();
        for candidate in &common {
            let mut shadowed = false;
            for other in &common {
                if other != candidate && self.is_subtype(*other, *candidate)? {
                    shadowed = true;
                    break;
                }
            }
            if !shadowed {
                nearest.push(*candidate);
            }
        }
        Ok(nearest)
    }

    /// Follow `derived_from` links of a pointer to the pointer it was
    /// derived from.
    pub fn pointer_nearest_non_derived_parent(&self, id: PointerId) -> Result<PointerId, Error> {
        let mut current = self.get_pointer(id)?;
        while let Some(parent) = current.derived_from {
            current = self.get_pointer(parent)?;
        }
        Ok(current.id)
    }

    /// Follow `derived_from` links of a type to the type it was derived from.
    pub fn type_nearest_non_derived_parent(&self, id: TypeId) -> Result<TypeId, Error> {
        let mut current = self.get_type(id)?;
        while let Some(parent) = current.derived_from {
            current = self.get_type(parent)?;
        }
        Ok(current.id)
    }

    /// Check whether a type is an expression alias.
    pub fn is_view(&self, id: TypeId) -> Result<bool, Error> {
        Ok(self.get_type(id)?.is_view)
    }

    // =========================================================================
    // Constraints
    // =========================================================================

    /// Check whether a constraint is (or extends) the named abstract
    /// constraint.
    pub fn constraint_issubclass(&self, id: ConstraintId, name: &str) -> Result<bool, Error> {
        let constraint = self.get_constraint(id)?;
        if constraint.name == name {
            return Ok(true);
        }
        for ancestor in &constraint.ancestors {
            if self.get_constraint(*ancestor)?.name == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The object type owning a constraint's subject.
    pub fn constraint_subject_owner(&self, id: ConstraintId) -> Result<TypeId, Error> {
        let constraint = self.get_constraint(id)?;
        match constraint.subject {
            Some(ConstraintSubject::Pointer(ptr)) => Ok(self.get_pointer(ptr)?.source),
            Some(ConstraintSubject::ObjectType(ty)) => Ok(ty),
            None => Err(Error::InvalidSchema(format!(
                "constraint '{}' has no subject",
                constraint.name
            ))),
        }
    }

    /// Object-level constraints of a type extending `name` whose subject
    /// expression reads exactly the pointers in `ptrs`.
    pub fn object_exclusive_constraints(
        &self,
        id: TypeId,
        ptrs: &BTreeSet<String>,
        name: &str,
    ) -> Result<Vec<&ConstraintDef>, Error> {
        let mut matching = Vec::new();
        for constraint in self.type_constraints(id)? {
            if !self.constraint_issubclass(constraint.id, name)? {
                continue;
            }
            let Some(expr) = &constraint.subject_expr else {
                continue;
            };
            if &find_subject_ptrs(expr) == ptrs {
                matching.push(constraint);
            }
        }
        Ok(matching)
    }
}

//! Schema builder with inheritance materialisation.
//!
//! Declarations name their bases; the builder orders them topologically,
//! gives every type its own copy of each inherited pointer and constraint,
//! and records where each copy was inherited from. The conflict compiler
//! relies on those records to decide which ancestor a constraint is
//! enforced at.

use std::collections::{HashMap, HashSet};

use excl_proto::{ConstraintId, Expr, PointerId, TypeId};
use tracing::debug;

use super::constraint::derive_constraint_id;
use super::{
    ConstraintDecl, ConstraintDef, ConstraintSubject, ObjectTypeDef, PointerDecl, PointerDef,
    PointerTarget, ScalarType, Schema, TargetDecl, TypeDecl, BASE_OBJECT, EXCLUSIVE_CONSTRAINT,
    ID_POINTER,
};
use crate::error::Error;

/// Builds a [`Schema`] from type declarations.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    version: u64,
    abstract_constraints: Vec<(String, Option<String>)>,
    types: Vec<TypeDecl>,
    aliases: Vec<(String, String)>,
}

impl SchemaBuilder {
    /// Create a builder for the given schema version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Declare an abstract constraint, optionally extending another one.
    pub fn with_abstract_constraint(
        mut self,
        name: impl Into<String>,
        base: Option<&str>,
    ) -> Self {
        self.abstract_constraints
            .push((name.into(), base.map(str::to_string)));
        self
    }

    /// Declare an object type.
    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    /// Declare an expression alias over an existing type.
    pub fn with_alias(mut self, name: impl Into<String>, of: impl Into<String>) -> Self {
        self.aliases.push((name.into(), of.into()));
        self
    }

    /// Resolve all declarations into a schema snapshot.
    pub fn build(self) -> Result<Schema, Error> {
        let mut m = Materializer::default();

        m.add_generic(EXCLUSIVE_CONSTRAINT, None)?;
        for (name, base) in &self.abstract_constraints {
            m.add_generic(name, base.as_deref())?;
        }

        let root = TypeDecl::abstract_type(BASE_OBJECT)
            .with_pointer(PointerDecl::property(ID_POINTER, ScalarType::Uuid).exclusive());
        let ordered = order_declarations(root, self.types)?;

        for (i, decl) in ordered.iter().enumerate() {
            m.type_ids.insert(decl.name.clone(), TypeId(i as u32));
        }
        for decl in &ordered {
            m.materialize_type(decl)?;
        }
        for (name, of) in &self.aliases {
            m.materialize_alias(name, of)?;
        }

        Ok(Schema::from_parts(
            self.version,
            m.types,
            m.pointers,
            m.constraints,
        ))
    }
}

/// Order declarations so that every type comes after its bases.
fn order_declarations(root: TypeDecl, decls: Vec<TypeDecl>) -> Result<Vec<TypeDecl>, Error> {
    let mut names: HashSet<String> = HashSet::new();
    names.insert(root.name.clone());
    for decl in &decls {
        if !names.insert(decl.name.clone()) {
            return Err(Error::InvalidSchema(format!(
                "object type '{}' is declared more than once",
                decl.name
            )));
        }
    }
    for decl in &decls {
        if let Some(base) = decl.bases.iter().find(|b| !names.contains(*b)) {
            return Err(Error::UnknownType(base.clone()));
        }
    }

    let mut placed: HashSet<String> = HashSet::new();
    placed.insert(root.name.clone());
    let mut ordered = vec![root];
    let mut pending = decls;

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|decl| {
            if decl.bases.iter().all(|b| placed.contains(b)) {
                placed.insert(decl.name.clone());
                ordered.push(decl.clone());
                false
            } else {
                true
            }
        });
        if pending.len() == before {
            let names: Vec<_> = pending.iter().map(|d| d.name.as_str()).collect();
            return Err(Error::InvalidSchema(format!(
                "inheritance cycle among {}",
                names.join(", ")
            )));
        }
    }
    Ok(ordered)
}

#[derive(Default)]
struct Materializer {
    types: Vec<ObjectTypeDef>,
    pointers: Vec<PointerDef>,
    constraints: Vec<ConstraintDef>,
    constraint_index: HashMap<ConstraintId, usize>,
    generics: HashMap<String, ConstraintId>,
    type_ids: HashMap<String, TypeId>,
}

impl Materializer {
    fn type_def(&self, id: TypeId) -> Result<&ObjectTypeDef, Error> {
        self.types
            .get(id.0 as usize)
            .ok_or(Error::UnknownTypeId(id))
    }

    fn type_def_mut(&mut self, id: TypeId) -> Result<&mut ObjectTypeDef, Error> {
        self.types
            .get_mut(id.0 as usize)
            .ok_or(Error::UnknownTypeId(id))
    }

    fn pointer(&self, id: PointerId) -> Result<&PointerDef, Error> {
        self.pointers
            .get(id.0 as usize)
            .ok_or(Error::UnknownPointerId(id))
    }

    fn constraint(&self, id: ConstraintId) -> Result<&ConstraintDef, Error> {
        self.constraint_index
            .get(&id)
            .and_then(|i| self.constraints.get(*i))
            .ok_or(Error::UnknownConstraintId(id))
    }

    fn type_id(&self, name: &str) -> Result<TypeId, Error> {
        self.type_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    fn push_constraint(&mut self, def: ConstraintDef) -> Result<ConstraintId, Error> {
        if self.constraint_index.contains_key(&def.id) {
            return Err(Error::InvalidSchema(format!(
                "constraint '{}' is declared more than once on the same subject",
                def.name
            )));
        }
        let id = def.id;
        self.constraint_index.insert(id, self.constraints.len());
        self.constraints.push(def);
        Ok(id)
    }

    fn add_generic(&mut self, name: &str, base: Option<&str>) -> Result<(), Error> {
        if self.generics.contains_key(name) {
            return Err(Error::InvalidSchema(format!(
                "abstract constraint '{}' is declared more than once",
                name
            )));
        }
        let ancestors = match base {
            Some(base) => self.generic_chain(base)?,
            None => Vec::new(),
        };
        let id = self.push_constraint(ConstraintDef {
            id: derive_constraint_id(name, name, None),
            name: name.to_string(),
            subject: None,
            subject_expr: None,
            generic: true,
            delegated: false,
            owned: true,
            ancestors,
        })?;
        self.generics.insert(name.to_string(), id);
        Ok(())
    }

    /// The named abstract constraint followed by its ancestors.
    fn generic_chain(&self, name: &str) -> Result<Vec<ConstraintId>, Error> {
        let id = self
            .generics
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownConstraint(name.to_string()))?;
        let mut chain = vec![id];
        chain.extend(self.constraint(id)?.ancestors.iter().copied());
        Ok(chain)
    }

    /// Ancestors of a constraint inherited from `bases`: concrete ancestors
    /// in first-seen order, then the generic chain.
    fn merge_ancestors(
        &self,
        name: &str,
        bases: &[ConstraintId],
    ) -> Result<Vec<ConstraintId>, Error> {
        let mut merged = Vec::new();
        for base in bases {
            let lineage = std::iter::once(*base).chain(self.constraint(*base)?.ancestors.clone());
            for id in lineage {
                if self.constraint(id)?.generic || merged.contains(&id) {
                    continue;
                }
                merged.push(id);
            }
        }
        merged.extend(self.generic_chain(name)?);
        Ok(merged)
    }

    fn materialize_constraints(
        &mut self,
        subject_path: &str,
        subject: ConstraintSubject,
        inherited: &[ConstraintId],
        declared: &[ConstraintDecl],
    ) -> Result<Vec<ConstraintId>, Error> {
        let mut groups: Vec<(String, Option<Expr>, Vec<ConstraintId>)> = Vec::new();
        for id in inherited {
            let c = self.constraint(*id)?;
            match groups
                .iter_mut()
                .find(|(name, expr, _)| *name == c.name && *expr == c.subject_expr)
            {
                Some((_, _, bases)) => bases.push(*id),
                None => groups.push((c.name.clone(), c.subject_expr.clone(), vec![*id])),
            }
        }

        let mut consumed = vec![false; declared.len()];
        let mut result = Vec::new();

        for (name, subject_expr, bases) in groups {
            let own = (0..declared.len()).find(|&i| {
                !consumed[i]
                    && declared[i].name == name
                    && declared[i].subject_expr == subject_expr
            });
            let (owned, delegated) = match own {
                Some(i) => {
                    consumed[i] = true;
                    (true, declared[i].delegated)
                }
                None => (false, false),
            };
            let ancestors = self.merge_ancestors(&name, &bases)?;
            let id = derive_constraint_id(subject_path, &name, subject_expr.as_ref());
            result.push(self.push_constraint(ConstraintDef {
                id,
                name,
                subject: Some(subject),
                subject_expr,
                generic: false,
                delegated,
                owned,
                ancestors,
            })?);
        }

        for (decl, _) in declared.iter().zip(consumed).filter(|(_, used)| !used) {
            let ancestors = self.generic_chain(&decl.name)?;
            let id = derive_constraint_id(subject_path, &decl.name, decl.subject_expr.as_ref());
            result.push(self.push_constraint(ConstraintDef {
                id,
                name: decl.name.clone(),
                subject: Some(subject),
                subject_expr: decl.subject_expr.clone(),
                generic: false,
                delegated: decl.delegated,
                owned: true,
                ancestors,
            })?);
        }

        Ok(result)
    }

    fn resolve_target(&self, target: &TargetDecl) -> Result<PointerTarget, Error> {
        match target {
            TargetDecl::Scalar(scalar) => Ok(PointerTarget::Scalar(*scalar)),
            TargetDecl::Object(name) => Ok(PointerTarget::Object(self.type_id(name)?)),
        }
    }

    fn add_pointer(
        &mut self,
        source: TypeId,
        type_name: &str,
        name: &str,
        own: Option<&PointerDecl>,
        bases: &[PointerId],
    ) -> Result<PointerId, Error> {
        let id = PointerId(self.pointers.len() as u32);

        let (target, cardinality, expr, declared) = match own {
            Some(decl) => (
                self.resolve_target(&decl.target)?,
                decl.cardinality,
                decl.expr.clone(),
                decl.constraints.as_slice(),
            ),
            None => {
                let first = bases.first().ok_or_else(|| {
                    Error::InvalidSchema(format!("pointer '{}' has no declaration", name))
                })?;
                let base = self.pointer(*first)?;
                (base.target, base.cardinality, base.expr.clone(), &[][..])
            }
        };

        let mut inherited = Vec::new();
        for base in bases {
            inherited.extend(self.pointer(*base)?.constraints.iter().copied());
        }
        let subject_path = format!("{}.{}", type_name, name);
        let constraints = self.materialize_constraints(
            &subject_path,
            ConstraintSubject::Pointer(id),
            &inherited,
            declared,
        )?;

        self.pointers.push(PointerDef {
            id,
            name: name.to_string(),
            source,
            target,
            cardinality,
            expr,
            constraints,
            bases: bases.to_vec(),
            derived_from: None,
        });
        Ok(id)
    }

    fn materialize_type(&mut self, decl: &TypeDecl) -> Result<(), Error> {
        let id = self.type_id(&decl.name)?;
        let bases: Vec<TypeId> = if decl.name == BASE_OBJECT {
            Vec::new()
        } else if decl.bases.is_empty() {
            vec![self.type_id(BASE_OBJECT)?]
        } else {
            decl.bases
                .iter()
                .map(|b| self.type_id(b))
                .collect::<Result<_, _>>()?
        };

        let mut inherited: Vec<(String, Vec<PointerId>)> = Vec::new();
        for base in &bases {
            for ptr in &self.type_def(*base)?.pointers {
                let name = &self.pointer(*ptr)?.name;
                match inherited.iter_mut().find(|(n, _)| n == name) {
                    Some((_, ids)) => ids.push(*ptr),
                    None => inherited.push((name.clone(), vec![*ptr])),
                }
            }
        }

        let mut pointers = Vec::new();
        for (name, base_ptrs) in &inherited {
            let own = decl.pointers.iter().find(|p| &p.name == name);
            pointers.push(self.add_pointer(id, &decl.name, name, own, base_ptrs)?);
        }
        for own in &decl.pointers {
            if inherited.iter().any(|(n, _)| *n == own.name) {
                continue;
            }
            if decl.pointers.iter().filter(|p| p.name == own.name).count() > 1 {
                return Err(Error::InvalidSchema(format!(
                    "pointer '{}' is declared more than once on '{}'",
                    own.name, decl.name
                )));
            }
            pointers.push(self.add_pointer(id, &decl.name, &own.name, Some(own), &[])?);
        }

        let mut inherited_constraints = Vec::new();
        for base in &bases {
            inherited_constraints.extend(self.type_def(*base)?.constraints.iter().copied());
        }
        let constraints = self.materialize_constraints(
            &decl.name,
            ConstraintSubject::ObjectType(id),
            &inherited_constraints,
            &decl.constraints,
        )?;

        debug!(
            object_type = %decl.name,
            pointers = pointers.len(),
            constraints = constraints.len(),
            "materialised object type"
        );

        self.types.push(ObjectTypeDef {
            id,
            name: decl.name.clone(),
            bases: bases.clone(),
            children: Vec::new(),
            pointers,
            constraints,
            is_abstract: decl.is_abstract,
            is_view: false,
            derived_from: None,
        });
        for base in bases {
            self.type_def_mut(base)?.children.push(id);
        }
        Ok(())
    }

    fn materialize_alias(&mut self, name: &str, of: &str) -> Result<(), Error> {
        if self.type_ids.contains_key(name) {
            return Err(Error::InvalidSchema(format!(
                "object type '{}' is declared more than once",
                name
            )));
        }
        let target = self.type_id(of)?;
        let id = TypeId(self.types.len() as u32);
        self.type_ids.insert(name.to_string(), id);

        let target_pointers = self.type_def(target)?.pointers.clone();
        let mut pointers = Vec::new();
        for base_id in target_pointers {
            let base = self.pointer(base_id)?.clone();
            let ptr = PointerId(self.pointers.len() as u32);
            self.pointers.push(PointerDef {
                id: ptr,
                name: base.name,
                source: id,
                target: base.target,
                cardinality: base.cardinality,
                expr: base.expr,
                constraints: Vec::new(),
                bases: Vec::new(),
                derived_from: Some(base_id),
            });
            pointers.push(ptr);
        }

        debug!(alias = %name, of = %of, "materialised expression alias");

        self.types.push(ObjectTypeDef {
            id,
            name: name.to_string(),
            bases: vec![target],
            children: Vec::new(),
            pointers,
            constraints: Vec::new(),
            is_abstract: false,
            is_view: true,
            derived_from: Some(target),
        });
        self.type_def_mut(target)?.children.push(id);
        Ok(())
    }
}

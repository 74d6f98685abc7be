//! In-memory object store.

use std::collections::BTreeMap;

use excl_proto::{ObjectId, TypeId, Value};

use crate::catalog::{Schema, ID_POINTER};
use crate::error::Error;

/// A stored object: its concrete type and the values of its stored pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Object id.
    pub id: ObjectId,
    /// Concrete type.
    pub type_id: TypeId,
    /// Pointer values keyed by pointer name. Missing pointers are empty.
    pub values: BTreeMap<String, Vec<Value>>,
}

impl StoredObject {
    /// Values stored for a pointer.
    pub fn get(&self, name: &str) -> &[Value] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Objects that already exist when a conflict select runs.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectId, StoredObject>,
    next_id: u128,
}

impl ObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new object of the named type.
    ///
    /// Every pointer must exist on the type and must not be computed.
    pub fn insert<'v>(
        &mut self,
        schema: &Schema,
        type_name: &str,
        values: impl IntoIterator<Item = (&'v str, Vec<Value>)>,
    ) -> Result<ObjectId, Error> {
        let ty = schema.get_type_by_name(type_name)?;
        if ty.is_abstract || ty.is_view {
            return Err(Error::Eval(format!(
                "cannot store an object of type '{}'",
                type_name
            )));
        }

        let mut stored = BTreeMap::new();
        for (name, vals) in values {
            let ptr = schema.getptr(ty.id, name)?.ok_or_else(|| {
                Error::Eval(format!(
                    "object type '{}' has no link or property '{}'",
                    type_name, name
                ))
            })?;
            if ptr.is_computed() || ptr.name == ID_POINTER {
                return Err(Error::Eval(format!(
                    "pointer '{}' of '{}' cannot be stored",
                    name, type_name
                )));
            }
            stored.insert(name.to_string(), vals);
        }

        self.next_id += 1;
        let id = ObjectId::from_u128(self.next_id);
        self.objects.insert(
            id,
            StoredObject {
                id,
                type_id: ty.id,
                values: stored,
            },
        );
        Ok(id)
    }

    /// Get an object by id.
    pub fn get(&self, id: ObjectId) -> Option<&StoredObject> {
        self.objects.get(&id)
    }

    /// All objects whose concrete type is `type_id` or one of its
    /// descendants.
    pub fn objects_of(&self, schema: &Schema, type_id: TypeId) -> Result<Vec<&StoredObject>, Error> {
        let mut result = Vec::new();
        for obj in self.objects.values() {
            if schema.is_subtype(obj.type_id, type_id)? {
                result.push(obj);
            }
        }
        Ok(result)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

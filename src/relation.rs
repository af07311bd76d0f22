//! Object identifiers and the relation that resolves them to object data

use ahash::AHashMap;
use std::fmt;

use crate::mtree::{MkTabError, MkTabResult};

/// Opaque handle of an indexed object (4 bytes on disk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Never names an object; on disk it marks the root's missing routing object
    pub const RESERVED: ObjectId = ObjectId(u32::MAX);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        *self == Self::RESERVED
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Access to the objects the index is built over
pub trait Relation<O>: Send + Sync {
    fn get(&self, id: ObjectId) -> Option<&O>;

    /// All identifiers, in a stable order
    fn ids(&self) -> Vec<ObjectId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Relation held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryRelation<O> {
    objects: AHashMap<ObjectId, O>,
    order: Vec<ObjectId>,
}

impl<O> MemoryRelation<O> {
    pub fn new() -> Self {
        Self {
            objects: AHashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build a relation whose ids are the positions 0..n of `objects`
    ///
    /// Fails once a position no longer fits an unreserved id.
    pub fn from_objects(objects: impl IntoIterator<Item = O>) -> MkTabResult<Self> {
        let mut relation = Self::new();
        for (i, object) in objects.into_iter().enumerate() {
            let id = u32::try_from(i)
                .ok()
                .map(ObjectId)
                .filter(|id| !id.is_reserved())
                .ok_or_else(|| {
                    MkTabError::InvalidArgument(format!("object position {i} exceeds the id range"))
                })?;
            relation.insert(id, object);
        }
        Ok(relation)
    }

    /// Add or replace an object; returns the previous value
    pub fn insert(&mut self, id: ObjectId, object: O) -> Option<O> {
        let previous = self.objects.insert(id, object);
        if previous.is_none() {
            self.order.push(id);
        }
        previous
    }
}

impl<O> Default for MemoryRelation<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Send + Sync> Relation<O> for MemoryRelation<O> {
    fn get(&self, id: ObjectId) -> Option<&O> {
        self.objects.get(&id)
    }

    fn ids(&self) -> Vec<ObjectId> {
        self.order.clone()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

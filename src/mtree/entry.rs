use super::error::{MkTabError, MkTabResult};
use super::node::NodeId;
use crate::relation::ObjectId;

/// Entry for one indexed object
///
/// `knn_bound[k - 1]` is the exact distance from the object to its k-th
/// nearest neighbor (the object itself not counted).
#[derive(Debug, Clone, PartialEq)]
pub struct LeafEntry {
    pub object_id: ObjectId,
    pub parent_distance: f64,
    pub knn_bound: Vec<f64>,
}

impl LeafEntry {
    pub fn new(object_id: ObjectId, knn_bound: Vec<f64>) -> Self {
        Self {
            object_id,
            parent_distance: 0.0,
            knn_bound,
        }
    }
}

/// Entry pointing at a child node
///
/// `knn_bound[k - 1]` is the maximum k-NN distance of every object below
/// the child. `routing_object` is `None` only for the synthetic root entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub routing_object: Option<ObjectId>,
    pub parent_distance: f64,
    pub child: NodeId,
    pub covering_radius: f64,
    pub knn_bound: Vec<f64>,
}

impl DirectoryEntry {
    pub fn new(
        routing_object: ObjectId,
        parent_distance: f64,
        child: NodeId,
        covering_radius: f64,
        k_max: usize,
    ) -> Self {
        Self {
            routing_object: Some(routing_object),
            parent_distance,
            child,
            covering_radius,
            knn_bound: vec![0.0; k_max],
        }
    }

    /// The entry standing for the root node, which has no routing object
    pub fn root(child: NodeId, k_max: usize) -> Self {
        Self {
            routing_object: None,
            parent_distance: 0.0,
            child,
            covering_radius: 0.0,
            knn_bound: vec![0.0; k_max],
        }
    }

    pub fn is_root(&self) -> bool {
        self.routing_object.is_none()
    }
}

/// Unit stored inside a node
#[derive(Debug, Clone, PartialEq)]
pub enum MkTabEntry {
    Leaf(LeafEntry),
    Directory(DirectoryEntry),
}

impl MkTabEntry {
    pub fn is_leaf(&self) -> bool {
        matches!(self, MkTabEntry::Leaf(_))
    }

    pub fn routing_object(&self) -> Option<ObjectId> {
        match self {
            MkTabEntry::Leaf(e) => Some(e.object_id),
            MkTabEntry::Directory(e) => e.routing_object,
        }
    }

    /// Routing object of an entry stored inside a node, where it is mandatory
    pub fn routing_id(&self) -> MkTabResult<ObjectId> {
        self.routing_object().ok_or_else(|| {
            MkTabError::IntegrityViolation("node entry without routing object".to_string())
        })
    }

    pub fn parent_distance(&self) -> f64 {
        match self {
            MkTabEntry::Leaf(e) => e.parent_distance,
            MkTabEntry::Directory(e) => e.parent_distance,
        }
    }

    pub fn set_parent_distance(&mut self, distance: f64) {
        match self {
            MkTabEntry::Leaf(e) => e.parent_distance = distance,
            MkTabEntry::Directory(e) => e.parent_distance = distance,
        }
    }

    /// Covering radius; a leaf entry covers only its own object
    pub fn covering_radius(&self) -> f64 {
        match self {
            MkTabEntry::Leaf(_) => 0.0,
            MkTabEntry::Directory(e) => e.covering_radius,
        }
    }

    pub fn knn_bound(&self) -> &[f64] {
        match self {
            MkTabEntry::Leaf(e) => &e.knn_bound,
            MkTabEntry::Directory(e) => &e.knn_bound,
        }
    }

    /// Bound for parameter `k` (1-based)
    pub fn knn_bound_at(&self, k: usize) -> MkTabResult<f64> {
        bound_at(self.knn_bound(), k)
    }

    pub fn as_directory(&self) -> Option<&DirectoryEntry> {
        match self {
            MkTabEntry::Leaf(_) => None,
            MkTabEntry::Directory(e) => Some(e),
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryEntry> {
        match self {
            MkTabEntry::Leaf(_) => None,
            MkTabEntry::Directory(e) => Some(e),
        }
    }
}

impl From<LeafEntry> for MkTabEntry {
    fn from(entry: LeafEntry) -> Self {
        MkTabEntry::Leaf(entry)
    }
}

impl From<DirectoryEntry> for MkTabEntry {
    fn from(entry: DirectoryEntry) -> Self {
        MkTabEntry::Directory(entry)
    }
}

/// Value for parameter `k` (1-based) of a bound array
pub fn bound_at(bound: &[f64], k: usize) -> MkTabResult<f64> {
    k.checked_sub(1)
        .and_then(|i| bound.get(i))
        .copied()
        .ok_or_else(|| {
            MkTabError::IntegrityViolation(format!(
                "bound array of length {} has no value for k = {k}",
                bound.len()
            ))
        })
}

/// Component-wise maximum of `bound` into `acc`
pub fn max_into(acc: &mut [f64], bound: &[f64]) {
    for (a, b) in acc.iter_mut().zip(bound) {
        if *b > *a {
            *a = *b;
        }
    }
}

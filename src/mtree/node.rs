use super::entry::{MkTabEntry, max_into};

/// Node identifier; node `n` is stored on page `n + 1`
pub type NodeId = usize;

/// The root always keeps this id, also after the tree grows a level
pub const ROOT_NODE_ID: NodeId = 0;

/// A page worth of entries, either all leaf entries or all directory entries
#[derive(Debug, Clone, PartialEq)]
pub struct MkTabNode {
    pub id: NodeId,
    pub is_leaf: bool,
    pub entries: Vec<MkTabEntry>,
}

impl MkTabNode {
    pub fn new_leaf(id: NodeId) -> Self {
        Self {
            id,
            is_leaf: true,
            entries: Vec::new(),
        }
    }

    pub fn new_directory(id: NodeId) -> Self {
        Self {
            id,
            is_leaf: false,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_entry(&mut self, entry: MkTabEntry) {
        debug_assert_eq!(entry.is_leaf(), self.is_leaf, "entry kind must match node kind");
        self.entries.push(entry);
    }

    /// Component-wise maximum of the entries' bounds
    ///
    /// An empty node aggregates to all zeros.
    pub fn aggregate_bound(&self, k_max: usize) -> Vec<f64> {
        let mut bound = vec![0.0; k_max];
        for entry in &self.entries {
            max_into(&mut bound, entry.knn_bound());
        }
        bound
    }

    /// Radius around the node's routing object that covers every object below
    ///
    /// Relies on each entry's parent distance being measured from that
    /// routing object.
    pub fn covering_radius(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.parent_distance() + e.covering_radius())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtree::entry::{DirectoryEntry, LeafEntry};
    use crate::relation::ObjectId;

    fn leaf(id: u32, parent_distance: f64, bound: Vec<f64>) -> MkTabEntry {
        let mut entry = LeafEntry::new(ObjectId(id), bound);
        entry.parent_distance = parent_distance;
        entry.into()
    }

    #[test]
    fn test_aggregate_bound() {
        let mut node = MkTabNode::new_leaf(1);
        node.add_entry(leaf(0, 0.0, vec![1.0, 4.0]));
        node.add_entry(leaf(1, 0.0, vec![2.0, 3.0]));

        assert_eq!(node.aggregate_bound(2), vec![2.0, 4.0]);
    }

    #[test]
    fn test_aggregate_bound_empty_node() {
        let node = MkTabNode::new_leaf(ROOT_NODE_ID);
        assert_eq!(node.aggregate_bound(3), vec![0.0; 3]);
        assert!(node.is_empty());
    }

    #[test]
    fn test_covering_radius_of_leaf() {
        let mut node = MkTabNode::new_leaf(2);
        node.add_entry(leaf(0, 1.5, vec![1.0]));
        node.add_entry(leaf(1, 3.0, vec![1.0]));

        assert_eq!(node.covering_radius(), 3.0);
    }

    #[test]
    fn test_covering_radius_of_directory() {
        let mut node = MkTabNode::new_directory(3);
        node.add_entry(DirectoryEntry::new(ObjectId(0), 1.0, 4, 5.0, 1).into());
        node.add_entry(DirectoryEntry::new(ObjectId(1), 4.0, 5, 0.5, 1).into());

        assert_eq!(node.covering_radius(), 6.0);
        assert_eq!(node.len(), 2);
    }
}

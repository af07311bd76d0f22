//! Insertion substrate used while bulk building
//!
//! Standard M-tree insertion: descend to the most suitable leaf, append the
//! entry, then walk back up maintaining covering radii and splitting every
//! node that reached its capacity.

use super::MkTabTree;
use super::entry::{DirectoryEntry, LeafEntry, MkTabEntry};
use super::error::{MkTabError, MkTabResult};
use super::node::{MkTabNode, NodeId, ROOT_NODE_ID};
use super::split::{Assignments, split_entries};
use crate::relation::ObjectId;

/// One node on the path from the root to the insertion leaf
#[derive(Debug, Clone, Copy)]
struct PathStep {
    node: NodeId,
    /// Position of the entry pointing at `node` inside its parent
    index: Option<usize>,
    /// Routing object of `node`, `None` for the root
    routing: Option<ObjectId>,
}

impl<O> MkTabTree<O> {
    /// Insert one leaf entry, splitting nodes as needed
    pub(crate) fn insert_entry(&mut self, mut entry: LeafEntry) -> MkTabResult<()> {
        let object = entry.object_id;
        let path = self.choose_path(object)?;

        let leaf_step = path
            .last()
            .copied()
            .ok_or_else(|| MkTabError::IntegrityViolation("empty insertion path".to_string()))?;
        entry.parent_distance = match leaf_step.routing {
            Some(routing) => self.distance_between(routing, object)?,
            None => 0.0,
        };

        let mut leaf = self.read_node(leaf_step.node)?;
        if !leaf.is_leaf {
            return Err(MkTabError::IntegrityViolation(format!(
                "insertion path ends in directory node {}",
                leaf.id
            )));
        }
        leaf.add_entry(entry.into());
        self.object_count += 1;

        self.adjust_tree(path, leaf)
    }

    /// Path from the root to the leaf that should receive `object`
    ///
    /// At each level the entry whose covering radius already contains the
    /// object and whose routing object is closest wins. If none covers it,
    /// the entry needing the smallest radius enlargement is taken.
    fn choose_path(&self, object: ObjectId) -> MkTabResult<Vec<PathStep>> {
        let mut path = vec![PathStep {
            node: ROOT_NODE_ID,
            index: None,
            routing: None,
        }];
        let mut node = self.read_node(ROOT_NODE_ID)?;

        while !node.is_leaf {
            let mut covering: Option<(usize, f64)> = None;
            let mut enlarging: Option<(usize, f64)> = None;

            for (i, entry) in node.entries.iter().enumerate() {
                let routing = entry.routing_id()?;
                let distance = self.distance_between(routing, object)?;
                let radius = entry.covering_radius();

                if distance <= radius {
                    if covering.is_none_or(|(_, best)| distance < best) {
                        covering = Some((i, distance));
                    }
                } else {
                    let enlargement = distance - radius;
                    if enlarging.is_none_or(|(_, best)| enlargement < best) {
                        enlarging = Some((i, enlargement));
                    }
                }
            }

            let (index, _) = covering.or(enlarging).ok_or_else(|| {
                MkTabError::IntegrityViolation(format!("directory node {} is empty", node.id))
            })?;
            let chosen = node.entries[index].as_directory().ok_or_else(|| {
                MkTabError::IntegrityViolation(format!(
                    "directory node {} holds a leaf entry",
                    node.id
                ))
            })?;

            path.push(PathStep {
                node: chosen.child,
                index: Some(index),
                routing: chosen.routing_object,
            });
            node = self.read_node(chosen.child)?;
        }

        Ok(path)
    }

    /// Walk back up `path`, starting with its last node already modified
    fn adjust_tree(&mut self, mut path: Vec<PathStep>, mut node: MkTabNode) -> MkTabResult<()> {
        while let Some(step) = path.pop() {
            if node.len() >= self.capacity.for_node(node.is_leaf) {
                let is_leaf = node.is_leaf;
                let split = split_entries(std::mem::take(&mut node.entries), |a, b| {
                    self.distance_between(a, b)
                })?;

                let Some(index) = step.index else {
                    return self.grow_root(is_leaf, split);
                };
                let parent_step = path.last().copied().ok_or_else(|| {
                    MkTabError::IntegrityViolation(format!("node {} has no parent", node.id))
                })?;

                let sibling_id = self.storage.allocate_node_id()?;
                let sibling = filled_node(sibling_id, is_leaf, split.second_entries);
                node.entries = split.first_entries;
                self.write_node(&node)?;
                self.write_node(&sibling)?;

                log::debug!(
                    "split node {} ({} entries) off node {} ({} entries)",
                    sibling.id,
                    sibling.len(),
                    node.id,
                    node.len()
                );

                let (first_distance, second_distance) = match parent_step.routing {
                    Some(routing) => (
                        self.distance_between(split.first_routing, routing)?,
                        self.distance_between(split.second_routing, routing)?,
                    ),
                    None => (0.0, 0.0),
                };

                let mut parent = self.read_node(parent_step.node)?;
                let k_max = self.config.k_max;
                let entry = parent
                    .entries
                    .get_mut(index)
                    .and_then(MkTabEntry::as_directory_mut)
                    .ok_or_else(|| {
                        MkTabError::IntegrityViolation(format!(
                            "node {} has no directory entry at {index}",
                            parent.id
                        ))
                    })?;
                entry.routing_object = Some(split.first_routing);
                entry.parent_distance = first_distance;
                entry.covering_radius = split.first_radius;

                let mut second = DirectoryEntry::new(
                    split.second_routing,
                    second_distance,
                    sibling.id,
                    split.second_radius,
                    k_max,
                );
                second.knn_bound = sibling.aggregate_bound(k_max);
                parent.add_entry(second.into());

                node = parent;
            } else {
                self.write_node(&node)?;

                let Some(index) = step.index else {
                    return Ok(());
                };
                let parent_id = path.last().map(|p| p.node).ok_or_else(|| {
                    MkTabError::IntegrityViolation(format!("node {} has no parent", node.id))
                })?;

                let radius = node.covering_radius();
                let mut parent = self.read_node(parent_id)?;
                let entry = parent
                    .entries
                    .get_mut(index)
                    .and_then(MkTabEntry::as_directory_mut)
                    .ok_or_else(|| {
                        MkTabError::IntegrityViolation(format!(
                            "node {parent_id} has no directory entry at {index}"
                        ))
                    })?;

                if entry.covering_radius >= radius {
                    return Ok(());
                }
                entry.covering_radius = radius;
                node = parent;
            }
        }
        Ok(())
    }

    /// Replace a split root by a directory root over the two halves
    ///
    /// The root keeps its node id; both halves move to fresh nodes. The new
    /// root is written as is, even if two entries already fill it.
    fn grow_root(&mut self, is_leaf: bool, split: Assignments) -> MkTabResult<()> {
        let k_max = self.config.k_max;
        let first = filled_node(self.storage.allocate_node_id()?, is_leaf, split.first_entries);
        let second = filled_node(self.storage.allocate_node_id()?, is_leaf, split.second_entries);
        self.write_node(&first)?;
        self.write_node(&second)?;

        let mut root = MkTabNode::new_directory(ROOT_NODE_ID);
        for (node, routing, radius) in [
            (&first, split.first_routing, split.first_radius),
            (&second, split.second_routing, split.second_radius),
        ] {
            let mut entry = DirectoryEntry::new(routing, 0.0, node.id, radius, k_max);
            entry.knn_bound = node.aggregate_bound(k_max);
            root.add_entry(entry.into());
        }
        self.write_node(&root)?;

        log::debug!(
            "root grew a level: children {} and {}",
            first.id,
            second.id
        );
        Ok(())
    }
}

fn filled_node(id: NodeId, is_leaf: bool, entries: Vec<MkTabEntry>) -> MkTabNode {
    let mut node = if is_leaf {
        MkTabNode::new_leaf(id)
    } else {
        MkTabNode::new_directory(id)
    };
    node.entries = entries;
    node
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::MkTabConfig;
    use crate::distance::AbsoluteDistance;
    use crate::index::MemoryNodeStorage;
    use crate::mtree::{MkTabTree, ROOT_NODE_ID};
    use crate::relation::MemoryRelation;

    fn line_tree(points: Vec<f64>, page_size: usize) -> MkTabTree<f64> {
        let config = MkTabConfig::new(page_size, 1);
        MkTabTree::<f64>::build(
            config,
            Arc::new(AbsoluteDistance),
            Arc::new(MemoryRelation::from_objects(points).unwrap()),
            Box::new(MemoryNodeStorage::new(page_size)),
        )
        .unwrap()
    }

    #[test]
    fn test_small_input_stays_in_root_leaf() {
        let tree = line_tree(vec![0.0, 1.0, 2.0], 4096);

        assert_eq!(tree.height().unwrap(), 1);
        assert!(tree.read_node(ROOT_NODE_ID).unwrap().is_leaf);
    }

    #[test]
    fn test_root_split_keeps_root_id() {
        // 150-byte pages give a leaf capacity of 6
        let tree = line_tree((0..6).map(f64::from).collect(), 150);
        assert_eq!(tree.capacity().leaf, 6);

        let root = tree.read_node(ROOT_NODE_ID).unwrap();
        assert!(!root.is_leaf);
        assert_eq!(root.len(), 2);
        assert_eq!(tree.height().unwrap(), 2);
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_many_inserts_keep_nodes_within_capacity() {
        let tree = line_tree((0..200).map(|i| f64::from(i * 7 % 101)).collect(), 150);

        assert!(tree.height().unwrap() >= 3);
        assert_eq!(tree.len(), 200);
        tree.check_integrity().unwrap();
    }
}

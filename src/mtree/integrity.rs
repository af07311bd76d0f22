//! Consistency checks over a built tree

use super::MkTabTree;
use super::entry::{DirectoryEntry, MkTabEntry};
use super::error::{MkTabError, MkTabResult};
use super::node::{MkTabNode, ROOT_NODE_ID};

/// Relative tolerance for recomputed distances
const EPSILON: f64 = 1e-9;

fn approx_eq(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn violation(message: String) -> MkTabError {
    MkTabError::IntegrityViolation(message)
}

/// Most entries a stored node may hold
///
/// Nodes split on reaching their capacity. Directory nodes always have room
/// for two entries, since a split of three directory entries leaves one
/// half with two.
fn fill_limit(capacity: usize, is_leaf: bool) -> usize {
    let limit = capacity.saturating_sub(1);
    if is_leaf { limit } else { limit.max(2) }
}

impl<O> MkTabTree<O> {
    /// Verify the structure of the whole tree
    ///
    /// Checks, for every node: entry kinds, fill against capacity, that each
    /// directory bound is the component-wise maximum of its child's entries,
    /// that bounds do not decrease in k, stored parent distances, and that
    /// every object below a directory entry lies within its covering radius.
    /// Also checks the number of leaf entries against the object count.
    pub fn check_integrity(&self) -> MkTabResult<()> {
        let root = self.read_node(ROOT_NODE_ID)?;
        let mut objects = 0;
        self.check_node(&self.root_entry, &root, &mut objects)?;

        if objects != self.object_count {
            return Err(violation(format!(
                "tree holds {objects} leaf entries but counts {} objects",
                self.object_count
            )));
        }
        Ok(())
    }

    fn check_node(
        &self,
        parent: &DirectoryEntry,
        node: &MkTabNode,
        objects: &mut usize,
    ) -> MkTabResult<()> {
        let k_max = self.config.k_max;
        let capacity = self.capacity.for_node(node.is_leaf);
        if node.len() > fill_limit(capacity, node.is_leaf) {
            return Err(violation(format!(
                "node {} holds {} entries, capacity is {capacity}",
                node.id,
                node.len()
            )));
        }
        if node.id != ROOT_NODE_ID && node.is_empty() {
            return Err(violation(format!("node {} is empty", node.id)));
        }

        let expected = node.aggregate_bound(k_max);
        if parent.knn_bound != expected {
            return Err(violation(format!(
                "bound of node {} is {:?}, its entries aggregate to {expected:?}",
                node.id, parent.knn_bound
            )));
        }

        for entry in &node.entries {
            if entry.is_leaf() != node.is_leaf {
                return Err(violation(format!(
                    "node {} mixes leaf and directory entries",
                    node.id
                )));
            }
            let bound = entry.knn_bound();
            if bound.len() != k_max {
                return Err(violation(format!(
                    "entry in node {} has {} bounds, expected {k_max}",
                    node.id,
                    bound.len()
                )));
            }
            if bound.windows(2).any(|w| w[0] > w[1]) {
                return Err(violation(format!(
                    "bound {bound:?} in node {} decreases in k",
                    node.id
                )));
            }

            let id = entry.routing_id()?;
            let parent_distance = match parent.routing_object {
                Some(routing) => self.distance_between(routing, id)?,
                None => 0.0,
            };
            if !approx_eq(entry.parent_distance(), parent_distance) {
                return Err(violation(format!(
                    "entry {id} in node {} stores parent distance {}, actual {parent_distance}",
                    node.id,
                    entry.parent_distance()
                )));
            }

            match entry {
                MkTabEntry::Leaf(_) => *objects += 1,
                MkTabEntry::Directory(dir) => {
                    let child = self.read_node(dir.child)?;
                    self.check_covering(dir, &child)?;
                    self.check_node(dir, &child, objects)?;
                }
            }
        }
        Ok(())
    }

    /// Every object below `entry` lies within its covering radius
    fn check_covering(&self, entry: &DirectoryEntry, node: &MkTabNode) -> MkTabResult<()> {
        let routing = entry
            .routing_object
            .ok_or_else(|| violation("directory entry without routing object".to_string()))?;

        let mut stack = vec![node.clone()];
        while let Some(node) = stack.pop() {
            for child in &node.entries {
                match child {
                    MkTabEntry::Leaf(leaf) => {
                        let distance = self.distance_between(routing, leaf.object_id)?;
                        if distance > entry.covering_radius
                            && !approx_eq(distance, entry.covering_radius)
                        {
                            return Err(violation(format!(
                                "object {} lies {distance} from {routing}, outside radius {}",
                                leaf.object_id, entry.covering_radius
                            )));
                        }
                    }
                    MkTabEntry::Directory(dir) => stack.push(self.read_node(dir.child)?),
                }
            }
        }
        Ok(())
    }

    /// Verify every leaf bound against freshly computed k-NN distances
    pub fn check_knn_bounds(&self) -> MkTabResult<()> {
        let ids = self.relation.ids();
        let exact = self.exact_knn_bounds(&ids)?;

        let mut stack = vec![ROOT_NODE_ID];
        while let Some(id) = stack.pop() {
            let node = self.read_node(id)?;
            for entry in &node.entries {
                match entry {
                    MkTabEntry::Leaf(leaf) => {
                        let expected = exact
                            .get(&leaf.object_id)
                            .ok_or(MkTabError::ObjectNotFound(leaf.object_id))?;
                        let matches = leaf.knn_bound.len() == expected.len()
                            && leaf
                                .knn_bound
                                .iter()
                                .zip(expected)
                                .all(|(a, b)| approx_eq(*a, *b));
                        if !matches {
                            return Err(violation(format!(
                                "object {} stores bound {:?}, exact is {expected:?}",
                                leaf.object_id, leaf.knn_bound
                            )));
                        }
                    }
                    MkTabEntry::Directory(dir) => stack.push(dir.child),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(1.0, 1.0 + 1e-12));
        assert!(approx_eq(1e12, 1e12 + 1.0));
        assert!(!approx_eq(1.0, 1.001));
        assert!(approx_eq(f64::INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_fill_limit() {
        assert_eq!(fill_limit(6, true), 5);
        assert_eq!(fill_limit(2, true), 1);
        assert_eq!(fill_limit(4, false), 3);
        assert_eq!(fill_limit(3, false), 2);
        assert_eq!(fill_limit(2, false), 2);
    }
}

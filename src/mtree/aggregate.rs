//! Bottom-up aggregation of k-NN distance bounds

use ahash::AHashMap;

use super::MkTabTree;
use super::entry::MkTabEntry;
use super::error::{MkTabError, MkTabResult};
use super::node::{NodeId, ROOT_NODE_ID};
use crate::relation::ObjectId;

impl<O> MkTabTree<O> {
    /// Exact k-NN distances (k = 1..=k_max) of each object, itself excluded
    ///
    /// Missing neighbors, in relations with no more than k_max objects, are
    /// reported as an infinite distance.
    pub(crate) fn exact_knn_bounds(
        &self,
        ids: &[ObjectId],
    ) -> MkTabResult<AHashMap<ObjectId, Vec<f64>>> {
        let k_max = self.config.k_max;
        let mut bounds = AHashMap::with_capacity(ids.len());

        for &id in ids {
            let neighbors = self.knn_search(self.object(id)?, k_max + 1)?;
            let mut bound: Vec<f64> = neighbors
                .iter()
                .filter(|r| r.id != id)
                .map(|r| r.distance)
                .take(k_max)
                .collect();
            bound.resize(k_max, f64::INFINITY);
            bounds.insert(id, bound);
        }
        Ok(bounds)
    }

    /// Store each leaf entry's bound from `bounds`
    pub(crate) fn assign_leaf_bounds(
        &mut self,
        bounds: &AHashMap<ObjectId, Vec<f64>>,
    ) -> MkTabResult<()> {
        let mut stack = vec![ROOT_NODE_ID];
        while let Some(id) = stack.pop() {
            let mut node = self.read_node(id)?;
            if !node.is_leaf {
                stack.extend(
                    node.entries
                        .iter()
                        .filter_map(MkTabEntry::as_directory)
                        .map(|e| e.child),
                );
                continue;
            }

            for entry in node.entries.iter_mut() {
                if let MkTabEntry::Leaf(leaf) = entry {
                    let bound = bounds
                        .get(&leaf.object_id)
                        .ok_or(MkTabError::ObjectNotFound(leaf.object_id))?;
                    leaf.knn_bound.clone_from(bound);
                }
            }
            self.write_node(&node)?;
        }
        Ok(())
    }

    /// Post-order sweep setting every directory bound to the component-wise
    /// maximum of its child node's entries, root entry included
    pub(crate) fn aggregate_bounds(&mut self) -> MkTabResult<()> {
        let root_bound = self.aggregate_node(ROOT_NODE_ID)?;
        self.root_entry.knn_bound = root_bound;
        Ok(())
    }

    fn aggregate_node(&mut self, id: NodeId) -> MkTabResult<Vec<f64>> {
        let mut node = self.read_node(id)?;
        if !node.is_leaf {
            for entry in node.entries.iter_mut() {
                if let MkTabEntry::Directory(dir) = entry {
                    dir.knn_bound = self.aggregate_node(dir.child)?;
                }
            }
            self.write_node(&node)?;
        }
        Ok(node.aggregate_bound(self.config.k_max))
    }
}

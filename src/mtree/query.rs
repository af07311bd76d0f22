//! k-NN, range and reverse k-NN search

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::MkTabTree;
use super::entry::{DirectoryEntry, MkTabEntry, bound_at};
use super::error::{MkTabError, MkTabResult};
use super::node::{MkTabNode, NodeId, ROOT_NODE_ID};
use crate::config::RknnPruning;
use crate::distance::DistanceFunction;
use crate::relation::ObjectId;

/// One query answer: an indexed object and its distance to the query
#[derive(Debug, Clone, Copy)]
pub struct QueryResult {
    pub distance: f64,
    pub id: ObjectId,
}

impl QueryResult {
    pub fn new(distance: f64, id: ObjectId) -> Self {
        Self { distance, id }
    }
}

impl PartialEq for QueryResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueryResult {}

impl PartialOrd for QueryResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ascending distance, ties broken by object id
impl Ord for QueryResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// The k best results seen so far
///
/// A max-heap, so the current worst result is at the top and is the one
/// evicted when a closer object turns up.
#[derive(Debug)]
struct KnnList {
    k: usize,
    heap: BinaryHeap<QueryResult>,
}

impl KnnList {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn insert(&mut self, result: QueryResult) {
        self.heap.push(result);
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Distance of the k-th result, infinite until k results are known
    fn kth_distance(&self) -> f64 {
        if self.heap.len() < self.k {
            f64::INFINITY
        } else {
            self.heap.peek().map_or(f64::INFINITY, |r| r.distance)
        }
    }

    fn into_sorted_vec(self) -> Vec<QueryResult> {
        self.heap.into_sorted_vec()
    }
}

/// Node waiting in the best-first k-NN queue
#[derive(Debug)]
struct Candidate {
    min_distance: f64,
    node: NodeId,
    /// Distance from the node's routing object to the query, `None` at the root
    routing_distance: Option<f64>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so that BinaryHeap pops the smallest minimum distance first
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .min_distance
            .total_cmp(&self.min_distance)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Whether the parent distance alone proves `entry` lies outside `radius`
///
/// By the triangle inequality `|d(parent, q) - d(parent, e)|` is a lower
/// bound of `d(e, q)`, so nothing within `covering_radius` of `e` can be
/// closer than that minus the covering radius.
fn excluded_by_parent(routing_distance: Option<f64>, entry: &MkTabEntry, radius: f64) -> bool {
    match routing_distance {
        Some(d) => (d - entry.parent_distance()).abs() > radius + entry.covering_radius(),
        None => false,
    }
}

impl<O> MkTabTree<O> {
    /// The k indexed objects nearest to `query`
    ///
    /// Returns `None` if `metric` is not the distance the tree was built
    /// with. The query object is part of its own result.
    pub fn knn_query(
        &self,
        metric: &dyn DistanceFunction<O>,
        query: ObjectId,
        k: usize,
    ) -> MkTabResult<Option<Vec<QueryResult>>> {
        if !self.is_applicable(metric) {
            return Ok(None);
        }
        let object = self.object(query)?;
        self.knn_search(object, k).map(Some)
    }

    /// Every indexed object within `radius` of `query`
    ///
    /// Returns `None` if `metric` is not the distance the tree was built with.
    pub fn range_query(
        &self,
        metric: &dyn DistanceFunction<O>,
        query: ObjectId,
        radius: f64,
    ) -> MkTabResult<Option<Vec<QueryResult>>> {
        if !self.is_applicable(metric) {
            return Ok(None);
        }
        if radius.is_nan() || radius < 0.0 {
            return Err(MkTabError::InvalidArgument(format!(
                "range radius must be non-negative, got {radius}"
            )));
        }

        let object = self.object(query)?;
        let mut results = Vec::new();
        let root = self.read_node(ROOT_NODE_ID)?;
        self.range_search(&root, None, object, radius, &mut results)?;
        results.sort();
        Ok(Some(results))
    }

    /// Every indexed object that has `query` among its k nearest neighbors
    ///
    /// An object `o` qualifies when `d(o, query)` does not exceed the exact
    /// k-NN distance of `o`; the query object itself is never reported.
    /// Fails with `InvalidK` unless `1 <= k <= k_max`, and returns `None` if
    /// `metric` is not the distance the tree was built with.
    pub fn reverse_knn_query(
        &self,
        metric: &dyn DistanceFunction<O>,
        query: ObjectId,
        k: usize,
    ) -> MkTabResult<Option<Vec<QueryResult>>> {
        if k == 0 || k > self.config.k_max {
            return Err(MkTabError::InvalidK {
                k,
                k_max: self.config.k_max,
            });
        }
        if !self.is_applicable(metric) {
            return Ok(None);
        }

        let object = self.object(query)?;
        let mut search = RknnSearch {
            k,
            pruning: self.config.rknn_pruning,
            results: Vec::new(),
            visited: 0,
            pruned: 0,
        };
        let root = self.read_node(ROOT_NODE_ID)?;
        self.rknn_search(None, &root, object, &mut search)?;

        log::trace!(
            "reverse {k}-NN of {query}: {} nodes visited, {} subtrees pruned",
            search.visited,
            search.pruned
        );

        let mut results = search.results;
        results.retain(|r| r.id != query);
        results.sort();
        Ok(Some(results))
    }

    /// Best-first k-NN search
    pub(crate) fn knn_search(&self, query: &O, k: usize) -> MkTabResult<Vec<QueryResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut list = KnnList::new(k);
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            min_distance: 0.0,
            node: ROOT_NODE_ID,
            routing_distance: None,
        });

        while let Some(candidate) = queue.pop() {
            if candidate.min_distance > list.kth_distance() {
                break;
            }
            let node = self.read_node(candidate.node)?;

            for entry in &node.entries {
                let d_k = list.kth_distance();
                if excluded_by_parent(candidate.routing_distance, entry, d_k) {
                    continue;
                }

                let id = entry.routing_id()?;
                let distance = self.distance_to(id, query)?;
                match entry {
                    MkTabEntry::Leaf(_) => {
                        if distance <= d_k {
                            list.insert(QueryResult::new(distance, id));
                        }
                    }
                    MkTabEntry::Directory(dir) => {
                        let min_distance = (distance - dir.covering_radius).max(0.0);
                        if min_distance <= d_k {
                            queue.push(Candidate {
                                min_distance,
                                node: dir.child,
                                routing_distance: Some(distance),
                            });
                        }
                    }
                }
            }
        }

        Ok(list.into_sorted_vec())
    }

    fn range_search(
        &self,
        node: &MkTabNode,
        routing_distance: Option<f64>,
        query: &O,
        radius: f64,
        results: &mut Vec<QueryResult>,
    ) -> MkTabResult<()> {
        for entry in &node.entries {
            if excluded_by_parent(routing_distance, entry, radius) {
                continue;
            }

            let id = entry.routing_id()?;
            let distance = self.distance_to(id, query)?;
            match entry {
                MkTabEntry::Leaf(_) => {
                    if distance <= radius {
                        results.push(QueryResult::new(distance, id));
                    }
                }
                MkTabEntry::Directory(dir) => {
                    if distance <= radius + dir.covering_radius {
                        let child = self.read_node(dir.child)?;
                        self.range_search(&child, Some(distance), query, radius, results)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reverse k-NN descent below `node`
    ///
    /// `bound_entry` is the entry representing `node` in its parent, `None`
    /// at the root. With `NodeBound` pruning a child is visited when its
    /// minimum distance to the query does not exceed the bound of `node`
    /// itself; with `EntryBound` the child's own bound is used instead.
    fn rknn_search(
        &self,
        bound_entry: Option<&DirectoryEntry>,
        node: &MkTabNode,
        query: &O,
        search: &mut RknnSearch,
    ) -> MkTabResult<()> {
        search.visited += 1;
        let k = search.k;

        if node.is_leaf {
            for entry in &node.entries {
                let id = entry.routing_id()?;
                let distance = self.distance_to(id, query)?;
                if distance <= entry.knn_bound_at(k)? {
                    search.results.push(QueryResult::new(distance, id));
                }
            }
            return Ok(());
        }

        let node_threshold = match bound_entry {
            Some(entry) => bound_at(&entry.knn_bound, k)?,
            None => f64::INFINITY,
        };
        for entry in &node.entries {
            let dir = entry.as_directory().ok_or_else(|| {
                MkTabError::IntegrityViolation(format!(
                    "directory node {} holds a leaf entry",
                    node.id
                ))
            })?;
            let id = entry.routing_id()?;
            let distance = self.distance_to(id, query)?;
            let min_distance = if dir.covering_radius > distance {
                0.0
            } else {
                distance - dir.covering_radius
            };

            let threshold = match search.pruning {
                RknnPruning::NodeBound => node_threshold,
                RknnPruning::EntryBound => bound_at(&dir.knn_bound, k)?,
            };
            if min_distance <= threshold {
                let child = self.read_node(dir.child)?;
                self.rknn_search(Some(dir), &child, query, search)?;
            } else {
                search.pruned += 1;
            }
        }
        Ok(())
    }
}

/// State threaded through one reverse k-NN descent
struct RknnSearch {
    k: usize,
    pruning: RknnPruning,
    results: Vec<QueryResult>,
    visited: usize,
    pruned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_order() {
        let mut results = vec![
            QueryResult::new(2.0, ObjectId(1)),
            QueryResult::new(1.0, ObjectId(5)),
            QueryResult::new(1.0, ObjectId(3)),
        ];
        results.sort();

        let ids: Vec<u32> = results.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![3, 5, 1]);
    }

    #[test]
    fn test_knn_list_keeps_k_closest() {
        let mut list = KnnList::new(2);
        assert_eq!(list.kth_distance(), f64::INFINITY);

        list.insert(QueryResult::new(5.0, ObjectId(0)));
        list.insert(QueryResult::new(1.0, ObjectId(1)));
        assert_eq!(list.kth_distance(), 5.0);

        list.insert(QueryResult::new(3.0, ObjectId(2)));
        assert_eq!(list.kth_distance(), 3.0);

        let ids: Vec<u32> = list.into_sorted_vec().iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_candidates_pop_closest_first() {
        let mut queue = BinaryHeap::new();
        for (min_distance, node) in [(3.0, 1), (0.5, 2), (1.5, 3)] {
            queue.push(Candidate {
                min_distance,
                node,
                routing_distance: None,
            });
        }

        let order: Vec<NodeId> = std::iter::from_fn(|| queue.pop().map(|c| c.node)).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}

//! MkTab tree: an M-tree whose entries carry k-NN distance bounds
//!
//! Every entry stores, for each k in 1..=k_max, an upper bound on the k-NN
//! distance of the objects below it. Leaf entries hold the exact k-NN
//! distances of their object; directory entries hold the component-wise
//! maximum over the entries of their child node. Reverse k-NN queries prune
//! whole subtrees with these bounds.
//!
//! The tree is bulk built from a complete relation and is read-only
//! afterwards: single insertions and deletions are rejected because the
//! bounds of every object depend on the whole data set.

mod aggregate;
mod capacity;
mod entry;
mod error;
mod insert;
mod integrity;
mod node;
mod query;
mod split;

pub use capacity::{NODE_HEADER_SIZE, NodeCapacity, directory_entry_size, leaf_entry_size};
pub use entry::{DirectoryEntry, LeafEntry, MkTabEntry};
pub use error::{MkTabError, MkTabResult};
pub use node::{MkTabNode, NodeId, ROOT_NODE_ID};
pub use query::QueryResult;

use std::fmt;
use std::sync::Arc;

use crate::config::{MkTabConfig, RknnPruning};
use crate::distance::DistanceFunction;
use crate::index::{NodeStorage, TreeHeader};
use crate::relation::{ObjectId, Relation};

/// Number of directory and leaf nodes in a tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub directory: usize,
    pub leaf: usize,
}

/// Bulk-built metric index answering k-NN, range and reverse k-NN queries
pub struct MkTabTree<O> {
    config: MkTabConfig,
    capacity: NodeCapacity,
    metric: Arc<dyn DistanceFunction<O>>,
    relation: Arc<dyn Relation<O>>,
    storage: Box<dyn NodeStorage>,
    /// Synthetic entry standing for the root node
    root_entry: DirectoryEntry,
    object_count: usize,
}

impl<O> MkTabTree<O> {
    /// Build a tree over every object of `relation`
    ///
    /// Objects are inserted first, then each object's exact k-NN distances
    /// for k = 1..=k_max are computed with the tree's own k-NN search and the
    /// bounds are aggregated bottom-up. `storage` must be empty.
    pub fn build(
        config: MkTabConfig,
        metric: Arc<dyn DistanceFunction<O>>,
        relation: Arc<dyn Relation<O>>,
        storage: Box<dyn NodeStorage>,
    ) -> MkTabResult<Self> {
        let mut tree = Self::create(config, metric, relation, storage)?;
        let k_max = tree.config.k_max;
        let ids = tree.relation.ids();
        if ids.contains(&ObjectId::RESERVED) {
            return Err(reserved_id());
        }

        log::debug!("inserting {} objects", ids.len());
        for &id in &ids {
            tree.insert_entry(LeafEntry::new(id, vec![f64::INFINITY; k_max]))?;
        }

        log::debug!("computing {k_max}-NN distances of {} objects", ids.len());
        let bounds = tree.exact_knn_bounds(&ids)?;
        tree.assign_leaf_bounds(&bounds)?;
        tree.finish_build()?;
        Ok(tree)
    }

    /// Build a tree from leaf entries whose bounds were computed elsewhere
    ///
    /// Each entry's `knn_bound` must have exactly k_max values and every
    /// object must be present in `relation`.
    pub fn build_with_entries(
        config: MkTabConfig,
        metric: Arc<dyn DistanceFunction<O>>,
        relation: Arc<dyn Relation<O>>,
        storage: Box<dyn NodeStorage>,
        entries: Vec<LeafEntry>,
    ) -> MkTabResult<Self> {
        let mut tree = Self::create(config, metric, relation, storage)?;
        let k_max = tree.config.k_max;

        for entry in &entries {
            if entry.object_id.is_reserved() {
                return Err(reserved_id());
            }
            if entry.knn_bound.len() != k_max {
                return Err(MkTabError::InvalidArgument(format!(
                    "entry {} has {} bounds, expected {k_max}",
                    entry.object_id,
                    entry.knn_bound.len()
                )));
            }
            tree.object(entry.object_id)?;
        }

        log::debug!("inserting {} precomputed entries", entries.len());
        for entry in entries {
            tree.insert_entry(entry)?;
        }
        tree.finish_build()?;
        Ok(tree)
    }

    /// Reopen a tree previously built into `storage`
    ///
    /// `metric` must be the distance the tree was built with, and `config`
    /// must name the stored page size and k_max. Query settings such as the
    /// reverse k-NN pruning rule are taken from `config`.
    pub fn open(
        config: MkTabConfig,
        storage: Box<dyn NodeStorage>,
        metric: Arc<dyn DistanceFunction<O>>,
        relation: Arc<dyn Relation<O>>,
    ) -> MkTabResult<Self> {
        let header = storage.read_header()?.ok_or_else(|| {
            MkTabError::InvalidArgument("storage holds no tree header".to_string())
        })?;

        if header.distance != metric.name() {
            return Err(MkTabError::DistanceMismatch {
                expected: header.distance,
                actual: metric.name().to_string(),
            });
        }
        if header.page_size != storage.page_size() {
            return Err(MkTabError::InvalidConfig(format!(
                "tree was built with {}-byte pages, storage uses {}",
                header.page_size,
                storage.page_size()
            )));
        }

        if config.page_size != header.page_size || config.k_max != header.k_max {
            return Err(MkTabError::InvalidConfig(format!(
                "tree was built with page size {} and k_max {}, configured {} and {}",
                header.page_size, header.k_max, config.page_size, config.k_max
            )));
        }

        let capacity = config.validate()?;
        let root = storage.read_node(ROOT_NODE_ID)?;
        let mut root_entry = DirectoryEntry::root(ROOT_NODE_ID, header.k_max);
        root_entry.knn_bound = root.aggregate_bound(header.k_max);

        log::debug!(
            "opened tree with {} objects in {} nodes",
            header.object_count,
            header.node_count
        );

        Ok(Self {
            config,
            capacity,
            metric,
            relation,
            storage,
            root_entry,
            object_count: header.object_count,
        })
    }

    /// Validate the configuration and lay down an empty leaf root
    fn create(
        config: MkTabConfig,
        metric: Arc<dyn DistanceFunction<O>>,
        relation: Arc<dyn Relation<O>>,
        mut storage: Box<dyn NodeStorage>,
    ) -> MkTabResult<Self> {
        let capacity = config.validate()?;

        if config.page_size != storage.page_size() {
            return Err(MkTabError::InvalidConfig(format!(
                "configured page size {} does not match storage page size {}",
                config.page_size,
                storage.page_size()
            )));
        }
        if storage.node_count() != 0 {
            return Err(MkTabError::InvalidArgument(
                "storage already holds nodes".to_string(),
            ));
        }

        let root_id = storage.allocate_node_id()?;
        storage.write_node(&MkTabNode::new_leaf(root_id))?;

        log::debug!(
            "created tree: page size {}, k_max {}, leaf capacity {}, directory capacity {}",
            config.page_size,
            config.k_max,
            capacity.leaf,
            capacity.directory
        );

        let k_max = config.k_max;
        Ok(Self {
            config,
            capacity,
            metric,
            relation,
            storage,
            root_entry: DirectoryEntry::root(root_id, k_max),
            object_count: 0,
        })
    }

    fn finish_build(&mut self) -> MkTabResult<()> {
        self.aggregate_bounds()?;
        self.flush()?;
        log::debug!(
            "built tree over {} objects, height {}",
            self.object_count,
            self.height()?
        );
        Ok(())
    }

    /// Single insertions are not supported once the tree is built
    pub fn insert(&mut self, _id: ObjectId) -> MkTabResult<()> {
        Err(MkTabError::UnsupportedOperation(
            "insertion into a built MkTab tree",
        ))
    }

    /// Single deletions are not supported once the tree is built
    pub fn delete(&mut self, _id: ObjectId) -> MkTabResult<bool> {
        Err(MkTabError::UnsupportedOperation(
            "deletion from a built MkTab tree",
        ))
    }

    /// Write the tree header and flush the storage
    pub fn flush(&mut self) -> MkTabResult<()> {
        let header = TreeHeader {
            page_size: self.config.page_size,
            k_max: self.config.k_max,
            node_count: self.storage.node_count(),
            object_count: self.object_count,
            distance: self.metric.name().to_string(),
        };
        self.storage.write_header(&header)?;
        self.storage.flush()
    }

    pub fn config(&self) -> &MkTabConfig {
        &self.config
    }

    pub fn k_max(&self) -> usize {
        self.config.k_max
    }

    pub fn capacity(&self) -> NodeCapacity {
        self.capacity
    }

    pub fn distance_name(&self) -> &str {
        self.metric.name()
    }

    /// Number of indexed objects
    pub fn len(&self) -> usize {
        self.object_count
    }

    pub fn is_empty(&self) -> bool {
        self.object_count == 0
    }

    /// Bound of the whole tree: the maximum k-NN distance of any object
    pub fn root_bound(&self) -> &[f64] {
        &self.root_entry.knn_bound
    }

    pub fn set_rknn_pruning(&mut self, pruning: RknnPruning) {
        self.config.rknn_pruning = pruning;
    }

    /// Number of node levels, a lone leaf root counting as one
    pub fn height(&self) -> MkTabResult<usize> {
        let mut height = 1;
        let mut node = self.read_node(ROOT_NODE_ID)?;
        while !node.is_leaf {
            let child = match node.entries.first().and_then(MkTabEntry::as_directory) {
                Some(entry) => entry.child,
                None => break,
            };
            node = self.read_node(child)?;
            height += 1;
        }
        Ok(height)
    }

    pub fn node_counts(&self) -> MkTabResult<NodeCounts> {
        let mut counts = NodeCounts::default();
        let mut stack = vec![ROOT_NODE_ID];
        while let Some(id) = stack.pop() {
            let node = self.read_node(id)?;
            if node.is_leaf {
                counts.leaf += 1;
            } else {
                counts.directory += 1;
                stack.extend(
                    node.entries
                        .iter()
                        .filter_map(MkTabEntry::as_directory)
                        .map(|e| e.child),
                );
            }
        }
        Ok(counts)
    }

    pub(crate) fn read_node(&self, id: NodeId) -> MkTabResult<MkTabNode> {
        self.storage.read_node(id)
    }

    pub(crate) fn write_node(&mut self, node: &MkTabNode) -> MkTabResult<()> {
        self.storage.write_node(node)
    }

    pub(crate) fn object(&self, id: ObjectId) -> MkTabResult<&O> {
        self.relation.get(id).ok_or(MkTabError::ObjectNotFound(id))
    }

    /// Distance between two indexed objects under the tree's metric
    pub(crate) fn distance_between(&self, a: ObjectId, b: ObjectId) -> MkTabResult<f64> {
        Ok(self.metric.distance(self.object(a)?, self.object(b)?))
    }

    /// Distance from an indexed object to a query object
    pub(crate) fn distance_to(&self, id: ObjectId, query: &O) -> MkTabResult<f64> {
        Ok(self.metric.distance(self.object(id)?, query))
    }

    /// Whether a query carrying `metric` can be answered by this tree
    pub(crate) fn is_applicable(&self, metric: &dyn DistanceFunction<O>) -> bool {
        let applicable = metric.name() == self.metric.name();
        if !applicable {
            log::debug!(
                "query distance '{}' does not match index distance '{}'",
                metric.name(),
                self.metric.name()
            );
        }
        applicable
    }
}

fn reserved_id() -> MkTabError {
    MkTabError::InvalidArgument(format!(
        "object id {} is reserved and cannot be indexed",
        ObjectId::RESERVED.as_u32()
    ))
}

impl<O> fmt::Debug for MkTabTree<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MkTabTree")
            .field("config", &self.config)
            .field("capacity", &self.capacity)
            .field("distance", &self.metric.name())
            .field("object_count", &self.object_count)
            .finish()
    }
}

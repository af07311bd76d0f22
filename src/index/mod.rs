//! Node storage for MkTab trees
//!
//! A tree addresses its nodes by [`NodeId`] only; the storage maps ids to
//! pages. Two backends exist: an in-memory arena and a paged file behind an
//! LRU buffer pool.

mod paged;
mod serialization;

pub use paged::PagedNodeStorage;
pub use serialization::{
    MAGIC, VERSION, deserialize_header, deserialize_node, node_size,
    serialize_header, serialize_node,
};
pub use crate::mtree::NODE_HEADER_SIZE;

use crate::mtree::{MkTabError, MkTabNode, MkTabResult, NodeId};

/// Tree-level metadata kept next to the nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeHeader {
    pub page_size: usize,
    pub k_max: usize,
    pub node_count: usize,
    pub object_count: usize,
    /// Name of the distance function the tree was built with
    pub distance: String,
}

/// Page-granular home of a tree's nodes
///
/// Reads take `&self` so that queries can share one tree.
pub trait NodeStorage: Send + Sync {
    fn page_size(&self) -> usize;

    fn read_node(&self, id: NodeId) -> MkTabResult<MkTabNode>;

    /// Store `node` under its id, which must have been allocated
    fn write_node(&mut self, node: &MkTabNode) -> MkTabResult<()>;

    fn allocate_node_id(&mut self) -> MkTabResult<NodeId>;

    /// Number of allocated node ids
    fn node_count(&self) -> usize;

    fn write_header(&mut self, header: &TreeHeader) -> MkTabResult<()>;

    /// The stored header, `None` if none was written yet
    fn read_header(&self) -> MkTabResult<Option<TreeHeader>>;

    fn flush(&mut self) -> MkTabResult<()>;
}

/// Fail with `NodeOverflow` when an encoded page exceeds `page_size`
pub(crate) fn check_fits(node: NodeId, size: usize, page_size: usize) -> MkTabResult<()> {
    if size > page_size {
        return Err(MkTabError::NodeOverflow {
            node,
            size,
            page_size,
        });
    }
    Ok(())
}

/// Node arena held in memory
///
/// Enforces the same page-size limit as paged storage, so trees behave
/// identically on both.
#[derive(Debug, Clone)]
pub struct MemoryNodeStorage {
    page_size: usize,
    nodes: Vec<Option<MkTabNode>>,
    header: Option<TreeHeader>,
}

impl MemoryNodeStorage {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            nodes: Vec::new(),
            header: None,
        }
    }
}

impl NodeStorage for MemoryNodeStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_node(&self, id: NodeId) -> MkTabResult<MkTabNode> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(MkTabError::NodeNotFound(id))
    }

    fn write_node(&mut self, node: &MkTabNode) -> MkTabResult<()> {
        check_fits(node.id, node_size(node), self.page_size)?;
        let slot = self
            .nodes
            .get_mut(node.id)
            .ok_or(MkTabError::NodeNotFound(node.id))?;
        *slot = Some(node.clone());
        Ok(())
    }

    fn allocate_node_id(&mut self) -> MkTabResult<NodeId> {
        self.nodes.push(None);
        Ok(self.nodes.len() - 1)
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn write_header(&mut self, header: &TreeHeader) -> MkTabResult<()> {
        self.header = Some(header.clone());
        Ok(())
    }

    fn read_header(&self) -> MkTabResult<Option<TreeHeader>> {
        Ok(self.header.clone())
    }

    fn flush(&mut self) -> MkTabResult<()> {
        Ok(())
    }
}

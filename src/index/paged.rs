//! File-backed node storage
//!
//! Page 0 holds the tree header, node `n` lives on page `n + 1`.

use parking_lot::Mutex;
use std::path::Path;

use crate::config::MkTabConfig;
use crate::mtree::{MkTabError, MkTabNode, MkTabResult, NodeId};
use crate::storage::{BufferManager, FileHandle, PageId, PagedFileManager, StorageError};

use super::serialization::{deserialize_header, deserialize_node, serialize_header, serialize_node};
use super::{NodeStorage, TreeHeader, check_fits};

const HEADER_PAGE: PageId = 0;

fn node_page(id: NodeId) -> PageId {
    id + 1
}

/// Nodes stored one per page in a file, cached by an LRU buffer pool
pub struct PagedNodeStorage {
    buffers: Mutex<BufferManager>,
    file: FileHandle,
    page_size: usize,
    node_count: usize,
}

impl PagedNodeStorage {
    /// Create a new, empty index file
    pub fn create<P: AsRef<Path>>(path: P, config: &MkTabConfig) -> MkTabResult<Self> {
        let mut file_manager = PagedFileManager::new(config.page_size);
        file_manager.create_file(&path)?;
        let file = file_manager.open_file(&path)?;
        let buffers = BufferManager::new(file_manager, config.cache_pages)?;

        log::debug!(
            "created index file {} with {}-byte pages",
            path.as_ref().display(),
            config.page_size
        );

        Ok(Self {
            buffers: Mutex::new(buffers),
            file,
            page_size: config.page_size,
            node_count: 0,
        })
    }

    /// Open an index file written earlier with the same page size
    pub fn open<P: AsRef<Path>>(path: P, config: &MkTabConfig) -> MkTabResult<Self> {
        let mut file_manager = PagedFileManager::new(config.page_size);
        let file = file_manager.open_file(&path)?;
        let buffers = BufferManager::new(file_manager, config.cache_pages)?;

        let mut storage = Self {
            buffers: Mutex::new(buffers),
            file,
            page_size: config.page_size,
            node_count: 0,
        };

        let header = storage.read_header()?.ok_or_else(|| {
            MkTabError::Deserialization(format!(
                "{} has no tree header",
                path.as_ref().display()
            ))
        })?;
        if header.page_size != config.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: header.page_size,
                actual: config.page_size,
            }
            .into());
        }
        storage.node_count = header.node_count;

        Ok(storage)
    }

    fn write_page(&self, page_id: PageId, bytes: &[u8]) -> MkTabResult<()> {
        let mut buffers = self.buffers.lock();
        let page = buffers.get_page_mut(self.file, page_id)?;
        page[..bytes.len()].copy_from_slice(bytes);
        page[bytes.len()..].fill(0);
        Ok(())
    }
}

impl NodeStorage for PagedNodeStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_node(&self, id: NodeId) -> MkTabResult<MkTabNode> {
        if id >= self.node_count {
            return Err(MkTabError::NodeNotFound(id));
        }

        let mut buffers = self.buffers.lock();
        let page = buffers.get_page(self.file, node_page(id))?;
        let node = deserialize_node(page)?;
        if node.id != id {
            return Err(MkTabError::Deserialization(format!(
                "page of node {id} holds node {}",
                node.id
            )));
        }
        Ok(node)
    }

    fn write_node(&mut self, node: &MkTabNode) -> MkTabResult<()> {
        if node.id >= self.node_count {
            return Err(MkTabError::NodeNotFound(node.id));
        }
        let bytes = serialize_node(node)?;
        check_fits(node.id, bytes.len(), self.page_size)?;
        self.write_page(node_page(node.id), &bytes)
    }

    fn allocate_node_id(&mut self) -> MkTabResult<NodeId> {
        let id = self.node_count;
        self.node_count += 1;
        Ok(id)
    }

    fn node_count(&self) -> usize {
        self.node_count
    }

    fn write_header(&mut self, header: &TreeHeader) -> MkTabResult<()> {
        let bytes = serialize_header(header)?;
        if bytes.len() > self.page_size {
            return Err(MkTabError::InvalidConfig(format!(
                "tree header needs {} bytes, pages hold {}",
                bytes.len(),
                self.page_size
            )));
        }
        self.write_page(HEADER_PAGE, &bytes)?;
        log::debug!(
            "wrote header: {} nodes, {} objects",
            header.node_count,
            header.object_count
        );
        Ok(())
    }

    fn read_header(&self) -> MkTabResult<Option<TreeHeader>> {
        let mut buffers = self.buffers.lock();
        let page = buffers.get_page(self.file, HEADER_PAGE)?;
        if page.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        deserialize_header(page).map(Some)
    }

    fn flush(&mut self) -> MkTabResult<()> {
        self.buffers.get_mut().flush_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtree::{DirectoryEntry, LeafEntry};
    use crate::relation::ObjectId;
    use tempfile::TempDir;

    fn config() -> MkTabConfig {
        MkTabConfig::new(512, 2).cache_pages(4)
    }

    #[test]
    fn test_nodes_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.mktab");

        let mut leaf = MkTabNode::new_leaf(1);
        leaf.add_entry(LeafEntry::new(ObjectId(5), vec![1.0, 2.0]).into());
        let mut root = MkTabNode::new_directory(0);
        root.add_entry(DirectoryEntry::new(ObjectId(5), 0.0, 1, 0.0, 2).into());

        {
            let mut storage = PagedNodeStorage::create(&path, &config()).unwrap();
            assert_eq!(storage.allocate_node_id().unwrap(), 0);
            assert_eq!(storage.allocate_node_id().unwrap(), 1);
            storage.write_node(&root).unwrap();
            storage.write_node(&leaf).unwrap();
            storage
                .write_header(&TreeHeader {
                    page_size: 512,
                    k_max: 2,
                    node_count: 2,
                    object_count: 1,
                    distance: "absolute".to_string(),
                })
                .unwrap();
            storage.flush().unwrap();
        }

        let storage = PagedNodeStorage::open(&path, &config()).unwrap();
        assert_eq!(storage.node_count(), 2);
        assert_eq!(storage.read_node(0).unwrap(), root);
        assert_eq!(storage.read_node(1).unwrap(), leaf);
        assert!(matches!(
            storage.read_node(2),
            Err(MkTabError::NodeNotFound(2))
        ));
    }

    #[test]
    fn test_more_nodes_than_cache_pages() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.mktab");
        let mut storage = PagedNodeStorage::create(&path, &config()).unwrap();

        for i in 0..20u32 {
            let id = storage.allocate_node_id().unwrap();
            let mut node = MkTabNode::new_leaf(id);
            node.add_entry(LeafEntry::new(ObjectId(i), vec![f64::from(i), 0.0]).into());
            storage.write_node(&node).unwrap();
        }

        for i in 0..20u32 {
            let node = storage.read_node(i as usize).unwrap();
            assert_eq!(node.entries[0].routing_object(), Some(ObjectId(i)));
        }
    }

    #[test]
    fn test_oversized_node_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.mktab");
        let mut storage = PagedNodeStorage::create(&path, &config()).unwrap();

        let id = storage.allocate_node_id().unwrap();
        let mut node = MkTabNode::new_leaf(id);
        for i in 0..20 {
            node.add_entry(LeafEntry::new(ObjectId(i), vec![0.0, 0.0]).into());
        }

        assert!(matches!(
            storage.write_node(&node),
            Err(MkTabError::NodeOverflow { .. })
        ));
    }

    #[test]
    fn test_open_with_other_page_size_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.mktab");
        {
            let mut storage = PagedNodeStorage::create(&path, &config()).unwrap();
            storage
                .write_header(&TreeHeader {
                    page_size: 512,
                    k_max: 2,
                    node_count: 0,
                    object_count: 0,
                    distance: "absolute".to_string(),
                })
                .unwrap();
            storage.flush().unwrap();
        }

        let result = PagedNodeStorage::open(&path, &MkTabConfig::new(1024, 2));
        assert!(matches!(
            result,
            Err(MkTabError::Storage(StorageError::InvalidPageSize { .. }))
        ));
    }

    #[test]
    fn test_fresh_file_has_no_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.mktab");
        let storage = PagedNodeStorage::create(&path, &config()).unwrap();

        assert_eq!(storage.read_header().unwrap(), None);
    }
}

use lru::LruCache;
use std::num::NonZeroUsize;

use super::PageId;
use super::error::{StorageError, StorageResult};
use super::file_manager::{FileHandle, PagedFileManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    file: FileHandle,
    page_id: PageId,
}

struct BufferEntry {
    data: Vec<u8>,
    dirty: bool,
}

/// LRU page cache in front of a [`PagedFileManager`]
///
/// Dirty pages are written back on eviction, on `flush_all`, and on drop.
pub struct BufferManager {
    file_manager: PagedFileManager,
    /// Page data and recency order in a single map
    pool: LruCache<BufferKey, BufferEntry>,
    /// Recycled page buffer so loads after an eviction do not allocate
    spare: Vec<u8>,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager, capacity: usize) -> StorageResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(StorageError::EmptyBufferPool)?;
        let page_size = file_manager.page_size();
        Ok(Self {
            file_manager,
            pool: LruCache::new(capacity),
            spare: vec![0u8; page_size],
        })
    }

    pub fn page_size(&self) -> usize {
        self.file_manager.page_size()
    }

    /// Get a page, loading it from disk on a miss
    pub fn get_page(&mut self, file: FileHandle, page_id: PageId) -> StorageResult<&[u8]> {
        let key = BufferKey { file, page_id };

        if !self.pool.contains(&key) {
            self.load_page(key)?;
        }

        self.pool
            .get(&key)
            .map(|entry| entry.data.as_slice())
            .ok_or(StorageError::PageNotFound(page_id))
    }

    /// Get a page for writing; the page is marked dirty
    pub fn get_page_mut(&mut self, file: FileHandle, page_id: PageId) -> StorageResult<&mut [u8]> {
        let key = BufferKey { file, page_id };

        if !self.pool.contains(&key) {
            self.load_page(key)?;
        }

        let entry = self
            .pool
            .get_mut(&key)
            .ok_or(StorageError::PageNotFound(page_id))?;
        entry.dirty = true;
        Ok(&mut entry.data)
    }

    pub fn flush_page(&mut self, file: FileHandle, page_id: PageId) -> StorageResult<()> {
        let key = BufferKey { file, page_id };

        if let Some(entry) = self.pool.peek_mut(&key)
            && entry.dirty
        {
            self.file_manager.write_page(file, page_id, &entry.data)?;
            entry.dirty = false;
        }

        Ok(())
    }

    /// Write back every dirty page and sync the files
    pub fn flush_all(&mut self) -> StorageResult<()> {
        let dirty: Vec<BufferKey> = self
            .pool
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            self.flush_page(key.file, key.page_id)?;
        }

        self.file_manager.sync_all()
    }

    /// Drop a page from the pool, writing it back first if dirty
    pub fn evict_page(&mut self, file: FileHandle, page_id: PageId) -> StorageResult<()> {
        self.flush_page(file, page_id)?;
        self.pool.pop(&BufferKey { file, page_id });
        Ok(())
    }

    pub fn cached_pages(&self) -> usize {
        self.pool.len()
    }

    pub fn is_page_cached(&self, file: FileHandle, page_id: PageId) -> bool {
        self.pool.contains(&BufferKey { file, page_id })
    }

    pub fn dirty_page_count(&self) -> usize {
        self.pool.iter().filter(|(_, e)| e.dirty).count()
    }

    fn load_page(&mut self, key: BufferKey) -> StorageResult<()> {
        if self.pool.len() >= self.pool.cap().get() {
            self.evict_lru_page()?;
        }

        let page_size = self.page_size();
        let mut data = std::mem::take(&mut self.spare);
        if data.len() != page_size {
            data = vec![0u8; page_size];
        }

        self.file_manager.read_page(key.file, key.page_id, &mut data)?;
        self.pool.put(key, BufferEntry { data, dirty: false });

        Ok(())
    }

    fn evict_lru_page(&mut self) -> StorageResult<()> {
        if let Some((key, entry)) = self.pool.pop_lru() {
            if entry.dirty {
                self.file_manager
                    .write_page(key.file, key.page_id, &entry.data)?;
            }
            self.spare = entry.data;
        }

        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

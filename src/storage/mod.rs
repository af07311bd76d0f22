//! Paged storage: fixed-size pages in a file, cached by an LRU buffer pool.
//!
//! Unlike a database-wide page size, every file manager here carries its own
//! page size, because the index derives its node capacities from it.

mod buffer_manager;
mod error;
mod file_manager;

pub use buffer_manager::BufferManager;
pub use error::{StorageError, StorageResult};
pub use file_manager::{FileHandle, PagedFileManager};

/// Default page size in bytes
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages kept in the buffer pool
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Page ID type
pub type PageId = usize;

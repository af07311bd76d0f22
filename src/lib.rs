pub mod config;
pub mod distance;
pub mod index;
pub mod mtree;
pub mod relation;
pub mod storage;

pub use config::{DEFAULT_K_MAX, MkTabConfig, RknnPruning};
pub use distance::{AbsoluteDistance, DistanceFunction, EuclideanDistance, ManhattanDistance};
pub use index::{MemoryNodeStorage, NodeStorage, PagedNodeStorage, TreeHeader};
pub use mtree::{
    DirectoryEntry, LeafEntry, MkTabEntry, MkTabError, MkTabNode, MkTabResult, MkTabTree,
    NodeCapacity, NodeCounts, NodeId, QueryResult,
};
pub use relation::{MemoryRelation, ObjectId, Relation};
pub use storage::{
    BufferManager, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE, FileHandle, PagedFileManager,
    StorageError, StorageResult,
};

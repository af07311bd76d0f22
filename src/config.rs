//! Tree configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::mtree::{MkTabResult, NodeCapacity};
use crate::storage::{DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};

/// Default largest k supported by reverse k-NN queries
pub const DEFAULT_K_MAX: usize = 10;

/// Which aggregate bound prunes a child subtree during a reverse k-NN search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RknnPruning {
    /// Compare a child's minimum distance against the bound of the node
    /// containing it. Sound, but looser than necessary.
    #[default]
    NodeBound,
    /// Compare a child's minimum distance against the child's own bound
    EntryBound,
}

/// Everything needed to lay out and search an MkTab tree
///
/// The distance function is not part of the configuration; it is handed to
/// the tree constructor next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MkTabConfig {
    /// Bytes per page; one node occupies one page
    pub page_size: usize,
    /// Largest k for which reverse k-NN queries are answered
    pub k_max: usize,
    /// Pages held by the buffer pool of paged storage
    pub cache_pages: usize,
    pub rknn_pruning: RknnPruning,
}

impl Default for MkTabConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            k_max: DEFAULT_K_MAX,
            cache_pages: DEFAULT_CACHE_PAGES,
            rknn_pruning: RknnPruning::NodeBound,
        }
    }
}

impl MkTabConfig {
    pub fn new(page_size: usize, k_max: usize) -> Self {
        Self {
            page_size,
            k_max,
            ..Self::default()
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn k_max(mut self, k_max: usize) -> Self {
        self.k_max = k_max;
        self
    }

    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn rknn_pruning(mut self, pruning: RknnPruning) -> Self {
        self.rknn_pruning = pruning;
        self
    }

    /// Check the configuration by planning the node capacities
    pub fn validate(&self) -> MkTabResult<NodeCapacity> {
        NodeCapacity::plan(self.page_size, self.k_max)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MkTabResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json(&self) -> MkTabResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtree::MkTabError;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MkTabConfig = serde_json::from_str(r#"{"k_max": 3}"#).unwrap();

        assert_eq!(config.k_max, 3);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.rknn_pruning, RknnPruning::NodeBound);
    }

    #[test]
    fn test_pruning_mode_from_json() {
        let config: MkTabConfig =
            serde_json::from_str(r#"{"rknn_pruning": "entry_bound"}"#).unwrap();
        assert_eq!(config.rknn_pruning, RknnPruning::EntryBound);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mktab.json");
        let config = MkTabConfig::new(2048, 4).cache_pages(16);

        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(MkTabConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_tiny_pages() {
        let result = MkTabConfig::new(64, 8).validate();
        assert!(matches!(result, Err(MkTabError::InvalidConfig(_))));
    }
}

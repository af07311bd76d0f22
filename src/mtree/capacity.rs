//! Node capacities derived from the page size and k_max

use super::error::{MkTabError, MkTabResult};

/// Bytes of an object identifier
pub const OBJECT_ID_SIZE: usize = 4;
/// Bytes of a distance value
pub const DISTANCE_SIZE: usize = 8;
/// Bytes of a node identifier
pub const NODE_ID_SIZE: usize = 4;
/// Bytes of the per-entry k_max field
pub const K_MAX_SIZE: usize = 4;

/// Per-node overhead: page index (4), entry count (4), node id (4), leaf flag (1 bit)
pub const NODE_OVERHEAD: f64 = 12.125;

/// Bytes in front of the first entry of a node page: kind (1), count (4), id (4)
pub const NODE_HEADER_SIZE: usize = 9;

/// Capacities below this still work but give a poor fan-out
const LOW_CAPACITY: usize = 10;

/// Serialized size of a leaf entry
pub fn leaf_entry_size(k_max: usize) -> usize {
    OBJECT_ID_SIZE + DISTANCE_SIZE + K_MAX_SIZE + k_max * DISTANCE_SIZE
}

/// Serialized size of a directory entry
pub fn directory_entry_size(k_max: usize) -> usize {
    OBJECT_ID_SIZE + NODE_ID_SIZE + DISTANCE_SIZE + DISTANCE_SIZE + K_MAX_SIZE + k_max * DISTANCE_SIZE
}

/// Leaf and directory capacities of one tree
///
/// A node overflows, and is split, once it holds `capacity` entries, so a
/// stored node never has more than `capacity - 1`. Directory nodes are the
/// exception at capacity 2, where splitting three entries leaves two in one
/// half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacity {
    pub leaf: usize,
    pub directory: usize,
}

impl NodeCapacity {
    /// Plan the capacities, failing when a page cannot hold two entries or
    /// a root with two directory entries
    pub fn plan(page_size: usize, k_max: usize) -> MkTabResult<Self> {
        if k_max == 0 {
            return Err(MkTabError::InvalidConfig(
                "k_max must be at least 1".to_string(),
            ));
        }

        let usable = page_size as f64 - NODE_OVERHEAD;
        if usable < 0.0 {
            return Err(MkTabError::InvalidConfig(format!(
                "page size of {page_size} bytes is smaller than the node overhead"
            )));
        }

        let leaf = (usable / leaf_entry_size(k_max) as f64).floor() as usize + 1;
        let directory = (usable / directory_entry_size(k_max) as f64).floor() as usize + 1;

        let kinds = [("directory", directory), ("leaf", leaf)];
        for (kind, capacity) in kinds {
            if capacity <= 1 {
                return Err(MkTabError::InvalidConfig(format!(
                    "page size of {page_size} bytes is too small for k_max = {k_max} \
                     ({kind} capacity would be {capacity})"
                )));
            }
        }

        // A grown root always holds two directory entries
        let root_size = NODE_HEADER_SIZE + 2 * directory_entry_size(k_max);
        if root_size > page_size {
            return Err(MkTabError::InvalidConfig(format!(
                "page size of {page_size} bytes is too small for k_max = {k_max} \
                 (a root with two directory entries needs {root_size} bytes)"
            )));
        }

        for (kind, capacity) in kinds {
            if capacity < LOW_CAPACITY {
                log::warn!(
                    "page size {page_size} is small: at most {} entries per {kind} node",
                    capacity - 1
                );
            }
        }

        Ok(Self { leaf, directory })
    }

    pub fn for_node(&self, is_leaf: bool) -> usize {
        if is_leaf { self.leaf } else { self.directory }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_for_4k_pages() {
        let capacity = NodeCapacity::plan(4096, 5).unwrap();
        assert_eq!(capacity.leaf, 73);
        assert_eq!(capacity.directory, 61);
    }

    #[test]
    fn test_entry_sizes() {
        assert_eq!(leaf_entry_size(5), 56);
        assert_eq!(directory_entry_size(5), 68);
    }

    #[test]
    fn test_capacity_of_one_is_rejected() {
        // (100 - 12.125) / (28 + 80) < 1, so the directory capacity is 1
        let result = NodeCapacity::plan(100, 10);
        assert!(matches!(result, Err(MkTabError::InvalidConfig(_))));
    }

    #[test]
    fn test_smallest_accepted_page() {
        // Directory entries with k_max = 1 need 36 bytes, a two-entry root 81
        assert!(NodeCapacity::plan(48, 1).is_err());
        assert!(matches!(
            NodeCapacity::plan(49, 1),
            Err(MkTabError::InvalidConfig(_))
        ));
        assert!(NodeCapacity::plan(80, 1).is_err());

        let capacity = NodeCapacity::plan(81, 1).unwrap();
        assert_eq!(capacity.directory, 2);
        assert_eq!(capacity.leaf, 3);
    }

    #[test]
    fn test_low_capacity_is_accepted() {
        // (200 - 12.125) / (28 + 16) gives a directory capacity of 5
        let capacity = NodeCapacity::plan(200, 2).unwrap();
        assert_eq!(capacity.leaf, 6);
        assert_eq!(capacity.directory, 5);
    }

    #[test]
    fn test_zero_k_max_rejected() {
        assert!(matches!(
            NodeCapacity::plan(4096, 0),
            Err(MkTabError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_page_smaller_than_overhead() {
        assert!(NodeCapacity::plan(8, 1).is_err());
    }

    #[test]
    fn test_for_node() {
        let capacity = NodeCapacity::plan(4096, 5).unwrap();
        assert_eq!(capacity.for_node(true), 73);
        assert_eq!(capacity.for_node(false), 61);
    }
}

use std::io;
use thiserror::Error;

use super::node::NodeId;
use crate::relation::ObjectId;
use crate::storage::StorageError;

/// Errors raised while building, storing or querying an MkTab tree
#[derive(Debug, Error)]
pub enum MkTabError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Invalid k: {k} (must be between 1 and k_max = {k_max})")]
    InvalidK { k: usize, k_max: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Node {node} needs {size} bytes but pages hold {page_size}")]
    NodeOverflow {
        node: NodeId,
        size: usize,
        page_size: usize,
    },

    #[error("Invalid magic number in index header")]
    InvalidMagic,

    #[error("Unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Tree was built with distance '{expected}', not '{actual}'")]
    DistanceMismatch { expected: String, actual: String },

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),
}

pub type MkTabResult<T> = Result<T, MkTabError>;

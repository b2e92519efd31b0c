//! Error types.
//!
//! Traversal itself never fails towards the caller: malformed data resolves
//! to "no hit" and resource exhaustion fails closed. The errors here cover
//! loading and validating scene buffers and configuration, plus the internal
//! reason a walk was abandoned.

use std::path::PathBuf;

use thiserror::Error;

/// Problems found in scene buffers at load/validation time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("root node {0} is out of range")]
    InvalidRoot(i32),

    #[error("node {node} references child {child} which is out of range")]
    InvalidChild { node: usize, child: i32 },

    #[error("leaf {leaf} has primitive range {start}..{end} outside {len} primitives")]
    InvalidLeafRange {
        leaf: usize,
        start: i32,
        end: i32,
        len: usize,
    },

    #[error("leaf {leaf} references object {object} which does not exist")]
    InvalidInstance { leaf: usize, object: u32 },

    #[error("primitive {prim} references {what} {index} which is out of range")]
    InvalidPrimitive {
        prim: usize,
        what: &'static str,
        index: u32,
    },

    #[error("primitive arrays have mismatched lengths")]
    MismatchedPrimitiveArrays,

    #[error("object {object} has invalid data: {reason}")]
    InvalidObject { object: usize, reason: &'static str },

    #[error("{what} has {steps} motion steps, at least 2 are required")]
    TooFewMotionSteps { what: &'static str, steps: u32 },

    #[error("node count {0} collides with the traversal sentinel")]
    TooManyNodes(usize),

    #[error("cannot read {what} from {len} bytes: {reason}")]
    InvalidBytes {
        what: &'static str,
        len: usize,
        reason: String,
    },
}

/// Result type for scene buffer operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Problems loading traversal configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why a walk stopped before completing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalError {
    #[error("traversal stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },

    #[error("instance nesting deeper than {max_depth}")]
    InstanceDepthExceeded { max_depth: usize },
}

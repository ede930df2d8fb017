//! Error types.
//!
//! Lookups that can simply miss return `Option`. The variants here cover
//! misuse of handles, copy-on-write ownership mistakes, propagation that could
//! not produce a complete order, and bad configuration.

use thiserror::Error;

use crate::graph::{NodeHandle, UnresolvedCycle};
use crate::id::DataBlockId;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced by the dependency graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A handle does not name a node of this graph.
    #[error("node handle {0:?} does not belong to this graph")]
    InvalidHandle(NodeHandle),

    /// No data-block node is registered for the identity.
    #[error("no node registered for data-block {0}")]
    UnknownIdentity(DataBlockId),

    /// The graph was built without copy-on-write.
    #[error("copy-on-write is disabled for this graph")]
    CopyOnWriteDisabled,

    /// A working copy was handed out or freed twice.
    #[error("working copy {0} was already released")]
    SnapshotDoubleRelease(DataBlockId),

    /// Propagation left operations that could not be ordered.
    #[error(
        "unresolved dependency cycle: {} operations in cycle, {} blocked behind it",
        .0.cyclic().len(),
        .0.blocked().len()
    )]
    UnresolvedCycle(UnresolvedCycle),

    /// Configuration could not be parsed.
    #[error("invalid graph configuration: {0}")]
    Config(#[from] serde_json::Error),
}

//! Depsgraph Core
//!
//! This crate provides the incremental dependency graph used to re-evaluate a
//! scene after edits. It implements:
//!
//! - A node registry with exactly one node per data-block
//! - A relation store with symmetric adjacency lists and optional deduplication
//! - Copy-on-write working copies bound one-to-one to data-block nodes
//! - Entry tagging and propagation into a topologically ordered update set
//! - Property lookups through an embedder-supplied resolver
//!
//! Evaluating operations is not part of this crate. An evaluator takes the
//! order produced by propagation and runs each operation once all of its
//! inputs are done.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Nodes, relations, propagation and queries
//! - `cow`: Working-copy lifecycle and teardown hooks
//! - `id`: Data-block handles
//! - `hooks`: Process-wide editor notification slots
//! - `config`: Construction-time settings
//!
//! # Example
//!
//! ```rust,ignore
//! use depsgraph_core::{Depsgraph, GraphConfig, DataBlockId, DataCategory};
//! use depsgraph_core::graph::{ComponentKind, OperationCode};
//!
//! let mut graph = Depsgraph::new(GraphConfig::default());
//!
//! // One object with a two-step transform
//! let object = graph.add_id_node(DataBlockId::new(DataCategory::Object, 1), false);
//! let transform = graph.add_component(object, ComponentKind::Transform, "")?;
//! let local = graph.add_operation(transform, OperationCode::TransformLocal, "", -1)?;
//! let finish = graph.add_operation(transform, OperationCode::TransformFinal, "", -1)?;
//! graph.add_relation(local, finish, "Local -> Final", true)?;
//!
//! // The location changed
//! graph.add_entry_tag(local);
//! let order = graph.propagate().into_result()?;
//! assert_eq!(order, vec![local, finish]);
//! ```

pub mod config;
pub mod cow;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod id;

pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{Depsgraph, GraphStats, SharedDepsgraph};
pub use id::{DataBlockId, DataCategory};

//! Graph Configuration
//!
//! Settings that are fixed when a graph is constructed. Copy-on-write mode in
//! particular is chosen per graph, so graphs with different modes can live
//! side by side.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Construction-time settings of a [`Depsgraph`](crate::graph::Depsgraph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Human-readable name used in log output.
    pub name: String,

    /// Whether data-block nodes materialize working copies.
    pub copy_on_write: bool,

    /// Number of data-block nodes to reserve room for up front.
    pub id_node_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            name: "Depsgraph".to_owned(),
            copy_on_write: false,
            id_node_capacity: 0,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_copy_on_write(mut self, enabled: bool) -> Self {
        self.copy_on_write = enabled;
        self
    }
}

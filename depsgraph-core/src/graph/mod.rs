//! Dependency Graph
//!
//! This module implements the dependency graph that records which computed
//! aspects of a scene's data-blocks depend on which others.
//!
//! # Overview
//!
//! The graph is made of:
//!
//! - Data-block nodes ([`IdNode`]), one per distinct [`DataBlockId`]
//! - Components inside them ([`ComponentNode`]), one per evaluated aspect
//! - Operations inside components ([`OperationNode`]), the schedulable units
//! - A singleton [`TimeSourceNode`] feeding everything that varies with time
//! - Directed [`Relation`]s: if A must run before B, there is a relation A -> B
//!
//! External mutators tag operations through [`Depsgraph::add_entry_tag`].
//! [`Depsgraph::propagate`] then expands the tags into every operation
//! reachable from them and sorts that set topologically.
//!
//! # Design Decisions
//!
//! 1. Data-block nodes live in an identity-keyed `IndexMap`. Looking up a
//!    node and inserting it go through the same entry, so a second node for
//!    one identity can never be created.
//!
//! 2. Nodes are addressed by index handles rather than references. Nothing is
//!    removed until the whole graph is cleared, so indices stay valid.
//!
//! 3. The graph owns every relation. Nodes keep both incoming and outgoing
//!    relation ids, which keeps forward and backward walks O(degree).
//!
//! # Concurrency
//!
//! Structural edits and tagging need `&mut Depsgraph`; queries take `&self`
//! and may run concurrently with each other. [`SharedDepsgraph`] packages the
//! graph behind a lock for embedders that share it between threads.

mod node;
mod query;
mod relation;
mod scheduler;
mod shared;

pub use node::{
    ComponentHandle, ComponentKey, ComponentKind, ComponentNode, IdNode, IdNodeIndex, Links,
    NodeHandle, OperationCode, OperationHandle, OperationKey, OperationNode, TimeSourceNode,
};
pub use query::{OperationSelector, PropertyResolver, ResolvedPath, TableResolver};
pub use relation::{Relation, RelationFlags, RelationId};
pub use scheduler::{PropagationOutcome, UnresolvedCycle};
pub use shared::SharedDepsgraph;

use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, debug_span, trace, warn};

use crate::config::GraphConfig;
use crate::cow::{
    EmptyExpander, SnapshotExpander, TeardownHook, TeardownOrder, TeardownRegistry, WorkingCopy,
};
use crate::error::{GraphError, Result};
use crate::id::{DataBlockId, DataCategory};
use node::{ComponentKeyRef, OperationKeyRef};

/// Counts describing the current state of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub id_nodes: usize,
    pub components: usize,
    pub operations: usize,
    /// Relations still linked into both endpoints.
    pub relations: usize,
    pub entry_tags: usize,
    pub expanded_copies: usize,
    pub has_time_source: bool,
}

/// The dependency graph.
pub struct Depsgraph {
    config: GraphConfig,
    id_nodes: IndexMap<DataBlockId, IdNode>,
    time_source: Option<TimeSourceNode>,
    relations: Vec<Relation>,
    entry_tags: IndexSet<OperationHandle>,
    expander: Arc<dyn SnapshotExpander>,
    teardown: TeardownRegistry,
}

impl std::fmt::Debug for Depsgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depsgraph")
            .field("name", &self.config.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Depsgraph {
    /// Create an empty graph.
    pub fn new(config: GraphConfig) -> Self {
        debug!(graph = %config.name, copy_on_write = config.copy_on_write, "creating dependency graph");
        Self {
            id_nodes: IndexMap::with_capacity(config.id_node_capacity),
            config,
            time_source: None,
            relations: Vec::new(),
            entry_tags: IndexSet::new(),
            expander: Arc::new(EmptyExpander),
            teardown: TeardownRegistry::new(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Whether data-block nodes materialize working copies.
    pub fn uses_copy_on_write(&self) -> bool {
        self.config.copy_on_write
    }

    /// Install the expander used to materialize working copies.
    pub fn set_snapshot_expander(&mut self, expander: impl SnapshotExpander + 'static) {
        self.expander = Arc::new(expander);
    }

    /// Install the teardown hook for one data category.
    pub fn set_teardown_hook(&mut self, category: DataCategory, hook: TeardownHook) {
        self.teardown.register(category, hook);
    }

    // Node registry ------------------------------------------------------

    /// Get the node for `identity`, creating it on first reference.
    ///
    /// When `tag_dirty` is set the node is tagged, whether it is new or not.
    /// A new node gets an unexpanded working-copy placeholder.
    pub fn add_id_node(&mut self, identity: DataBlockId, tag_dirty: bool) -> IdNodeIndex {
        self.add_id_node_with_copy(identity, tag_dirty, None)
    }

    /// Like [`add_id_node`](Self::add_id_node), adopting an existing working
    /// copy instead of expanding a new one.
    ///
    /// `hint` is usually a copy taken out of a previous graph with
    /// [`take_working_copy`](Self::take_working_copy). It is bound as the
    /// node's expanded copy only when the node is new, copy-on-write is
    /// enabled and the copy belongs to `identity`. Otherwise it is dropped
    /// and the node behaves as if no hint was given.
    pub fn add_id_node_with_copy(
        &mut self,
        identity: DataBlockId,
        tag_dirty: bool,
        hint: Option<WorkingCopy>,
    ) -> IdNodeIndex {
        debug_assert!(
            !identity.is_working_copy(),
            "working copy {identity} registered as an original"
        );
        let copy_on_write = self.config.copy_on_write;
        match self.id_nodes.entry(identity) {
            Entry::Occupied(mut entry) => {
                let node = entry.get_mut();
                if tag_dirty {
                    node.tag();
                }
                if hint.is_some() {
                    trace!(%identity, "node exists, ignoring working-copy hint");
                }
                node.index()
            }
            Entry::Vacant(entry) => {
                let index = IdNodeIndex(entry.index() as u32);
                let node = entry.insert(IdNode::new(index, identity));
                if tag_dirty {
                    node.tag();
                }
                match hint {
                    Some(copy) if copy_on_write && copy.is_adoptable_for(identity) => {
                        trace!(copy = %copy.id(), "adopted working copy");
                        node.working_copy = copy;
                    }
                    Some(copy) => {
                        warn!(
                            %identity,
                            copy = %copy.id(),
                            "working-copy hint does not fit, dropping it"
                        );
                    }
                    None => {}
                }
                trace!(%identity, index = index.0, "added id node");
                index
            }
        }
    }

    /// Look up the node for `identity` without side effects.
    pub fn find_id_node(&self, identity: DataBlockId) -> Option<&IdNode> {
        self.id_nodes.get(&identity)
    }

    pub fn id_node(&self, index: IdNodeIndex) -> Option<&IdNode> {
        self.id_nodes.get_index(index.0 as usize).map(|(_, node)| node)
    }

    pub fn id_node_mut(&mut self, index: IdNodeIndex) -> Option<&mut IdNode> {
        self.id_nodes.get_index_mut(index.0 as usize).map(|(_, node)| node)
    }

    /// All data-block nodes in creation order.
    pub fn id_nodes(&self) -> impl Iterator<Item = &IdNode> {
        self.id_nodes.values()
    }

    pub fn id_node_count(&self) -> usize {
        self.id_nodes.len()
    }

    /// Get the component `(kind, name)` of a node, creating it if needed.
    pub fn add_component(
        &mut self,
        id_node: IdNodeIndex,
        kind: ComponentKind,
        name: &str,
    ) -> Result<ComponentHandle> {
        let node = self
            .id_node_mut(id_node)
            .ok_or(GraphError::InvalidHandle(NodeHandle::IdNode(id_node)))?;
        if let Some((index, _, _)) = node.components.get_full(&ComponentKeyRef { kind, name }) {
            return Ok(ComponentHandle {
                id_node,
                component: index as u32,
            });
        }
        let handle = ComponentHandle {
            id_node,
            component: node.components.len() as u32,
        };
        let key = ComponentKey::new(kind, name);
        trace!(identity = %node.identity(), component = %key, "added component");
        node.components
            .insert(key.clone(), ComponentNode::new(handle, key));
        Ok(handle)
    }

    pub fn find_component(
        &self,
        id_node: IdNodeIndex,
        kind: ComponentKind,
        name: &str,
    ) -> Option<&ComponentNode> {
        self.id_node(id_node)?.find_component(kind, name)
    }

    pub fn component(&self, handle: ComponentHandle) -> Option<&ComponentNode> {
        self.id_node(handle.id_node)?
            .components
            .get_index(handle.component as usize)
            .map(|(_, component)| component)
    }

    fn component_mut(&mut self, handle: ComponentHandle) -> Option<&mut ComponentNode> {
        self.id_node_mut(handle.id_node)?
            .components
            .get_index_mut(handle.component as usize)
            .map(|(_, component)| component)
    }

    /// Get the operation `(code, name, tag)` of a component, creating it if
    /// needed. Adding an existing operation returns it unchanged.
    pub fn add_operation(
        &mut self,
        component: ComponentHandle,
        code: OperationCode,
        name: &str,
        tag: i32,
    ) -> Result<OperationHandle> {
        let node = self
            .component_mut(component)
            .ok_or(GraphError::InvalidHandle(NodeHandle::Component(component)))?;
        let lookup = OperationKeyRef { code, name, tag };
        if let Some((index, _, _)) = node.operations.get_full(&lookup) {
            trace!(component = %node.key(), code = %code, operation = name, "operation already exists");
            return Ok(OperationHandle {
                component,
                operation: index as u32,
            });
        }
        let handle = OperationHandle {
            component,
            operation: node.operations.len() as u32,
        };
        let key = OperationKey::new(code, name, tag);
        node.operations
            .insert(key.clone(), OperationNode::new(handle, key));
        Ok(handle)
    }

    pub fn find_operation(
        &self,
        component: ComponentHandle,
        code: OperationCode,
        name: &str,
        tag: i32,
    ) -> Option<&OperationNode> {
        self.component(component)?.find_operation(code, name, tag)
    }

    pub fn operation(&self, handle: OperationHandle) -> Option<&OperationNode> {
        self.component(handle.component)?
            .operations
            .get_index(handle.operation as usize)
            .map(|(_, op)| op)
    }

    pub fn operation_mut(&mut self, handle: OperationHandle) -> Option<&mut OperationNode> {
        self.component_mut(handle.component)?
            .operations
            .get_index_mut(handle.operation as usize)
            .map(|(_, op)| op)
    }

    /// Designate the operation incoming component-level relations attach to.
    pub fn set_entry_operation(&mut self, operation: OperationHandle) -> Result<()> {
        self.designate(operation, |component, index| component.entry_operation = Some(index))
    }

    /// Designate the operation outgoing component-level relations leave from.
    pub fn set_exit_operation(&mut self, operation: OperationHandle) -> Result<()> {
        self.designate(operation, |component, index| component.exit_operation = Some(index))
    }

    fn designate(
        &mut self,
        operation: OperationHandle,
        apply: impl FnOnce(&mut ComponentNode, u32),
    ) -> Result<()> {
        if self.operation(operation).is_none() {
            return Err(GraphError::InvalidHandle(NodeHandle::Operation(operation)));
        }
        let component = self
            .component_mut(operation.component)
            .ok_or(GraphError::InvalidHandle(NodeHandle::Operation(operation)))?;
        apply(component, operation.operation);
        Ok(())
    }

    /// Get the time source, creating it on first use.
    pub fn add_time_source(&mut self) -> NodeHandle {
        if self.time_source.is_none() {
            trace!("added time source");
            self.time_source = Some(TimeSourceNode::default());
        }
        NodeHandle::TimeSource
    }

    pub fn find_time_source(&self) -> Option<&TimeSourceNode> {
        self.time_source.as_ref()
    }

    pub(crate) fn links(&self, node: NodeHandle) -> Option<&Links> {
        match node {
            NodeHandle::TimeSource => self.time_source.as_ref().map(|ts| &ts.links),
            NodeHandle::IdNode(index) => self.id_node(index).map(|n| &n.links),
            NodeHandle::Component(handle) => self.component(handle).map(|c| &c.links),
            NodeHandle::Operation(handle) => self.operation(handle).map(|op| &op.links),
        }
    }

    pub(crate) fn links_mut(&mut self, node: NodeHandle) -> Option<&mut Links> {
        match node {
            NodeHandle::TimeSource => self.time_source.as_mut().map(|ts| &mut ts.links),
            NodeHandle::IdNode(index) => self.id_node_mut(index).map(|n| &mut n.links),
            NodeHandle::Component(handle) => self.component_mut(handle).map(|c| &mut c.links),
            NodeHandle::Operation(handle) => self.operation_mut(handle).map(|op| &mut op.links),
        }
    }

    /// Whether `node` names a live node of this graph.
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.links(node).is_some()
    }

    // Copy-on-write ------------------------------------------------------

    /// Handle the evaluator should use for `identity`.
    ///
    /// With copy-on-write disabled, or for data-blocks without a node, this
    /// is `identity` itself. Otherwise the node's working copy is expanded on
    /// first request and its handle returned.
    pub fn get_cow_id(&mut self, identity: DataBlockId) -> DataBlockId {
        if !self.config.copy_on_write {
            return identity;
        }
        let Some(node) = self.id_nodes.get_mut(&identity) else {
            if !identity.is_working_copy() {
                trace!(%identity, "copy-on-write request for unregistered data-block");
            }
            return identity;
        };
        node.working_copy.ensure_expanded(self.expander.as_ref());
        node.working_copy.id()
    }

    /// The working copy bound to `identity`, if a node exists.
    pub fn working_copy(&self, identity: DataBlockId) -> Option<&WorkingCopy> {
        self.find_id_node(identity).map(IdNode::working_copy)
    }

    /// Mutable access to an expanded working copy's state.
    pub fn working_copy_mut(&mut self, identity: DataBlockId) -> Option<&mut WorkingCopy> {
        self.id_nodes
            .get_mut(&identity)
            .map(|node| &mut node.working_copy)
    }

    /// Hand the working copy of `identity` over to the caller.
    ///
    /// The copy is expanded first if needed. Afterwards the graph records it
    /// as transferred and teardown leaves it alone.
    pub fn take_working_copy(&mut self, identity: DataBlockId) -> Result<WorkingCopy> {
        if !self.config.copy_on_write {
            return Err(GraphError::CopyOnWriteDisabled);
        }
        let node = self
            .id_nodes
            .get_mut(&identity)
            .ok_or(GraphError::UnknownIdentity(identity))?;
        let copy = node.working_copy.transfer(self.expander.as_ref())?;
        debug!(copy = %copy.id(), "working copy transferred out of the graph");
        Ok(copy)
    }

    // Lifecycle ----------------------------------------------------------

    /// Destroy every data-block node, relation and entry tag.
    ///
    /// Expanded working copies are released first, deferred categories last.
    /// The time source survives but loses its relations.
    pub fn clear_id_nodes(&mut self) {
        let _span = debug_span!("clear_id_nodes", graph = %self.config.name, id_nodes = self.id_nodes.len()).entered();
        if self.config.copy_on_write {
            self.release_working_copies();
        }
        self.id_nodes.clear();
        self.relations.clear();
        self.entry_tags.clear();
        if let Some(time_source) = &mut self.time_source {
            time_source.links.clear();
            time_source.tagged = false;
        }
    }

    fn release_working_copies(&mut self) {
        let mut released = 0usize;
        for pass in [TeardownOrder::Immediate, TeardownOrder::Deferred] {
            for node in self.id_nodes.values_mut() {
                let hook = self.teardown.hook_for(node.identity().category());
                if hook.order() != pass {
                    continue;
                }
                if node.working_copy.release(hook) {
                    released += 1;
                }
            }
        }
        debug!(released, "released working copies");
    }

    /// Destroy every node including the time source.
    ///
    /// The graph is empty afterwards and can be rebuilt.
    pub fn clear_all_nodes(&mut self) {
        self.clear_id_nodes();
        self.time_source = None;
    }

    /// Counts describing the graph.
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            id_nodes: self.id_nodes.len(),
            relations: self.relations.iter().filter(|r| r.is_linked()).count(),
            entry_tags: self.entry_tags.len(),
            has_time_source: self.time_source.is_some(),
            ..GraphStats::default()
        };
        for node in self.id_nodes.values() {
            stats.components += node.components.len();
            stats.operations += node.operations().count();
            if node.working_copy.is_expanded() {
                stats.expanded_copies += 1;
            }
        }
        stats
    }
}

impl Default for Depsgraph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl Drop for Depsgraph {
    fn drop(&mut self) {
        if !self.entry_tags.is_empty() {
            warn!(pending = self.entry_tags.len(), "dropping graph with unpropagated entry tags");
        }
        self.clear_all_nodes();
    }
}

//! Relations
//!
//! A relation is a directed edge `from -> to`: `to` must be evaluated after
//! `from`, and a change to `from` makes `to` stale.
//!
//! The graph owns every [`Relation`]. Endpoints only store the relation's id,
//! once in the source's `outlinks` and once in the target's `inlinks`. Both
//! entries are added together when the relation is created and removed
//! together by [`Depsgraph::unlink`]; a relation never sits in one list
//! without the other.

use std::fmt;
use std::ops::BitOr;

use tracing::trace;

use super::node::{ComponentHandle, NodeHandle};
use super::Depsgraph;
use crate::error::{GraphError, Result};

/// Identifier of a relation inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub(crate) u32);

impl RelationId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Flag word attached to a relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelationFlags(u32);

impl RelationFlags {
    pub const NONE: Self = Self(0);

    /// The relation closes a dependency cycle found during propagation.
    pub const CYCLIC: Self = Self(1 << 0);

    /// The relation orders evaluation but does not spread update tags.
    pub const NO_FLUSH: Self = Self(1 << 1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RelationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A directed dependency between two nodes.
#[derive(Debug, Clone)]
pub struct Relation {
    id: RelationId,
    from: NodeHandle,
    to: NodeHandle,
    name: String,
    flags: RelationFlags,
    linked: bool,
}

impl Relation {
    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn from(&self) -> NodeHandle {
        self.from
    }

    pub fn to(&self) -> NodeHandle {
        self.to
    }

    /// Human-readable description.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> RelationFlags {
        self.flags
    }

    /// Whether the relation is still registered in its endpoints.
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?} ({})", self.from, self.to, self.name)
    }
}

impl Depsgraph {
    /// Add a relation `from -> to`.
    ///
    /// With `check_unique`, an existing linked relation between the same
    /// endpoints with the same description is returned instead of creating
    /// a duplicate. Relations with different descriptions are always kept
    /// apart.
    pub fn add_relation(
        &mut self,
        from: impl Into<NodeHandle>,
        to: impl Into<NodeHandle>,
        description: &str,
        check_unique: bool,
    ) -> Result<RelationId> {
        let (from, to) = (from.into(), to.into());
        if !self.contains(from) {
            return Err(GraphError::InvalidHandle(from));
        }
        if !self.contains(to) {
            return Err(GraphError::InvalidHandle(to));
        }
        if check_unique {
            if let Some(existing) = self.check_nodes_connected(from, to, Some(description)) {
                return Ok(existing);
            }
        }

        let id = RelationId(self.relations.len() as u32);
        self.relations.push(Relation {
            id,
            from,
            to,
            name: description.to_owned(),
            flags: RelationFlags::NONE,
            linked: true,
        });
        // Both endpoints were checked above.
        if let Some(links) = self.links_mut(from) {
            links.outlinks.push(id);
        }
        if let Some(links) = self.links_mut(to) {
            links.inlinks.push(id);
        }
        trace!(?from, ?to, description, "added relation");
        Ok(id)
    }

    /// Add a relation between two components.
    ///
    /// The edge is attached at operation level: from the exit operation of
    /// `from` to the entry operation of `to`. A component without operations
    /// is linked as a whole.
    pub fn add_component_relation(
        &mut self,
        from: ComponentHandle,
        to: ComponentHandle,
        description: &str,
        check_unique: bool,
    ) -> Result<RelationId> {
        let source = self
            .component(from)
            .ok_or(GraphError::InvalidHandle(NodeHandle::Component(from)))?;
        let source = source
            .exit_operation()
            .map_or(NodeHandle::Component(from), NodeHandle::Operation);
        let target = self
            .component(to)
            .ok_or(GraphError::InvalidHandle(NodeHandle::Component(to)))?;
        let target = target
            .entry_operation()
            .map_or(NodeHandle::Component(to), NodeHandle::Operation);
        self.add_relation(source, target, description, check_unique)
    }

    /// Find a linked relation `from -> to`.
    ///
    /// `description` of `None` matches any relation between the two nodes.
    pub fn check_nodes_connected(
        &self,
        from: NodeHandle,
        to: NodeHandle,
        description: Option<&str>,
    ) -> Option<RelationId> {
        let links = self.links(from)?;
        links.outlinks.iter().copied().find(|&id| {
            let relation = &self.relations[id.0 as usize];
            debug_assert_eq!(relation.from, from);
            relation.to == to && description.map_or(true, |d| relation.name == d)
        })
    }

    /// Remove a relation from both of its endpoints.
    ///
    /// The relation stays inspectable through [`Depsgraph::relation`].
    /// Returns `false` if it was not linked.
    ///
    /// Storage for unlinked relations is not reused, so a [`RelationId`]
    /// never changes meaning. It is reclaimed by
    /// [`clear_id_nodes`](Depsgraph::clear_id_nodes), which a rebuild goes
    /// through anyway.
    pub fn unlink(&mut self, id: RelationId) -> bool {
        let Some(relation) = self.relations.get_mut(id.0 as usize) else {
            return false;
        };
        if !relation.linked {
            return false;
        }
        relation.linked = false;
        let (from, to) = (relation.from, relation.to);
        if let Some(links) = self.links_mut(from) {
            links.outlinks.retain(|r| *r != id);
        }
        if let Some(links) = self.links_mut(to) {
            links.inlinks.retain(|r| *r != id);
        }
        trace!(?from, ?to, "unlinked relation");
        true
    }

    pub fn relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(id.0 as usize)
    }

    /// Set `flags` on a relation in addition to those it already has.
    pub fn add_relation_flags(&mut self, id: RelationId, flags: RelationFlags) -> bool {
        match self.relations.get_mut(id.0 as usize) {
            Some(relation) => {
                relation.flags.insert(flags);
                true
            }
            None => false,
        }
    }

    /// All linked relations.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| r.linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ComponentKind, OperationCode, OperationHandle};
    use crate::id::{DataBlockId, DataCategory};

    fn two_operations(graph: &mut Depsgraph) -> (OperationHandle, OperationHandle) {
        let node = graph.add_id_node(DataBlockId::new(DataCategory::Object, 1), false);
        let transform = graph.add_component(node, ComponentKind::Transform, "").unwrap();
        let a = graph
            .add_operation(transform, OperationCode::TransformLocal, "", -1)
            .unwrap();
        let b = graph
            .add_operation(transform, OperationCode::TransformFinal, "", -1)
            .unwrap();
        (a, b)
    }

    fn occurrences(list: &[RelationId], id: RelationId) -> usize {
        list.iter().filter(|r| **r == id).count()
    }

    #[test]
    fn relation_is_registered_in_both_endpoints() {
        let mut graph = Depsgraph::default();
        let (a, b) = two_operations(&mut graph);

        let rel = graph.add_relation(a, b, "Local -> Final", false).unwrap();

        let from = graph.operation(a).unwrap().links();
        let to = graph.operation(b).unwrap().links();
        assert_eq!(occurrences(from.outlinks(), rel), 1);
        assert_eq!(occurrences(to.inlinks(), rel), 1);
        assert!(from.inlinks().is_empty());
        assert!(to.outlinks().is_empty());
    }

    #[test]
    fn unlink_removes_from_both_endpoints() {
        let mut graph = Depsgraph::default();
        let (a, b) = two_operations(&mut graph);
        let rel = graph.add_relation(a, b, "x", false).unwrap();

        assert!(graph.unlink(rel));
        assert!(!graph.unlink(rel));

        assert_eq!(occurrences(graph.operation(a).unwrap().links().outlinks(), rel), 0);
        assert_eq!(occurrences(graph.operation(b).unwrap().links().inlinks(), rel), 0);

        let relation = graph.relation(rel).unwrap();
        assert!(!relation.is_linked());
        assert_eq!(relation.name(), "x");
        assert_eq!(graph.relations().count(), 0);
    }

    #[test]
    fn check_unique_deduplicates_by_target_and_description() {
        let mut graph = Depsgraph::default();
        let (a, b) = two_operations(&mut graph);

        let first = graph.add_relation(a, b, "x", true).unwrap();
        let second = graph.add_relation(a, b, "x", true).unwrap();
        assert_eq!(first, second);

        let other = graph.add_relation(a, b, "y", true).unwrap();
        assert_ne!(first, other);

        let forced = graph.add_relation(a, b, "x", false).unwrap();
        assert_ne!(first, forced);
        assert_eq!(graph.relations().count(), 3);
    }

    #[test]
    fn unlinked_relation_is_not_reused() {
        let mut graph = Depsgraph::default();
        let (a, b) = two_operations(&mut graph);

        let first = graph.add_relation(a, b, "x", true).unwrap();
        graph.unlink(first);
        let second = graph.add_relation(a, b, "x", true).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut graph = Depsgraph::default();
        let (a, _) = two_operations(&mut graph);

        let err = graph
            .add_relation(NodeHandle::TimeSource, a, "Time", false)
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidHandle(NodeHandle::TimeSource)));

        graph.add_time_source();
        assert!(graph.add_relation(NodeHandle::TimeSource, a, "Time", false).is_ok());
    }

    #[test]
    fn component_relation_uses_exit_and_entry_operations() {
        let mut graph = Depsgraph::default();
        let object = graph.add_id_node(DataBlockId::new(DataCategory::Object, 1), false);
        let mesh = graph.add_id_node(DataBlockId::new(DataCategory::Mesh, 2), false);

        let transform = graph.add_component(object, ComponentKind::Transform, "").unwrap();
        let local = graph
            .add_operation(transform, OperationCode::TransformLocal, "", -1)
            .unwrap();
        let last = graph
            .add_operation(transform, OperationCode::TransformFinal, "", -1)
            .unwrap();
        let geometry = graph.add_component(mesh, ComponentKind::Geometry, "").unwrap();
        let eval = graph
            .add_operation(geometry, OperationCode::GeometryEval, "", -1)
            .unwrap();

        let rel = graph
            .add_component_relation(transform, geometry, "Transform -> Geometry", false)
            .unwrap();
        let relation = graph.relation(rel).unwrap();
        assert_eq!(relation.from(), NodeHandle::Operation(last));
        assert_eq!(relation.to(), NodeHandle::Operation(eval));

        graph.set_exit_operation(local).unwrap();
        let rel = graph
            .add_component_relation(transform, geometry, "Local -> Geometry", false)
            .unwrap();
        assert_eq!(graph.relation(rel).unwrap().from(), NodeHandle::Operation(local));

        let shading = graph.add_component(mesh, ComponentKind::Shading, "").unwrap();
        let rel = graph
            .add_component_relation(geometry, shading, "Geometry -> Shading", false)
            .unwrap();
        assert_eq!(graph.relation(rel).unwrap().to(), NodeHandle::Component(shading));
    }

    #[test]
    fn flags_combine() {
        let mut flags = RelationFlags::NONE;
        assert!(flags.is_empty());
        flags.insert(RelationFlags::CYCLIC);
        assert!(flags.contains(RelationFlags::CYCLIC));
        assert!(!flags.contains(RelationFlags::NO_FLUSH));
        assert!((RelationFlags::CYCLIC | RelationFlags::NO_FLUSH).contains(RelationFlags::NO_FLUSH));
        flags.remove(RelationFlags::CYCLIC);
        assert!(flags.is_empty());
    }
}

//! Property Queries
//!
//! Editors and animation systems know which property changed, not which graph
//! node computes it. A [`PropertyResolver`] supplied by the embedder maps a
//! property reference to a [`ResolvedPath`]; [`Depsgraph::find_node`] walks
//! that path through the graph.
//!
//! Queries never create nodes. A missing data-block, component or operation
//! simply yields `None`.

use std::collections::HashMap;
use std::hash::Hash;

use super::node::{ComponentKind, NodeHandle, OperationCode};
use super::Depsgraph;
use crate::id::DataBlockId;

/// Operation part of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSelector {
    pub code: OperationCode,
    pub name: String,
    pub tag: i32,
}

/// Location of the node responsible for a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub identity: DataBlockId,
    pub component: ComponentKind,
    pub sub_name: String,
    /// `None` selects the component as a whole.
    pub operation: Option<OperationSelector>,
}

impl ResolvedPath {
    /// Path to the unnamed component `kind` of `identity`.
    pub fn component(identity: DataBlockId, kind: ComponentKind) -> Self {
        Self {
            identity,
            component: kind,
            sub_name: String::new(),
            operation: None,
        }
    }

    pub fn with_sub_name(mut self, sub_name: impl Into<String>) -> Self {
        self.sub_name = sub_name.into();
        self
    }

    pub fn with_operation(mut self, code: OperationCode, name: impl Into<String>, tag: i32) -> Self {
        self.operation = Some(OperationSelector {
            code,
            name: name.into(),
            tag,
        });
        self
    }
}

/// Maps property references to graph paths.
///
/// Implemented by the embedding application; the graph never interprets
/// property references itself.
pub trait PropertyResolver {
    /// The embedder's notion of a property reference.
    type Property: ?Sized;

    /// Locate the node computing `property`, if any.
    fn resolve(&self, property: &Self::Property) -> Option<ResolvedPath>;
}

/// Resolver backed by an explicit lookup table.
#[derive(Debug, Clone)]
pub struct TableResolver<K> {
    entries: HashMap<K, ResolvedPath>,
}

impl<K: Hash + Eq> TableResolver<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Map `property` to `path`, returning the previous mapping.
    pub fn insert(&mut self, property: K, path: ResolvedPath) -> Option<ResolvedPath> {
        self.entries.insert(property, path)
    }

    pub fn remove(&mut self, property: &K) -> Option<ResolvedPath> {
        self.entries.remove(property)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Hash + Eq> Default for TableResolver<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq> PropertyResolver for TableResolver<K> {
    type Property = K;

    fn resolve(&self, property: &K) -> Option<ResolvedPath> {
        self.entries.get(property).cloned()
    }
}

impl Depsgraph {
    /// Find the node responsible for `property`.
    pub fn find_node<R>(&self, resolver: &R, property: &R::Property) -> Option<NodeHandle>
    where
        R: PropertyResolver + ?Sized,
    {
        let path = resolver.resolve(property)?;
        self.find_path(&path)
    }

    /// Walk a resolved path through the graph.
    pub fn find_path(&self, path: &ResolvedPath) -> Option<NodeHandle> {
        let id_node = self.find_id_node(path.identity)?;
        let component = id_node.find_component(path.component, &path.sub_name)?;
        match &path.operation {
            None => Some(NodeHandle::Component(component.handle())),
            Some(selector) => component
                .find_operation(selector.code, &selector.name, selector.tag)
                .map(|op| NodeHandle::Operation(op.handle())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DataCategory;

    fn armature() -> DataBlockId {
        DataBlockId::new(DataCategory::Object, 3)
    }

    fn rigged_graph() -> Depsgraph {
        let mut graph = Depsgraph::default();
        let node = graph.add_id_node(armature(), false);
        let bone = graph.add_component(node, ComponentKind::Bone, "hand").unwrap();
        graph
            .add_operation(bone, OperationCode::BoneConstraints, "IK", 0)
            .unwrap();
        graph
    }

    #[test]
    fn resolves_component_path() {
        let graph = rigged_graph();
        let mut resolver = TableResolver::new();
        resolver.insert(
            "pose.bones[\"hand\"]",
            ResolvedPath::component(armature(), ComponentKind::Bone).with_sub_name("hand"),
        );

        let found = graph.find_node(&resolver, &"pose.bones[\"hand\"]");
        let expected = graph
            .find_component(graph.find_id_node(armature()).unwrap().index(), ComponentKind::Bone, "hand")
            .unwrap()
            .handle();
        assert_eq!(found, Some(NodeHandle::Component(expected)));
    }

    #[test]
    fn resolves_operation_path() {
        let graph = rigged_graph();
        let path = ResolvedPath::component(armature(), ComponentKind::Bone)
            .with_sub_name("hand")
            .with_operation(OperationCode::BoneConstraints, "IK", 0);

        assert!(matches!(graph.find_path(&path), Some(NodeHandle::Operation(_))));

        let wrong_tag = path.clone().with_operation(OperationCode::BoneConstraints, "IK", 1);
        assert_eq!(graph.find_path(&wrong_tag), None);
    }

    #[test]
    fn missing_steps_yield_none_without_allocating() {
        let graph = rigged_graph();
        let before = graph.stats();

        let unknown_id = ResolvedPath::component(DataBlockId::new(DataCategory::Mesh, 99), ComponentKind::Geometry);
        let unknown_component = ResolvedPath::component(armature(), ComponentKind::Bone).with_sub_name("foot");
        assert_eq!(graph.find_path(&unknown_id), None);
        assert_eq!(graph.find_path(&unknown_component), None);

        let resolver: TableResolver<u32> = TableResolver::new();
        assert_eq!(graph.find_node(&resolver, &7), None);

        assert_eq!(graph.stats(), before);
    }
}

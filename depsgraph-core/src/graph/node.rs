//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph and
//! the handles used to address them.
//!
//! # Ownership
//!
//! Nodes form a strict tree of ownership:
//!
//! - The graph owns one [`IdNode`] per data-block.
//! - An [`IdNode`] owns its [`ComponentNode`]s.
//! - A [`ComponentNode`] owns its [`OperationNode`]s.
//!
//! Each level stores its children in an `IndexMap`, so a child's position is
//! a stable index for the lifetime of the graph (nodes are only ever removed
//! all at once). Handles are built from those indices and carry no borrow,
//! which lets relations refer to nodes without owning them.

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::{Equivalent, IndexMap};
use smallvec::SmallVec;

use super::relation::RelationId;
use crate::cow::WorkingCopy;
use crate::id::DataBlockId;

/// Adjacency list storage. Most nodes have only a handful of relations.
pub(crate) type LinkList = SmallVec<[RelationId; 4]>;

/// Index of an [`IdNode`] inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdNodeIndex(pub(crate) u32);

impl IdNodeIndex {
    /// Get the raw index value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Handle to a [`ComponentNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentHandle {
    pub(crate) id_node: IdNodeIndex,
    pub(crate) component: u32,
}

impl ComponentHandle {
    /// The data-block node owning this component.
    pub fn id_node(&self) -> IdNodeIndex {
        self.id_node
    }
}

/// Handle to an [`OperationNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationHandle {
    pub(crate) component: ComponentHandle,
    pub(crate) operation: u32,
}

impl OperationHandle {
    /// The component owning this operation.
    pub fn component(&self) -> ComponentHandle {
        self.component
    }

    /// The data-block node owning this operation's component.
    pub fn id_node(&self) -> IdNodeIndex {
        self.component.id_node
    }
}

/// Any node that can be the endpoint of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHandle {
    /// The graph-wide time source.
    TimeSource,
    /// A data-block node.
    IdNode(IdNodeIndex),
    /// A component inside a data-block node.
    Component(ComponentHandle),
    /// A single schedulable operation.
    Operation(OperationHandle),
}

impl From<IdNodeIndex> for NodeHandle {
    fn from(index: IdNodeIndex) -> Self {
        Self::IdNode(index)
    }
}

impl From<ComponentHandle> for NodeHandle {
    fn from(handle: ComponentHandle) -> Self {
        Self::Component(handle)
    }
}

impl From<OperationHandle> for NodeHandle {
    fn from(handle: OperationHandle) -> Self {
        Self::Operation(handle)
    }
}

/// Incoming and outgoing relations of a node.
///
/// Both lists hold non-owning relation ids. The relation store keeps them
/// symmetric: a relation listed in `outlinks` of its source is always listed
/// in `inlinks` of its target, and vice versa.
#[derive(Debug, Default)]
pub struct Links {
    pub(crate) inlinks: LinkList,
    pub(crate) outlinks: LinkList,
}

impl Links {
    /// Relations ending at this node.
    pub fn inlinks(&self) -> &[RelationId] {
        &self.inlinks
    }

    /// Relations starting at this node.
    pub fn outlinks(&self) -> &[RelationId] {
        &self.outlinks
    }

    pub(crate) fn clear(&mut self) {
        self.inlinks.clear();
        self.outlinks.clear();
    }
}

/// The aspect of a data-block a component evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// Generic properties without a more specific home.
    Parameters,
    /// Animation data (actions, drivers).
    Animation,
    /// Object-level transform.
    Transform,
    /// Evaluated geometry (modifiers, shape keys).
    Geometry,
    /// A single sequencer strip.
    Sequencer,
    /// Material and shading data.
    Shading,
    /// Point cache.
    Cache,
    /// Armature pose evaluation as a whole.
    EvalPose,
    /// A single bone; the sub-name is the bone name.
    Bone,
    /// A particle system.
    ParticleSystem,
    /// Working-copy maintenance.
    CopyOnWrite,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parameters => "Parameters",
            Self::Animation => "Animation",
            Self::Transform => "Transform",
            Self::Geometry => "Geometry",
            Self::Sequencer => "Sequencer",
            Self::Shading => "Shading",
            Self::Cache => "Cache",
            Self::EvalPose => "Eval Pose",
            Self::Bone => "Bone",
            Self::ParticleSystem => "Particle System",
            Self::CopyOnWrite => "Copy-on-Write",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationCode {
    /// Placeholder step with no specific meaning.
    Operation,
    ParametersEval,
    AnimationEval,
    DriverEval,
    TransformLocal,
    TransformParent,
    TransformConstraints,
    TransformFinal,
    GeometryEval,
    BoneLocal,
    BonePoseParent,
    BoneConstraints,
    BoneDone,
    PoseInit,
    PoseDone,
    ParticleSystemEval,
    ShadingEval,
    SequencerEval,
    CopyOnWrite,
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Key of a component inside its data-block node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub kind: ComponentKind,
    pub name: String,
}

impl ComponentKey {
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}[{}]", self.kind, self.name)
        }
    }
}

/// Borrowed form of [`ComponentKey`] for allocation-free lookups.
///
/// Hashes exactly like [`ComponentKey`] (a `&str` hashes like a `String`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ComponentKeyRef<'a> {
    pub(crate) kind: ComponentKind,
    pub(crate) name: &'a str,
}

impl Equivalent<ComponentKey> for ComponentKeyRef<'_> {
    fn equivalent(&self, key: &ComponentKey) -> bool {
        self.kind == key.kind && self.name == key.name
    }
}

/// Key of an operation inside its component.
///
/// The `tag` disambiguates operations sharing code and name, such as one
/// step per constraint. `-1` means "no tag".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationKey {
    pub code: OperationCode,
    pub name: String,
    pub tag: i32,
}

impl OperationKey {
    pub fn new(code: OperationCode, name: impl Into<String>, tag: i32) -> Self {
        Self {
            code,
            name: name.into(),
            tag,
        }
    }
}

impl Hash for OperationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.name.as_str().hash(state);
        self.tag.hash(state);
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code, self.name)?;
        if self.tag != -1 {
            write!(f, "#{}", self.tag)?;
        }
        Ok(())
    }
}

/// Borrowed form of [`OperationKey`].
pub(crate) struct OperationKeyRef<'a> {
    pub(crate) code: OperationCode,
    pub(crate) name: &'a str,
    pub(crate) tag: i32,
}

impl Hash for OperationKeyRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.name.hash(state);
        self.tag.hash(state);
    }
}

impl Equivalent<OperationKey> for OperationKeyRef<'_> {
    fn equivalent(&self, key: &OperationKey) -> bool {
        self.code == key.code && self.tag == key.tag && self.name == key.name
    }
}

/// The singleton node all time-dependent evaluation hangs off.
#[derive(Debug, Default)]
pub struct TimeSourceNode {
    pub(crate) links: Links,
    pub(crate) tagged: bool,
}

impl TimeSourceNode {
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Whether a time change is pending propagation.
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }
}

/// A data-block node.
#[derive(Debug)]
pub struct IdNode {
    index: IdNodeIndex,
    identity: DataBlockId,
    pub(crate) working_copy: WorkingCopy,
    pub(crate) components: IndexMap<ComponentKey, ComponentNode>,
    pub(crate) links: Links,
    tagged: bool,
    eval_flags: u32,
}

impl IdNode {
    pub(crate) fn new(index: IdNodeIndex, identity: DataBlockId) -> Self {
        Self {
            index,
            identity,
            working_copy: WorkingCopy::placeholder(identity),
            components: IndexMap::new(),
            links: Links::default(),
            tagged: false,
            eval_flags: 0,
        }
    }

    pub fn index(&self) -> IdNodeIndex {
        self.index
    }

    /// The original data-block this node stands for.
    pub fn identity(&self) -> DataBlockId {
        self.identity
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Whether the node was tagged by `add_id_node(.., true)`.
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    pub(crate) fn tag(&mut self) {
        self.tagged = true;
    }

    pub fn clear_tag(&mut self) {
        self.tagged = false;
    }

    /// Evaluation flags owned by the embedding evaluator.
    ///
    /// The graph stores them and never interprets them.
    pub fn eval_flags(&self) -> u32 {
        self.eval_flags
    }

    pub fn set_eval_flags(&mut self, flags: u32) {
        self.eval_flags = flags;
    }

    pub fn find_component(&self, kind: ComponentKind, name: &str) -> Option<&ComponentNode> {
        self.components.get(&ComponentKeyRef { kind, name })
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentNode> {
        self.components.values()
    }

    /// All operations of all components, in creation order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationNode> {
        self.components.values().flat_map(|c| c.operations.values())
    }
}

/// A component node: one aspect of a data-block's evaluation.
#[derive(Debug)]
pub struct ComponentNode {
    handle: ComponentHandle,
    key: ComponentKey,
    pub(crate) operations: IndexMap<OperationKey, OperationNode>,
    pub(crate) entry_operation: Option<u32>,
    pub(crate) exit_operation: Option<u32>,
    pub(crate) links: Links,
}

impl ComponentNode {
    pub(crate) fn new(handle: ComponentHandle, key: ComponentKey) -> Self {
        Self {
            handle,
            key,
            operations: IndexMap::new(),
            entry_operation: None,
            exit_operation: None,
            links: Links::default(),
        }
    }

    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    pub fn key(&self) -> &ComponentKey {
        &self.key
    }

    pub fn kind(&self) -> ComponentKind {
        self.key.kind
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn find_operation(&self, code: OperationCode, name: &str, tag: i32) -> Option<&OperationNode> {
        self.operations.get(&OperationKeyRef { code, name, tag })
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationNode> {
        self.operations.values()
    }

    /// Operation that incoming component-level relations attach to.
    ///
    /// The designated entry if set, otherwise the first operation.
    pub fn entry_operation(&self) -> Option<OperationHandle> {
        let index = self.entry_operation.unwrap_or(0);
        self.operations.get_index(index as usize).map(|(_, op)| op.handle())
    }

    /// Operation that outgoing component-level relations leave from.
    ///
    /// The designated exit if set, otherwise the last operation.
    pub fn exit_operation(&self) -> Option<OperationHandle> {
        let exit = match self.exit_operation {
            Some(index) => self.operations.get_index(index as usize),
            None => self.operations.last(),
        };
        exit.map(|(_, op)| op.handle())
    }
}

/// The smallest schedulable unit of evaluation.
#[derive(Debug)]
pub struct OperationNode {
    handle: OperationHandle,
    key: OperationKey,
    pub(crate) links: Links,
    pub(crate) needs_update: bool,
}

impl OperationNode {
    pub(crate) fn new(handle: OperationHandle, key: OperationKey) -> Self {
        Self {
            handle,
            key,
            links: Links::default(),
            needs_update: false,
        }
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn code(&self) -> OperationCode {
        self.key.code
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn tag(&self) -> i32 {
        self.key.tag
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Whether propagation marked this operation for re-evaluation.
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Reset the re-evaluation mark once the evaluator has run this operation.
    pub fn clear_update(&mut self) {
        self.needs_update = false;
    }
}

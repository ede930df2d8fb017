//! Update Scheduler
//!
//! The scheduler turns the set of explicitly tagged operations into the full
//! set of operations that must re-run, and orders that set so dependencies
//! always run before their dependents.
//!
//! # Algorithm
//!
//! 1. Seed a worklist with every entry tag (plus the dependents of the time
//!    source when time changed)
//! 2. Pop an operation and follow its outgoing relations. Relations leaving
//!    its component or its data-block node apply to it as well. Targets that
//!    are components or data-block nodes stand for all operations they contain
//! 3. Every target not yet marked in this pass is marked and pushed
//! 4. Sort the marked set topologically (Kahn's algorithm), counting only
//!    relations between marked operations
//! 5. Whatever Kahn's algorithm cannot place is reported as an unresolved
//!    cycle instead of being dropped
//!
//! The per-pass marked set doubles as the cycle guard: an operation is pushed
//! at most once, so the walk terminates on graphs with feedback loops.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;
use tracing::{debug, debug_span, trace, warn};

use super::node::{NodeHandle, OperationHandle};
use super::relation::{Relation, RelationFlags, RelationId};
use super::Depsgraph;
use crate::error::{GraphError, Result};

/// Operations propagation could not order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedCycle {
    cyclic: Vec<OperationHandle>,
    blocked: Vec<OperationHandle>,
    relations: Vec<RelationId>,
}

impl UnresolvedCycle {
    /// Operations lying on a dependency cycle.
    pub fn cyclic(&self) -> &[OperationHandle] {
        &self.cyclic
    }

    /// Operations outside any cycle that depend on one.
    pub fn blocked(&self) -> &[OperationHandle] {
        &self.blocked
    }

    /// Relations running between members of the same cycle.
    pub fn relations(&self) -> &[RelationId] {
        &self.relations
    }

    /// Every operation left without a place in the order.
    pub fn operations(&self) -> impl Iterator<Item = OperationHandle> + '_ {
        self.cyclic.iter().chain(&self.blocked).copied()
    }

    pub fn len(&self) -> usize {
        self.cyclic.len() + self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, operation: OperationHandle) -> bool {
        self.cyclic.contains(&operation) || self.blocked.contains(&operation)
    }
}

/// Result of one propagation pass.
#[derive(Debug, Clone, Default)]
pub struct PropagationOutcome {
    marked: Vec<OperationHandle>,
    order: Vec<OperationHandle>,
    cycle: Option<UnresolvedCycle>,
}

impl PropagationOutcome {
    /// Every operation marked for re-evaluation, in discovery order.
    pub fn marked(&self) -> &[OperationHandle] {
        &self.marked
    }

    /// Marked operations in a valid execution order.
    ///
    /// When a cycle was found this covers only the acyclic part.
    pub fn order(&self) -> &[OperationHandle] {
        &self.order
    }

    pub fn cycle(&self) -> Option<&UnresolvedCycle> {
        self.cycle.as_ref()
    }

    /// Whether every marked operation got a place in the order.
    pub fn is_complete(&self) -> bool {
        self.cycle.is_none()
    }

    /// The execution order, or an error if part of it is unresolved.
    pub fn into_result(self) -> Result<Vec<OperationHandle>> {
        match self.cycle {
            None => Ok(self.order),
            Some(cycle) => Err(GraphError::UnresolvedCycle(cycle)),
        }
    }
}

impl Depsgraph {
    /// Mark an operation as changed.
    ///
    /// `None` and handles not belonging to this graph are ignored. Tagging
    /// the same operation twice has no further effect.
    pub fn add_entry_tag(&mut self, operation: impl Into<Option<OperationHandle>>) {
        let Some(operation) = operation.into() else {
            return;
        };
        if self.operation(operation).is_none() {
            warn!(?operation, "ignoring entry tag for unknown operation");
            return;
        }
        if self.entry_tags.insert(operation) {
            trace!(?operation, "added entry tag");
        }
    }

    /// Operations tagged since the last propagation.
    pub fn entry_tags(&self) -> impl Iterator<Item = OperationHandle> + '_ {
        self.entry_tags.iter().copied()
    }

    pub fn has_entry_tags(&self) -> bool {
        !self.entry_tags.is_empty()
    }

    /// Record a time change.
    ///
    /// The next propagation starts from everything the time source feeds.
    /// Does nothing if the graph has no time source.
    pub fn tag_time_source(&mut self) {
        match &mut self.time_source {
            Some(time_source) => time_source.tagged = true,
            None => trace!("time change on a graph without time source"),
        }
    }

    /// Clear the "needs update" mark of every operation.
    pub fn clear_update_tags(&mut self) {
        for node in self.id_nodes.values_mut() {
            for component in node.components.values_mut() {
                for operation in component.operations.values_mut() {
                    operation.needs_update = false;
                }
            }
        }
    }

    /// Expand the entry tags into the full set of stale operations and
    /// order it for evaluation.
    ///
    /// Always runs to completion. The entry tags and the time-source tag are
    /// consumed.
    pub fn propagate(&mut self) -> PropagationOutcome {
        let _span = debug_span!("propagate", entry_tags = self.entry_tags.len()).entered();

        let mut marked: IndexSet<OperationHandle> = IndexSet::new();
        let mut worklist: Vec<OperationHandle> = Vec::new();

        let mut seeds: Vec<OperationHandle> = self.entry_tags.iter().copied().collect();
        if let Some(time_source) = self.time_source.as_ref().filter(|ts| ts.tagged) {
            for &id in &time_source.links.outlinks {
                let relation = &self.relations[id.0 as usize];
                if !relation.flags().contains(RelationFlags::NO_FLUSH) {
                    self.expand_target(relation.to(), &mut |op| seeds.push(op));
                }
            }
        }
        for seed in seeds {
            if marked.insert(seed) {
                worklist.push(seed);
            }
        }

        while let Some(operation) = worklist.pop() {
            self.for_each_successor(operation, |target, relation| {
                if relation.flags().contains(RelationFlags::NO_FLUSH) {
                    return;
                }
                if marked.insert(target) {
                    worklist.push(target);
                }
            });
        }

        let (order, cycle) = self.topological_order(&marked);

        for &operation in &marked {
            if let Some(node) = self.operation_mut(operation) {
                node.needs_update = true;
            }
        }
        if let Some(cycle) = &cycle {
            warn!(
                cyclic = cycle.cyclic.len(),
                blocked = cycle.blocked.len(),
                "dependency cycle left operations unordered"
            );
            self.flag_cyclic_relations(cycle);
        }

        self.entry_tags.clear();
        if let Some(time_source) = &mut self.time_source {
            time_source.tagged = false;
        }

        debug!(marked = marked.len(), ordered = order.len(), "propagation finished");
        PropagationOutcome {
            marked: marked.into_iter().collect(),
            order,
            cycle,
        }
    }

    /// Call `visit` for every operation a target node stands for.
    fn expand_target(&self, target: NodeHandle, visit: &mut impl FnMut(OperationHandle)) {
        match target {
            NodeHandle::Operation(operation) => visit(operation),
            NodeHandle::Component(handle) => {
                if let Some(component) = self.component(handle) {
                    component.operations().for_each(|op| visit(op.handle()));
                }
            }
            NodeHandle::IdNode(index) => {
                if let Some(node) = self.id_node(index) {
                    node.operations().for_each(|op| visit(op.handle()));
                }
            }
            NodeHandle::TimeSource => {}
        }
    }

    /// Call `visit` for every operation directly downstream of `operation`.
    ///
    /// A successor reached through several relations is visited once per
    /// relation.
    fn for_each_successor(
        &self,
        operation: OperationHandle,
        mut visit: impl FnMut(OperationHandle, &Relation),
    ) {
        let sources = [
            NodeHandle::Operation(operation),
            NodeHandle::Component(operation.component),
            NodeHandle::IdNode(operation.component.id_node),
        ];
        for source in sources {
            let Some(links) = self.links(source) else {
                continue;
            };
            for &id in &links.outlinks {
                let relation = &self.relations[id.0 as usize];
                self.expand_target(relation.to(), &mut |target| visit(target, relation));
            }
        }
    }

    /// Kahn's algorithm restricted to `marked`.
    fn topological_order(
        &self,
        marked: &IndexSet<OperationHandle>,
    ) -> (Vec<OperationHandle>, Option<UnresolvedCycle>) {
        let mut in_degree: HashMap<OperationHandle, usize> =
            marked.iter().map(|&op| (op, 0)).collect();

        // Count only relations whose both ends are marked
        for &operation in marked {
            self.for_each_successor(operation, |target, _| {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree += 1;
                }
            });
        }

        let mut queue: VecDeque<OperationHandle> = marked
            .iter()
            .copied()
            .filter(|op| in_degree.get(op) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(marked.len());

        while let Some(operation) = queue.pop_front() {
            order.push(operation);
            self.for_each_successor(operation, |target, _| {
                if let Some(degree) = in_degree.get_mut(&target) {
                    if *degree > 0 {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(target);
                        }
                    }
                }
            });
        }

        if order.len() == marked.len() {
            return (order, None);
        }

        let residue: IndexSet<OperationHandle> = marked
            .iter()
            .copied()
            .filter(|op| in_degree.get(op).is_some_and(|d| *d > 0))
            .collect();
        (order, Some(self.split_residue(residue)))
    }

    /// Separate operations on a cycle from operations merely stuck behind one.
    ///
    /// An operation is cyclic when its strongly connected component within
    /// the residue has more than one member or it feeds itself. Everything
    /// else in the residue is only blocked.
    fn split_residue(&self, residue: IndexSet<OperationHandle>) -> UnresolvedCycle {
        let edges: Vec<Vec<(usize, RelationId)>> = residue
            .iter()
            .map(|&operation| {
                let mut targets = Vec::new();
                self.for_each_successor(operation, |target, relation| {
                    if let Some(index) = residue.get_index_of(&target) {
                        targets.push((index, relation.id()));
                    }
                });
                targets
            })
            .collect();
        let successors: Vec<Vec<usize>> = edges
            .iter()
            .map(|targets| targets.iter().map(|&(index, _)| index).collect())
            .collect();

        // Component label per residue entry, or None when not on a cycle
        let mut cycle_of: Vec<Option<usize>> = vec![None; residue.len()];
        for (label, component) in strongly_connected(&successors).into_iter().enumerate() {
            let on_cycle = match component.as_slice() {
                [single] => successors[*single].contains(single),
                _ => true,
            };
            if on_cycle {
                for member in component {
                    cycle_of[member] = Some(label);
                }
            }
        }

        let mut relations: IndexSet<RelationId> = IndexSet::new();
        for (from, targets) in edges.iter().enumerate() {
            let Some(label) = cycle_of[from] else {
                continue;
            };
            for &(to, relation) in targets {
                if cycle_of[to] == Some(label) {
                    relations.insert(relation);
                }
            }
        }

        let mut cyclic = Vec::new();
        let mut blocked = Vec::new();
        for (index, operation) in residue.into_iter().enumerate() {
            if cycle_of[index].is_some() {
                cyclic.push(operation);
            } else {
                blocked.push(operation);
            }
        }
        UnresolvedCycle {
            cyclic,
            blocked,
            relations: relations.into_iter().collect(),
        }
    }

    fn flag_cyclic_relations(&mut self, cycle: &UnresolvedCycle) {
        for &id in &cycle.relations {
            self.add_relation_flags(id, RelationFlags::CYCLIC);
        }
    }
}

/// Strongly connected components of a graph given as adjacency lists.
///
/// Tarjan's algorithm with an explicit call stack, so long chains cannot
/// overflow the thread stack. Runs in O(V + E).
fn strongly_connected(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let count = successors.len();
    let mut index = vec![UNVISITED; count];
    let mut low = vec![0; count];
    let mut on_stack = vec![false; count];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0;
    // (node, next successor to look at)
    let mut calls: Vec<(usize, usize)> = Vec::new();

    for root in 0..count {
        if index[root] != UNVISITED {
            continue;
        }
        calls.push((root, 0));
        while let Some(frame) = calls.last_mut() {
            let (node, edge) = *frame;
            if index[node] == UNVISITED {
                index[node] = next_index;
                low[node] = next_index;
                next_index += 1;
                stack.push(node);
                on_stack[node] = true;
            }
            if let Some(&next) = successors[node].get(edge) {
                frame.1 += 1;
                if index[next] == UNVISITED {
                    calls.push((next, 0));
                } else if on_stack[next] {
                    low[node] = low[node].min(index[next]);
                }
                continue;
            }

            calls.pop();
            if let Some(&(parent, _)) = calls.last() {
                low[parent] = low[parent].min(low[node]);
            }
            if low[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

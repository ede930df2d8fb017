//! Shared graph handle.
//!
//! The graph itself is not internally synchronized. Embedders that touch it
//! from several threads go through this handle: any number of concurrent
//! readers, or one writer for structural edits, tagging and propagation.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::scheduler::PropagationOutcome;
use super::Depsgraph;

/// Cloneable, lock-protected handle to a [`Depsgraph`].
#[derive(Debug, Clone)]
pub struct SharedDepsgraph {
    inner: Arc<RwLock<Depsgraph>>,
}

impl SharedDepsgraph {
    pub fn new(graph: Depsgraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Shared access for queries.
    pub fn read(&self) -> RwLockReadGuard<'_, Depsgraph> {
        self.inner.read()
    }

    /// Exclusive access for structural edits and tagging.
    pub fn write(&self) -> RwLockWriteGuard<'_, Depsgraph> {
        self.inner.write()
    }

    /// Run propagation under the write lock.
    pub fn propagate(&self) -> PropagationOutcome {
        self.inner.write().propagate()
    }
}

impl From<Depsgraph> for SharedDepsgraph {
    fn from(graph: Depsgraph) -> Self {
        Self::new(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ComponentKind, OperationCode};
    use crate::id::{DataBlockId, DataCategory};
    use std::thread;

    #[test]
    fn readers_run_concurrently_after_writes() {
        let shared = SharedDepsgraph::new(Depsgraph::default());
        {
            let mut graph = shared.write();
            for raw in 0..16 {
                let node = graph.add_id_node(DataBlockId::new(DataCategory::Object, raw), false);
                let comp = graph.add_component(node, ComponentKind::Transform, "").unwrap();
                graph
                    .add_operation(comp, OperationCode::TransformLocal, "", -1)
                    .unwrap();
            }
        }

        thread::scope(|scope| {
            for _ in 0..4 {
                let shared = shared.clone();
                scope.spawn(move || {
                    let graph = shared.read();
                    for raw in 0..16 {
                        assert!(graph
                            .find_id_node(DataBlockId::new(DataCategory::Object, raw))
                            .is_some());
                    }
                });
            }
        });

        let op = {
            let graph = shared.read();
            let node = graph
                .find_id_node(DataBlockId::new(DataCategory::Object, 0))
                .unwrap();
            let op = node.operations().next().unwrap().handle();
            op
        };
        shared.write().add_entry_tag(op);
        assert_eq!(shared.propagate().order(), &[op]);
    }
}

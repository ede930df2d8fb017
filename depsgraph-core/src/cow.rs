//! Copy-on-Write Binding
//!
//! Every data-block node owns exactly one [`WorkingCopy`]. It starts out as an
//! unexpanded placeholder and is materialized on first request through a
//! [`SnapshotExpander`] supplied by the embedder. The evaluator then mutates
//! the copy instead of the caller's original data-block.
//!
//! # Lifecycle
//!
//! ```text
//! Placeholder --expand--> Expanded --teardown--> Released
//!                             |
//!                             +--take_working_copy--> Transferred
//! ```
//!
//! A copy handed out of the graph is recorded as `Transferred`, so teardown
//! never frees it a second time.
//!
//! # Teardown
//!
//! Teardown runs in two passes. Categories registered with
//! [`TeardownOrder::Deferred`] are released after every other category; some
//! data categories reference other working copies and must go last. The
//! actual release work for a category is a pluggable callback.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::id::{DataBlockId, DataCategory};

/// Payload of an expanded working copy.
pub type SnapshotData = Box<dyn Any + Send + Sync>;

/// Materializes working copies from original data-blocks.
pub trait SnapshotExpander: Send + Sync {
    /// Build the working-copy payload for `original`.
    fn expand(&self, original: DataBlockId) -> SnapshotData;
}

impl<F> SnapshotExpander for F
where
    F: Fn(DataBlockId) -> SnapshotData + Send + Sync,
{
    fn expand(&self, original: DataBlockId) -> SnapshotData {
        self(original)
    }
}

/// Expander producing an empty payload.
///
/// Used when the embedder only needs the copy handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyExpander;

impl SnapshotExpander for EmptyExpander {
    fn expand(&self, _original: DataBlockId) -> SnapshotData {
        Box::new(())
    }
}

/// State of a working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Bound to its node but never materialized.
    Placeholder,
    /// Materialized and owned by the graph.
    Expanded,
    /// Handed to an external owner; the graph must not free it.
    Transferred,
    /// Freed by teardown.
    Released,
}

/// Working copy bound to a data-block node.
pub struct WorkingCopy {
    original: DataBlockId,
    state: CopyState,
    data: Option<SnapshotData>,
}

impl fmt::Debug for WorkingCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingCopy")
            .field("original", &self.original)
            .field("state", &self.state)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

impl WorkingCopy {
    pub(crate) fn placeholder(original: DataBlockId) -> Self {
        Self {
            original,
            state: CopyState::Placeholder,
            data: None,
        }
    }

    /// Handle of the copy.
    pub fn id(&self) -> DataBlockId {
        self.original.working_copy()
    }

    /// Handle of the data-block this copy was made from.
    pub fn original(&self) -> DataBlockId {
        self.original
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    pub fn is_expanded(&self) -> bool {
        self.state == CopyState::Expanded
    }

    pub fn data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.data.as_deref()
    }

    pub fn data_mut(&mut self) -> Option<&mut (dyn Any + Send + Sync)> {
        self.data.as_deref_mut()
    }

    /// Typed view of the payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data()?.downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data_mut()?.downcast_mut()
    }

    /// Consume the copy and return its payload.
    pub fn into_data(self) -> Option<SnapshotData> {
        self.data
    }

    /// Whether a node for `original` can take this copy over.
    pub(crate) fn is_adoptable_for(&self, original: DataBlockId) -> bool {
        self.original == original && self.state == CopyState::Expanded && self.data.is_some()
    }

    /// Materialize the copy if it is still a placeholder.
    ///
    /// Returns `true` when this call performed the expansion.
    pub(crate) fn ensure_expanded(&mut self, expander: &dyn SnapshotExpander) -> bool {
        if self.state != CopyState::Placeholder {
            return false;
        }
        self.data = Some(expander.expand(self.original));
        self.state = CopyState::Expanded;
        trace!(copy = %self.id(), "expanded working copy");
        true
    }

    /// Move the copy out to an external owner.
    pub(crate) fn transfer(&mut self, expander: &dyn SnapshotExpander) -> Result<WorkingCopy> {
        match self.state {
            CopyState::Transferred | CopyState::Released => {
                Err(GraphError::SnapshotDoubleRelease(self.id()))
            }
            CopyState::Placeholder | CopyState::Expanded => {
                self.ensure_expanded(expander);
                self.state = CopyState::Transferred;
                Ok(WorkingCopy {
                    original: self.original,
                    state: CopyState::Expanded,
                    data: self.data.take(),
                })
            }
        }
    }

    /// Free the copy through `hook` if the graph still owns an expanded copy.
    ///
    /// Returns `true` when the copy was released by this call.
    pub(crate) fn release(&mut self, hook: &TeardownHook) -> bool {
        match self.state {
            CopyState::Expanded => {
                let data = self.data.take().unwrap_or_else(|| Box::new(()));
                hook.run(self.id(), data);
                self.state = CopyState::Released;
                true
            }
            CopyState::Released => {
                debug_assert!(false, "working copy {} released twice", self.id());
                false
            }
            CopyState::Placeholder | CopyState::Transferred => false,
        }
    }
}

/// Pass in which a category's working copies are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOrder {
    /// Released in the first pass.
    Immediate,
    /// Released after every `Immediate` category.
    Deferred,
}

/// Callback releasing one working copy.
pub type ReleaseFn = Arc<dyn Fn(DataBlockId, SnapshotData) + Send + Sync>;

/// How working copies of one data category are torn down.
#[derive(Clone)]
pub struct TeardownHook {
    order: TeardownOrder,
    release: Option<ReleaseFn>,
}

impl fmt::Debug for TeardownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHook")
            .field("order", &self.order)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

static DEFAULT_HOOK: TeardownHook = TeardownHook::immediate();

impl TeardownHook {
    /// Release in the first pass by dropping the payload.
    pub const fn immediate() -> Self {
        Self {
            order: TeardownOrder::Immediate,
            release: None,
        }
    }

    /// Release in the second pass by dropping the payload.
    pub const fn deferred() -> Self {
        Self {
            order: TeardownOrder::Deferred,
            release: None,
        }
    }

    /// Release in the given pass through a custom callback.
    pub fn new<F>(order: TeardownOrder, release: F) -> Self
    where
        F: Fn(DataBlockId, SnapshotData) + Send + Sync + 'static,
    {
        Self {
            order,
            release: Some(Arc::new(release)),
        }
    }

    pub fn order(&self) -> TeardownOrder {
        self.order
    }

    fn run(&self, copy: DataBlockId, data: SnapshotData) {
        match &self.release {
            Some(release) => release(copy, data),
            None => drop(data),
        }
    }
}

/// Per-category teardown hooks.
#[derive(Debug, Clone, Default)]
pub struct TeardownRegistry {
    hooks: HashMap<DataCategory, TeardownHook>,
}

impl TeardownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the hook for `category`, replacing any previous one.
    pub fn register(&mut self, category: DataCategory, hook: TeardownHook) {
        self.hooks.insert(category, hook);
    }

    /// Hook for `category`; categories without one are released immediately.
    pub fn hook_for(&self, category: DataCategory) -> &TeardownHook {
        self.hooks.get(&category).unwrap_or(&DEFAULT_HOOK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mesh() -> DataBlockId {
        DataBlockId::new(DataCategory::Mesh, 1)
    }

    #[test]
    fn expansion_happens_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let expander = move |id: DataBlockId| -> SnapshotData {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Box::new(id.raw())
        };

        let mut copy = WorkingCopy::placeholder(mesh());
        assert!(copy.ensure_expanded(&expander));
        assert!(!copy.ensure_expanded(&expander));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(copy.downcast_ref::<u64>(), Some(&1));
        assert_eq!(copy.id(), mesh().working_copy());
    }

    #[test]
    fn placeholder_is_never_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = released.clone();
        let hook = TeardownHook::new(TeardownOrder::Immediate, move |_, _| {
            released_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut copy = WorkingCopy::placeholder(mesh());
        assert!(!copy.release(&hook));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(copy.state(), CopyState::Placeholder);
    }

    #[test]
    fn transferred_copy_is_skipped_by_teardown() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = released.clone();
        let hook = TeardownHook::new(TeardownOrder::Immediate, move |_, _| {
            released_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut copy = WorkingCopy::placeholder(mesh());
        let taken = copy.transfer(&EmptyExpander).unwrap();
        assert!(taken.is_expanded());
        assert!(taken.data().is_some());
        assert_eq!(copy.state(), CopyState::Transferred);

        assert!(!copy.release(&hook));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        let again = copy.transfer(&EmptyExpander);
        assert!(matches!(again, Err(GraphError::SnapshotDoubleRelease(id)) if id == mesh().working_copy()));
    }

    #[test]
    fn registry_falls_back_to_immediate() {
        let mut registry = TeardownRegistry::new();
        registry.register(DataCategory::ParticleSettings, TeardownHook::deferred());

        assert_eq!(
            registry.hook_for(DataCategory::ParticleSettings).order(),
            TeardownOrder::Deferred
        );
        assert_eq!(registry.hook_for(DataCategory::Mesh).order(), TeardownOrder::Immediate);
    }
}

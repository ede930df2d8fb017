//! Editor Update Hooks
//!
//! Two process-wide callback slots let an editor layer hear about evaluation
//! results: one per updated data-block and one per scene update. The graph
//! only stores the callbacks; evaluator-side code decides when to call
//! [`notify_id_update`] and [`notify_scene_update`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::Depsgraph;
use crate::id::DataBlockId;

/// What a callback gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct EditorUpdateContext<'a> {
    graph: &'a Depsgraph,
}

impl<'a> EditorUpdateContext<'a> {
    pub fn new(graph: &'a Depsgraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'a Depsgraph {
        self.graph
    }
}

/// Called when a single data-block was updated.
pub type IdUpdateCallback = Arc<dyn Fn(&EditorUpdateContext<'_>, DataBlockId) + Send + Sync>;

/// Called after a scene update; the flag says whether anything changed.
pub type SceneUpdateCallback = Arc<dyn Fn(&EditorUpdateContext<'_>, bool) + Send + Sync>;

/// Wrap a closure as an [`IdUpdateCallback`].
pub fn id_callback<F>(callback: F) -> IdUpdateCallback
where
    F: Fn(&EditorUpdateContext<'_>, DataBlockId) + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Wrap a closure as a [`SceneUpdateCallback`].
pub fn scene_callback<F>(callback: F) -> SceneUpdateCallback
where
    F: Fn(&EditorUpdateContext<'_>, bool) + Send + Sync + 'static,
{
    Arc::new(callback)
}

struct EditorCallbacks {
    id: Option<IdUpdateCallback>,
    scene: Option<SceneUpdateCallback>,
}

static CALLBACKS: RwLock<EditorCallbacks> = RwLock::new(EditorCallbacks {
    id: None,
    scene: None,
});

/// Install both callback slots, replacing whatever was there.
pub fn set_editor_update_callbacks(id: Option<IdUpdateCallback>, scene: Option<SceneUpdateCallback>) {
    let mut callbacks = CALLBACKS.write();
    callbacks.id = id;
    callbacks.scene = scene;
}

/// Invoke the data-block callback, if one is installed.
pub fn notify_id_update(context: &EditorUpdateContext<'_>, id: DataBlockId) {
    // Release the lock before calling out
    let callback = CALLBACKS.read().id.clone();
    if let Some(callback) = callback {
        callback(context, id);
    }
}

/// Invoke the scene callback, if one is installed.
pub fn notify_scene_update(context: &EditorUpdateContext<'_>, updated: bool) {
    let callback = CALLBACKS.read().scene.clone();
    if let Some(callback) = callback {
        callback(context, updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DataCategory;
    use parking_lot::Mutex;

    // The slots are process-wide, so everything touching them lives in one test.
    #[test]
    fn callbacks_are_stored_and_invoked() {
        let graph = Depsgraph::default();
        let context = EditorUpdateContext::new(&graph);
        let mesh = DataBlockId::new(DataCategory::Mesh, 4);

        // Empty slots are fine.
        notify_id_update(&context, mesh);
        notify_scene_update(&context, true);

        let seen_ids = Arc::new(Mutex::new(Vec::new()));
        let seen_scenes = Arc::new(Mutex::new(Vec::new()));
        let ids = seen_ids.clone();
        let scenes = seen_scenes.clone();
        set_editor_update_callbacks(
            Some(id_callback(move |ctx, id| {
                assert_eq!(ctx.graph().id_node_count(), 0);
                ids.lock().push(id);
            })),
            Some(scene_callback(move |_, updated| {
                scenes.lock().push(updated);
            })),
        );

        notify_id_update(&context, mesh);
        notify_scene_update(&context, false);
        set_editor_update_callbacks(None, None);
        notify_id_update(&context, mesh);

        assert_eq!(*seen_ids.lock(), vec![mesh]);
        assert_eq!(*seen_scenes.lock(), vec![false]);
    }
}

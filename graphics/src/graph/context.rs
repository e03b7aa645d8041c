//! What passes see of the frame.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::backend::GpuBackend;
use crate::coordinator::PreparedSceneFrame;
use crate::frame::FrameTargets;
use crate::gpu_types::EngineConstants;
use crate::pipeline_state::PipelineCache;
use crate::registries::TextureBinder;
use crate::resources::ResourceRegistry;
use crate::types::{FenceValue, FrameSequenceNumber, FrameSlot, GpuResourceId};
use crate::upload::UploadCoordinator;
use crate::view::View;

/// Values passes publish for later passes in the same frame, keyed by type.
#[derive(Default)]
pub struct PassOutputs {
    values: Mutex<HashMap<TypeId, (&'static str, Box<dyn Any + Send>)>>,
    cleared: Mutex<HashSet<GpuResourceId>>,
}

impl std::fmt::Debug for PassOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.lock();
        let names: Vec<_> = values.values().map(|(name, _)| *name).collect();
        f.debug_struct("PassOutputs").field("values", &names).finish()
    }
}

impl PassOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value`, replacing an earlier value of the same type.
    pub fn insert<T: Any + Send>(&self, value: T) {
        self.values
            .lock()
            .insert(TypeId::of::<T>(), (type_name::<T>(), Box::new(value)));
    }

    pub fn get<T: Any + Send + Clone>(&self) -> Option<T> {
        self.values
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|(_, value)| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: Any + Send>(&self) -> bool {
        self.values.lock().contains_key(&TypeId::of::<T>())
    }

    /// True for the first caller per frame; later passes load the target
    /// instead of clearing it.
    pub fn claim_clear(&self, target: GpuResourceId) -> bool {
        self.cleared.lock().insert(target)
    }

    /// Forget everything; called when a new frame starts.
    pub fn reset(&self) {
        self.values.lock().clear();
        self.cleared.lock().clear();
    }
}

/// Read-only frame state handed to render-time pass hooks.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub frame: &'a PreparedSceneFrame,
    pub registry: &'a ResourceRegistry,
    pub targets: &'a FrameTargets,
    pub pipelines: &'a PipelineCache,
    pub backend: &'a dyn GpuBackend,
    pub engine: EngineConstants,
    pub outputs: &'a PassOutputs,
}

impl std::fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("sequence", &self.frame.sequence())
            .field("slot", &self.frame.slot())
            .field("draws", &self.frame.len())
            .finish_non_exhaustive()
    }
}

impl<'a> RenderContext<'a> {
    pub fn sequence(&self) -> FrameSequenceNumber {
        self.frame.sequence()
    }

    pub fn slot(&self) -> FrameSlot {
        self.frame.slot()
    }

    pub fn view(&self) -> &'a View {
        self.frame.view()
    }

    pub fn register_pass_output<T: Any + Send>(&self, value: T) {
        self.outputs.insert(value);
    }

    pub fn pass_output<T: Any + Send + Clone>(&self) -> Option<T> {
        self.outputs.get::<T>()
    }
}

/// Mutable frame-preparation access for
/// [`RenderPass::prepare_frame_resources`](super::RenderPass::prepare_frame_resources).
pub struct PassSetupContext<'a> {
    pub frame: &'a PreparedSceneFrame,
    pub registry: &'a mut ResourceRegistry,
    pub uploads: &'a mut UploadCoordinator,
    pub textures: &'a mut TextureBinder,
    pub targets: &'a FrameTargets,
    pub outputs: &'a PassOutputs,
    /// Resources a pass replaces during setup may be destroyed once this
    /// value completes on the graphics queue.
    pub retire_after: FenceValue,
}

impl std::fmt::Debug for PassSetupContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassSetupContext")
            .field("sequence", &self.frame.sequence())
            .field("slot", &self.frame.slot())
            .finish_non_exhaustive()
    }
}

impl<'a> PassSetupContext<'a> {
    pub fn sequence(&self) -> FrameSequenceNumber {
        self.frame.sequence()
    }

    pub fn slot(&self) -> FrameSlot {
        self.frame.slot()
    }

    pub fn view(&self) -> &'a View {
        self.frame.view()
    }

    pub fn register_pass_output<T: Any + Send>(&self, value: T) {
        self.outputs.insert(value);
    }

    pub fn pass_output<T: Any + Send + Clone>(&self) -> Option<T> {
        self.outputs.get::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    #[test]
    fn outputs_are_keyed_by_type() {
        let outputs = PassOutputs::new();
        assert!(outputs.get::<Marker>().is_none());
        outputs.insert(Marker(1));
        outputs.insert(Marker(2));
        outputs.insert(7u32);
        assert_eq!(outputs.get::<Marker>(), Some(Marker(2)));
        assert_eq!(outputs.get::<u32>(), Some(7));
        assert!(outputs.contains::<Marker>());
        outputs.reset();
        assert!(!outputs.contains::<Marker>());
    }

    #[test]
    fn first_clear_wins() {
        let outputs = PassOutputs::new();
        let target = GpuResourceId::new(4);
        assert!(outputs.claim_clear(target));
        assert!(!outputs.claim_clear(target));
        outputs.reset();
        assert!(outputs.claim_clear(target));
    }
}

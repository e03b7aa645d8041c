//! The object that owns the device and everything allocated from it.

use std::sync::Arc;

use crate::backend::{GpuBackend, QueueRole, create_backend};
use crate::commands::{CommandListPool, CommandQueue};
use crate::config::GraphicsConfig;
use crate::coordinator::ResourceCoordinator;
use crate::error::GraphicsError;
use crate::frame::FrameTargets;
use crate::pipeline_state::PipelineCache;
use crate::resources::ResourceRegistry;
use crate::scene::TextureSource;
use crate::upload::UploadCoordinator;

/// Device, queues, descriptor heaps, resource registry and upload
/// coordinator, plus the residency registries and frame targets built on
/// top of them.
///
/// Construction uploads the built-in placeholder and error textures and
/// blocks until they are resident.
pub struct Graphics {
    pub(crate) config: GraphicsConfig,
    pub(crate) backend: Arc<dyn GpuBackend>,
    pub(crate) registry: ResourceRegistry,
    pub(crate) uploads: UploadCoordinator,
    pub(crate) queue: CommandQueue,
    pub(crate) pipelines: PipelineCache,
    pub(crate) lists: CommandListPool,
    pub(crate) coordinator: ResourceCoordinator,
    pub(crate) targets: FrameTargets,
}

impl std::fmt::Debug for Graphics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graphics")
            .field("backend", &self.backend.name())
            .field("resolution", &self.targets.extent())
            .field("resources", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Graphics {
    /// Create a backend for `config` and everything on top of it.
    pub fn new(config: GraphicsConfig, textures: Arc<dyn TextureSource>) -> Result<Self, GraphicsError> {
        config.validate()?;
        let backend = create_backend(&config)?;
        Self::with_backend(config, backend, textures)
    }

    /// Build on an existing backend.
    pub fn with_backend(
        config: GraphicsConfig,
        backend: Arc<dyn GpuBackend>,
        textures: Arc<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;
        let mut registry = ResourceRegistry::new(backend.clone(), &config.heap_strategy);
        let mut uploads = UploadCoordinator::new(backend.clone(), &config);
        let coordinator = ResourceCoordinator::new(&mut registry, &mut uploads, textures)?;
        let (width, height) = config.resolution;
        let targets = FrameTargets::new(&mut registry, width, height)?;
        log::info!(
            "graphics ready on {} backend at {width}x{height}, {} frame(s) in flight",
            backend.name(),
            config.frames_in_flight
        );
        Ok(Self {
            queue: CommandQueue::new(QueueRole::Graphics, backend.clone()),
            pipelines: PipelineCache::new(),
            lists: CommandListPool::new(),
            config,
            backend,
            registry,
            uploads,
            coordinator,
            targets,
        })
    }

    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn uploads_mut(&mut self) -> &mut UploadCoordinator {
        &mut self.uploads
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn coordinator(&self) -> &ResourceCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut ResourceCoordinator {
        &mut self.coordinator
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    /// Recreate the frame targets at a new size. The old ones are destroyed
    /// once the frames that used them retire.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if (width, height) == self.targets.extent() {
            return Ok(());
        }
        let targets = FrameTargets::new(&mut self.registry, width, height)?;
        let old = std::mem::replace(&mut self.targets, targets);
        old.release(&mut self.registry, self.queue.last_signaled());
        self.config.resolution = (width, height);
        log::info!("resized frame targets to {width}x{height}");
        Ok(())
    }

    /// Recycle finished command lists and destroy retired resources.
    pub(crate) fn retire_completed(&mut self) -> usize {
        for list in self.queue.process_completed() {
            self.lists.release(list);
        }
        self.registry.process_completed(self.queue.completed_value())
    }

    /// Block until all GPU work has finished, then retire everything.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        for list in self.queue.wait_idle()? {
            self.lists.release(list);
        }
        self.uploads.wait_idle()?;
        self.registry.process_completed(self.queue.completed_value());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::InMemoryTextureSource;

    #[test]
    fn builds_on_the_dummy_backend() {
        let graphics = Graphics::new(
            GraphicsConfig::default().with_resolution(16, 8),
            Arc::new(InMemoryTextureSource::new()),
        )
        .unwrap();
        assert_eq!(graphics.targets().extent(), (16, 8));
        assert_eq!(graphics.backend().name(), "Dummy");
    }

    #[test]
    fn invalid_config_is_reported() {
        let err = Graphics::new(
            GraphicsConfig::default().with_frames_in_flight(0),
            Arc::new(InMemoryTextureSource::new()),
        )
        .unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn resize_replaces_targets() {
        let mut graphics = Graphics::new(
            GraphicsConfig::default(),
            Arc::new(InMemoryTextureSource::new()),
        )
        .unwrap();
        let old = graphics.targets().color();
        graphics.resize(32, 32).unwrap();
        assert_ne!(graphics.targets().color(), old);
        graphics.wait_idle().unwrap();
        assert!(!graphics.registry().contains(old));
    }
}

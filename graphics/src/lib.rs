//! # Kiln Graphics
//!
//! Bindless render frame core: prepares a scene snapshot into GPU-ready draw
//! data once per frame and records it through a graph of render passes.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Graphics`] - owns the device, queues, descriptor heaps, resource
//!   registry and upload coordinator
//! - [`bindless`] - segmented descriptor allocation with stable
//!   shader-visible indices
//! - [`upload`] - staged buffer and texture uploads tracked by ticket
//! - [`registries`] - geometry, material, texture and transform residency
//! - [`scene_prep`] - culling, LOD selection and render item production
//! - [`RenderGraph`] and [`passes`] - the passes that record each frame
//! - [`FrameOrchestrator`] - the fixed per-frame phase sequence
//! - [`backend`] - the [`GpuBackend`] trait and the dummy backend with a
//!   reference rasterizer
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kiln_graphics::*;
//!
//! let graphics = Graphics::new(GraphicsConfig::default(), Arc::new(InMemoryTextureSource::new()))?;
//! let mut graph = RenderGraph::new();
//! graph.add_pass(Box::new(DepthPrePass::default()))?;
//! graph.add_pass(Box::new(ShaderPass::default()))?;
//! graph.add_pass(Box::new(SkyPass::default()))?;
//! graph.add_pass(Box::new(CompositingPass::default()))?;
//!
//! let mut frames = FrameOrchestrator::new(graphics, graph);
//! let camera = PerspectiveCamera::look_at(Vec3::new(0.0, 1.0, 5.0), Vec3::zeros());
//! let report = frames.run_frame(&scene, &camera)?;
//! ```

pub mod backend;
pub mod bindless;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod gpu_types;
pub mod graph;
pub mod passes;
pub mod pipeline_state;
pub mod registries;
pub mod resources;
pub mod scene;
pub mod scene_prep;
pub mod shader;
pub mod types;
pub mod upload;
pub mod view;

mod graphics;

// Re-export main types for convenience
pub use backend::{DescriptorView, GpuBackend, QueueRole};
#[cfg(feature = "dummy")]
pub use backend::DummyBackend;
pub use config::{FenceMode, GraphicsConfig};
pub use coordinator::{PreparedSceneFrame, ResourceCoordinator};
pub use error::{ErrorKind, GraphicsError};
pub use frame::{FrameModule, FrameOrchestrator, FrameReport, FrameTargets, PhaseId};
pub use graph::{
    PassHandle, PassResourceDeclaration, PassSetupContext, RenderContext, RenderGraph, RenderPass,
};
pub use graphics::Graphics;
pub use passes::{
    CompositingPass, DepthPrePass, ImGuiPass, LightCullingPass, ShaderPass, SkyPass,
    TransparentPass,
};
pub use scene::{InMemoryTextureSource, SceneSnapshot, TextureSource};
pub use types::{
    BufferDescriptor, BufferUsage, FRAMES_IN_FLIGHT, FenceValue, FrameSequenceNumber, FrameSlot,
    GpuResourceId, ShaderVisibleIndex, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};
pub use view::{CameraResolver, PerspectiveCamera, View};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once at startup, after the logger is set up.
pub fn init() {
    log::info!("Kiln Graphics v{} initialized", VERSION);
}

//! GPU backend abstraction layer.
//!
//! The renderer talks to the GPU exclusively through the [`GpuBackend`]
//! trait: resource creation, descriptor writes, command execution and
//! per-queue timeline fences. Recorded [`Command`] streams are backend
//! agnostic.
//!
//! # Available Backends
//!
//! - `dummy` (default): keeps every resource in CPU memory and executes
//!   commands synchronously with a reference rasterizer, for tests and
//!   headless tooling

#[cfg(feature = "dummy")]
pub mod dummy;

use std::sync::Arc;
use std::time::Duration;

use crate::bindless::ResourceViewType;
use crate::commands::Command;
use crate::config::GraphicsConfig;
use crate::error::GraphicsError;
use crate::pipeline_state::PipelineDesc;
use crate::types::{
    BufferDescriptor, FenceValue, GpuResourceId, PipelineHandle, SamplerDescriptor,
    ShaderVisibleIndex, TextureDescriptor,
};

#[cfg(feature = "dummy")]
pub use dummy::{DummyBackend, QueueWait};

/// Hardware queue a command list targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
}

impl QueueRole {
    pub const ALL: [QueueRole; 3] = [QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Payload written into a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorView {
    /// Read-only array of `count` elements of `stride` bytes.
    StructuredBuffer {
        buffer: GpuResourceId,
        offset: u64,
        stride: u32,
        count: u32,
    },
    /// Read-only byte-addressed buffer.
    RawBuffer {
        buffer: GpuResourceId,
        offset: u64,
        size: u64,
    },
    RwStructuredBuffer {
        buffer: GpuResourceId,
        offset: u64,
        stride: u32,
        count: u32,
    },
    ConstantBuffer {
        buffer: GpuResourceId,
        offset: u64,
        size: u64,
    },
    Texture2D {
        texture: GpuResourceId,
    },
    TextureCube {
        texture: GpuResourceId,
    },
    RwTexture2D {
        texture: GpuResourceId,
    },
    Sampler(SamplerDescriptor),
    RenderTarget {
        texture: GpuResourceId,
    },
    DepthStencil {
        texture: GpuResourceId,
    },
}

impl DescriptorView {
    /// Resource the view refers to, if any.
    pub fn resource(&self) -> Option<GpuResourceId> {
        match *self {
            Self::StructuredBuffer { buffer, .. }
            | Self::RawBuffer { buffer, .. }
            | Self::RwStructuredBuffer { buffer, .. }
            | Self::ConstantBuffer { buffer, .. } => Some(buffer),
            Self::Texture2D { texture }
            | Self::TextureCube { texture }
            | Self::RwTexture2D { texture }
            | Self::RenderTarget { texture }
            | Self::DepthStencil { texture } => Some(texture),
            Self::Sampler(_) => None,
        }
    }

    /// Heap segment type the view is written into.
    pub fn view_type(&self) -> ResourceViewType {
        match self {
            Self::Sampler(_) => ResourceViewType::Sampler,
            Self::RenderTarget { .. } => ResourceViewType::RenderTarget,
            Self::DepthStencil { .. } => ResourceViewType::DepthStencil,
            _ => ResourceViewType::CbvSrvUav,
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods take `&self`; implementations synchronize internally.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuResourceId, GraphicsError>;

    fn create_texture(&self, descriptor: &TextureDescriptor)
    -> Result<GpuResourceId, GraphicsError>;

    fn create_pipeline(&self, descriptor: &PipelineDesc) -> Result<PipelineHandle, GraphicsError>;

    /// Release a buffer or texture. Callers guarantee no in-flight work uses it.
    fn destroy_resource(&self, resource: GpuResourceId);

    fn resource_exists(&self, resource: GpuResourceId) -> bool;

    /// Write through the CPU mapping of a host-visible buffer.
    fn write_buffer(
        &self,
        buffer: GpuResourceId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Read buffer contents. Blocks until prior work on the buffer completed.
    fn read_buffer(
        &self,
        buffer: GpuResourceId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError>;

    /// Read one texel of mip 0, layer 0 as linear floats.
    fn read_texel(&self, texture: GpuResourceId, x: u32, y: u32)
    -> Result<[f32; 4], GraphicsError>;

    /// Write a descriptor at an absolute heap index.
    fn write_descriptor(&self, heap_index: u32, view: DescriptorView)
    -> Result<(), GraphicsError>;

    /// Sample the texture bound at a shader-visible index, as a shader would.
    fn sample_descriptor(
        &self,
        index: ShaderVisibleIndex,
        u: f32,
        v: f32,
    ) -> Result<[f32; 4], GraphicsError>;

    /// Execute a recorded command stream on `queue`.
    fn execute(&self, queue: QueueRole, commands: &[Command]) -> Result<(), GraphicsError>;

    /// Signal the next value on the queue's timeline fence.
    fn signal(&self, queue: QueueRole) -> FenceValue;

    fn completed_value(&self, queue: QueueRole) -> FenceValue;

    /// Block until `value` completes. `None` waits indefinitely. Returns
    /// `false` if the deadline passed first.
    fn wait_for_fence(&self, queue: QueueRole, value: FenceValue, timeout: Option<Duration>)
    -> bool;

    /// GPU-side wait: later work on `queue` starts after `value` completes on `other`.
    fn queue_wait(&self, queue: QueueRole, other: QueueRole, value: FenceValue);

    /// Present a texture to the swapchain.
    fn present(&self, texture: GpuResourceId) -> Result<(), GraphicsError>;
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend(config: &GraphicsConfig) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "dummy")]
    {
        log::info!("Using dummy backend ({:?} fences)", config.fence_mode);
        Ok(Arc::new(dummy::DummyBackend::new(config.fence_mode)))
    }

    #[cfg(not(feature = "dummy"))]
    {
        let _ = config;
        Err(GraphicsError::InvalidState(
            "no GPU backend compiled in; enable the `dummy` feature".into(),
        ))
    }
}

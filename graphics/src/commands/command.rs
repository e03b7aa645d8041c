//! Backend-agnostic GPU commands.

use crate::gpu_types::{ConstantRegister, RootConstantSlot};
use crate::types::{Extent3d, GpuResourceId, PipelineHandle, ScissorRect, Viewport};

use super::ResourceBarrier;

/// A render-target or depth-stencil binding: the resource plus the CPU-only
/// descriptor slot that views it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentView {
    pub resource: GpuResourceId,
    pub descriptor: u32,
}

impl AttachmentView {
    pub fn new(resource: GpuResourceId, descriptor: u32) -> Self {
        Self {
            resource,
            descriptor,
        }
    }
}

/// Destination subresource of a buffer-to-texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureCopyRegion {
    pub mip_level: u32,
    pub array_layer: u32,
    pub extent: Extent3d,
}

/// One recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(Vec<ResourceBarrier>),
    CopyBuffer {
        src: GpuResourceId,
        src_offset: u64,
        dst: GpuResourceId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: GpuResourceId,
        src_offset: u64,
        row_pitch: u64,
        dst: GpuResourceId,
        region: TextureCopyRegion,
    },
    /// Inline buffer write, executed in command order.
    UpdateBuffer {
        dst: GpuResourceId,
        offset: u64,
        data: Vec<u8>,
    },
    ClearRenderTarget {
        target: AttachmentView,
        color: [f32; 4],
    },
    ClearDepth {
        target: AttachmentView,
        depth: f32,
    },
    /// Fill a UAV buffer with a repeated `u32`.
    ClearUav {
        resource: GpuResourceId,
        value: u32,
    },
    SetPipeline(PipelineHandle),
    SetRenderTargets {
        color: Option<AttachmentView>,
        depth: Option<AttachmentView>,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetConstants {
        register: ConstantRegister,
        data: Vec<u8>,
    },
    SetRootConstant {
        slot: RootConstantSlot,
        value: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    /// Reads a `DrawIndirectArgs` record at `offset`.
    DrawIndirect {
        args: GpuResourceId,
        offset: u64,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BeginEvent(String),
    EndEvent,
}

impl Command {
    /// Whether this command consumes GPU work (and must see flushed barriers).
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            Self::CopyBuffer { .. }
                | Self::CopyBufferToTexture { .. }
                | Self::UpdateBuffer { .. }
                | Self::ClearRenderTarget { .. }
                | Self::ClearDepth { .. }
                | Self::ClearUav { .. }
                | Self::Draw { .. }
                | Self::DrawIndirect { .. }
                | Self::Dispatch { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier(_) => "Barrier",
            Self::CopyBuffer { .. } => "CopyBuffer",
            Self::CopyBufferToTexture { .. } => "CopyBufferToTexture",
            Self::UpdateBuffer { .. } => "UpdateBuffer",
            Self::ClearRenderTarget { .. } => "ClearRenderTarget",
            Self::ClearDepth { .. } => "ClearDepth",
            Self::ClearUav { .. } => "ClearUav",
            Self::SetPipeline(_) => "SetPipeline",
            Self::SetRenderTargets { .. } => "SetRenderTargets",
            Self::SetViewport(_) => "SetViewport",
            Self::SetScissor(_) => "SetScissor",
            Self::SetConstants { .. } => "SetConstants",
            Self::SetRootConstant { .. } => "SetRootConstant",
            Self::Draw { .. } => "Draw",
            Self::DrawIndirect { .. } => "DrawIndirect",
            Self::Dispatch { .. } => "Dispatch",
            Self::BeginEvent(_) => "BeginEvent",
            Self::EndEvent => "EndEvent",
        }
    }
}

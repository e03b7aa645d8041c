//! Common types and descriptors for graphics resources.
//!
//! Format enums, usage flags, descriptor structs, frame bookkeeping types and
//! the strong-typed handles used throughout the renderer.

mod buffer;
mod common;
mod frame;
mod handles;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, DrawIndirectArgs, MemoryLocation};
pub use common::{Extent3d, ScissorRect, Viewport};
pub use frame::{FRAMES_IN_FLIGHT, FenceValue, FrameSequenceNumber, FrameSlot, TicketId};
pub use handles::{
    GeometryHandle, GpuResourceId, IndexBufferHandle, MaterialHandle, PipelineHandle,
    ShaderVisibleIndex, TransformHandle, VertexBufferHandle,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};

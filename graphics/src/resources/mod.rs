//! GPU resource bookkeeping.
//!
//! - [`ResourceRegistry`] - every buffer and texture the renderer created,
//!   the descriptor allocator and the views written for each resource
//! - [`FrameStructuredBuffer`] - per-frame-slot structured buffers with a
//!   stable bindless index per slot
//!
//! Resources are identified by [`GpuResourceId`](crate::types::GpuResourceId);
//! the registry decides when the backend object is destroyed.

mod frame_buffer;
mod registry;

pub use frame_buffer::FrameStructuredBuffer;
pub use registry::{ResourceDesc, ResourceRegistry, ViewBinding};

//! Bindless descriptor allocation.
//!
//! The logical descriptor heap is split into segments keyed by
//! `(ResourceViewType, DescriptorVisibility)`. Capacities come from a
//! [`DescriptorAllocationStrategy`]; the resulting base indices are
//! deterministic for a given strategy and are exposed to shaders, which index
//! the unbounded descriptor tables with absolute [`ShaderVisibleIndex`] values.
//!
//! [`ShaderVisibleIndex`]: crate::types::ShaderVisibleIndex

mod allocator;
mod strategy;

pub use allocator::{DescriptorAllocator, DescriptorHandle, SegmentInfo};
pub use strategy::{
    DescriptorAllocationStrategy, DescriptorVisibility, HeapSegmentDesc, HeapStrategy,
    ResourceViewType,
};

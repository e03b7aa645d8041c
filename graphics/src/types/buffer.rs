//! Buffer types and descriptors.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 0;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 1;
        /// Buffer can be read as a constant buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be read or written as a structured/raw buffer.
        const STORAGE = 1 << 3;
        /// Buffer can hold indirect draw/dispatch arguments.
        const INDIRECT = 1 << 4;
        /// Buffer holds vertex data fetched through a bindless SRV.
        const VERTEX = 1 << 5;
        /// Buffer holds index data fetched through a bindless SRV.
        const INDEX = 1 << 6;
    }
}

/// Where the memory of a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local; written only by GPU copies.
    #[default]
    GpuOnly,
    /// Host-visible and persistently mapped (staging, per-frame constants).
    CpuToGpu,
    /// Host-readable (readback).
    GpuToCpu,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryLocation,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory: MemoryLocation::GpuOnly,
        }
    }

    /// Host-visible upload buffer.
    pub fn upload(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory: MemoryLocation::CpuToGpu,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory != MemoryLocation::GpuOnly
    }
}

/// Arguments for `DrawInstancedIndirect`.
///
/// Layout matches the D3D12/Vulkan indirect draw argument structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

static_assertions::const_assert_eq!(DrawIndirectArgs::SIZE, 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_descriptor_is_host_visible() {
        let desc = BufferDescriptor::upload(256, BufferUsage::COPY_SRC).with_label("staging");
        assert!(desc.is_host_visible());
        assert_eq!(desc.label.as_deref(), Some("staging"));
        assert!(!BufferDescriptor::new(16, BufferUsage::STORAGE).is_host_visible());
    }

    #[test]
    fn indirect_args_bytes() {
        let args = DrawIndirectArgs::new(6, 1);
        let bytes = bytemuck::bytes_of(&args);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &6u32.to_le_bytes());
    }
}

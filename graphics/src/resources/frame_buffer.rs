//! Host-visible structured buffers partitioned by frame slot.

use std::marker::PhantomData;

use bytemuck::Pod;

use super::ResourceRegistry;
use crate::backend::DescriptorView;
use crate::bindless::{DescriptorHandle, DescriptorVisibility, ResourceViewType};
use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, BufferUsage, FRAMES_IN_FLIGHT, FenceValue, FrameSlot, GpuResourceId,
    ShaderVisibleIndex,
};

#[derive(Debug)]
struct SlotBuffer {
    buffer: GpuResourceId,
    capacity: u32,
    descriptor: DescriptorHandle,
}

/// A structured buffer of `T` rewritten by the CPU every frame.
///
/// Each frame slot owns its own buffer and its own shader-visible SRV, so a
/// slot can be written as soon as the orchestrator has waited on its fence
/// without disturbing frames still in flight. Growth replaces only the slot's
/// buffer; its descriptor index is rewritten in place.
#[derive(Debug)]
pub struct FrameStructuredBuffer<T: Pod> {
    label: String,
    slots: [Option<SlotBuffer>; FRAMES_IN_FLIGHT],
    lens: [u32; FRAMES_IN_FLIGHT],
    _marker: PhantomData<T>,
}

impl<T: Pod> FrameStructuredBuffer<T> {
    const STRIDE: u32 = std::mem::size_of::<T>() as u32;

    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slots: Default::default(),
            lens: [0; FRAMES_IN_FLIGHT],
            _marker: PhantomData,
        }
    }

    /// Replace the slot's contents with `elements` and return its SRV index.
    pub fn write(
        &mut self,
        registry: &mut ResourceRegistry,
        slot: FrameSlot,
        elements: &[T],
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        let count = elements.len() as u32;
        self.ensure_capacity(registry, slot, count.max(1))?;
        let Some(target) = self.slots[slot.index()].as_ref() else {
            return Err(GraphicsError::InvalidState(format!(
                "{}: {slot} has no buffer",
                self.label
            )));
        };
        if !elements.is_empty() {
            registry
                .backend()
                .write_buffer(target.buffer, 0, bytemuck::cast_slice(elements))?;
        }
        registry.write_descriptor(
            &target.descriptor,
            DescriptorView::StructuredBuffer {
                buffer: target.buffer,
                offset: 0,
                stride: Self::STRIDE,
                count,
            },
        )?;
        self.lens[slot.index()] = count;
        Ok(target.descriptor.shader_visible_index())
    }

    fn ensure_capacity(
        &mut self,
        registry: &mut ResourceRegistry,
        slot: FrameSlot,
        required: u32,
    ) -> Result<(), GraphicsError> {
        let current = &mut self.slots[slot.index()];
        if current.as_ref().is_some_and(|s| s.capacity >= required) {
            return Ok(());
        }
        let capacity = required.next_power_of_two().max(16);
        let buffer = registry.create_buffer(
            BufferDescriptor::upload(capacity as u64 * Self::STRIDE as u64, BufferUsage::STORAGE)
                .with_label(format!("{} [{slot}]", self.label)),
        )?;
        match current.take() {
            Some(old) => {
                log::debug!(
                    "{}: {slot} grew {} -> {capacity} elements",
                    self.label,
                    old.capacity
                );
                // The slot's previous frame has retired, nothing reads the old buffer.
                registry.release_immediately(old.buffer);
                *current = Some(SlotBuffer {
                    buffer,
                    capacity,
                    descriptor: old.descriptor,
                });
            }
            None => {
                let descriptor = match registry.allocate_descriptor(
                    ResourceViewType::CbvSrvUav,
                    DescriptorVisibility::ShaderVisible,
                ) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        registry.release_immediately(buffer);
                        return Err(err);
                    }
                };
                *current = Some(SlotBuffer {
                    buffer,
                    capacity,
                    descriptor,
                });
            }
        }
        Ok(())
    }

    /// Elements written into `slot` by the last [`write`](Self::write).
    pub fn len(&self, slot: FrameSlot) -> u32 {
        self.lens[slot.index()]
    }

    pub fn srv_index(&self, slot: FrameSlot) -> ShaderVisibleIndex {
        self.slots[slot.index()]
            .as_ref()
            .map_or(ShaderVisibleIndex::INVALID, |s| s.descriptor.shader_visible_index())
    }

    pub fn buffer(&self, slot: FrameSlot) -> Option<GpuResourceId> {
        self.slots[slot.index()].as_ref().map(|s| s.buffer)
    }

    /// Release every slot once `retire_after` has completed.
    pub fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        for slot in self.slots.iter_mut() {
            if let Some(s) = slot.take() {
                registry.release(s.buffer, retire_after);
                if let Err(err) = registry.free_descriptor(s.descriptor, retire_after) {
                    log::error!("{}: {err}", self.label);
                }
            }
        }
        self.lens = [0; FRAMES_IN_FLIGHT];
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::bindless::HeapStrategy;

    #[test]
    fn slots_get_distinct_indices_that_survive_growth() {
        let backend = Arc::new(DummyBackend::default());
        let mut registry = ResourceRegistry::new(backend.clone(), &HeapStrategy::default());
        let mut buffer = FrameStructuredBuffer::<[u32; 4]>::new("test");

        let s0 = buffer
            .write(&mut registry, FrameSlot::new(0), &[[1, 2, 3, 4]])
            .unwrap();
        let s1 = buffer
            .write(&mut registry, FrameSlot::new(1), &[[5, 6, 7, 8]])
            .unwrap();
        assert_ne!(s0, s1);

        let old = buffer.buffer(FrameSlot::new(0)).unwrap();
        let many = vec![[9u32; 4]; 100];
        let grown = buffer.write(&mut registry, FrameSlot::new(0), &many).unwrap();
        assert_eq!(grown, s0);
        assert_eq!(buffer.len(FrameSlot::new(0)), 100);
        assert!(!backend.resource_exists(old));

        let new = buffer.buffer(FrameSlot::new(0)).unwrap();
        let bytes = backend.read_buffer(new, 16 * 99, 16).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&[9, 9, 9, 9]));
    }

    #[test]
    fn empty_write_keeps_a_valid_view() {
        let backend = Arc::new(DummyBackend::default());
        let mut registry = ResourceRegistry::new(backend, &HeapStrategy::default());
        let mut buffer = FrameStructuredBuffer::<u32>::new("empty");
        let index = buffer.write(&mut registry, FrameSlot::new(2), &[]).unwrap();
        assert!(index.is_valid());
        assert_eq!(buffer.len(FrameSlot::new(2)), 0);
        assert_eq!(buffer.srv_index(FrameSlot::new(1)), ShaderVisibleIndex::INVALID);
    }
}

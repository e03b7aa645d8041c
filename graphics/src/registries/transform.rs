//! Per-frame world transforms.

use std::collections::HashMap;

use kiln_core::math::{Mat4, mat4_to_cols_array_2d};

use crate::error::GraphicsError;
use crate::gpu_types::GpuTransform;
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::scene::NodeId;
use crate::types::{FenceValue, FrameSlot, ShaderVisibleIndex, TransformHandle};

/// Collects the frame's transforms into one structured buffer.
///
/// Each scene node owns one [`TransformHandle`] for the uploader's
/// lifetime. Handles come from a monotonic counter and are never reissued.
/// Every frame maps the handles it uses onto dense buffer elements.
#[derive(Debug)]
pub struct TransformUploader {
    transforms: Vec<GpuTransform>,
    handles: HashMap<NodeId, TransformHandle>,
    next_handle: u32,
    elements: HashMap<TransformHandle, u32>,
    buffer: FrameStructuredBuffer<GpuTransform>,
}

impl Default for TransformUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformUploader {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            handles: HashMap::new(),
            next_handle: 0,
            elements: HashMap::new(),
            buffer: FrameStructuredBuffer::new("transforms"),
        }
    }

    /// Start a new frame. Handles stay valid; buffer elements are reassigned.
    pub fn begin_frame(&mut self) {
        self.transforms.clear();
        self.elements.clear();
    }

    /// Handle of `node`, writing its matrices into this frame's buffer on
    /// first use in the frame.
    pub fn get_or_allocate(&mut self, node: NodeId, world: &Mat4, normal: &Mat4) -> TransformHandle {
        let handle = match self.handles.get(&node) {
            Some(handle) => *handle,
            None => {
                let handle = TransformHandle::new(self.next_handle);
                self.next_handle += 1;
                self.handles.insert(node, handle);
                handle
            }
        };
        if !self.elements.contains_key(&handle) {
            self.elements.insert(handle, self.transforms.len() as u32);
            self.transforms.push(GpuTransform {
                world: mat4_to_cols_array_2d(world),
                normal: mat4_to_cols_array_2d(normal),
            });
        }
        handle
    }

    /// Buffer element holding `handle`'s matrices this frame.
    pub fn element(&self, handle: TransformHandle) -> Option<u32> {
        self.elements.get(&handle).copied()
    }

    /// Number of handles issued so far.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn get(&self, handle: TransformHandle) -> Option<&GpuTransform> {
        self.transforms.get(self.element(handle)? as usize)
    }

    /// Write the frame's transforms into `slot`'s buffer.
    pub fn upload(
        &mut self,
        registry: &mut ResourceRegistry,
        slot: FrameSlot,
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        self.buffer.write(registry, slot, &self.transforms)
    }

    pub fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        self.buffer.release(registry, retire_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::math::{Vec3, mat4_from_translation};

    #[test]
    fn each_node_owns_its_handle() {
        let mut transforms = TransformUploader::new();
        let m = Mat4::identity();
        let a = transforms.get_or_allocate(NodeId(0), &m, &m);
        let b = transforms.get_or_allocate(NodeId(1), &m, &m);
        assert_ne!(a, b);
        assert_eq!(transforms.get_or_allocate(NodeId(0), &m, &m), a);
        assert_eq!(transforms.len(), 2);
    }

    #[test]
    fn handles_survive_frames_and_are_not_reissued() {
        let mut transforms = TransformUploader::new();
        let m = Mat4::identity();
        let first = transforms.get_or_allocate(NodeId(0), &m, &m);
        transforms.begin_frame();
        assert!(transforms.is_empty());
        assert_eq!(transforms.element(first), None);

        let moved = mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));
        let other = transforms.get_or_allocate(NodeId(7), &moved, &m);
        assert_ne!(other, first);
        assert_eq!(transforms.element(other), Some(0));
        assert_eq!(transforms.get(other).unwrap().world[3][1], 2.0);

        assert_eq!(transforms.get_or_allocate(NodeId(0), &m, &m), first);
        assert_eq!(transforms.element(first), Some(1));
        assert_eq!(transforms.handle_count(), 2);
    }
}

//! Material handles and the per-frame material constants buffer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::gpu_types::{INVALID_BINDLESS_SLOT, MaterialConstants};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::scene::MaterialAsset;
use crate::types::{FenceValue, FrameSlot, MaterialHandle, ShaderVisibleIndex};
use crate::upload::UploadCoordinator;

use super::TextureBinder;

/// Dense material handles keyed by asset identity.
///
/// Two `Arc`s to equal materials are different materials; the registry keeps
/// each `Arc` alive so its address is never reused for another material.
/// [`MaterialHandle::INVALID`] is the sentinel for "no material"; shaders see
/// it as a missing element and fall back to default constants.
#[derive(Debug)]
pub struct MaterialRegistry {
    by_ptr: HashMap<usize, MaterialHandle>,
    materials: Vec<Option<Arc<MaterialAsset>>>,
    constants: FrameStructuredBuffer<MaterialConstants>,
    scratch: Vec<MaterialConstants>,
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self {
            by_ptr: HashMap::new(),
            materials: Vec::new(),
            constants: FrameStructuredBuffer::new("material constants"),
            scratch: Vec::new(),
        }
    }

    pub fn get_or_register_material(&mut self, material: Option<&Arc<MaterialAsset>>) -> MaterialHandle {
        let Some(material) = material else {
            return MaterialHandle::INVALID;
        };
        let ptr = Arc::as_ptr(material) as usize;
        if let Some(handle) = self.by_ptr.get(&ptr) {
            return *handle;
        }
        let handle = MaterialHandle::new(self.materials.len() as u32);
        log::trace!("material '{}' registered as {handle}", material.name);
        self.materials.push(Some(material.clone()));
        self.by_ptr.insert(ptr, handle);
        handle
    }

    pub fn is_sentinel_handle(handle: MaterialHandle) -> bool {
        !handle.is_valid()
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&Arc<MaterialAsset>> {
        self.materials.get(handle.index() as usize)?.as_ref()
    }

    /// Forget a material. Its handle is not reused; the constants slot
    /// reverts to defaults from the next frame on.
    pub fn release(&mut self, handle: MaterialHandle) -> bool {
        let Some(slot) = self.materials.get_mut(handle.index() as usize) else {
            return false;
        };
        let Some(material) = slot.take() else {
            return false;
        };
        self.by_ptr.remove(&(Arc::as_ptr(&material) as usize));
        true
    }

    /// Number of handles issued, released ones included.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Write one [`MaterialConstants`] per handle into `slot`'s buffer,
    /// resolving texture keys through `textures`. Returns the SRV index.
    pub fn write_constants(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        textures: &mut TextureBinder,
        slot: FrameSlot,
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        self.scratch.clear();
        for material in &self.materials {
            let constants = match material {
                Some(material) => {
                    let mut texture = |key| textures.get_or_allocate(registry, uploads, key).index();
                    MaterialConstants {
                        base_color: material.base_color,
                        base_color_texture: material
                            .base_color_texture
                            .map_or(INVALID_BINDLESS_SLOT, &mut texture),
                        normal_texture: material
                            .normal_texture
                            .map_or(INVALID_BINDLESS_SLOT, &mut texture),
                        alpha_cutoff: material.alpha_cutoff,
                        domain: material.domain as u32,
                        metallic: material.metallic,
                        roughness: material.roughness,
                        emissive_strength: material.emissive_strength,
                        flags: u32::from(material.double_sided),
                    }
                }
                None => MaterialConstants::default(),
            };
            self.scratch.push(constants);
        }
        self.constants.write(registry, slot, &self.scratch)
    }

    pub fn srv_index(&self, slot: FrameSlot) -> ShaderVisibleIndex {
        self.constants.srv_index(slot)
    }

    pub fn release_buffers(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        self.constants.release(registry, retire_after);
    }
}

//! Registry of live GPU resources and their cached descriptor views.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{DescriptorView, GpuBackend};
use crate::bindless::{
    DescriptorAllocationStrategy, DescriptorAllocator, DescriptorHandle, DescriptorVisibility,
    ResourceViewType,
};
use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, FenceValue, GpuResourceId, ShaderVisibleIndex, TextureDescriptor,
};

/// Creation parameters of a registered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDescriptor),
    Texture(TextureDescriptor),
}

impl ResourceDesc {
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Buffer(desc) => desc.label.as_deref(),
            Self::Texture(desc) => desc.label.as_deref(),
        }
    }
}

/// A descriptor slot written for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewBinding {
    /// Absolute heap index (CPU handle).
    pub heap_index: u32,
    /// Shader-visible index, `INVALID` for CPU-only views.
    pub index: ShaderVisibleIndex,
}

#[derive(Debug)]
struct Entry {
    desc: ResourceDesc,
    views: HashMap<(DescriptorView, DescriptorVisibility), DescriptorHandle>,
}

/// Owns the descriptor allocator and tracks every buffer and texture the
/// renderer created, with the views written for it.
///
/// Written during frame preparation only; render-time code gets `&self`.
/// Released resources stay alive, with their views, until the fence value
/// they were released with has completed.
pub struct ResourceRegistry {
    backend: Arc<dyn GpuBackend>,
    allocator: DescriptorAllocator,
    entries: HashMap<GpuResourceId, Entry>,
    pending_release: Vec<(FenceValue, GpuResourceId, Entry)>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.entries.len())
            .field("pending_release", &self.pending_release.len())
            .finish_non_exhaustive()
    }
}

impl ResourceRegistry {
    pub fn new(backend: Arc<dyn GpuBackend>, strategy: &dyn DescriptorAllocationStrategy) -> Self {
        Self {
            backend,
            allocator: DescriptorAllocator::new(strategy),
            entries: HashMap::new(),
            pending_release: Vec::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn allocator(&self) -> &DescriptorAllocator {
        &self.allocator
    }

    // ===== Resources =====

    pub fn create_buffer(&mut self, desc: BufferDescriptor) -> Result<GpuResourceId, GraphicsError> {
        let id = self.backend.create_buffer(&desc)?;
        log::trace!("registered buffer {id} {:?} ({} bytes)", desc.label, desc.size);
        self.insert(id, ResourceDesc::Buffer(desc));
        Ok(id)
    }

    pub fn create_texture(
        &mut self,
        desc: TextureDescriptor,
    ) -> Result<GpuResourceId, GraphicsError> {
        let id = self.backend.create_texture(&desc)?;
        log::trace!(
            "registered texture {id} {:?} ({}x{})",
            desc.label,
            desc.size.width,
            desc.size.height
        );
        self.insert(id, ResourceDesc::Texture(desc));
        Ok(id)
    }

    fn insert(&mut self, id: GpuResourceId, desc: ResourceDesc) {
        self.entries.insert(
            id,
            Entry {
                desc,
                views: HashMap::new(),
            },
        );
    }

    pub fn contains(&self, id: GpuResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn desc(&self, id: GpuResourceId) -> Option<&ResourceDesc> {
        self.entries.get(&id).map(|e| &e.desc)
    }

    pub fn buffer_desc(&self, id: GpuResourceId) -> Option<&BufferDescriptor> {
        match self.desc(id)? {
            ResourceDesc::Buffer(desc) => Some(desc),
            ResourceDesc::Texture(_) => None,
        }
    }

    pub fn texture_desc(&self, id: GpuResourceId) -> Option<&TextureDescriptor> {
        match self.desc(id)? {
            ResourceDesc::Texture(desc) => Some(desc),
            ResourceDesc::Buffer(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_release_count(&self) -> usize {
        self.pending_release.len()
    }

    // ===== Views =====

    /// Return the cached view of `id`, creating and writing it on first use.
    pub fn get_or_create_view(
        &mut self,
        id: GpuResourceId,
        view: DescriptorView,
        visibility: DescriptorVisibility,
    ) -> Result<ViewBinding, GraphicsError> {
        if view.resource() != Some(id) {
            return Err(GraphicsError::InvalidParameter(format!(
                "view {view:?} does not refer to resource {id}"
            )));
        }
        let visibility = match view.view_type() {
            ResourceViewType::RenderTarget | ResourceViewType::DepthStencil => {
                DescriptorVisibility::CpuOnly
            }
            _ => visibility,
        };
        let Some(entry) = self.entries.get(&id) else {
            return Err(GraphicsError::InvalidHandle(format!(
                "resource {id} is not registered"
            )));
        };
        if let Some(handle) = entry.views.get(&(view, visibility)) {
            return Ok(binding(handle));
        }

        let handle = self.allocator.allocate(view.view_type(), visibility)?;
        if let Err(err) = self.backend.write_descriptor(handle.heap_index(), view) {
            self.allocator.free_immediately(handle)?;
            return Err(err);
        }
        let result = binding(&handle);
        log::trace!("view {view:?} of {id} at heap index {}", result.heap_index);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.views.insert((view, visibility), handle);
        }
        Ok(result)
    }

    /// Cached view lookup without creation.
    pub fn view(
        &self,
        id: GpuResourceId,
        view: DescriptorView,
        visibility: DescriptorVisibility,
    ) -> Option<ViewBinding> {
        self.entries
            .get(&id)?
            .views
            .get(&(view, visibility))
            .map(binding)
    }

    /// Allocate a descriptor slot owned by the caller, for views whose
    /// contents change over time (placeholders, per-frame buffers).
    pub fn allocate_descriptor(
        &mut self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Result<DescriptorHandle, GraphicsError> {
        self.allocator.allocate(view_type, visibility)
    }

    /// Point a caller-owned slot at `view`.
    pub fn write_descriptor(
        &self,
        handle: &DescriptorHandle,
        view: DescriptorView,
    ) -> Result<(), GraphicsError> {
        if handle.view_type() != view.view_type() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} view written into a {:?} slot",
                view.view_type(),
                handle.view_type()
            )));
        }
        self.backend.write_descriptor(handle.heap_index(), view)
    }

    /// Return a caller-owned slot once `retire_after` has completed.
    pub fn free_descriptor(
        &mut self,
        handle: DescriptorHandle,
        retire_after: FenceValue,
    ) -> Result<(), GraphicsError> {
        self.allocator.free(handle, retire_after)
    }

    // ===== Lifetime =====

    /// Unregister `id`. The resource and its views are destroyed once
    /// `retire_after` has completed.
    pub fn release(&mut self, id: GpuResourceId, retire_after: FenceValue) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            log::warn!("releasing unregistered resource {id}");
            return false;
        };
        self.pending_release.push((retire_after, id, entry));
        true
    }

    /// Destroy a resource that no submitted work references.
    pub fn release_immediately(&mut self, id: GpuResourceId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        self.destroy(id, entry, None);
        true
    }

    fn destroy(&mut self, id: GpuResourceId, entry: Entry, retire_after: Option<FenceValue>) {
        for (_, handle) in entry.views {
            let freed = match retire_after {
                Some(fence) => self.allocator.free(handle, fence),
                None => self.allocator.free_immediately(handle),
            };
            if let Err(err) = freed {
                log::error!("freeing view of {id}: {err}");
            }
        }
        self.backend.destroy_resource(id);
        log::trace!("destroyed {id} ({:?})", entry.desc.label());
    }

    /// Destroy released resources whose fence has completed and recycle
    /// descriptor slots. Returns the number of resources destroyed.
    pub fn process_completed(&mut self, completed: FenceValue) -> usize {
        let (due, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_release)
            .into_iter()
            .partition(|(fence, _, _)| *fence <= completed);
        self.pending_release = keep;
        let destroyed = due.len();
        for (fence, id, entry) in due {
            self.destroy(id, entry, Some(fence));
        }
        self.allocator.process_completed(completed);
        destroyed
    }

    /// Grow flagged descriptor segments. Only called between frames.
    pub fn grow_between_frames(&mut self) -> usize {
        self.allocator.grow_between_frames()
    }

    /// Destroy everything. Callers must have waited for the GPU to go idle.
    pub fn clear(&mut self) {
        let pending: Vec<_> = self.pending_release.drain(..).collect();
        for (_, id, entry) in pending {
            self.destroy(id, entry, None);
        }
        let ids: Vec<_> = self.entries.keys().copied().collect();
        for id in ids {
            self.release_immediately(id);
        }
    }
}

fn binding(handle: &DescriptorHandle) -> ViewBinding {
    ViewBinding {
        heap_index: handle.heap_index(),
        index: handle.shader_visible_index(),
    }
}

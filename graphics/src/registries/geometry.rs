//! GPU residency of mesh LODs.

use std::collections::HashMap;

use kiln_core::keys::AssetKey;

use crate::backend::DescriptorView;
use crate::bindless::DescriptorVisibility;
use crate::error::GraphicsError;
use crate::gpu_types::Vertex;
use crate::resources::ResourceRegistry;
use crate::scene::MeshAsset;
use crate::types::{
    BufferDescriptor, BufferUsage, FenceValue, GeometryHandle, GpuResourceId, IndexBufferHandle,
    ShaderVisibleIndex, VertexBufferHandle,
};
use crate::upload::{UploadCoordinator, UploadRequest, UploadTicket, UploadTracker};

const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
const INDEX_STRIDE: u32 = std::mem::size_of::<u32>() as u32;

/// Upload state of registered geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryState {
    Pending,
    Resident,
    Failed,
}

/// What a draw needs to reference registered geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryResidency {
    pub handle: GeometryHandle,
    pub vertex_buffer: VertexBufferHandle,
    pub index_buffer: IndexBufferHandle,
    pub vb_index: ShaderVisibleIndex,
    pub ib_index: ShaderVisibleIndex,
    pub state: GeometryState,
}

#[derive(Debug)]
struct GeometryEntry {
    key: (AssetKey, u32),
    vertex_buffer: GpuResourceId,
    index_buffer: GpuResourceId,
    residency: GeometryResidency,
    tickets: Vec<UploadTicket>,
}

/// Vertex and index buffers per `(asset, lod)`.
///
/// Buffers are read through structured-buffer SRVs (vertex pulling), so a
/// draw only needs the two shader-visible indices. Handles are never reused
/// within the registry's lifetime.
#[derive(Debug, Default)]
pub struct GeometryRegistry {
    entries: HashMap<GeometryHandle, GeometryEntry>,
    by_key: HashMap<(AssetKey, u32), GeometryHandle>,
    next_geometry: u32,
    next_vertex_buffer: u32,
    next_index_buffer: u32,
}

impl GeometryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mesh`'s LOD `lod` and start its upload, or return the
    /// existing registration.
    pub fn ensure_resident(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        mesh: &MeshAsset,
        lod: u32,
    ) -> Result<GeometryResidency, GraphicsError> {
        let key = (mesh.key, lod);
        if let Some(entry) = self.by_key.get(&key).and_then(|h| self.entries.get(h)) {
            return Ok(entry.residency);
        }
        let Some(data) = mesh.lod(lod as usize) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "mesh '{}' has no LOD {lod}",
                mesh.name
            )));
        };
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "mesh '{}' LOD {lod} is empty",
                mesh.name
            )));
        }

        let usage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        let vertex_buffer = registry.create_buffer(
            BufferDescriptor::new(data.vertex_bytes().len() as u64, usage | BufferUsage::VERTEX)
                .with_label(format!("{} lod{lod} vertices", mesh.name)),
        )?;
        let index_buffer = match registry.create_buffer(
            BufferDescriptor::new(data.index_bytes().len() as u64, usage | BufferUsage::INDEX)
                .with_label(format!("{} lod{lod} indices", mesh.name)),
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                registry.release_immediately(vertex_buffer);
                return Err(err);
            }
        };
        let views = registry
            .get_or_create_view(
                vertex_buffer,
                DescriptorView::StructuredBuffer {
                    buffer: vertex_buffer,
                    offset: 0,
                    stride: VERTEX_STRIDE,
                    count: data.vertices.len() as u32,
                },
                DescriptorVisibility::ShaderVisible,
            )
            .and_then(|vb| {
                let ib = registry.get_or_create_view(
                    index_buffer,
                    DescriptorView::StructuredBuffer {
                        buffer: index_buffer,
                        offset: 0,
                        stride: INDEX_STRIDE,
                        count: data.indices.len() as u32,
                    },
                    DescriptorVisibility::ShaderVisible,
                )?;
                Ok((vb, ib))
            });
        let (vb_view, ib_view) = match views {
            Ok(views) => views,
            Err(err) => {
                registry.release_immediately(vertex_buffer);
                registry.release_immediately(index_buffer);
                return Err(err);
            }
        };

        let tickets = uploads.submit_many(vec![
            UploadRequest::buffer(vertex_buffer, 0, data.vertex_bytes())
                .with_name(format!("{} lod{lod} vertices", mesh.name)),
            UploadRequest::buffer(index_buffer, 0, data.index_bytes())
                .with_name(format!("{} lod{lod} indices", mesh.name)),
        ]);

        let handle = GeometryHandle::new(self.next_geometry);
        self.next_geometry += 1;
        let residency = GeometryResidency {
            handle,
            vertex_buffer: VertexBufferHandle::new(self.next_vertex_buffer),
            index_buffer: IndexBufferHandle::new(self.next_index_buffer),
            vb_index: vb_view.index,
            ib_index: ib_view.index,
            state: GeometryState::Pending,
        };
        self.next_vertex_buffer += 1;
        self.next_index_buffer += 1;
        log::debug!(
            "geometry {} ({} lod{lod}): vb {} ib {}",
            handle,
            mesh.name,
            residency.vb_index,
            residency.ib_index
        );
        self.entries.insert(
            handle,
            GeometryEntry {
                key,
                vertex_buffer,
                index_buffer,
                residency,
                tickets,
            },
        );
        self.by_key.insert(key, handle);
        Ok(residency)
    }

    /// Settle entries whose uploads finished. Returns the number settled.
    pub fn on_frame_start(&mut self, tracker: &UploadTracker) -> usize {
        let mut settled = 0;
        for entry in self.entries.values_mut() {
            if entry.tickets.is_empty() {
                continue;
            }
            let results: Option<Vec<_>> = entry
                .tickets
                .iter()
                .map(|t| tracker.try_get_result(*t))
                .collect();
            let Some(results) = results else {
                continue;
            };
            for ticket in entry.tickets.drain(..) {
                tracker.forget(ticket);
            }
            settled += 1;
            entry.residency.state = if results.iter().all(|r| r.is_success()) {
                GeometryState::Resident
            } else {
                log::warn!(
                    "geometry {}: upload failed: {:?}",
                    entry.residency.handle,
                    results.iter().find_map(|r| r.error())
                );
                GeometryState::Failed
            };
        }
        settled
    }

    pub fn get(&self, handle: GeometryHandle) -> Option<&GeometryResidency> {
        self.entries.get(&handle).map(|e| &e.residency)
    }

    pub fn lookup(&self, asset: AssetKey, lod: u32) -> Option<&GeometryResidency> {
        self.get(*self.by_key.get(&(asset, lod))?)
    }

    /// Vertex and index buffer of `handle`.
    pub fn buffers(&self, handle: GeometryHandle) -> Option<(GpuResourceId, GpuResourceId)> {
        self.entries
            .get(&handle)
            .map(|e| (e.vertex_buffer, e.index_buffer))
    }

    /// Drop the registration. Buffers and views are destroyed once
    /// `retire_after` completes on the graphics queue.
    pub fn release(
        &mut self,
        registry: &mut ResourceRegistry,
        handle: GeometryHandle,
        retire_after: FenceValue,
    ) -> bool {
        let Some(entry) = self.entries.remove(&handle) else {
            return false;
        };
        self.by_key.remove(&entry.key);
        registry.release(entry.vertex_buffer, retire_after);
        registry.release(entry.index_buffer, retire_after);
        true
    }

    pub fn release_all(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        let handles: Vec<_> = self.entries.keys().copied().collect();
        for handle in handles {
            self.release(registry, handle, retire_after);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

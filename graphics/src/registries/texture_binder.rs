//! Stable bindless indices for textures referenced by [`ResourceKey`].

use std::collections::HashMap;
use std::sync::Arc;

use kiln_core::keys::ResourceKey;

use crate::backend::DescriptorView;
use crate::bindless::{DescriptorHandle, DescriptorVisibility, ResourceViewType};
use crate::error::GraphicsError;
use crate::resources::ResourceRegistry;
use crate::scene::{TextureData, TextureSource};
use crate::types::{
    FenceValue, GpuResourceId, ShaderVisibleIndex, TextureDescriptor, TextureDimension,
    TextureUsage,
};
use crate::upload::{
    AwaitOutcome, SubresourceRange, UploadCoordinator, UploadRequest, UploadTicket, UploadTracker,
};

const PLACEHOLDER_COLOR: [u8; 4] = [255, 0, 255, 255];
const ERROR_COLORS: ([u8; 4], [u8; 4]) = ([255, 0, 255, 255], [0, 0, 0, 255]);

/// Residency of a keyed texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    /// Upload in flight; the index samples the placeholder.
    Pending,
    Resident,
    /// Unknown key or failed upload; the index samples the error texture.
    Failed,
}

#[derive(Debug)]
struct TextureEntry {
    /// `None` when no descriptor could be allocated; the entry then reuses
    /// the error texture's index.
    descriptor: Option<DescriptorHandle>,
    index: ShaderVisibleIndex,
    texture: Option<GpuResourceId>,
    view: Option<DescriptorView>,
    ticket: Option<UploadTicket>,
    state: TextureState,
}

#[derive(Debug)]
struct BuiltinTexture {
    texture: GpuResourceId,
    view: DescriptorView,
    index: ShaderVisibleIndex,
    /// Taken when the binder is released.
    descriptor: Option<DescriptorHandle>,
}

impl BuiltinTexture {
    fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        if let Some(descriptor) = self.descriptor.take() {
            if let Err(err) = registry.free_descriptor(descriptor, retire_after) {
                log::error!("built-in texture {}: {err}", self.texture);
            }
            registry.release(self.texture, retire_after);
        }
    }
}

/// Hands out one shader-visible index per texture key. The index never
/// changes for the key's lifetime: it samples a placeholder until the upload
/// lands and is repointed at the real texture by
/// [`on_frame_start`](Self::on_frame_start).
pub struct TextureBinder {
    source: Arc<dyn TextureSource>,
    placeholder: BuiltinTexture,
    error: BuiltinTexture,
    entries: HashMap<ResourceKey, TextureEntry>,
}

impl std::fmt::Debug for TextureBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBinder")
            .field("entries", &self.entries.len())
            .field("placeholder", &self.placeholder.index)
            .field("error", &self.error.index)
            .finish_non_exhaustive()
    }
}

impl TextureBinder {
    /// Create the placeholder and error textures and wait for both to be
    /// resident, so every index handed out samples something valid.
    pub fn new(
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        source: Arc<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        let (error, error_ticket) = create_builtin(
            registry,
            uploads,
            "error texture",
            TextureData::checker(8, 2, ERROR_COLORS.0, ERROR_COLORS.1),
        )?;
        let (placeholder, placeholder_ticket) = create_builtin(
            registry,
            uploads,
            "placeholder texture",
            TextureData::solid(2, 2, PLACEHOLDER_COLOR),
        )?;
        let tickets = [error_ticket, placeholder_ticket];
        for (ticket, outcome) in tickets.iter().zip(uploads.await_all(&tickets, None)) {
            match outcome {
                AwaitOutcome::Completed(result) if result.is_success() => {
                    uploads.tracker().forget(*ticket);
                }
                AwaitOutcome::Completed(result) => {
                    return Err(GraphicsError::UploadFailed(format!(
                        "built-in texture: {:?}",
                        result.error()
                    )));
                }
                AwaitOutcome::TimedOut(ticket) => {
                    return Err(GraphicsError::Timeout(ticket.fence.get()));
                }
            }
        }
        log::debug!(
            "texture binder: placeholder at {}, error texture at {}",
            placeholder.index,
            error.index
        );
        Ok(Self {
            source,
            placeholder,
            error,
            entries: HashMap::new(),
        })
    }

    pub fn placeholder_index(&self) -> ShaderVisibleIndex {
        self.placeholder.index
    }

    pub fn error_index(&self) -> ShaderVisibleIndex {
        self.error.index
    }

    /// The index bound to `key`, loading and uploading it on first use.
    ///
    /// Never fails: unknown keys and exhausted descriptor segments map to
    /// the error texture, and the failure is cached so later calls are hits.
    pub fn get_or_allocate(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        key: ResourceKey,
    ) -> ShaderVisibleIndex {
        if let Some(entry) = self.entries.get(&key) {
            return entry.index;
        }
        let entry = self.load(registry, uploads, key);
        let index = entry.index;
        self.entries.insert(key, entry);
        index
    }

    fn load(
        &self,
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        key: ResourceKey,
    ) -> TextureEntry {
        let descriptor = match registry
            .allocate_descriptor(ResourceViewType::CbvSrvUav, DescriptorVisibility::ShaderVisible)
        {
            Ok(descriptor) => descriptor,
            Err(err) => {
                log::warn!("texture {key}: {err}, binding the error texture");
                return TextureEntry {
                    descriptor: None,
                    index: self.error_index(),
                    texture: None,
                    view: None,
                    ticket: None,
                    state: TextureState::Failed,
                };
            }
        };
        let index = descriptor.shader_visible_index();
        let mut entry = TextureEntry {
            descriptor: Some(descriptor),
            index,
            texture: None,
            view: None,
            ticket: None,
            state: TextureState::Failed,
        };

        let Some(data) = self.source.load(key) else {
            log::warn!("texture {key}: not found in any source");
            self.point_at(registry, &entry, self.error.view);
            return entry;
        };
        match create_texture(registry, &format!("texture {key}"), &data) {
            Ok((texture, view)) => {
                let request = upload_request(texture, &data).with_name(format!("texture {key}"));
                entry.texture = Some(texture);
                entry.view = Some(view);
                entry.ticket = Some(uploads.submit(request));
                entry.state = TextureState::Pending;
                self.point_at(registry, &entry, self.placeholder.view);
            }
            Err(err) => {
                log::warn!("texture {key}: {err}");
                self.point_at(registry, &entry, self.error.view);
            }
        }
        entry
    }

    fn point_at(&self, registry: &ResourceRegistry, entry: &TextureEntry, view: DescriptorView) {
        if let Some(descriptor) = &entry.descriptor {
            if let Err(err) = registry.write_descriptor(descriptor, view) {
                log::error!("texture binder: writing descriptor {}: {err}", entry.index);
            }
        }
    }

    /// Repoint indices whose upload finished: at the texture on success, at
    /// the error texture on failure. Returns the number of entries settled.
    pub fn on_frame_start(&mut self, registry: &mut ResourceRegistry, tracker: &UploadTracker) -> usize {
        let mut settled = 0;
        let mut failed_textures = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            let Some(ticket) = entry.ticket else {
                continue;
            };
            let Some(result) = tracker.try_get_result(ticket) else {
                continue;
            };
            tracker.forget(ticket);
            entry.ticket = None;
            settled += 1;
            let view = match (result.is_success(), entry.view) {
                (true, Some(view)) => {
                    entry.state = TextureState::Resident;
                    log::trace!("texture {key}: resident at {}", entry.index);
                    view
                }
                _ => {
                    log::warn!("texture {key}: upload failed: {:?}", result.error());
                    entry.state = TextureState::Failed;
                    if let Some(texture) = entry.texture.take() {
                        failed_textures.push(texture);
                    }
                    entry.view = None;
                    self.error.view
                }
            };
            if let Some(descriptor) = &entry.descriptor {
                if let Err(err) = registry.write_descriptor(descriptor, view) {
                    log::error!("texture {key}: repointing {}: {err}", entry.index);
                }
            }
        }
        // No descriptor ever pointed at these.
        for texture in failed_textures {
            registry.release_immediately(texture);
        }
        settled
    }

    /// Index already bound to `key`, without loading it.
    pub fn index_of(&self, key: ResourceKey) -> Option<ShaderVisibleIndex> {
        self.entries.get(&key).map(|e| e.index)
    }

    pub fn state(&self, key: ResourceKey) -> Option<TextureState> {
        self.entries.get(&key).map(|e| e.state)
    }

    /// Texture backing `key`, once created.
    pub fn texture(&self, key: ResourceKey) -> Option<GpuResourceId> {
        self.entries.get(&key)?.texture
    }

    /// Forget `key`. Its index and texture are reused only after
    /// `retire_after` has completed.
    pub fn release(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &UploadCoordinator,
        key: ResourceKey,
        retire_after: FenceValue,
    ) -> bool {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        if let Some(ticket) = entry.ticket {
            uploads.tracker().cancel(ticket);
            uploads.tracker().forget(ticket);
        }
        if let Some(descriptor) = entry.descriptor {
            if let Err(err) = registry.free_descriptor(descriptor, retire_after) {
                log::error!("texture {key}: {err}");
            }
        }
        if let Some(texture) = entry.texture {
            registry.release(texture, retire_after);
        }
        true
    }

    /// Release every entry and both built-in textures.
    pub fn release_all(&mut self, registry: &mut ResourceRegistry, uploads: &UploadCoordinator, retire_after: FenceValue) {
        let keys: Vec<_> = self.entries.keys().copied().collect();
        for key in keys {
            self.release(registry, uploads, key, retire_after);
        }
        self.placeholder.release(registry, retire_after);
        self.error.release(registry, retire_after);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn create_texture(
    registry: &mut ResourceRegistry,
    label: &str,
    data: &TextureData,
) -> Result<(GpuResourceId, DescriptorView), GraphicsError> {
    let usage = TextureUsage::SAMPLED | TextureUsage::COPY_DST;
    let desc = match data.dimension {
        TextureDimension::D2 => {
            TextureDescriptor::new_2d(data.extent.width, data.extent.height, data.format, usage)
        }
        TextureDimension::Cube => TextureDescriptor::new_cube(data.extent.width, data.format, usage),
    }
    .with_mip_levels(data.mip_levels)
    .with_label(label);
    let texture = registry.create_texture(desc)?;
    let view = match data.dimension {
        TextureDimension::D2 => DescriptorView::Texture2D { texture },
        TextureDimension::Cube => DescriptorView::TextureCube { texture },
    };
    Ok((texture, view))
}

fn upload_request(texture: GpuResourceId, data: &TextureData) -> UploadRequest {
    UploadRequest::texture(
        texture,
        data.format,
        data.extent,
        SubresourceRange::mips(0, data.mip_levels).with_layers(0, data.layer_count()),
        data.data.clone(),
    )
}

fn create_builtin(
    registry: &mut ResourceRegistry,
    uploads: &mut UploadCoordinator,
    label: &str,
    data: TextureData,
) -> Result<(BuiltinTexture, UploadTicket), GraphicsError> {
    let (texture, view) = create_texture(registry, label, &data)?;
    let descriptor = registry
        .allocate_descriptor(ResourceViewType::CbvSrvUav, DescriptorVisibility::ShaderVisible)?;
    registry.write_descriptor(&descriptor, view)?;
    let ticket = uploads.submit(upload_request(texture, &data).with_name(label));
    Ok((
        BuiltinTexture {
            texture,
            view,
            index: descriptor.shader_visible_index(),
            descriptor: Some(descriptor),
        },
        ticket,
    ))
}

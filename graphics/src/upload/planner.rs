//! Copy planning for buffer and texture uploads.
//!
//! Planners turn requests into staging footprints and copy regions without
//! touching the GPU. Offsets in a plan are relative to the start of the
//! staging allocation that will back it.

use super::request::{UploadDestination, UploadError, UploadRequest};
use crate::config::UploadPolicy;
use crate::types::{Extent3d, GpuResourceId, TextureFormat};

/// Align a value up to the given power-of-two alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// One buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopyRegion {
    /// Index of the request in the planned batch.
    pub request: usize,
    pub staging_offset: u64,
    pub dst: GpuResourceId,
    pub dst_offset: u64,
    pub size: u64,
}

/// Plan for a batch of buffer requests sharing one staging allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferUploadPlan {
    pub regions: Vec<BufferCopyRegion>,
    /// Requests rejected while planning, by batch index.
    pub rejected: Vec<(usize, UploadError)>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferPlanner {
    policy: UploadPolicy,
}

impl BufferPlanner {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    /// Plan `requests`; non-buffer requests are ignored.
    pub fn plan(&self, requests: &[&UploadRequest]) -> BufferUploadPlan {
        let mut plan = BufferUploadPlan::default();
        let mut cursor = 0u64;
        for (index, request) in requests.iter().enumerate() {
            let UploadDestination::Buffer { buffer, offset } = request.destination else {
                continue;
            };
            if let Err(err) = self.check(buffer, offset, request.data.len() as u64) {
                log::warn!("upload '{}' rejected: {err}", request.label());
                plan.rejected.push((index, err));
                continue;
            }
            let size = request.data.len() as u64;
            let staging_offset = align_up(cursor, self.policy.buffer_placement_alignment);
            cursor = staging_offset + size;
            plan.regions.push(BufferCopyRegion {
                request: index,
                staging_offset,
                dst: buffer,
                dst_offset: offset,
                size,
            });
        }
        plan.total_bytes = cursor;
        plan
    }

    fn check(&self, buffer: GpuResourceId, offset: u64, size: u64) -> Result<(), UploadError> {
        if !buffer.is_valid() {
            return Err(UploadError::NullDestination);
        }
        if size == 0 {
            return Err(UploadError::EmptyPayload);
        }
        let alignment = self.policy.buffer_copy_alignment;
        if offset % alignment != 0 {
            return Err(UploadError::Misaligned { offset, alignment });
        }
        Ok(())
    }
}

/// Staging layout of one texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub mip: u32,
    pub layer: u32,
    pub extent: Extent3d,
    /// Offset inside the staging allocation.
    pub offset: u64,
    /// Bytes per staged row, aligned to the policy's row pitch.
    pub row_pitch: u64,
    pub slice_pitch: u64,
    /// Tightly packed bytes of one row in the source payload.
    pub source_row_bytes: u64,
    /// Offset of the subresource in the source payload.
    pub source_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureUploadPlan {
    pub texture: GpuResourceId,
    pub format: TextureFormat,
    pub footprints: Vec<SubresourceFootprint>,
    /// Staging bytes including row and placement padding.
    pub total_bytes: u64,
    /// Payload bytes consumed from the request.
    pub source_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TexturePlanner {
    policy: UploadPolicy,
}

impl TexturePlanner {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn plan(&self, request: &UploadRequest) -> Result<TextureUploadPlan, UploadError> {
        let UploadDestination::Texture {
            texture,
            format,
            extent,
            subresources,
        } = request.destination
        else {
            return Err(UploadError::RecordingFailed(
                "texture planner given a buffer request".into(),
            ));
        };
        if !texture.is_valid() {
            return Err(UploadError::NullDestination);
        }
        if request.data.is_empty() {
            return Err(UploadError::EmptyPayload);
        }
        if subresources.count() == 0 || extent.width == 0 || extent.height == 0 {
            return Err(UploadError::InvalidSubresource);
        }

        let block = format.block_size() as u64;
        let mut footprints = Vec::with_capacity(subresources.count() as usize);
        let mut cursor = 0u64;
        let mut source_offset = 0u64;
        for layer in subresources.base_layer..subresources.base_layer + subresources.layer_count {
            for mip in subresources.base_mip..subresources.base_mip + subresources.mip_count {
                let mip_extent = extent.mip_level(mip);
                let source_row_bytes = mip_extent.width as u64 * block;
                let row_pitch = align_up(source_row_bytes, self.policy.row_pitch_alignment);
                let slice_pitch = row_pitch * mip_extent.height as u64;
                let offset = align_up(cursor, self.policy.texture_placement_alignment);
                footprints.push(SubresourceFootprint {
                    mip,
                    layer,
                    extent: mip_extent,
                    offset,
                    row_pitch,
                    slice_pitch,
                    source_row_bytes,
                    source_offset,
                });
                cursor = offset + slice_pitch * mip_extent.depth as u64;
                source_offset += source_row_bytes * mip_extent.height as u64 * mip_extent.depth as u64;
            }
        }

        let provided = request.data.len() as u64;
        if provided < source_offset {
            return Err(UploadError::SourceTooSmall {
                required: source_offset,
                provided,
            });
        }
        Ok(TextureUploadPlan {
            texture,
            format,
            footprints,
            total_bytes: cursor,
            source_bytes: source_offset,
        })
    }
}

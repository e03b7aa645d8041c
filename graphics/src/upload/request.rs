//! Upload requests, results and errors.

use std::sync::Arc;

use thiserror::Error;

use crate::types::{Extent3d, GpuResourceId, TextureFormat, TicketId};

/// Why an individual upload failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// No staging memory could be mapped for the request.
    #[error("staging memory unavailable")]
    StagingUnavailable,
    /// The destination resource id is invalid.
    #[error("upload has no destination")]
    NullDestination,
    /// The request carries no bytes.
    #[error("upload payload is empty")]
    EmptyPayload,
    /// The payload is smaller than the planned footprint.
    #[error("payload of {provided} bytes is smaller than the required {required}")]
    SourceTooSmall { required: u64, provided: u64 },
    /// A buffer offset violates the copy alignment.
    #[error("offset {offset} is not aligned to {alignment}")]
    Misaligned { offset: u64, alignment: u64 },
    /// The subresource range lies outside the texture.
    #[error("subresource range outside the texture")]
    InvalidSubresource,
    /// Staging write or command submission failed.
    #[error("recording failed: {0}")]
    RecordingFailed(String),
    /// The ticket was canceled before its result was read.
    #[error("upload canceled")]
    Canceled,
}

/// Destination kind of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadKind {
    Buffer,
    Texture,
}

/// Mip and array-layer range of a texture upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// Mip 0 of layer 0.
    pub const FIRST: SubresourceRange = SubresourceRange {
        base_mip: 0,
        mip_count: 1,
        base_layer: 0,
        layer_count: 1,
    };

    pub fn mips(base_mip: u32, mip_count: u32) -> Self {
        Self {
            base_mip,
            mip_count,
            ..Self::FIRST
        }
    }

    pub fn with_layers(mut self, base_layer: u32, layer_count: u32) -> Self {
        self.base_layer = base_layer;
        self.layer_count = layer_count;
        self
    }

    pub fn count(&self) -> u32 {
        self.mip_count * self.layer_count
    }
}

/// Where the bytes of a request go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDestination {
    Buffer {
        buffer: GpuResourceId,
        offset: u64,
    },
    /// Payload is tightly packed: layer-major, then mip, then rows.
    Texture {
        texture: GpuResourceId,
        format: TextureFormat,
        extent: Extent3d,
        subresources: SubresourceRange,
    },
}

/// A unit of data to copy into a GPU resource.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub destination: UploadDestination,
    pub data: Arc<[u8]>,
    pub debug_name: String,
}

impl UploadRequest {
    pub fn buffer(buffer: GpuResourceId, offset: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            destination: UploadDestination::Buffer { buffer, offset },
            data: data.into(),
            debug_name: String::new(),
        }
    }

    /// Upload to a texture whose mip-0 size is `extent`.
    pub fn texture(
        texture: GpuResourceId,
        format: TextureFormat,
        extent: Extent3d,
        subresources: SubresourceRange,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            destination: UploadDestination::Texture {
                texture,
                format,
                extent,
                subresources,
            },
            data: data.into(),
            debug_name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    pub fn kind(&self) -> UploadKind {
        match self.destination {
            UploadDestination::Buffer { .. } => UploadKind::Buffer,
            UploadDestination::Texture { .. } => UploadKind::Texture,
        }
    }

    pub fn target(&self) -> GpuResourceId {
        match self.destination {
            UploadDestination::Buffer { buffer, .. } => buffer,
            UploadDestination::Texture { texture, .. } => texture,
        }
    }

    pub(crate) fn label(&self) -> &str {
        if self.debug_name.is_empty() {
            "<unnamed upload>"
        } else {
            &self.debug_name
        }
    }
}

/// Final state of an upload, available once its ticket completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub ticket: TicketId,
    pub bytes_uploaded: u64,
    pub outcome: Result<(), UploadError>,
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&UploadError> {
        self.outcome.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_follows_destination() {
        let buffer = UploadRequest::buffer(GpuResourceId::new(1), 0, vec![1u8, 2, 3, 4]);
        assert_eq!(buffer.kind(), UploadKind::Buffer);
        assert_eq!(buffer.label(), "<unnamed upload>");

        let texture = UploadRequest::texture(
            GpuResourceId::new(2),
            TextureFormat::Rgba8Unorm,
            Extent3d::new_2d(2, 2),
            SubresourceRange::FIRST,
            vec![0u8; 16],
        )
        .with_name("albedo");
        assert_eq!(texture.kind(), UploadKind::Texture);
        assert_eq!(texture.target(), GpuResourceId::new(2));
        assert_eq!(texture.label(), "albedo");
    }

    #[test]
    fn subresource_count() {
        assert_eq!(SubresourceRange::mips(0, 3).with_layers(0, 6).count(), 18);
    }
}

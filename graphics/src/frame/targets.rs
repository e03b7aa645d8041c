//! Render targets shared by the frame's passes.

use crate::backend::DescriptorView;
use crate::bindless::DescriptorVisibility;
use crate::commands::{AttachmentView, ResourceState};
use crate::error::GraphicsError;
use crate::resources::ResourceRegistry;
use crate::types::{
    FenceValue, GpuResourceId, ShaderVisibleIndex, TextureDescriptor, TextureFormat, TextureUsage,
};

pub const SCENE_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const BACKBUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// A texture with its attachment view and a shader-visible SRV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub texture: GpuResourceId,
    pub attachment: AttachmentView,
    pub srv: ShaderVisibleIndex,
}

/// Scene color, depth and the backbuffer.
///
/// Passes render the scene into the HDR color target; compositing resolves
/// it into the backbuffer, which is what gets presented. Each target rests
/// in its home state between frames.
#[derive(Debug)]
pub struct FrameTargets {
    width: u32,
    height: u32,
    color: Target,
    depth: Target,
    backbuffer: Target,
}

impl FrameTargets {
    pub fn new(registry: &mut ResourceRegistry, width: u32, height: u32) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame targets must be non-empty, got {width}x{height}"
            )));
        }
        let color = create_target(
            registry,
            TextureDescriptor::new_2d(
                width,
                height,
                SCENE_COLOR_FORMAT,
                TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
            )
            .with_label("scene color"),
        )?;
        let depth = create_target(
            registry,
            TextureDescriptor::new_2d(
                width,
                height,
                DEPTH_FORMAT,
                TextureUsage::DEPTH_STENCIL | TextureUsage::SAMPLED,
            )
            .with_label("scene depth"),
        )?;
        let backbuffer = create_target(
            registry,
            TextureDescriptor::new_2d(
                width,
                height,
                BACKBUFFER_FORMAT,
                TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED | TextureUsage::PRESENT,
            )
            .with_label("backbuffer"),
        )?;
        log::debug!("frame targets created at {width}x{height}");
        Ok(Self {
            width,
            height,
            color,
            depth,
            backbuffer,
        })
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color(&self) -> GpuResourceId {
        self.color.texture
    }

    pub fn color_attachment(&self) -> AttachmentView {
        self.color.attachment
    }

    pub fn color_srv(&self) -> ShaderVisibleIndex {
        self.color.srv
    }

    pub fn depth(&self) -> GpuResourceId {
        self.depth.texture
    }

    pub fn depth_attachment(&self) -> AttachmentView {
        self.depth.attachment
    }

    pub fn depth_srv(&self) -> ShaderVisibleIndex {
        self.depth.srv
    }

    pub fn backbuffer(&self) -> GpuResourceId {
        self.backbuffer.texture
    }

    pub fn backbuffer_attachment(&self) -> AttachmentView {
        self.backbuffer.attachment
    }

    pub fn backbuffer_srv(&self) -> ShaderVisibleIndex {
        self.backbuffer.srv
    }

    /// State a resource is in between frames; the render graph starts
    /// tracking from it and restores it when recording ends.
    pub fn home_state(&self, resource: GpuResourceId) -> ResourceState {
        if resource == self.backbuffer.texture {
            ResourceState::PRESENT
        } else {
            ResourceState::COMMON
        }
    }

    pub fn release(&self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        for target in [&self.color, &self.depth, &self.backbuffer] {
            registry.release(target.texture, retire_after);
        }
    }
}

pub(crate) fn create_target(
    registry: &mut ResourceRegistry,
    desc: TextureDescriptor,
) -> Result<Target, GraphicsError> {
    let is_depth = desc.format.is_depth();
    let texture = registry.create_texture(desc)?;
    let attachment_view = if is_depth {
        DescriptorView::DepthStencil { texture }
    } else {
        DescriptorView::RenderTarget { texture }
    };
    let attachment = registry.get_or_create_view(texture, attachment_view, DescriptorVisibility::CpuOnly)?;
    let srv = registry.get_or_create_view(
        texture,
        DescriptorView::Texture2D { texture },
        DescriptorVisibility::ShaderVisible,
    )?;
    Ok(Target {
        texture,
        attachment: AttachmentView::new(texture, attachment.heap_index),
        srv: srv.index,
    })
}

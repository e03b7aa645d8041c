//! Immediate-mode UI overlay.
//!
//! The UI library itself lives outside the renderer. It hands over plain
//! [`ImGuiDrawData`] each frame through a [`SharedImGuiDrawData`]; an
//! [`ImGuiBackend`] turns that into GPU work on top of the composited
//! backbuffer.

use std::sync::Arc;

use kiln_core::keys::ResourceKey;
use parking_lot::Mutex;

use crate::commands::{AttachmentView, CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{BACKBUFFER_FORMAT, FrameModule};
use crate::gpu_types::{INVALID_BINDLESS_SLOT, ImGuiPassConstants, ImGuiVertex, RootConstantSlot};
use crate::graph::{PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass};
use crate::pipeline_state::{BlendMode, GraphicsPipelineDesc, PipelineDesc};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::shader::GraphicsProgram;
use crate::types::{FenceValue, FrameSequenceNumber, PipelineHandle, ShaderVisibleIndex, Viewport};

use super::{CachedPipeline, CompositingPass};

/// One frame of UI geometry: a screen-space triangle list in pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImGuiDrawData {
    pub display_size: [f32; 2],
    pub vertices: Vec<ImGuiVertex>,
    /// Font atlas; vertices are drawn untextured without one.
    pub font: Option<ResourceKey>,
}

impl ImGuiDrawData {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append an axis-aligned rectangle as two triangles.
    pub fn push_rect(&mut self, min: [f32; 2], max: [f32; 2], color: [f32; 4]) {
        let v = |x: f32, y: f32, u: f32, w: f32| ImGuiVertex {
            position: [x, y],
            uv: [u, w],
            color,
        };
        let (a, b) = (min, max);
        self.vertices.extend_from_slice(&[
            v(a[0], a[1], 0.0, 0.0),
            v(a[0], b[1], 0.0, 1.0),
            v(b[0], b[1], 1.0, 1.0),
            v(a[0], a[1], 0.0, 0.0),
            v(b[0], b[1], 1.0, 1.0),
            v(b[0], a[1], 1.0, 0.0),
        ]);
    }
}

pub type SharedImGuiDrawData = Arc<Mutex<ImGuiDrawData>>;

/// Turns UI draw data into GPU work.
pub trait ImGuiBackend: Send {
    fn name(&self) -> &'static str;

    /// Upload this frame's geometry. Runs during frame preparation.
    fn prepare(&mut self, ctx: &mut PassSetupContext<'_>, data: &ImGuiDrawData) -> Result<(), GraphicsError>;

    /// Record the draws into `target` with `pipeline` bound.
    fn render(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
        pipeline: PipelineHandle,
        target: AttachmentView,
    ) -> Result<(), GraphicsError>;

    fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        let _ = (registry, retire_after);
    }
}

/// Uploads vertices into a per-slot structured buffer and draws them as
/// screen-space triangles.
pub struct ScreenSpaceImGuiBackend {
    vertices: FrameStructuredBuffer<ImGuiVertex>,
    constants: FrameStructuredBuffer<ImGuiPassConstants>,
    constants_index: ShaderVisibleIndex,
    vertex_count: u32,
}

impl std::fmt::Debug for ScreenSpaceImGuiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenSpaceImGuiBackend")
            .field("vertex_count", &self.vertex_count)
            .finish_non_exhaustive()
    }
}

impl Default for ScreenSpaceImGuiBackend {
    fn default() -> Self {
        Self {
            vertices: FrameStructuredBuffer::new("imgui vertices"),
            constants: FrameStructuredBuffer::new("imgui constants"),
            constants_index: ShaderVisibleIndex::INVALID,
            vertex_count: 0,
        }
    }
}

impl ImGuiBackend for ScreenSpaceImGuiBackend {
    fn name(&self) -> &'static str {
        "screen-space"
    }

    fn prepare(&mut self, ctx: &mut PassSetupContext<'_>, data: &ImGuiDrawData) -> Result<(), GraphicsError> {
        let slot = ctx.slot();
        let font_texture_slot = match data.font {
            Some(key) => ctx
                .textures
                .get_or_allocate(ctx.registry, ctx.uploads, key)
                .index(),
            None => INVALID_BINDLESS_SLOT,
        };
        let vertex_buffer_slot = self.vertices.write(ctx.registry, slot, &data.vertices)?;
        self.constants_index = self.constants.write(
            ctx.registry,
            slot,
            &[ImGuiPassConstants {
                vertex_buffer_slot: vertex_buffer_slot.index(),
                font_texture_slot,
                display_size: data.display_size,
            }],
        )?;
        self.vertex_count = data.vertices.len() as u32;
        Ok(())
    }

    fn render(
        &mut self,
        _ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
        pipeline: PipelineHandle,
        target: AttachmentView,
    ) -> Result<(), GraphicsError> {
        if self.vertex_count == 0 {
            return Ok(());
        }
        recorder.set_render_targets(Some(target), None);
        recorder.set_pipeline(pipeline);
        recorder.set_root_constant(RootConstantSlot::PassConstants, self.constants_index.index());
        recorder.draw(self.vertex_count, 1);
        Ok(())
    }

    fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        self.vertices.release(registry, retire_after);
        self.constants.release(registry, retire_after);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImGuiPassConfig {
    pub enabled: bool,
}

impl Default for ImGuiPassConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub struct ImGuiPass {
    config: ImGuiPassConfig,
    data: SharedImGuiDrawData,
    backend: Box<dyn ImGuiBackend>,
    pipeline: CachedPipeline,
}

impl std::fmt::Debug for ImGuiPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImGuiPass")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ImGuiPass {
    pub const NAME: &'static str = "ImGuiPass";

    pub fn new(config: ImGuiPassConfig, data: SharedImGuiDrawData, backend: Box<dyn ImGuiBackend>) -> Self {
        Self {
            config,
            data,
            backend,
            pipeline: CachedPipeline::default(),
        }
    }

    /// A pass using [`ScreenSpaceImGuiBackend`].
    pub fn screen_space(data: SharedImGuiDrawData) -> Self {
        Self::new(
            ImGuiPassConfig::default(),
            data,
            Box::new(ScreenSpaceImGuiBackend::default()),
        )
    }

    pub fn config(&self) -> &ImGuiPassConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        self.backend.release(registry, retire_after);
    }

    fn pipeline_desc() -> PipelineDesc {
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("imgui", GraphicsProgram::ImGui)
                .with_color(BACKBUFFER_FORMAT, BlendMode::AlphaBlend),
        )
    }
}

impl RenderPass for ImGuiPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        let data = if self.config.enabled {
            self.data.lock().clone()
        } else {
            ImGuiDrawData::default()
        };
        self.backend.prepare(ctx, &data)
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        PassResourceDeclaration::new()
            .write(ctx.targets.backbuffer(), ResourceState::RENDER_TARGET)
            .after(CompositingPass::NAME)
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let [w, h] = self.data.lock().display_size;
        if self.config.enabled && !(w.is_finite() && h.is_finite() && w >= 0.0 && h >= 0.0) {
            return Err(GraphicsError::validation(
                Self::NAME,
                format!("display size {w}x{h} is invalid"),
            ));
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, _ctx: &RenderContext<'_>) -> bool {
        self.pipeline.needs_rebuild(&Self::pipeline_desc())
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        self.pipeline.ensure(ctx, &Self::pipeline_desc())?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let target = ctx.targets.backbuffer_attachment();
        if ctx.outputs.claim_clear(target.resource) {
            recorder.clear_render_target(target, [0.0, 0.0, 0.0, 1.0]);
        }
        let (width, height) = ctx.targets.extent();
        recorder.set_viewport(Viewport::from_dimensions(width, height));
        self.backend.render(ctx, recorder, self.pipeline.handle(), target)
    }
}

/// Clears the shared draw data when a frame starts, so the UI code
/// rebuilds it every frame.
#[derive(Debug, Clone)]
pub struct ImGuiFrameModule {
    data: SharedImGuiDrawData,
}

impl ImGuiFrameModule {
    pub fn new(data: SharedImGuiDrawData) -> Self {
        Self { data }
    }
}

impl FrameModule for ImGuiFrameModule {
    fn name(&self) -> &'static str {
        "imgui"
    }

    fn on_frame_start(&mut self, _sequence: FrameSequenceNumber) {
        self.data.lock().vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rects_are_two_triangles() {
        let mut data = ImGuiDrawData::default();
        assert!(data.is_empty());
        data.push_rect([0.0, 0.0], [4.0, 2.0], [1.0; 4]);
        assert_eq!(data.vertices.len(), 6);
        assert_eq!(data.vertices[2].position, [4.0, 2.0]);
    }

    #[test]
    fn frame_module_clears_vertices() {
        let data = SharedImGuiDrawData::default();
        data.lock().push_rect([0.0, 0.0], [1.0, 1.0], [1.0; 4]);
        data.lock().display_size = [8.0, 8.0];
        let mut module = ImGuiFrameModule::new(data.clone());
        module.on_frame_start(FrameSequenceNumber::new(1));
        assert!(data.lock().is_empty());
        assert_eq!(data.lock().display_size, [8.0, 8.0]);
    }
}

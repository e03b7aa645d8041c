//! GPU debug lines.
//!
//! Lines live in a GPU buffer that shaders may append to. Each frame the
//! clear pass resets the indirect draw arguments, then appends the lines
//! queued from the CPU through [`GpuDebugLines`]; the draw pass renders
//! whatever the buffer holds with one indirect draw.

use std::sync::Arc;

use kiln_core::math::Vec3;
use parking_lot::Mutex;

use crate::backend::DescriptorView;
use crate::bindless::DescriptorVisibility;
use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{DEPTH_FORMAT, SCENE_COLOR_FORMAT};
use crate::gpu_types::{DebugLine, DebugPassConstants, RootConstantSlot};
use crate::graph::{PassKind, PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass};
use crate::pipeline_state::{
    BlendMode, ComputePipelineDesc, DepthState, GraphicsPipelineDesc, PipelineDesc,
    PrimitiveTopology,
};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::shader::{ComputeProgram, GraphicsProgram, PermutationSet, ShaderPermutation};
use crate::types::{
    BufferDescriptor, BufferUsage, DrawIndirectArgs, FenceValue, GpuResourceId,
    ShaderVisibleIndex,
};

use super::{CachedPipeline, bind_frame_constants};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDebugPassConfig {
    pub max_lines: u32,
    /// Test lines against scene depth.
    pub depth_test: bool,
}

impl Default for GpuDebugPassConfig {
    fn default() -> Self {
        Self {
            max_lines: 4096,
            depth_test: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DebugBuffers {
    max_lines: u32,
    lines: GpuResourceId,
    counter: GpuResourceId,
    line_slot: ShaderVisibleIndex,
    counter_slot: ShaderVisibleIndex,
}

impl DebugBuffers {
    fn create(registry: &mut ResourceRegistry, max_lines: u32) -> Result<Self, GraphicsError> {
        let stride = std::mem::size_of::<DebugLine>() as u32;
        let lines = registry.create_buffer(
            BufferDescriptor::new(
                max_lines.max(1) as u64 * stride as u64,
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label("debug lines"),
        )?;
        let counter = registry.create_buffer(
            BufferDescriptor::new(
                DrawIndirectArgs::SIZE,
                BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_DST,
            )
            .with_label("debug line args"),
        )?;
        let line_slot = registry
            .get_or_create_view(
                lines,
                DescriptorView::RwStructuredBuffer {
                    buffer: lines,
                    offset: 0,
                    stride,
                    count: max_lines.max(1),
                },
                DescriptorVisibility::ShaderVisible,
            )?
            .index;
        let counter_slot = registry
            .get_or_create_view(
                counter,
                DescriptorView::RwStructuredBuffer {
                    buffer: counter,
                    offset: 0,
                    stride: DrawIndirectArgs::SIZE as u32,
                    count: 1,
                },
                DescriptorVisibility::ShaderVisible,
            )?
            .index;
        Ok(Self {
            max_lines,
            lines,
            counter,
            line_slot,
            counter_slot,
        })
    }

    fn release(self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        registry.release(self.lines, retire_after);
        registry.release(self.counter, retire_after);
    }
}

#[derive(Debug, Default)]
struct DebugState {
    queued: Vec<DebugLine>,
    buffers: Option<DebugBuffers>,
    constants_index: ShaderVisibleIndex,
}

/// CPU handle for queuing lines into the next frame.
#[derive(Debug, Clone)]
pub struct GpuDebugLines {
    state: Arc<Mutex<DebugState>>,
}

impl GpuDebugLines {
    pub fn line(&self, start: Vec3, end: Vec3, color: [f32; 4]) {
        self.state.lock().queued.push(DebugLine {
            start: [start.x, start.y, start.z, 1.0],
            end: [end.x, end.y, end.z, 1.0],
            color,
        });
    }

    /// The twelve edges of an axis-aligned box.
    pub fn aabb(&self, min: Vec3, max: Vec3, color: [f32; 4]) {
        let corner = |i: usize| {
            Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        };
        for i in 0..8 {
            for bit in [1, 2, 4] {
                if i & bit == 0 {
                    self.line(corner(i), corner(i | bit), color);
                }
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queued.len()
    }
}

/// Create the clear and draw passes plus the handle feeding them.
pub fn gpu_debug_passes(
    config: GpuDebugPassConfig,
) -> (GpuDebugClearPass, GpuDebugDrawPass, GpuDebugLines) {
    let state = Arc::new(Mutex::new(DebugState::default()));
    (
        GpuDebugClearPass {
            config,
            state: state.clone(),
            constants: FrameStructuredBuffer::new("debug line constants"),
            frame_lines: Vec::new(),
            pipeline: CachedPipeline::default(),
        },
        GpuDebugDrawPass {
            config,
            state: state.clone(),
            pipeline: CachedPipeline::default(),
        },
        GpuDebugLines { state },
    )
}

pub struct GpuDebugClearPass {
    config: GpuDebugPassConfig,
    state: Arc<Mutex<DebugState>>,
    constants: FrameStructuredBuffer<DebugPassConstants>,
    frame_lines: Vec<DebugLine>,
    pipeline: CachedPipeline,
}

impl std::fmt::Debug for GpuDebugClearPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDebugClearPass")
            .field("config", &self.config)
            .field("frame_lines", &self.frame_lines.len())
            .finish_non_exhaustive()
    }
}

impl GpuDebugClearPass {
    pub const NAME: &'static str = "GpuDebugClearPass";

    /// Release the shared line buffers.
    pub fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        if let Some(buffers) = self.state.lock().buffers.take() {
            buffers.release(registry, retire_after);
        }
        self.constants.release(registry, retire_after);
    }
}

impl RenderPass for GpuDebugClearPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kind(&self) -> PassKind {
        PassKind::Compute
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state
            .buffers
            .is_some_and(|b| b.max_lines != self.config.max_lines)
        {
            if let Some(old) = state.buffers.take() {
                old.release(ctx.registry, ctx.retire_after);
            }
        }
        let buffers = match state.buffers {
            Some(buffers) => buffers,
            None => {
                let buffers = DebugBuffers::create(ctx.registry, self.config.max_lines)?;
                state.buffers = Some(buffers);
                buffers
            }
        };

        self.frame_lines = std::mem::take(&mut state.queued);
        let max = self.config.max_lines as usize;
        if self.frame_lines.len() > max {
            log::warn!(
                "gpu debug: dropping {} of {} lines over the {max} line budget",
                self.frame_lines.len() - max,
                self.frame_lines.len()
            );
            self.frame_lines.truncate(max);
        }

        let slot = ctx.slot();
        state.constants_index = self.constants.write(
            ctx.registry,
            slot,
            &[DebugPassConstants {
                line_buffer_slot: buffers.line_slot.index(),
                counter_slot: buffers.counter_slot.index(),
                max_lines: self.config.max_lines,
                _pad: 0,
            }],
        )?;
        Ok(())
    }

    fn declare_resources(&self, _ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let state = self.state.lock();
        let Some(buffers) = state.buffers else {
            return PassResourceDeclaration::new();
        };
        PassResourceDeclaration::new()
            .write(buffers.counter, ResourceState::UNORDERED_ACCESS)
            .write(buffers.lines, ResourceState::UNORDERED_ACCESS)
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        if self.config.max_lines == 0 {
            return Err(GraphicsError::validation(Self::NAME, "max_lines must be non-zero"));
        }
        if self.state.lock().buffers.is_none() {
            return Err(GraphicsError::validation(Self::NAME, "line buffers were not created"));
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, _ctx: &RenderContext<'_>) -> bool {
        self.pipeline.needs_rebuild(&clear_pipeline_desc())
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        self.pipeline.ensure(ctx, &clear_pipeline_desc())?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let (buffers, constants_index) = {
            let state = self.state.lock();
            (state.buffers, state.constants_index)
        };
        let Some(buffers) = buffers else {
            return Ok(());
        };
        bind_frame_constants(ctx, recorder);
        recorder.set_pipeline(self.pipeline.handle());
        recorder.set_root_constant(RootConstantSlot::PassConstants, constants_index.index());
        recorder.dispatch(1, 1, 1);

        if !self.frame_lines.is_empty() {
            let count = self.frame_lines.len() as u32;
            recorder.require_resource_state(buffers.lines, ResourceState::COPY_DEST);
            recorder.require_resource_state(buffers.counter, ResourceState::COPY_DEST);
            recorder.update_buffer(buffers.lines, 0, bytemuck::cast_slice(&self.frame_lines));
            recorder.update_buffer(
                buffers.counter,
                0,
                bytemuck::bytes_of(&DrawIndirectArgs::new(count * 2, 1)),
            );
            recorder.require_resource_state(buffers.lines, ResourceState::UNORDERED_ACCESS);
            recorder.require_resource_state(buffers.counter, ResourceState::UNORDERED_ACCESS);
        }
        Ok(())
    }
}

fn clear_pipeline_desc() -> PipelineDesc {
    PipelineDesc::Compute(ComputePipelineDesc::new("debug line clear", ComputeProgram::DebugClear))
}

pub struct GpuDebugDrawPass {
    config: GpuDebugPassConfig,
    state: Arc<Mutex<DebugState>>,
    pipeline: CachedPipeline,
}

impl std::fmt::Debug for GpuDebugDrawPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDebugDrawPass")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GpuDebugDrawPass {
    pub const NAME: &'static str = "GpuDebugDrawPass";

    fn pipeline_desc(&self, ctx: &RenderContext<'_>) -> PipelineDesc {
        let view = ctx.view();
        let depth = if self.config.depth_test {
            DepthState::read_only(view.depth_compare())
        } else {
            DepthState::DISABLED
        };
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("debug lines", GraphicsProgram::DebugLines)
                .with_color(SCENE_COLOR_FORMAT, BlendMode::Opaque)
                .with_depth(depth, DEPTH_FORMAT)
                .with_topology(PrimitiveTopology::LineList)
                .with_permutations(
                    PermutationSet::EMPTY
                        .with(ShaderPermutation::DebugOverlay)
                        .with_if(ShaderPermutation::ReverseZ, view.reverse_z()),
                ),
        )
    }
}

impl RenderPass for GpuDebugDrawPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let state = self.state.lock();
        let Some(buffers) = state.buffers else {
            return PassResourceDeclaration::new();
        };
        PassResourceDeclaration::new()
            .read(buffers.counter, ResourceState::INDIRECT_ARGUMENT)
            .read(buffers.lines, ResourceState::SHADER_RESOURCE)
            .read(ctx.targets.depth(), ResourceState::DEPTH_READ)
            .write(ctx.targets.color(), ResourceState::RENDER_TARGET)
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        if self.state.lock().buffers.is_none() {
            return Err(GraphicsError::validation(
                Self::NAME,
                format!("needs {} in the graph", GpuDebugClearPass::NAME),
            ));
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext<'_>) -> bool {
        self.pipeline.needs_rebuild(&self.pipeline_desc(ctx))
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let desc = self.pipeline_desc(ctx);
        self.pipeline.ensure(ctx, &desc)?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let (buffers, constants_index) = {
            let state = self.state.lock();
            (state.buffers, state.constants_index)
        };
        let Some(buffers) = buffers else {
            return Ok(());
        };
        recorder.set_render_targets(
            Some(ctx.targets.color_attachment()),
            Some(ctx.targets.depth_attachment()),
        );
        recorder.set_viewport(*ctx.view().viewport());
        bind_frame_constants(ctx, recorder);
        recorder.set_pipeline(self.pipeline.handle());
        recorder.set_root_constant(RootConstantSlot::PassConstants, constants_index.index());
        recorder.draw_indirect(buffers.counter, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_queues_lines_for_the_clear_pass() {
        let (clear, _draw, lines) = gpu_debug_passes(GpuDebugPassConfig::default());
        lines.line(Vec3::zeros(), Vec3::x(), [1.0, 0.0, 0.0, 1.0]);
        lines.aabb(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(lines.queued(), 13);
        assert_eq!(clear.state.lock().queued.len(), 13);
    }
}

//! Depth-only pass over opaque and alpha-tested draws.

use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::DEPTH_FORMAT;
use crate::graph::{PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass};
use crate::pipeline_state::{CullMode, DepthState, GraphicsPipelineDesc, PipelineDesc};
use crate::scene_prep::PassMask;
use crate::shader::{GraphicsProgram, PermutationSet, ShaderPermutation};
use crate::types::GpuResourceId;

use super::{CachedPipeline, bind_frame_constants, draw_mesh};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthPrePassConfig {
    /// Also lay down depth for alpha-tested draws.
    pub include_masked: bool,
    pub cull: CullMode,
}

impl Default for DepthPrePassConfig {
    fn default() -> Self {
        Self {
            include_masked: true,
            cull: CullMode::None,
        }
    }
}

/// Published by [`DepthPrePass`] during setup; later passes test against the
/// prepass depth instead of writing their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthPrePassOutput {
    pub depth: GpuResourceId,
}

#[derive(Debug, Default)]
pub struct DepthPrePass {
    config: DepthPrePassConfig,
    opaque: CachedPipeline,
    masked: CachedPipeline,
}

impl DepthPrePass {
    pub const NAME: &'static str = "DepthPrePass";

    pub fn new(config: DepthPrePassConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &DepthPrePassConfig {
        &self.config
    }

    fn pipeline_desc(&self, ctx: &RenderContext<'_>, alpha_test: bool) -> PipelineDesc {
        let view = ctx.view();
        let permutations = PermutationSet::EMPTY
            .with_if(ShaderPermutation::ReverseZ, view.reverse_z())
            .with_if(ShaderPermutation::AlphaTest, alpha_test);
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new(
                if alpha_test { "depth prepass (masked)" } else { "depth prepass" },
                GraphicsProgram::DepthOnly,
            )
            .with_depth(DepthState::read_write(view.depth_compare()), DEPTH_FORMAT)
            .with_permutations(permutations)
            .with_cull(self.config.cull),
        )
    }
}

impl RenderPass for DepthPrePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        ctx.register_pass_output(DepthPrePassOutput {
            depth: ctx.targets.depth(),
        });
        Ok(())
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        PassResourceDeclaration::new().write(ctx.targets.depth(), ResourceState::DEPTH_WRITE)
    }

    fn validate_config(&self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let (width, height) = ctx.targets.extent();
        let viewport = ctx.view().viewport();
        if viewport.x + viewport.width > width as f32 || viewport.y + viewport.height > height as f32 {
            return Err(GraphicsError::validation(
                Self::NAME,
                format!("viewport {viewport:?} exceeds the {width}x{height} depth target"),
            ));
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext<'_>) -> bool {
        self.opaque.needs_rebuild(&self.pipeline_desc(ctx, false))
            || (self.config.include_masked && self.masked.needs_rebuild(&self.pipeline_desc(ctx, true)))
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let opaque = self.pipeline_desc(ctx, false);
        self.opaque.ensure(ctx, &opaque)?;
        if self.config.include_masked {
            let masked = self.pipeline_desc(ctx, true);
            self.masked.ensure(ctx, &masked)?;
        }
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let depth = ctx.targets.depth_attachment();
        recorder.set_render_targets(None, Some(depth));
        if ctx.outputs.claim_clear(depth.resource) {
            recorder.clear_depth(depth, ctx.view().clear_depth());
        }
        recorder.set_viewport(*ctx.view().viewport());
        bind_frame_constants(ctx, recorder);

        recorder.set_pipeline(self.opaque.handle());
        for draw in ctx.frame.draws_matching(PassMask::OPAQUE) {
            draw_mesh(ctx, recorder, draw);
        }
        if self.config.include_masked {
            recorder.set_pipeline(self.masked.handle());
            let masked = ctx
                .frame
                .draws_matching(PassMask::MASKED)
                .filter(|d| !ctx.frame.pass_masks()[*d as usize].contains(PassMask::OPAQUE));
            for draw in masked {
                draw_mesh(ctx, recorder, draw);
            }
        }
        Ok(())
    }
}

//! Forward shading of opaque and alpha-tested draws.

use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{DEPTH_FORMAT, SCENE_COLOR_FORMAT};
use crate::graph::{PassResourceDeclaration, RenderContext, RenderPass};
use crate::pipeline_state::{BlendMode, CullMode, DepthState, GraphicsPipelineDesc, PipelineDesc};
use crate::scene_prep::PassMask;
use crate::shader::{GraphicsProgram, PermutationSet, ShaderPermutation};

use super::{
    CachedPipeline, DepthPrePassOutput, LightCullingOutput, bind_frame_constants, draw_mesh,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderPassConfig {
    /// Clear color for the scene color target. Only the first pass to touch
    /// the target in a frame clears it; `None` loads it.
    pub clear_color: Option<[f32; 4]>,
    pub cull: CullMode,
    /// Fetch lights through the cluster grid when light culling ran.
    pub clustered_lighting: bool,
}

impl Default for ShaderPassConfig {
    fn default() -> Self {
        Self {
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            cull: CullMode::None,
            clustered_lighting: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShaderPass {
    config: ShaderPassConfig,
    opaque: CachedPipeline,
    masked: CachedPipeline,
}

impl ShaderPass {
    pub const NAME: &'static str = "ShaderPass";

    pub fn new(config: ShaderPassConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &ShaderPassConfig {
        &self.config
    }

    fn has_prepass(ctx: &RenderContext<'_>) -> bool {
        ctx.outputs.contains::<DepthPrePassOutput>()
    }

    fn pipeline_desc(&self, ctx: &RenderContext<'_>, alpha_test: bool) -> PipelineDesc {
        let view = ctx.view();
        let depth = if Self::has_prepass(ctx) {
            DepthState::read_only(view.depth_compare())
        } else {
            DepthState::read_write(view.depth_compare())
        };
        let clustered =
            self.config.clustered_lighting && ctx.outputs.contains::<LightCullingOutput>();
        let permutations = PermutationSet::EMPTY
            .with_if(ShaderPermutation::ReverseZ, view.reverse_z())
            .with_if(ShaderPermutation::ClusteredLighting, clustered)
            .with_if(ShaderPermutation::AlphaTest, alpha_test);
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new(
                if alpha_test { "forward (masked)" } else { "forward" },
                GraphicsProgram::ForwardMesh,
            )
            .with_color(SCENE_COLOR_FORMAT, BlendMode::Opaque)
            .with_depth(depth, DEPTH_FORMAT)
            .with_permutations(permutations)
            .with_cull(self.config.cull),
        )
    }
}

impl RenderPass for ShaderPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let mut decl =
            PassResourceDeclaration::new().write(ctx.targets.color(), ResourceState::RENDER_TARGET);
        decl = if Self::has_prepass(ctx) {
            decl.read(ctx.targets.depth(), ResourceState::DEPTH_READ)
        } else {
            decl.write(ctx.targets.depth(), ResourceState::DEPTH_WRITE)
        };
        if let Some(clusters) = ctx.pass_output::<LightCullingOutput>() {
            decl = decl
                .read(clusters.grid, ResourceState::SHADER_RESOURCE)
                .read(clusters.index_list, ResourceState::SHADER_RESOURCE);
        }
        decl
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        if let Some(color) = self.config.clear_color {
            if color.iter().any(|c| !c.is_finite()) {
                return Err(GraphicsError::validation(
                    Self::NAME,
                    format!("clear color {color:?} is not finite"),
                ));
            }
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext<'_>) -> bool {
        self.opaque.needs_rebuild(&self.pipeline_desc(ctx, false))
            || self.masked.needs_rebuild(&self.pipeline_desc(ctx, true))
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let opaque = self.pipeline_desc(ctx, false);
        let masked = self.pipeline_desc(ctx, true);
        self.opaque.ensure(ctx, &opaque)?;
        self.masked.ensure(ctx, &masked)?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let color = ctx.targets.color_attachment();
        let depth = ctx.targets.depth_attachment();
        recorder.set_render_targets(Some(color), Some(depth));
        if let Some(clear) = self.config.clear_color {
            if ctx.outputs.claim_clear(color.resource) {
                recorder.clear_render_target(color, clear);
            }
        }
        if !Self::has_prepass(ctx) && ctx.outputs.claim_clear(depth.resource) {
            recorder.clear_depth(depth, ctx.view().clear_depth());
        }
        recorder.set_viewport(*ctx.view().viewport());
        bind_frame_constants(ctx, recorder);

        let masks = ctx.frame.pass_masks();
        recorder.set_pipeline(self.opaque.handle());
        for draw in ctx.frame.draws_matching(PassMask::OPAQUE) {
            draw_mesh(ctx, recorder, draw);
        }
        recorder.set_pipeline(self.masked.handle());
        for draw in ctx
            .frame
            .draws_matching(PassMask::MASKED)
            .filter(|d| !masks[*d as usize].contains(PassMask::OPAQUE))
        {
            draw_mesh(ctx, recorder, draw);
        }
        Ok(())
    }
}

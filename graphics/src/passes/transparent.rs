//! Alpha-blended and additive draws over the shaded scene.

use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{DEPTH_FORMAT, SCENE_COLOR_FORMAT};
use crate::graph::{PassResourceDeclaration, RenderContext, RenderPass};
use crate::pipeline_state::{BlendMode, CullMode, DepthState, GraphicsPipelineDesc, PipelineDesc};
use crate::scene_prep::PassMask;
use crate::shader::{GraphicsProgram, PermutationSet, ShaderPermutation};

use super::{CachedPipeline, LightCullingOutput, bind_frame_constants, draw_mesh};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransparentPassConfig {
    /// Draw farthest first instead of in emission order.
    pub sort_back_to_front: bool,
    pub cull: CullMode,
}

#[derive(Debug, Default)]
pub struct TransparentPass {
    config: TransparentPassConfig,
    blended: CachedPipeline,
    additive: CachedPipeline,
}

impl TransparentPass {
    pub const NAME: &'static str = "TransparentPass";

    pub fn new(config: TransparentPassConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &TransparentPassConfig {
        &self.config
    }

    fn pipeline_desc(&self, ctx: &RenderContext<'_>, blend: BlendMode) -> PipelineDesc {
        let view = ctx.view();
        let permutations = PermutationSet::EMPTY
            .with_if(ShaderPermutation::ReverseZ, view.reverse_z())
            .with_if(
                ShaderPermutation::ClusteredLighting,
                ctx.outputs.contains::<LightCullingOutput>(),
            )
            .with_if(ShaderPermutation::AlphaBlend, blend == BlendMode::AlphaBlend)
            .with_if(ShaderPermutation::AdditiveBlend, blend == BlendMode::Additive);
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("transparent", GraphicsProgram::ForwardMesh)
                .with_color(SCENE_COLOR_FORMAT, blend)
                .with_depth(DepthState::read_only(view.depth_compare()), DEPTH_FORMAT)
                .with_permutations(permutations)
                .with_cull(self.config.cull),
        )
    }

    fn draws(&self, ctx: &RenderContext<'_>, mask: PassMask) -> Vec<u32> {
        if self.config.sort_back_to_front {
            ctx.frame.draws_back_to_front(mask)
        } else {
            ctx.frame.draws_matching(mask).collect()
        }
    }
}

impl RenderPass for TransparentPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let mut decl = PassResourceDeclaration::new()
            .read(ctx.targets.depth(), ResourceState::DEPTH_READ)
            .write(ctx.targets.color(), ResourceState::RENDER_TARGET);
        if let Some(clusters) = ctx.pass_output::<LightCullingOutput>() {
            decl = decl
                .read(clusters.grid, ResourceState::SHADER_RESOURCE)
                .read(clusters.index_list, ResourceState::SHADER_RESOURCE);
        }
        decl
    }

    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext<'_>) -> bool {
        self.blended
            .needs_rebuild(&self.pipeline_desc(ctx, BlendMode::AlphaBlend))
            || self
                .additive
                .needs_rebuild(&self.pipeline_desc(ctx, BlendMode::Additive))
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let blended = self.pipeline_desc(ctx, BlendMode::AlphaBlend);
        let additive = self.pipeline_desc(ctx, BlendMode::Additive);
        self.blended.ensure(ctx, &blended)?;
        self.additive.ensure(ctx, &additive)?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let blended = self.draws(ctx, PassMask::TRANSPARENT);
        let additive = self.draws(ctx, PassMask::ADDITIVE);
        if blended.is_empty() && additive.is_empty() {
            return Ok(());
        }
        recorder.set_render_targets(
            Some(ctx.targets.color_attachment()),
            Some(ctx.targets.depth_attachment()),
        );
        recorder.set_viewport(*ctx.view().viewport());
        bind_frame_constants(ctx, recorder);
        if !blended.is_empty() {
            recorder.set_pipeline(self.blended.handle());
            for draw in blended {
                draw_mesh(ctx, recorder, draw);
            }
        }
        if !additive.is_empty() {
            recorder.set_pipeline(self.additive.handle());
            for draw in additive {
                draw_mesh(ctx, recorder, draw);
            }
        }
        Ok(())
    }
}

//! Sky background, drawn where depth is still at the far plane.

use kiln_core::keys::ResourceKey;

use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{DEPTH_FORMAT, SCENE_COLOR_FORMAT};
use crate::gpu_types::{INVALID_BINDLESS_SLOT, RootConstantSlot, SkyMode, SkyPassConstants};
use crate::graph::{PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass};
use crate::pipeline_state::{BlendMode, DepthState, GraphicsPipelineDesc, PipelineDesc};
use crate::registries::TextureState;
use crate::resources::FrameStructuredBuffer;
use crate::shader::{GraphicsProgram, PermutationSet, ShaderPermutation};
use crate::types::ShaderVisibleIndex;

use super::{CachedPipeline, bind_frame_constants};

/// Sky sources, tried in order: procedural atmosphere, cubemap, solid color.
/// With none available the sky is black.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPassConfig {
    pub atmosphere: bool,
    /// Only used once the texture is resident; until then the next source
    /// in the chain is drawn.
    pub cubemap: Option<ResourceKey>,
    pub solid_color: Option<[f32; 4]>,
    /// Angular radius of the sun disc in radians.
    pub sun_size: f32,
}

impl Default for SkyPassConfig {
    fn default() -> Self {
        Self {
            atmosphere: true,
            cubemap: None,
            solid_color: None,
            sun_size: 0.05,
        }
    }
}

pub struct SkyPass {
    config: SkyPassConfig,
    constants: FrameStructuredBuffer<SkyPassConstants>,
    constants_index: ShaderVisibleIndex,
    mode: SkyMode,
    pipeline: CachedPipeline,
}

impl std::fmt::Debug for SkyPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkyPass")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Default for SkyPass {
    fn default() -> Self {
        Self::new(SkyPassConfig::default())
    }
}

impl SkyPass {
    pub const NAME: &'static str = "SkyPass";

    pub fn new(config: SkyPassConfig) -> Self {
        Self {
            config,
            constants: FrameStructuredBuffer::new("sky constants"),
            constants_index: ShaderVisibleIndex::INVALID,
            mode: SkyMode::Black,
            pipeline: CachedPipeline::default(),
        }
    }

    pub fn config(&self) -> &SkyPassConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SkyPassConfig) {
        self.config = config;
    }

    /// Source chosen during the last frame preparation.
    pub fn resolved_mode(&self) -> SkyMode {
        self.mode
    }

    fn pipeline_desc(&self, ctx: &RenderContext<'_>) -> PipelineDesc {
        let view = ctx.view();
        let permutations = PermutationSet::EMPTY
            .with_if(ShaderPermutation::ReverseZ, view.reverse_z())
            .with_if(ShaderPermutation::SkyAtmosphere, self.mode == SkyMode::Atmosphere)
            .with_if(ShaderPermutation::SkyCubemap, self.mode == SkyMode::Cubemap);
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("sky", GraphicsProgram::Sky)
                .with_color(SCENE_COLOR_FORMAT, BlendMode::Opaque)
                .with_depth(DepthState::read_only(view.depth_compare()), DEPTH_FORMAT)
                .with_permutations(permutations),
        )
    }
}

impl RenderPass for SkyPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        let cubemap = self.config.cubemap.and_then(|key| {
            let index = ctx.textures.get_or_allocate(ctx.registry, ctx.uploads, key);
            (ctx.textures.state(key) == Some(TextureState::Resident)).then_some(index)
        });
        let (mode, cubemap_slot) = if self.config.atmosphere {
            (SkyMode::Atmosphere, INVALID_BINDLESS_SLOT)
        } else if let Some(index) = cubemap {
            (SkyMode::Cubemap, index.index())
        } else if self.config.solid_color.is_some() {
            (SkyMode::Solid, INVALID_BINDLESS_SLOT)
        } else {
            (SkyMode::Black, INVALID_BINDLESS_SLOT)
        };
        if mode != self.mode {
            log::debug!("sky: {:?} -> {mode:?}", self.mode);
        }
        self.mode = mode;

        let slot = ctx.slot();
        self.constants_index = self.constants.write(
            ctx.registry,
            slot,
            &[SkyPassConstants {
                solid_color: self.config.solid_color.unwrap_or([0.0, 0.0, 0.0, 1.0]),
                mode: mode as u32,
                cubemap_slot,
                sun_size: self.config.sun_size,
                _pad: 0,
            }],
        )?;
        Ok(())
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        PassResourceDeclaration::new()
            .read(ctx.targets.depth(), ResourceState::DEPTH_READ)
            .write(ctx.targets.color(), ResourceState::RENDER_TARGET)
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        if !(self.config.sun_size.is_finite() && self.config.sun_size >= 0.0) {
            return Err(GraphicsError::validation(
                Self::NAME,
                format!("sun size {} must be a non-negative angle", self.config.sun_size),
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
        let color = ctx.targets.color_attachment();
        let depth = ctx.targets.depth_attachment();
        recorder.set_render_targets(Some(color), Some(depth));
        if ctx.outputs.claim_clear(color.resource) {
            recorder.clear_render_target(color, [0.0, 0.0, 0.0, 1.0]);
        }
        // Nothing laid down depth this frame.
        if ctx.outputs.claim_clear(depth.resource) {
            recorder.require_resource_state(depth.resource, ResourceState::DEPTH_WRITE);
            recorder.clear_depth(depth, ctx.view().clear_depth());
            recorder.require_resource_state(depth.resource, ResourceState::DEPTH_READ);
        }
        recorder.set_viewport(*ctx.view().viewport());
        bind_frame_constants(ctx, recorder);
        recorder.set_pipeline(self.pipeline.handle());
        recorder.set_root_constant(RootConstantSlot::PassConstants, self.constants_index.index());
        recorder.draw(3, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_black_until_prepared() {
        let pass = SkyPass::default();
        assert_eq!(pass.resolved_mode(), SkyMode::Black);
        assert!(pass.config().atmosphere);
    }
}

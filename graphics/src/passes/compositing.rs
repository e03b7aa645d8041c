//! Compositing of the scene into the backbuffer.
//!
//! The pass runs an ordered list of tasks, each a fullscreen draw into the
//! backbuffer. Temporal resolve keeps two history textures and alternates
//! between them every frame.

use kiln_core::keys::ResourceKey;

use crate::commands::{AttachmentView, CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::frame::{BACKBUFFER_FORMAT, SCENE_COLOR_FORMAT, Target, create_target};
use crate::gpu_types::{CompositeConstants, CompositeOp, INVALID_BINDLESS_SLOT, RootConstantSlot};
use crate::graph::{PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass};
use crate::pipeline_state::{BlendMode, GraphicsPipelineDesc, PipelineDesc};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::shader::GraphicsProgram;
use crate::types::{
    FenceValue, ShaderVisibleIndex, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};

use super::CachedPipeline;

/// Texture a compositing task samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeSource {
    /// The frame's HDR scene color.
    SceneColor,
    /// Any texture already bound at a shader-visible index.
    Bindless(ShaderVisibleIndex),
    /// A keyed texture, loaded through the texture binder.
    Texture(ResourceKey),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompositingTask {
    /// Replace the backbuffer with the source.
    Copy { source: CompositeSource },
    /// Blend a flat color over the backbuffer.
    Blend { color: [f32; 4], alpha: f32 },
    /// Blend the tinted source over the backbuffer.
    TextureBlend {
        source: CompositeSource,
        tint: [f32; 4],
        alpha: f32,
    },
    /// Reinhard tonemap of the source.
    Tonemap { source: CompositeSource, exposure: f32 },
    /// Temporal resolve of the source against last frame's result.
    Taa {
        source: CompositeSource,
        history_weight: f32,
    },
}

impl CompositingTask {
    fn op(&self) -> CompositeOp {
        match self {
            Self::Copy { .. } => CompositeOp::Copy,
            Self::Blend { .. } => CompositeOp::Blend,
            Self::TextureBlend { .. } => CompositeOp::TextureBlend,
            Self::Tonemap { .. } => CompositeOp::Tonemap,
            Self::Taa { .. } => CompositeOp::Taa,
        }
    }

    fn source(&self) -> Option<CompositeSource> {
        match *self {
            Self::Copy { source }
            | Self::TextureBlend { source, .. }
            | Self::Tonemap { source, .. }
            | Self::Taa { source, .. } => Some(source),
            Self::Blend { .. } => None,
        }
    }

    fn blend(&self) -> BlendMode {
        match self {
            Self::Blend { .. } | Self::TextureBlend { .. } => BlendMode::AlphaBlend,
            _ => BlendMode::Opaque,
        }
    }

    fn check(&self) -> Result<(), String> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{name} {v} is outside 0..=1"))
            }
        };
        match *self {
            Self::Copy { .. } => Ok(()),
            Self::Blend { alpha, .. } | Self::TextureBlend { alpha, .. } => unit("alpha", alpha),
            Self::Tonemap { exposure, .. } => {
                if exposure.is_finite() && exposure > 0.0 {
                    Ok(())
                } else {
                    Err(format!("exposure {exposure} must be positive"))
                }
            }
            Self::Taa { history_weight, .. } => unit("history weight", history_weight),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositingPassConfig {
    pub tasks: Vec<CompositingTask>,
    /// Backbuffer clear when compositing is the first pass to write it.
    pub clear_color: [f32; 4],
}

impl Default for CompositingPassConfig {
    fn default() -> Self {
        Self {
            tasks: vec![CompositingTask::Tonemap {
                source: CompositeSource::SceneColor,
                exposure: 1.0,
            }],
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawTarget {
    Backbuffer,
    History(usize),
}

#[derive(Debug, Clone, Copy)]
struct CompositeDraw {
    constants: ShaderVisibleIndex,
    target: DrawTarget,
    blend: BlendMode,
}

#[derive(Debug)]
struct History {
    extent: (u32, u32),
    textures: [Target; 2],
    /// Texture written this frame; the other one holds last frame's result.
    current: usize,
    valid: bool,
}

impl History {
    fn create(registry: &mut ResourceRegistry, extent: (u32, u32)) -> Result<Self, GraphicsError> {
        let texture = |registry: &mut ResourceRegistry, label: &str| {
            create_target(
                registry,
                TextureDescriptor::new_2d(
                    extent.0,
                    extent.1,
                    SCENE_COLOR_FORMAT,
                    TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
                )
                .with_label(label),
            )
        };
        let a = texture(registry, "taa history a")?;
        let b = texture(registry, "taa history b")?;
        Ok(Self {
            extent,
            textures: [a, b],
            current: 0,
            valid: false,
        })
    }

    fn previous(&self) -> &Target {
        &self.textures[1 - self.current]
    }

    fn release(&self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        for target in &self.textures {
            registry.release(target.texture, retire_after);
        }
    }
}

pub struct CompositingPass {
    config: CompositingPassConfig,
    constants: Vec<FrameStructuredBuffer<CompositeConstants>>,
    draws: Vec<CompositeDraw>,
    history: Option<History>,
    opaque: CachedPipeline,
    blended: CachedPipeline,
    resolve: CachedPipeline,
}

impl std::fmt::Debug for CompositingPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositingPass")
            .field("config", &self.config)
            .field("draws", &self.draws.len())
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for CompositingPass {
    fn default() -> Self {
        Self::new(CompositingPassConfig::default())
    }
}

impl CompositingPass {
    pub const NAME: &'static str = "CompositingPass";

    pub fn new(config: CompositingPassConfig) -> Self {
        Self {
            config,
            constants: Vec::new(),
            draws: Vec::new(),
            history: None,
            opaque: CachedPipeline::default(),
            blended: CachedPipeline::default(),
            resolve: CachedPipeline::default(),
        }
    }

    pub fn config(&self) -> &CompositingPassConfig {
        &self.config
    }

    /// Replace the task list; takes effect at the next frame preparation.
    pub fn set_tasks(&mut self, tasks: Vec<CompositingTask>) {
        self.config.tasks = tasks;
    }

    fn has_taa(&self) -> bool {
        self.config
            .tasks
            .iter()
            .any(|t| matches!(t, CompositingTask::Taa { .. }))
    }

    fn pipeline_desc(label: &str, format: TextureFormat, blend: BlendMode) -> PipelineDesc {
        PipelineDesc::Graphics(
            GraphicsPipelineDesc::new(label, GraphicsProgram::Composite).with_color(format, blend),
        )
    }

    fn pipeline_descs() -> [PipelineDesc; 3] {
        [
            Self::pipeline_desc("composite", BACKBUFFER_FORMAT, BlendMode::Opaque),
            Self::pipeline_desc("composite (blend)", BACKBUFFER_FORMAT, BlendMode::AlphaBlend),
            Self::pipeline_desc("taa resolve", SCENE_COLOR_FORMAT, BlendMode::Opaque),
        ]
    }

    fn source_index(ctx: &mut PassSetupContext<'_>, source: CompositeSource) -> u32 {
        match source {
            CompositeSource::SceneColor => ctx.targets.color_srv().index(),
            CompositeSource::Bindless(index) => index.index(),
            CompositeSource::Texture(key) => ctx
                .textures
                .get_or_allocate(ctx.registry, ctx.uploads, key)
                .index(),
        }
    }

    fn push_draw(
        &mut self,
        ctx: &mut PassSetupContext<'_>,
        constants: CompositeConstants,
        target: DrawTarget,
        blend: BlendMode,
    ) -> Result<(), GraphicsError> {
        let n = self.draws.len();
        if self.constants.len() == n {
            self.constants
                .push(FrameStructuredBuffer::new(format!("composite constants {n}")));
        }
        let slot = ctx.slot();
        let index = self.constants[n].write(ctx.registry, slot, &[constants])?;
        self.draws.push(CompositeDraw {
            constants: index,
            target,
            blend,
        });
        Ok(())
    }

    fn attachment(&self, ctx: &RenderContext<'_>, target: DrawTarget) -> Option<AttachmentView> {
        match target {
            DrawTarget::Backbuffer => Some(ctx.targets.backbuffer_attachment()),
            DrawTarget::History(i) => self.history.as_ref().map(|h| h.textures[i].attachment),
        }
    }

    /// Release history textures and constant buffers.
    pub fn release(&mut self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        if let Some(history) = self.history.take() {
            history.release(registry, retire_after);
        }
        for constants in &mut self.constants {
            constants.release(registry, retire_after);
        }
        self.constants.clear();
        self.draws.clear();
    }
}

impl RenderPass for CompositingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        self.draws.clear();
        let extent = ctx.targets.extent();
        if self.has_taa() {
            if self.history.as_ref().is_some_and(|h| h.extent != extent) {
                if let Some(old) = self.history.take() {
                    old.release(ctx.registry, ctx.retire_after);
                }
            }
            match &mut self.history {
                Some(history) => history.current = 1 - history.current,
                None => self.history = Some(History::create(ctx.registry, extent)?),
            }
        } else if let Some(old) = self.history.take() {
            old.release(ctx.registry, ctx.retire_after);
        }

        let tasks = self.config.tasks.clone();
        for task in tasks {
            let source_slot = task
                .source()
                .map_or(INVALID_BINDLESS_SLOT, |s| Self::source_index(ctx, s));
            let mut constants = CompositeConstants {
                op: task.op() as u32,
                source_slot,
                history_slot: INVALID_BINDLESS_SLOT,
                _pad0: 0,
                tint: [1.0; 4],
                alpha: 1.0,
                exposure: 1.0,
                history_weight: 0.0,
                _pad1: 0.0,
            };
            match task {
                CompositingTask::Copy { .. } => {}
                CompositingTask::Blend { color, alpha } => {
                    constants.tint = color;
                    constants.alpha = alpha;
                }
                CompositingTask::TextureBlend { tint, alpha, .. } => {
                    constants.tint = tint;
                    constants.alpha = alpha;
                }
                CompositingTask::Tonemap { exposure, .. } => constants.exposure = exposure,
                CompositingTask::Taa { history_weight, .. } => {
                    let Some(history) = &self.history else {
                        continue;
                    };
                    let current = history.current;
                    if history.valid {
                        constants.history_slot = history.previous().srv.index();
                    }
                    let resolved = history.textures[current].srv.index();
                    constants.history_weight = history_weight;
                    self.push_draw(ctx, constants, DrawTarget::History(current), BlendMode::Opaque)?;
                    constants = CompositeConstants {
                        op: CompositeOp::Copy as u32,
                        source_slot: resolved,
                        history_slot: INVALID_BINDLESS_SLOT,
                        history_weight: 0.0,
                        ..constants
                    };
                }
            }
            self.push_draw(ctx, constants, DrawTarget::Backbuffer, task.blend())?;
        }
        Ok(())
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let mut decl = PassResourceDeclaration::new()
            .read(ctx.targets.color(), ResourceState::SHADER_RESOURCE)
            .write(ctx.targets.backbuffer(), ResourceState::RENDER_TARGET);
        if let Some(history) = &self.history {
            decl = decl
                .read(history.previous().texture, ResourceState::SHADER_RESOURCE)
                .write(history.textures[history.current].texture, ResourceState::RENDER_TARGET);
        }
        decl
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let taa_tasks = self
            .config
            .tasks
            .iter()
            .filter(|t| matches!(t, CompositingTask::Taa { .. }))
            .count();
        if taa_tasks > 1 {
            return Err(GraphicsError::validation(
                Self::NAME,
                format!("{taa_tasks} temporal resolve tasks share one history"),
            ));
        }
        for (i, task) in self.config.tasks.iter().enumerate() {
            task.check()
                .map_err(|reason| GraphicsError::validation(Self::NAME, format!("task {i}: {reason}")))?;
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, _ctx: &RenderContext<'_>) -> bool {
        let [opaque, blended, resolve] = Self::pipeline_descs();
        self.opaque.needs_rebuild(&opaque)
            || self.blended.needs_rebuild(&blended)
            || (self.has_taa() && self.resolve.needs_rebuild(&resolve))
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let [opaque, blended, resolve] = Self::pipeline_descs();
        self.opaque.ensure(ctx, &opaque)?;
        self.blended.ensure(ctx, &blended)?;
        if self.has_taa() {
            self.resolve.ensure(ctx, &resolve)?;
        }
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let (width, height) = ctx.targets.extent();
        let backbuffer = ctx.targets.backbuffer_attachment();
        if ctx.outputs.claim_clear(backbuffer.resource) {
            recorder.clear_render_target(backbuffer, self.config.clear_color);
        }
        recorder.set_viewport(Viewport::from_dimensions(width, height));

        let mut bound = None;
        for draw in &self.draws {
            let Some(target) = self.attachment(ctx, draw.target) else {
                continue;
            };
            if bound != Some(draw.target) {
                // The copy into the backbuffer samples the resolved history.
                if let (Some(DrawTarget::History(i)), Some(history)) = (bound, &self.history) {
                    recorder.require_resource_state(
                        history.textures[i].texture,
                        ResourceState::SHADER_RESOURCE,
                    );
                }
                recorder.set_render_targets(Some(target), None);
                bound = Some(draw.target);
            }
            let pipeline = match (draw.target, draw.blend) {
                (DrawTarget::History(_), _) => self.resolve.handle(),
                (DrawTarget::Backbuffer, BlendMode::Opaque) => self.opaque.handle(),
                (DrawTarget::Backbuffer, _) => self.blended.handle(),
            };
            recorder.set_pipeline(pipeline);
            recorder.set_root_constant(RootConstantSlot::PassConstants, draw.constants.index());
            recorder.draw(3, 1);
        }
        if let Some(history) = &mut self.history {
            history.valid = true;
        }
        Ok(())
    }
}

//! Built-in render passes.
//!
//! | Pass | Kind | Writes |
//! |------|------|--------|
//! | [`DepthPrePass`] | Graphics | depth |
//! | [`LightCullingPass`] | Compute | cluster grid, cluster index list |
//! | [`ShaderPass`] | Graphics | scene color (+ depth without a prepass) |
//! | [`SkyPass`] | Graphics | scene color where depth is at the far plane |
//! | [`TransparentPass`] | Graphics | scene color |
//! | [`GpuDebugClearPass`] / [`GpuDebugDrawPass`] | Compute / Graphics | debug line counter, scene color |
//! | [`CompositingPass`] | Graphics | backbuffer |
//! | [`ImGuiPass`] | Graphics | backbuffer |
//!
//! Every pass binds the engine, scene and environment constants itself;
//! nothing carries over from one command list to the next.

mod compositing;
mod depth_prepass;
mod gpu_debug;
mod imgui;
mod light_culling;
mod shader_pass;
mod sky;
mod transparent;

pub use compositing::{CompositeSource, CompositingPass, CompositingPassConfig, CompositingTask};
pub use depth_prepass::{DepthPrePass, DepthPrePassConfig, DepthPrePassOutput};
pub use gpu_debug::{
    GpuDebugClearPass, GpuDebugDrawPass, GpuDebugLines, GpuDebugPassConfig, gpu_debug_passes,
};
pub use imgui::{
    ImGuiBackend, ImGuiDrawData, ImGuiFrameModule, ImGuiPass, ImGuiPassConfig,
    ScreenSpaceImGuiBackend, SharedImGuiDrawData,
};
pub use light_culling::{LightCullingOutput, LightCullingPass, LightCullingPassConfig};
pub use shader_pass::{ShaderPass, ShaderPassConfig};
pub use sky::{SkyPass, SkyPassConfig};
pub use transparent::{TransparentPass, TransparentPassConfig};

use kiln_core::math::Vec3;

use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::gpu_types::{ConstantRegister, EnvironmentDynamicData, RootConstantSlot};
use crate::graph::RenderContext;
use crate::pipeline_state::PipelineDesc;
use crate::types::PipelineHandle;

/// Environment block for the frame: the designated sun plus whatever light
/// culling published.
pub fn environment_data(ctx: &RenderContext<'_>) -> EnvironmentDynamicData {
    let mut env = EnvironmentDynamicData::default();
    let view = ctx.view();
    env.z_near = view.near_plane();
    env.z_far = view.far_plane();
    if let Some(sun) = ctx.frame.designated_sun_light() {
        let to_sun = (-sun.direction).try_normalize(1e-8).unwrap_or(Vec3::y());
        env.sun_valid = 1;
        env.sun_direction = to_sun.into();
        env.sun_intensity = sun.intensity;
        env.sun_color = sun.color.into();
    }
    if let Some(clusters) = ctx.pass_output::<LightCullingOutput>() {
        clusters.apply(&mut env);
    }
    env
}

/// Bind `b0`, `b1` and `b3`.
pub(crate) fn bind_frame_constants(ctx: &RenderContext<'_>, recorder: &mut CommandRecorder) {
    recorder.set_constants(ConstantRegister::Engine, &ctx.engine);
    recorder.set_constants(ConstantRegister::Scene, ctx.frame.scene_constants());
    recorder.set_constants(ConstantRegister::Environment, &environment_data(ctx));
}

/// Record one mesh draw from the frame's draw-metadata buffer.
pub(crate) fn draw_mesh(ctx: &RenderContext<'_>, recorder: &mut CommandRecorder, draw: u32) {
    let Some(meta) = ctx.frame.draw_metadata().get(draw as usize) else {
        return;
    };
    recorder.set_root_constant(RootConstantSlot::DrawIndex, draw);
    recorder.draw(meta.index_count, 1);
}

/// A pipeline a pass holds, rebuilt only when its description changes.
#[derive(Debug, Default)]
pub(crate) struct CachedPipeline {
    key: Option<u64>,
    handle: PipelineHandle,
}

impl CachedPipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn needs_rebuild(&self, desc: &PipelineDesc) -> bool {
        self.key != Some(desc.hash_key())
    }

    pub fn ensure(
        &mut self,
        ctx: &RenderContext<'_>,
        desc: &PipelineDesc,
    ) -> Result<PipelineHandle, GraphicsError> {
        if self.needs_rebuild(desc) {
            self.handle = ctx.pipelines.get_or_create(ctx.backend, desc)?;
            self.key = Some(desc.hash_key());
        }
        Ok(self.handle)
    }
}

/// A prepared single-cube frame on the dummy backend for pass-level tests.
#[cfg(all(test, feature = "dummy"))]
mod fixture {
    use std::sync::Arc;

    use crate::config::GraphicsConfig;
    use crate::gpu_types::EngineConstants;
    use crate::graph::{PassOutputs, RenderContext};
    use crate::graphics::Graphics;
    use crate::scene::{InMemoryTextureSource, MeshAsset, Renderable, SceneNode, SceneSnapshot};
    use crate::scene_prep::ScenePrep;
    use crate::types::{FrameSequenceNumber, FrameSlot, Viewport};
    use crate::view::{CameraResolver, PerspectiveCamera};

    pub(super) struct PassFixture {
        graphics: Graphics,
        pub(super) outputs: PassOutputs,
    }

    impl PassFixture {
        pub(super) fn new(camera: PerspectiveCamera, viewport: Viewport) -> Self {
            let mut graphics =
                Graphics::new(GraphicsConfig::default(), Arc::new(InMemoryTextureSource::new()))
                    .unwrap();
            let scene = SceneSnapshot::new().with_node(
                SceneNode::new("cube")
                    .with_renderable(Renderable::new(Arc::new(MeshAsset::cube("cube", 0.5)))),
            );
            let view = camera.resolve(viewport).unwrap();
            let sequence = FrameSequenceNumber::new(1);
            let items = ScenePrep::default().run(&scene, &view, sequence).items;
            let g = &mut graphics;
            g.coordinator
                .prepare(
                    &mut g.registry,
                    &mut g.uploads,
                    &scene,
                    &view,
                    &items,
                    sequence,
                    FrameSlot::new(0),
                )
                .unwrap();
            Self {
                graphics,
                outputs: PassOutputs::new(),
            }
        }

        /// Full-target view from `camera`.
        pub(super) fn with_camera(camera: PerspectiveCamera) -> Self {
            let (width, height) = GraphicsConfig::default().resolution;
            Self::new(camera, Viewport::from_dimensions(width, height))
        }

        pub(super) fn context(&self) -> RenderContext<'_> {
            let g = &self.graphics;
            RenderContext {
                frame: g.coordinator.prepared_frame().unwrap(),
                registry: &g.registry,
                targets: &g.targets,
                pipelines: &g.pipelines,
                backend: g.backend.as_ref(),
                engine: EngineConstants::default(),
                outputs: &self.outputs,
            }
        }

        pub(super) fn pipelines_created(&self) -> usize {
            self.graphics.pipelines.len()
        }
    }
}

//! End-to-end frame tests on the dummy backend.
//!
//! Each test builds a scene snapshot and a render graph, runs whole frames
//! through the orchestrator and reads the results back from the frame
//! targets.
//!
//! ```bash
//! cargo test -p kiln-graphics --test frame_tests
//! ```

#![cfg(feature = "dummy")]

mod common;

use std::sync::Arc;

use kiln_core::keys::ResourceKey;
use kiln_core::math::Vec3;
use parking_lot::Mutex;
use rstest::rstest;

use common::{
    CENTER, EXTENT, assert_texel_near, blue, camera, default_graphics, dummy_graphics, graph_of,
    mesh_node, quad, red, solid_material, texel, triangle_scene,
};
use kiln_graphics::backend::DummyBackend;
use kiln_graphics::commands::{CommandRecorder, ResourceState};
use kiln_graphics::config::FenceMode;
use kiln_graphics::graph::{PassResourceDeclaration, RenderContext, RenderPass};
use kiln_graphics::passes::{
    CompositingPass, DepthPrePass, GpuDebugPassConfig, ImGuiDrawData, ImGuiFrameModule, ImGuiPass,
    LightCullingPass, ShaderPass, ShaderPassConfig, SkyPass, SkyPassConfig, TransparentPass,
    gpu_debug_passes,
};
use kiln_graphics::pipeline_state::CompareOp;
use kiln_graphics::registries::TextureState;
use kiln_graphics::scene::{
    InMemoryTextureSource, MaterialAsset, MaterialDomain, SceneLight, SceneSnapshot, TextureData,
};
use kiln_graphics::types::{FrameSequenceNumber, FrameSlot, GpuResourceId, Viewport};
use kiln_graphics::view::CameraResolver;
use kiln_graphics::{
    FrameModule, FrameOrchestrator, GpuBackend, GraphicsConfig, GraphicsError, PhaseId, QueueRole,
};

// ============================================================================
// Smoke
// ============================================================================

#[test]
fn lit_triangle_reaches_the_backbuffer() {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(ShaderPass::default()),
        Box::new(CompositingPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    let report = frames.run_frame(&triangle_scene(), &camera()).unwrap();

    assert!(!report.skipped);
    assert_eq!(report.draw_count, 1);
    for phase in PhaseId::ALL {
        assert!(report.completed(phase), "{phase:?} did not complete");
    }
    let prepared = frames.graphics().coordinator().prepared_frame().unwrap();
    assert_eq!(prepared.draw_metadata()[0].index_count, 3);
    assert_eq!(backend.presented_frames(), 1);

    let targets = frames.graphics().targets();
    let scene_color = texel(&backend, targets.color(), CENTER.0, CENTER.1);
    assert!(scene_color[0] > 0.5, "lit red expected, got {scene_color:?}");
    assert!(scene_color[1] < 0.05);

    let out = texel(&backend, targets.backbuffer(), CENTER.0, CENTER.1);
    assert!(out[0] > 0.3 && out[0] < 1.0, "tonemapped red expected, got {out:?}");
    assert!(out[1] < 0.05);
    assert_eq!(backend.last_presented(), Some(targets.backbuffer()));
}

#[test]
fn background_stays_at_the_clear_color() {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    frames.run_frame(&triangle_scene(), &camera()).unwrap();

    let corner = texel(&backend, frames.graphics().targets().color(), 0, 0);
    assert_texel_near(corner, [0.0, 0.0, 0.0, 1.0], 1e-6);
}

// ============================================================================
// Sky
// ============================================================================

const SKY_BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

fn sky_frame(config: SkyPassConfig, textures: Arc<InMemoryTextureSource>, frames: usize) -> [f32; 4] {
    let (backend, graphics) = dummy_graphics(GraphicsConfig::default(), textures);
    let graph = graph_of(vec![Box::new(SkyPass::new(config))]);
    let mut orchestrator = FrameOrchestrator::new(graphics, graph);
    for _ in 0..frames {
        let report = orchestrator.run_frame(&SceneSnapshot::new(), &camera()).unwrap();
        assert!(!report.skipped);
    }
    texel(&backend, orchestrator.graphics().targets().color(), CENTER.0, CENTER.1)
}

#[rstest]
#[case::solid_color(
    SkyPassConfig { atmosphere: false, solid_color: Some(SKY_BLUE), ..Default::default() },
    SKY_BLUE
)]
#[case::nothing_configured(
    SkyPassConfig { atmosphere: false, ..Default::default() },
    [0.0, 0.0, 0.0, 1.0]
)]
#[case::missing_cubemap(
    SkyPassConfig {
        atmosphere: false,
        cubemap: Some(ResourceKey::new(2, 404)),
        solid_color: Some(SKY_BLUE),
        ..Default::default()
    },
    SKY_BLUE
)]
fn sky_falls_back_to_the_next_source(#[case] config: SkyPassConfig, #[case] expected: [f32; 4]) {
    let color = sky_frame(config, Arc::new(InMemoryTextureSource::new()), 2);
    assert_texel_near(color, expected, 1e-4);
}

#[test]
fn atmosphere_wins_over_every_other_source() {
    let textures = Arc::new(InMemoryTextureSource::new());
    let key = ResourceKey::new(2, 1);
    textures.insert(key, TextureData::solid_cube(2, [0, 255, 0, 255]));
    let config = SkyPassConfig {
        atmosphere: true,
        cubemap: Some(key),
        solid_color: Some(SKY_BLUE),
        ..Default::default()
    };

    let color = sky_frame(config, textures, 2);

    // Horizon tint: neither the cubemap's green nor the solid blue.
    assert!(color[0] > 0.4, "{color:?}");
    assert!(color[1] < 0.95 && color[2] > 0.5, "{color:?}");
}

#[test]
fn cubemap_is_drawn_once_resident() {
    let textures = Arc::new(InMemoryTextureSource::new());
    let key = ResourceKey::new(2, 1);
    textures.insert(key, TextureData::solid_cube(2, [0, 255, 0, 255]));
    let config = SkyPassConfig {
        atmosphere: false,
        cubemap: Some(key),
        solid_color: Some(SKY_BLUE),
        ..Default::default()
    };

    // First frame: the cubemap upload is still pending.
    assert_texel_near(sky_frame(config, textures.clone(), 1), SKY_BLUE, 1e-4);
    assert_texel_near(sky_frame(config, textures, 2), [0.0, 1.0, 0.0, 1.0], 1e-3);
}

// ============================================================================
// Transparency
// ============================================================================

fn emissive(name: &str, color: [f32; 4]) -> Arc<MaterialAsset> {
    // Ambient plus emissive comes to exactly one with no lights in the scene.
    Arc::new(MaterialAsset::new(name).with_base_color(color).with_emissive(0.9))
}

fn blend_frame(with_glass: bool) -> ([f32; 4], f32) {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(DepthPrePass::default()),
        Box::new(ShaderPass::default()),
        Box::new(TransparentPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let mut scene = SceneSnapshot::new().with_node(mesh_node(
        "wall",
        quad("wall", 2.0),
        emissive("blue", [0.0, 0.0, 1.0, 1.0]),
        Vec3::zeros(),
    ));
    if with_glass {
        let glass = Arc::new(
            MaterialAsset::new("glass")
                .with_base_color([1.0, 0.0, 0.0, 0.5])
                .with_emissive(0.9)
                .with_domain(MaterialDomain::Transparent),
        );
        scene = scene.with_node(mesh_node("glass", quad("glass", 1.0), glass, Vec3::new(0.0, 0.0, 1.0)));
    }

    frames.run_frame(&scene, &camera()).unwrap();

    let targets = frames.graphics().targets();
    let color = texel(&backend, targets.color(), CENTER.0, CENTER.1);
    let depth = texel(&backend, targets.depth(), CENTER.0, CENTER.1)[0];
    (color, depth)
}

#[test]
fn transparent_surface_blends_over_the_opaque_one() {
    let (opaque_color, opaque_depth) = blend_frame(false);
    assert_texel_near(opaque_color, [0.0, 0.0, 1.0, 1.0], 1e-3);

    let (color, depth) = blend_frame(true);
    assert_texel_near(color, [0.5, 0.0, 0.5, 1.0], 1e-3);
    // Tested against depth but never written to it.
    assert_eq!(depth, opaque_depth);
}

// ============================================================================
// Culling
// ============================================================================

#[test]
fn nodes_beyond_the_far_plane_are_not_drawn() {
    let (_backend, graphics) = default_graphics();
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let cube = Arc::new(kiln_graphics::scene::MeshAsset::cube("cube", 0.5));
    let scene = SceneSnapshot::new()
        .with_node(mesh_node("near", cube.clone(), red(), Vec3::zeros()))
        .with_node(mesh_node("far", cube, red(), Vec3::new(0.0, 0.0, -1000.0)));

    let report = frames.run_frame(&scene, &camera()).unwrap();

    assert_eq!(report.draw_count, 1);
    let prepared = frames.graphics().coordinator().prepared_frame().unwrap();
    assert_eq!(prepared.len(), 1);
    assert!(prepared.world_spheres()[0].center.norm() < 1e-4);
}

// ============================================================================
// Depth
// ============================================================================

#[rstest]
#[case::standard(false)]
#[case::reverse_z(true)]
fn depth_prepass_keeps_the_nearest_surface(#[case] reverse_z: bool) {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(DepthPrePass::default()),
        Box::new(ShaderPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    // The far quad is submitted last so draw order alone would let it win.
    let scene = SceneSnapshot::new()
        .with_node(mesh_node("front", quad("front", 1.0), red(), Vec3::zeros()))
        .with_node(mesh_node(
            "back",
            quad("back", 1.0),
            blue(),
            Vec3::new(0.0, 0.0, -2.0),
        ));
    let camera = camera().with_reverse_z(reverse_z);

    let report = frames.run_frame(&scene, &camera).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.draw_count, 2);

    let view = camera
        .resolve(Viewport::from_dimensions(EXTENT, EXTENT))
        .unwrap();
    if reverse_z {
        assert_eq!(view.clear_depth(), 0.0);
        assert_eq!(view.depth_compare(), CompareOp::GreaterEqual);
    } else {
        assert_eq!(view.clear_depth(), 1.0);
        assert_eq!(view.depth_compare(), CompareOp::LessEqual);
    }

    let targets = frames.graphics().targets();
    let color = texel(&backend, targets.color(), CENTER.0, CENTER.1);
    assert!(color[0] > 0.05, "front quad expected, got {color:?}");
    assert!(color[2] < 1e-4, "back quad leaked through: {color:?}");

    let corner = texel(&backend, targets.depth(), 0, 0)[0];
    assert_eq!(corner, view.clear_depth());
    let center = texel(&backend, targets.depth(), CENTER.0, CENTER.1)[0];
    assert!(center > 0.0 && center < 1.0, "depth {center}");
}

// ============================================================================
// Textures
// ============================================================================

#[test]
fn placeholder_is_replaced_once_the_upload_completes() {
    let textures = Arc::new(InMemoryTextureSource::new());
    let key = ResourceKey::new(1, 7);
    textures.insert(key, TextureData::solid(4, 4, [0, 255, 0, 255]));
    let (backend, graphics) = dummy_graphics(
        GraphicsConfig::default().with_fence_mode(FenceMode::Manual),
        textures,
    );
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let material = Arc::new(
        MaterialAsset::new("textured")
            .with_base_color([1.0; 4])
            .with_base_color_texture(key),
    );
    let scene = SceneSnapshot::new().with_node(mesh_node(
        "quad",
        quad("quad", 1.0),
        material,
        Vec3::zeros(),
    ));

    // Frame 1: the upload is still in flight, so the magenta placeholder is
    // sampled through the texture's own index.
    frames.run_frame(&scene, &camera()).unwrap();
    let binder = frames.graphics().coordinator().textures();
    assert_eq!(binder.state(key), Some(TextureState::Pending));
    let index = binder.index_of(key).unwrap();
    assert_ne!(index, binder.placeholder_index());
    assert_texel_near(
        backend.sample_descriptor(index, 0.5, 0.5).unwrap(),
        [1.0, 0.0, 1.0, 1.0],
        1e-6,
    );
    let color = texel(&backend, frames.graphics().targets().color(), CENTER.0, CENTER.1);
    assert_texel_near(color, [0.1, 0.0, 0.1, 1.0], 0.02);

    // Frame 2: same index, now pointing at the real texture.
    backend.complete_all();
    frames.run_frame(&scene, &camera()).unwrap();
    let binder = frames.graphics().coordinator().textures();
    assert_eq!(binder.state(key), Some(TextureState::Resident));
    assert_eq!(binder.index_of(key), Some(index));
    assert_texel_near(
        backend.sample_descriptor(index, 0.5, 0.5).unwrap(),
        [0.0, 1.0, 0.0, 1.0],
        1e-6,
    );
    let color = texel(&backend, frames.graphics().targets().color(), CENTER.0, CENTER.1);
    assert_texel_near(color, [0.0, 0.1, 0.0, 1.0], 0.02);
}

#[test]
fn missing_texture_falls_back_to_the_error_texture() {
    let key = ResourceKey::new(1, 404);
    let (_backend, graphics) = default_graphics();
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let material = Arc::new(MaterialAsset::new("broken").with_base_color_texture(key));
    let scene = SceneSnapshot::new().with_node(mesh_node(
        "quad",
        quad("quad", 1.0),
        material,
        Vec3::zeros(),
    ));

    let report = frames.run_frame(&scene, &camera()).unwrap();

    assert!(!report.skipped);
    let binder = frames.graphics().coordinator().textures();
    assert_eq!(binder.state(key), Some(TextureState::Failed));
}

// ============================================================================
// GPU debug lines
// ============================================================================

fn green_texels(backend: &DummyBackend, texture: GpuResourceId) -> usize {
    (0..EXTENT)
        .flat_map(|y| (0..EXTENT).map(move |x| (x, y)))
        .filter(|&(x, y)| {
            let c = texel(backend, texture, x, y);
            c[1] > 0.5 && c[0] < 0.1 && c[2] < 0.1
        })
        .count()
}

#[test]
fn debug_lines_are_drawn_from_the_indirect_args() {
    let (backend, graphics) = default_graphics();
    let (debug_clear, debug_draw, lines) = gpu_debug_passes(GpuDebugPassConfig::default());
    let graph = graph_of(vec![
        Box::new(ShaderPass::default()),
        Box::new(debug_clear),
        Box::new(debug_draw),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let color = frames.graphics().targets().color();
    let scene = SceneSnapshot::new();

    lines.line(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), [0.0, 1.0, 0.0, 1.0]);
    let before = backend.fragments_written();
    assert!(!frames.run_frame(&scene, &camera()).unwrap().skipped);
    let drawn = backend.fragments_written() - before;
    assert!(drawn > 0);
    assert!(green_texels(&backend, color) > 0);
    assert_eq!(lines.queued(), 0);

    // Nothing queued: the clear dispatch zeroes the args and the draw is empty.
    let before = backend.fragments_written();
    assert!(!frames.run_frame(&scene, &camera()).unwrap().skipped);
    assert_eq!(backend.fragments_written(), before);
    assert_eq!(green_texels(&backend, color), 0);
}

#[test]
fn debug_lines_over_budget_are_dropped() {
    let line_fragments = |max_lines: u32| {
        let (backend, graphics) = default_graphics();
        let (debug_clear, debug_draw, lines) = gpu_debug_passes(GpuDebugPassConfig {
            max_lines,
            depth_test: false,
        });
        let graph = graph_of(vec![Box::new(debug_clear), Box::new(debug_draw)]);
        let mut frames = FrameOrchestrator::new(graphics, graph);
        for y in [-0.5, 0.5] {
            lines.line(Vec3::new(-1.0, y, 0.0), Vec3::new(1.0, y, 0.0), [0.0, 1.0, 0.0, 1.0]);
        }
        let before = backend.fragments_written();
        assert!(!frames.run_frame(&SceneSnapshot::new(), &camera()).unwrap().skipped);
        backend.fragments_written() - before
    };
    let one = line_fragments(1);
    let both = line_fragments(2);
    assert!(one > 0);
    assert!(both > one);
}

// ============================================================================
// Full graph
// ============================================================================

#[test]
fn full_graph_records_without_missing_transitions() {
    let (backend, graphics) = default_graphics();
    let (debug_clear, debug_draw, lines) = gpu_debug_passes(GpuDebugPassConfig::default());
    let ui = Arc::new(Mutex::new(ImGuiDrawData {
        display_size: [EXTENT as f32, EXTENT as f32],
        ..Default::default()
    }));
    ui.lock().push_rect([0.0, 0.0], [4.0, 4.0], [1.0; 4]);
    let graph = graph_of(vec![
        Box::new(DepthPrePass::default()),
        Box::new(LightCullingPass::default()),
        Box::new(ShaderPass::default()),
        Box::new(SkyPass::default()),
        Box::new(TransparentPass::default()),
        Box::new(debug_clear),
        Box::new(debug_draw),
        Box::new(CompositingPass::default()),
        Box::new(ImGuiPass::screen_space(ui)),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let glass = Arc::new(
        MaterialAsset::new("glass")
            .with_base_color([0.2, 0.4, 1.0, 0.5])
            .with_domain(MaterialDomain::Transparent),
    );
    let scene = triangle_scene()
        .with_node(mesh_node(
            "glass",
            quad("glass", 0.5),
            glass,
            Vec3::new(0.0, 0.0, 1.0),
        ))
        .with_light(SceneLight::Directional(
            kiln_graphics::scene::DirectionalLight::sun(Vec3::new(0.0, -1.0, -1.0), 0.5),
        ));
    lines.aabb(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0), [0.0, 1.0, 0.0, 1.0]);

    for _ in 0..2 {
        let report = frames.run_frame(&scene, &camera()).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.draw_count, 2);
        assert!(
            report.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            report.diagnostics
        );
        for phase in PhaseId::ALL {
            assert!(report.completed(phase), "{phase:?} did not complete");
        }
    }
    assert_eq!(backend.presented_frames(), 2);
}

#[test]
fn light_culling_does_not_change_shading() {
    let render = |passes: Vec<Box<dyn RenderPass>>| {
        let (backend, graphics) = default_graphics();
        let mut frames = FrameOrchestrator::new(graphics, graph_of(passes));
        frames.run_frame(&triangle_scene(), &camera()).unwrap();
        texel(&backend, frames.graphics().targets().color(), CENTER.0, CENTER.1)
    };

    let clustered = render(vec![
        Box::new(DepthPrePass::default()),
        Box::new(LightCullingPass::default()),
        Box::new(ShaderPass::default()),
    ]);
    let brute_force = render(vec![
        Box::new(DepthPrePass::default()),
        Box::new(ShaderPass::default()),
    ]);

    assert!(clustered[0] > 0.5);
    assert_texel_near(clustered, brute_force, 1e-5);
}

// ============================================================================
// UI
// ============================================================================

/// Rebuilds the UI every frame, the way an application layer would.
struct OverlayUi {
    data: kiln_graphics::passes::SharedImGuiDrawData,
    built: Vec<FrameSequenceNumber>,
}

impl FrameModule for OverlayUi {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn on_simulation(&mut self, sequence: FrameSequenceNumber) {
        self.data
            .lock()
            .push_rect([0.0, 0.0], [32.0, 32.0], [0.0, 0.0, 1.0, 1.0]);
        self.built.push(sequence);
    }
}

#[test]
fn imgui_overlay_draws_over_the_composited_frame() {
    let (backend, graphics) = default_graphics();
    let data = Arc::new(Mutex::new(ImGuiDrawData {
        display_size: [EXTENT as f32, EXTENT as f32],
        ..Default::default()
    }));
    let graph = graph_of(vec![
        Box::new(ShaderPass::default()),
        Box::new(CompositingPass::default()),
        Box::new(ImGuiPass::screen_space(data.clone())),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    frames.add_module(Box::new(ImGuiFrameModule::new(data.clone())));
    frames.add_module(Box::new(OverlayUi {
        data: data.clone(),
        built: Vec::new(),
    }));

    for _ in 0..2 {
        frames.run_frame(&triangle_scene(), &camera()).unwrap();
        // Cleared at frame start, rebuilt once during simulation.
        assert_eq!(data.lock().vertices.len(), 6);
    }

    let backbuffer = frames.graphics().targets().backbuffer();
    assert_texel_near(texel(&backend, backbuffer, 8, 8), [0.0, 0.0, 1.0, 1.0], 1e-2);
    let lit = texel(&backend, backbuffer, CENTER.0, CENTER.1 + 4);
    assert!(lit[0] > 0.3, "triangle expected below the overlay, got {lit:?}");
}

// ============================================================================
// Validation and diagnostics
// ============================================================================

#[test]
fn invalid_pass_config_skips_the_frame() {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(ShaderPass::new(ShaderPassConfig {
            clear_color: Some([f32::NAN, 0.0, 0.0, 1.0]),
            ..Default::default()
        })),
        Box::new(CompositingPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    let report = frames.run_frame(&triangle_scene(), &camera()).unwrap();

    assert!(report.skipped);
    assert!(!report.completed(PhaseId::Submit));
    assert!(!report.completed(PhaseId::Present));
    assert!(report.completed(PhaseId::FrameEnd));
    assert_eq!(backend.presented_frames(), 0);
    assert_eq!(frames.next_sequence(), FrameSequenceNumber::new(2));

    // Fixing the pass lets the next frame through.
    let graph = frames.graph_mut();
    assert!(graph.remove_pass(ShaderPass::NAME).is_some());
    graph.add_pass(Box::new(ShaderPass::default())).unwrap();
    let report = frames.run_frame(&triangle_scene(), &camera()).unwrap();
    assert!(!report.skipped);
    assert_eq!(backend.presented_frames(), 1);
}

/// Declares the scene color as a shader resource, then clears it as a
/// render target.
struct SloppyClearPass;

impl RenderPass for SloppyClearPass {
    fn name(&self) -> &'static str {
        "SloppyClearPass"
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        PassResourceDeclaration::new().read(ctx.targets.color(), ResourceState::SHADER_RESOURCE)
    }

    fn on_prepare_resources(
        &mut self,
        _ctx: &RenderContext<'_>,
        _recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        recorder.clear_render_target(ctx.targets.color_attachment(), [1.0, 0.0, 0.0, 1.0]);
        Ok(())
    }
}

#[test]
fn undeclared_state_is_reported_as_missing_transition() {
    let (_backend, graphics) = default_graphics();
    let graph = graph_of(vec![Box::new(SloppyClearPass)]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    let report = frames.run_frame(&SceneSnapshot::new(), &camera()).unwrap();

    assert!(!report.skipped);
    assert_eq!(report.diagnostics.missing_transitions(), 1);
}

/// Captures the debug events the backend had executed when this pass
/// recorded.
struct ExecutedSoFar {
    backend: Arc<DummyBackend>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RenderPass for ExecutedSoFar {
    fn name(&self) -> &'static str {
        "ExecutedSoFar"
    }

    fn declare_resources(&self, _ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        PassResourceDeclaration::new()
    }

    fn on_execute(
        &mut self,
        _ctx: &RenderContext<'_>,
        _recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        *self.seen.lock() = self.backend.executed_events();
        Ok(())
    }
}

#[test]
fn light_culling_is_submitted_before_later_passes_record() {
    let (backend, graphics) = default_graphics();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let graph = graph_of(vec![
        Box::new(DepthPrePass::default()),
        Box::new(LightCullingPass::default()),
        Box::new(ShaderPass::default()),
        Box::new(ExecutedSoFar {
            backend: backend.clone(),
            seen: seen.clone(),
        }),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    let report = frames.run_frame(&triangle_scene(), &camera()).unwrap();

    let seen = seen.lock().clone();
    assert!(seen.iter().any(|e| e == DepthPrePass::NAME));
    assert!(seen.iter().any(|e| e == LightCullingPass::NAME));
    assert!(!seen.iter().any(|e| e == ShaderPass::NAME));
    let executed = backend.executed_events();
    assert!(executed.iter().any(|e| e == ShaderPass::NAME));
    assert!(report.submitted >= 3);
}

#[test]
fn pipelines_rebuild_only_when_their_state_changes() {
    let (_backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(DepthPrePass::default()),
        Box::new(ShaderPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let scene = triangle_scene();

    let first = frames.run_frame(&scene, &camera()).unwrap();
    assert_eq!(first.pipelines_rebuilt, 2);
    let second = frames.run_frame(&scene, &camera()).unwrap();
    assert_eq!(second.pipelines_rebuilt, 0);

    let flipped = frames
        .run_frame(&scene, &camera().with_reverse_z(true))
        .unwrap();
    assert!(flipped.pipelines_rebuilt >= 1);
    assert!(!flipped.skipped);
}

// ============================================================================
// Frames in flight
// ============================================================================

#[test]
fn frames_cycle_through_slots_with_increasing_fences() {
    let (backend, graphics) = default_graphics();
    let graph = graph_of(vec![
        Box::new(ShaderPass::default()),
        Box::new(CompositingPass::default()),
    ]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let scene = triangle_scene();

    let reports: Vec<_> = (0..4)
        .map(|_| frames.run_frame(&scene, &camera()).unwrap())
        .collect();

    let slots: Vec<u32> = reports.iter().map(|r| r.slot.get()).collect();
    assert_eq!(slots, vec![1, 2, 0, 1]);
    let sequences: Vec<u64> = reports.iter().map(|r| r.sequence.get()).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    for pair in reports.windows(2) {
        assert!(pair[1].fence > pair[0].fence);
    }
    assert_eq!(frames.slot_fence(FrameSlot::new(1)), reports[3].fence);
    assert_eq!(backend.presented_frames(), 4);

    frames.wait_idle().unwrap();
    let (graphics, graph) = frames.into_parts().unwrap();
    assert_eq!(graph.pass_count(), 2);
    assert!(graphics.queue().is_complete(reports[3].fence));
}

#[test]
fn reused_slot_waits_for_its_previous_frame() {
    let (backend, graphics) = dummy_graphics(
        GraphicsConfig::default().with_fence_mode(FenceMode::Manual),
        Arc::new(InMemoryTextureSource::new()),
    );
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let scene = SceneSnapshot::new().with_node(mesh_node(
        "quad",
        quad("quad", 1.0),
        solid_material("grey", [0.5, 0.5, 0.5, 1.0]),
        Vec3::zeros(),
    ));

    let first = frames.run_frame(&scene, &camera()).unwrap();
    assert!(!frames.graphics().queue().is_complete(first.fence));
    frames.run_frame(&scene, &camera()).unwrap();
    frames.run_frame(&scene, &camera()).unwrap();
    assert!(!frames.graphics().queue().is_complete(first.fence));

    // Frame 4 reuses frame 1's slot and must wait for it.
    let fourth = frames.run_frame(&scene, &camera()).unwrap();
    assert_eq!(fourth.slot, first.slot);
    assert!(frames.graphics().queue().is_complete(first.fence));
    assert_eq!(backend.presented_frames(), 4);
}

#[test]
fn graphics_queue_waits_for_the_frame_uploads() {
    let (backend, graphics) = dummy_graphics(
        GraphicsConfig::default().with_fence_mode(FenceMode::Manual),
        Arc::new(InMemoryTextureSource::new()),
    );
    let graph = graph_of(vec![Box::new(ShaderPass::default())]);
    let mut frames = FrameOrchestrator::new(graphics, graph);

    frames.run_frame(&triangle_scene(), &camera()).unwrap();

    let uploaded = frames.graphics().uploads().last_signaled();
    let waits = backend.queue_waits();
    let last = waits.last().expect("graphics queue waited on the transfer queue");
    assert_eq!(last.queue, QueueRole::Graphics);
    assert_eq!(last.waits_on, QueueRole::Transfer);
    assert_eq!(last.value, uploaded);

    frames.run_frame(&triangle_scene(), &camera()).unwrap();
    let waits = backend.queue_waits();
    for pair in waits.windows(2) {
        assert!(pair[1].value > pair[0].value);
    }
}

//! Shared helpers for the frame and resource integration tests.
//!
//! Everything runs on the dummy backend, whose reference rasterizer makes
//! frame output readable texel by texel.

#![allow(dead_code)]

use std::sync::Arc;

use kiln_core::math::Vec3;
use kiln_graphics::backend::DummyBackend;
use kiln_graphics::graph::{RenderGraph, RenderPass};
use kiln_graphics::scene::{
    InMemoryTextureSource, MaterialAsset, MeshAsset, PointLight, Renderable, SceneLight, SceneNode,
    SceneSnapshot,
};
use kiln_graphics::types::GpuResourceId;
use kiln_graphics::view::PerspectiveCamera;
use kiln_graphics::{GpuBackend, Graphics, GraphicsConfig};

/// Width and height of the frame targets used by every test.
pub const EXTENT: u32 = 64;

/// Pixel at the center of the frame.
pub const CENTER: (u32, u32) = (EXTENT / 2, EXTENT / 2);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Graphics on a dummy backend the test keeps a typed handle to.
pub fn dummy_graphics(
    config: GraphicsConfig,
    textures: Arc<InMemoryTextureSource>,
) -> (Arc<DummyBackend>, Graphics) {
    init_logging();
    let backend = Arc::new(DummyBackend::new(config.fence_mode));
    let graphics = Graphics::with_backend(
        config.with_resolution(EXTENT, EXTENT),
        backend.clone(),
        textures,
    )
    .expect("graphics on the dummy backend");
    (backend, graphics)
}

pub fn default_graphics() -> (Arc<DummyBackend>, Graphics) {
    dummy_graphics(
        GraphicsConfig::default(),
        Arc::new(InMemoryTextureSource::new()),
    )
}

/// Camera on +Z looking at the origin.
pub fn camera() -> PerspectiveCamera {
    PerspectiveCamera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros())
}

pub fn solid_material(name: &str, color: [f32; 4]) -> Arc<MaterialAsset> {
    Arc::new(MaterialAsset::new(name).with_base_color(color))
}

pub fn red() -> Arc<MaterialAsset> {
    solid_material("red", [1.0, 0.0, 0.0, 1.0])
}

pub fn blue() -> Arc<MaterialAsset> {
    solid_material("blue", [0.0, 0.0, 1.0, 1.0])
}

/// Node drawing `mesh` with `material` on its first submesh.
pub fn mesh_node(
    name: &str,
    mesh: Arc<MeshAsset>,
    material: Arc<MaterialAsset>,
    translation: Vec3,
) -> SceneNode {
    SceneNode::new(name)
        .with_translation(translation)
        .with_renderable(Renderable::new(mesh).with_material(0, material))
}

/// One red triangle around the origin lit by a point light in front of it.
pub fn triangle_scene() -> SceneSnapshot {
    let triangle = Arc::new(MeshAsset::triangle(
        "triangle",
        [-1.0, -1.0, 0.0],
        [1.0, -1.0, 0.0],
        [0.0, 1.0, 0.0],
    ));
    SceneSnapshot::new()
        .with_node(mesh_node("triangle", triangle, red(), Vec3::zeros()))
        .with_light(SceneLight::Point(PointLight::new(
            Vec3::new(0.0, 0.0, 3.0),
            10.0,
            1.0,
        )))
}

pub fn quad(name: &str, half_extent: f32) -> Arc<MeshAsset> {
    Arc::new(MeshAsset::quad(name, half_extent, half_extent))
}

pub fn graph_of(passes: Vec<Box<dyn RenderPass>>) -> RenderGraph {
    let mut graph = RenderGraph::new();
    for pass in passes {
        graph.add_pass(pass).expect("add pass");
    }
    graph
}

pub fn texel(backend: &DummyBackend, texture: GpuResourceId, x: u32, y: u32) -> [f32; 4] {
    backend.read_texel(texture, x, y).expect("readable texel")
}

pub fn assert_texel_near(actual: [f32; 4], expected: [f32; 4], tolerance: f32) {
    for (channel, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "channel {channel}: got {actual:?}, expected {expected:?} (+/- {tolerance})"
        );
    }
}

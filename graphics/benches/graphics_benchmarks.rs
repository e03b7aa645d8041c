use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use kiln_core::math::Vec3;
use kiln_graphics::bindless::{DescriptorAllocator, DescriptorVisibility, HeapStrategy, ResourceViewType};
use kiln_graphics::config::UploadPolicy;
use kiln_graphics::scene::{
    InMemoryTextureSource, MaterialAsset, MeshAsset, PointLight, Renderable, SceneLight, SceneNode,
    SceneSnapshot,
};
use kiln_graphics::scene_prep::ScenePrep;
use kiln_graphics::types::{GpuResourceId, Viewport};
use kiln_graphics::upload::{BufferPlanner, UploadRequest};
use kiln_graphics::{
    CompositingPass, DepthPrePass, FrameOrchestrator, FrameSequenceNumber, Graphics,
    GraphicsConfig, LightCullingPass, RenderGraph, ShaderPass,
};
use kiln_graphics::view::{CameraResolver, PerspectiveCamera};

fn grid_scene(side: usize) -> SceneSnapshot {
    let cube = Arc::new(MeshAsset::cube("cube", 0.4));
    let material = Arc::new(MaterialAsset::new("grey").with_base_color([0.6, 0.6, 0.6, 1.0]));
    let mut scene = SceneSnapshot::new();
    let half = side as f32 / 2.0;
    for x in 0..side {
        for z in 0..side {
            scene.add_node(
                SceneNode::new(format!("cube_{x}_{z}"))
                    .with_translation(Vec3::new(x as f32 - half, 0.0, -(z as f32)))
                    .with_renderable(Renderable::new(cube.clone()).with_material(0, material.clone())),
            );
        }
    }
    scene.add_light(SceneLight::Point(PointLight::new(Vec3::new(0.0, 3.0, 0.0), 20.0, 2.0)));
    scene
}

fn camera() -> PerspectiveCamera {
    PerspectiveCamera::look_at(Vec3::new(0.0, 4.0, 8.0), Vec3::new(0.0, 0.0, -8.0))
}

// ---------------------------------------------------------------------------
// Scene preparation
// ---------------------------------------------------------------------------

fn bench_scene_prep(c: &mut Criterion) {
    let mut group = c.benchmark_group("scene_prep");
    let view = camera()
        .resolve(Viewport::from_dimensions(1280, 720))
        .expect("view");
    let prep = ScenePrep::default();
    for side in [8usize, 32] {
        let scene = grid_scene(side);
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &scene, |b, scene| {
            b.iter(|| black_box(prep.run(scene, &view, FrameSequenceNumber::new(1))));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Descriptors and uploads
// ---------------------------------------------------------------------------

fn bench_descriptor_churn(c: &mut Criterion) {
    c.bench_function("descriptor_allocate_free_256", |b| {
        let mut allocator = DescriptorAllocator::new(&HeapStrategy::default());
        let mut handles = Vec::with_capacity(256);
        b.iter(|| {
            for _ in 0..256 {
                if let Ok(handle) =
                    allocator.allocate(ResourceViewType::CbvSrvUav, DescriptorVisibility::ShaderVisible)
                {
                    handles.push(handle);
                }
            }
            for handle in handles.drain(..) {
                let _ = allocator.free_immediately(handle);
            }
        });
    });
}

fn bench_buffer_upload_plan(c: &mut Criterion) {
    let planner = BufferPlanner::new(UploadPolicy::default());
    let buffer = GpuResourceId::new(1);
    let requests: Vec<UploadRequest> = (0..256u64)
        .map(|i| UploadRequest::buffer(buffer, i * 1024, vec![0u8; 1000]))
        .collect();
    c.bench_function("buffer_upload_plan_256", |b| {
        b.iter(|| {
            let refs: Vec<&UploadRequest> = requests.iter().collect();
            black_box(planner.plan(&refs))
        });
    });
}

// ---------------------------------------------------------------------------
// Whole frames
// ---------------------------------------------------------------------------

fn bench_run_frame(c: &mut Criterion) {
    let graphics = Graphics::new(
        GraphicsConfig::default().with_resolution(64, 64),
        Arc::new(InMemoryTextureSource::new()),
    )
    .expect("graphics");
    let mut graph = RenderGraph::new();
    graph.add_pass(Box::new(DepthPrePass::default())).expect("pass");
    graph.add_pass(Box::new(LightCullingPass::default())).expect("pass");
    graph.add_pass(Box::new(ShaderPass::default())).expect("pass");
    graph.add_pass(Box::new(CompositingPass::default())).expect("pass");
    let mut frames = FrameOrchestrator::new(graphics, graph);
    let scene = grid_scene(4);
    let camera = camera();

    c.bench_function("run_frame_16_cubes_64x64", |b| {
        b.iter(|| black_box(frames.run_frame(&scene, &camera).expect("frame")));
    });
}

criterion_group!(
    benches,
    bench_scene_prep,
    bench_descriptor_churn,
    bench_buffer_upload_plan,
    bench_run_frame,
);

criterion_main!(benches);

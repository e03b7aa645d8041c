//! Integration tests for descriptor layout, staged uploads, view culling
//! and scene preparation.

#![cfg(feature = "dummy")]

mod common;

use std::sync::Arc;

use kiln_core::math::{Aabb, Vec3};
use rstest::rstest;

use common::{camera, default_graphics, mesh_node, red, texel};
use kiln_graphics::backend::DummyBackend;
use kiln_graphics::bindless::{
    DescriptorAllocator, DescriptorVisibility, HeapSegmentDesc, HeapStrategy, ResourceViewType,
};
use kiln_graphics::scene::{MeshAsset, SceneSnapshot};
use kiln_graphics::scene_prep::ScenePrep;
use kiln_graphics::types::{
    BufferDescriptor, BufferUsage, Extent3d, FenceValue, FrameSequenceNumber, FrameSlot,
    ShaderVisibleIndex, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};
use kiln_graphics::upload::{SubresourceRange, UploadCoordinator, UploadRequest};
use kiln_graphics::view::{CameraResolver, PerspectiveCamera};
use kiln_graphics::{GpuBackend, GraphicsConfig};

fn strategy() -> HeapStrategy {
    HeapStrategy::empty()
        .with_segment(ResourceViewType::CbvSrvUav, HeapSegmentDesc::new(1024, 2048))
        .with_segment(ResourceViewType::Sampler, HeapSegmentDesc::new(0, 64))
        .with_segment(ResourceViewType::RenderTarget, HeapSegmentDesc::new(32, 0))
        .with_segment(ResourceViewType::DepthStencil, HeapSegmentDesc::new(8, 0))
}

// ============================================================================
// Descriptor layout
// ============================================================================

#[test]
fn heap_layout_is_deterministic() {
    let a = DescriptorAllocator::new(&strategy());
    let b = DescriptorAllocator::new(&strategy());
    assert_eq!(a.segments(), b.segments());
    assert_eq!(a.heap_size(), b.heap_size());
}

#[rstest]
#[case(ResourceViewType::CbvSrvUav, DescriptorVisibility::ShaderVisible, 0)]
#[case(ResourceViewType::Sampler, DescriptorVisibility::ShaderVisible, 2048)]
#[case(ResourceViewType::CbvSrvUav, DescriptorVisibility::CpuOnly, 2112)]
#[case(ResourceViewType::RenderTarget, DescriptorVisibility::CpuOnly, 3136)]
#[case(ResourceViewType::DepthStencil, DescriptorVisibility::CpuOnly, 3168)]
fn shader_visible_segments_come_first(
    #[case] view_type: ResourceViewType,
    #[case] visibility: DescriptorVisibility,
    #[case] base: u32,
) {
    let allocator = DescriptorAllocator::new(&strategy());
    assert_eq!(allocator.heap_base_index(view_type, visibility), Some(base));
    assert_eq!(allocator.heap_size(), 3176);
}

#[test]
fn render_targets_are_never_shader_visible() {
    let allocator = DescriptorAllocator::new(&strategy());
    assert_eq!(
        allocator.heap_base_index(
            ResourceViewType::RenderTarget,
            DescriptorVisibility::ShaderVisible
        ),
        None
    );
}

#[test]
fn shader_visible_indices_stay_inside_their_segment() {
    let mut allocator = DescriptorAllocator::new(&strategy());
    let srv = allocator
        .allocate(ResourceViewType::CbvSrvUav, DescriptorVisibility::ShaderVisible)
        .unwrap();
    let sampler = allocator
        .allocate(ResourceViewType::Sampler, DescriptorVisibility::ShaderVisible)
        .unwrap();
    let rtv = allocator
        .allocate(ResourceViewType::RenderTarget, DescriptorVisibility::CpuOnly)
        .unwrap();

    assert!(srv.heap_index() < 2048);
    assert!((2048..2112).contains(&sampler.heap_index()));
    assert_eq!(sampler.shader_visible_index().index(), sampler.heap_index());
    assert!((3136..3168).contains(&rtv.heap_index()));
    assert_eq!(rtv.shader_visible_index(), ShaderVisibleIndex::INVALID);
}

#[test]
fn freed_slots_return_after_their_fence() {
    let mut allocator = DescriptorAllocator::new(&strategy());
    let handle = allocator
        .allocate(ResourceViewType::DepthStencil, DescriptorVisibility::CpuOnly)
        .unwrap();
    allocator.free(handle, FenceValue::new(5)).unwrap();
    let remaining =
        |a: &DescriptorAllocator| a.remaining(ResourceViewType::DepthStencil, DescriptorVisibility::CpuOnly);

    assert_eq!(remaining(&allocator), 7);
    assert_eq!(allocator.process_completed(FenceValue::new(4)), 0);
    assert_eq!(allocator.process_completed(FenceValue::new(5)), 1);
    assert_eq!(remaining(&allocator), 8);
}

// ============================================================================
// Uploads
// ============================================================================

fn upload_coordinator() -> (Arc<DummyBackend>, UploadCoordinator) {
    common::init_logging();
    let backend = Arc::new(DummyBackend::default());
    let uploads = UploadCoordinator::new(backend.clone(), &GraphicsConfig::default());
    (backend, uploads)
}

#[test]
fn buffer_uploads_share_one_staging_allocation() {
    let (backend, mut uploads) = upload_coordinator();
    let buffer = backend
        .create_buffer(&BufferDescriptor::new(
            16 * 4096,
            BufferUsage::COPY_DST | BufferUsage::STORAGE,
        ))
        .unwrap();
    let requests = (0..16u8)
        .map(|i| UploadRequest::buffer(buffer, i as u64 * 4096, vec![i; 4096]))
        .collect();

    let tickets = uploads.submit_many(requests);

    assert_eq!(tickets.len(), 16);
    assert!(tickets.iter().all(|t| t.fence == tickets[0].fence));
    let stats = uploads.staging_stats();
    assert_eq!(stats.allocations_total, 1);
    assert_eq!(stats.bytes_this_frame, 16 * 4096);
    assert_eq!(stats.copy_regions_total, 16);

    uploads.retire_completed();
    assert!(tickets.iter().all(|t| uploads.tracker().is_complete(*t)));
    let result = pollster::block_on(uploads.tracker().await_async(tickets[3])).unwrap();
    assert!(result.is_success());
    assert_eq!(result.bytes_uploaded, 4096);

    let data = backend.read_buffer(buffer, 3 * 4096, 4096).unwrap();
    assert!(data.iter().all(|&b| b == 3));
    let last = backend.read_buffer(buffer, 15 * 4096, 4).unwrap();
    assert_eq!(last, vec![15; 4]);
}

#[test]
fn texture_rows_are_padded_to_the_row_pitch() {
    let (backend, mut uploads) = upload_coordinator();
    let texture = backend
        .create_texture(&TextureDescriptor::new_2d(
            3,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::COPY_DST | TextureUsage::SAMPLED,
        ))
        .unwrap();
    let pixels: Vec<u8> = (0..6u8).flat_map(|i| [i * 40, 0, 255 - i * 40, 255]).collect();

    let ticket = uploads.submit(UploadRequest::texture(
        texture,
        TextureFormat::Rgba8Unorm,
        Extent3d::new_2d(3, 2),
        SubresourceRange::FIRST,
        pixels,
    ));

    // 12-byte rows staged at a 256-byte pitch.
    assert!(uploads.staging_stats().bytes_this_frame >= 2 * 256);
    uploads.retire_completed();
    assert!(uploads.tracker().is_complete(ticket));
    let last = backend.read_texel(texture, 2, 1).unwrap();
    assert!((last[0] - 200.0 / 255.0).abs() < 1e-3);
    assert!((last[2] - 55.0 / 255.0).abs() < 1e-3);
}

#[test]
fn new_frame_resets_per_frame_staging_counters() {
    let (backend, mut uploads) = upload_coordinator();
    let buffer = backend
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::COPY_DST))
        .unwrap();
    uploads.submit(UploadRequest::buffer(buffer, 0, vec![1u8; 64]));
    assert_eq!(uploads.staging_stats().allocations_this_frame, 1);

    uploads.on_frame_start(FrameSlot::new(1));

    let stats = uploads.staging_stats();
    assert_eq!(stats.allocations_this_frame, 0);
    assert_eq!(stats.bytes_this_frame, 0);
    assert_eq!(stats.allocations_total, 1);
}

// ============================================================================
// Views and culling
// ============================================================================

#[rstest]
#[case::standard(false)]
#[case::reverse_z(true)]
fn frustum_agrees_with_the_projection(#[case] reverse_z: bool) {
    let camera = PerspectiveCamera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros())
        .with_clip_planes(0.1, 50.0)
        .with_reverse_z(reverse_z);
    let view = camera.resolve(Viewport::from_dimensions(64, 64)).unwrap();
    let unit = |z: f32| Aabb::new(Vec3::new(-0.5, -0.5, z - 0.5), Vec3::new(0.5, 0.5, z + 0.5));

    assert!(view.frustum().intersects_bounds(&unit(0.0)));
    assert!(!view.frustum().intersects_bounds(&unit(-60.0)));
    assert!(!view.frustum().intersects_bounds(&unit(10.0)));
    assert_eq!(view.reverse_z(), reverse_z);
}

#[test]
fn scene_prep_drops_nodes_outside_the_view() {
    common::init_logging();
    let cube = Arc::new(MeshAsset::cube("cube", 0.5));
    let scene = SceneSnapshot::new()
        .with_node(mesh_node("visible", cube.clone(), red(), Vec3::zeros()))
        .with_node(mesh_node(
            "behind the far plane",
            cube.clone(),
            red(),
            Vec3::new(0.0, 0.0, -1000.0),
        ))
        .with_node(mesh_node("behind the camera", cube, red(), Vec3::new(0.0, 0.0, 20.0)));
    let view = camera().resolve(Viewport::from_dimensions(64, 64)).unwrap();

    let output = ScenePrep::default().run(&scene, &view, FrameSequenceNumber::new(1));

    assert_eq!(output.items.len(), 1);
    assert!(output.items[0].world_translation().norm() < 1e-6);
    assert_eq!(output.items[0].index_count, 36);
    assert_eq!(output.stats.nodes_visited, 3);
}

#[test]
fn resize_recreates_targets_at_the_new_extent() {
    let (backend, mut graphics) = default_graphics();
    let old = graphics.targets().backbuffer();

    graphics.resize(32, 16).unwrap();

    assert_eq!(graphics.targets().extent(), (32, 16));
    assert_ne!(graphics.targets().backbuffer(), old);
    graphics.wait_idle().unwrap();
    assert!(!graphics.registry().contains(old));
    // Readable at the new bounds.
    assert!(texel(&backend, graphics.targets().color(), 31, 15).iter().all(|c| c.is_finite()));
}

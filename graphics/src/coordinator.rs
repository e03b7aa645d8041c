//! Resource coordinator: turns scene-prep output into a frozen
//! [`PreparedSceneFrame`].
//!
//! For every [`RenderItemData`] the coordinator makes the geometry resident,
//! interns the material (and through it, its textures), allocates a
//! transform and packs one [`DrawMetadata`] record. The frame's buffers are
//! written into the current frame slot and their bindless indices end up in
//! the [`SceneConstants`] the passes bind.

use std::sync::Arc;

use kiln_core::math::{Aabb, BoundingSphere, Vec3, mat4_to_cols_array_2d};

use crate::error::GraphicsError;
use crate::gpu_types::{DrawMetadata, GpuPositionalLight, SceneConstants};
use crate::registries::{
    GeometryRegistry, GeometryState, MaterialRegistry, TextureBinder, TransformUploader,
};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::scene::{DirectionalLight, NodeId, SceneSnapshot, TextureSource};
use crate::scene_prep::{PassMask, RenderItemData};
use crate::types::{
    FenceValue, FrameSequenceNumber, FrameSlot, GeometryHandle, MaterialHandle,
    ShaderVisibleIndex, TransformHandle,
};
use crate::upload::{UploadCoordinator, UploadTracker};
use crate::view::View;

/// Draw-ready description of one frame.
///
/// Built once by [`ResourceCoordinator::prepare`] and only read afterwards;
/// there is no mutating API. Every per-draw array has one element per item
/// scene prep emitted, and draw `i` of every array describes the same draw,
/// which is also element `i` of the draw-metadata buffer.
#[derive(Debug, Clone)]
pub struct PreparedSceneFrame {
    sequence: FrameSequenceNumber,
    slot: FrameSlot,
    view: View,
    scene_constants: SceneConstants,
    draw_metadata_srv_index: ShaderVisibleIndex,
    transforms_srv_index: ShaderVisibleIndex,
    materials_srv_index: ShaderVisibleIndex,
    positional_lights_srv_index: ShaderVisibleIndex,
    positional_light_count: u32,
    designated_sun_light: Option<DirectionalLight>,

    draw_metadata: Box<[DrawMetadata]>,
    pass_masks: Box<[PassMask]>,
    nodes: Box<[NodeId]>,
    geometry: Box<[GeometryHandle]>,
    materials: Box<[MaterialHandle]>,
    transforms: Box<[TransformHandle]>,
    world_bounds: Box<[Aabb]>,
    world_spheres: Box<[BoundingSphere]>,
    distances: Box<[f32]>,
}

impl PreparedSceneFrame {
    pub fn sequence(&self) -> FrameSequenceNumber {
        self.sequence
    }

    pub fn slot(&self) -> FrameSlot {
        self.slot
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn scene_constants(&self) -> &SceneConstants {
        &self.scene_constants
    }

    pub fn draw_metadata_srv_index(&self) -> ShaderVisibleIndex {
        self.draw_metadata_srv_index
    }

    pub fn transforms_srv_index(&self) -> ShaderVisibleIndex {
        self.transforms_srv_index
    }

    pub fn materials_srv_index(&self) -> ShaderVisibleIndex {
        self.materials_srv_index
    }

    pub fn positional_lights_srv_index(&self) -> ShaderVisibleIndex {
        self.positional_lights_srv_index
    }

    pub fn positional_light_count(&self) -> u32 {
        self.positional_light_count
    }

    pub fn designated_sun_light(&self) -> Option<&DirectionalLight> {
        self.designated_sun_light.as_ref()
    }

    /// Number of draws.
    pub fn len(&self) -> usize {
        self.draw_metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draw_metadata.is_empty()
    }

    pub fn draw_metadata(&self) -> &[DrawMetadata] {
        &self.draw_metadata
    }

    pub fn pass_masks(&self) -> &[PassMask] {
        &self.pass_masks
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn geometry_handles(&self) -> &[GeometryHandle] {
        &self.geometry
    }

    pub fn material_handles(&self) -> &[MaterialHandle] {
        &self.materials
    }

    pub fn transform_handles(&self) -> &[TransformHandle] {
        &self.transforms
    }

    pub fn world_bounds(&self) -> &[Aabb] {
        &self.world_bounds
    }

    pub fn world_spheres(&self) -> &[BoundingSphere] {
        &self.world_spheres
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Indices of the drawable draws whose mask intersects `mask`, in
    /// emission order. Draws without resident geometry are skipped.
    pub fn draws_matching(&self, mask: PassMask) -> impl Iterator<Item = u32> + '_ {
        self.pass_masks
            .iter()
            .zip(self.draw_metadata.iter())
            .enumerate()
            .filter(move |(_, (m, meta))| m.intersects(mask) && meta.index_count > 0)
            .map(|(i, _)| i as u32)
    }

    /// Like [`draws_matching`](Self::draws_matching), farthest first. Ties
    /// keep emission order.
    pub fn draws_back_to_front(&self, mask: PassMask) -> Vec<u32> {
        let mut draws: Vec<u32> = self.draws_matching(mask).collect();
        draws.sort_by(|a, b| {
            self.distances[*b as usize].total_cmp(&self.distances[*a as usize])
        });
        draws
    }
}

/// Owns the residency registries and the per-frame draw buffers.
#[derive(Debug)]
pub struct ResourceCoordinator {
    geometry: GeometryRegistry,
    materials: MaterialRegistry,
    textures: TextureBinder,
    transforms: TransformUploader,
    draw_metadata: FrameStructuredBuffer<DrawMetadata>,
    lights: FrameStructuredBuffer<GpuPositionalLight>,
    prepared: Option<PreparedSceneFrame>,
}

impl ResourceCoordinator {
    pub fn new(
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        texture_source: Arc<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        Ok(Self {
            geometry: GeometryRegistry::new(),
            materials: MaterialRegistry::new(),
            textures: TextureBinder::new(registry, uploads, texture_source)?,
            transforms: TransformUploader::new(),
            draw_metadata: FrameStructuredBuffer::new("draw metadata"),
            lights: FrameStructuredBuffer::new("positional lights"),
            prepared: None,
        })
    }

    pub fn geometry(&self) -> &GeometryRegistry {
        &self.geometry
    }

    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    pub fn textures(&self) -> &TextureBinder {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureBinder {
        &mut self.textures
    }

    pub fn transforms(&self) -> &TransformUploader {
        &self.transforms
    }

    /// Registry frame-start hooks. Runs after the upload coordinator has
    /// observed the latest fence values.
    pub fn on_frame_start(&mut self, registry: &mut ResourceRegistry, tracker: &UploadTracker) {
        let geometry = self.geometry.on_frame_start(tracker);
        let textures = self.textures.on_frame_start(registry, tracker);
        if geometry + textures > 0 {
            log::debug!("settled {geometry} geometry and {textures} texture upload(s)");
        }
        self.prepared = None;
    }

    /// Resolve `items` into bindless indices and freeze the frame.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &mut UploadCoordinator,
        scene: &SceneSnapshot,
        view: &View,
        items: &[RenderItemData],
        sequence: FrameSequenceNumber,
        slot: FrameSlot,
    ) -> Result<&PreparedSceneFrame, GraphicsError> {
        kiln_core::profile_scope!("ResourceCoordinator::prepare");
        self.transforms.begin_frame();

        let count = items.len();
        let mut draw_metadata = Vec::with_capacity(count);
        let mut geometry = Vec::with_capacity(count);
        let mut materials = Vec::with_capacity(count);
        let mut transforms = Vec::with_capacity(count);
        let mut unresolved = 0usize;

        for item in items {
            let residency = match self.geometry.ensure_resident(
                registry,
                uploads,
                &item.geometry,
                item.lod_index,
            ) {
                Ok(residency) => Some(residency),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("'{}' lod {}: {err}", item.geometry.name, item.lod_index);
                    None
                }
            };
            let material = self.materials.get_or_register_material(item.material.as_ref());
            let transform = self.transforms.get_or_allocate(item.node, &item.world, &item.normal);

            let drawable = residency.filter(|r| r.state != GeometryState::Failed);
            if drawable.is_none() {
                unresolved += 1;
            }
            draw_metadata.push(DrawMetadata {
                transform_index: self.transforms.element(transform).unwrap_or(u32::MAX),
                material_index: material.index(),
                geometry_vb_index: drawable.map_or(u32::MAX, |r| r.vb_index.index()),
                geometry_ib_index: drawable.map_or(u32::MAX, |r| r.ib_index.index()),
                first_index: item.first_index,
                index_count: if drawable.is_some() { item.index_count } else { 0 },
                base_vertex: item.base_vertex,
                pass_mask: item.pass_mask.bits(),
                submesh_id: item.submesh_index,
                _pad: [0; 3],
            });
            geometry.push(residency.map_or(GeometryHandle::INVALID, |r| r.handle));
            materials.push(material);
            transforms.push(transform);
        }
        if unresolved > 0 {
            log::warn!("{unresolved} draw(s) have no resident geometry this frame");
        }

        let materials_srv_index =
            self.materials
                .write_constants(registry, uploads, &mut self.textures, slot)?;
        let transforms_srv_index = self.transforms.upload(registry, slot)?;
        let draw_metadata_srv_index = self.draw_metadata.write(registry, slot, &draw_metadata)?;

        let lights: Vec<GpuPositionalLight> = scene
            .point_lights()
            .map(|light| GpuPositionalLight {
                position: light.position.into(),
                range: light.range,
                color: light.color.into(),
                intensity: light.intensity,
            })
            .collect();
        let positional_lights_srv_index = self.lights.write(registry, slot, &lights)?;

        let scene_constants = scene_constants(
            view,
            sequence,
            [
                draw_metadata_srv_index,
                transforms_srv_index,
                materials_srv_index,
                positional_lights_srv_index,
            ],
            lights.len() as u32,
        );

        log::debug!(
            "{sequence} [{slot}]: {count} draw(s), {} transform(s), {} light(s)",
            self.transforms.len(),
            lights.len()
        );

        let frame = PreparedSceneFrame {
            sequence,
            slot,
            view: view.clone(),
            scene_constants,
            draw_metadata_srv_index,
            transforms_srv_index,
            materials_srv_index,
            positional_lights_srv_index,
            positional_light_count: lights.len() as u32,
            designated_sun_light: scene.designated_sun().copied(),
            draw_metadata: draw_metadata.into_boxed_slice(),
            pass_masks: items.iter().map(|i| i.pass_mask).collect(),
            nodes: items.iter().map(|i| i.node).collect(),
            geometry: geometry.into_boxed_slice(),
            materials: materials.into_boxed_slice(),
            transforms: transforms.into_boxed_slice(),
            world_bounds: items.iter().map(|i| i.world_bounds).collect(),
            world_spheres: items.iter().map(|i| i.world_sphere).collect(),
            distances: items.iter().map(|i| i.distance).collect(),
        };
        Ok(self.prepared.insert(frame))
    }

    /// The frame frozen by the last [`prepare`](Self::prepare), until the
    /// next frame start.
    pub fn prepared_frame(&self) -> Option<&PreparedSceneFrame> {
        self.prepared.as_ref()
    }

    /// The frozen frame together with the texture binder, for pass setup
    /// hooks that bind textures while reading the frame.
    pub fn frame_and_textures(&mut self) -> Option<(&PreparedSceneFrame, &mut TextureBinder)> {
        let frame = self.prepared.as_ref()?;
        Some((frame, &mut self.textures))
    }

    /// Release every registry resource once `retire_after` has completed.
    pub fn release_all(
        &mut self,
        registry: &mut ResourceRegistry,
        uploads: &UploadCoordinator,
        retire_after: FenceValue,
    ) {
        self.prepared = None;
        self.geometry.release_all(registry, retire_after);
        self.textures.release_all(registry, uploads, retire_after);
        self.materials.release_buffers(registry, retire_after);
        self.transforms.release(registry, retire_after);
        self.draw_metadata.release(registry, retire_after);
        self.lights.release(registry, retire_after);
    }
}

fn scene_constants(
    view: &View,
    sequence: FrameSequenceNumber,
    [draws, transforms, materials, lights]: [ShaderVisibleIndex; 4],
    light_count: u32,
) -> SceneConstants {
    let viewport = view.viewport();
    let camera: Vec3 = view.camera_position();
    SceneConstants {
        view: mat4_to_cols_array_2d(view.view_matrix()),
        projection: mat4_to_cols_array_2d(view.projection_matrix()),
        view_projection: mat4_to_cols_array_2d(view.view_projection()),
        inverse_view: mat4_to_cols_array_2d(view.inverse_view()),
        inverse_projection: mat4_to_cols_array_2d(view.inverse_projection()),
        inverse_view_projection: mat4_to_cols_array_2d(view.inverse_view_projection()),
        camera_position: camera.into(),
        reverse_z: u32::from(view.reverse_z()),
        viewport: [viewport.x, viewport.y, viewport.width, viewport.height],
        pixel_jitter: view.pixel_jitter().into(),
        z_near: view.near_plane(),
        z_far: view.far_plane(),
        bindless_indices_slot: draws.index(),
        transforms_slot: transforms.index(),
        materials_slot: materials.index(),
        lights_slot: lights.index(),
        light_count,
        frame_index: sequence.get() as u32,
        _pad: [0; 2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::config::GraphicsConfig;
    use crate::scene::{
        InMemoryTextureSource, MaterialAsset, MaterialDomain, MeshAsset, PointLight, Renderable,
        SceneLight, SceneNode,
    };
    use crate::scene_prep::ScenePrep;
    use crate::types::Viewport;
    use crate::view::{CameraResolver, PerspectiveCamera};

    struct Fixture {
        backend: Arc<DummyBackend>,
        registry: ResourceRegistry,
        uploads: UploadCoordinator,
        coordinator: ResourceCoordinator,
    }

    fn fixture() -> Fixture {
        let config = GraphicsConfig::default();
        let backend = Arc::new(DummyBackend::new(config.fence_mode));
        let dyn_backend: Arc<dyn GpuBackend> = backend.clone();
        let mut registry = ResourceRegistry::new(dyn_backend.clone(), &config.heap_strategy);
        let mut uploads = UploadCoordinator::new(dyn_backend, &config);
        let coordinator = ResourceCoordinator::new(
            &mut registry,
            &mut uploads,
            Arc::new(InMemoryTextureSource::new()),
        )
        .unwrap();
        Fixture {
            backend,
            registry,
            uploads,
            coordinator,
        }
    }

    fn view() -> View {
        PerspectiveCamera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros())
            .resolve(Viewport::from_dimensions(32, 32))
            .unwrap()
    }

    fn scene() -> SceneSnapshot {
        let cube = Arc::new(MeshAsset::cube("cube", 0.5));
        let glass = Arc::new(MaterialAsset::new("glass").with_domain(MaterialDomain::Transparent));
        SceneSnapshot::new()
            .with_node(
                SceneNode::new("near")
                    .with_translation(Vec3::new(0.0, 0.0, 1.0))
                    .with_renderable(Renderable::new(cube.clone()).with_material(0, glass)),
            )
            .with_node(
                SceneNode::new("far")
                    .with_translation(Vec3::new(0.0, 0.0, -2.0))
                    .with_renderable(Renderable::new(cube.clone())),
            )
            .with_node(SceneNode::new("twin").with_renderable(Renderable::new(cube)))
            .with_light(SceneLight::Point(PointLight::new(Vec3::new(0.0, 2.0, 0.0), 10.0, 1.0)))
    }

    fn prepare(f: &mut Fixture, scene: &SceneSnapshot) -> PreparedSceneFrame {
        let view = view();
        let items = ScenePrep::default()
            .run(scene, &view, FrameSequenceNumber::new(1))
            .items;
        f.coordinator
            .prepare(
                &mut f.registry,
                &mut f.uploads,
                scene,
                &view,
                &items,
                FrameSequenceNumber::new(1),
                FrameSlot::new(1),
            )
            .unwrap()
            .clone()
    }

    #[test]
    fn arrays_match_emitted_count() {
        let mut f = fixture();
        let frame = prepare(&mut f, &scene());
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.pass_masks().len(), 3);
        assert_eq!(frame.nodes().len(), 3);
        assert_eq!(frame.world_spheres().len(), 3);
        assert_eq!(frame.distances().len(), 3);
        assert_eq!(frame.positional_light_count(), 1);
        // One mesh asset, one geometry registration.
        assert_eq!(f.coordinator.geometry().len(), 1);
        assert!(frame.geometry_handles().iter().all(|h| *h == frame.geometry_handles()[0]));
    }

    #[test]
    fn scene_constants_carry_bindless_slots() {
        let mut f = fixture();
        let frame = prepare(&mut f, &scene());
        let constants = frame.scene_constants();
        assert_eq!(constants.bindless_indices_slot, frame.draw_metadata_srv_index().index());
        assert_eq!(constants.lights_slot, frame.positional_lights_srv_index().index());
        assert_eq!(constants.light_count, 1);
        assert_eq!(constants.viewport[2], 32.0);

        let view = f.backend.descriptor(constants.bindless_indices_slot).unwrap();
        let bytes = f
            .backend
            .read_buffer(view.resource().unwrap(), 0, std::mem::size_of::<DrawMetadata>() as u64)
            .unwrap();
        let first: DrawMetadata = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(first, frame.draw_metadata()[0]);
        assert_eq!(first.index_count, 36);
    }

    #[test]
    fn masks_split_opaque_and_blended() {
        let mut f = fixture();
        let frame = prepare(&mut f, &scene());
        let opaque: Vec<u32> = frame.draws_matching(PassMask::OPAQUE_OR_MASKED).collect();
        assert_eq!(opaque, vec![1, 2]);
        let blended: Vec<u32> = frame.draws_matching(PassMask::BLENDED).collect();
        assert_eq!(blended, vec![0]);
        assert!(MaterialRegistry::is_sentinel_handle(frame.material_handles()[1]));
    }

    #[test]
    fn back_to_front_orders_by_distance() {
        let mut f = fixture();
        let frame = prepare(&mut f, &scene());
        let all = PassMask::all();
        assert_eq!(frame.draws_back_to_front(all), vec![1, 2, 0]);
    }

    #[test]
    fn nodes_with_identical_worlds_keep_separate_handles() {
        let mut f = fixture();
        let cube = Arc::new(MeshAsset::cube("cube", 0.5));
        let scene = SceneSnapshot::new()
            .with_node(SceneNode::new("a").with_renderable(Renderable::new(cube.clone())))
            .with_node(SceneNode::new("b").with_renderable(Renderable::new(cube)));
        let first = prepare(&mut f, &scene).transform_handles().to_vec();
        assert_eq!(first.len(), 2);
        assert_ne!(first[0], first[1]);
        assert_eq!(f.coordinator.transforms().len(), 2);

        f.coordinator.on_frame_start(&mut f.registry, f.uploads.tracker());
        let second = prepare(&mut f, &scene).transform_handles().to_vec();
        assert_eq!(second, first);
    }

    #[test]
    fn frame_start_clears_the_frozen_frame() {
        let mut f = fixture();
        prepare(&mut f, &scene());
        assert!(f.coordinator.prepared_frame().is_some());
        f.coordinator.on_frame_start(&mut f.registry, f.uploads.tracker());
        assert!(f.coordinator.prepared_frame().is_none());
    }
}

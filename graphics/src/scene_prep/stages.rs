//! The five scene preparation stages and their default implementations.
//!
//! Stages are plain traits composed at compile time by
//! [`ScenePrep`](super::ScenePrep). Any stage but the producer may drop an
//! item, which skips the remaining stages for it.

use std::sync::Arc;

use kiln_core::math::{Aabb, BoundingSphere, Mat4, normal_matrix};

use super::{PassMask, RenderItemData, ScenePrepConfig};
use crate::scene::{MaterialAsset, MeshLod, NodeId, Renderable, SceneNode};
use crate::types::FrameSequenceNumber;
use crate::view::View;

/// Whether an item continues through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Drop,
}

/// Read-only inputs shared by every stage for one frame.
#[derive(Debug, Clone, Copy)]
pub struct PrepContext<'a> {
    pub view: &'a View,
    pub config: &'a ScenePrepConfig,
    pub frame: FrameSequenceNumber,
}

/// One renderable node on its way through the stages.
#[derive(Debug, Clone)]
pub struct PrepItem<'a> {
    pub node_id: NodeId,
    pub node: &'a SceneNode,
    pub renderable: &'a Renderable,
    pub world: Mat4,
    pub normal: Mat4,
    pub world_bounds: Aabb,
    pub world_sphere: BoundingSphere,
    /// Camera distance to the world bounding sphere's center.
    pub distance: f32,
    pub lod_index: usize,
    pub visible_submeshes: Vec<u32>,
}

impl<'a> PrepItem<'a> {
    pub fn new(node_id: NodeId, node: &'a SceneNode, renderable: &'a Renderable) -> Self {
        let bounds = renderable.geometry.bounds();
        Self {
            node_id,
            node,
            renderable,
            world: node.world,
            normal: Mat4::identity(),
            world_bounds: bounds,
            world_sphere: bounds.bounding_sphere(),
            distance: 0.0,
            lod_index: 0,
            visible_submeshes: Vec::new(),
        }
    }

    /// The LOD chosen by the mesh stage.
    pub fn lod(&self) -> Option<&'a MeshLod> {
        self.renderable.geometry.lod(self.lod_index)
    }
}

pub trait PreFilterStage {
    fn accept(&self, node: &SceneNode, ctx: &PrepContext<'_>) -> bool;
}

pub trait TransformStage {
    fn resolve(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome;
}

pub trait MeshStage {
    fn resolve(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome;
}

pub trait VisibilityStage {
    fn filter(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome;
}

pub trait ProducerStage {
    fn produce(&self, item: &PrepItem<'_>, ctx: &PrepContext<'_>, out: &mut Vec<RenderItemData>);
}

/// Visibility bit, renderable presence and a coarse sphere-vs-frustum test.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodePreFilter;

impl PreFilterStage for NodePreFilter {
    fn accept(&self, node: &SceneNode, ctx: &PrepContext<'_>) -> bool {
        if !node.visible {
            return false;
        }
        let Some(renderable) = &node.renderable else {
            return false;
        };
        let bounds = renderable.geometry.bounds();
        if bounds.is_empty() {
            return false;
        }
        if !ctx.config.frustum_cull {
            return true;
        }
        let coarse = bounds.bounding_sphere().transformed(&node.world);
        ctx.view.frustum().intersects_bounding_sphere(&coarse)
    }
}

/// World and normal matrices plus world-space bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldTransformResolver;

impl TransformStage for WorldTransformResolver {
    fn resolve(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome {
        if !kiln_core::math::mat4_is_finite(&item.node.world) {
            log::warn!("scene prep: node '{}' has a non-finite world matrix", item.node.name);
            return StageOutcome::Drop;
        }
        let bounds = item.renderable.geometry.bounds();
        item.world = item.node.world;
        item.normal = normal_matrix(&item.world);
        item.world_bounds = bounds.transformed(&item.world);
        item.world_sphere = bounds.bounding_sphere().transformed(&item.world);
        item.distance = ctx.view.distance_to(&item.world_sphere.center);
        StageOutcome::Continue
    }
}

/// Picks a LOD with the configured [`LodPolicy`](super::LodPolicy).
#[derive(Debug, Clone, Copy, Default)]
pub struct LodMeshResolver;

impl MeshStage for LodMeshResolver {
    fn resolve(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome {
        let lod_count = item.renderable.geometry.lod_count();
        if lod_count == 0 {
            return StageOutcome::Drop;
        }
        item.lod_index = ctx.config.lod_policy.select(ctx.view, item.distance, lod_count);
        match item.lod() {
            Some(lod) if !lod.indices.is_empty() => StageOutcome::Continue,
            _ => StageOutcome::Drop,
        }
    }
}

/// Per-submesh frustum test.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmeshFrustumFilter;

impl VisibilityStage for SubmeshFrustumFilter {
    fn filter(&self, item: &mut PrepItem<'_>, ctx: &PrepContext<'_>) -> StageOutcome {
        let Some(lod) = item.lod() else {
            return StageOutcome::Drop;
        };
        item.visible_submeshes.clear();
        for (index, submesh) in lod.submeshes.iter().enumerate() {
            if submesh.index_count == 0 {
                continue;
            }
            let visible = !ctx.config.submesh_cull
                || ctx
                    .view
                    .frustum()
                    .intersects_bounds(&submesh.bounds.transformed(&item.world));
            if visible {
                item.visible_submeshes.push(index as u32);
            }
        }
        if item.visible_submeshes.is_empty() {
            StageOutcome::Drop
        } else {
            StageOutcome::Continue
        }
    }
}

/// One [`RenderItemData`] per visible submesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderItemProducer;

impl RenderItemProducer {
    fn material(item: &PrepItem<'_>, submesh: u32) -> Option<Arc<MaterialAsset>> {
        if let Some(material) = item.renderable.material_override(submesh) {
            return Some(material.clone());
        }
        item.lod()?.submeshes.get(submesh as usize)?.material.clone()
    }
}

impl ProducerStage for RenderItemProducer {
    fn produce(&self, item: &PrepItem<'_>, _ctx: &PrepContext<'_>, out: &mut Vec<RenderItemData>) {
        let Some(lod) = item.lod() else {
            return;
        };
        for &submesh_index in &item.visible_submeshes {
            let Some(submesh) = lod.submeshes.get(submesh_index as usize) else {
                continue;
            };
            let material = Self::material(item, submesh_index);
            let pass_mask = PassMask::for_material(material.as_deref());
            let world_bounds = submesh.bounds.transformed(&item.world);
            out.push(RenderItemData {
                node: item.node_id,
                geometry: item.renderable.geometry.clone(),
                lod_index: item.lod_index as u32,
                submesh_index,
                first_index: submesh.first_index,
                index_count: submesh.index_count,
                base_vertex: submesh.base_vertex,
                material,
                world: item.world,
                normal: item.normal,
                world_bounds,
                world_sphere: world_bounds.bounding_sphere(),
                distance: item.distance,
                pass_mask,
            });
        }
    }
}

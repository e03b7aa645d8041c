//! Scene preparation: one traversal of the scene snapshot per frame that
//! turns visible renderables into flat [`RenderItemData`] records.
//!
//! Preparation is CPU-only and deterministic. Items come out in node order,
//! then submesh order, so the same scene, view and frame always produce the
//! same list.
//!
//! ```text
//! pre-filter -> transform -> mesh/LOD -> visibility -> producer
//! ```

mod config;
mod stages;

use std::sync::Arc;

use bitflags::bitflags;
use kiln_core::math::{Aabb, BoundingSphere, Mat4, mat4_translation};

pub use config::{LodPolicy, ScenePrepConfig};
pub use stages::{
    LodMeshResolver, MeshStage, NodePreFilter, PreFilterStage, PrepContext, PrepItem,
    ProducerStage, RenderItemProducer, StageOutcome, SubmeshFrustumFilter, TransformStage,
    VisibilityStage, WorldTransformResolver,
};

use crate::scene::{MaterialAsset, MaterialDomain, MeshAsset, NodeId, SceneSnapshot};
use crate::types::FrameSequenceNumber;
use crate::view::View;

bitflags! {
    /// Render buckets a draw is eligible for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassMask: u32 {
        const OPAQUE = 1 << 0;
        const MASKED = 1 << 1;
        const TRANSPARENT = 1 << 2;
        const ADDITIVE = 1 << 3;
        const TRANSMISSION = 1 << 4;
        const DECAL = 1 << 5;
        const UI = 1 << 6;
    }
}

impl PassMask {
    /// Draws the depth prepass and the forward pass consume.
    pub const OPAQUE_OR_MASKED: PassMask = PassMask::OPAQUE.union(PassMask::MASKED);
    /// Draws blended after the forward pass.
    pub const BLENDED: PassMask = PassMask::TRANSPARENT.union(PassMask::ADDITIVE);

    pub fn from_domain(domain: MaterialDomain) -> Self {
        match domain {
            MaterialDomain::Opaque => Self::OPAQUE,
            MaterialDomain::Masked => Self::MASKED,
            MaterialDomain::Transparent => Self::TRANSPARENT,
            MaterialDomain::Additive => Self::ADDITIVE,
            MaterialDomain::Transmission => Self::TRANSMISSION,
            MaterialDomain::Decal => Self::DECAL,
            MaterialDomain::Ui => Self::UI,
        }
    }

    /// Submeshes without a material render as opaque.
    pub fn for_material(material: Option<&MaterialAsset>) -> Self {
        material.map_or(Self::OPAQUE, |m| Self::from_domain(m.domain))
    }
}

/// One visible submesh, ready for the resource coordinator.
#[derive(Debug, Clone)]
pub struct RenderItemData {
    pub node: NodeId,
    pub geometry: Arc<MeshAsset>,
    pub lod_index: u32,
    pub submesh_index: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub material: Option<Arc<MaterialAsset>>,
    pub world: Mat4,
    pub normal: Mat4,
    pub world_bounds: Aabb,
    pub world_sphere: BoundingSphere,
    /// Camera distance of the owning node.
    pub distance: f32,
    pub pass_mask: PassMask,
}

impl RenderItemData {
    pub fn world_translation(&self) -> kiln_core::math::Vec3 {
        mat4_translation(&self.world)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenePrepStats {
    pub nodes_visited: usize,
    /// Rejected by the pre-filter (hidden, not renderable or coarse-culled).
    pub pre_filtered: usize,
    /// Dropped by the transform, mesh or visibility stage.
    pub dropped: usize,
    pub items_emitted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScenePrepOutput {
    pub items: Vec<RenderItemData>,
    pub stats: ScenePrepStats,
}

/// Stage pipeline. Each type parameter is one stage; the defaults give the
/// standard behavior.
#[derive(Debug, Clone)]
pub struct ScenePrep<
    F = NodePreFilter,
    T = WorldTransformResolver,
    M = LodMeshResolver,
    V = SubmeshFrustumFilter,
    P = RenderItemProducer,
> {
    config: ScenePrepConfig,
    pre_filter: F,
    transform: T,
    mesh: M,
    visibility: V,
    producer: P,
}

impl ScenePrep {
    pub fn new(config: ScenePrepConfig) -> Self {
        Self {
            config,
            pre_filter: NodePreFilter,
            transform: WorldTransformResolver,
            mesh: LodMeshResolver,
            visibility: SubmeshFrustumFilter,
            producer: RenderItemProducer,
        }
    }
}

impl Default for ScenePrep {
    fn default() -> Self {
        Self::new(ScenePrepConfig::default())
    }
}

impl<F, T, M, V, P> ScenePrep<F, T, M, V, P>
where
    F: PreFilterStage,
    T: TransformStage,
    M: MeshStage,
    V: VisibilityStage,
    P: ProducerStage,
{
    pub fn config(&self) -> &ScenePrepConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ScenePrepConfig {
        &mut self.config
    }

    pub fn with_pre_filter<F2: PreFilterStage>(self, pre_filter: F2) -> ScenePrep<F2, T, M, V, P> {
        ScenePrep {
            config: self.config,
            pre_filter,
            transform: self.transform,
            mesh: self.mesh,
            visibility: self.visibility,
            producer: self.producer,
        }
    }

    pub fn with_producer<P2: ProducerStage>(self, producer: P2) -> ScenePrep<F, T, M, V, P2> {
        ScenePrep {
            config: self.config,
            pre_filter: self.pre_filter,
            transform: self.transform,
            mesh: self.mesh,
            visibility: self.visibility,
            producer,
        }
    }

    /// Traverse `scene` once for `view`.
    pub fn run(
        &self,
        scene: &SceneSnapshot,
        view: &View,
        frame: FrameSequenceNumber,
    ) -> ScenePrepOutput {
        kiln_core::profile_scope!("ScenePrep::run");
        let ctx = PrepContext {
            view,
            config: &self.config,
            frame,
        };
        let mut output = ScenePrepOutput::default();
        for (index, node) in scene.nodes().iter().enumerate() {
            output.stats.nodes_visited += 1;
            if !self.pre_filter.accept(node, &ctx) {
                output.stats.pre_filtered += 1;
                continue;
            }
            let Some(renderable) = &node.renderable else {
                output.stats.pre_filtered += 1;
                continue;
            };
            let mut item = PrepItem::new(NodeId(index as u32), node, renderable);
            let kept = self.transform.resolve(&mut item, &ctx) == StageOutcome::Continue
                && self.mesh.resolve(&mut item, &ctx) == StageOutcome::Continue
                && self.visibility.filter(&mut item, &ctx) == StageOutcome::Continue;
            if !kept {
                output.stats.dropped += 1;
                continue;
            }
            self.producer.produce(&item, &ctx, &mut output.items);
        }
        output.stats.items_emitted = output.items.len();
        log::trace!("scene prep {frame}: {:?}", output.stats);
        output
    }
}

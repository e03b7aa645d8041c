//! Read-only scene snapshot consumed by scene preparation.
//!
//! World matrices are already propagated by the scene graph; the renderer
//! never walks a hierarchy.

use std::sync::Arc;

use kiln_core::math::{Mat4, Vec3, mat4_from_translation};

use super::{MaterialAsset, MeshAsset};
use crate::error::GraphicsError;

/// Index of a node inside its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Geometry plus per-submesh material overrides.
#[derive(Debug, Clone)]
pub struct Renderable {
    pub geometry: Arc<MeshAsset>,
    /// `(submesh index, material)` pairs that replace the submesh's own material.
    pub material_overrides: Vec<(u32, Arc<MaterialAsset>)>,
}

impl Renderable {
    pub fn new(geometry: Arc<MeshAsset>) -> Self {
        Self {
            geometry,
            material_overrides: Vec::new(),
        }
    }

    pub fn with_material(mut self, submesh: u32, material: Arc<MaterialAsset>) -> Self {
        self.material_overrides.retain(|(s, _)| *s != submesh);
        self.material_overrides.push((submesh, material));
        self
    }

    /// Material override for `submesh`, if any.
    pub fn material_override(&self, submesh: u32) -> Option<&Arc<MaterialAsset>> {
        self.material_overrides
            .iter()
            .find(|(s, _)| *s == submesh)
            .map(|(_, m)| m)
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub world: Mat4,
    pub visible: bool,
    pub renderable: Option<Renderable>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            world: Mat4::identity(),
            visible: true,
            renderable: None,
        }
    }

    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn with_translation(self, translation: Vec3) -> Self {
        self.with_world(mat4_from_translation(translation))
    }

    pub fn with_renderable(mut self, renderable: Renderable) -> Self {
        self.renderable = Some(renderable);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl PointLight {
    pub fn new(position: Vec3, range: f32, intensity: f32) -> Self {
        Self {
            position,
            range,
            color: Vec3::repeat(1.0),
            intensity,
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// The one directional light that drives sky and sun shading.
    pub designated_sun: bool,
}

impl DirectionalLight {
    pub fn sun(direction: Vec3, intensity: f32) -> Self {
        Self {
            direction,
            color: Vec3::repeat(1.0),
            intensity,
            designated_sun: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneLight {
    Point(PointLight),
    Directional(DirectionalLight),
}

/// Nodes and lights of one frame.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    nodes: Vec<SceneNode>,
    lights: Vec<SceneLight>,
}

impl SceneSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: SceneNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    pub fn add_light(&mut self, light: SceneLight) {
        self.lights.push(light);
    }

    pub fn with_node(mut self, node: SceneNode) -> Self {
        self.add_node(node);
        self
    }

    pub fn with_light(mut self, light: SceneLight) -> Self {
        self.add_light(light);
        self
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    pub fn point_lights(&self) -> impl Iterator<Item = &PointLight> {
        self.lights.iter().filter_map(|l| match l {
            SceneLight::Point(p) => Some(p),
            SceneLight::Directional(_) => None,
        })
    }

    /// The designated sun, if any.
    pub fn designated_sun(&self) -> Option<&DirectionalLight> {
        self.lights.iter().find_map(|l| match l {
            SceneLight::Directional(d) if d.designated_sun => Some(d),
            _ => None,
        })
    }

    /// At most one directional light may be the designated sun.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let suns = self
            .lights
            .iter()
            .filter(|l| matches!(l, SceneLight::Directional(d) if d.designated_sun))
            .count();
        if suns > 1 {
            return Err(GraphicsError::InvalidParameter(format!(
                "scene has {suns} designated suns, at most one is allowed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_dense() {
        let mut scene = SceneSnapshot::new();
        let a = scene.add_node(SceneNode::new("a"));
        let b = scene.add_node(SceneNode::new("b").with_translation(Vec3::new(0.0, 1.0, 0.0)));
        assert_eq!((a, b), (NodeId(0), NodeId(1)));
        assert_eq!(scene.node(b).unwrap().world[(1, 3)], 1.0);
    }

    #[test]
    fn two_suns_are_rejected() {
        let sun = SceneLight::Directional(DirectionalLight::sun(-Vec3::y(), 1.0));
        let scene = SceneSnapshot::new().with_light(sun);
        assert!(scene.validate().is_ok());
        assert!(scene.designated_sun().is_some());
        assert!(scene.with_light(sun).validate().is_err());
    }

    #[test]
    fn overrides_replace_per_submesh() {
        let mesh = Arc::new(MeshAsset::cube("c", 1.0));
        let red = Arc::new(MaterialAsset::new("red"));
        let blue = Arc::new(MaterialAsset::new("blue"));
        let r = Renderable::new(mesh)
            .with_material(0, red)
            .with_material(0, blue.clone());
        assert_eq!(r.material_overrides.len(), 1);
        assert!(Arc::ptr_eq(r.material_override(0).unwrap(), &blue));
        assert!(r.material_override(1).is_none());
    }
}

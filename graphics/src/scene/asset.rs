//! Already-loaded geometry and material assets.

use std::sync::Arc;

use kiln_core::keys::{AssetKey, AssetType, ResourceKey};
use kiln_core::math::{Aabb, Vec3};

use crate::gpu_types::Vertex;

/// How a material participates in rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum MaterialDomain {
    #[default]
    Opaque = 0,
    /// Opaque with alpha-tested cutout.
    Masked = 1,
    Transparent = 2,
    Additive = 3,
    Transmission = 4,
    Decal = 5,
    Ui = 6,
}

/// PBR material parameters plus texture references by [`ResourceKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    pub key: AssetKey,
    pub name: String,
    pub domain: MaterialDomain,
    pub base_color: [f32; 4],
    pub base_color_texture: Option<ResourceKey>,
    pub normal_texture: Option<ResourceKey>,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_strength: f32,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl MaterialAsset {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: AssetKey::from_name(&name, AssetType::Material),
            name,
            domain: MaterialDomain::Opaque,
            base_color: [1.0; 4],
            base_color_texture: None,
            normal_texture: None,
            metallic: 0.0,
            roughness: 1.0,
            emissive_strength: 0.0,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }

    pub fn with_base_color(mut self, color: [f32; 4]) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_domain(mut self, domain: MaterialDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_base_color_texture(mut self, key: ResourceKey) -> Self {
        self.base_color_texture = Some(key);
        self
    }

    pub fn with_normal_texture(mut self, key: ResourceKey) -> Self {
        self.normal_texture = Some(key);
        self
    }

    pub fn with_emissive(mut self, strength: f32) -> Self {
        self.emissive_strength = strength;
        self
    }

    pub fn with_alpha_cutoff(mut self, cutoff: f32) -> Self {
        self.alpha_cutoff = cutoff;
        self
    }

    /// Texture keys referenced by this material, in binding order.
    pub fn texture_keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.base_color_texture
            .iter()
            .chain(self.normal_texture.iter())
            .copied()
    }
}

/// Index range of one LOD drawn with a single material.
#[derive(Debug, Clone)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    /// Object-space bounds of the indexed vertices.
    pub bounds: Aabb,
    pub material: Option<Arc<MaterialAsset>>,
}

/// One level of detail: shared vertex and index data plus its submeshes.
#[derive(Debug, Clone)]
pub struct MeshLod {
    pub vertices: Arc<[Vertex]>,
    pub indices: Arc<[u32]>,
    pub submeshes: Vec<Submesh>,
    pub bounds: Aabb,
}

impl MeshLod {
    /// A LOD with one submesh covering every index.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = vertex_bounds(&vertices, &indices);
        let submesh = Submesh {
            first_index: 0,
            index_count: indices.len() as u32,
            base_vertex: 0,
            bounds,
            material: None,
        };
        Self {
            vertices: vertices.into(),
            indices: indices.into(),
            submeshes: vec![submesh],
            bounds,
        }
    }

    /// Split the index buffer into submeshes of `(first_index, index_count)`.
    pub fn with_submeshes(mut self, ranges: &[(u32, u32)]) -> Self {
        self.submeshes = ranges
            .iter()
            .map(|&(first, count)| {
                let start = (first as usize).min(self.indices.len());
                let end = (start + count as usize).min(self.indices.len());
                Submesh {
                    first_index: first,
                    index_count: count,
                    base_vertex: 0,
                    bounds: vertex_bounds(&self.vertices, &self.indices[start..end]),
                    material: None,
                }
            })
            .collect();
        self
    }

    pub fn with_material(mut self, submesh: usize, material: Arc<MaterialAsset>) -> Self {
        if let Some(s) = self.submeshes.get_mut(submesh) {
            s.material = Some(material);
        }
        self
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

fn vertex_bounds(vertices: &[Vertex], indices: &[u32]) -> Aabb {
    let mut aabb = Aabb::empty();
    for &i in indices {
        if let Some(v) = vertices.get(i as usize) {
            aabb.expand(&Vec3::from(v.position));
        }
    }
    aabb
}

/// A geometry asset with one or more LODs, finest first.
#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub key: AssetKey,
    pub name: String,
    lods: Vec<MeshLod>,
    bounds: Aabb,
}

impl MeshAsset {
    pub fn new(name: impl Into<String>, lod0: MeshLod) -> Self {
        let name = name.into();
        Self {
            key: AssetKey::from_name(&name, AssetType::Geometry),
            bounds: lod0.bounds,
            name,
            lods: vec![lod0],
        }
    }

    pub fn with_lod(mut self, lod: MeshLod) -> Self {
        self.bounds = self.bounds.union(&lod.bounds);
        self.lods.push(lod);
        self
    }

    pub fn lods(&self) -> &[MeshLod] {
        &self.lods
    }

    pub fn lod(&self, index: usize) -> Option<&MeshLod> {
        self.lods.get(index)
    }

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    /// Object-space bounds over every LOD.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// One triangle, counter-clockwise when seen from +Z.
    pub fn triangle(name: impl Into<String>, a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Self {
        let normal = (Vec3::from(b) - Vec3::from(a))
            .cross(&(Vec3::from(c) - Vec3::from(a)))
            .try_normalize(1e-8)
            .unwrap_or(Vec3::z());
        let n = [normal.x, normal.y, normal.z];
        let vertices = vec![
            Vertex::new(a, n, [0.0, 1.0]),
            Vertex::new(b, n, [1.0, 1.0]),
            Vertex::new(c, n, [0.5, 0.0]),
        ];
        Self::new(name, MeshLod::new(vertices, vec![0, 1, 2]))
    }

    /// Quad on the XY plane facing +Z.
    pub fn quad(name: impl Into<String>, half_width: f32, half_height: f32) -> Self {
        let n = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex::new([-half_width, -half_height, 0.0], n, [0.0, 1.0]),
            Vertex::new([half_width, -half_height, 0.0], n, [1.0, 1.0]),
            Vertex::new([half_width, half_height, 0.0], n, [1.0, 0.0]),
            Vertex::new([-half_width, half_height, 0.0], n, [0.0, 0.0]),
        ];
        Self::new(name, MeshLod::new(vertices, vec![0, 1, 2, 2, 3, 0]))
    }

    /// Axis-aligned cube centered at the origin, outward-facing.
    pub fn cube(name: impl Into<String>, half_extent: f32) -> Self {
        let h = half_extent;
        // (normal, tangent u, tangent v) with u x v = normal
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
            let base = vertices.len() as u32;
            for (su, sv, uv) in [
                (-1.0, -1.0, [0.0, 1.0]),
                (1.0, -1.0, [1.0, 1.0]),
                (1.0, 1.0, [1.0, 0.0]),
                (-1.0, 1.0, [0.0, 0.0]),
            ] {
                let p = (n + u * su + v * sv) * h;
                vertices.push(Vertex::new([p.x, p.y, p.z], normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self::new(name, MeshLod::new(vertices, indices))
    }
}

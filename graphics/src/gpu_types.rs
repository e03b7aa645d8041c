//! Shader-facing constant and structured-buffer layouts.
//!
//! Every struct here is `#[repr(C)]` and `Pod` so it can be copied into
//! constant registers and structured buffers byte for byte. Sizes are
//! checked at compile time.

use bytemuck::{Pod, Zeroable};
use kiln_core::math::{Mat4, mat4_to_cols_array_2d};
use static_assertions::const_assert_eq;

/// Sentinel stored in bindless slot fields that have nothing bound.
pub const INVALID_BINDLESS_SLOT: u32 = u32::MAX;

/// Constant register numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstantRegister {
    /// `b0`: [`EngineConstants`]
    Engine = 0,
    /// `b1`: [`SceneConstants`]
    Scene = 1,
    /// `b3`: [`EnvironmentDynamicData`]
    Environment = 3,
}

/// Root 32-bit constant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootConstantSlot {
    /// Index into the frame's `DrawMetadata` buffer.
    DrawIndex,
    /// Shader-visible index of the pass's per-pass constants SRV.
    PassConstants,
}

/// `b0`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct EngineConstants {
    pub frame_index: u32,
    pub time_seconds: f32,
    pub frames_in_flight: u32,
    pub frame_slot: u32,
}

const_assert_eq!(std::mem::size_of::<EngineConstants>(), 16);

/// `b1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 3],
    pub reverse_z: u32,
    /// x, y, width, height
    pub viewport: [f32; 4],
    pub pixel_jitter: [f32; 2],
    pub z_near: f32,
    pub z_far: f32,
    /// Shader-visible index of the `DrawMetadata` SRV.
    pub bindless_indices_slot: u32,
    pub transforms_slot: u32,
    pub materials_slot: u32,
    pub lights_slot: u32,
    pub light_count: u32,
    pub frame_index: u32,
    pub _pad: [u32; 2],
}

const_assert_eq!(std::mem::size_of::<SceneConstants>() % 16, 0);

impl Default for SceneConstants {
    fn default() -> Self {
        let identity = mat4_to_cols_array_2d(&Mat4::identity());
        Self {
            view: identity,
            projection: identity,
            view_projection: identity,
            inverse_view: identity,
            inverse_projection: identity,
            inverse_view_projection: identity,
            camera_position: [0.0; 3],
            reverse_z: 0,
            viewport: [0.0; 4],
            pixel_jitter: [0.0; 2],
            z_near: 0.1,
            z_far: 1000.0,
            bindless_indices_slot: INVALID_BINDLESS_SLOT,
            transforms_slot: INVALID_BINDLESS_SLOT,
            materials_slot: INVALID_BINDLESS_SLOT,
            lights_slot: INVALID_BINDLESS_SLOT,
            light_count: 0,
            frame_index: 0,
            _pad: [0; 2],
        }
    }
}

/// `b3`. Exactly 80 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EnvironmentDynamicData {
    pub exposure: f32,
    pub cluster_grid_slot: u32,
    pub cluster_index_list_slot: u32,
    pub sun_valid: u32,
    pub cluster_dim_x: u32,
    pub cluster_dim_y: u32,
    pub cluster_dim_z: u32,
    pub tile_size_px: u32,
    pub z_near: f32,
    pub z_far: f32,
    /// `slice = log2(z) * z_scale + z_bias`
    pub z_scale: f32,
    pub z_bias: f32,
    /// Direction towards the sun.
    pub sun_direction: [f32; 3],
    pub sun_intensity: f32,
    pub sun_color: [f32; 3],
    pub _pad: f32,
}

const_assert_eq!(std::mem::size_of::<EnvironmentDynamicData>(), 80);

impl Default for EnvironmentDynamicData {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            cluster_grid_slot: INVALID_BINDLESS_SLOT,
            cluster_index_list_slot: INVALID_BINDLESS_SLOT,
            sun_valid: 0,
            cluster_dim_x: 0,
            cluster_dim_y: 0,
            cluster_dim_z: 0,
            tile_size_px: 0,
            z_near: 0.1,
            z_far: 1000.0,
            z_scale: 0.0,
            z_bias: 0.0,
            sun_direction: [0.0, 1.0, 0.0],
            sun_intensity: 0.0,
            sun_color: [1.0; 3],
            _pad: 0.0,
        }
    }
}

/// Per-material parameters, one element of the material structured buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub base_color: [f32; 4],
    pub base_color_texture: u32,
    pub normal_texture: u32,
    pub alpha_cutoff: f32,
    /// `MaterialDomain` as u32.
    pub domain: u32,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_strength: f32,
    pub flags: u32,
}

const_assert_eq!(std::mem::size_of::<MaterialConstants>(), 48);

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            base_color_texture: INVALID_BINDLESS_SLOT,
            normal_texture: INVALID_BINDLESS_SLOT,
            alpha_cutoff: 0.5,
            domain: 0,
            metallic: 0.0,
            roughness: 1.0,
            emissive_strength: 0.0,
            flags: 0,
        }
    }
}

/// Per-draw record read by vertex-pulling shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawMetadata {
    pub transform_index: u32,
    pub material_index: u32,
    /// Shader-visible index of the vertex buffer SRV.
    pub geometry_vb_index: u32,
    /// Shader-visible index of the index buffer SRV.
    pub geometry_ib_index: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub pass_mask: u32,
    pub submesh_id: u32,
    pub _pad: [u32; 3],
}

const_assert_eq!(std::mem::size_of::<DrawMetadata>(), 48);

/// World and normal matrix pair, one element of the transform buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTransform {
    pub world: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

const_assert_eq!(std::mem::size_of::<GpuTransform>(), 128);

/// Point light, one element of the positional lights buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuPositionalLight {
    pub position: [f32; 3],
    pub range: f32,
    pub color: [f32; 3],
    pub intensity: f32,
}

const_assert_eq!(std::mem::size_of::<GpuPositionalLight>(), 32);

/// Mesh vertex as stored in geometry buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<Vertex>(), 32);

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// One cluster of the light grid: a range in the light index list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ClusterRecord {
    pub offset: u32,
    pub count: u32,
}

const_assert_eq!(std::mem::size_of::<ClusterRecord>(), 8);

/// Per-pass constants for the light culling kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct LightCullingConstants {
    /// Depth SRV used for per-tile depth bounds; invalid in clustered mode.
    pub depth_texture_slot: u32,
    pub max_lights_per_cluster: u32,
    /// Capacity of the light index list.
    pub index_capacity: u32,
    pub _pad: u32,
}

const_assert_eq!(std::mem::size_of::<LightCullingConstants>(), 16);

/// Sky source selected by the sky pass, in fallback order.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkyMode {
    Atmosphere = 0,
    Cubemap = 1,
    Solid = 2,
    Black = 3,
}

impl SkyMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Atmosphere,
            1 => Self::Cubemap,
            2 => Self::Solid,
            3 => Self::Black,
            _ => return None,
        })
    }
}

/// Operation of one compositing task.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeOp {
    /// Source texture replaces the target.
    Copy = 0,
    /// Tint color blended over the target with `alpha`.
    Blend = 1,
    /// Tinted source texture blended over the target with `alpha`.
    TextureBlend = 2,
    /// Reinhard tonemap of the source with `exposure`.
    Tonemap = 3,
    /// Source mixed with the history texture by `history_weight`.
    Taa = 4,
}

impl CompositeOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Copy,
            1 => Self::Blend,
            2 => Self::TextureBlend,
            3 => Self::Tonemap,
            4 => Self::Taa,
            _ => return None,
        })
    }
}

/// Per-pass constants for the sky program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkyPassConstants {
    pub solid_color: [f32; 4],
    /// `SkyMode` as u32.
    pub mode: u32,
    pub cubemap_slot: u32,
    pub sun_size: f32,
    pub _pad: u32,
}

const_assert_eq!(std::mem::size_of::<SkyPassConstants>(), 32);

/// Per-pass constants for one compositing task.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CompositeConstants {
    /// `CompositeOp` as u32.
    pub op: u32,
    pub source_slot: u32,
    pub history_slot: u32,
    pub _pad0: u32,
    pub tint: [f32; 4],
    pub alpha: f32,
    pub exposure: f32,
    pub history_weight: f32,
    pub _pad1: f32,
}

const_assert_eq!(std::mem::size_of::<CompositeConstants>(), 48);

/// Per-pass constants for GPU debug line drawing.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DebugPassConstants {
    pub line_buffer_slot: u32,
    pub counter_slot: u32,
    pub max_lines: u32,
    pub _pad: u32,
}

const_assert_eq!(std::mem::size_of::<DebugPassConstants>(), 16);

/// One GPU debug line vertex pair as written by shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct DebugLine {
    pub start: [f32; 4],
    pub end: [f32; 4],
    pub color: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<DebugLine>(), 48);

/// Per-pass constants for ImGui drawing.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ImGuiPassConstants {
    pub vertex_buffer_slot: u32,
    pub font_texture_slot: u32,
    pub display_size: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<ImGuiPassConstants>(), 16);

/// ImGui vertex in screen pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ImGuiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<ImGuiVertex>(), 32);

//! Built-in graphics programs for the reference rasterizer.
//!
//! Each program pulls its inputs through bindless slots the same way the GPU
//! shaders do: scene constants name the draw-metadata, transform, material
//! and light buffers, and the pass-constants root constant names a constant
//! buffer holding the program's pass block.

use kiln_core::math::{Mat4, Vec3, Vec4, mat4_from_cols_array_2d};

use super::memory::TextureStore;
use super::raster::{self, ClipVertex, Fragment, RasterState, Targets};
use super::{DeviceState, ExecContext};
use crate::error::GraphicsError;
use crate::gpu_types::{
    ClusterRecord, CompositeConstants, CompositeOp, ConstantRegister, DebugLine,
    DebugPassConstants, DrawMetadata, EnvironmentDynamicData, GpuPositionalLight, GpuTransform,
    INVALID_BINDLESS_SLOT, ImGuiPassConstants, ImGuiVertex, MaterialConstants, RootConstantSlot,
    SceneConstants, SkyMode, SkyPassConstants, Vertex,
};
use crate::pipeline_state::{GraphicsPipelineDesc, PipelineDesc, PrimitiveTopology};
use crate::shader::{GraphicsProgram, ShaderPermutation};
use crate::types::{GpuResourceId, SamplerDescriptor, Viewport};

pub(crate) const AMBIENT: f32 = 0.1;

const SKY_ZENITH: [f32; 3] = [0.22, 0.42, 0.82];
const SKY_HORIZON: [f32; 3] = [0.7, 0.8, 0.95];
const SKY_GROUND: [f32; 3] = [0.3, 0.28, 0.25];

fn mat(cols: &[[f32; 4]; 4]) -> Mat4 {
    mat4_from_cols_array_2d(cols)
}

fn missing(what: &str, slot: u32) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what}: nothing readable at bindless slot {slot}"))
}

fn pass_constants<T: bytemuck::Pod>(
    state: &DeviceState,
    ctx: &ExecContext,
    program: GraphicsProgram,
) -> Result<T, GraphicsError> {
    let slot = ctx.root_constant(RootConstantSlot::PassConstants);
    state
        .element(slot, 0)
        .ok_or_else(|| missing(&format!("{program:?} pass constants"), slot))
}

fn fullscreen_triangle(z: f32) -> Vec<ClipVertex> {
    [(-1.0, -1.0), (3.0, -1.0), (-1.0, 3.0)]
        .into_iter()
        .map(|(x, y)| {
            let mut v = ClipVertex::new(Vec4::new(x, y, z, 1.0));
            v.varyings[0] = x;
            v.varyings[1] = y;
            v
        })
        .collect()
}

/// Run a draw of `vertex_count` vertices with the bound pipeline.
pub(super) fn draw(
    state: &mut DeviceState,
    ctx: &ExecContext,
    first_vertex: u32,
    vertex_count: u32,
) -> Result<u64, GraphicsError> {
    let handle = ctx
        .pipeline
        .ok_or_else(|| GraphicsError::InvalidState("draw without a pipeline".into()))?;
    let desc = match state.pipeline(handle)? {
        PipelineDesc::Graphics(desc) => desc.clone(),
        PipelineDesc::Compute(desc) => {
            return Err(GraphicsError::InvalidState(format!(
                "draw with compute pipeline '{}'",
                desc.label
            )));
        }
    };

    let color_id = ctx.color.map(|view| view.resource);
    let depth_id = ctx.depth.map(|view| view.resource);
    let Some(size) = color_id
        .or(depth_id)
        .and_then(|id| state.textures.get(&id))
        .map(|t| (t.width(), t.height()))
    else {
        return Err(GraphicsError::InvalidState(format!(
            "draw '{}' without render targets",
            desc.label
        )));
    };

    let vertices = run_vertex_stage(state, ctx, &desc, first_vertex, vertex_count, size)?;
    if vertices.is_empty() {
        return Ok(0);
    }

    let raster_state = RasterState {
        viewport: ctx
            .viewport
            .unwrap_or_else(|| Viewport::from_dimensions(size.0, size.1)),
        scissor: ctx.scissor,
        depth: desc.depth,
        blend: desc.blend,
        cull: desc.cull,
        write_color: desc.color_format.is_some(),
    };

    // Targets leave the texture map for the draw so shading can read the rest.
    let mut color = take(state, color_id);
    let mut depth = take(state, depth_id);
    let written = {
        let mut targets = Targets {
            color: color.as_mut(),
            depth: depth.as_mut(),
        };
        let shared: &DeviceState = state;
        let mut shade = fragment_program(shared, ctx, &desc);
        match desc.topology {
            PrimitiveTopology::TriangleList => {
                raster::draw_triangles(&vertices, &raster_state, &mut targets, &mut *shade)
            }
            PrimitiveTopology::LineList => {
                raster::draw_lines(&vertices, &raster_state, &mut targets, &mut *shade)
            }
        }
    };
    restore(state, color_id, color);
    restore(state, depth_id, depth);
    Ok(written)
}

fn take(state: &mut DeviceState, id: Option<GpuResourceId>) -> Option<TextureStore> {
    id.and_then(|id| state.textures.remove(&id))
}

fn restore(state: &mut DeviceState, id: Option<GpuResourceId>, store: Option<TextureStore>) {
    if let (Some(id), Some(store)) = (id, store) {
        state.textures.insert(id, store);
    }
}

/// Resolved inputs of a mesh draw.
struct MeshDraw {
    meta: DrawMetadata,
    world: Mat4,
    normal: Mat4,
}

fn mesh_draw(state: &DeviceState, ctx: &ExecContext) -> Result<(SceneConstants, MeshDraw), GraphicsError> {
    let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
    let draw_index = ctx.root_constant(RootConstantSlot::DrawIndex);
    let meta: DrawMetadata = state
        .element(scene.bindless_indices_slot, draw_index)
        .ok_or_else(|| missing("draw metadata", scene.bindless_indices_slot))?;
    let transform: GpuTransform = state
        .element(scene.transforms_slot, meta.transform_index)
        .ok_or_else(|| missing("transform", scene.transforms_slot))?;
    Ok((
        scene,
        MeshDraw {
            meta,
            world: mat(&transform.world),
            normal: mat(&transform.normal),
        },
    ))
}

fn run_vertex_stage(
    state: &DeviceState,
    ctx: &ExecContext,
    desc: &GraphicsPipelineDesc,
    first_vertex: u32,
    vertex_count: u32,
    size: (u32, u32),
) -> Result<Vec<ClipVertex>, GraphicsError> {
    let range = first_vertex..first_vertex.saturating_add(vertex_count);
    match desc.program {
        GraphicsProgram::DepthOnly | GraphicsProgram::ForwardMesh => {
            let (scene, draw) = mesh_draw(state, ctx)?;
            let view_projection = mat(&scene.view_projection);
            let (vw, vh) = if scene.viewport[2] > 0.0 && scene.viewport[3] > 0.0 {
                (scene.viewport[2], scene.viewport[3])
            } else {
                (size.0 as f32, size.1 as f32)
            };
            let jitter = [
                scene.pixel_jitter[0] * 2.0 / vw,
                -scene.pixel_jitter[1] * 2.0 / vh,
            ];
            range
                .map(|vid| {
                    let index: u32 = state
                        .element(draw.meta.geometry_ib_index, draw.meta.first_index + vid)
                        .ok_or_else(|| missing("index buffer", draw.meta.geometry_ib_index))?;
                    let vertex_index = (index as i64 + draw.meta.base_vertex as i64).max(0) as u32;
                    let vertex: Vertex = state
                        .element(draw.meta.geometry_vb_index, vertex_index)
                        .ok_or_else(|| missing("vertex buffer", draw.meta.geometry_vb_index))?;
                    let p = vertex.position;
                    let world = draw.world * Vec4::new(p[0], p[1], p[2], 1.0);
                    let mut clip = view_projection * world;
                    clip.x += jitter[0] * clip.w;
                    clip.y += jitter[1] * clip.w;
                    let n = vertex.normal;
                    let normal = draw.normal * Vec4::new(n[0], n[1], n[2], 0.0);
                    let mut out = ClipVertex::new(clip);
                    out.varyings[..3].copy_from_slice(&[world.x, world.y, world.z]);
                    out.varyings[3..6].copy_from_slice(&[normal.x, normal.y, normal.z]);
                    out.varyings[6..8].copy_from_slice(&vertex.uv);
                    Ok(out)
                })
                .collect()
        }
        GraphicsProgram::Sky => {
            let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
            Ok(fullscreen_triangle(if scene.reverse_z != 0 { 0.0 } else { 1.0 }))
        }
        GraphicsProgram::Composite => Ok(fullscreen_triangle(0.0)),
        GraphicsProgram::ImGui => {
            let pass: ImGuiPassConstants = pass_constants(state, ctx, desc.program)?;
            let [w, h] = pass.display_size;
            if w <= 0.0 || h <= 0.0 {
                return Ok(Vec::new());
            }
            range
                .map(|vid| {
                    let vertex: ImGuiVertex = state
                        .element(pass.vertex_buffer_slot, vid)
                        .ok_or_else(|| missing("ImGui vertices", pass.vertex_buffer_slot))?;
                    let [x, y] = vertex.position;
                    let mut out =
                        ClipVertex::new(Vec4::new(x / w * 2.0 - 1.0, 1.0 - y / h * 2.0, 0.0, 1.0));
                    out.varyings[..2].copy_from_slice(&vertex.uv);
                    out.varyings[2..6].copy_from_slice(&vertex.color);
                    Ok(out)
                })
                .collect()
        }
        GraphicsProgram::DebugLines => {
            let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
            let pass: DebugPassConstants = pass_constants(state, ctx, desc.program)?;
            let view_projection = mat(&scene.view_projection);
            range
                .map(|vid| {
                    let line: DebugLine = state
                        .element(pass.line_buffer_slot, vid / 2)
                        .ok_or_else(|| missing("debug lines", pass.line_buffer_slot))?;
                    let p = if vid % 2 == 0 { line.start } else { line.end };
                    let mut out =
                        ClipVertex::new(view_projection * Vec4::new(p[0], p[1], p[2], 1.0));
                    out.varyings[..4].copy_from_slice(&line.color);
                    Ok(out)
                })
                .collect()
        }
    }
}

type BoxedShade<'s> = Box<dyn FnMut(&Fragment) -> Option<[f32; 4]> + 's>;

fn fragment_program<'s>(
    state: &'s DeviceState,
    ctx: &'s ExecContext,
    desc: &GraphicsPipelineDesc,
) -> BoxedShade<'s> {
    let alpha_test = desc.permutations.contains(ShaderPermutation::AlphaTest);
    match desc.program {
        GraphicsProgram::DepthOnly => {
            let material = mesh_material(state, ctx);
            Box::new(move |fragment| {
                if alpha_test {
                    let color = surface_color(state, &material, fragment);
                    if color[3] < material.alpha_cutoff {
                        return None;
                    }
                }
                Some([0.0; 4])
            })
        }
        GraphicsProgram::ForwardMesh => {
            let material = mesh_material(state, ctx);
            let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
            let env: EnvironmentDynamicData = ctx.constants(ConstantRegister::Environment);
            let clustered = desc
                .permutations
                .contains(ShaderPermutation::ClusteredLighting)
                && env.cluster_grid_slot != INVALID_BINDLESS_SLOT;
            Box::new(move |fragment| {
                let base = surface_color(state, &material, fragment);
                if alpha_test && base[3] < material.alpha_cutoff {
                    return None;
                }
                let light = if clustered {
                    clustered_lighting(state, &scene, &env, fragment)
                } else {
                    all_lights(state, &scene, fragment)
                } + sun_lighting(&env, fragment);
                let lit = AMBIENT + material.emissive_strength;
                Some([
                    base[0] * (lit + light.x),
                    base[1] * (lit + light.y),
                    base[2] * (lit + light.z),
                    base[3],
                ])
            })
        }
        GraphicsProgram::Sky => {
            let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
            let env: EnvironmentDynamicData = ctx.constants(ConstantRegister::Environment);
            let pass: SkyPassConstants =
                pass_constants(state, ctx, desc.program).unwrap_or(SkyPassConstants {
                    solid_color: [0.0, 0.0, 0.0, 1.0],
                    mode: SkyMode::Black as u32,
                    cubemap_slot: INVALID_BINDLESS_SLOT,
                    sun_size: 0.0,
                    _pad: 0,
                });
            let inverse = mat(&scene.inverse_view_projection);
            let camera = Vec3::from(scene.camera_position);
            Box::new(move |fragment| {
                let p = inverse * Vec4::new(fragment.varyings[0], fragment.varyings[1], 0.5, 1.0);
                let world = p.xyz() / p.w;
                let dir = (world - camera).try_normalize(1e-8).unwrap_or(Vec3::z());
                Some(sky_color(state, &pass, &env, dir))
            })
        }
        GraphicsProgram::DebugLines => {
            Box::new(|fragment| Some(std::array::from_fn(|i| fragment.varyings[i])))
        }
        GraphicsProgram::ImGui => {
            let font = pass_constants::<ImGuiPassConstants>(state, ctx, desc.program)
                .map(|p| p.font_texture_slot)
                .unwrap_or(INVALID_BINDLESS_SLOT);
            Box::new(move |fragment| {
                let v = &fragment.varyings;
                let tex = state
                    .sample_2d(font, v[0], v[1], &SamplerDescriptor::linear_wrap())
                    .unwrap_or([1.0; 4]);
                Some([v[2] * tex[0], v[3] * tex[1], v[4] * tex[2], v[5] * tex[3]])
            })
        }
        GraphicsProgram::Composite => {
            let pass = pass_constants::<CompositeConstants>(state, ctx, desc.program).ok();
            Box::new(move |fragment| {
                let pass = pass.as_ref()?;
                let u = (fragment.varyings[0] + 1.0) * 0.5;
                let v = (1.0 - fragment.varyings[1]) * 0.5;
                composite(state, pass, u, v)
            })
        }
    }
}

fn mesh_material(state: &DeviceState, ctx: &ExecContext) -> MaterialConstants {
    let scene: SceneConstants = ctx.constants(ConstantRegister::Scene);
    mesh_draw(state, ctx)
        .ok()
        .and_then(|(_, draw)| state.element(scene.materials_slot, draw.meta.material_index))
        .unwrap_or_default()
}

fn surface_color(state: &DeviceState, material: &MaterialConstants, fragment: &Fragment) -> [f32; 4] {
    let base = material.base_color;
    let (u, v) = (fragment.varyings[6], fragment.varyings[7]);
    match state.sample_2d(
        material.base_color_texture,
        u,
        v,
        &SamplerDescriptor::linear_wrap(),
    ) {
        Some(tex) => std::array::from_fn(|i| base[i] * tex[i]),
        None => base,
    }
}

fn world_position(fragment: &Fragment) -> Vec3 {
    Vec3::new(fragment.varyings[0], fragment.varyings[1], fragment.varyings[2])
}

fn world_normal(fragment: &Fragment) -> Vec3 {
    Vec3::new(fragment.varyings[3], fragment.varyings[4], fragment.varyings[5])
        .try_normalize(1e-8)
        .unwrap_or(Vec3::z())
}

/// Lambert with smooth range falloff.
pub(crate) fn point_light_contribution(light: &GpuPositionalLight, position: &Vec3, normal: &Vec3) -> Vec3 {
    let to_light = Vec3::from(light.position) - position;
    let distance = to_light.norm();
    if light.range <= 0.0 || distance >= light.range {
        return Vec3::zeros();
    }
    let lambert = if distance > 1e-6 {
        normal.dot(&(to_light / distance)).max(0.0)
    } else {
        1.0
    };
    let falloff = (1.0 - (distance / light.range).powi(2)).clamp(0.0, 1.0).powi(2);
    Vec3::from(light.color) * (lambert * falloff * light.intensity)
}

fn all_lights(state: &DeviceState, scene: &SceneConstants, fragment: &Fragment) -> Vec3 {
    let position = world_position(fragment);
    let normal = world_normal(fragment);
    (0..scene.light_count)
        .filter_map(|i| state.element::<GpuPositionalLight>(scene.lights_slot, i))
        .map(|light| point_light_contribution(&light, &position, &normal))
        .sum()
}

/// Cluster containing a pixel at view-space distance `view_depth`.
pub(crate) fn cluster_index(env: &EnvironmentDynamicData, x: u32, y: u32, view_depth: f32) -> Option<u32> {
    if env.tile_size_px == 0 || env.cluster_dim_x == 0 || env.cluster_dim_y == 0 {
        return None;
    }
    let cx = (x / env.tile_size_px).min(env.cluster_dim_x - 1);
    let cy = (y / env.tile_size_px).min(env.cluster_dim_y - 1);
    let cz = if env.cluster_dim_z <= 1 {
        0
    } else {
        let slice = (view_depth.max(1e-6).log2() * env.z_scale + env.z_bias).floor();
        slice.clamp(0.0, (env.cluster_dim_z - 1) as f32) as u32
    };
    Some(cx + cy * env.cluster_dim_x + cz * env.cluster_dim_x * env.cluster_dim_y)
}

fn clustered_lighting(
    state: &DeviceState,
    scene: &SceneConstants,
    env: &EnvironmentDynamicData,
    fragment: &Fragment,
) -> Vec3 {
    let position = world_position(fragment);
    let normal = world_normal(fragment);
    let view = mat(&scene.view) * Vec4::new(position.x, position.y, position.z, 1.0);
    let Some(cluster) = cluster_index(env, fragment.x, fragment.y, -view.z) else {
        return Vec3::zeros();
    };
    let Some(record) = state.element::<ClusterRecord>(env.cluster_grid_slot, cluster) else {
        return Vec3::zeros();
    };
    (0..record.count)
        .filter_map(|i| state.element::<u32>(env.cluster_index_list_slot, record.offset + i))
        .filter_map(|light| state.element::<GpuPositionalLight>(scene.lights_slot, light))
        .map(|light| point_light_contribution(&light, &position, &normal))
        .sum()
}

fn sun_lighting(env: &EnvironmentDynamicData, fragment: &Fragment) -> Vec3 {
    if env.sun_valid == 0 {
        return Vec3::zeros();
    }
    let to_sun = Vec3::from(env.sun_direction)
        .try_normalize(1e-8)
        .unwrap_or(Vec3::y());
    let lambert = world_normal(fragment).dot(&to_sun).max(0.0);
    Vec3::from(env.sun_color) * (lambert * env.sun_intensity)
}

fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> Vec3 {
    Vec3::from(a) * (1.0 - t) + Vec3::from(b) * t
}

fn sky_color(
    state: &DeviceState,
    pass: &SkyPassConstants,
    env: &EnvironmentDynamicData,
    dir: Vec3,
) -> [f32; 4] {
    match SkyMode::from_raw(pass.mode).unwrap_or(SkyMode::Black) {
        SkyMode::Atmosphere => {
            let mut color = if dir.y >= 0.0 {
                mix3(SKY_HORIZON, SKY_ZENITH, dir.y.sqrt())
            } else {
                mix3(SKY_HORIZON, SKY_GROUND, (-dir.y).sqrt())
            };
            if env.sun_valid != 0 {
                let to_sun = Vec3::from(env.sun_direction)
                    .try_normalize(1e-8)
                    .unwrap_or(Vec3::y());
                if dir.dot(&to_sun) >= pass.sun_size.cos() {
                    color += Vec3::from(env.sun_color) * env.sun_intensity;
                }
            }
            [color.x, color.y, color.z, 1.0]
        }
        SkyMode::Cubemap => state
            .sample_cube(pass.cubemap_slot, [dir.x, dir.y, dir.z], &SamplerDescriptor::linear_wrap())
            .unwrap_or(pass.solid_color),
        SkyMode::Solid => pass.solid_color,
        SkyMode::Black => [0.0, 0.0, 0.0, 1.0],
    }
}

fn composite(state: &DeviceState, pass: &CompositeConstants, u: f32, v: f32) -> Option<[f32; 4]> {
    let sampler = SamplerDescriptor::linear_wrap();
    let source = || state.sample_2d(pass.source_slot, u, v, &sampler);
    match CompositeOp::from_raw(pass.op)? {
        CompositeOp::Copy => source(),
        CompositeOp::Blend => {
            let t = pass.tint;
            Some([t[0], t[1], t[2], t[3] * pass.alpha])
        }
        CompositeOp::TextureBlend => {
            let s = source()?;
            Some([
                s[0] * pass.tint[0],
                s[1] * pass.tint[1],
                s[2] * pass.tint[2],
                s[3] * pass.tint[3] * pass.alpha,
            ])
        }
        CompositeOp::Tonemap => {
            let s = source()?;
            let map = |c: f32| {
                let c = c * pass.exposure;
                c / (1.0 + c)
            };
            Some([map(s[0]), map(s[1]), map(s[2]), 1.0])
        }
        CompositeOp::Taa => {
            let current = source()?;
            let Some(history) = state.sample_2d(pass.history_slot, u, v, &sampler) else {
                return Some(current);
            };
            let w = pass.history_weight.clamp(0.0, 1.0);
            Some(std::array::from_fn(|i| current[i] * (1.0 - w) + history[i] * w))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_at(varyings: [f32; 6]) -> Fragment {
        let mut all = [0.0; raster::VARYINGS];
        all[..6].copy_from_slice(&varyings);
        Fragment {
            x: 0,
            y: 0,
            depth: 0.5,
            varyings: all,
        }
    }

    #[test]
    fn point_light_falls_off_to_zero_at_range() {
        let light = GpuPositionalLight {
            position: [0.0, 0.0, 3.0],
            range: 10.0,
            color: [1.0; 3],
            intensity: 1.0,
        };
        let normal = Vec3::z();
        let near = point_light_contribution(&light, &Vec3::zeros(), &normal);
        assert!((near.x - 0.8281).abs() < 1e-3);
        let far = point_light_contribution(&light, &Vec3::new(0.0, 0.0, -7.5), &normal);
        assert_eq!(far, Vec3::zeros());
    }

    #[test]
    fn light_behind_surface_contributes_nothing() {
        let light = GpuPositionalLight {
            position: [0.0, 0.0, -2.0],
            range: 10.0,
            color: [1.0; 3],
            intensity: 1.0,
        };
        let c = point_light_contribution(&light, &Vec3::zeros(), &Vec3::z());
        assert_eq!(c, Vec3::zeros());
    }

    #[test]
    fn cluster_index_uses_log_slices() {
        let near: f32 = 1.0;
        let far: f32 = 256.0;
        let dim_z = 8;
        let ratio = (far / near).log2();
        let env = EnvironmentDynamicData {
            cluster_dim_x: 4,
            cluster_dim_y: 2,
            cluster_dim_z: dim_z,
            tile_size_px: 16,
            z_scale: dim_z as f32 / ratio,
            z_bias: -(dim_z as f32) * near.log2() / ratio,
            ..Default::default()
        };
        assert_eq!(cluster_index(&env, 0, 0, 1.5), Some(0));
        // Depth 4 is slice 2 of 8 between 1 and 256.
        assert_eq!(cluster_index(&env, 17, 0, 4.5), Some(1 + 2 * 8));
        assert_eq!(cluster_index(&env, 1000, 1000, 1e9), Some(3 + 4 + 7 * 8));
    }

    #[test]
    fn sun_lights_surfaces_facing_it() {
        let env = EnvironmentDynamicData {
            sun_valid: 1,
            sun_direction: [0.0, 1.0, 0.0],
            sun_intensity: 2.0,
            ..Default::default()
        };
        let up = fragment_at([0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(sun_lighting(&env, &up), Vec3::new(2.0, 2.0, 2.0));
        let down = fragment_at([0.0, 0.0, 0.0, 0.0, -1.0, 0.0]);
        assert_eq!(sun_lighting(&env, &down), Vec3::zeros());
    }
}

//! Built-in compute programs for the dummy backend.

use kiln_core::math::{Aabb, BoundingSphere, Mat4, Vec3, Vec4, mat4_from_cols_array_2d};

use super::{DeviceState, ExecContext};
use crate::error::GraphicsError;
use crate::gpu_types::{
    ClusterRecord, ConstantRegister, DebugPassConstants, EnvironmentDynamicData,
    GpuPositionalLight, LightCullingConstants, RootConstantSlot, SceneConstants,
};
use crate::pipeline_state::PipelineDesc;
use crate::shader::ComputeProgram;
use crate::types::DrawIndirectArgs;

const FAR_EPSILON: f32 = 1e-6;

pub(super) fn dispatch(
    state: &mut DeviceState,
    ctx: &ExecContext,
    groups: [u32; 3],
) -> Result<(), GraphicsError> {
    let handle = ctx
        .pipeline
        .ok_or_else(|| GraphicsError::InvalidState("dispatch without a pipeline".into()))?;
    let program = match state.pipeline(handle)? {
        PipelineDesc::Compute(desc) => desc.program,
        PipelineDesc::Graphics(desc) => {
            return Err(GraphicsError::InvalidState(format!(
                "dispatch with graphics pipeline '{}'",
                desc.label
            )));
        }
    };
    if groups.contains(&0) {
        return Ok(());
    }
    let pass_slot = ctx.root_constant(RootConstantSlot::PassConstants);
    match program {
        ComputeProgram::DebugClear => {
            let pass: DebugPassConstants = state.element(pass_slot, 0).ok_or_else(|| {
                GraphicsError::InvalidParameter("debug clear: missing pass constants".into())
            })?;
            if !state.write_element(pass.counter_slot, 0, &DrawIndirectArgs::new(0, 1)) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "debug clear: counter slot {} is not writable",
                    pass.counter_slot
                )));
            }
            Ok(())
        }
        ComputeProgram::LightCulling => {
            let pass: LightCullingConstants = state.element(pass_slot, 0).ok_or_else(|| {
                GraphicsError::InvalidParameter("light culling: missing pass constants".into())
            })?;
            cull_lights(
                state,
                &ctx.constants(ConstantRegister::Scene),
                &ctx.constants(ConstantRegister::Environment),
                &pass,
                groups,
            )
        }
    }
}

fn mat(cols: &[[f32; 4]; 4]) -> Mat4 {
    mat4_from_cols_array_2d(cols)
}

/// View-space point on the ray through `ndc`, scaled to unit distance along -Z.
fn unit_ray(inverse_projection: &Mat4, ndc_x: f32, ndc_y: f32) -> Vec3 {
    let p = inverse_projection * Vec4::new(ndc_x, ndc_y, 0.5, 1.0);
    let v = p.xyz() / p.w;
    if v.z.abs() < 1e-8 {
        return Vec3::new(0.0, 0.0, -1.0);
    }
    v / -v.z
}

/// Distance along -Z of a depth-buffer value at `ndc`.
fn view_distance(inverse_projection: &Mat4, ndc_x: f32, ndc_y: f32, depth: f32) -> f32 {
    let p = inverse_projection * Vec4::new(ndc_x, ndc_y, depth, 1.0);
    -(p.z / p.w)
}

fn slice_distance(near: f32, far: f32, slice: u32, slices: u32) -> f32 {
    near * (far / near).powf(slice as f32 / slices as f32)
}

fn cull_lights(
    state: &mut DeviceState,
    scene: &SceneConstants,
    env: &EnvironmentDynamicData,
    pass: &LightCullingConstants,
    groups: [u32; 3],
) -> Result<(), GraphicsError> {
    let dims = [env.cluster_dim_x, env.cluster_dim_y, env.cluster_dim_z];
    if dims != groups {
        return Err(GraphicsError::InvalidParameter(format!(
            "light culling: dispatch {groups:?} does not match cluster grid {dims:?}"
        )));
    }
    let (width, height) = match state.texture_size(pass.depth_texture_slot) {
        Some(size) => size,
        None => (scene.viewport[2] as u32, scene.viewport[3] as u32),
    };
    if width == 0 || height == 0 || env.tile_size_px == 0 {
        return Err(GraphicsError::InvalidParameter(
            "light culling: empty screen or tile size".into(),
        ));
    }

    let view = mat(&scene.view);
    let inverse_projection = mat(&scene.inverse_projection);
    let (near, far) = (scene.z_near, scene.z_far);
    let far_clear = if scene.reverse_z != 0 { 0.0 } else { 1.0 };

    let lights: Vec<BoundingSphere> = (0..scene.light_count)
        .filter_map(|i| state.element::<GpuPositionalLight>(scene.lights_slot, i))
        .map(|light| {
            let p = light.position;
            let center = view * Vec4::new(p[0], p[1], p[2], 1.0);
            BoundingSphere::new(center.xyz(), light.range)
        })
        .collect();

    let tile = env.tile_size_px;
    let mut next_index = 0u32;
    let mut overflowed = 0u32;
    for cz in 0..dims[2] {
        for cy in 0..dims[1] {
            for cx in 0..dims[0] {
                let cluster = cx + cy * dims[0] + cz * dims[0] * dims[1];
                let x0 = (cx * tile).min(width);
                let x1 = ((cx + 1) * tile).min(width);
                let y0 = (cy * tile).min(height);
                let y1 = ((cy + 1) * tile).min(height);
                let to_ndc_x = |x: u32| x as f32 / width as f32 * 2.0 - 1.0;
                let to_ndc_y = |y: u32| 1.0 - y as f32 / height as f32 * 2.0;

                let range = if dims[2] > 1 {
                    Some((
                        slice_distance(near, far, cz, dims[2]),
                        slice_distance(near, far, cz + 1, dims[2]),
                    ))
                } else if state.texture_size(pass.depth_texture_slot).is_some() {
                    let mut bounds: Option<(f32, f32)> = None;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            let Some(texel) = state.load_texel(pass.depth_texture_slot, x, y)
                            else {
                                continue;
                            };
                            if (texel[0] - far_clear).abs() <= FAR_EPSILON {
                                continue;
                            }
                            let d = view_distance(
                                &inverse_projection,
                                to_ndc_x(x) + 1.0 / width as f32,
                                to_ndc_y(y) - 1.0 / height as f32,
                                texel[0],
                            );
                            bounds = Some(match bounds {
                                Some((lo, hi)) => (lo.min(d), hi.max(d)),
                                None => (d, d),
                            });
                        }
                    }
                    bounds
                } else {
                    Some((near, far))
                };

                let mut record = ClusterRecord {
                    offset: next_index,
                    count: 0,
                };
                if let Some((d_near, d_far)) = range {
                    let mut corners = Vec::with_capacity(8);
                    for (nx, ny) in [
                        (to_ndc_x(x0), to_ndc_y(y0)),
                        (to_ndc_x(x1), to_ndc_y(y0)),
                        (to_ndc_x(x0), to_ndc_y(y1)),
                        (to_ndc_x(x1), to_ndc_y(y1)),
                    ] {
                        let ray = unit_ray(&inverse_projection, nx, ny);
                        corners.push(ray * d_near);
                        corners.push(ray * d_far);
                    }
                    let aabb = Aabb::from_points(corners.iter());
                    for (light_index, sphere) in lights.iter().enumerate() {
                        if !sphere.intersects_aabb(&aabb) {
                            continue;
                        }
                        if record.count >= pass.max_lights_per_cluster
                            || next_index >= pass.index_capacity
                        {
                            overflowed += 1;
                            break;
                        }
                        if !state.write_element(
                            env.cluster_index_list_slot,
                            next_index,
                            &(light_index as u32),
                        ) {
                            return Err(GraphicsError::InvalidParameter(format!(
                                "light culling: index list slot {} is not writable",
                                env.cluster_index_list_slot
                            )));
                        }
                        next_index += 1;
                        record.count += 1;
                    }
                }
                if !state.write_element(env.cluster_grid_slot, cluster, &record) {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "light culling: cluster grid slot {} is not writable",
                        env.cluster_grid_slot
                    )));
                }
            }
        }
    }
    if overflowed > 0 {
        log::warn!("light culling: {overflowed} cluster(s) hit the per-cluster or index capacity");
    }
    log::trace!(
        "light culling: {} light(s) into {} index entries",
        lights.len(),
        next_index
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::math::perspective_rh;

    #[test]
    fn slices_are_logarithmic() {
        assert!((slice_distance(1.0, 100.0, 0, 2) - 1.0).abs() < 1e-5);
        assert!((slice_distance(1.0, 100.0, 1, 2) - 10.0).abs() < 1e-4);
        assert!((slice_distance(1.0, 100.0, 2, 2) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn depth_values_unproject_to_view_distance() {
        let projection = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.5, 50.0);
        let inverse = projection.try_inverse().unwrap();
        let clip = projection * Vec4::new(0.0, 0.0, -10.0, 1.0);
        let depth = clip.z / clip.w;
        assert!((view_distance(&inverse, 0.0, 0.0, depth) - 10.0).abs() < 1e-2);
    }

    #[test]
    fn center_ray_points_down_negative_z() {
        let projection = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.5, 50.0);
        let ray = unit_ray(&projection.try_inverse().unwrap(), 0.0, 0.0);
        assert!((ray - Vec3::new(0.0, 0.0, -1.0)).norm() < 1e-4);
        // 90 degree fov: the right edge is at 45 degrees.
        let edge = unit_ray(&projection.try_inverse().unwrap(), 1.0, 0.0);
        assert!((edge.x - 1.0).abs() < 1e-4);
    }
}

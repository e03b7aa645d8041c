//! Per-frame view: matrices, viewport and cached derived data.

use kiln_core::math::{
    Mat4, Vec2, Vec3, Vec4, look_at_rh, mat4_is_finite, mat4_translation, perspective_rh,
    perspective_rh_reverse_z,
};

use super::Frustum;
use crate::error::GraphicsError;
use crate::pipeline_state::CompareOp;
use crate::types::{ScissorRect, Viewport};

/// Inputs to [`View::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct ViewParams {
    pub view: Mat4,
    pub projection: Mat4,
    pub viewport: Viewport,
    /// Defaults to the full viewport.
    pub scissor: Option<ScissorRect>,
    /// Sub-pixel jitter in pixels (TAA).
    pub pixel_jitter: Vec2,
    pub reverse_z: bool,
    /// Defaults to the translation of the inverse view matrix.
    pub camera_position: Option<Vec3>,
}

impl ViewParams {
    pub fn new(view: Mat4, projection: Mat4, viewport: Viewport) -> Self {
        Self {
            view,
            projection,
            viewport,
            scissor: None,
            pixel_jitter: Vec2::zeros(),
            reverse_z: false,
            camera_position: None,
        }
    }

    pub fn with_reverse_z(mut self, reverse_z: bool) -> Self {
        self.reverse_z = reverse_z;
        self
    }

    pub fn with_jitter(mut self, jitter: Vec2) -> Self {
        self.pixel_jitter = jitter;
        self
    }

    pub fn with_camera_position(mut self, position: Vec3) -> Self {
        self.camera_position = Some(position);
        self
    }
}

/// Immutable view description for one frame.
///
/// All derived fields (inverses, view-projection, frustum, camera position)
/// are computed once in [`View::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    view: Mat4,
    projection: Mat4,
    view_projection: Mat4,
    inv_view: Mat4,
    inv_projection: Mat4,
    inv_view_projection: Mat4,
    viewport: Viewport,
    scissor: ScissorRect,
    pixel_jitter: Vec2,
    reverse_z: bool,
    camera_position: Vec3,
    frustum: Frustum,
}

impl View {
    pub fn new(params: ViewParams) -> Result<Self, GraphicsError> {
        if !mat4_is_finite(&params.view) || !mat4_is_finite(&params.projection) {
            return Err(GraphicsError::NonFiniteMatrix);
        }
        let inv_view = params
            .view
            .try_inverse()
            .ok_or_else(|| GraphicsError::InvalidParameter("view matrix is singular".into()))?;
        let inv_projection = params.projection.try_inverse().ok_or_else(|| {
            GraphicsError::InvalidParameter("projection matrix is singular".into())
        })?;
        let view_projection = params.projection * params.view;
        let inv_view_projection = inv_view * inv_projection;
        let frustum = Frustum::from_view_projection(&view_projection, params.reverse_z)?;

        Ok(Self {
            camera_position: params
                .camera_position
                .unwrap_or_else(|| mat4_translation(&inv_view)),
            scissor: params.scissor.unwrap_or_else(|| params.viewport.scissor()),
            view: params.view,
            projection: params.projection,
            view_projection,
            inv_view,
            inv_projection,
            inv_view_projection,
            viewport: params.viewport,
            pixel_jitter: params.pixel_jitter,
            reverse_z: params.reverse_z,
            frustum,
        })
    }

    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    pub fn view_projection(&self) -> &Mat4 {
        &self.view_projection
    }

    pub fn inverse_view(&self) -> &Mat4 {
        &self.inv_view
    }

    pub fn inverse_projection(&self) -> &Mat4 {
        &self.inv_projection
    }

    pub fn inverse_view_projection(&self) -> &Mat4 {
        &self.inv_view_projection
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn scissor(&self) -> &ScissorRect {
        &self.scissor
    }

    pub fn pixel_jitter(&self) -> Vec2 {
        self.pixel_jitter
    }

    pub fn reverse_z(&self) -> bool {
        self.reverse_z
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_position
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Depth value that clears the depth buffer to "infinitely far".
    pub fn clear_depth(&self) -> f32 {
        if self.reverse_z { 0.0 } else { 1.0 }
    }

    /// NDC depth of the far plane.
    pub fn far_depth(&self) -> f32 {
        self.clear_depth()
    }

    /// Depth comparison that keeps the nearer fragment.
    pub fn depth_compare(&self) -> CompareOp {
        if self.reverse_z {
            CompareOp::GreaterEqual
        } else {
            CompareOp::LessEqual
        }
    }

    /// Positive view-space distance of an NDC depth on the view axis.
    pub fn linear_depth(&self, ndc_depth: f32) -> f32 {
        let p = self.inv_projection * Vec4::new(0.0, 0.0, ndc_depth, 1.0);
        if p.w.abs() <= f32::EPSILON {
            return f32::MAX;
        }
        -p.z / p.w
    }

    pub fn near_plane(&self) -> f32 {
        self.linear_depth(if self.reverse_z { 1.0 } else { 0.0 })
    }

    pub fn far_plane(&self) -> f32 {
        self.linear_depth(self.far_depth())
    }

    /// Distance from the camera to a world-space point.
    pub fn distance_to(&self, p: &Vec3) -> f32 {
        (p - self.camera_position).norm()
    }

    /// Projected height in pixels of a sphere of `radius` at `distance`.
    pub fn projected_size_px(&self, radius: f32, distance: f32) -> f32 {
        let cot_half_fov = self.projection[(1, 1)];
        if distance <= f32::EPSILON {
            return f32::MAX;
        }
        radius * cot_half_fov / distance * self.viewport.height
    }
}

/// Produces a [`View`] for a viewport. Implemented by camera types.
pub trait CameraResolver {
    fn resolve(&self, viewport: Viewport) -> Result<View, GraphicsError>;
}

/// Look-at perspective camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub reverse_z: bool,
    pub pixel_jitter: Vec2,
}

impl PerspectiveCamera {
    pub fn look_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye,
            target,
            up: Vec3::y(),
            fov_y: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 100.0,
            reverse_z: false,
            pixel_jitter: Vec2::zeros(),
        }
    }

    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn with_fov(mut self, fov_y: f32) -> Self {
        self.fov_y = fov_y;
        self
    }

    pub fn with_reverse_z(mut self, reverse_z: bool) -> Self {
        self.reverse_z = reverse_z;
        self
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        if self.reverse_z {
            perspective_rh_reverse_z(self.fov_y, aspect, self.near, self.far)
        } else {
            perspective_rh(self.fov_y, aspect, self.near, self.far)
        }
    }
}

impl CameraResolver for PerspectiveCamera {
    fn resolve(&self, viewport: Viewport) -> Result<View, GraphicsError> {
        let view = look_at_rh(&self.eye, &self.target, &self.up);
        View::new(
            ViewParams::new(view, self.projection(viewport.aspect_ratio()), viewport)
                .with_reverse_z(self.reverse_z)
                .with_jitter(self.pixel_jitter)
                .with_camera_position(self.eye),
        )
    }
}

impl CameraResolver for ViewParams {
    fn resolve(&self, viewport: Viewport) -> Result<View, GraphicsError> {
        let mut params = self.clone();
        params.viewport = viewport;
        View::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(reverse_z: bool) -> View {
        PerspectiveCamera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros())
            .with_clip_planes(0.5, 50.0)
            .with_reverse_z(reverse_z)
            .resolve(Viewport::from_dimensions(64, 64))
            .unwrap()
    }

    #[test]
    fn camera_position_defaults_to_inverse_view_translation() {
        let view = look_at_rh(&Vec3::new(1.0, 2.0, 3.0), &Vec3::zeros(), &Vec3::y());
        let v = View::new(ViewParams::new(
            view,
            perspective_rh(1.0, 1.0, 0.1, 10.0),
            Viewport::from_dimensions(8, 8),
        ))
        .unwrap();
        assert!((v.camera_position() - Vec3::new(1.0, 2.0, 3.0)).norm() < 1e-4);
    }

    #[test]
    fn derived_matrices_are_consistent() {
        let v = camera(false);
        let id = v.view_projection() * v.inverse_view_projection();
        assert!((id - Mat4::identity()).norm() < 1e-3);
    }

    #[test]
    fn depth_convention_follows_reverse_z() {
        let fwd = camera(false);
        let rev = camera(true);
        assert_eq!(fwd.clear_depth(), 1.0);
        assert_eq!(fwd.depth_compare(), CompareOp::LessEqual);
        assert_eq!(rev.clear_depth(), 0.0);
        assert_eq!(rev.depth_compare(), CompareOp::GreaterEqual);
    }

    #[test]
    fn clip_planes_recovered_from_projection() {
        for v in [camera(false), camera(true)] {
            assert!((v.near_plane() - 0.5).abs() < 1e-3);
            assert!((v.far_plane() - 50.0).abs() < 0.1);
        }
    }

    #[test]
    fn non_finite_view_is_rejected() {
        let mut view = Mat4::identity();
        view[(1, 3)] = f32::INFINITY;
        let err = View::new(ViewParams::new(
            view,
            perspective_rh(1.0, 1.0, 0.1, 10.0),
            Viewport::from_dimensions(8, 8),
        ))
        .unwrap_err();
        assert_eq!(err, GraphicsError::NonFiniteMatrix);
    }
}

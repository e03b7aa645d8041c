//! View frustum extraction and culling tests.

use kiln_core::math::{Aabb, BoundingSphere, Mat4, Vec3, Vec4, mat4_is_finite};

use crate::error::GraphicsError;

/// Index of each plane in [`Frustum::planes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumPlane {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

/// Six normalized planes `(n, d)` with `dot(n, p) + d >= 0` inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract planes from the rows of a view-projection matrix (Gribb/Hartmann).
    ///
    /// Clip space depth is `[0, w]`. With `reverse_z` the near plane maps to
    /// `z = w` and the far plane to `z = 0`, so the two depth planes swap
    /// roles; the set of points inside is identical for the same matrices.
    pub fn from_view_projection(view_proj: &Mat4, reverse_z: bool) -> Result<Self, GraphicsError> {
        if !mat4_is_finite(view_proj) {
            return Err(GraphicsError::NonFiniteMatrix);
        }
        let row = |i: usize| {
            Vec4::new(
                view_proj[(i, 0)],
                view_proj[(i, 1)],
                view_proj[(i, 2)],
                view_proj[(i, 3)],
            )
        };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let (near, far) = if reverse_z {
            (r3 - r2, r2)
        } else {
            (r2, r3 - r2)
        };

        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, near, far];
        for plane in &mut planes {
            let len = Vec3::new(plane.x, plane.y, plane.z).norm();
            if len > f32::EPSILON {
                *plane /= len;
            }
        }
        Ok(Self { planes })
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    pub fn plane(&self, which: FrustumPlane) -> Vec4 {
        self.planes[which as usize]
    }

    /// Signed distance from `p` to a plane; positive inside.
    pub fn signed_distance(&self, which: FrustumPlane, p: &Vec3) -> f32 {
        let pl = self.planes[which as usize];
        pl.x * p.x + pl.y * p.y + pl.z * p.z + pl.w
    }

    /// Conservative box test using the positive vertex of each plane.
    pub fn intersects_aabb(&self, min: &Vec3, max: &Vec3) -> bool {
        self.planes.iter().all(|pl| {
            let p = Vec3::new(
                if pl.x >= 0.0 { max.x } else { min.x },
                if pl.y >= 0.0 { max.y } else { min.y },
                if pl.z >= 0.0 { max.z } else { min.z },
            );
            pl.x * p.x + pl.y * p.y + pl.z * p.z + pl.w >= 0.0
        })
    }

    pub fn intersects_bounds(&self, aabb: &Aabb) -> bool {
        self.intersects_aabb(&aabb.min, &aabb.max)
    }

    /// True when the sphere's signed distance is at least `-radius` for every plane.
    pub fn intersects_sphere(&self, center: &Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|pl| pl.x * center.x + pl.y * center.y + pl.z * center.z + pl.w >= -radius)
    }

    pub fn intersects_bounding_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.intersects_sphere(&sphere.center, sphere.radius)
    }

    pub fn contains_point(&self, p: &Vec3) -> bool {
        self.intersects_sphere(p, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::math::{look_at_rh, perspective_rh, perspective_rh_reverse_z};
    use rstest::rstest;
    use std::f32::consts::FRAC_PI_3;

    fn frustum(far: f32, reverse_z: bool) -> Frustum {
        let view = look_at_rh(&Vec3::new(0.0, 0.0, 5.0), &Vec3::zeros(), &Vec3::y());
        let proj = if reverse_z {
            perspective_rh_reverse_z(FRAC_PI_3, 1.0, 0.1, far)
        } else {
            perspective_rh(FRAC_PI_3, 1.0, 0.1, far)
        };
        Frustum::from_view_projection(&(proj * view), reverse_z).unwrap()
    }

    fn unit_cube_at(z: f32) -> (Vec3, Vec3) {
        (Vec3::new(-0.5, -0.5, z - 0.5), Vec3::new(0.5, 0.5, z + 0.5))
    }

    #[rstest]
    #[case::forward_z(false)]
    #[case::reverse_z(true)]
    fn cube_at_origin_is_visible(#[case] reverse_z: bool) {
        let f = frustum(100.0, reverse_z);
        let (min, max) = unit_cube_at(0.0);
        assert!(f.intersects_aabb(&min, &max));
        assert!(f.intersects_sphere(&Vec3::zeros(), 0.87));
    }

    #[rstest]
    #[case::forward_z(false)]
    #[case::reverse_z(true)]
    fn cube_beyond_far_plane_is_culled(#[case] reverse_z: bool) {
        let f = frustum(50.0, reverse_z);
        let (min, max) = unit_cube_at(-60.0);
        assert!(!f.intersects_aabb(&min, &max));
        assert!(!f.intersects_sphere(&Vec3::new(0.0, 0.0, -60.0), 0.87));
    }

    #[rstest]
    #[case::forward_z(false)]
    #[case::reverse_z(true)]
    fn sphere_behind_camera_is_culled(#[case] reverse_z: bool) {
        let f = frustum(100.0, reverse_z);
        assert!(!f.intersects_sphere(&Vec3::new(0.0, 0.0, 10.0), 1.0));
    }

    #[test]
    fn reverse_z_swaps_depth_planes_only() {
        let a = frustum(100.0, false);
        let b = frustum(100.0, true);
        let p = Vec3::new(0.0, 0.0, -20.0);
        assert!(a.signed_distance(FrustumPlane::Near, &p) > 0.0);
        assert!(b.signed_distance(FrustumPlane::Near, &p) > 0.0);
        assert!(b.signed_distance(FrustumPlane::Far, &p) > 0.0);
        assert!(
            (a.signed_distance(FrustumPlane::Left, &p) - b.signed_distance(FrustumPlane::Left, &p))
                .abs()
                < 1e-4
        );
    }

    #[test]
    fn sphere_touching_side_plane_is_kept() {
        let f = frustum(100.0, false);
        // Point just outside the left plane but within the radius.
        let d = f.signed_distance(FrustumPlane::Left, &Vec3::new(-4.0, 0.0, 0.0));
        assert!(d < 0.0);
        assert!(f.intersects_sphere(&Vec3::new(-4.0, 0.0, 0.0), -d + 0.01));
    }

    #[test]
    fn non_finite_matrix_is_rejected() {
        let mut m = Mat4::identity();
        m[(0, 0)] = f32::NAN;
        assert_eq!(
            Frustum::from_view_projection(&m, false),
            Err(GraphicsError::NonFiniteMatrix)
        );
    }
}

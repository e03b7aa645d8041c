//! Math type aliases, projection helpers and bounding volumes.
//!
//! All rendering math is `f32` and column-vector based (`clip = P * V * world`).
//! Projections produce a `[0, 1]` depth range; the reverse-Z variants map the
//! near plane to 1.0 and the far plane to 0.0.

pub use nalgebra;

/// 2D vector (f32).
pub type Vec2 = nalgebra::Vector2<f32>;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 3x3 matrix (f32).
pub type Mat3 = nalgebra::Matrix3<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

// ===== Projection and view helpers =====

/// Right-handed perspective projection with depth range [0, 1].
pub fn perspective_rh(yfov: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (yfov / 2.0).tan();
    let nf = 1.0 / (znear - zfar);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0,  0.0,              0.0,
        0.0,        f,    0.0,              0.0,
        0.0,        0.0,  zfar * nf,        znear * zfar * nf,
        0.0,        0.0,  -1.0,             0.0,
    );
    result
}

/// Right-handed perspective projection with reversed depth (near = 1, far = 0).
pub fn perspective_rh_reverse_z(yfov: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (yfov / 2.0).tan();
    let fn_ = 1.0 / (zfar - znear);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0,  0.0,              0.0,
        0.0,        f,    0.0,              0.0,
        0.0,        0.0,  znear * fn_,      znear * zfar * fn_,
        0.0,        0.0,  -1.0,             0.0,
    );
    result
}

/// Right-handed look-at view matrix.
pub fn look_at_rh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    let eye_point = nalgebra::Point3::from(*eye);
    let target_point = nalgebra::Point3::from(*target);
    nalgebra::Isometry3::look_at_rh(&eye_point, &target_point, up).to_homogeneous()
}

/// Translation-only 4x4 matrix.
pub fn mat4_from_translation(t: Vec3) -> Mat4 {
    Mat4::new_translation(&t)
}

/// Translation column of an affine matrix.
pub fn mat4_translation(m: &Mat4) -> Vec3 {
    Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Transform a point by an affine or projective matrix, dividing by `w`.
pub fn transform_point(m: &Mat4, p: &Vec3) -> Vec3 {
    let h = m * Vec4::new(p.x, p.y, p.z, 1.0);
    if h.w.abs() > f32::EPSILON && h.w != 1.0 {
        Vec3::new(h.x / h.w, h.y / h.w, h.z / h.w)
    } else {
        Vec3::new(h.x, h.y, h.z)
    }
}

/// Transform a direction by the upper 3x3 of `m`.
pub fn transform_vector(m: &Mat4, v: &Vec3) -> Vec3 {
    let h = m * Vec4::new(v.x, v.y, v.z, 0.0);
    Vec3::new(h.x, h.y, h.z)
}

/// Inverse-transpose of the upper 3x3, embedded in a 4x4 matrix.
///
/// Falls back to identity for singular matrices (zero scale).
pub fn normal_matrix(world: &Mat4) -> Mat4 {
    let upper: Mat3 = world.fixed_view::<3, 3>(0, 0).into_owned();
    let inv_t = upper
        .try_inverse()
        .map(|m| m.transpose())
        .unwrap_or_else(Mat3::identity);
    let mut out = Mat4::identity();
    out.fixed_view_mut::<3, 3>(0, 0).copy_from(&inv_t);
    out
}

/// Largest axis scale of an affine matrix.
pub fn max_axis_scale(m: &Mat4) -> f32 {
    let sx = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]).norm();
    let sy = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]).norm();
    let sz = Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]).norm();
    sx.max(sy).max(sz)
}

/// Convert a 4x4 matrix to a column-major `[[f32; 4]; 4]` array.
pub fn mat4_to_cols_array_2d(m: &Mat4) -> [[f32; 4]; 4] {
    let s = m.as_slice();
    [
        [s[0], s[1], s[2], s[3]],
        [s[4], s[5], s[6], s[7]],
        [s[8], s[9], s[10], s[11]],
        [s[12], s[13], s[14], s[15]],
    ]
}

/// Rebuild a matrix from a column-major `[[f32; 4]; 4]` array.
pub fn mat4_from_cols_array_2d(cols: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_column_slice(bytemuck::cast_slice::<[f32; 4], f32>(cols))
}

/// True when every element is finite.
pub fn mat4_is_finite(m: &Mat4) -> bool {
    m.iter().all(|v| v.is_finite())
}

// ===== Bounding volumes =====

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `expand` call will overwrite.
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::MAX),
            max: Vec3::repeat(f32::MIN),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand(p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand(&mut self, p: &Vec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after an affine transform (Arvo's method).
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let t = mat4_translation(m);
        let mut min = t;
        let mut max = t;
        for row in 0..3 {
            for col in 0..3 {
                let e = m[(row, col)];
                let a = e * self.min[col];
                let b = e * self.max[col];
                min[row] += a.min(b);
                max[row] += a.max(b);
            }
        }
        Aabb { min, max }
    }

    /// Sphere enclosing the box.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere {
            center: self.center(),
            radius: self.extents().norm(),
        }
    }

    /// Squared distance from a point to the box (zero inside).
    pub fn distance_squared(&self, p: &Vec3) -> f32 {
        let clamped = p.sup(&self.min).inf(&self.max);
        (p - clamped).norm_squared()
    }
}

/// Bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere after an affine transform; the radius scales by the largest axis scale.
    pub fn transformed(&self, m: &Mat4) -> BoundingSphere {
        BoundingSphere {
            center: transform_point(m, &self.center),
            radius: self.radius * max_axis_scale(m),
        }
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.distance_squared(&self.center) <= self.radius * self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_3;

    #[test]
    fn translation_matrix() {
        let t = Vec3::new(1.0, 2.0, 3.0);
        let m = mat4_from_translation(t);
        assert_eq!(mat4_translation(&m), t);
    }

    #[test]
    fn perspective_maps_near_and_far() {
        let p = perspective_rh(FRAC_PI_3, 1.0, 0.1, 100.0);
        let near = transform_point(&p, &Vec3::new(0.0, 0.0, -0.1));
        let far = transform_point(&p, &Vec3::new(0.0, 0.0, -100.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn reverse_z_perspective_maps_near_to_one() {
        let p = perspective_rh_reverse_z(FRAC_PI_3, 1.0, 0.1, 100.0);
        let near = transform_point(&p, &Vec3::new(0.0, 0.0, -0.1));
        let far = transform_point(&p, &Vec3::new(0.0, 0.0, -100.0));
        assert!((near.z - 1.0).abs() < 1e-4);
        assert!(far.z.abs() < 1e-5);
    }

    #[test]
    fn cols_array_roundtrip_preserves_layout() {
        let m = mat4_from_translation(Vec3::new(4.0, 5.0, 6.0));
        let cols = mat4_to_cols_array_2d(&m);
        assert_eq!(cols[3], [4.0, 5.0, 6.0, 1.0]);
        assert_eq!(mat4_from_cols_array_2d(&cols), m);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let world = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(&world);
        assert!((n[(0, 0)] - 0.5).abs() < 1e-6);
        assert!((n[(1, 1)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn aabb_transform_follows_translation() {
        let aabb = Aabb::new(Vec3::repeat(-1.0), Vec3::repeat(1.0));
        let moved = aabb.transformed(&mat4_from_translation(Vec3::new(0.0, 0.0, -10.0)));
        assert_eq!(moved.min, Vec3::new(-1.0, -1.0, -11.0));
        assert_eq!(moved.max, Vec3::new(1.0, 1.0, -9.0));
    }

    #[test]
    fn empty_aabb_expands_to_points() {
        let points = [Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.0, 5.0)];
        let aabb = Aabb::from_points(points.iter());
        assert!(!aabb.is_empty());
        assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn sphere_scales_with_largest_axis() {
        let s = BoundingSphere::new(Vec3::zeros(), 1.0);
        let m = Mat4::new_nonuniform_scaling(&Vec3::new(1.0, 3.0, 2.0));
        assert!((s.transformed(&m).radius - 3.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_aabb_overlap() {
        let aabb = Aabb::new(Vec3::zeros(), Vec3::repeat(1.0));
        assert!(BoundingSphere::new(Vec3::new(1.5, 0.5, 0.5), 0.6).intersects_aabb(&aabb));
        assert!(!BoundingSphere::new(Vec3::new(3.0, 0.5, 0.5), 0.6).intersects_aabb(&aabb));
    }
}

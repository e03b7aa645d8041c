//! Scene preparation settings.

use crate::view::View;

/// How the mesh stage picks a level of detail.
#[derive(Debug, Clone, PartialEq)]
pub enum LodPolicy {
    /// Always use the given LOD, clamped to the LODs the mesh has.
    Fixed(usize),
    /// LOD `i` is used once the camera distance reaches `thresholds[i - 1]`.
    /// Thresholds must be ascending.
    Distance { thresholds: Vec<f32> },
    /// LOD `i` has a geometric error of `base_error * 2^i` world units; the
    /// coarsest LOD whose projected error stays within `max_error_px` wins.
    ScreenSpaceError { base_error: f32, max_error_px: f32 },
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self::Distance {
            thresholds: Vec::new(),
        }
    }
}

impl LodPolicy {
    /// LOD index for an object `distance` away from the camera.
    pub fn select(&self, view: &View, distance: f32, lod_count: usize) -> usize {
        let last = lod_count.saturating_sub(1);
        let lod = match self {
            Self::Fixed(lod) => *lod,
            Self::Distance { thresholds } => thresholds.iter().filter(|t| distance >= **t).count(),
            Self::ScreenSpaceError {
                base_error,
                max_error_px,
            } => {
                let mut chosen = 0;
                for lod in 0..lod_count {
                    let error = base_error * (1u32 << lod.min(31)) as f32;
                    if view.projected_size_px(error, distance) <= *max_error_px {
                        chosen = lod;
                    } else {
                        break;
                    }
                }
                chosen
            }
        };
        lod.min(last)
    }
}

/// Settings for [`ScenePrep`](super::ScenePrep).
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePrepConfig {
    pub lod_policy: LodPolicy,
    /// Drop nodes whose whole-mesh bounding sphere is outside the frustum.
    pub frustum_cull: bool,
    /// Drop individual submeshes whose bounds are outside the frustum.
    pub submesh_cull: bool,
}

impl Default for ScenePrepConfig {
    fn default() -> Self {
        Self {
            lod_policy: LodPolicy::default(),
            frustum_cull: true,
            submesh_cull: true,
        }
    }
}

impl ScenePrepConfig {
    pub fn with_lod_policy(mut self, policy: LodPolicy) -> Self {
        self.lod_policy = policy;
        self
    }

    pub fn with_frustum_cull(mut self, enabled: bool) -> Self {
        self.frustum_cull = enabled;
        self
    }

    pub fn with_submesh_cull(mut self, enabled: bool) -> Self {
        self.submesh_cull = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Viewport;
    use crate::view::{CameraResolver, PerspectiveCamera};
    use kiln_core::math::Vec3;

    fn view() -> View {
        PerspectiveCamera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros())
            .resolve(Viewport::from_dimensions(100, 100))
            .unwrap()
    }

    #[test]
    fn distance_thresholds_pick_coarser_lods() {
        let policy = LodPolicy::Distance {
            thresholds: vec![10.0, 20.0],
        };
        let view = view();
        assert_eq!(policy.select(&view, 5.0, 3), 0);
        assert_eq!(policy.select(&view, 10.0, 3), 1);
        assert_eq!(policy.select(&view, 50.0, 3), 2);
        assert_eq!(policy.select(&view, 50.0, 2), 1);
    }

    #[test]
    fn screen_space_error_grows_with_distance() {
        let policy = LodPolicy::ScreenSpaceError {
            base_error: 0.01,
            max_error_px: 1.0,
        };
        let view = view();
        let near = policy.select(&view, 1.0, 4);
        let far = policy.select(&view, 1000.0, 4);
        assert!(far > near);
        assert_eq!(policy.select(&view, 1000.0, 1), 0);
    }

    #[test]
    fn fixed_lod_is_clamped() {
        assert_eq!(LodPolicy::Fixed(7).select(&view(), 1.0, 2), 1);
    }
}

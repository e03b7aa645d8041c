//! View and frustum.

mod frustum;
mod view;

pub use frustum::{Frustum, FrustumPlane};
pub use view::{CameraResolver, PerspectiveCamera, View, ViewParams};

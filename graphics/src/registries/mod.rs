//! Asset residency registries.
//!
//! Each registry turns scene-side assets into stable handles and bindless
//! indices:
//!
//! - [`GeometryRegistry`] - vertex/index buffers per `(asset, lod)`
//! - [`MaterialRegistry`] - dense material handles and material constants
//! - [`TextureBinder`] - one stable index per texture key, placeholder first
//! - [`TransformUploader`] - the frame's world/normal matrices
//!
//! Registries are mutated only during frame preparation. Their frame-start
//! hooks settle uploads that completed since the last frame.

mod geometry;
mod material;
mod texture_binder;
mod transform;

pub use geometry::{GeometryRegistry, GeometryResidency, GeometryState};
pub use material::MaterialRegistry;
pub use texture_binder::{TextureBinder, TextureState};
pub use transform::TransformUploader;

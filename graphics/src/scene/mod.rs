//! Scene-side inputs to the renderer.
//!
//! The scene graph, content import and asset loading live outside the render
//! core. This module defines the read-only shapes they hand over:
//!
//! - [`SceneSnapshot`] - nodes with propagated world matrices, visibility,
//!   optional [`Renderable`]s and lights (at most one designated sun)
//! - [`MeshAsset`] / [`MaterialAsset`] - already-loaded assets keyed by
//!   [`AssetKey`](kiln_core::keys::AssetKey)
//! - [`TextureSource`] - texture data by [`ResourceKey`](kiln_core::keys::ResourceKey)

mod asset;
mod snapshot;
mod texture_source;

pub use asset::{MaterialAsset, MaterialDomain, MeshAsset, MeshLod, Submesh};
pub use snapshot::{
    DirectionalLight, NodeId, PointLight, Renderable, SceneLight, SceneNode, SceneSnapshot,
};
pub use texture_source::{InMemoryTextureSource, TextureData, TextureSource};

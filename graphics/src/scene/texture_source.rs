//! Texture data looked up by [`ResourceKey`].

use std::collections::HashMap;
use std::sync::Arc;

use kiln_core::keys::ResourceKey;
use parking_lot::RwLock;

use crate::types::{Extent3d, TextureDimension, TextureFormat};

/// Decoded texture ready for upload. `data` holds every mip of every layer,
/// layer-major, tightly packed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub format: TextureFormat,
    pub extent: Extent3d,
    pub mip_levels: u32,
    pub dimension: TextureDimension,
    pub data: Arc<[u8]>,
}

impl TextureData {
    /// Single-mip RGBA8 texture from row-major pixels.
    pub fn rgba8(width: u32, height: u32, pixels: &[[u8; 4]]) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            format: TextureFormat::Rgba8Unorm,
            extent: Extent3d::new_2d(width, height),
            mip_levels: 1,
            dimension: TextureDimension::D2,
            data: bytemuck::cast_slice::<[u8; 4], u8>(pixels).into(),
        }
    }

    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::rgba8(width, height, &vec![color; (width * height) as usize])
    }

    /// Cubemap with every face a single color.
    pub fn solid_cube(size: u32, color: [u8; 4]) -> Self {
        let texels = (size * size * 6) as usize;
        Self {
            format: TextureFormat::Rgba8Unorm,
            extent: Extent3d::new_2d(size, size),
            mip_levels: 1,
            dimension: TextureDimension::Cube,
            data: bytemuck::cast_slice::<[u8; 4], u8>(&vec![color; texels]).into(),
        }
    }

    /// Two-color checkerboard with `cell` texel squares.
    pub fn checker(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let pixels: Vec<[u8; 4]> = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b }
            })
            .collect();
        Self::rgba8(size, size, &pixels)
    }

    pub fn layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }
}

/// Content pipeline stand-in: resolves texture keys to decoded data.
pub trait TextureSource: Send + Sync {
    /// `None` when the key is unknown to every mounted source.
    fn load(&self, key: ResourceKey) -> Option<TextureData>;
}

/// Texture source backed by a map, shareable across threads.
#[derive(Debug, Default)]
pub struct InMemoryTextureSource {
    textures: RwLock<HashMap<ResourceKey, TextureData>>,
}

impl InMemoryTextureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ResourceKey, data: TextureData) {
        self.textures.write().insert(key, data);
    }

    pub fn remove(&self, key: ResourceKey) -> Option<TextureData> {
        self.textures.write().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.textures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.read().is_empty()
    }
}

impl TextureSource for InMemoryTextureSource {
    fn load(&self, key: ResourceKey) -> Option<TextureData> {
        self.textures.read().get(&key).cloned()
    }
}

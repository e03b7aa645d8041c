//! CPU-side storage for dummy buffers and textures.

use bytemuck::Pod;

use crate::error::GraphicsError;
use crate::types::{
    AddressMode, BufferDescriptor, Extent3d, FilterMode, SamplerDescriptor, TextureDescriptor,
    TextureFormat,
};

#[derive(Debug)]
pub(super) struct BufferStore {
    pub desc: BufferDescriptor,
    pub data: Vec<u8>,
}

impl BufferStore {
    pub fn new(desc: BufferDescriptor) -> Self {
        Self {
            data: vec![0; desc.size as usize],
            desc,
        }
    }

    fn range(&self, offset: u64, size: u64) -> Result<std::ops::Range<usize>, GraphicsError> {
        let end = offset.checked_add(size).filter(|end| *end <= self.data.len() as u64);
        match end {
            Some(end) => Ok(offset as usize..end as usize),
            None => Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?}: range {offset}+{size} exceeds size {}",
                self.desc.label,
                self.data.len()
            ))),
        }
    }

    pub fn read(&self, offset: u64, size: u64) -> Result<&[u8], GraphicsError> {
        let range = self.range(offset, size)?;
        Ok(&self.data[range])
    }

    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GraphicsError> {
        let range = self.range(offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_pod<T: Pod>(&self, offset: u64) -> Option<T> {
        let size = std::mem::size_of::<T>() as u64;
        self.read(offset, size).ok().map(bytemuck::pod_read_unaligned)
    }
}

/// Texture contents, one decoded `[f32; 4]` per texel, per subresource.
#[derive(Debug)]
pub(super) struct TextureStore {
    pub desc: TextureDescriptor,
    subresources: Vec<Vec<[f32; 4]>>,
}

impl TextureStore {
    pub fn new(desc: TextureDescriptor) -> Self {
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        for _layer in 0..desc.array_layer_count {
            for mip in 0..desc.mip_level_count {
                let extent = desc.size.mip_level(mip);
                subresources.push(vec![[0.0; 4]; extent.texel_count() as usize]);
            }
        }
        Self { desc, subresources }
    }

    pub fn extent(&self, mip: u32) -> Extent3d {
        self.desc.size.mip_level(mip)
    }

    fn subresource_index(&self, mip: u32, layer: u32) -> Option<usize> {
        (mip < self.desc.mip_level_count && layer < self.desc.array_layer_count)
            .then(|| (layer * self.desc.mip_level_count + mip) as usize)
    }

    pub fn texel(&self, mip: u32, layer: u32, x: u32, y: u32) -> [f32; 4] {
        let extent = self.extent(mip);
        match self.subresource_index(mip, layer) {
            Some(sub) if x < extent.width && y < extent.height => {
                self.subresources[sub][(y * extent.width + x) as usize]
            }
            _ => [0.0; 4],
        }
    }

    pub fn set_texel(&mut self, mip: u32, layer: u32, x: u32, y: u32, value: [f32; 4]) {
        let extent = self.extent(mip);
        let format = self.desc.format;
        if let Some(sub) = self.subresource_index(mip, layer) {
            if x < extent.width && y < extent.height {
                self.subresources[sub][(y * extent.width + x) as usize] = quantize(format, value);
            }
        }
    }

    pub fn fill(&mut self, value: [f32; 4]) {
        let value = quantize(self.desc.format, value);
        for sub in &mut self.subresources {
            sub.fill(value);
        }
    }

    pub fn width(&self) -> u32 {
        self.desc.size.width
    }

    pub fn height(&self) -> u32 {
        self.desc.size.height
    }

    /// Sample layer `layer` of mip 0.
    pub fn sample(&self, layer: u32, u: f32, v: f32, sampler: &SamplerDescriptor) -> [f32; 4] {
        let extent = self.extent(0);
        let (w, h) = (extent.width as f32, extent.height as f32);
        match sampler.filter {
            FilterMode::Nearest => {
                let x = address(u * w, w, sampler.address_mode);
                let y = address(v * h, h, sampler.address_mode);
                self.texel(0, layer, x, y)
            }
            FilterMode::Linear => {
                let fx = u * w - 0.5;
                let fy = v * h - 0.5;
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let fetch = |dx: f32, dy: f32| {
                    let x = address(x0 + dx + 0.5, w, sampler.address_mode);
                    let y = address(y0 + dy + 0.5, h, sampler.address_mode);
                    self.texel(0, layer, x, y)
                };
                let (a, b, c, d) = (fetch(0.0, 0.0), fetch(1.0, 0.0), fetch(0.0, 1.0), fetch(1.0, 1.0));
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * tx;
                    let bottom = c[i] + (d[i] - c[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }

    /// Sample a cube texture by direction.
    pub fn sample_cube(&self, dir: [f32; 3], sampler: &SamplerDescriptor) -> [f32; 4] {
        let [x, y, z] = dir;
        let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
        // Face order: +X, -X, +Y, -Y, +Z, -Z.
        let (face, sc, tc, ma) = if ax >= ay && ax >= az {
            if x > 0.0 { (0, -z, -y, ax) } else { (1, z, -y, ax) }
        } else if ay >= az {
            if y > 0.0 { (2, x, z, ay) } else { (3, x, -z, ay) }
        } else if z > 0.0 {
            (4, x, -y, az)
        } else {
            (5, -x, -y, az)
        };
        if ma <= f32::EPSILON {
            return [0.0; 4];
        }
        let u = 0.5 * (sc / ma + 1.0);
        let v = 0.5 * (tc / ma + 1.0);
        self.sample(face.min(self.desc.array_layer_count.saturating_sub(1)), u, v, sampler)
    }
}

/// Map a continuous texel coordinate (texel centers at `n + 0.5`) to an index.
fn address(coord: f32, size: f32, mode: AddressMode) -> u32 {
    let max = size as i64 - 1;
    let i = coord.floor() as i64;
    let i = match mode {
        AddressMode::ClampToEdge => i.clamp(0, max),
        AddressMode::Repeat => i.rem_euclid(max + 1),
    };
    i as u32
}

/// Round a value to what the format can store.
pub(super) fn quantize(format: TextureFormat, value: [f32; 4]) -> [f32; 4] {
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => {
            value.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0)
        }
        TextureFormat::R32Float | TextureFormat::Depth32Float => [value[0], 0.0, 0.0, 1.0],
        TextureFormat::R32Uint => [value[0].max(0.0).floor(), 0.0, 0.0, 1.0],
        TextureFormat::Rgba32Float => value,
    }
}

/// Decode one texel from its packed bytes.
pub(super) fn decode_texel(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let word = |i: usize| -> [u8; 4] {
        let mut w = [0u8; 4];
        if let Some(src) = bytes.get(i * 4..i * 4 + 4) {
            w.copy_from_slice(src);
        }
        w
    };
    let unorm = |b: u8| b as f32 / 255.0;
    match format {
        TextureFormat::Rgba8Unorm => {
            let w = word(0);
            [unorm(w[0]), unorm(w[1]), unorm(w[2]), unorm(w[3])]
        }
        TextureFormat::Bgra8Unorm => {
            let w = word(0);
            [unorm(w[2]), unorm(w[1]), unorm(w[0]), unorm(w[3])]
        }
        TextureFormat::Rgba32Float => [0, 1, 2, 3].map(|i| f32::from_le_bytes(word(i))),
        TextureFormat::R32Float | TextureFormat::Depth32Float => {
            [f32::from_le_bytes(word(0)), 0.0, 0.0, 1.0]
        }
        TextureFormat::R32Uint => [u32::from_le_bytes(word(0)) as f32, 0.0, 0.0, 1.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureUsage;

    #[test]
    fn decode_formats() {
        assert_eq!(
            decode_texel(TextureFormat::Rgba8Unorm, &[255, 0, 255, 255]),
            [1.0, 0.0, 1.0, 1.0]
        );
        assert_eq!(
            decode_texel(TextureFormat::Bgra8Unorm, &[255, 0, 0, 255]),
            [0.0, 0.0, 1.0, 1.0]
        );
        assert_eq!(
            decode_texel(TextureFormat::R32Float, &0.25f32.to_le_bytes())[0],
            0.25
        );
    }

    #[test]
    fn unorm_storage_clamps() {
        let q = quantize(TextureFormat::Rgba8Unorm, [2.0, -1.0, 0.5, 1.0]);
        assert_eq!((q[0], q[1]), (1.0, 0.0));
    }

    #[test]
    fn nearest_sampling_hits_texel_centers() {
        let desc = TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba32Float, TextureUsage::SAMPLED);
        let mut tex = TextureStore::new(desc);
        tex.set_texel(0, 0, 1, 1, [1.0, 2.0, 3.0, 4.0]);
        let s = SamplerDescriptor::nearest_clamp();
        assert_eq!(tex.sample(0, 0.75, 0.75, &s), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(tex.sample(0, 0.25, 0.25, &s), [0.0; 4]);
        assert_eq!(tex.sample(0, 5.0, 5.0, &s), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn buffer_bounds_are_checked() {
        let mut buffer = BufferStore::new(BufferDescriptor::upload(16, crate::types::BufferUsage::STORAGE));
        assert!(buffer.write(12, &[0; 8]).is_err());
        buffer.write(8, &7u32.to_le_bytes()).unwrap();
        assert_eq!(buffer.read_pod::<u32>(8), Some(7));
    }
}

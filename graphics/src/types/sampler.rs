//! Sampler descriptors.

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Texture coordinate addressing outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Descriptor for a sampler written into the sampler heap segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl SamplerDescriptor {
    pub fn linear_wrap() -> Self {
        Self {
            filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        }
    }

    pub fn nearest_clamp() -> Self {
        Self {
            filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

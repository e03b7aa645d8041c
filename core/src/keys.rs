//! Opaque, hashable, totally ordered identities for assets and cooked resources.
//!
//! The renderer never sees where an asset came from. It only needs keys that
//! compare, hash and sort the same way in every process run.

use std::fmt;

/// Asset category byte carried inside an [`AssetKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum AssetType {
    #[default]
    Unknown = 0,
    Geometry = 1,
    Material = 2,
    Texture = 3,
    Scene = 4,
}

/// 128-bit GUID plus variant, version and asset type.
///
/// Ordering is lexicographic over `(guid, variant, version, asset_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssetKey {
    pub guid: [u8; 16],
    pub variant: u32,
    pub version: u8,
    pub asset_type: AssetType,
}

impl AssetKey {
    pub const fn new(guid: [u8; 16], asset_type: AssetType) -> Self {
        Self {
            guid,
            variant: 0,
            version: 0,
            asset_type,
        }
    }

    /// Derive a key from a name. The GUID is two FNV-1a passes over the name
    /// with different offsets, so the same name yields the same key in every run.
    pub fn from_name(name: &str, asset_type: AssetType) -> Self {
        let lo = fnv1a64(name.as_bytes(), FNV_OFFSET);
        let hi = fnv1a64(name.as_bytes(), FNV_OFFSET ^ 0x9e37_79b9_7f4a_7c15);
        let mut guid = [0u8; 16];
        guid[..8].copy_from_slice(&hi.to_be_bytes());
        guid[8..].copy_from_slice(&lo.to_be_bytes());
        Self::new(guid, asset_type)
    }

    pub const fn with_variant(mut self, variant: u32) -> Self {
        self.variant = variant;
        self
    }

    pub const fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn is_null(&self) -> bool {
        self.guid == [0u8; 16]
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.guid.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        write!(
            f,
            ":{}:{}:{:?}",
            self.variant, self.version, self.asset_type
        )
    }
}

/// Identifier of a cooked resource inside a mounted content source.
///
/// The upper 16 bits name the source, the lower 48 bits the resource index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(u64);

impl ResourceKey {
    const INDEX_BITS: u32 = 48;
    const INDEX_MASK: u64 = (1u64 << Self::INDEX_BITS) - 1;

    pub const fn new(source_id: u16, resource_index: u64) -> Self {
        Self(((source_id as u64) << Self::INDEX_BITS) | (resource_index & Self::INDEX_MASK))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn source_id(self) -> u16 {
        (self.0 >> Self::INDEX_BITS) as u16
    }

    pub const fn resource_index(self) -> u64 {
        self.0 & Self::INDEX_MASK
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res:{}:{}", self.source_id(), self.resource_index())
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(bytes: &[u8], offset: u64) -> u64 {
    bytes
        .iter()
        .fold(offset, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn from_name_is_stable() {
        let a = AssetKey::from_name("meshes/cube", AssetType::Geometry);
        let b = AssetKey::from_name("meshes/cube", AssetType::Geometry);
        assert_eq!(a, b);
        assert_ne!(a, AssetKey::from_name("meshes/sphere", AssetType::Geometry));
    }

    #[test]
    fn ordering_is_total_over_all_fields() {
        let base = AssetKey::from_name("tex", AssetType::Texture);
        let keys: BTreeSet<_> = [
            base,
            base.with_variant(1),
            base.with_version(2),
            base.with_variant(1).with_version(1),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 4);
        let first = *keys.iter().next().unwrap();
        assert_eq!(first, base);
    }

    #[test]
    fn display_formats_guid() {
        let key = AssetKey::new([0xab; 16], AssetType::Material);
        let text = key.to_string();
        assert!(text.starts_with("abababab-abab-abab-abab-abababababab"));
        assert!(text.ends_with(":0:0:Material"));
    }

    #[test]
    fn resource_key_splits_source_and_index() {
        let key = ResourceKey::new(7, 123_456);
        assert_eq!(key.source_id(), 7);
        assert_eq!(key.resource_index(), 123_456);
        assert_eq!(ResourceKey::from_raw(key.raw()), key);
    }
}

//! Strong-typed ids and indices.

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel that never refers to a live object.
            pub const INVALID: $name = $name(u32::MAX);

            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            pub const fn index(self) -> u32 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(invalid)", stringify!($name))
                }
            }
        }
    };
}

define_handle!(
    /// Absolute index into the shader-visible bindless descriptor table.
    ShaderVisibleIndex
);
define_handle!(
    /// Backend id of a buffer or texture.
    GpuResourceId
);
define_handle!(
    /// Backend id of a compiled pipeline state object.
    PipelineHandle
);
define_handle!(
    /// Registered geometry `(asset, lod)` in the geometry registry.
    GeometryHandle
);
define_handle!(
    /// Vertex buffer namespace of the geometry registry.
    VertexBufferHandle
);
define_handle!(
    /// Index buffer namespace of the geometry registry.
    IndexBufferHandle
);
define_handle!(
    /// Dense material index, usable as an SoA index into material constants.
    MaterialHandle
);
define_handle!(
    /// Stable per-node transform id; mapped to a buffer element each frame.
    TransformHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel() {
        assert!(!ShaderVisibleIndex::INVALID.is_valid());
        assert_eq!(ShaderVisibleIndex::INVALID.index(), 0xFFFF_FFFF);
        assert!(ShaderVisibleIndex::new(0).is_valid());
        assert_eq!(MaterialHandle::default(), MaterialHandle::INVALID);
    }

    #[test]
    fn display_names_type() {
        assert_eq!(GeometryHandle::new(3).to_string(), "GeometryHandle(3)");
        assert_eq!(GpuResourceId::INVALID.to_string(), "GpuResourceId(invalid)");
    }
}

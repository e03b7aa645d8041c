//! Shader permutation flags.
//!
//! Each flag maps 1-to-1 to a `#define` name passed to the shader compiler.
//! Names are checked against `[A-Z_][A-Z0-9_]*` at compile time.

use std::fmt;

macro_rules! shader_permutations {
    ($( $(#[$meta:meta])* $variant:ident => $define:literal, )+) => {
        /// A single shader permutation flag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum ShaderPermutation {
            $( $(#[$meta])* $variant, )+
        }

        impl ShaderPermutation {
            /// Every permutation, in declaration order.
            pub const ALL: &'static [ShaderPermutation] = &[$(Self::$variant),+];

            /// The `#define` name for this flag.
            pub const fn define_name(self) -> &'static str {
                match self {
                    $( Self::$variant => $define, )+
                }
            }
        }
    };
}

shader_permutations! {
    /// Discard fragments below the material alpha cutoff.
    AlphaTest => "ALPHA_TEST",
    /// Depth buffer uses the reversed convention.
    ReverseZ => "REVERSE_Z",
    /// Fetch lights through the cluster grid instead of iterating all lights.
    ClusteredLighting => "CLUSTERED_LIGHTING",
    /// Blend output with the target using source alpha.
    AlphaBlend => "ALPHA_BLEND",
    /// Add output to the target.
    AdditiveBlend => "ADDITIVE_BLEND",
    /// Light culling bins lights into depth slices.
    ClusterDepthSlices => "CLUSTER_DEPTH_SLICES",
    /// Sky evaluates the procedural atmosphere.
    SkyAtmosphere => "SKY_ATMOSPHERE",
    /// Sky samples an environment cubemap.
    SkyCubemap => "SKY_CUBEMAP",
    /// Debug overlay output is enabled.
    DebugOverlay => "DEBUG_OVERLAY",
}

/// True when `name` is a non-empty identifier of upper-case ASCII letters,
/// digits and underscores that does not start with a digit.
pub const fn is_valid_define_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes[0].is_ascii_digit() {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !(b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_') {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = {
    let all = ShaderPermutation::ALL;
    let mut i = 0;
    while i < all.len() {
        assert!(is_valid_define_name(all[i].define_name()));
        i += 1;
    }
    assert!(all.len() <= 32);
};

impl fmt::Display for ShaderPermutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.define_name())
    }
}

/// Set of permutation flags, ordered by declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PermutationSet(u32);

impl PermutationSet {
    pub const EMPTY: PermutationSet = PermutationSet(0);

    pub fn with(mut self, flag: ShaderPermutation) -> Self {
        self.0 |= 1 << flag as u8;
        self
    }

    pub fn with_if(self, flag: ShaderPermutation, enabled: bool) -> Self {
        if enabled { self.with(flag) } else { self }
    }

    pub fn contains(&self, flag: ShaderPermutation) -> bool {
        self.0 & (1 << flag as u8) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = ShaderPermutation> + '_ {
        ShaderPermutation::ALL
            .iter()
            .copied()
            .filter(|f| self.contains(*f))
    }

    /// `#define` names for the shader compiler.
    pub fn defines(&self) -> Vec<&'static str> {
        self.iter().map(ShaderPermutation::define_name).collect()
    }
}

impl FromIterator<ShaderPermutation> for PermutationSet {
    fn from_iter<I: IntoIterator<Item = ShaderPermutation>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn define_names_are_unique_and_valid() {
        let names: HashSet<_> = ShaderPermutation::ALL
            .iter()
            .map(|p| p.define_name())
            .collect();
        assert_eq!(names.len(), ShaderPermutation::ALL.len());
        assert!(names.iter().all(|n| is_valid_define_name(n)));
    }

    #[test]
    fn identifier_pattern() {
        assert!(is_valid_define_name("ALPHA_TEST"));
        assert!(is_valid_define_name("_X1"));
        assert!(!is_valid_define_name(""));
        assert!(!is_valid_define_name("1ST"));
        assert!(!is_valid_define_name("alpha"));
        assert!(!is_valid_define_name("HAS-DASH"));
    }

    #[test]
    fn set_lists_defines_in_declaration_order() {
        let set: PermutationSet = [ShaderPermutation::ReverseZ, ShaderPermutation::AlphaTest]
            .into_iter()
            .collect();
        assert_eq!(set.defines(), vec!["ALPHA_TEST", "REVERSE_Z"]);
        assert!(!set.contains(ShaderPermutation::SkyCubemap));
    }
}

//! Shader program identifiers and permutation keys.

mod permutation;
mod program;

pub use permutation::{PermutationSet, ShaderPermutation, is_valid_define_name};
pub use program::{ComputeProgram, GraphicsProgram};

//! # Kiln Core
//!
//! Foundation types shared by the Kiln renderer crates:
//!
//! - [`math`] - `nalgebra` aliases, projections and bounding volumes
//! - [`keys`] - opaque asset and resource identities
//! - [`compute`] - cooperative async primitives (observable fence values)
//! - [`pool`] - reusable per-frame allocations
//! - [`profiling`] - Tracy instrumentation macros

pub mod compute;
pub mod keys;
pub mod math;
pub mod pool;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

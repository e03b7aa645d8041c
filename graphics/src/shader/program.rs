//! Built-in shader programs.
//!
//! Programs are identified by enum rather than by source; a backend maps each
//! program plus a [`PermutationSet`](super::PermutationSet) to compiled code.

/// Graphics (vertex + pixel) programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsProgram {
    /// Vertex pulling through `DrawMetadata`, depth output only.
    DepthOnly,
    /// Vertex pulling through `DrawMetadata`, lit forward shading.
    ForwardMesh,
    /// Fullscreen triangle at the far plane.
    Sky,
    /// Line list fetched from the GPU debug line buffer.
    DebugLines,
    /// Screen-space UI triangles with vertex colors.
    ImGui,
    /// Fullscreen triangle driven by a compositing task.
    Composite,
}

/// Compute programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeProgram {
    /// Bins positional lights into the cluster grid.
    LightCulling,
    /// Resets the GPU debug line counter and its indirect arguments.
    DebugClear,
}

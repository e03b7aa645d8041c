//! Pipeline state descriptions and the pipeline cache.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::shader::{ComputeProgram, GraphicsProgram, PermutationSet};
use crate::types::{PipelineHandle, TextureFormat};

/// Depth comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    Less,
    #[default]
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

impl CompareOp {
    /// Whether a fragment at `incoming` depth passes against `stored`.
    pub fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            Self::Never => false,
            Self::Less => incoming < stored,
            Self::LessEqual => incoming <= stored,
            Self::Equal => incoming == stored,
            Self::Greater => incoming > stored,
            Self::GreaterEqual => incoming >= stored,
            Self::Always => true,
        }
    }
}

/// Depth-stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub compare: CompareOp,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test_enabled: false,
        write_enabled: false,
        compare: CompareOp::Always,
    };

    pub fn read_write(compare: CompareOp) -> Self {
        Self {
            test_enabled: true,
            write_enabled: true,
            compare,
        }
    }

    pub fn read_only(compare: CompareOp) -> Self {
        Self {
            test_enabled: true,
            write_enabled: false,
            compare,
        }
    }
}

/// Color blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// `src * a + dst * (1 - a)`
    AlphaBlend,
    /// `src * a + dst`
    Additive,
}

/// Face culling; front faces are counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    LineList,
}

/// Full description of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub program: GraphicsProgram,
    pub permutations: PermutationSet,
    pub depth: DepthState,
    pub blend: BlendMode,
    pub cull: CullMode,
    pub topology: PrimitiveTopology,
    pub color_format: Option<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

impl GraphicsPipelineDesc {
    pub fn new(label: impl Into<String>, program: GraphicsProgram) -> Self {
        Self {
            label: label.into(),
            program,
            permutations: PermutationSet::EMPTY,
            depth: DepthState::DISABLED,
            blend: BlendMode::Opaque,
            cull: CullMode::None,
            topology: PrimitiveTopology::TriangleList,
            color_format: None,
            depth_format: None,
        }
    }

    pub fn with_depth(mut self, depth: DepthState, format: TextureFormat) -> Self {
        self.depth = depth;
        self.depth_format = Some(format);
        self
    }

    pub fn with_color(mut self, format: TextureFormat, blend: BlendMode) -> Self {
        self.color_format = Some(format);
        self.blend = blend;
        self
    }

    pub fn with_permutations(mut self, permutations: PermutationSet) -> Self {
        self.permutations = permutations;
        self
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }
}

/// Full description of a compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineDesc {
    pub label: String,
    pub program: ComputeProgram,
    pub permutations: PermutationSet,
}

impl ComputePipelineDesc {
    pub fn new(label: impl Into<String>, program: ComputeProgram) -> Self {
        Self {
            label: label.into(),
            program,
            permutations: PermutationSet::EMPTY,
        }
    }

    pub fn with_permutations(mut self, permutations: PermutationSet) -> Self {
        self.permutations = permutations;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineDesc {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

impl PipelineDesc {
    pub fn label(&self) -> &str {
        match self {
            Self::Graphics(d) => &d.label,
            Self::Compute(d) => &d.label,
        }
    }

    /// Stable key for cache lookups and rebuild detection.
    pub fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Deduplicates pipeline creation by description hash.
///
/// Passes request pipelines while recording, which only has shared access to
/// the frame, so the map sits behind a lock.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: Mutex<HashMap<u64, PipelineHandle>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        backend: &dyn GpuBackend,
        desc: &PipelineDesc,
    ) -> Result<PipelineHandle, GraphicsError> {
        let key = desc.hash_key();
        let mut pipelines = self.pipelines.lock();
        if let Some(handle) = pipelines.get(&key) {
            return Ok(*handle);
        }
        let handle = backend.create_pipeline(desc)?;
        log::debug!("created pipeline '{}' ({handle})", desc.label());
        pipelines.insert(key, handle);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_ops() {
        assert!(CompareOp::LessEqual.passes(0.5, 0.5));
        assert!(!CompareOp::Less.passes(0.5, 0.5));
        assert!(CompareOp::GreaterEqual.passes(0.5, 0.4));
        assert!(!CompareOp::GreaterEqual.passes(0.4, 0.5));
        assert!(!CompareOp::Never.passes(0.0, 1.0));
    }

    #[test]
    fn hash_key_tracks_state_changes() {
        let a = PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("forward", GraphicsProgram::ForwardMesh)
                .with_depth(DepthState::read_write(CompareOp::LessEqual), TextureFormat::Depth32Float),
        );
        let b = PipelineDesc::Graphics(
            GraphicsPipelineDesc::new("forward", GraphicsProgram::ForwardMesh).with_depth(
                DepthState::read_write(CompareOp::GreaterEqual),
                TextureFormat::Depth32Float,
            ),
        );
        assert_eq!(a.hash_key(), a.clone().hash_key());
        assert_ne!(a.hash_key(), b.hash_key());
    }
}

//! Heap segment capacities.

/// Descriptor category. Each category maps to one hardware heap type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceViewType {
    /// Constant buffers, shader resource views and unordered access views.
    CbvSrvUav,
    Sampler,
    /// Render target views. Never shader-visible.
    RenderTarget,
    /// Depth-stencil views. Never shader-visible.
    DepthStencil,
}

impl ResourceViewType {
    pub const ALL: [ResourceViewType; 4] = [
        Self::CbvSrvUav,
        Self::Sampler,
        Self::RenderTarget,
        Self::DepthStencil,
    ];

    /// Whether descriptors of this type may live in a shader-visible heap.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, Self::CbvSrvUav | Self::Sampler)
    }
}

/// Whether a segment is addressable from shaders or only from the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorVisibility {
    ShaderVisible,
    CpuOnly,
}

/// Capacities for one view type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapSegmentDesc {
    pub cpu_visible_capacity: u32,
    pub shader_visible_capacity: u32,
    /// Whether [`grow_between_frames`](super::DescriptorAllocator::grow_between_frames)
    /// may add ranges to a full segment.
    pub allow_growth: bool,
    /// Size of a growth range relative to the initial capacity.
    pub growth_factor: f32,
}

impl HeapSegmentDesc {
    pub fn new(cpu_visible_capacity: u32, shader_visible_capacity: u32) -> Self {
        Self {
            cpu_visible_capacity,
            shader_visible_capacity,
            allow_growth: false,
            growth_factor: 1.0,
        }
    }

    pub fn with_growth(mut self, growth_factor: f32) -> Self {
        self.allow_growth = true;
        self.growth_factor = growth_factor.max(0.1);
        self
    }

    pub fn capacity(&self, visibility: DescriptorVisibility) -> u32 {
        match visibility {
            DescriptorVisibility::ShaderVisible => self.shader_visible_capacity,
            DescriptorVisibility::CpuOnly => self.cpu_visible_capacity,
        }
    }
}

/// Source of segment capacities for a [`DescriptorAllocator`](super::DescriptorAllocator).
///
/// The order of [`segments`](Self::segments) fixes the layout of the heap.
pub trait DescriptorAllocationStrategy {
    fn segments(&self) -> Vec<(ResourceViewType, HeapSegmentDesc)>;
}

/// Table-driven strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapStrategy {
    entries: Vec<(ResourceViewType, HeapSegmentDesc)>,
}

impl HeapStrategy {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace the capacities for `view_type`, keeping first-insertion order.
    pub fn with_segment(mut self, view_type: ResourceViewType, desc: HeapSegmentDesc) -> Self {
        match self.entries.iter_mut().find(|(t, _)| *t == view_type) {
            Some(entry) => entry.1 = desc,
            None => self.entries.push((view_type, desc)),
        }
        self
    }

    pub fn get(&self, view_type: ResourceViewType) -> Option<&HeapSegmentDesc> {
        self.entries
            .iter()
            .find(|(t, _)| *t == view_type)
            .map(|(_, d)| d)
    }
}

impl Default for HeapStrategy {
    fn default() -> Self {
        Self::empty()
            .with_segment(
                ResourceViewType::CbvSrvUav,
                HeapSegmentDesc::new(1024, 4096).with_growth(0.5),
            )
            .with_segment(ResourceViewType::Sampler, HeapSegmentDesc::new(0, 64))
            .with_segment(ResourceViewType::RenderTarget, HeapSegmentDesc::new(64, 0))
            .with_segment(ResourceViewType::DepthStencil, HeapSegmentDesc::new(16, 0))
    }
}

impl DescriptorAllocationStrategy for HeapStrategy {
    fn segments(&self) -> Vec<(ResourceViewType, HeapSegmentDesc)> {
        self.entries.clone()
    }
}

//! Segmented descriptor allocator with deferred slot reuse.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use super::{DescriptorAllocationStrategy, DescriptorVisibility, HeapSegmentDesc, ResourceViewType};
use crate::error::GraphicsError;
use crate::types::{FenceValue, ShaderVisibleIndex};

/// Ownership token for one descriptor slot.
///
/// Deliberately not `Clone`: a slot has exactly one owner, which must hand
/// the token back through [`DescriptorAllocator::free`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    view_type: ResourceViewType,
    visibility: DescriptorVisibility,
    index: u32,
    generation: u32,
}

impl DescriptorHandle {
    pub fn view_type(&self) -> ResourceViewType {
        self.view_type
    }

    pub fn visibility(&self) -> DescriptorVisibility {
        self.visibility
    }

    /// Absolute index in the logical heap.
    pub fn heap_index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Absolute index usable by shaders, or `INVALID` for CPU-only slots.
    pub fn shader_visible_index(&self) -> ShaderVisibleIndex {
        match self.visibility {
            DescriptorVisibility::ShaderVisible => ShaderVisibleIndex::new(self.index),
            DescriptorVisibility::CpuOnly => ShaderVisibleIndex::INVALID,
        }
    }
}

/// Read-only view of one segment's layout and occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub view_type: ResourceViewType,
    pub visibility: DescriptorVisibility,
    pub base_index: u32,
    /// Initial contiguous capacity starting at `base_index`.
    pub capacity: u32,
    /// All index ranges owned by the segment, including growth ranges.
    pub ranges: Vec<Range<u32>>,
    pub allocated: u32,
    pub pending_free: u32,
    pub allow_growth: bool,
}

impl SegmentInfo {
    pub fn total_capacity(&self) -> u32 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn remaining(&self) -> u32 {
        self.total_capacity() - self.allocated - self.pending_free
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    generation: u32,
    allocated: bool,
}

#[derive(Debug)]
struct Segment {
    view_type: ResourceViewType,
    visibility: DescriptorVisibility,
    base_index: u32,
    capacity: u32,
    ranges: Vec<Range<u32>>,
    free_list: Vec<u32>,
    pending: VecDeque<(FenceValue, u32)>,
    slots: HashMap<u32, SlotState>,
    allocated: u32,
    allow_growth: bool,
    growth_factor: f32,
    growth_requested: bool,
}

impl Segment {
    fn new(
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
        base_index: u32,
        desc: &HeapSegmentDesc,
        capacity: u32,
    ) -> Self {
        let range = base_index..base_index + capacity;
        Self {
            view_type,
            visibility,
            base_index,
            capacity,
            free_list: range.clone().rev().collect(),
            ranges: vec![range],
            pending: VecDeque::new(),
            slots: HashMap::new(),
            allocated: 0,
            allow_growth: desc.allow_growth,
            growth_factor: desc.growth_factor,
            growth_requested: false,
        }
    }

    fn owns(&self, index: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&index))
    }

    fn info(&self) -> SegmentInfo {
        SegmentInfo {
            view_type: self.view_type,
            visibility: self.visibility,
            base_index: self.base_index,
            capacity: self.capacity,
            ranges: self.ranges.clone(),
            allocated: self.allocated,
            pending_free: self.pending.len() as u32,
            allow_growth: self.allow_growth,
        }
    }

    fn release_slot(&mut self, index: u32) {
        self.free_list.push(index);
    }
}

/// Bindless descriptor heap partitioned by `(view type, visibility)`.
///
/// Layout is computed once from the strategy: every shader-visible segment
/// first, then every CPU-only segment, each group in strategy order. The
/// first shader-visible segment therefore starts at index 0. Growth appends
/// new ranges past the end of the heap, so issued indices never move.
///
/// Freed slots are parked until the fence value passed to [`free`](Self::free)
/// has completed on the GPU.
#[derive(Debug)]
pub struct DescriptorAllocator {
    segments: Vec<Segment>,
    heap_end: u32,
}

impl DescriptorAllocator {
    pub fn new(strategy: &dyn DescriptorAllocationStrategy) -> Self {
        let entries = strategy.segments();
        let mut segments = Vec::new();
        let mut next_base = 0u32;

        for visibility in [
            DescriptorVisibility::ShaderVisible,
            DescriptorVisibility::CpuOnly,
        ] {
            for (view_type, desc) in &entries {
                let capacity = match visibility {
                    DescriptorVisibility::ShaderVisible if !view_type.can_be_shader_visible() => {
                        if desc.shader_visible_capacity > 0 {
                            log::warn!(
                                "{view_type:?} cannot be shader-visible; ignoring capacity {}",
                                desc.shader_visible_capacity
                            );
                        }
                        0
                    }
                    _ => desc.capacity(visibility),
                };
                if capacity == 0 {
                    continue;
                }
                segments.push(Segment::new(*view_type, visibility, next_base, desc, capacity));
                next_base += capacity;
            }
        }

        log::debug!(
            "descriptor heap laid out: {} segments, {} descriptors",
            segments.len(),
            next_base
        );
        Self {
            segments,
            heap_end: next_base,
        }
    }

    fn segment_index(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.view_type == view_type && s.visibility == visibility)
    }

    fn segment_for_handle(&mut self, handle: &DescriptorHandle) -> Result<&mut Segment, GraphicsError> {
        let idx = self
            .segment_index(handle.view_type, handle.visibility)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{handle:?}")))?;
        let segment = &mut self.segments[idx];
        match segment.slots.get(&handle.index) {
            Some(slot) if slot.allocated && slot.generation == handle.generation => Ok(segment),
            _ => Err(GraphicsError::InvalidHandle(format!(
                "descriptor {} (gen {}) is not allocated",
                handle.index, handle.generation
            ))),
        }
    }

    /// Allocate one slot. Fails with `OutOfCapacity` when the segment is full;
    /// growable segments are flagged for [`grow_between_frames`](Self::grow_between_frames).
    pub fn allocate(
        &mut self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Result<DescriptorHandle, GraphicsError> {
        let out_of_capacity = GraphicsError::OutOfCapacity {
            view_type,
            visibility,
        };
        let idx = self
            .segment_index(view_type, visibility)
            .ok_or(out_of_capacity.clone())?;
        let segment = &mut self.segments[idx];

        let Some(index) = segment.free_list.pop() else {
            if segment.allow_growth {
                segment.growth_requested = true;
            }
            log::warn!("descriptor segment {view_type:?}/{visibility:?} exhausted");
            return Err(out_of_capacity);
        };

        let slot = segment.slots.entry(index).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.allocated = true;
        segment.allocated += 1;

        Ok(DescriptorHandle {
            view_type,
            visibility,
            index,
            generation: slot.generation,
        })
    }

    /// Absolute shader-visible index of `handle` (`INVALID` for CPU-only slots).
    pub fn shader_visible_index(&self, handle: &DescriptorHandle) -> ShaderVisibleIndex {
        handle.shader_visible_index()
    }

    /// Release a slot once `retire_after` has completed on the GPU.
    pub fn free(
        &mut self,
        handle: DescriptorHandle,
        retire_after: FenceValue,
    ) -> Result<(), GraphicsError> {
        let segment = self.segment_for_handle(&handle)?;
        if let Some(slot) = segment.slots.get_mut(&handle.index) {
            slot.allocated = false;
        }
        segment.allocated -= 1;
        segment.pending.push_back((retire_after, handle.index));
        Ok(())
    }

    /// Release a slot that was never visible to submitted GPU work.
    pub fn free_immediately(&mut self, handle: DescriptorHandle) -> Result<(), GraphicsError> {
        let segment = self.segment_for_handle(&handle)?;
        if let Some(slot) = segment.slots.get_mut(&handle.index) {
            slot.allocated = false;
        }
        segment.allocated -= 1;
        segment.release_slot(handle.index);
        Ok(())
    }

    /// Return parked slots whose fence has completed. Returns the number recycled.
    pub fn process_completed(&mut self, completed: FenceValue) -> usize {
        let mut recycled = 0;
        for segment in &mut self.segments {
            // Pending entries are pushed with non-decreasing fence values in
            // practice, but do not rely on it.
            let mut keep = VecDeque::with_capacity(segment.pending.len());
            while let Some((fence, index)) = segment.pending.pop_front() {
                if fence <= completed {
                    segment.release_slot(index);
                    recycled += 1;
                } else {
                    keep.push_back((fence, index));
                }
            }
            segment.pending = keep;
        }
        recycled
    }

    /// Append a growth range to every growable segment that ran out of slots.
    ///
    /// Must only be called between frames. Returns the number of segments grown.
    pub fn grow_between_frames(&mut self) -> usize {
        let mut grown = 0;
        for segment in &mut self.segments {
            if !segment.growth_requested {
                continue;
            }
            segment.growth_requested = false;
            let extra = ((segment.capacity as f32 * segment.growth_factor).ceil() as u32).max(1);
            let range = self.heap_end..self.heap_end + extra;
            self.heap_end += extra;
            segment.free_list.extend(range.clone().rev());
            log::info!(
                "grew descriptor segment {:?}/{:?} by {} slots at {}",
                segment.view_type,
                segment.visibility,
                extra,
                range.start
            );
            segment.ranges.push(range);
            grown += 1;
        }
        grown
    }

    /// Base index of a segment. Stable for the allocator's lifetime.
    pub fn heap_base_index(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Option<u32> {
        self.segment_index(view_type, visibility)
            .map(|i| self.segments[i].base_index)
    }

    pub fn segment(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Option<SegmentInfo> {
        self.segment_index(view_type, visibility)
            .map(|i| self.segments[i].info())
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.segments.iter().map(Segment::info).collect()
    }

    pub fn allocated_count(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> u32 {
        self.segment(view_type, visibility)
            .map_or(0, |s| s.allocated)
    }

    pub fn remaining(&self, view_type: ResourceViewType, visibility: DescriptorVisibility) -> u32 {
        self.segment(view_type, visibility)
            .map_or(0, |s| s.remaining())
    }

    /// One past the highest index owned by any segment.
    pub fn heap_size(&self) -> u32 {
        self.heap_end
    }

    /// Whether `index` lies in a segment of the given kind.
    pub fn contains(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
        index: u32,
    ) -> bool {
        self.segment_index(view_type, visibility)
            .is_some_and(|i| self.segments[i].owns(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::HeapStrategy;

    use DescriptorVisibility::{CpuOnly, ShaderVisible};
    use ResourceViewType::*;

    fn small_strategy() -> HeapStrategy {
        HeapStrategy::empty()
            .with_segment(CbvSrvUav, HeapSegmentDesc::new(4, 4))
            .with_segment(Sampler, HeapSegmentDesc::new(0, 2))
    }

    #[test]
    fn shader_visible_segments_come_first() {
        let alloc = DescriptorAllocator::new(&small_strategy());
        assert_eq!(alloc.heap_base_index(CbvSrvUav, ShaderVisible), Some(0));
        assert_eq!(alloc.heap_base_index(Sampler, ShaderVisible), Some(4));
        assert_eq!(alloc.heap_base_index(CbvSrvUav, CpuOnly), Some(6));
        assert_eq!(alloc.heap_base_index(Sampler, CpuOnly), None);
        assert_eq!(alloc.heap_size(), 10);
    }

    #[test]
    fn render_target_types_are_forced_cpu_only() {
        let strategy = HeapStrategy::empty()
            .with_segment(RenderTarget, HeapSegmentDesc::new(8, 16))
            .with_segment(DepthStencil, HeapSegmentDesc::new(4, 4));
        let alloc = DescriptorAllocator::new(&strategy);
        assert!(alloc.segment(RenderTarget, ShaderVisible).is_none());
        assert!(alloc.segment(DepthStencil, ShaderVisible).is_none());
        assert_eq!(alloc.segment(RenderTarget, CpuOnly).unwrap().capacity, 8);
    }

    #[test]
    fn allocation_yields_increasing_indices() {
        let mut alloc = DescriptorAllocator::new(&small_strategy());
        let a = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        let b = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        assert_eq!(alloc.shader_visible_index(&a), ShaderVisibleIndex::new(0));
        assert_eq!(alloc.shader_visible_index(&b), ShaderVisibleIndex::new(1));
        let s = alloc.allocate(Sampler, ShaderVisible).unwrap();
        assert_eq!(s.shader_visible_index(), ShaderVisibleIndex::new(4));
        let cpu = alloc.allocate(CbvSrvUav, CpuOnly).unwrap();
        assert!(!cpu.shader_visible_index().is_valid());
        assert_eq!(cpu.heap_index(), 6);
    }

    #[test]
    fn exhausted_segment_reports_out_of_capacity() {
        let mut alloc = DescriptorAllocator::new(&small_strategy());
        let _a = alloc.allocate(Sampler, ShaderVisible).unwrap();
        let _b = alloc.allocate(Sampler, ShaderVisible).unwrap();
        let err = alloc.allocate(Sampler, ShaderVisible).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::OutOfCapacity {
                view_type: Sampler,
                visibility: ShaderVisible
            }
        );
    }

    #[test]
    fn freed_slots_wait_for_their_fence() {
        let mut alloc = DescriptorAllocator::new(&small_strategy());
        let a = alloc.allocate(Sampler, ShaderVisible).unwrap();
        let _b = alloc.allocate(Sampler, ShaderVisible).unwrap();
        let index = a.heap_index();
        alloc.free(a, FenceValue::new(5)).unwrap();

        assert_eq!(alloc.process_completed(FenceValue::new(4)), 0);
        assert!(alloc.allocate(Sampler, ShaderVisible).is_err());

        assert_eq!(alloc.process_completed(FenceValue::new(5)), 1);
        let reused = alloc.allocate(Sampler, ShaderVisible).unwrap();
        assert_eq!(reused.heap_index(), index);
        assert_eq!(reused.generation(), 2);
    }

    #[test]
    fn stale_handle_cannot_be_freed_twice() {
        let mut alloc = DescriptorAllocator::new(&small_strategy());
        let a = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        let stale = DescriptorHandle {
            view_type: a.view_type,
            visibility: a.visibility,
            index: a.index,
            generation: a.generation,
        };
        alloc.free_immediately(a).unwrap();
        assert!(matches!(
            alloc.free_immediately(stale),
            Err(GraphicsError::InvalidHandle(_))
        ));
    }

    #[test]
    fn growth_appends_ranges_without_moving_base() {
        let strategy = HeapStrategy::empty()
            .with_segment(CbvSrvUav, HeapSegmentDesc::new(0, 2).with_growth(1.0))
            .with_segment(Sampler, HeapSegmentDesc::new(0, 2));
        let mut alloc = DescriptorAllocator::new(&strategy);
        let _a = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        let _b = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        assert!(alloc.allocate(CbvSrvUav, ShaderVisible).is_err());

        assert_eq!(alloc.grow_between_frames(), 1);
        let c = alloc.allocate(CbvSrvUav, ShaderVisible).unwrap();
        assert_eq!(c.heap_index(), 4);
        assert_eq!(alloc.heap_base_index(CbvSrvUav, ShaderVisible), Some(0));
        assert_eq!(alloc.heap_base_index(Sampler, ShaderVisible), Some(2));
        assert!(alloc.contains(CbvSrvUav, ShaderVisible, 5));
        assert_eq!(alloc.segment(CbvSrvUav, ShaderVisible).unwrap().total_capacity(), 4);
    }
}

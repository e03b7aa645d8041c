//! Staging memory for uploads.
//!
//! A [`StagingProvider`] hands out CPU-writable ranges that transfer commands
//! copy from. The [`RingStagingProvider`] keeps one upload buffer split into
//! one partition per frame slot. A partition is reset in
//! [`on_frame_start`](StagingProvider::on_frame_start), which the orchestrator
//! only calls after the slot's fence has completed, so no locking is needed.
//!
//! When a partition runs out and growth is allowed, the provider replaces the
//! buffer with a larger one. The old buffer stays alive until every frame slot
//! has cycled once.

use std::sync::Arc;

use super::planner::align_up;
use super::request::UploadError;
use crate::backend::GpuBackend;
use crate::config::StagingConfig;
use crate::types::{BufferDescriptor, BufferUsage, FrameSlot, GpuResourceId};

/// A mapped range of a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingAllocation {
    pub buffer: GpuResourceId,
    /// Byte offset into `buffer`.
    pub offset: u64,
    pub size: u64,
    pub slot: FrameSlot,
}

/// Staging counters, reset per frame where noted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub buffers_created: u64,
    pub allocations_total: u64,
    /// Allocations since the current slot's `on_frame_start`.
    pub allocations_this_frame: u64,
    pub bytes_this_frame: u64,
    /// Total bytes of the live staging buffer.
    pub capacity: u64,
    pub growth_events: u64,
    pub copy_regions_total: u64,
}

/// Source of CPU-writable upload memory.
pub trait StagingProvider: Send {
    /// Reserve `size` bytes aligned to `alignment` in the current slot.
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<StagingAllocation, UploadError>;

    /// Copy `bytes` into an allocation at `offset` bytes from its start.
    fn write(&self, allocation: &StagingAllocation, offset: u64, bytes: &[u8]) -> Result<(), UploadError>;

    /// Begin using `slot`; its previous contents are no longer read by the GPU.
    fn on_frame_start(&mut self, slot: FrameSlot);

    /// Count copy regions recorded from this provider's memory.
    fn note_copy_regions(&mut self, count: u64);

    /// Buffers replaced by growth. The caller destroys them once the GPU
    /// work that read them has completed.
    fn take_retired(&mut self) -> Vec<GpuResourceId>;

    fn stats(&self) -> StagingStats;
}

#[derive(Debug, Clone, Copy, Default)]
struct Partition {
    cursor: u64,
}

/// Frame-slot partitioned ring of staging memory.
pub struct RingStagingProvider {
    backend: Arc<dyn GpuBackend>,
    config: StagingConfig,
    frames_in_flight: usize,
    buffer: Option<GpuResourceId>,
    partition_capacity: u64,
    partitions: Vec<Partition>,
    current: FrameSlot,
    /// Replaced buffers not yet handed to the caller.
    retired: Vec<GpuResourceId>,
    stats: StagingStats,
}

impl std::fmt::Debug for RingStagingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStagingProvider")
            .field("buffer", &self.buffer)
            .field("partition_capacity", &self.partition_capacity)
            .field("current", &self.current)
            .field("retired", &self.retired.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl RingStagingProvider {
    /// The staging buffer is created lazily on first allocation.
    pub fn new(backend: Arc<dyn GpuBackend>, config: StagingConfig, frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            backend,
            partition_capacity: config.partition_capacity(),
            config,
            frames_in_flight,
            buffer: None,
            partitions: vec![Partition::default(); frames_in_flight],
            current: FrameSlot::new(0),
            retired: Vec::new(),
            stats: StagingStats::default(),
        }
    }

    pub fn buffer(&self) -> Option<GpuResourceId> {
        self.buffer
    }

    pub fn partition_capacity(&self) -> u64 {
        self.partition_capacity
    }

    pub fn current_slot(&self) -> FrameSlot {
        self.current
    }

    fn create_buffer(&mut self, partition_capacity: u64) -> Result<GpuResourceId, UploadError> {
        let size = partition_capacity * self.frames_in_flight as u64;
        let descriptor =
            BufferDescriptor::upload(size, BufferUsage::COPY_SRC).with_label("staging_ring");
        let buffer = self.backend.create_buffer(&descriptor).map_err(|err| {
            log::error!("staging: failed to create {size} byte ring: {err}");
            UploadError::StagingUnavailable
        })?;
        self.stats.buffers_created += 1;
        self.stats.capacity = size;
        log::debug!("staging: ring {buffer} with {} x {partition_capacity} bytes", self.frames_in_flight);
        Ok(buffer)
    }

    fn grow(&mut self, required: u64) -> Result<GpuResourceId, UploadError> {
        let new_capacity = (self.partition_capacity * 2)
            .max(required)
            .next_power_of_two();
        let buffer = self.create_buffer(new_capacity)?;
        if let Some(old) = self.buffer.replace(buffer) {
            self.retired.push(old);
        }
        log::info!(
            "staging: partition grown {} -> {new_capacity} bytes",
            self.partition_capacity
        );
        self.partition_capacity = new_capacity;
        for partition in &mut self.partitions {
            partition.cursor = 0;
        }
        self.stats.growth_events += 1;
        Ok(buffer)
    }
}

impl StagingProvider for RingStagingProvider {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<StagingAllocation, UploadError> {
        if size == 0 {
            return Err(UploadError::EmptyPayload);
        }
        let alignment = alignment.max(1).next_power_of_two();
        let slot = self.current.index();
        let mut buffer = match self.buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = self.create_buffer(self.partition_capacity)?;
                self.buffer = Some(buffer);
                buffer
            }
        };
        let mut local = align_up(self.partitions[slot].cursor, alignment);
        if local + size > self.partition_capacity {
            if !self.config.allow_growth {
                log::warn!(
                    "staging: slot {} exhausted ({} of {} bytes used, {size} requested)",
                    self.current,
                    self.partitions[slot].cursor,
                    self.partition_capacity
                );
                return Err(UploadError::StagingUnavailable);
            }
            buffer = self.grow(self.partitions[slot].cursor + size)?;
            local = align_up(self.partitions[slot].cursor, alignment);
        }
        self.partitions[slot].cursor = local + size;
        self.stats.allocations_total += 1;
        self.stats.allocations_this_frame += 1;
        self.stats.bytes_this_frame += size;
        Ok(StagingAllocation {
            buffer,
            offset: self.partition_capacity * slot as u64 + local,
            size,
            slot: self.current,
        })
    }

    fn write(&self, allocation: &StagingAllocation, offset: u64, bytes: &[u8]) -> Result<(), UploadError> {
        if offset + bytes.len() as u64 > allocation.size {
            return Err(UploadError::RecordingFailed(format!(
                "staging write of {} bytes at {offset} overruns a {} byte allocation",
                bytes.len(),
                allocation.size
            )));
        }
        self.backend
            .write_buffer(allocation.buffer, allocation.offset + offset, bytes)
            .map_err(|_| UploadError::StagingUnavailable)
    }

    fn on_frame_start(&mut self, slot: FrameSlot) {
        let index = slot.index() % self.partitions.len();
        self.current = FrameSlot::new(index as u32);
        self.partitions[index].cursor = 0;
        self.stats.allocations_this_frame = 0;
        self.stats.bytes_this_frame = 0;
    }

    fn note_copy_regions(&mut self, count: u64) {
        self.stats.copy_regions_total += count;
    }

    fn take_retired(&mut self) -> Vec<GpuResourceId> {
        std::mem::take(&mut self.retired)
    }

    fn stats(&self) -> StagingStats {
        self.stats
    }
}

impl Drop for RingStagingProvider {
    fn drop(&mut self) {
        for buffer in self.retired.drain(..) {
            self.backend.destroy_resource(buffer);
        }
        if let Some(buffer) = self.buffer.take() {
            self.backend.destroy_resource(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn provider(partition_size: u64, allow_growth: bool) -> (Arc<DummyBackend>, RingStagingProvider) {
        let backend = Arc::new(DummyBackend::default());
        let config = StagingConfig {
            partition_size,
            slack: 0.0,
            allow_growth,
        };
        let provider = RingStagingProvider::new(backend.clone(), config, 3);
        (backend, provider)
    }

    #[test]
    fn allocations_are_aligned_within_the_slot_partition() {
        let (_backend, mut staging) = provider(1024, false);
        let a = staging.allocate(100, 256).unwrap();
        let b = staging.allocate(10, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(a.buffer, b.buffer);

        staging.on_frame_start(FrameSlot::new(1));
        let c = staging.allocate(10, 256).unwrap();
        assert_eq!(c.offset, 1024);
        assert_eq!(c.slot, FrameSlot::new(1));
        assert_eq!(staging.stats().buffers_created, 1);
        assert_eq!(staging.stats().capacity, 3 * 1024);
    }

    #[test]
    fn frame_start_resets_per_frame_counters() {
        let (_backend, mut staging) = provider(1024, false);
        staging.allocate(64, 4).unwrap();
        staging.allocate(64, 4).unwrap();
        assert_eq!(staging.stats().allocations_this_frame, 2);
        staging.on_frame_start(FrameSlot::new(0));
        assert_eq!(staging.stats().allocations_this_frame, 0);
        assert_eq!(staging.stats().bytes_this_frame, 0);
        assert_eq!(staging.stats().allocations_total, 2);
        assert_eq!(staging.allocate(64, 4).unwrap().offset, 0);
    }

    #[test]
    fn exhausted_partition_without_growth_fails() {
        let (_backend, mut staging) = provider(256, false);
        staging.allocate(200, 4).unwrap();
        assert_eq!(staging.allocate(100, 4), Err(UploadError::StagingUnavailable));
    }

    #[test]
    fn growth_replaces_the_ring_and_retires_the_old_buffer() {
        let (backend, mut staging) = provider(256, true);
        let first = staging.allocate(200, 4).unwrap();
        let grown = staging.allocate(300, 4).unwrap();
        assert_ne!(first.buffer, grown.buffer);
        assert!(staging.partition_capacity() >= 512);
        assert_eq!(staging.stats().growth_events, 1);
        assert!(backend.resource_exists(first.buffer));

        for slot in [1, 2, 0] {
            staging.on_frame_start(FrameSlot::new(slot));
        }
        assert!(backend.resource_exists(first.buffer));
        assert_eq!(staging.take_retired(), vec![first.buffer]);
        assert!(staging.take_retired().is_empty());
    }

    #[test]
    fn writes_land_in_the_buffer() {
        let (backend, mut staging) = provider(1024, false);
        staging.on_frame_start(FrameSlot::new(2));
        let alloc = staging.allocate(4, 4).unwrap();
        staging.write(&alloc, 0, &[9, 8, 7, 6]).unwrap();
        assert_eq!(
            backend.read_buffer(alloc.buffer, alloc.offset, 4).unwrap(),
            vec![9, 8, 7, 6]
        );
        assert!(staging.write(&alloc, 2, &[0; 4]).is_err());
    }
}

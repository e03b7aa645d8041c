//! Upload coordinator: plans, stages and records uploads on the transfer queue.

use std::sync::Arc;
use std::time::Duration;

use kiln_core::pool::ObjectPool;

use super::planner::{BufferPlanner, TexturePlanner, TextureUploadPlan};
use super::request::{UploadError, UploadRequest};
use super::staging::{RingStagingProvider, StagingAllocation, StagingProvider, StagingStats};
use super::tracker::{AwaitOutcome, UploadTicket, UploadTracker};
use crate::backend::{GpuBackend, QueueRole};
use crate::commands::{
    CommandList, CommandQueue, CommandRecorder, ResourceState, ResourceStateTracker,
    TextureCopyRegion,
};
use crate::config::{GraphicsConfig, UploadPolicy};
use crate::error::GraphicsError;
use crate::types::{FenceValue, FrameSlot};

/// Owns the transfer queue, the staging provider and the ticket tracker.
pub struct UploadCoordinator {
    backend: Arc<dyn GpuBackend>,
    queue: CommandQueue,
    staging: Box<dyn StagingProvider>,
    tracker: UploadTracker,
    policy: UploadPolicy,
    buffer_planner: BufferPlanner,
    texture_planner: TexturePlanner,
    lists: ObjectPool<CommandList>,
    submissions: u64,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("queue", &self.queue)
            .field("staging", &self.staging.stats())
            .field("pending", &self.tracker.pending_count())
            .field("submissions", &self.submissions)
            .finish()
    }
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn GpuBackend>, config: &GraphicsConfig) -> Self {
        let staging = RingStagingProvider::new(
            backend.clone(),
            config.staging,
            config.frames_in_flight,
        );
        Self::with_staging(backend, config.upload_policy, Box::new(staging))
    }

    pub fn with_staging(
        backend: Arc<dyn GpuBackend>,
        policy: UploadPolicy,
        staging: Box<dyn StagingProvider>,
    ) -> Self {
        Self {
            queue: CommandQueue::new(QueueRole::Transfer, backend.clone()),
            backend,
            staging,
            tracker: UploadTracker::new(),
            policy,
            buffer_planner: BufferPlanner::new(policy),
            texture_planner: TexturePlanner::new(policy),
            lists: ObjectPool::new(),
            submissions: 0,
        }
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    pub fn staging_stats(&self) -> StagingStats {
        self.staging.stats()
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Last fence value signaled on the transfer queue.
    pub fn last_signaled(&self) -> FenceValue {
        self.queue.last_signaled()
    }

    pub fn submit(&mut self, request: UploadRequest) -> UploadTicket {
        self.submit_many(vec![request])
            .pop()
            .unwrap_or_else(|| self.tracker.register_failed(UploadError::EmptyPayload))
    }

    /// Submit a batch. Buffer requests share one staging allocation and the
    /// whole batch shares one command list and one fence value. Tickets are
    /// returned in request order.
    pub fn submit_many(&mut self, requests: Vec<UploadRequest>) -> Vec<UploadTicket> {
        kiln_core::profile_scope!("UploadCoordinator::submit_many");
        let mut tickets: Vec<Option<UploadTicket>> = vec![None; requests.len()];
        for (chunk_index, chunk) in requests.chunks(self.policy.max_batch_requests.max(1)).enumerate() {
            let base = chunk_index * self.policy.max_batch_requests.max(1);
            for (offset, ticket) in self.submit_batch(chunk) {
                tickets[base + offset] = Some(ticket);
            }
        }
        tickets
            .into_iter()
            .map(|t| t.unwrap_or_else(|| self.tracker.register_failed(UploadError::EmptyPayload)))
            .collect()
    }

    fn submit_batch(&mut self, requests: &[UploadRequest]) -> Vec<(usize, UploadTicket)> {
        let mut out = Vec::with_capacity(requests.len());
        let mut scheduled: Vec<(usize, u64)> = Vec::new();

        // Buffers: one plan and one staging allocation for the batch.
        let refs: Vec<&UploadRequest> = requests.iter().collect();
        let buffer_plan = self.buffer_planner.plan(&refs);
        for (index, error) in buffer_plan.rejected {
            out.push((index, self.tracker.register_failed(error)));
        }

        let list = self.lists.acquire();
        let mut recorder =
            match CommandRecorder::begin(list, "uploads", QueueRole::Transfer, ResourceStateTracker::new()) {
                Ok(recorder) => recorder,
                Err(err) => {
                    log::error!("upload: cannot begin recording: {err}");
                    for index in 0..requests.len() {
                        if !out.iter().any(|(i, _)| *i == index) {
                            out.push((index, self.tracker.register_failed(UploadError::RecordingFailed(err.to_string()))));
                        }
                    }
                    return out;
                }
            };

        if !buffer_plan.regions.is_empty() {
            match self.stage_buffers(requests, &buffer_plan.regions, buffer_plan.total_bytes) {
                Ok(staging) => {
                    recorder.begin_tracking_resource_state(staging.buffer, ResourceState::COPY_SOURCE, false);
                    for region in &buffer_plan.regions {
                        if !recorder.is_tracked(region.dst) {
                            recorder.begin_tracking_resource_state(region.dst, ResourceState::COMMON, true);
                        }
                        recorder.require_resource_state(region.dst, ResourceState::COPY_DEST);
                        recorder.copy_buffer(
                            staging.buffer,
                            staging.offset + region.staging_offset,
                            region.dst,
                            region.dst_offset,
                            region.size,
                        );
                        scheduled.push((region.request, region.size));
                    }
                    self.staging.note_copy_regions(buffer_plan.regions.len() as u64);
                }
                Err(error) => {
                    log::error!(
                        "upload: staging {} bytes for {} buffer request(s) failed: {error}",
                        buffer_plan.total_bytes,
                        buffer_plan.regions.len()
                    );
                    for region in &buffer_plan.regions {
                        out.push((region.request, self.tracker.register_failed(error.clone())));
                    }
                }
            }
        }

        // Textures: one staging allocation per request.
        for (index, request) in requests.iter().enumerate() {
            if request.kind() != super::UploadKind::Texture {
                continue;
            }
            match self
                .texture_planner
                .plan(request)
                .and_then(|plan| self.stage_texture(request, &plan).map(|staging| (plan, staging)))
            {
                Ok((plan, staging)) => {
                    recorder.begin_tracking_resource_state(staging.buffer, ResourceState::COPY_SOURCE, false);
                    if !recorder.is_tracked(plan.texture) {
                        recorder.begin_tracking_resource_state(plan.texture, ResourceState::COMMON, true);
                    }
                    recorder.require_resource_state(plan.texture, ResourceState::COPY_DEST);
                    for footprint in &plan.footprints {
                        recorder.copy_buffer_to_texture(
                            staging.buffer,
                            staging.offset + footprint.offset,
                            footprint.row_pitch,
                            plan.texture,
                            TextureCopyRegion {
                                mip_level: footprint.mip,
                                array_layer: footprint.layer,
                                extent: footprint.extent,
                            },
                        );
                    }
                    self.staging.note_copy_regions(plan.footprints.len() as u64);
                    scheduled.push((index, plan.source_bytes));
                }
                Err(error) => {
                    log::warn!("upload '{}' failed: {error}", request.label());
                    out.push((index, self.tracker.register_failed(error)));
                }
            }
        }

        recorder.restore_initial_states();
        let fence = match recorder.finish().and_then(|recorded| {
            if !recorded.diagnostics.is_empty() {
                log::warn!("upload: {} barrier diagnostic(s)", recorded.diagnostics.len());
            }
            self.submit_list(recorded.list, !scheduled.is_empty())
        }) {
            Ok(fence) => fence,
            Err(err) => {
                log::error!("upload: submission failed: {err}");
                for (index, _) in scheduled.drain(..) {
                    out.push((index, self.tracker.register_failed(UploadError::RecordingFailed(err.to_string()))));
                }
                FenceValue::ZERO
            }
        };
        for (index, bytes) in scheduled {
            out.push((index, self.tracker.register_pending(fence, bytes)));
        }
        self.defer_retired_staging();
        out
    }

    /// Destroy staging buffers replaced by growth once every transfer
    /// submitted so far has completed.
    fn defer_retired_staging(&mut self) {
        let after = self.queue.last_signaled();
        for buffer in self.staging.take_retired() {
            log::trace!("upload: staging {buffer} released after transfer fence {after}");
            let backend = self.backend.clone();
            self.queue
                .defer_until(after, Box::new(move || backend.destroy_resource(buffer)));
        }
    }

    /// Submit (or recycle, when empty) the batch list and signal.
    fn submit_list(&mut self, list: CommandList, has_work: bool) -> Result<FenceValue, GraphicsError> {
        if !has_work {
            let mut list = list;
            list.steal_commands()?;
            list.on_submitted()?;
            list.on_executed()?;
            self.lists.release(list);
            return Ok(FenceValue::ZERO);
        }
        self.queue.submit(list)?;
        self.submissions += 1;
        let fence = self.queue.signal();
        log::trace!("upload: batch signaled transfer fence {fence}");
        Ok(fence)
    }

    fn stage_buffers(
        &mut self,
        requests: &[UploadRequest],
        regions: &[super::BufferCopyRegion],
        total_bytes: u64,
    ) -> Result<StagingAllocation, UploadError> {
        let staging = self
            .staging
            .allocate(total_bytes, self.policy.buffer_placement_alignment)?;
        for region in regions {
            self.staging
                .write(&staging, region.staging_offset, &requests[region.request].data)?;
        }
        Ok(staging)
    }

    fn stage_texture(
        &mut self,
        request: &UploadRequest,
        plan: &TextureUploadPlan,
    ) -> Result<StagingAllocation, UploadError> {
        let staging = self
            .staging
            .allocate(plan.total_bytes, self.policy.texture_placement_alignment)?;
        let mut padded = vec![0u8; plan.total_bytes as usize];
        for footprint in &plan.footprints {
            let rows = footprint.extent.height as u64 * footprint.extent.depth as u64;
            for row in 0..rows {
                let src = (footprint.source_offset + row * footprint.source_row_bytes) as usize;
                let dst = (footprint.offset + row * footprint.row_pitch) as usize;
                let len = footprint.source_row_bytes as usize;
                padded[dst..dst + len].copy_from_slice(&request.data[src..src + len]);
            }
        }
        self.staging.write(&staging, 0, &padded)?;
        Ok(staging)
    }

    /// Poll the transfer queue, advance the tracker's completed fence and
    /// recycle finished command lists. Returns the completed value.
    pub fn retire_completed(&mut self) -> FenceValue {
        let completed = self.queue.completed_value();
        if self.tracker.observe_completed(completed) {
            log::trace!("upload: transfer fence completed up to {completed}");
        }
        for list in self.queue.process_completed() {
            self.lists.release(list);
        }
        completed
    }

    /// Frame-start hook: retires completed uploads, then lets the staging
    /// provider reuse `slot`'s partition.
    pub fn on_frame_start(&mut self, slot: FrameSlot) {
        self.retire_completed();
        self.staging.on_frame_start(slot);
    }

    /// Block until `ticket` completes, driving the transfer queue.
    pub fn await_ticket(&mut self, ticket: UploadTicket, timeout: Option<Duration>) -> AwaitOutcome {
        if !self.tracker.is_complete(ticket) && ticket.fence > FenceValue::ZERO {
            self.queue.wait(ticket.fence, timeout);
            self.retire_completed();
        }
        match self.tracker.try_get_result(ticket) {
            Some(result) => AwaitOutcome::Completed(result),
            None => AwaitOutcome::TimedOut(ticket),
        }
    }

    /// Wait for every ticket with one deadline.
    pub fn await_all(&mut self, tickets: &[UploadTicket], timeout: Option<Duration>) -> Vec<AwaitOutcome> {
        if let Some(max) = tickets.iter().map(|t| t.fence).max() {
            if max > FenceValue::ZERO {
                self.queue.wait(max, timeout);
            }
        }
        self.retire_completed();
        self.tracker.await_all(tickets, Some(Duration::ZERO))
    }

    /// Block until every submitted upload has completed.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        for list in self.queue.wait_idle()? {
            self.lists.release(list);
        }
        self.retire_completed();
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }
}

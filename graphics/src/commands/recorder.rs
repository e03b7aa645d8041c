//! Command recording with resource-state tracking.

use bytemuck::Pod;

use super::{
    AttachmentView, Command, CommandList, ResourceState, ResourceStateTracker, TextureCopyRegion,
};
use crate::backend::QueueRole;
use crate::error::GraphicsError;
use crate::gpu_types::{ConstantRegister, RootConstantSlot};
use crate::types::{GpuResourceId, PipelineHandle, ScissorRect, Viewport};

/// What went wrong with a resource during recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A state was required for a resource that was never registered.
    UntrackedResource,
    /// A command used a resource that was not brought to the state it needs.
    MissingTransition {
        required: ResourceState,
        actual: ResourceState,
    },
    /// The caller asserted a `before` state that disagrees with the tracker.
    StateMismatch {
        asserted: ResourceState,
        actual: ResourceState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderDiagnostic {
    /// Scope (usually the pass name) active when the problem was found.
    pub scope: String,
    pub resource: GpuResourceId,
    pub kind: DiagnosticKind,
}

/// Diagnostics collected while recording one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderDiagnostics {
    entries: Vec<RecorderDiagnostic>,
}

impl RecorderDiagnostics {
    pub fn push(&mut self, diagnostic: RecorderDiagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: RecorderDiagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecorderDiagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn missing_transitions(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| {
                matches!(
                    d.kind,
                    DiagnosticKind::MissingTransition { .. } | DiagnosticKind::UntrackedResource
                )
            })
            .count()
    }
}

/// Output of [`CommandRecorder::finish`].
#[derive(Debug)]
pub struct RecordedCommands {
    pub list: CommandList,
    pub tracker: ResourceStateTracker,
    pub diagnostics: RecorderDiagnostics,
}

/// Records commands into a [`CommandList`], inserting coalesced barriers
/// lazily before each command that does GPU work.
///
/// Every resource must be registered with
/// [`begin_tracking_resource_state`](Self::begin_tracking_resource_state)
/// and brought to the state a command needs with
/// [`require_resource_state`](Self::require_resource_state) first.
#[derive(Debug)]
pub struct CommandRecorder {
    list: CommandList,
    tracker: ResourceStateTracker,
    diagnostics: RecorderDiagnostics,
    scope: String,
    color_target: Option<AttachmentView>,
    depth_target: Option<AttachmentView>,
}

impl CommandRecorder {
    /// Start recording into a free list.
    pub fn begin(
        mut list: CommandList,
        name: &str,
        queue: QueueRole,
        tracker: ResourceStateTracker,
    ) -> Result<Self, GraphicsError> {
        list.begin_recording(name, queue)?;
        Ok(Self {
            list,
            tracker,
            diagnostics: RecorderDiagnostics::default(),
            scope: name.to_string(),
            color_target: None,
            depth_target: None,
        })
    }

    pub fn queue(&self) -> QueueRole {
        self.list.queue()
    }

    /// Attribute subsequent diagnostics to `scope`.
    pub fn set_scope(&mut self, scope: &str) {
        self.scope.clear();
        self.scope.push_str(scope);
    }

    pub fn tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    pub fn diagnostics(&self) -> &RecorderDiagnostics {
        &self.diagnostics
    }

    pub fn command_count(&self) -> usize {
        self.list.len()
    }

    fn diagnose(&mut self, resource: GpuResourceId, kind: DiagnosticKind) {
        log::warn!("[{}] resource {resource}: {kind:?}", self.scope);
        self.diagnostics.push(RecorderDiagnostic {
            scope: self.scope.clone(),
            resource,
            kind,
        });
    }

    fn push(&mut self, command: Command) {
        if command.is_work() {
            self.flush_barriers();
        }
        if let Err(err) = self.list.push(command) {
            log::error!("dropping command: {err}");
        }
    }

    // ===== State tracking =====

    /// Register a resource with the state it is in before this frame's
    /// commands. With `keep_initial`, [`restore_initial_states`](Self::restore_initial_states)
    /// transitions it back.
    pub fn begin_tracking_resource_state(
        &mut self,
        resource: GpuResourceId,
        initial: ResourceState,
        keep_initial: bool,
    ) {
        self.tracker.begin_tracking(resource, initial, keep_initial);
    }

    pub fn is_tracked(&self, resource: GpuResourceId) -> bool {
        self.tracker.is_tracked(resource)
    }

    /// Request `state` for `resource`; the barrier is emitted before the next
    /// command that does GPU work.
    pub fn require_resource_state(&mut self, resource: GpuResourceId, state: ResourceState) {
        if !self.tracker.transition(resource, state) {
            self.diagnose(resource, DiagnosticKind::UntrackedResource);
        }
    }

    /// Request a transition while asserting the state the resource is in.
    ///
    /// A wrong assertion halts in debug builds. In release builds a warning
    /// is logged and the transition is applied from the observed state.
    pub fn require_resource_state_from(
        &mut self,
        resource: GpuResourceId,
        asserted_before: ResourceState,
        after: ResourceState,
    ) {
        let Some(actual) = self.tracker.current_state(resource) else {
            self.diagnose(resource, DiagnosticKind::UntrackedResource);
            return;
        };
        if actual != asserted_before {
            self.diagnose(
                resource,
                DiagnosticKind::StateMismatch {
                    asserted: asserted_before,
                    actual,
                },
            );
            debug_assert!(
                actual == asserted_before,
                "resource {resource} is in {actual:?}, caller asserted {asserted_before:?}"
            );
        }
        self.tracker.transition(resource, after);
    }

    /// The state `resource` must be in when the frame's recording ends.
    pub fn require_resource_state_final(&mut self, resource: GpuResourceId, state: ResourceState) {
        if !self.tracker.set_final_state(resource, state) {
            self.diagnose(resource, DiagnosticKind::UntrackedResource);
        }
    }

    /// Transition resources back to their initial or final states.
    pub fn restore_initial_states(&mut self) {
        self.tracker.restore_initial_states();
        self.flush_barriers();
    }

    pub fn end_tracking(&mut self, resource: GpuResourceId) -> Option<ResourceState> {
        self.flush_barriers();
        self.tracker.end_tracking(resource)
    }

    /// Emit pending barriers now.
    pub fn flush_barriers(&mut self) {
        let barriers = self.tracker.flush();
        if barriers.is_empty() {
            return;
        }
        log::trace!("[{}] {} barrier(s)", self.scope, barriers.len());
        if let Err(err) = self.list.push(Command::Barrier(barriers)) {
            log::error!("dropping barriers: {err}");
        }
    }

    fn check_state(&mut self, resource: GpuResourceId, required: ResourceState) {
        match self.tracker.current_state(resource) {
            None => self.diagnose(resource, DiagnosticKind::UntrackedResource),
            Some(actual) if !actual.satisfies(required) => self.diagnose(
                resource,
                DiagnosticKind::MissingTransition { required, actual },
            ),
            Some(_) => {}
        }
    }

    fn check_depth_target(&mut self, depth: AttachmentView) {
        match self.tracker.current_state(depth.resource) {
            None => self.diagnose(depth.resource, DiagnosticKind::UntrackedResource),
            Some(actual)
                if !actual.satisfies(ResourceState::DEPTH_WRITE)
                    && !actual.satisfies(ResourceState::DEPTH_READ) =>
            {
                self.diagnose(
                    depth.resource,
                    DiagnosticKind::MissingTransition {
                        required: ResourceState::DEPTH_WRITE,
                        actual,
                    },
                )
            }
            Some(_) => {}
        }
    }

    fn check_bound_targets(&mut self) {
        if let Some(color) = self.color_target {
            self.check_state(color.resource, ResourceState::RENDER_TARGET);
        }
        if let Some(depth) = self.depth_target {
            self.check_depth_target(depth);
        }
    }

    // ===== Commands =====

    pub fn copy_buffer(
        &mut self,
        src: GpuResourceId,
        src_offset: u64,
        dst: GpuResourceId,
        dst_offset: u64,
        size: u64,
    ) {
        self.check_state(src, ResourceState::COPY_SOURCE);
        self.check_state(dst, ResourceState::COPY_DEST);
        self.push(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: GpuResourceId,
        src_offset: u64,
        row_pitch: u64,
        dst: GpuResourceId,
        region: TextureCopyRegion,
    ) {
        self.check_state(src, ResourceState::COPY_SOURCE);
        self.check_state(dst, ResourceState::COPY_DEST);
        self.push(Command::CopyBufferToTexture {
            src,
            src_offset,
            row_pitch,
            dst,
            region,
        });
    }

    pub fn update_buffer(&mut self, dst: GpuResourceId, offset: u64, data: &[u8]) {
        self.check_state(dst, ResourceState::COPY_DEST);
        self.push(Command::UpdateBuffer {
            dst,
            offset,
            data: data.to_vec(),
        });
    }

    pub fn clear_render_target(&mut self, target: AttachmentView, color: [f32; 4]) {
        self.check_state(target.resource, ResourceState::RENDER_TARGET);
        self.push(Command::ClearRenderTarget { target, color });
    }

    pub fn clear_depth(&mut self, target: AttachmentView, depth: f32) {
        self.check_state(target.resource, ResourceState::DEPTH_WRITE);
        self.push(Command::ClearDepth { target, depth });
    }

    pub fn clear_uav(&mut self, resource: GpuResourceId, value: u32) {
        self.check_state(resource, ResourceState::UNORDERED_ACCESS);
        self.push(Command::ClearUav { resource, value });
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(Command::SetPipeline(pipeline));
    }

    pub fn set_render_targets(
        &mut self,
        color: Option<AttachmentView>,
        depth: Option<AttachmentView>,
    ) {
        self.color_target = color;
        self.depth_target = depth;
        self.push(Command::SetRenderTargets { color, depth });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        self.push(Command::SetScissor(scissor));
    }

    pub fn set_constants<T: Pod>(&mut self, register: ConstantRegister, value: &T) {
        self.push(Command::SetConstants {
            register,
            data: bytemuck::bytes_of(value).to_vec(),
        });
    }

    pub fn set_root_constant(&mut self, slot: RootConstantSlot, value: u32) {
        self.push(Command::SetRootConstant { slot, value });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.check_bound_targets();
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn draw_indirect(&mut self, args: GpuResourceId, offset: u64) {
        self.check_state(args, ResourceState::INDIRECT_ARGUMENT);
        self.check_bound_targets();
        self.push(Command::DrawIndirect { args, offset });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    pub fn begin_event(&mut self, name: &str) {
        self.push(Command::BeginEvent(name.to_string()));
    }

    pub fn end_event(&mut self) {
        self.push(Command::EndEvent);
    }

    /// Flush pending barriers and close the list.
    pub fn finish(mut self) -> Result<RecordedCommands, GraphicsError> {
        self.flush_barriers();
        self.list.end_recording()?;
        Ok(RecordedCommands {
            list: self.list,
            tracker: self.tracker,
            diagnostics: self.diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ResourceBarrier;
    use kiln_core::pool::Poolable;

    fn recorder() -> CommandRecorder {
        CommandRecorder::begin(
            CommandList::new_empty(),
            "test",
            QueueRole::Graphics,
            ResourceStateTracker::new(),
        )
        .unwrap()
    }

    fn barriers(commands: &[Command]) -> Vec<ResourceBarrier> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Barrier(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn barriers_flush_lazily_before_work() {
        let mut rec = recorder();
        let buffer = GpuResourceId::new(1);
        rec.begin_tracking_resource_state(buffer, ResourceState::COMMON, false);
        rec.require_resource_state(buffer, ResourceState::COPY_DEST);
        rec.set_pipeline(PipelineHandle::new(0));
        rec.update_buffer(buffer, 0, &[1, 2, 3, 4]);

        let recorded = rec.finish().unwrap();
        let mut list = recorded.list;
        let commands = list.steal_commands().unwrap();
        assert!(matches!(commands[0], Command::SetPipeline(_)));
        assert!(matches!(commands[1], Command::Barrier(_)));
        assert!(matches!(commands[2], Command::UpdateBuffer { .. }));
        assert!(recorded.diagnostics.is_empty());
    }

    #[test]
    fn coalesces_transitions_between_work() {
        let mut rec = recorder();
        let tex = GpuResourceId::new(3);
        rec.begin_tracking_resource_state(tex, ResourceState::COMMON, false);
        rec.require_resource_state(tex, ResourceState::COPY_DEST);
        rec.require_resource_state(tex, ResourceState::SHADER_RESOURCE);
        rec.dispatch(1, 1, 1);
        let mut recorded = rec.finish().unwrap();
        let commands = recorded.list.steal_commands().unwrap();
        let barriers = barriers(&commands);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].before, ResourceState::COMMON);
        assert_eq!(barriers[0].after, ResourceState::SHADER_RESOURCE);
    }

    #[test]
    fn missing_transition_is_diagnosed() {
        let mut rec = recorder();
        let target = GpuResourceId::new(2);
        rec.begin_tracking_resource_state(target, ResourceState::COMMON, false);
        rec.clear_render_target(AttachmentView::new(target, 0), [0.0; 4]);
        let recorded = rec.finish().unwrap();
        assert_eq!(recorded.diagnostics.missing_transitions(), 1);
    }

    #[test]
    fn untracked_resource_is_diagnosed() {
        let mut rec = recorder();
        rec.require_resource_state(GpuResourceId::new(9), ResourceState::SHADER_RESOURCE);
        assert_eq!(
            rec.diagnostics().iter().next().map(|d| &d.kind),
            Some(&DiagnosticKind::UntrackedResource)
        );
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn wrong_before_state_halts_in_debug() {
        let mut rec = recorder();
        let buffer = GpuResourceId::new(4);
        rec.begin_tracking_resource_state(buffer, ResourceState::COPY_DEST, false);
        rec.require_resource_state_from(
            buffer,
            ResourceState::SHADER_RESOURCE,
            ResourceState::UNORDERED_ACCESS,
        );
        // Release builds apply the transition from the observed state.
        rec.dispatch(1, 1, 1);
        let recorded = rec.finish().unwrap();
        assert_eq!(
            recorded.tracker.current_state(buffer),
            Some(ResourceState::UNORDERED_ACCESS)
        );
    }

    #[test]
    fn restore_initial_state_at_end() {
        let mut rec = recorder();
        let backbuffer = GpuResourceId::new(5);
        rec.begin_tracking_resource_state(backbuffer, ResourceState::PRESENT, true);
        rec.require_resource_state(backbuffer, ResourceState::RENDER_TARGET);
        rec.clear_render_target(AttachmentView::new(backbuffer, 0), [0.0; 4]);
        rec.restore_initial_states();
        let recorded = rec.finish().unwrap();
        assert_eq!(
            recorded.tracker.current_state(backbuffer),
            Some(ResourceState::PRESENT)
        );
    }
}

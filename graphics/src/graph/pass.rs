//! The render pass contract and per-pass resource declarations.

use crate::backend::QueueRole;
use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::types::GpuResourceId;

use super::{PassSetupContext, RenderContext};

/// Queue class a pass records for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassKind {
    #[default]
    Graphics,
    Compute,
}

impl PassKind {
    /// Queue the pass's commands are submitted to.
    ///
    /// Compute passes run on the graphics queue; async compute would need a
    /// cross-queue fence pair per pass boundary.
    pub fn queue(self) -> QueueRole {
        match self {
            Self::Graphics | Self::Compute => QueueRole::Graphics,
        }
    }
}

/// When a pass's command list reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubmissionMode {
    /// Batched with the rest of the frame at submit.
    #[default]
    Deferred,
    /// Submitted, together with everything recorded before it, at the end
    /// of the pass.
    Immediate,
}

/// One declared access of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceAccess {
    pub resource: GpuResourceId,
    pub state: ResourceState,
}

/// Resources a pass reads and writes, with the state each must be in.
///
/// The graph orders passes from these declarations and brings every listed
/// resource to its state before the pass's
/// [`on_prepare_resources`](RenderPass::on_prepare_resources).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassResourceDeclaration {
    pub reads: Vec<ResourceAccess>,
    pub writes: Vec<ResourceAccess>,
    /// Names of passes that must run first regardless of resources.
    pub after: Vec<&'static str>,
}

impl PassResourceDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, resource: GpuResourceId, state: ResourceState) -> Self {
        self.reads.push(ResourceAccess { resource, state });
        self
    }

    pub fn write(mut self, resource: GpuResourceId, state: ResourceState) -> Self {
        self.writes.push(ResourceAccess { resource, state });
        self
    }

    pub fn after(mut self, pass: &'static str) -> Self {
        self.after.push(pass);
        self
    }

    pub fn reads_resource(&self, resource: GpuResourceId) -> bool {
        self.reads.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: GpuResourceId) -> bool {
        self.writes.iter().any(|a| a.resource == resource)
    }

    /// Every access in declaration order, reads first.
    pub fn accesses(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.reads.iter().chain(self.writes.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

/// A unit of GPU work in the frame.
///
/// Hooks run in this order each frame:
///
/// 1. [`prepare_frame_resources`](Self::prepare_frame_resources) during frame
///    preparation, the only hook that may create resources or descriptors
/// 2. [`declare_resources`](Self::declare_resources) when the graph is compiled
/// 3. [`validate_config`](Self::validate_config); an error skips the frame
/// 4. [`rebuild_pipeline_state`](Self::rebuild_pipeline_state) when
///    [`need_rebuild_pipeline_state`](Self::need_rebuild_pipeline_state) says so
/// 5. [`on_prepare_resources`](Self::on_prepare_resources) then
///    [`on_execute`](Self::on_execute), recording into the pass's list
///
/// Render-time hooks only get shared access to the frame.
pub trait RenderPass: Send {
    /// Unique name; used for ordering constraints, diagnostics and debug
    /// markers.
    fn name(&self) -> &'static str;

    fn kind(&self) -> PassKind {
        PassKind::Graphics
    }

    fn submission_mode(&self) -> SubmissionMode {
        SubmissionMode::Deferred
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration;

    fn validate_config(&self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    /// Whether the pipeline this pass would build for `ctx` differs from the
    /// one it holds. The graph calls
    /// [`rebuild_pipeline_state`](Self::rebuild_pipeline_state) only when
    /// this returns `true`.
    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext<'_>) -> bool {
        let _ = ctx;
        false
    }

    /// Replace the pass's pipelines with ones built for `ctx`.
    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    /// Request any states beyond the declared ones.
    fn on_prepare_resources(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let _ = (ctx, recorder);
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_builders() {
        let depth = GpuResourceId::new(1);
        let color = GpuResourceId::new(2);
        let decl = PassResourceDeclaration::new()
            .read(depth, ResourceState::DEPTH_READ)
            .write(color, ResourceState::RENDER_TARGET)
            .after("DepthPrePass");
        assert!(decl.reads_resource(depth));
        assert!(!decl.writes_resource(depth));
        assert!(decl.writes_resource(color));
        assert_eq!(decl.accesses().count(), 2);
        assert_eq!(decl.after, vec!["DepthPrePass"]);
        assert!(PassResourceDeclaration::new().is_empty());
    }

    #[test]
    fn compute_records_on_graphics_queue() {
        assert_eq!(PassKind::Compute.queue(), QueueRole::Graphics);
        assert_eq!(SubmissionMode::default(), SubmissionMode::Deferred);
    }
}

//! Render graph infrastructure.
//!
//! The render graph owns the frame's passes and turns their resource
//! declarations into an execution order and a barrier plan:
//!
//! - Ordering via topological sort (Kahn's algorithm, insertion order breaks
//!   ties, so an unconstrained graph runs in the order passes were added)
//! - An edge from every earlier writer of a resource to each later reader or
//!   writer, and from every earlier reader to each later writer
//! - Explicit `after` constraints by pass name
//! - State transitions for every declared access, requested before the pass
//!   records
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Frame | [`FrameOrchestrator`](crate::frame::FrameOrchestrator) | Phase sequence, slots, submission |
//! | **Graph** | [`RenderGraph`] | Pass order and barriers (this module) |
//! | Pass | [`RenderPass`] | Records one unit of GPU work |
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new();
//! graph.add_pass(Box::new(DepthPrePass::new(DepthPrePassConfig::default())))?;
//! graph.add_pass(Box::new(ShaderPass::new(ShaderPassConfig::default())))?;
//! let compiled = graph.compile(&ctx)?;
//! let execution = graph.execute(&compiled, &ctx, &mut pool, &mut queue)?;
//! ```

mod context;
mod pass;

pub use context::{PassOutputs, PassSetupContext, RenderContext};
pub use pass::{PassKind, PassResourceDeclaration, RenderPass, ResourceAccess, SubmissionMode};

use crate::commands::{
    CommandList, CommandListPool, CommandQueue, CommandRecorder, RecorderDiagnostics,
    ResourceStateTracker,
};
use crate::error::GraphicsError;

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it, until a pass is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The frame's passes, in the order they were added.
#[derive(Default)]
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("passes", &self.pass_names())
            .finish()
    }
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass. Names must be unique within the graph.
    pub fn add_pass(&mut self, pass: Box<dyn RenderPass>) -> Result<PassHandle, GraphicsError> {
        if self.find(pass.name()).is_some() {
            return Err(GraphicsError::InvalidParameter(format!(
                "render graph already has a pass named '{}'",
                pass.name()
            )));
        }
        log::debug!("render graph: added pass '{}'", pass.name());
        self.passes.push(pass);
        Ok(PassHandle::new(self.passes.len() - 1))
    }

    /// Remove a pass by name. Handles of later passes shift down by one.
    pub fn remove_pass(&mut self, name: &str) -> Option<Box<dyn RenderPass>> {
        let handle = self.find(name)?;
        Some(self.passes.remove(handle.index()))
    }

    pub fn find(&self, name: &str) -> Option<PassHandle> {
        self.passes
            .iter()
            .position(|p| p.name() == name)
            .map(PassHandle::new)
    }

    pub fn pass(&self, handle: PassHandle) -> Option<&dyn RenderPass> {
        self.passes.get(handle.index()).map(|p| p.as_ref())
    }

    pub fn pass_mut(&mut self, handle: PassHandle) -> Option<&mut (dyn RenderPass + 'static)> {
        self.passes.get_mut(handle.index()).map(|p| p.as_mut())
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }

    /// Frame-preparation hook of every pass, in insertion order.
    pub fn prepare_frame_resources(
        &mut self,
        ctx: &mut PassSetupContext<'_>,
    ) -> Result<(), GraphicsError> {
        for pass in &mut self.passes {
            kiln_core::profile_scope!("prepare_frame_resources");
            pass.prepare_frame_resources(ctx)?;
        }
        Ok(())
    }

    /// Run every pass's `validate_config`. The first failure is returned.
    pub fn validate(&self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        for pass in &self.passes {
            pass.validate_config(ctx)?;
        }
        Ok(())
    }

    /// Collect declarations and sort the passes.
    pub fn compile(&self, ctx: &RenderContext<'_>) -> Result<CompiledGraph, GraphicsError> {
        let declarations: Vec<PassResourceDeclaration> =
            self.passes.iter().map(|p| p.declare_resources(ctx)).collect();
        let names = self.pass_names();
        let edges = dependency_edges(&names, &declarations);
        let order = topological_order(&names, &edges)?;
        log::trace!(
            "render graph order: {:?}",
            order.iter().map(|h| names[h.index()]).collect::<Vec<_>>()
        );
        Ok(CompiledGraph {
            order,
            edges,
            declarations,
        })
    }

    /// Record every pass in `compiled` order.
    ///
    /// Declared resources are tracked from their home state (see
    /// [`FrameTargets::home_state`](crate::frame::FrameTargets::home_state))
    /// and brought to their declared states before the pass's hooks run. The
    /// last list recorded restores every tracked resource to its home state.
    /// Immediate passes submit everything recorded up to and including
    /// themselves; the remaining lists are returned for the submit phase.
    pub fn execute(
        &mut self,
        compiled: &CompiledGraph,
        ctx: &RenderContext<'_>,
        pool: &mut CommandListPool,
        queue: &mut CommandQueue,
    ) -> Result<GraphExecution, GraphicsError> {
        let mut tracker = ResourceStateTracker::new();
        let mut execution = GraphExecution::default();

        for handle in &compiled.order {
            let Some(pass) = self.passes.get_mut(handle.index()) else {
                return Err(GraphicsError::InvalidHandle(format!(
                    "compiled graph refers to missing pass {}",
                    handle.index()
                )));
            };
            kiln_core::profile_scope!("render_pass");
            let name = pass.name();
            let mut recorder =
                CommandRecorder::begin(pool.acquire(), name, pass.kind().queue(), tracker)?;
            recorder.begin_event(name);
            for access in compiled.declarations[handle.index()].accesses() {
                if !recorder.is_tracked(access.resource) {
                    recorder.begin_tracking_resource_state(
                        access.resource,
                        ctx.targets.home_state(access.resource),
                        true,
                    );
                }
                recorder.require_resource_state(access.resource, access.state);
            }
            if pass.need_rebuild_pipeline_state(ctx) {
                log::debug!("{name}: rebuilding pipeline state");
                pass.rebuild_pipeline_state(ctx)?;
                execution.pipelines_rebuilt += 1;
            }
            pass.on_prepare_resources(ctx, &mut recorder)?;
            pass.on_execute(ctx, &mut recorder)?;
            recorder.end_event();

            let recorded = recorder.finish()?;
            tracker = recorded.tracker;
            execution.diagnostics.extend(recorded.diagnostics);
            execution.pending.push(recorded.list);
            execution.passes_recorded += 1;

            if pass.submission_mode() == SubmissionMode::Immediate {
                for list in execution.pending.drain(..) {
                    queue.submit(list)?;
                    execution.submitted += 1;
                }
            }
        }

        let mut recorder = CommandRecorder::begin(
            pool.acquire(),
            "restore states",
            queue.role(),
            tracker,
        )?;
        recorder.restore_initial_states();
        let recorded = recorder.finish()?;
        execution.diagnostics.extend(recorded.diagnostics);
        if recorded.list.is_empty() {
            pool.release(recorded.list);
        } else {
            execution.pending.push(recorded.list);
        }
        Ok(execution)
    }
}

/// A sorted graph with its declarations.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    order: Vec<PassHandle>,
    /// `(before, after)` pairs.
    edges: Vec<(PassHandle, PassHandle)>,
    declarations: Vec<PassResourceDeclaration>,
}

impl CompiledGraph {
    pub fn pass_order(&self) -> &[PassHandle] {
        &self.order
    }

    pub fn edges(&self) -> &[(PassHandle, PassHandle)] {
        &self.edges
    }

    pub fn declaration(&self, handle: PassHandle) -> Option<&PassResourceDeclaration> {
        self.declarations.get(handle.index())
    }

    /// The transitions each pass requests before recording, in execution order.
    pub fn barrier_plan(&self) -> Vec<(PassHandle, Vec<ResourceAccess>)> {
        self.order
            .iter()
            .map(|h| {
                let accesses = self.declarations[h.index()].accesses().copied().collect();
                (*h, accesses)
            })
            .collect()
    }
}

/// Result of [`RenderGraph::execute`].
#[derive(Debug, Default)]
pub struct GraphExecution {
    /// Closed lists awaiting the submit phase.
    pub pending: Vec<CommandList>,
    pub diagnostics: RecorderDiagnostics,
    pub passes_recorded: usize,
    /// Passes whose pipelines were rebuilt before recording.
    pub pipelines_rebuilt: usize,
    /// Lists submitted by immediate passes.
    pub submitted: usize,
}

fn dependency_edges(
    names: &[&'static str],
    declarations: &[PassResourceDeclaration],
) -> Vec<(PassHandle, PassHandle)> {
    let mut edges = Vec::new();
    let mut push = |edges: &mut Vec<(PassHandle, PassHandle)>, before: usize, after: usize| {
        let edge = (PassHandle::new(before), PassHandle::new(after));
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    };
    for (later, decl) in declarations.iter().enumerate() {
        for (earlier, prior) in declarations.iter().enumerate().take(later) {
            let conflicts = prior
                .writes
                .iter()
                .any(|w| decl.reads_resource(w.resource) || decl.writes_resource(w.resource))
                || prior.reads.iter().any(|r| decl.writes_resource(r.resource));
            if conflicts {
                push(&mut edges, earlier, later);
            }
        }
        for dependency in &decl.after {
            match names.iter().position(|n| n == dependency) {
                Some(before) if before != later => push(&mut edges, before, later),
                Some(_) => {}
                None => log::trace!("'{}' waits for absent pass '{dependency}'", names[later]),
            }
        }
    }
    edges
}

fn topological_order(
    names: &[&'static str],
    edges: &[(PassHandle, PassHandle)],
) -> Result<Vec<PassHandle>, GraphicsError> {
    let mut in_degree = vec![0usize; names.len()];
    for (_, after) in edges {
        in_degree[after.index()] += 1;
    }
    let mut done = vec![false; names.len()];
    let mut order = Vec::with_capacity(names.len());
    while order.len() < names.len() {
        let Some(next) = (0..names.len()).find(|i| !done[*i] && in_degree[*i] == 0) else {
            let stuck = (0..names.len()).find(|i| !done[*i]).unwrap_or_default();
            return Err(GraphicsError::CyclicDependency(names[stuck].to_string()));
        };
        done[next] = true;
        order.push(PassHandle::new(next));
        for (before, after) in edges {
            if before.index() == next {
                in_degree[after.index()] -= 1;
            }
        }
    }
    Ok(order)
}

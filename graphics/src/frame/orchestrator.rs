//! Drives one frame through its phases.

use std::time::Instant;

use crate::backend::QueueRole;
use crate::commands::RecorderDiagnostics;
use crate::error::{ErrorKind, GraphicsError};
use crate::gpu_types::EngineConstants;
use crate::graph::{PassOutputs, PassSetupContext, RenderContext, RenderGraph};
use crate::graphics::Graphics;
use crate::scene::SceneSnapshot;
use crate::scene_prep::ScenePrep;
use crate::types::{FRAMES_IN_FLIGHT, FenceValue, FrameSequenceNumber, FrameSlot, Viewport};
use crate::view::CameraResolver;

use super::PhaseId;

/// Phase callbacks for collaborators outside the renderer: UI, input,
/// gameplay.
pub trait FrameModule: Send {
    fn name(&self) -> &'static str;

    fn on_frame_start(&mut self, sequence: FrameSequenceNumber) {
        let _ = sequence;
    }

    fn on_input(&mut self, sequence: FrameSequenceNumber) {
        let _ = sequence;
    }

    fn on_simulation(&mut self, sequence: FrameSequenceNumber) {
        let _ = sequence;
    }

    fn on_frame_end(&mut self, sequence: FrameSequenceNumber) {
        let _ = sequence;
    }
}

/// What happened during one [`FrameOrchestrator::run_frame`].
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub sequence: FrameSequenceNumber,
    pub slot: FrameSlot,
    /// Phases that ran to completion, in order.
    pub phases: Vec<PhaseId>,
    pub draw_count: usize,
    /// A pass failed validation; nothing was recorded or presented.
    pub skipped: bool,
    pub diagnostics: RecorderDiagnostics,
    /// Command lists submitted to the graphics queue.
    pub submitted: usize,
    /// Passes that rebuilt their pipelines this frame.
    pub pipelines_rebuilt: usize,
    /// Value signaled for this frame's slot.
    pub fence: FenceValue,
}

impl FrameReport {
    pub fn completed(&self, phase: PhaseId) -> bool {
        self.phases.contains(&phase)
    }
}

/// Runs the fixed phase sequence over a [`Graphics`] and a [`RenderGraph`].
pub struct FrameOrchestrator {
    graphics: Graphics,
    graph: RenderGraph,
    scene_prep: ScenePrep,
    modules: Vec<Box<dyn FrameModule>>,
    outputs: PassOutputs,
    slot_fences: [FenceValue; FRAMES_IN_FLIGHT],
    /// Transfer fence the graphics queue last waited on.
    transfer_waited: FenceValue,
    next_sequence: FrameSequenceNumber,
    started: Instant,
}

impl std::fmt::Debug for FrameOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameOrchestrator")
            .field("graphics", &self.graphics)
            .field("graph", &self.graph)
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl FrameOrchestrator {
    pub fn new(graphics: Graphics, graph: RenderGraph) -> Self {
        Self {
            graphics,
            graph,
            scene_prep: ScenePrep::default(),
            modules: Vec::new(),
            outputs: PassOutputs::new(),
            slot_fences: [FenceValue::ZERO; FRAMES_IN_FLIGHT],
            transfer_waited: FenceValue::ZERO,
            next_sequence: FrameSequenceNumber::new(1),
            started: Instant::now(),
        }
    }

    pub fn with_scene_prep(mut self, scene_prep: ScenePrep) -> Self {
        self.scene_prep = scene_prep;
        self
    }

    pub fn add_module(&mut self, module: Box<dyn FrameModule>) {
        self.modules.push(module);
    }

    pub fn graphics(&self) -> &Graphics {
        &self.graphics
    }

    pub fn graphics_mut(&mut self) -> &mut Graphics {
        &mut self.graphics
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    pub fn scene_prep_mut(&mut self) -> &mut ScenePrep {
        &mut self.scene_prep
    }

    /// Cross-pass outputs published during the last frame.
    pub fn outputs(&self) -> &PassOutputs {
        &self.outputs
    }

    /// Sequence number the next [`run_frame`](Self::run_frame) will use.
    pub fn next_sequence(&self) -> FrameSequenceNumber {
        self.next_sequence
    }

    /// Fence last signaled for `slot`.
    pub fn slot_fence(&self, slot: FrameSlot) -> FenceValue {
        self.slot_fences[slot.index()]
    }

    /// Run one frame.
    ///
    /// A validation failure skips recording and presentation and is
    /// reported through [`FrameReport::skipped`]. Other errors propagate;
    /// [`GraphicsError::is_fatal`] tells whether the device must be rebuilt.
    pub fn run_frame(
        &mut self,
        scene: &SceneSnapshot,
        camera: &dyn CameraResolver,
    ) -> Result<FrameReport, GraphicsError> {
        kiln_core::profile_scope!("run_frame");
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        let slot = FrameSlot::for_sequence(sequence, self.graphics.config.frames_in_flight);
        let mut report = FrameReport {
            sequence,
            slot,
            ..Default::default()
        };

        {
            kiln_core::profile_scope!("kFrameStart");
            for module in &mut self.modules {
                module.on_frame_start(sequence);
            }
            report.phases.push(PhaseId::FrameStart);
        }
        {
            kiln_core::profile_scope!("kInput");
            for module in &mut self.modules {
                module.on_input(sequence);
            }
            report.phases.push(PhaseId::Input);
        }
        {
            kiln_core::profile_scope!("kSimulation");
            for module in &mut self.modules {
                module.on_simulation(sequence);
            }
            report.phases.push(PhaseId::Simulation);
        }

        match self.prepare(scene, camera, sequence, slot) {
            Ok(draws) => {
                report.draw_count = draws;
                report.phases.push(PhaseId::FrameGraphPrep);
            }
            Err(err) if err.kind() == ErrorKind::Validation => {
                log::warn!("frame {sequence} skipped during preparation: {err}");
                report.skipped = true;
            }
            Err(err) => return Err(err),
        }

        if !report.skipped {
            self.render(&mut report)?;
        }

        {
            kiln_core::profile_scope!("kFrameEnd");
            let retired = self.graphics.retire_completed();
            if retired > 0 {
                log::trace!("frame {sequence}: destroyed {retired} retired resource(s)");
            }
            for module in &mut self.modules {
                module.on_frame_end(sequence);
            }
            report.phases.push(PhaseId::FrameEnd);
        }
        kiln_core::frame_mark!();
        Ok(report)
    }

    /// `kFrameGraphPrep`. Returns the number of prepared draws.
    fn prepare(
        &mut self,
        scene: &SceneSnapshot,
        camera: &dyn CameraResolver,
        sequence: FrameSequenceNumber,
        slot: FrameSlot,
    ) -> Result<usize, GraphicsError> {
        kiln_core::profile_scope!("kFrameGraphPrep");
        let g = &mut self.graphics;

        let fence = self.slot_fences[slot.index()];
        if !g.queue.is_complete(fence) {
            log::trace!("frame {sequence}: waiting for {slot} (fence {fence})");
            if !g.queue.wait(fence, None) {
                return Err(GraphicsError::Timeout(fence.get()));
            }
        }
        g.retire_completed();
        let grown = g.registry.grow_between_frames();
        if grown > 0 {
            log::debug!("grew {grown} descriptor segment(s)");
        }

        g.uploads.on_frame_start(slot);
        g.coordinator.on_frame_start(&mut g.registry, g.uploads.tracker());
        self.outputs.reset();

        let (width, height) = g.targets.extent();
        let view = camera.resolve(Viewport::from_dimensions(width, height))?;
        let prepared = self.scene_prep.run(scene, &view, sequence);
        let draws = g
            .coordinator
            .prepare(
                &mut g.registry,
                &mut g.uploads,
                scene,
                &view,
                &prepared.items,
                sequence,
                slot,
            )?
            .len();

        let retire_after = g.queue.last_signaled();
        let (frame, textures) = g
            .coordinator
            .frame_and_textures()
            .ok_or_else(|| GraphicsError::InvalidState("no prepared frame".into()))?;
        let mut setup = PassSetupContext {
            frame,
            registry: &mut g.registry,
            uploads: &mut g.uploads,
            textures,
            targets: &g.targets,
            outputs: &self.outputs,
            retire_after,
        };
        self.graph.prepare_frame_resources(&mut setup)?;
        Ok(draws)
    }

    /// `kFrameGraphRender`, `kSubmit` and `kPresent`.
    fn render(&mut self, report: &mut FrameReport) -> Result<(), GraphicsError> {
        let g = &mut self.graphics;
        // Graphics work reads what the transfer queue wrote this frame.
        let uploaded = g.uploads.last_signaled();
        if uploaded > self.transfer_waited {
            g.queue.wait_for(QueueRole::Transfer, uploaded);
            self.transfer_waited = uploaded;
        }
        let frame = g
            .coordinator
            .prepared_frame()
            .ok_or_else(|| GraphicsError::InvalidState("no prepared frame".into()))?;
        let engine = EngineConstants {
            frame_index: report.sequence.get() as u32,
            time_seconds: self.started.elapsed().as_secs_f32(),
            frames_in_flight: g.config.frames_in_flight as u32,
            frame_slot: report.slot.get(),
        };
        let ctx = RenderContext {
            frame,
            registry: &g.registry,
            targets: &g.targets,
            pipelines: &g.pipelines,
            backend: g.backend.as_ref(),
            engine,
            outputs: &self.outputs,
        };

        let execution = {
            kiln_core::profile_scope!("kFrameGraphRender");
            if let Err(err) = self.graph.validate(&ctx) {
                log::warn!("frame {} skipped: {err}", report.sequence);
                report.skipped = true;
                return Ok(());
            }
            let compiled = match self.graph.compile(&ctx) {
                Ok(compiled) => compiled,
                Err(err) if err.kind() == ErrorKind::Validation => {
                    log::warn!("frame {} skipped: {err}", report.sequence);
                    report.skipped = true;
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            self.graph
                .execute(&compiled, &ctx, &mut g.lists, &mut g.queue)?
        };
        report.phases.push(PhaseId::FrameGraphRender);
        report.diagnostics = execution.diagnostics;
        report.submitted = execution.submitted;
        report.pipelines_rebuilt = execution.pipelines_rebuilt;

        {
            kiln_core::profile_scope!("kSubmit");
            for list in execution.pending {
                g.queue.submit(list)?;
                report.submitted += 1;
            }
            let fence = g.queue.signal();
            self.slot_fences[report.slot.index()] = fence;
            report.fence = fence;
            report.phases.push(PhaseId::Submit);
        }
        {
            kiln_core::profile_scope!("kPresent");
            g.backend.present(g.targets.backbuffer())?;
            report.phases.push(PhaseId::Present);
        }
        Ok(())
    }

    /// Block until every submitted frame has completed.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        self.graphics.wait_idle()
    }

    /// Take the graphics and graph back, after waiting for the GPU.
    pub fn into_parts(mut self) -> Result<(Graphics, RenderGraph), GraphicsError> {
        self.wait_idle()?;
        Ok((self.graphics, self.graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<&'static str>);

    impl FrameModule for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn on_input(&mut self, _sequence: FrameSequenceNumber) {
            self.0.push("input");
        }
    }

    #[test]
    fn module_hooks_default_to_nothing() {
        let mut module = Recorder::default();
        module.on_frame_start(FrameSequenceNumber::new(1));
        module.on_input(FrameSequenceNumber::new(1));
        module.on_frame_end(FrameSequenceNumber::new(1));
        assert_eq!(module.0, vec!["input"]);
    }

    #[test]
    fn report_lists_completed_phases() {
        let report = FrameReport {
            phases: vec![PhaseId::FrameStart, PhaseId::Input],
            ..Default::default()
        };
        assert!(report.completed(PhaseId::Input));
        assert!(!report.completed(PhaseId::Present));
    }
}

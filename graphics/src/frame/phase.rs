//! Frame phases.

use std::fmt;

/// The fixed phase sequence of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseId {
    FrameStart,
    Input,
    Simulation,
    FrameGraphPrep,
    FrameGraphRender,
    Submit,
    Present,
    FrameEnd,
}

impl PhaseId {
    /// Every phase, in execution order.
    pub const ALL: [PhaseId; 8] = [
        PhaseId::FrameStart,
        PhaseId::Input,
        PhaseId::Simulation,
        PhaseId::FrameGraphPrep,
        PhaseId::FrameGraphRender,
        PhaseId::Submit,
        PhaseId::Present,
        PhaseId::FrameEnd,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FrameStart => "kFrameStart",
            Self::Input => "kInput",
            Self::Simulation => "kSimulation",
            Self::FrameGraphPrep => "kFrameGraphPrep",
            Self::FrameGraphRender => "kFrameGraphRender",
            Self::Submit => "kSubmit",
            Self::Present => "kPresent",
            Self::FrameEnd => "kFrameEnd",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

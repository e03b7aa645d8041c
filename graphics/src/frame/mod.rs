//! Frame orchestration.
//!
//! A frame runs through the phases of [`PhaseId`] in order. Preparation
//! acquires the frame slot, settles uploads, prepares the scene and lets
//! every pass create what it needs; rendering validates, compiles and
//! records the graph; submit signals the slot's fence; present hands the
//! backbuffer to the display.

mod orchestrator;
mod phase;
mod targets;

pub use orchestrator::{FrameModule, FrameOrchestrator, FrameReport};
pub use phase::PhaseId;
pub use targets::{BACKBUFFER_FORMAT, DEPTH_FORMAT, FrameTargets, SCENE_COLOR_FORMAT};

pub(crate) use targets::{Target, create_target};

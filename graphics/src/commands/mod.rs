//! Command recording, state tracking and queue submission.
//!
//! Passes record through a [`CommandRecorder`], which owns a pooled
//! [`CommandList`] and the frame's [`ResourceStateTracker`]. Closed lists are
//! submitted to a [`CommandQueue`], which holds them until the queue's fence
//! passes the value they were signaled with.

mod command;
mod list;
mod queue;
mod recorder;
mod state;

pub use command::{AttachmentView, Command, TextureCopyRegion};
pub use list::{CommandList, CommandListPool, CommandListState};
pub use queue::{CommandQueue, Reclaimer};
pub use recorder::{
    CommandRecorder, DiagnosticKind, RecordedCommands, RecorderDiagnostic, RecorderDiagnostics,
};
pub use state::{ResourceBarrier, ResourceState, ResourceStateTracker};

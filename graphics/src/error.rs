//! Graphics error types.

use thiserror::Error;

use crate::bindless::{DescriptorVisibility, ResourceViewType};
use crate::commands::ResourceState;
use crate::types::GpuResourceId;

/// Broad classes of failure, used by the frame orchestrator to decide between
/// skipping the frame, retrying next frame and propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Pass misconfiguration; the frame is skipped.
    Validation,
    /// A single resource operation failed; a fallback binding is installed.
    Resource,
    /// Recorded state disagrees with an asserted state.
    StateTracking,
    /// Fence time-out or a busy queue; retried next frame.
    Transient,
    /// Device lost or out of memory; device-dependent objects must be rebuilt.
    Fatal,
    /// Misuse of the API (bad handle, wrong lifecycle state).
    Usage,
}

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphicsError {
    /// A render pass rejected its configuration.
    #[error("pass '{pass}' validation failed: {reason}")]
    Validation { pass: String, reason: String },

    /// A descriptor heap segment has no free slots.
    #[error("descriptor segment {view_type:?}/{visibility:?} is out of capacity")]
    OutOfCapacity {
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    },

    /// No staging memory could be obtained for an upload.
    #[error("staging memory unavailable")]
    StagingUnavailable,

    /// An upload could not be planned or recorded.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The tracked state of a resource disagrees with the caller's assertion.
    #[error("resource {resource} is in state {actual:?}, caller asserted {asserted:?}")]
    StateMismatch {
        resource: GpuResourceId,
        asserted: ResourceState,
        actual: ResourceState,
    },

    /// A fence wait exceeded its deadline.
    #[error("timed out waiting for fence value {0}")]
    Timeout(u64),

    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,

    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,

    /// A view or projection matrix contains NaN or infinity.
    #[error("view matrices must be finite")]
    NonFiniteMatrix,

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A handle does not refer to a live object.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The render graph contains a dependency cycle.
    #[error("render graph has a cycle through pass '{0}'")]
    CyclicDependency(String),
}

impl GraphicsError {
    pub fn validation(pass: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            pass: pass.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::CyclicDependency(_) => ErrorKind::Validation,
            Self::OutOfCapacity { .. } | Self::StagingUnavailable | Self::UploadFailed(_) => {
                ErrorKind::Resource
            }
            Self::StateMismatch { .. } => ErrorKind::StateTracking,
            Self::Timeout(_) => ErrorKind::Transient,
            Self::OutOfMemory | Self::DeviceLost => ErrorKind::Fatal,
            Self::NonFiniteMatrix
            | Self::InvalidParameter(_)
            | Self::InvalidHandle(_)
            | Self::InvalidState(_) => ErrorKind::Usage,
        }
    }

    /// True when the engine must tear down device-dependent objects.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

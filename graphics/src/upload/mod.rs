//! GPU upload pipeline.
//!
//! - [`UploadRequest`] describes bytes headed for a buffer range or a set of
//!   texture subresources
//! - [`BufferPlanner`] / [`TexturePlanner`] compute staging footprints under
//!   the [`UploadPolicy`](crate::config::UploadPolicy) alignments
//! - [`StagingProvider`] hands out frame-slot partitioned staging memory
//! - [`UploadTracker`] binds tickets to transfer fence values
//! - [`UploadCoordinator`] ties them together on the transfer queue

mod coordinator;
mod planner;
mod request;
mod staging;
mod tracker;

pub use coordinator::UploadCoordinator;
pub use planner::{
    BufferCopyRegion, BufferPlanner, BufferUploadPlan, SubresourceFootprint, TexturePlanner,
    TextureUploadPlan,
};
pub use request::{
    SubresourceRange, UploadDestination, UploadError, UploadKind, UploadRequest, UploadResult,
};
pub use staging::{RingStagingProvider, StagingAllocation, StagingProvider, StagingStats};
pub use tracker::{AwaitOutcome, UploadTicket, UploadTracker};

//! Renderer configuration.

use crate::bindless::HeapStrategy;
use crate::error::GraphicsError;
use crate::types::FRAMES_IN_FLIGHT;

/// How the dummy backend completes fences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceMode {
    /// Fences complete as soon as they are signaled.
    #[default]
    Immediate,
    /// Fences complete only when completed explicitly or by a blocking wait
    /// without a deadline.
    Manual,
}

/// Alignment and batching rules used by the upload planners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Row pitch alignment for texture footprints.
    pub row_pitch_alignment: u64,
    /// Alignment of each texture subresource inside the staging allocation.
    pub texture_placement_alignment: u64,
    /// Alignment of buffer copy offsets and sizes.
    pub buffer_copy_alignment: u64,
    /// Alignment of each buffer region inside the staging allocation.
    pub buffer_placement_alignment: u64,
    /// Upper bound on requests coalesced into one staging allocation.
    pub max_batch_requests: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            row_pitch_alignment: 256,
            texture_placement_alignment: 512,
            buffer_copy_alignment: 4,
            buffer_placement_alignment: 256,
            max_batch_requests: 256,
        }
    }
}

/// Ring staging buffer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagingConfig {
    /// Bytes per frame-slot partition before slack.
    pub partition_size: u64,
    /// Extra fraction of `partition_size` added to every partition.
    pub slack: f32,
    pub allow_growth: bool,
}

impl StagingConfig {
    pub fn partition_capacity(&self) -> u64 {
        (self.partition_size as f64 * (1.0 + self.slack.max(0.0) as f64)).ceil() as u64
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            partition_size: 4 * 1024 * 1024,
            slack: 0.25,
            allow_growth: true,
        }
    }
}

/// Top-level configuration for [`Graphics`](crate::Graphics).
#[derive(Debug, Clone)]
pub struct GraphicsConfig {
    pub frames_in_flight: usize,
    pub heap_strategy: HeapStrategy,
    pub upload_policy: UploadPolicy,
    pub staging: StagingConfig,
    pub fence_mode: FenceMode,
    /// Width and height of the frame targets.
    pub resolution: (u32, u32),
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: FRAMES_IN_FLIGHT,
            heap_strategy: HeapStrategy::default(),
            upload_policy: UploadPolicy::default(),
            staging: StagingConfig::default(),
            fence_mode: FenceMode::Immediate,
            resolution: (64, 64),
        }
    }
}

impl GraphicsConfig {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_heap_strategy(mut self, strategy: HeapStrategy) -> Self {
        self.heap_strategy = strategy;
        self
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.upload_policy = policy;
        self
    }

    pub fn with_staging(mut self, staging: StagingConfig) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_fence_mode(mut self, mode: FenceMode) -> Self {
        self.fence_mode = mode;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = (width, height);
        self
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > FRAMES_IN_FLIGHT {
            return Err(GraphicsError::InvalidParameter(format!(
                "frames_in_flight must be in 1..={FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(GraphicsError::InvalidParameter(
                "resolution must be non-zero".into(),
            ));
        }
        let policy = &self.upload_policy;
        for (name, value) in [
            ("row_pitch_alignment", policy.row_pitch_alignment),
            ("texture_placement_alignment", policy.texture_placement_alignment),
            ("buffer_copy_alignment", policy.buffer_copy_alignment),
            ("buffer_placement_alignment", policy.buffer_placement_alignment),
        ] {
            if !value.is_power_of_two() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{name} must be a power of two, got {value}"
                )));
            }
        }
        if self.staging.partition_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "staging partition_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GraphicsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload_policy.row_pitch_alignment, 256);
        assert_eq!(config.upload_policy.texture_placement_alignment, 512);
    }

    #[test]
    fn rejects_too_many_frames() {
        let config = GraphicsConfig::default().with_frames_in_flight(FRAMES_IN_FLIGHT + 1);
        assert!(config.validate().is_err());
        let config = GraphicsConfig::default().with_frames_in_flight(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partition_capacity_includes_slack() {
        let staging = StagingConfig {
            partition_size: 1000,
            slack: 0.5,
            allow_growth: false,
        };
        assert_eq!(staging.partition_capacity(), 1500);
    }
}

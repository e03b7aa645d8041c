//! Clustered light culling.
//!
//! Splits the screen into `tile_size_px` tiles and, with more than one depth
//! slice, the view depth range into logarithmic slices. The kernel writes one
//! [`ClusterRecord`] per cluster plus a flat list of light indices that the
//! forward and transparent passes read through the environment block.

use crate::backend::DescriptorView;
use crate::bindless::DescriptorVisibility;
use crate::commands::{CommandRecorder, ResourceState};
use crate::error::GraphicsError;
use crate::gpu_types::{
    ClusterRecord, EnvironmentDynamicData, INVALID_BINDLESS_SLOT, LightCullingConstants,
    RootConstantSlot,
};
use crate::graph::{
    PassKind, PassResourceDeclaration, PassSetupContext, RenderContext, RenderPass,
    SubmissionMode,
};
use crate::pipeline_state::{ComputePipelineDesc, PipelineDesc};
use crate::resources::{FrameStructuredBuffer, ResourceRegistry};
use crate::shader::{ComputeProgram, PermutationSet, ShaderPermutation};
use crate::types::{BufferDescriptor, BufferUsage, FenceValue, GpuResourceId, ShaderVisibleIndex};

use super::{CachedPipeline, bind_frame_constants};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightCullingPassConfig {
    pub tile_size_px: u32,
    /// 1 bins per screen tile using the depth buffer's bounds; more bins into
    /// log-z slices of the view depth range.
    pub depth_slices: u32,
    pub max_lights_per_cluster: u32,
}

impl Default for LightCullingPassConfig {
    fn default() -> Self {
        Self {
            tile_size_px: 16,
            depth_slices: 1,
            max_lights_per_cluster: 64,
        }
    }
}

impl LightCullingPassConfig {
    /// Cluster grid dimensions for a `width` x `height` viewport.
    pub fn grid_dimensions(&self, width: u32, height: u32) -> [u32; 3] {
        let tile = self.tile_size_px.max(1);
        [
            width.div_ceil(tile).max(1),
            height.div_ceil(tile).max(1),
            self.depth_slices.max(1),
        ]
    }
}

/// Cluster buffers and binning parameters, published during setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCullingOutput {
    pub dimensions: [u32; 3],
    pub tile_size_px: u32,
    pub grid: GpuResourceId,
    pub index_list: GpuResourceId,
    pub grid_slot: ShaderVisibleIndex,
    pub index_list_slot: ShaderVisibleIndex,
    pub z_scale: f32,
    pub z_bias: f32,
}

impl LightCullingOutput {
    pub fn cluster_count(&self) -> u32 {
        self.dimensions.iter().product()
    }

    /// Fill the cluster fields of the environment block.
    pub fn apply(&self, env: &mut EnvironmentDynamicData) {
        env.cluster_grid_slot = self.grid_slot.index();
        env.cluster_index_list_slot = self.index_list_slot.index();
        [env.cluster_dim_x, env.cluster_dim_y, env.cluster_dim_z] = self.dimensions;
        env.tile_size_px = self.tile_size_px;
        env.z_scale = self.z_scale;
        env.z_bias = self.z_bias;
    }
}

/// `slice = log2(z) * scale + bias` maps `near..far` onto `0..slices`.
fn z_binning(near: f32, far: f32, slices: u32) -> (f32, f32) {
    if slices <= 1 || near <= 0.0 || far <= near {
        return (0.0, 0.0);
    }
    let ratio = (far / near).log2();
    let scale = slices as f32 / ratio;
    (scale, -(slices as f32) * near.log2() / ratio)
}

#[derive(Debug)]
struct ClusterBuffers {
    dimensions: [u32; 3],
    max_lights_per_cluster: u32,
    grid: GpuResourceId,
    index_list: GpuResourceId,
    grid_slot: ShaderVisibleIndex,
    index_list_slot: ShaderVisibleIndex,
}

impl ClusterBuffers {
    fn index_capacity(&self) -> u32 {
        self.dimensions.iter().product::<u32>() * self.max_lights_per_cluster
    }

    fn create(
        registry: &mut ResourceRegistry,
        dimensions: [u32; 3],
        max_lights_per_cluster: u32,
    ) -> Result<Self, GraphicsError> {
        let clusters: u32 = dimensions.iter().product();
        let capacity = clusters * max_lights_per_cluster;
        let grid = registry.create_buffer(
            BufferDescriptor::new(
                clusters as u64 * std::mem::size_of::<ClusterRecord>() as u64,
                BufferUsage::STORAGE,
            )
            .with_label("cluster grid"),
        )?;
        let index_list = registry.create_buffer(
            BufferDescriptor::new(capacity as u64 * 4, BufferUsage::STORAGE)
                .with_label("cluster light indices"),
        )?;
        let grid_slot = registry
            .get_or_create_view(
                grid,
                DescriptorView::RwStructuredBuffer {
                    buffer: grid,
                    offset: 0,
                    stride: std::mem::size_of::<ClusterRecord>() as u32,
                    count: clusters,
                },
                DescriptorVisibility::ShaderVisible,
            )?
            .index;
        let index_list_slot = registry
            .get_or_create_view(
                index_list,
                DescriptorView::RwStructuredBuffer {
                    buffer: index_list,
                    offset: 0,
                    stride: 4,
                    count: capacity,
                },
                DescriptorVisibility::ShaderVisible,
            )?
            .index;
        log::debug!("light culling: cluster grid {dimensions:?}, {capacity} index slots");
        Ok(Self {
            dimensions,
            max_lights_per_cluster,
            grid,
            index_list,
            grid_slot,
            index_list_slot,
        })
    }

    fn release(self, registry: &mut ResourceRegistry, retire_after: FenceValue) {
        registry.release(self.grid, retire_after);
        registry.release(self.index_list, retire_after);
    }
}

/// Compute pass binning positional lights into the cluster grid.
#[derive(Debug)]
pub struct LightCullingPass {
    config: LightCullingPassConfig,
    buffers: Option<ClusterBuffers>,
    constants: FrameStructuredBuffer<LightCullingConstants>,
    constants_index: ShaderVisibleIndex,
    pipeline: CachedPipeline,
}

impl LightCullingPass {
    pub const NAME: &'static str = "LightCullingPass";

    pub fn new(config: LightCullingPassConfig) -> Self {
        Self {
            config,
            buffers: None,
            constants: FrameStructuredBuffer::new("light culling constants"),
            constants_index: ShaderVisibleIndex::INVALID,
            pipeline: CachedPipeline::default(),
        }
    }

    pub fn config(&self) -> &LightCullingPassConfig {
        &self.config
    }

    fn clustered(&self) -> bool {
        self.config.depth_slices > 1
    }

    fn pipeline_desc(&self) -> PipelineDesc {
        PipelineDesc::Compute(
            ComputePipelineDesc::new("light culling", ComputeProgram::LightCulling).with_permutations(
                PermutationSet::EMPTY.with_if(ShaderPermutation::ClusterDepthSlices, self.clustered()),
            ),
        )
    }
}

impl Default for LightCullingPass {
    fn default() -> Self {
        Self::new(LightCullingPassConfig::default())
    }
}

impl RenderPass for LightCullingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kind(&self) -> PassKind {
        PassKind::Compute
    }

    /// Submitted as soon as it is recorded, ahead of the shading passes.
    fn submission_mode(&self) -> SubmissionMode {
        SubmissionMode::Immediate
    }

    fn prepare_frame_resources(&mut self, ctx: &mut PassSetupContext<'_>) -> Result<(), GraphicsError> {
        let viewport = *ctx.view().viewport();
        let dimensions = self
            .config
            .grid_dimensions(viewport.width as u32, viewport.height as u32);
        let stale = self.buffers.as_ref().is_some_and(|b| {
            b.dimensions != dimensions || b.max_lights_per_cluster != self.config.max_lights_per_cluster
        });
        if stale {
            if let Some(old) = self.buffers.take() {
                old.release(ctx.registry, ctx.retire_after);
            }
        }
        let buffers = match self.buffers.take() {
            Some(buffers) => buffers,
            None => ClusterBuffers::create(ctx.registry, dimensions, self.config.max_lights_per_cluster)?,
        };

        let depth_texture_slot = if self.clustered() {
            INVALID_BINDLESS_SLOT
        } else {
            ctx.targets.depth_srv().index()
        };
        let slot = ctx.slot();
        self.constants_index = self.constants.write(
            ctx.registry,
            slot,
            &[LightCullingConstants {
                depth_texture_slot,
                max_lights_per_cluster: self.config.max_lights_per_cluster,
                index_capacity: buffers.index_capacity(),
                _pad: 0,
            }],
        )?;

        let view = ctx.view();
        let (z_scale, z_bias) = z_binning(view.near_plane(), view.far_plane(), dimensions[2]);
        ctx.register_pass_output(LightCullingOutput {
            dimensions,
            tile_size_px: self.config.tile_size_px,
            grid: buffers.grid,
            index_list: buffers.index_list,
            grid_slot: buffers.grid_slot,
            index_list_slot: buffers.index_list_slot,
            z_scale,
            z_bias,
        });
        self.buffers = Some(buffers);
        Ok(())
    }

    fn declare_resources(&self, ctx: &RenderContext<'_>) -> PassResourceDeclaration {
        let mut decl = PassResourceDeclaration::new();
        if !self.clustered() {
            decl = decl.read(ctx.targets.depth(), ResourceState::SHADER_RESOURCE);
        }
        if let Some(buffers) = &self.buffers {
            decl = decl
                .write(buffers.grid, ResourceState::UNORDERED_ACCESS)
                .write(buffers.index_list, ResourceState::UNORDERED_ACCESS);
        }
        decl
    }

    fn validate_config(&self, _ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        if self.config.tile_size_px == 0 {
            return Err(GraphicsError::validation(Self::NAME, "tile size must be non-zero"));
        }
        if self.config.max_lights_per_cluster == 0 {
            return Err(GraphicsError::validation(
                Self::NAME,
                "max_lights_per_cluster must be non-zero",
            ));
        }
        if self.buffers.is_none() {
            return Err(GraphicsError::validation(Self::NAME, "cluster buffers were not prepared"));
        }
        Ok(())
    }

    fn need_rebuild_pipeline_state(&self, _ctx: &RenderContext<'_>) -> bool {
        self.pipeline.needs_rebuild(&self.pipeline_desc())
    }

    fn rebuild_pipeline_state(&mut self, ctx: &RenderContext<'_>) -> Result<(), GraphicsError> {
        let desc = self.pipeline_desc();
        self.pipeline.ensure(ctx, &desc)?;
        Ok(())
    }

    fn on_execute(
        &mut self,
        ctx: &RenderContext<'_>,
        recorder: &mut CommandRecorder,
    ) -> Result<(), GraphicsError> {
        let Some(buffers) = &self.buffers else {
            return Ok(());
        };
        bind_frame_constants(ctx, recorder);
        recorder.set_pipeline(self.pipeline.handle());
        recorder.set_root_constant(RootConstantSlot::PassConstants, self.constants_index.index());
        let [x, y, z] = buffers.dimensions;
        recorder.dispatch(x, y, z);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_partial_tiles() {
        let config = LightCullingPassConfig::default();
        assert_eq!(config.grid_dimensions(64, 64), [4, 4, 1]);
        assert_eq!(config.grid_dimensions(65, 1), [5, 1, 1]);
        let sliced = LightCullingPassConfig {
            depth_slices: 8,
            ..config
        };
        assert_eq!(sliced.grid_dimensions(16, 16), [1, 1, 8]);
    }

    #[test]
    fn z_binning_maps_near_and_far_to_slice_bounds() {
        let (scale, bias) = z_binning(1.0, 256.0, 8);
        let slice = |z: f32| z.log2() * scale + bias;
        assert!(slice(1.0).abs() < 1e-5);
        assert!((slice(256.0) - 8.0).abs() < 1e-4);
        assert!((slice(4.0) - 2.0).abs() < 1e-4);
        assert_eq!(z_binning(1.0, 256.0, 1), (0.0, 0.0));
    }

    #[test]
    fn output_fills_the_environment_block() {
        let output = LightCullingOutput {
            dimensions: [4, 2, 8],
            tile_size_px: 16,
            grid: GpuResourceId::new(1),
            index_list: GpuResourceId::new(2),
            grid_slot: ShaderVisibleIndex::new(10),
            index_list_slot: ShaderVisibleIndex::new(11),
            z_scale: 1.0,
            z_bias: -0.5,
        };
        let mut env = EnvironmentDynamicData::default();
        output.apply(&mut env);
        assert_eq!(env.cluster_grid_slot, 10);
        assert_eq!(env.cluster_index_list_slot, 11);
        assert_eq!([env.cluster_dim_x, env.cluster_dim_y, env.cluster_dim_z], [4, 2, 8]);
        assert_eq!(output.cluster_count(), 64);
    }
}

//! Dummy GPU backend for testing and development.
//!
//! Resources live in CPU memory and command lists execute synchronously when
//! submitted. Graphics programs run on a small reference rasterizer and
//! compute programs on reference kernels, so pixel-level behavior can be
//! tested without GPU hardware.
//!
//! Fences follow [`FenceMode`]: in `Immediate` mode a signaled value
//! completes at once; in `Manual` mode it stays pending until
//! [`DummyBackend::complete_fences`] is called or someone blocks on it
//! without a deadline.

mod compute;
mod memory;
mod programs;
mod raster;

use std::collections::HashMap;
use std::time::Duration;

use bytemuck::Pod;
use parking_lot::{Condvar, Mutex};

use self::memory::{BufferStore, TextureStore, decode_texel};
use super::{DescriptorView, GpuBackend, QueueRole};
use crate::commands::{AttachmentView, Command};
use crate::config::FenceMode;
use crate::error::GraphicsError;
use crate::gpu_types::{ConstantRegister, RootConstantSlot};
use crate::pipeline_state::PipelineDesc;
use crate::types::{
    BufferDescriptor, DrawIndirectArgs, FenceValue, GpuResourceId, PipelineHandle,
    SamplerDescriptor, ScissorRect, ShaderVisibleIndex, TextureDescriptor, Viewport,
};

/// Resources, pipelines and descriptors of the dummy device.
#[derive(Debug, Default)]
pub(super) struct DeviceState {
    next_resource: u32,
    buffers: HashMap<GpuResourceId, BufferStore>,
    textures: HashMap<GpuResourceId, TextureStore>,
    pipelines: Vec<PipelineDesc>,
    descriptors: HashMap<u32, DescriptorView>,
    presented_frames: u64,
    last_presented: Option<GpuResourceId>,
    fragments_written: u64,
    queue_waits: Vec<QueueWait>,
    /// Names of top-level debug events in execution order.
    executed_events: Vec<String>,
}

impl DeviceState {
    fn buffer(&self, id: GpuResourceId) -> Result<&BufferStore, GraphicsError> {
        self.buffers
            .get(&id)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {id}")))
    }

    fn buffer_mut(&mut self, id: GpuResourceId) -> Result<&mut BufferStore, GraphicsError> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {id}")))
    }

    fn texture_mut(&mut self, id: GpuResourceId) -> Result<&mut TextureStore, GraphicsError> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("texture {id}")))
    }

    pub(super) fn descriptor(&self, slot: u32) -> Option<&DescriptorView> {
        self.descriptors.get(&slot)
    }

    /// Byte offset and stride of element `index` behind a buffer descriptor.
    fn element_location(&self, slot: u32, index: u32, size: usize) -> Option<(GpuResourceId, u64)> {
        match *self.descriptor(slot)? {
            DescriptorView::StructuredBuffer {
                buffer,
                offset,
                stride,
                count,
            }
            | DescriptorView::RwStructuredBuffer {
                buffer,
                offset,
                stride,
                count,
            } => {
                if index >= count || (stride as usize) < size {
                    return None;
                }
                Some((buffer, offset + index as u64 * stride as u64))
            }
            DescriptorView::RawBuffer {
                buffer,
                offset,
                size: view_size,
            }
            | DescriptorView::ConstantBuffer {
                buffer,
                offset,
                size: view_size,
            } => {
                let at = index as u64 * size as u64;
                (at + size as u64 <= view_size).then_some((buffer, offset + at))
            }
            _ => None,
        }
    }

    /// Read element `index` of the buffer bound at `slot`, as a shader would.
    pub(super) fn element<T: Pod>(&self, slot: u32, index: u32) -> Option<T> {
        let (buffer, offset) = self.element_location(slot, index, std::mem::size_of::<T>())?;
        self.buffers.get(&buffer)?.read_pod(offset)
    }

    /// Write element `index` of the writable buffer bound at `slot`.
    pub(super) fn write_element<T: Pod>(&mut self, slot: u32, index: u32, value: &T) -> bool {
        if !matches!(
            self.descriptor(slot),
            Some(DescriptorView::RwStructuredBuffer { .. })
        ) {
            return false;
        }
        let Some((buffer, offset)) = self.element_location(slot, index, std::mem::size_of::<T>())
        else {
            return false;
        };
        self.buffers
            .get_mut(&buffer)
            .is_some_and(|b| b.write(offset, bytemuck::bytes_of(value)).is_ok())
    }

    pub(super) fn sample_2d(
        &self,
        slot: u32,
        u: f32,
        v: f32,
        sampler: &SamplerDescriptor,
    ) -> Option<[f32; 4]> {
        match *self.descriptor(slot)? {
            DescriptorView::Texture2D { texture } | DescriptorView::RwTexture2D { texture } => {
                Some(self.textures.get(&texture)?.sample(0, u, v, sampler))
            }
            _ => None,
        }
    }

    pub(super) fn sample_cube(
        &self,
        slot: u32,
        dir: [f32; 3],
        sampler: &SamplerDescriptor,
    ) -> Option<[f32; 4]> {
        match *self.descriptor(slot)? {
            DescriptorView::TextureCube { texture } => {
                Some(self.textures.get(&texture)?.sample_cube(dir, sampler))
            }
            _ => None,
        }
    }

    /// Texel fetch from the texture bound at `slot`.
    pub(super) fn load_texel(&self, slot: u32, x: u32, y: u32) -> Option<[f32; 4]> {
        match *self.descriptor(slot)? {
            DescriptorView::Texture2D { texture } | DescriptorView::RwTexture2D { texture } => {
                Some(self.textures.get(&texture)?.texel(0, 0, x, y))
            }
            _ => None,
        }
    }

    pub(super) fn texture_size(&self, slot: u32) -> Option<(u32, u32)> {
        match *self.descriptor(slot)? {
            DescriptorView::Texture2D { texture } | DescriptorView::RwTexture2D { texture } => {
                self.textures.get(&texture).map(|t| (t.width(), t.height()))
            }
            _ => None,
        }
    }

    fn pipeline(&self, handle: PipelineHandle) -> Result<&PipelineDesc, GraphicsError> {
        self.pipelines
            .get(handle.index() as usize)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("pipeline {handle}")))
    }

    /// Check that an attachment's descriptor views its resource.
    fn resolve_attachment(
        &self,
        view: AttachmentView,
        depth: bool,
    ) -> Result<GpuResourceId, GraphicsError> {
        let matches = match self.descriptor(view.descriptor) {
            Some(DescriptorView::RenderTarget { texture }) if !depth => *texture == view.resource,
            Some(DescriptorView::DepthStencil { texture }) if depth => *texture == view.resource,
            _ => false,
        };
        if !matches {
            return Err(GraphicsError::InvalidHandle(format!(
                "descriptor {} does not view {} as {}",
                view.descriptor,
                view.resource,
                if depth { "depth-stencil" } else { "render target" }
            )));
        }
        Ok(view.resource)
    }
}

/// Bound state while executing one command list.
#[derive(Debug, Default)]
pub(super) struct ExecContext {
    pub pipeline: Option<PipelineHandle>,
    pub color: Option<AttachmentView>,
    pub depth: Option<AttachmentView>,
    pub viewport: Option<Viewport>,
    pub scissor: Option<ScissorRect>,
    pub constants: HashMap<ConstantRegister, Vec<u8>>,
    pub root_constants: HashMap<RootConstantSlot, u32>,
    event_depth: u32,
}

impl ExecContext {
    pub fn constants<T: Pod + Default>(&self, register: ConstantRegister) -> T {
        self.constants
            .get(&register)
            .filter(|bytes| bytes.len() >= std::mem::size_of::<T>())
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()]))
            .unwrap_or_default()
    }

    pub fn root_constant(&self, slot: RootConstantSlot) -> u32 {
        self.root_constants.get(&slot).copied().unwrap_or(u32::MAX)
    }
}

/// A recorded GPU-side wait of one queue on another queue's fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueWait {
    pub queue: QueueRole,
    pub waits_on: QueueRole,
    pub value: FenceValue,
}

#[derive(Debug, Clone, Copy, Default)]
struct Timeline {
    signaled: FenceValue,
    completed: FenceValue,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    fence_mode: FenceMode,
    state: Mutex<DeviceState>,
    timelines: Mutex<[Timeline; 3]>,
    fence_changed: Condvar,
}

impl DummyBackend {
    pub fn new(fence_mode: FenceMode) -> Self {
        log::info!("DummyBackend: created ({fence_mode:?} fences)");
        Self {
            fence_mode,
            state: Mutex::new(DeviceState::default()),
            timelines: Mutex::new([Timeline::default(); 3]),
            fence_changed: Condvar::new(),
        }
    }

    pub fn fence_mode(&self) -> FenceMode {
        self.fence_mode
    }

    /// Complete every signaled value up to `value` on `queue`.
    pub fn complete_fences(&self, queue: QueueRole, value: FenceValue) {
        let mut timelines = self.timelines.lock();
        let timeline = &mut timelines[queue.index()];
        let target = value.min(timeline.signaled);
        if target > timeline.completed {
            timeline.completed = target;
            log::trace!("DummyBackend: {queue:?} completed {target}");
        }
        self.fence_changed.notify_all();
    }

    /// Complete every signaled value on every queue.
    pub fn complete_all(&self) {
        let mut timelines = self.timelines.lock();
        for timeline in timelines.iter_mut() {
            timeline.completed = timeline.signaled;
        }
        self.fence_changed.notify_all();
    }

    /// Number of `present` calls so far.
    pub fn presented_frames(&self) -> u64 {
        self.state.lock().presented_frames
    }

    pub fn last_presented(&self) -> Option<GpuResourceId> {
        self.state.lock().last_presented
    }

    /// Fragments written by all draws so far.
    pub fn fragments_written(&self) -> u64 {
        self.state.lock().fragments_written
    }

    /// Top-level debug events of every executed list, in execution order.
    pub fn executed_events(&self) -> Vec<String> {
        self.state.lock().executed_events.clone()
    }

    /// Every queue wait issued so far, in order.
    pub fn queue_waits(&self) -> Vec<QueueWait> {
        self.state.lock().queue_waits.clone()
    }

    pub fn descriptor(&self, heap_index: u32) -> Option<DescriptorView> {
        self.state.lock().descriptors.get(&heap_index).copied()
    }

    pub fn live_resources(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len() + state.textures.len()
    }

    fn allocate_id(state: &mut DeviceState) -> GpuResourceId {
        let id = GpuResourceId::new(state.next_resource);
        state.next_resource += 1;
        id
    }

    fn execute_command(
        state: &mut DeviceState,
        ctx: &mut ExecContext,
        command: &Command,
    ) -> Result<(), GraphicsError> {
        match command {
            Command::Barrier(barriers) => {
                for barrier in barriers {
                    if !state.buffers.contains_key(&barrier.resource)
                        && !state.textures.contains_key(&barrier.resource)
                    {
                        return Err(GraphicsError::InvalidHandle(format!(
                            "barrier on unknown resource {}",
                            barrier.resource
                        )));
                    }
                }
            }
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let bytes = state.buffer(*src)?.read(*src_offset, *size)?.to_vec();
                state.buffer_mut(*dst)?.write(*dst_offset, &bytes)?;
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                region,
            } => {
                let format = state
                    .textures
                    .get(dst)
                    .map(|t| t.desc.format)
                    .ok_or_else(|| GraphicsError::InvalidHandle(format!("texture {dst}")))?;
                let block = format.block_size() as u64;
                let rows = region.extent.height as u64;
                let needed = row_pitch * rows.saturating_sub(1) + region.extent.width as u64 * block;
                let bytes = state.buffer(*src)?.read(*src_offset, needed)?.to_vec();
                let texture = state.texture_mut(*dst)?;
                for y in 0..region.extent.height {
                    for x in 0..region.extent.width {
                        let at = (y as u64 * row_pitch + x as u64 * block) as usize;
                        let texel = decode_texel(format, &bytes[at..at + block as usize]);
                        texture.set_texel(region.mip_level, region.array_layer, x, y, texel);
                    }
                }
            }
            Command::UpdateBuffer { dst, offset, data } => {
                state.buffer_mut(*dst)?.write(*offset, data)?;
            }
            Command::ClearRenderTarget { target, color } => {
                let id = state.resolve_attachment(*target, false)?;
                state.texture_mut(id)?.fill(*color);
            }
            Command::ClearDepth { target, depth } => {
                let id = state.resolve_attachment(*target, true)?;
                state.texture_mut(id)?.fill([*depth, 0.0, 0.0, 1.0]);
            }
            Command::ClearUav { resource, value } => {
                let buffer = state.buffer_mut(*resource)?;
                for chunk in buffer.data.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
            Command::SetPipeline(handle) => {
                state.pipeline(*handle)?;
                ctx.pipeline = Some(*handle);
            }
            Command::SetRenderTargets { color, depth } => {
                if let Some(view) = color {
                    state.resolve_attachment(*view, false)?;
                }
                if let Some(view) = depth {
                    state.resolve_attachment(*view, true)?;
                }
                ctx.color = *color;
                ctx.depth = *depth;
            }
            Command::SetViewport(viewport) => ctx.viewport = Some(*viewport),
            Command::SetScissor(scissor) => ctx.scissor = Some(*scissor),
            Command::SetConstants { register, data } => {
                ctx.constants.insert(*register, data.clone());
            }
            Command::SetRootConstant { slot, value } => {
                ctx.root_constants.insert(*slot, *value);
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                ..
            } => {
                if *instance_count > 0 {
                    let written = programs::draw(state, ctx, *first_vertex, *vertex_count)?;
                    state.fragments_written += written;
                }
            }
            Command::DrawIndirect { args, offset } => {
                let args: DrawIndirectArgs = state
                    .buffer(*args)?
                    .read_pod(*offset)
                    .ok_or_else(|| GraphicsError::InvalidParameter("indirect args out of range".into()))?;
                if args.instance_count > 0 && args.vertex_count > 0 {
                    let written =
                        programs::draw(state, ctx, args.first_vertex, args.vertex_count)?;
                    state.fragments_written += written;
                }
            }
            Command::Dispatch { x, y, z } => compute::dispatch(state, ctx, [*x, *y, *z])?,
            Command::BeginEvent(name) => {
                if ctx.event_depth == 0 {
                    state.executed_events.push(name.to_string());
                }
                ctx.event_depth += 1;
                log::trace!("DummyBackend: begin event '{name}'");
            }
            Command::EndEvent => {
                if ctx.event_depth == 0 {
                    log::warn!("DummyBackend: unbalanced end_event");
                }
                ctx.event_depth = ctx.event_depth.saturating_sub(1);
            }
        }
        Ok(())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(FenceMode::Immediate)
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuResourceId, GraphicsError> {
        let mut state = self.state.lock();
        let id = Self::allocate_id(&mut state);
        log::trace!(
            "DummyBackend: creating buffer {:?} ({id}, size: {})",
            descriptor.label,
            descriptor.size
        );
        state.buffers.insert(id, BufferStore::new(descriptor.clone()));
        Ok(id)
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuResourceId, GraphicsError> {
        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero extent",
                descriptor.label
            )));
        }
        let mut state = self.state.lock();
        let id = Self::allocate_id(&mut state);
        log::trace!(
            "DummyBackend: creating texture {:?} ({id}, {}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.array_layer_count
        );
        state.textures.insert(id, TextureStore::new(descriptor.clone()));
        Ok(id)
    }

    fn create_pipeline(&self, descriptor: &PipelineDesc) -> Result<PipelineHandle, GraphicsError> {
        let mut state = self.state.lock();
        let handle = PipelineHandle::new(state.pipelines.len() as u32);
        state.pipelines.push(descriptor.clone());
        Ok(handle)
    }

    fn destroy_resource(&self, resource: GpuResourceId) {
        let mut state = self.state.lock();
        let removed = state.buffers.remove(&resource).is_some()
            || state.textures.remove(&resource).is_some();
        if !removed {
            log::warn!("DummyBackend: destroying unknown resource {resource}");
        }
    }

    fn resource_exists(&self, resource: GpuResourceId) -> bool {
        let state = self.state.lock();
        state.buffers.contains_key(&resource) || state.textures.contains_key(&resource)
    }

    fn write_buffer(
        &self,
        buffer: GpuResourceId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let store = state.buffer_mut(buffer)?;
        if !store.desc.is_host_visible() {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} is not host visible",
                store.desc.label
            )));
        }
        store.write(offset, data)
    }

    fn read_buffer(
        &self,
        buffer: GpuResourceId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        Ok(state.buffer(buffer)?.read(offset, size)?.to_vec())
    }

    fn read_texel(&self, texture: GpuResourceId, x: u32, y: u32) -> Result<[f32; 4], GraphicsError> {
        let state = self.state.lock();
        let store = state
            .textures
            .get(&texture)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("texture {texture}")))?;
        Ok(store.texel(0, 0, x, y))
    }

    fn write_descriptor(&self, heap_index: u32, view: DescriptorView) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if let Some(resource) = view.resource() {
            if !state.buffers.contains_key(&resource) && !state.textures.contains_key(&resource) {
                return Err(GraphicsError::InvalidHandle(format!(
                    "descriptor {heap_index} views unknown resource {resource}"
                )));
            }
        }
        log::trace!("DummyBackend: descriptor {heap_index} = {view:?}");
        state.descriptors.insert(heap_index, view);
        Ok(())
    }

    fn sample_descriptor(
        &self,
        index: ShaderVisibleIndex,
        u: f32,
        v: f32,
    ) -> Result<[f32; 4], GraphicsError> {
        let state = self.state.lock();
        state
            .sample_2d(index.index(), u, v, &SamplerDescriptor::nearest_clamp())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("no texture bound at {index}")))
    }

    fn execute(&self, queue: QueueRole, commands: &[Command]) -> Result<(), GraphicsError> {
        kiln_core::profile_scope!("DummyBackend::execute");
        let mut state = self.state.lock();
        let mut ctx = ExecContext::default();
        for command in commands {
            Self::execute_command(&mut state, &mut ctx, command).map_err(|err| {
                log::error!("DummyBackend: {queue:?} {} failed: {err}", command.name());
                err
            })?;
        }
        Ok(())
    }

    fn signal(&self, queue: QueueRole) -> FenceValue {
        let mut timelines = self.timelines.lock();
        let timeline = &mut timelines[queue.index()];
        timeline.signaled = timeline.signaled.next();
        if self.fence_mode == FenceMode::Immediate {
            timeline.completed = timeline.signaled;
            self.fence_changed.notify_all();
        }
        timeline.signaled
    }

    fn completed_value(&self, queue: QueueRole) -> FenceValue {
        self.timelines.lock()[queue.index()].completed
    }

    fn wait_for_fence(
        &self,
        queue: QueueRole,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> bool {
        let mut timelines = self.timelines.lock();
        let i = queue.index();
        if timelines[i].completed >= value {
            return true;
        }
        match timeout {
            // Nothing else completes dummy work, so an unbounded wait drains it.
            None => {
                if value > timelines[i].signaled {
                    log::warn!("DummyBackend: waiting on unsignaled {queue:?} value {value}");
                    return false;
                }
                timelines[i].completed = value;
                self.fence_changed.notify_all();
                true
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while timelines[i].completed < value {
                    if self
                        .fence_changed
                        .wait_until(&mut timelines, deadline)
                        .timed_out()
                    {
                        return timelines[i].completed >= value;
                    }
                }
                true
            }
        }
    }

    fn queue_wait(&self, queue: QueueRole, other: QueueRole, value: FenceValue) {
        // Execution is synchronous at submit, so the dependency is already met
        // once the other queue's work has been executed.
        log::trace!("DummyBackend: {queue:?} waits for {other:?} {value}");
        self.state.lock().queue_waits.push(QueueWait {
            queue,
            waits_on: other,
            value,
        });
    }

    fn present(&self, texture: GpuResourceId) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if !state.textures.contains_key(&texture) {
            return Err(GraphicsError::InvalidHandle(format!("present of {texture}")));
        }
        state.presented_frames += 1;
        state.last_presented = Some(texture);
        Ok(())
    }
}

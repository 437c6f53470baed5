//! 记录型的测试后端
//!
//! 不访问 GPU，只记录调用序列，并模拟 fence 的状态机：
//! - submit 只能使用 unsignaled 的 fence，之后 fence 进入 pending
//! - 等待 pending 的 fence 会立即完成（除非调用了 [`MockGfx::hang_gpu`]），等待从未提交的 fence 会超时
//! - 重置 pending 的 fence，或者重新录制仍在 GPU 上执行的 command buffer 会直接 panic

use std::collections::{HashMap, VecDeque};

use ash::vk;
use slotmap::SlotMap;

use crate::{
    backend::*,
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        rendering_info::GfxRenderingInfo,
        submit_info::GfxSubmitInfo,
    },
    descriptors::{GfxDescriptorBinding, GfxDescriptorPoolDesc, GfxDescriptorWrite},
    error::{GfxError, GfxResult},
    handles::*,
    pipelines::graphics_pipeline::GfxGraphicsPipelineDesc,
    query::GfxQueryResult,
    resources::{
        buffer::GfxBufferDesc,
        image::{GfxImageDesc, GfxImageViewDesc},
        sampler::GfxSamplerDesc,
    },
    stats::GfxResourceStats,
    swapchain::{GfxAcquire, GfxPresentResult, GfxSurfaceSupport, GfxSwapchain, GfxSwapchainDesc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxObjectKind {
    Buffer,
    Image,
    ImageView,
    Sampler,
    Fence,
    Semaphore,
    CommandBuffer,
    DescriptorPool,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    QueryPool,
    Swapchain,
}

/// 记录下来的一次调用
#[derive(Debug, Clone, PartialEq)]
pub enum GfxEvent {
    Create { kind: GfxObjectKind, name: String },
    Destroy { kind: GfxObjectKind },

    WriteBuffer { buffer: GfxBufferHandle, offset: vk::DeviceSize, len: usize },
    UploadImage { image: GfxImageHandle },

    WaitFence { fence: GfxFenceHandle },
    ResetFence { fence: GfxFenceHandle },
    WaitIdle,

    BeginCommandBuffer { cmd: GfxCommandBufferHandle, label: String },
    EndCommandBuffer { cmd: GfxCommandBufferHandle },

    BeginRendering { area: vk::Extent2D, color_attachments: usize, depth: bool },
    EndRendering,
    BindPipeline { pipeline: GfxPipelineHandle },
    BindDescriptorSets { layout: GfxPipelineLayoutHandle, first_set: u32, sets: Vec<GfxDescriptorSetHandle> },
    PushConstants { len: usize },
    BindVertexBuffer { buffer: GfxBufferHandle },
    BindIndexBuffer { buffer: GfxBufferHandle },
    DrawIndexed { index_count: u32, first_index: u32, vertex_offset: i32 },
    Draw { vertex_count: u32 },

    ImageBarriers { images: Vec<(GfxImageHandle, vk::ImageLayout)> },
    BufferBarriers { buffers: Vec<GfxBufferHandle> },
    CopyImage { src: GfxImageHandle, dst: GfxImageHandle },
    BlitImage { src: GfxImageHandle, dst: GfxImageHandle },
    GenerateMipmaps { image: GfxImageHandle, mip_levels: u32 },

    ResetQueryPool { pool: GfxQueryPoolHandle, first: u32, count: u32 },
    BeginQuery { pool: GfxQueryPoolHandle, query: u32 },
    EndQuery { pool: GfxQueryPoolHandle, query: u32 },
    CopyQueryResults { pool: GfxQueryPoolHandle, first: u32, count: u32, dst: GfxBufferHandle, offset: vk::DeviceSize },
    BeginConditional { buffer: GfxBufferHandle, offset: vk::DeviceSize },
    EndConditional,

    BeginLabel { label: String },
    EndLabel,

    Submit {
        cmds: Vec<GfxCommandBufferHandle>,
        waits: Vec<(GfxSemaphoreHandle, vk::PipelineStageFlags2)>,
        signals: Vec<(GfxSemaphoreHandle, vk::PipelineStageFlags2)>,
        fence: Option<GfxFenceHandle>,
    },

    AllocateDescriptorSets { pool: GfxDescriptorPoolHandle, layout: GfxDescriptorSetLayoutHandle, count: usize },
    UpdateDescriptorSets { writes: Vec<GfxDescriptorWrite> },

    CreateSwapchain { extent: vk::Extent2D, present_mode: vk::PresentModeKHR },
    Acquire { swapchain: GfxSwapchainHandle, semaphore: GfxSemaphoreHandle },
    Present { swapchain: GfxSwapchainHandle, image_index: u32, waits: Vec<GfxSemaphoreHandle> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFenceState {
    Unsignaled,
    /// 已经提交，GPU 尚未完成
    Pending,
    Signaled,
}

struct MockBuffer {
    desc: GfxBufferDesc,
    data: Vec<u8>,
}

struct MockImage {
    desc: GfxImageDesc,
    swapchain: bool,
}

#[derive(Default)]
struct MockCommandBuffer {
    recording: bool,
    /// 最近一次提交时使用的 fence
    in_flight_fence: Option<GfxFenceHandle>,
}

struct MockDescriptorPool {
    remaining_sets: u32,
    remaining: HashMap<vk::DescriptorType, u32>,
    sets: Vec<GfxDescriptorSetHandle>,
}

pub struct MockGfx {
    events: Vec<GfxEvent>,

    buffers: SlotMap<GfxBufferHandle, MockBuffer>,
    images: SlotMap<GfxImageHandle, MockImage>,
    image_views: SlotMap<GfxImageViewHandle, (GfxImageHandle, GfxImageViewDesc)>,
    samplers: SlotMap<GfxSamplerHandle, GfxSamplerDesc>,
    fences: SlotMap<GfxFenceHandle, MockFenceState>,
    semaphores: SlotMap<GfxSemaphoreHandle, ()>,
    command_buffers: SlotMap<GfxCommandBufferHandle, MockCommandBuffer>,
    descriptor_pools: SlotMap<GfxDescriptorPoolHandle, MockDescriptorPool>,
    descriptor_set_layouts: SlotMap<GfxDescriptorSetLayoutHandle, Vec<GfxDescriptorBinding>>,
    descriptor_sets: SlotMap<GfxDescriptorSetHandle, GfxDescriptorSetLayoutHandle>,
    pipeline_layouts: SlotMap<GfxPipelineLayoutHandle, Vec<GfxDescriptorSetLayoutHandle>>,
    pipelines: SlotMap<GfxPipelineHandle, GfxGraphicsPipelineDesc>,
    query_pools: SlotMap<GfxQueryPoolHandle, u32>,
    swapchains: SlotMap<GfxSwapchainHandle, Vec<GfxImageHandle>>,

    limits: GfxDeviceLimits,
    surface: GfxSurfaceSupport,
    hang_gpu: bool,
    /// 还能成功创建的 image 数量，None 表示不限制
    image_budget: Option<usize>,
    next_image: u32,
    acquire_script: VecDeque<GfxAcquire>,
    present_script: VecDeque<GfxPresentResult>,
    query_script: VecDeque<Vec<GfxQueryResult>>,
}

impl Default for MockGfx {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl MockGfx {
    pub fn new() -> Self {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        Self {
            events: vec![],
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            image_views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),
            descriptor_pools: SlotMap::with_key(),
            descriptor_set_layouts: SlotMap::with_key(),
            descriptor_sets: SlotMap::with_key(),
            pipeline_layouts: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            query_pools: SlotMap::with_key(),
            swapchains: SlotMap::with_key(),
            limits: GfxDeviceLimits {
                min_uniform_buffer_offset_alignment: 256,
                framebuffer_sample_counts: vk::SampleCountFlags::TYPE_1
                    | vk::SampleCountFlags::TYPE_2
                    | vk::SampleCountFlags::TYPE_4
                    | vk::SampleCountFlags::TYPE_8,
                conditional_rendering: true,
            },
            surface: GfxSurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 8,
                    current_extent: extent,
                    min_image_extent: vk::Extent2D { width: 1, height: 1 },
                    max_image_extent: vk::Extent2D {
                        width: 16384,
                        height: 16384,
                    },
                    max_image_array_layers: 1,
                    supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                    supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                },
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            },
            hang_gpu: false,
            image_budget: None,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            query_script: VecDeque::new(),
        }
    }

    /// builder
    pub fn with_limits(mut self, limits: GfxDeviceLimits) -> Self {
        self.limits = limits;
        self
    }
}

// 测试控制
impl MockGfx {
    /// 模拟窗口尺寸变化，0 表示最小化
    pub fn set_surface_extent(&mut self, width: u32, height: u32) {
        self.surface.capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_surface_formats(&mut self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.surface.formats = formats;
    }

    pub fn set_present_modes(&mut self, modes: Vec<vk::PresentModeKHR>) {
        self.surface.present_modes = modes;
    }

    /// 之后提交的工作永远不会完成，等待 fence 会超时
    pub fn hang_gpu(&mut self) {
        self.hang_gpu = true;
    }

    /// 再成功创建 `count` 个 image 之后，`create_image` 返回显存不足
    pub fn fail_images_after(&mut self, count: usize) {
        self.image_budget = Some(count);
    }

    pub fn push_acquire_result(&mut self, result: GfxAcquire) {
        self.acquire_script.push_back(result);
    }

    pub fn push_present_result(&mut self, result: GfxPresentResult) {
        self.present_script.push_back(result);
    }

    /// 下一次 `query_results` 的返回值，未设置时所有 query 都返回 `Ready(1)`
    pub fn push_query_results(&mut self, results: Vec<GfxQueryResult>) {
        self.query_script.push_back(results);
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

// getters
impl MockGfx {
    #[inline]
    pub fn events(&self) -> &[GfxEvent] {
        &self.events
    }

    /// 满足条件的第一个 event 的位置
    pub fn position(&self, pred: impl Fn(&GfxEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    pub fn count(&self, pred: impl Fn(&GfxEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn buffer_contents(&self, buffer: GfxBufferHandle) -> &[u8] {
        &self.buffers[buffer].data
    }

    pub fn buffer_desc(&self, buffer: GfxBufferHandle) -> GfxBufferDesc {
        self.buffers[buffer].desc
    }

    pub fn image_desc(&self, image: GfxImageHandle) -> GfxImageDesc {
        self.images[image].desc
    }

    /// image view 对应的 image
    pub fn view_image(&self, view: GfxImageViewHandle) -> GfxImageHandle {
        self.image_views[view].0
    }

    pub fn pipeline_desc(&self, pipeline: GfxPipelineHandle) -> &GfxGraphicsPipelineDesc {
        &self.pipelines[pipeline]
    }

    pub fn set_layout_bindings(&self, layout: GfxDescriptorSetLayoutHandle) -> &[GfxDescriptorBinding] {
        &self.descriptor_set_layouts[layout]
    }

    pub fn descriptor_set_layout(&self, set: GfxDescriptorSetHandle) -> GfxDescriptorSetLayoutHandle {
        self.descriptor_sets[set]
    }

    pub fn fence_state(&self, fence: GfxFenceHandle) -> MockFenceState {
        self.fences[fence]
    }

    pub fn is_alive_buffer(&self, buffer: GfxBufferHandle) -> bool {
        self.buffers.contains_key(buffer)
    }

    pub fn is_alive_image(&self, image: GfxImageHandle) -> bool {
        self.images.contains_key(image)
    }
}

// tools
impl MockGfx {
    fn created(&mut self, kind: GfxObjectKind, name: &str) {
        self.events.push(GfxEvent::Create {
            kind,
            name: name.to_string(),
        });
    }

    fn destroyed(&mut self, kind: GfxObjectKind) {
        self.events.push(GfxEvent::Destroy { kind });
    }

    fn assert_recording(&self, cmd: GfxCommandBufferHandle) {
        assert!(self.command_buffers[cmd].recording, "command buffer is not recording");
    }
}

impl GfxResources for MockGfx {
    fn create_buffer(&mut self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferHandle> {
        self.created(GfxObjectKind::Buffer, name);
        Ok(self.buffers.insert(MockBuffer {
            desc: *desc,
            data: vec![0; desc.size as usize],
        }))
    }

    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let dst = &mut self.buffers[buffer];
        GfxError::check_range("buffer", offset, data.len() as vk::DeviceSize, dst.data.len() as vk::DeviceSize)?;
        let begin = offset as usize;
        dst.data[begin..begin + data.len()].copy_from_slice(data);
        self.events.push(GfxEvent::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: GfxBufferHandle) {
        if self.buffers.remove(buffer).is_some() {
            self.destroyed(GfxObjectKind::Buffer);
        }
    }

    fn create_image(&mut self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageHandle> {
        match &mut self.image_budget {
            Some(0) => {
                return Err(GfxError::Allocation {
                    name: name.to_string(),
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            Some(budget) => *budget -= 1,
            None => {}
        }
        self.created(GfxObjectKind::Image, name);
        Ok(self.images.insert(MockImage {
            desc: *desc,
            swapchain: false,
        }))
    }

    fn upload_image(&mut self, image: GfxImageHandle, pixels: &[u8]) -> GfxResult<()> {
        let extent = self.images[image].desc.extent;
        assert_eq!(pixels.len(), (extent.width * extent.height * 4) as usize);
        self.events.push(GfxEvent::UploadImage { image });
        Ok(())
    }

    fn destroy_image(&mut self, image: GfxImageHandle) {
        assert!(!self.images.get(image).is_some_and(|i| i.swapchain), "swapchain image destroyed directly");
        if self.images.remove(image).is_some() {
            self.destroyed(GfxObjectKind::Image);
        }
    }

    fn create_image_view(
        &mut self,
        image: GfxImageHandle,
        desc: &GfxImageViewDesc,
        name: &str,
    ) -> GfxResult<GfxImageViewHandle> {
        assert!(self.images.contains_key(image), "image view of a dead image");
        self.created(GfxObjectKind::ImageView, name);
        Ok(self.image_views.insert((image, *desc)))
    }

    fn destroy_image_view(&mut self, view: GfxImageViewHandle) {
        if self.image_views.remove(view).is_some() {
            self.destroyed(GfxObjectKind::ImageView);
        }
    }

    fn create_sampler(&mut self, desc: &GfxSamplerDesc, name: &str) -> GfxResult<GfxSamplerHandle> {
        self.created(GfxObjectKind::Sampler, name);
        Ok(self.samplers.insert(*desc))
    }

    fn destroy_sampler(&mut self, sampler: GfxSamplerHandle) {
        if self.samplers.remove(sampler).is_some() {
            self.destroyed(GfxObjectKind::Sampler);
        }
    }

    fn limits(&self) -> GfxDeviceLimits {
        self.limits
    }

    fn resource_stats(&self) -> GfxResourceStats {
        let swapchain_images = self.images.values().filter(|i| i.swapchain).count();
        GfxResourceStats {
            buffers: self.buffers.len(),
            images: self.images.len() - swapchain_images,
            swapchain_images,
            image_views: self.image_views.len(),
            samplers: self.samplers.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
            command_buffers: self.command_buffers.len(),
            descriptor_pools: self.descriptor_pools.len(),
            descriptor_set_layouts: self.descriptor_set_layouts.len(),
            descriptor_sets: self.descriptor_sets.len(),
            pipeline_layouts: self.pipeline_layouts.len(),
            pipelines: self.pipelines.len(),
            query_pools: self.query_pools.len(),
            swapchains: self.swapchains.len(),
        }
    }
}

impl GfxSync for MockGfx {
    fn create_fence(&mut self, signaled: bool, name: &str) -> GfxResult<GfxFenceHandle> {
        self.created(GfxObjectKind::Fence, name);
        Ok(self.fences.insert(if signaled {
            MockFenceState::Signaled
        } else {
            MockFenceState::Unsignaled
        }))
    }

    fn wait_fence(&mut self, fence: GfxFenceHandle, _timeout_ns: u64) -> GfxResult<()> {
        self.events.push(GfxEvent::WaitFence { fence });
        let hang_gpu = self.hang_gpu;
        let state = &mut self.fences[fence];
        match *state {
            MockFenceState::Signaled => Ok(()),
            MockFenceState::Pending if !hang_gpu => {
                *state = MockFenceState::Signaled;
                Ok(())
            }
            // 从未提交的 fence 永远不会被 signal
            MockFenceState::Pending | MockFenceState::Unsignaled => Err(GfxError::Timeout),
        }
    }

    fn reset_fence(&mut self, fence: GfxFenceHandle) -> GfxResult<()> {
        self.events.push(GfxEvent::ResetFence { fence });
        let state = &mut self.fences[fence];
        assert_ne!(*state, MockFenceState::Pending, "reset a fence that is still in use by the gpu");
        *state = MockFenceState::Unsignaled;
        Ok(())
    }

    fn destroy_fence(&mut self, fence: GfxFenceHandle) {
        if self.fences.remove(fence).is_some() {
            self.destroyed(GfxObjectKind::Fence);
        }
    }

    fn create_semaphore(&mut self, name: &str) -> GfxResult<GfxSemaphoreHandle> {
        self.created(GfxObjectKind::Semaphore, name);
        Ok(self.semaphores.insert(()))
    }

    fn destroy_semaphore(&mut self, semaphore: GfxSemaphoreHandle) {
        if self.semaphores.remove(semaphore).is_some() {
            self.destroyed(GfxObjectKind::Semaphore);
        }
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        self.events.push(GfxEvent::WaitIdle);
        if self.hang_gpu {
            return Err(GfxError::Timeout);
        }
        for state in self.fences.values_mut() {
            if *state == MockFenceState::Pending {
                *state = MockFenceState::Signaled;
            }
        }
        Ok(())
    }
}

impl GfxCommands for MockGfx {
    fn allocate_command_buffer(&mut self, name: &str) -> GfxResult<GfxCommandBufferHandle> {
        self.created(GfxObjectKind::CommandBuffer, name);
        Ok(self.command_buffers.insert(MockCommandBuffer::default()))
    }

    fn free_command_buffer(&mut self, cmd: GfxCommandBufferHandle) {
        if self.command_buffers.remove(cmd).is_some() {
            self.destroyed(GfxObjectKind::CommandBuffer);
        }
    }

    fn begin_command_buffer(&mut self, cmd: GfxCommandBufferHandle, label: &str) -> GfxResult<()> {
        let in_flight = self.command_buffers[cmd].in_flight_fence;
        if let Some(fence) = in_flight {
            assert_ne!(
                self.fences.get(fence).copied(),
                Some(MockFenceState::Pending),
                "command buffer re-recorded while the gpu may still be executing it"
            );
        }
        let state = &mut self.command_buffers[cmd];
        state.recording = true;
        state.in_flight_fence = None;
        self.events.push(GfxEvent::BeginCommandBuffer {
            cmd,
            label: label.to_string(),
        });
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: GfxCommandBufferHandle) -> GfxResult<()> {
        self.assert_recording(cmd);
        self.command_buffers[cmd].recording = false;
        self.events.push(GfxEvent::EndCommandBuffer { cmd });
        Ok(())
    }

    fn cmd_begin_rendering(&mut self, cmd: GfxCommandBufferHandle, info: &GfxRenderingInfo) {
        self.assert_recording(cmd);
        self.events.push(GfxEvent::BeginRendering {
            area: info.render_area,
            color_attachments: info.color_attachments.len(),
            depth: info.depth_attachment.is_some(),
        });
    }

    fn cmd_end_rendering(&mut self, _cmd: GfxCommandBufferHandle) {
        self.events.push(GfxEvent::EndRendering);
    }

    fn cmd_bind_pipeline(&mut self, cmd: GfxCommandBufferHandle, pipeline: GfxPipelineHandle) {
        self.assert_recording(cmd);
        assert!(self.pipelines.contains_key(pipeline), "bind a dead pipeline");
        self.events.push(GfxEvent::BindPipeline { pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        layout: GfxPipelineLayoutHandle,
        first_set: u32,
        sets: &[GfxDescriptorSetHandle],
    ) {
        assert!(sets.iter().all(|s| self.descriptor_sets.contains_key(*s)), "bind a freed descriptor set");
        self.events.push(GfxEvent::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        _layout: GfxPipelineLayoutHandle,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.events.push(GfxEvent::PushConstants { len: data.len() });
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        _offset: vk::DeviceSize,
    ) {
        self.events.push(GfxEvent::BindVertexBuffer { buffer });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.events.push(GfxEvent::BindIndexBuffer { buffer });
    }

    fn cmd_draw_indexed(&mut self, cmd: GfxCommandBufferHandle, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.assert_recording(cmd);
        self.events.push(GfxEvent::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }

    fn cmd_draw(&mut self, cmd: GfxCommandBufferHandle, vertex_count: u32, _first_vertex: u32) {
        self.assert_recording(cmd);
        self.events.push(GfxEvent::Draw { vertex_count });
    }

    fn cmd_image_barriers(&mut self, _cmd: GfxCommandBufferHandle, barriers: &[GfxImageBarrier]) {
        for barrier in barriers {
            let Some(image) = self.images.get(barrier.image) else {
                continue;
            };
            let levels = image.desc.mip_levels;
            let in_range = barrier.base_mip_level < levels
                && (barrier.mip_count == vk::REMAINING_MIP_LEVELS || barrier.base_mip_level + barrier.mip_count <= levels);
            assert!(
                in_range,
                "barrier mip range {}+{} is outside an image with {} levels",
                barrier.base_mip_level, barrier.mip_count, levels
            );
        }
        self.events.push(GfxEvent::ImageBarriers {
            images: barriers.iter().map(|b| (b.image, b.new_layout)).collect(),
        });
    }

    fn cmd_buffer_barriers(&mut self, _cmd: GfxCommandBufferHandle, barriers: &[GfxBufferBarrier]) {
        self.events.push(GfxEvent::BufferBarriers {
            buffers: barriers.iter().map(|b| b.buffer).collect(),
        });
    }

    fn cmd_copy_image(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        dst: GfxImageHandle,
        _aspect: vk::ImageAspectFlags,
        _extent: vk::Extent2D,
    ) {
        self.events.push(GfxEvent::CopyImage { src, dst });
    }

    fn cmd_blit_image(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        _src_extent: vk::Extent2D,
        dst: GfxImageHandle,
        _dst_extent: vk::Extent2D,
    ) {
        self.events.push(GfxEvent::BlitImage { src, dst });
    }

    fn cmd_generate_mipmaps(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        image: GfxImageHandle,
        _extent: vk::Extent2D,
        mip_levels: u32,
    ) {
        self.events.push(GfxEvent::GenerateMipmaps { image, mip_levels });
    }

    fn cmd_reset_query_pool(&mut self, _cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, first: u32, count: u32) {
        self.events.push(GfxEvent::ResetQueryPool { pool, first, count });
    }

    fn cmd_begin_query(&mut self, _cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32) {
        assert!(query < self.query_pools[pool], "query index out of range");
        self.events.push(GfxEvent::BeginQuery { pool, query });
    }

    fn cmd_end_query(&mut self, _cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32) {
        self.events.push(GfxEvent::EndQuery { pool, query });
    }

    fn cmd_copy_query_results(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        pool: GfxQueryPoolHandle,
        first: u32,
        count: u32,
        dst: GfxBufferHandle,
        dst_offset: vk::DeviceSize,
    ) {
        self.events.push(GfxEvent::CopyQueryResults {
            pool,
            first,
            count,
            dst,
            offset: dst_offset,
        });
    }

    fn cmd_begin_conditional_rendering(
        &mut self,
        _cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
    ) {
        if self.limits.conditional_rendering {
            self.events.push(GfxEvent::BeginConditional { buffer, offset });
        }
    }

    fn cmd_end_conditional_rendering(&mut self, _cmd: GfxCommandBufferHandle) {
        if self.limits.conditional_rendering {
            self.events.push(GfxEvent::EndConditional);
        }
    }

    fn cmd_begin_label(&mut self, _cmd: GfxCommandBufferHandle, label: &str, _color: [f32; 4]) {
        self.events.push(GfxEvent::BeginLabel {
            label: label.to_string(),
        });
    }

    fn cmd_end_label(&mut self, _cmd: GfxCommandBufferHandle) {
        self.events.push(GfxEvent::EndLabel);
    }

    fn submit(&mut self, info: &GfxSubmitInfo, fence: Option<GfxFenceHandle>) -> GfxResult<()> {
        for cmd in &info.command_buffers {
            assert!(!self.command_buffers[*cmd].recording, "submit a command buffer that is still recording");
        }
        if let Some(fence) = fence {
            let state = &mut self.fences[fence];
            assert_eq!(*state, MockFenceState::Unsignaled, "submit with a fence that is not reset");
            *state = MockFenceState::Pending;
            for cmd in &info.command_buffers {
                self.command_buffers[*cmd].in_flight_fence = Some(fence);
            }
        }
        self.events.push(GfxEvent::Submit {
            cmds: info.command_buffers.clone(),
            waits: info.wait_semaphores.clone(),
            signals: info.signal_semaphores.clone(),
            fence,
        });
        Ok(())
    }
}

impl GfxDescriptors for MockGfx {
    fn create_descriptor_pool(
        &mut self,
        desc: &GfxDescriptorPoolDesc,
        name: &str,
    ) -> GfxResult<GfxDescriptorPoolHandle> {
        self.created(GfxObjectKind::DescriptorPool, name);
        let mut remaining = HashMap::new();
        for (ty, count) in &desc.pool_sizes {
            *remaining.entry(*ty).or_insert(0) += *count;
        }
        Ok(self.descriptor_pools.insert(MockDescriptorPool {
            remaining_sets: desc.max_sets,
            remaining,
            sets: vec![],
        }))
    }

    fn destroy_descriptor_pool(&mut self, pool: GfxDescriptorPoolHandle) {
        if let Some(pool) = self.descriptor_pools.remove(pool) {
            for set in pool.sets {
                self.descriptor_sets.remove(set);
            }
            self.destroyed(GfxObjectKind::DescriptorPool);
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[GfxDescriptorBinding],
        name: &str,
    ) -> GfxResult<GfxDescriptorSetLayoutHandle> {
        self.created(GfxObjectKind::DescriptorSetLayout, name);
        Ok(self.descriptor_set_layouts.insert(bindings.to_vec()))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: GfxDescriptorSetLayoutHandle) {
        if self.descriptor_set_layouts.remove(layout).is_some() {
            self.destroyed(GfxObjectKind::DescriptorSetLayout);
        }
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: GfxDescriptorPoolHandle,
        layout: GfxDescriptorSetLayoutHandle,
        count: usize,
        _name: &str,
    ) -> GfxResult<Vec<GfxDescriptorSetHandle>> {
        self.events.push(GfxEvent::AllocateDescriptorSets { pool, layout, count });

        let bindings = &self.descriptor_set_layouts[layout];
        let mut needed: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for binding in bindings {
            *needed.entry(binding.ty).or_insert(0) += count as u32;
        }

        let mock_pool = &mut self.descriptor_pools[pool];
        let enough_sets = mock_pool.remaining_sets >= count as u32;
        let enough_descriptors =
            needed.iter().all(|(ty, n)| mock_pool.remaining.get(ty).copied().unwrap_or(0) >= *n);
        if !enough_sets || !enough_descriptors {
            return Err(GfxError::DescriptorPoolExhausted);
        }
        mock_pool.remaining_sets -= count as u32;
        for (ty, n) in needed {
            if let Some(remaining) = mock_pool.remaining.get_mut(&ty) {
                *remaining -= n;
            }
        }

        let sets = (0..count).map(|_| self.descriptor_sets.insert(layout)).collect::<Vec<_>>();
        self.descriptor_pools[pool].sets.extend_from_slice(&sets);
        Ok(sets)
    }

    fn update_descriptor_sets(&mut self, writes: &[GfxDescriptorWrite]) {
        for write in writes {
            let layout = self.descriptor_sets[write.set];
            let binding = self.descriptor_set_layouts[layout]
                .iter()
                .find(|b| b.slot == write.binding)
                .unwrap_or_else(|| panic!("binding {} does not exist in the set layout", write.binding));
            assert_eq!(binding.ty, write.resource.descriptor_type(), "descriptor type mismatch");
        }
        self.events.push(GfxEvent::UpdateDescriptorSets {
            writes: writes.to_vec(),
        });
    }
}

impl GfxPipelines for MockGfx {
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[GfxDescriptorSetLayoutHandle],
        _push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> GfxResult<GfxPipelineLayoutHandle> {
        self.created(GfxObjectKind::PipelineLayout, name);
        Ok(self.pipeline_layouts.insert(set_layouts.to_vec()))
    }

    fn destroy_pipeline_layout(&mut self, layout: GfxPipelineLayoutHandle) {
        if self.pipeline_layouts.remove(layout).is_some() {
            self.destroyed(GfxObjectKind::PipelineLayout);
        }
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GfxGraphicsPipelineDesc,
        layout: GfxPipelineLayoutHandle,
        name: &str,
    ) -> GfxResult<GfxPipelineHandle> {
        assert!(self.pipeline_layouts.contains_key(layout), "pipeline with a dead layout");
        self.created(GfxObjectKind::Pipeline, name);
        Ok(self.pipelines.insert(desc.clone()))
    }

    fn destroy_pipeline(&mut self, pipeline: GfxPipelineHandle) {
        if self.pipelines.remove(pipeline).is_some() {
            self.destroyed(GfxObjectKind::Pipeline);
        }
    }
}

impl GfxQueries for MockGfx {
    fn create_query_pool(&mut self, _ty: vk::QueryType, count: u32, name: &str) -> GfxResult<GfxQueryPoolHandle> {
        self.created(GfxObjectKind::QueryPool, name);
        Ok(self.query_pools.insert(count))
    }

    fn destroy_query_pool(&mut self, pool: GfxQueryPoolHandle) {
        if self.query_pools.remove(pool).is_some() {
            self.destroyed(GfxObjectKind::QueryPool);
        }
    }

    fn query_results(&mut self, pool: GfxQueryPoolHandle, first: u32, count: u32) -> GfxResult<Vec<GfxQueryResult>> {
        assert!(first + count <= self.query_pools[pool], "query range out of range");
        Ok(self
            .query_script
            .pop_front()
            .unwrap_or_else(|| vec![GfxQueryResult::Ready(1); count as usize]))
    }
}

impl GfxPresent for MockGfx {
    fn surface_support(&self) -> GfxResult<GfxSurfaceSupport> {
        Ok(self.surface.clone())
    }

    fn create_swapchain(&mut self, desc: &GfxSwapchainDesc, name: &str) -> GfxResult<GfxSwapchain> {
        assert!(desc.extent.width > 0 && desc.extent.height > 0, "swapchain with zero extent");
        self.created(GfxObjectKind::Swapchain, name);
        self.events.push(GfxEvent::CreateSwapchain {
            extent: desc.extent,
            present_mode: desc.present_mode,
        });

        let image_desc = GfxImageDesc::new_image_2d(desc.extent, desc.format.format, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        let images = (0..desc.image_count)
            .map(|_| {
                self.images.insert(MockImage {
                    desc: image_desc,
                    swapchain: true,
                })
            })
            .collect::<Vec<_>>();
        let handle = self.swapchains.insert(images.clone());
        self.next_image = 0;

        Ok(GfxSwapchain {
            handle,
            images,
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: GfxSwapchainHandle) {
        if let Some(images) = self.swapchains.remove(swapchain) {
            for image in images {
                self.images.remove(image);
            }
            self.destroyed(GfxObjectKind::Swapchain);
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: GfxSwapchainHandle,
        signal: GfxSemaphoreHandle,
        _timeout_ns: u64,
    ) -> GfxResult<GfxAcquire> {
        self.events.push(GfxEvent::Acquire {
            swapchain,
            semaphore: signal,
        });
        if let Some(result) = self.acquire_script.pop_front() {
            return Ok(result);
        }
        let image_count = self.swapchains[swapchain].len() as u32;
        let index = self.next_image % image_count;
        self.next_image += 1;
        Ok(GfxAcquire::Image {
            index,
            suboptimal: false,
        })
    }

    fn present(
        &mut self,
        swapchain: GfxSwapchainHandle,
        image_index: u32,
        wait: &[GfxSemaphoreHandle],
    ) -> GfxResult<GfxPresentResult> {
        self.events.push(GfxEvent::Present {
            swapchain,
            image_index,
            waits: wait.to_vec(),
        });
        Ok(self.present_script.pop_front().unwrap_or(GfxPresentResult::Presented))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_state_machine() {
        let mut gfx = MockGfx::new();
        let fence = gfx.create_fence(true, "fence").unwrap();
        let cmd = gfx.allocate_command_buffer("cmd").unwrap();

        gfx.wait_fence(fence, u64::MAX).unwrap();
        gfx.reset_fence(fence).unwrap();
        // 从未提交，等待会超时
        assert!(matches!(gfx.wait_fence(fence, 0), Err(GfxError::Timeout)));

        gfx.begin_command_buffer(cmd, "frame").unwrap();
        gfx.end_command_buffer(cmd).unwrap();
        gfx.submit(&GfxSubmitInfo::new(&[cmd]), Some(fence)).unwrap();
        assert_eq!(gfx.fence_state(fence), MockFenceState::Pending);

        gfx.wait_fence(fence, u64::MAX).unwrap();
        assert_eq!(gfx.fence_state(fence), MockFenceState::Signaled);
    }

    #[test]
    #[should_panic(expected = "still executing")]
    fn test_rerecord_in_flight_command_buffer_panics() {
        let mut gfx = MockGfx::new();
        let fence = gfx.create_fence(false, "fence").unwrap();
        let cmd = gfx.allocate_command_buffer("cmd").unwrap();
        gfx.begin_command_buffer(cmd, "frame").unwrap();
        gfx.end_command_buffer(cmd).unwrap();
        gfx.submit(&GfxSubmitInfo::new(&[cmd]), Some(fence)).unwrap();

        gfx.begin_command_buffer(cmd, "frame").unwrap();
    }

    #[test]
    fn test_descriptor_pool_exhaustion() {
        let mut gfx = MockGfx::new();
        let pool = gfx
            .create_descriptor_pool(
                &GfxDescriptorPoolDesc {
                    max_sets: 2,
                    pool_sizes: vec![(vk::DescriptorType::UNIFORM_BUFFER, 2)],
                },
                "pool",
            )
            .unwrap();
        let layout = gfx
            .create_descriptor_set_layout(
                &[GfxDescriptorBinding {
                    slot: 0,
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    stages: vk::ShaderStageFlags::ALL_GRAPHICS,
                }],
                "layout",
            )
            .unwrap();

        assert_eq!(gfx.allocate_descriptor_sets(pool, layout, 2, "sets").unwrap().len(), 2);
        assert!(matches!(
            gfx.allocate_descriptor_sets(pool, layout, 1, "sets"),
            Err(GfxError::DescriptorPoolExhausted)
        ));

        gfx.destroy_descriptor_pool(pool);
        assert_eq!(gfx.resource_stats().descriptor_sets, 0);
    }

    #[test]
    #[should_panic(expected = "outside an image with 1 levels")]
    fn test_barrier_past_last_mip_panics() {
        let mut gfx = MockGfx::new();
        let image = gfx
            .create_image(
                &GfxImageDesc::new_image_2d(
                    vk::Extent2D { width: 1, height: 1 },
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::TRANSFER_DST,
                ),
                "image",
            )
            .unwrap();
        let cmd = gfx.allocate_command_buffer("cmd").unwrap();
        gfx.begin_command_buffer(cmd, "frame").unwrap();
        gfx.cmd_image_barriers(
            cmd,
            &[GfxImageBarrier::new()
                .image(image)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .mip_range(1, vk::REMAINING_MIP_LEVELS)],
        );
    }

    #[test]
    fn test_buffer_write_out_of_range() {
        let mut gfx = MockGfx::new();
        let buffer = gfx.create_buffer(&GfxBufferDesc::uniform(16), "buffer").unwrap();
        gfx.write_buffer(buffer, 8, &[1u8; 8]).unwrap();

        gfx.clear_events();
        assert!(matches!(
            gfx.write_buffer(buffer, 8, &[1u8; 9]),
            Err(GfxError::OutOfRange { offset: 8, len: 9, size: 16, .. })
        ));
        assert!(gfx.events().is_empty());
        assert!(gfx.buffer_contents(buffer)[..8].iter().all(|b| *b == 0));
    }
}

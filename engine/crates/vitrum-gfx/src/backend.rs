//! 渲染核心所需的图形设备能力
//!
//! 按照关注点拆成多个 trait，[`GfxBackend`] 是它们的组合。
//! 录制命令的代码只需要 [`GfxCommands`]，因此 overlay 之类的扩展可以拿到 `&mut dyn GfxCommands`。

use ash::vk;

use crate::{
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        rendering_info::GfxRenderingInfo,
        submit_info::GfxSubmitInfo,
    },
    descriptors::{GfxDescriptorBinding, GfxDescriptorPoolDesc, GfxDescriptorWrite},
    error::GfxResult,
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

/// 渲染核心关心的设备限制
#[derive(Debug, Clone, Copy)]
pub struct GfxDeviceLimits {
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// color 和 depth 都支持的 MSAA 采样数
    pub framebuffer_sample_counts: vk::SampleCountFlags,
    /// 是否支持 `VK_EXT_conditional_rendering`
    pub conditional_rendering: bool,
}

impl GfxDeviceLimits {
    /// 在支持范围内选择不超过 `requested` 的最大采样数
    pub fn clamp_samples(&self, requested: vk::SampleCountFlags) -> vk::SampleCountFlags {
        [
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ]
        .into_iter()
        .find(|s| s.as_raw() <= requested.as_raw() && self.framebuffer_sample_counts.contains(*s))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }
}

pub trait GfxResources {
    fn create_buffer(&mut self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferHandle>;
    /// HostVisible 的 buffer 直接写入映射内存；DeviceLocal 的 buffer 经过 staging buffer 同步上传
    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;
    fn destroy_buffer(&mut self, buffer: GfxBufferHandle);

    fn create_image(&mut self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageHandle>;
    /// 上传 RGBA8 像素到 mip 0，完成后 image 处于 `SHADER_READ_ONLY_OPTIMAL`
    fn upload_image(&mut self, image: GfxImageHandle, pixels: &[u8]) -> GfxResult<()>;
    fn destroy_image(&mut self, image: GfxImageHandle);

    fn create_image_view(
        &mut self,
        image: GfxImageHandle,
        desc: &GfxImageViewDesc,
        name: &str,
    ) -> GfxResult<GfxImageViewHandle>;
    fn destroy_image_view(&mut self, view: GfxImageViewHandle);

    fn create_sampler(&mut self, desc: &GfxSamplerDesc, name: &str) -> GfxResult<GfxSamplerHandle>;
    fn destroy_sampler(&mut self, sampler: GfxSamplerHandle);

    fn limits(&self) -> GfxDeviceLimits;
    fn resource_stats(&self) -> GfxResourceStats;
}

pub trait GfxSync {
    fn create_fence(&mut self, signaled: bool, name: &str) -> GfxResult<GfxFenceHandle>;
    /// 超时返回 [`crate::GfxError::Timeout`]
    fn wait_fence(&mut self, fence: GfxFenceHandle, timeout_ns: u64) -> GfxResult<()>;
    fn reset_fence(&mut self, fence: GfxFenceHandle) -> GfxResult<()>;
    fn destroy_fence(&mut self, fence: GfxFenceHandle);

    fn create_semaphore(&mut self, name: &str) -> GfxResult<GfxSemaphoreHandle>;
    fn destroy_semaphore(&mut self, semaphore: GfxSemaphoreHandle);

    fn wait_idle(&mut self) -> GfxResult<()>;
}

pub trait GfxCommands {
    fn allocate_command_buffer(&mut self, name: &str) -> GfxResult<GfxCommandBufferHandle>;
    fn free_command_buffer(&mut self, cmd: GfxCommandBufferHandle);

    /// 重置并以 ONE_TIME_SUBMIT 开始录制
    fn begin_command_buffer(&mut self, cmd: GfxCommandBufferHandle, label: &str) -> GfxResult<()>;
    fn end_command_buffer(&mut self, cmd: GfxCommandBufferHandle) -> GfxResult<()>;

    /// 开始 dynamic rendering，同时将 viewport 和 scissor 设置为整个 render area
    fn cmd_begin_rendering(&mut self, cmd: GfxCommandBufferHandle, info: &GfxRenderingInfo);
    fn cmd_end_rendering(&mut self, cmd: GfxCommandBufferHandle);

    fn cmd_bind_pipeline(&mut self, cmd: GfxCommandBufferHandle, pipeline: GfxPipelineHandle);
    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: GfxCommandBufferHandle,
        layout: GfxPipelineLayoutHandle,
        first_set: u32,
        sets: &[GfxDescriptorSetHandle],
    );
    fn cmd_push_constants(
        &mut self,
        cmd: GfxCommandBufferHandle,
        layout: GfxPipelineLayoutHandle,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&mut self, cmd: GfxCommandBufferHandle, buffer: GfxBufferHandle, offset: vk::DeviceSize);
    fn cmd_bind_index_buffer(
        &mut self,
        cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_draw_indexed(&mut self, cmd: GfxCommandBufferHandle, index_count: u32, first_index: u32, vertex_offset: i32);
    fn cmd_draw(&mut self, cmd: GfxCommandBufferHandle, vertex_count: u32, first_vertex: u32);

    fn cmd_image_barriers(&mut self, cmd: GfxCommandBufferHandle, barriers: &[GfxImageBarrier]);
    fn cmd_buffer_barriers(&mut self, cmd: GfxCommandBufferHandle, barriers: &[GfxBufferBarrier]);

    /// 同尺寸 image 之间的 mip 0 拷贝，src 处于 TRANSFER_SRC，dst 处于 TRANSFER_DST
    fn cmd_copy_image(
        &mut self,
        cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        dst: GfxImageHandle,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent2D,
    );
    fn cmd_blit_image(
        &mut self,
        cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        src_extent: vk::Extent2D,
        dst: GfxImageHandle,
        dst_extent: vk::Extent2D,
    );
    /// 逐级 blit 生成 mip 链
    ///
    /// 进入时 mip 0 处于 TRANSFER_SRC，其余 mip 处于 TRANSFER_DST；结束时所有 mip 都处于 TRANSFER_SRC
    fn cmd_generate_mipmaps(
        &mut self,
        cmd: GfxCommandBufferHandle,
        image: GfxImageHandle,
        extent: vk::Extent2D,
        mip_levels: u32,
    );

    fn cmd_reset_query_pool(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, first: u32, count: u32);
    fn cmd_begin_query(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32);
    fn cmd_end_query(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32);
    /// 将 query 结果以 u32 写入 buffer，会等待结果可用
    fn cmd_copy_query_results(
        &mut self,
        cmd: GfxCommandBufferHandle,
        pool: GfxQueryPoolHandle,
        first: u32,
        count: u32,
        dst: GfxBufferHandle,
        dst_offset: vk::DeviceSize,
    );

    /// buffer 中 `offset` 处的 u32 为 0 时，跳过之后的 draw
    ///
    /// 设备不支持 conditional rendering 时为空操作
    fn cmd_begin_conditional_rendering(
        &mut self,
        cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
    );
    fn cmd_end_conditional_rendering(&mut self, cmd: GfxCommandBufferHandle);

    fn cmd_begin_label(&mut self, cmd: GfxCommandBufferHandle, label: &str, color: [f32; 4]);
    fn cmd_end_label(&mut self, cmd: GfxCommandBufferHandle);

    fn submit(&mut self, info: &GfxSubmitInfo, fence: Option<GfxFenceHandle>) -> GfxResult<()>;
}

pub trait GfxDescriptors {
    fn create_descriptor_pool(
        &mut self,
        desc: &GfxDescriptorPoolDesc,
        name: &str,
    ) -> GfxResult<GfxDescriptorPoolHandle>;
    /// 从 pool 中分配的 set 随之释放
    fn destroy_descriptor_pool(&mut self, pool: GfxDescriptorPoolHandle);

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[GfxDescriptorBinding],
        name: &str,
    ) -> GfxResult<GfxDescriptorSetLayoutHandle>;
    fn destroy_descriptor_set_layout(&mut self, layout: GfxDescriptorSetLayoutHandle);

    /// pool 耗尽时返回 [`crate::GfxError::DescriptorPoolExhausted`]
    fn allocate_descriptor_sets(
        &mut self,
        pool: GfxDescriptorPoolHandle,
        layout: GfxDescriptorSetLayoutHandle,
        count: usize,
        name: &str,
    ) -> GfxResult<Vec<GfxDescriptorSetHandle>>;

    /// 一次性提交所有写入
    fn update_descriptor_sets(&mut self, writes: &[GfxDescriptorWrite]);
}

pub trait GfxPipelines {
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[GfxDescriptorSetLayoutHandle],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> GfxResult<GfxPipelineLayoutHandle>;
    fn destroy_pipeline_layout(&mut self, layout: GfxPipelineLayoutHandle);

    fn create_graphics_pipeline(
        &mut self,
        desc: &GfxGraphicsPipelineDesc,
        layout: GfxPipelineLayoutHandle,
        name: &str,
    ) -> GfxResult<GfxPipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: GfxPipelineHandle);
}

pub trait GfxQueries {
    fn create_query_pool(&mut self, ty: vk::QueryType, count: u32, name: &str) -> GfxResult<GfxQueryPoolHandle>;
    fn destroy_query_pool(&mut self, pool: GfxQueryPoolHandle);

    /// 非阻塞地读取结果，未就绪的 query 返回 [`GfxQueryResult::NotReady`]
    fn query_results(&mut self, pool: GfxQueryPoolHandle, first: u32, count: u32) -> GfxResult<Vec<GfxQueryResult>>;
}

pub trait GfxPresent {
    fn surface_support(&self) -> GfxResult<GfxSurfaceSupport>;

    fn create_swapchain(&mut self, desc: &GfxSwapchainDesc, name: &str) -> GfxResult<GfxSwapchain>;
    /// swapchain 的 image 随之失效
    fn destroy_swapchain(&mut self, swapchain: GfxSwapchainHandle);

    fn acquire_next_image(
        &mut self,
        swapchain: GfxSwapchainHandle,
        signal: GfxSemaphoreHandle,
        timeout_ns: u64,
    ) -> GfxResult<GfxAcquire>;

    fn present(
        &mut self,
        swapchain: GfxSwapchainHandle,
        image_index: u32,
        wait: &[GfxSemaphoreHandle],
    ) -> GfxResult<GfxPresentResult>;
}

/// 渲染核心依赖的全部设备能力
pub trait GfxBackend: GfxResources + GfxSync + GfxCommands + GfxDescriptors + GfxPipelines + GfxQueries + GfxPresent {}

impl<T> GfxBackend for T where
    T: GfxResources + GfxSync + GfxCommands + GfxDescriptors + GfxPipelines + GfxQueries + GfxPresent
{
}

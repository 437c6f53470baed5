//! 基于 ash + vk-mem 的 Vulkan 后端
//!
//! 所有 vk 对象都存放在 slotmap 中，对外只暴露句柄。
//! 要求 Vulkan 1.3：dynamic rendering 和 synchronization2 都是 core。

mod allocator;
mod commands;
mod debug_messenger;
mod descriptors;
mod device;
mod instance;
mod physical_device;
mod pipelines;
mod present;
mod query;
mod resources;
mod sync;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use slotmap::SlotMap;

use crate::{
    error::{GfxResult, VkResultExt},
    handles::*,
    resources::buffer::GfxMemoryLocation,
};

use allocator::VMemAllocator;
use debug_messenger::GfxDebugMsger;
use device::GfxDevice;
use instance::GfxInstance;
use physical_device::GfxPhysicalDevice;

pub(crate) struct VulkanBuffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) allocation: vk_mem::Allocation,
    pub(crate) size: vk::DeviceSize,
    pub(crate) location: GfxMemoryLocation,
    /// HostVisible 的 buffer 在创建时持久映射
    pub(crate) mapped_ptr: Option<*mut u8>,
}

pub(crate) struct VulkanImage {
    pub(crate) handle: vk::Image,
    /// swapchain 的 image 没有 allocation
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) mip_levels: u32,
}

pub(crate) struct VulkanDescriptorPool {
    pub(crate) handle: vk::DescriptorPool,
    /// 从这个 pool 分配的 set，随 pool 一起释放
    pub(crate) sets: Vec<GfxDescriptorSetHandle>,
}

pub(crate) struct VulkanSwapchain {
    pub(crate) handle: vk::SwapchainKHR,
    pub(crate) images: Vec<GfxImageHandle>,
}

/// 所有存活的 vk 对象
#[derive(Default)]
pub(crate) struct VulkanResources {
    pub(crate) buffers: SlotMap<GfxBufferHandle, VulkanBuffer>,
    pub(crate) images: SlotMap<GfxImageHandle, VulkanImage>,
    pub(crate) image_views: SlotMap<GfxImageViewHandle, vk::ImageView>,
    pub(crate) samplers: SlotMap<GfxSamplerHandle, vk::Sampler>,

    pub(crate) fences: SlotMap<GfxFenceHandle, vk::Fence>,
    pub(crate) semaphores: SlotMap<GfxSemaphoreHandle, vk::Semaphore>,
    pub(crate) command_buffers: SlotMap<GfxCommandBufferHandle, vk::CommandBuffer>,

    pub(crate) descriptor_pools: SlotMap<GfxDescriptorPoolHandle, VulkanDescriptorPool>,
    pub(crate) descriptor_set_layouts: SlotMap<GfxDescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    pub(crate) descriptor_sets: SlotMap<GfxDescriptorSetHandle, vk::DescriptorSet>,

    pub(crate) pipeline_layouts: SlotMap<GfxPipelineLayoutHandle, vk::PipelineLayout>,
    pub(crate) pipelines: SlotMap<GfxPipelineHandle, vk::Pipeline>,

    pub(crate) query_pools: SlotMap<GfxQueryPoolHandle, vk::QueryPool>,
    pub(crate) swapchains: SlotMap<GfxSwapchainHandle, VulkanSwapchain>,
}

/// Vulkan 设备，实现了 [`crate::GfxBackend`] 的全部能力
///
/// 只使用一个同时支持 graphics 和 present 的 queue
pub struct VulkanBackend {
    /// 需要保持 vulkan 动态库处于加载状态
    _entry: ash::Entry,
    instance: GfxInstance,
    debug_msger: GfxDebugMsger,

    surface_pf: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,

    physical_device: GfxPhysicalDevice,
    device: GfxDevice,
    allocator: VMemAllocator,

    queue: vk::Queue,
    /// 逐帧录制的 command buffer 和一次性命令都从这个 pool 分配
    command_pool: vk::CommandPool,

    res: VulkanResources,
}

// new & init
impl VulkanBackend {
    pub fn new(app_name: &str, display_handle: RawDisplayHandle, window_handle: RawWindowHandle) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanBackend::new");

        let entry = unsafe { ash::Entry::load() }?;

        let surface_exts = ash_window::enumerate_required_extensions(display_handle)
            .vk_call("ash_window::enumerate_required_extensions")?;
        let instance = GfxInstance::new(&entry, app_name, surface_exts)?;
        let debug_msger = GfxDebugMsger::new(&entry, instance.ash_instance())?;

        let surface_pf = ash::khr::surface::Instance::new(&entry, instance.ash_instance());
        let surface = unsafe {
            ash_window::create_surface(&entry, instance.ash_instance(), display_handle, window_handle, None)
        }
        .vk_call("vkCreateSurfaceKHR")?;

        let physical_device =
            GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance(), &surface_pf, surface)?;
        let device = GfxDevice::new(instance.ash_instance(), &physical_device)?;
        let allocator = VMemAllocator::new(instance.ash_instance(), physical_device.vk_handle, &device)?;

        let queue = unsafe { device.get_device_queue(physical_device.gfx_queue_family_index, 0) };
        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(physical_device.gfx_queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }
        .vk_call("vkCreateCommandPool")?;
        device.set_object_debug_name(command_pool, "CommandPool::gfx");

        log::info!(
            "vulkan backend ready: validation = {}, conditional rendering = {}",
            instance.validation,
            physical_device.conditional_rendering
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_msger,
            surface_pf,
            surface,
            physical_device,
            device,
            allocator,
            queue,
            command_pool,
            res: VulkanResources::default(),
        })
    }
}

// destroy
impl VulkanBackend {
    /// 销毁所有残留的对象，然后按照创建的逆序销毁设备
    pub fn destroy(mut self) {
        let _span = tracy_client::span!("VulkanBackend::destroy");
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device wait idle failed before destroy: {:?}", e);
            }
        }

        let leaked = crate::GfxResources::resource_stats(&self);
        if leaked.total() != 0 {
            log::warn!("gpu objects still alive when destroying backend: {}", leaked);
        }
        self.destroy_remaining();

        let Self {
            instance,
            debug_msger,
            surface_pf,
            surface,
            device,
            allocator,
            command_pool,
            ..
        } = self;

        unsafe {
            device.destroy_command_pool(command_pool, None);
        }
        allocator.destroy();
        device.destroy();
        unsafe {
            surface_pf.destroy_surface(surface, None);
        }
        debug_msger.destroy();
        instance.destroy();
    }

    fn destroy_remaining(&mut self) {
        use crate::backend::*;

        let swapchains = self.res.swapchains.keys().collect::<Vec<_>>();
        swapchains.into_iter().for_each(|h| self.destroy_swapchain(h));
        let pipelines = self.res.pipelines.keys().collect::<Vec<_>>();
        pipelines.into_iter().for_each(|h| self.destroy_pipeline(h));
        let layouts = self.res.pipeline_layouts.keys().collect::<Vec<_>>();
        layouts.into_iter().for_each(|h| self.destroy_pipeline_layout(h));
        let pools = self.res.descriptor_pools.keys().collect::<Vec<_>>();
        pools.into_iter().for_each(|h| self.destroy_descriptor_pool(h));
        let set_layouts = self.res.descriptor_set_layouts.keys().collect::<Vec<_>>();
        set_layouts.into_iter().for_each(|h| self.destroy_descriptor_set_layout(h));
        let query_pools = self.res.query_pools.keys().collect::<Vec<_>>();
        query_pools.into_iter().for_each(|h| self.destroy_query_pool(h));
        let cmds = self.res.command_buffers.keys().collect::<Vec<_>>();
        cmds.into_iter().for_each(|h| self.free_command_buffer(h));
        let fences = self.res.fences.keys().collect::<Vec<_>>();
        fences.into_iter().for_each(|h| self.destroy_fence(h));
        let semaphores = self.res.semaphores.keys().collect::<Vec<_>>();
        semaphores.into_iter().for_each(|h| self.destroy_semaphore(h));
        let views = self.res.image_views.keys().collect::<Vec<_>>();
        views.into_iter().for_each(|h| self.destroy_image_view(h));
        let samplers = self.res.samplers.keys().collect::<Vec<_>>();
        samplers.into_iter().for_each(|h| self.destroy_sampler(h));
        let images = self.res.images.keys().collect::<Vec<_>>();
        images.into_iter().for_each(|h| self.destroy_image(h));
        let buffers = self.res.buffers.keys().collect::<Vec<_>>();
        buffers.into_iter().for_each(|h| self.destroy_buffer(h));
    }
}

// tools
impl VulkanBackend {
    /// 立即执行某个 command，并同步等待执行结果
    pub(crate) fn one_time_exec<F>(&self, name: &str, func: F) -> GfxResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let _span = tracy_client::span!("one_time_exec");
        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }
        .vk_call("vkAllocateCommandBuffers")?[0];
        self.device.set_object_debug_name(cmd, format!("one-time-{}", name));

        let result = (|| unsafe {
            self.device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .vk_call("vkBeginCommandBuffer")?;
            func(&self.device, cmd);
            self.device.end_command_buffer(cmd).vk_call("vkEndCommandBuffer")?;

            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            self.device
                .queue_submit2(self.queue, std::slice::from_ref(&submit_info), vk::Fence::null())
                .vk_call("vkQueueSubmit2")?;
            self.device.queue_wait_idle(self.queue).vk_call("vkQueueWaitIdle")
        })();

        unsafe {
            self.device.free_command_buffers(self.command_pool, &[cmd]);
        }
        result
    }

    #[inline]
    pub(crate) fn buffer(&self, buffer: GfxBufferHandle) -> vk::Buffer {
        self.res.buffers[buffer].handle
    }

    #[inline]
    pub(crate) fn image(&self, image: GfxImageHandle) -> vk::Image {
        self.res.images[image].handle
    }

    #[inline]
    pub(crate) fn cmd(&self, cmd: GfxCommandBufferHandle) -> vk::CommandBuffer {
        self.res.command_buffers[cmd]
    }
}

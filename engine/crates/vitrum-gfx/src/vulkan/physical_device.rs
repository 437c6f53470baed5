use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult, VkResultExt};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 同时支持 graphics 和 present 的 queue family
    pub(crate) gfx_queue_family_index: u32,

    /// 是否支持 `VK_EXT_conditional_rendering`
    pub(crate) conditional_rendering: bool,
}

// new & init
impl GfxPhysicalDevice {
    /// 选择一张可用于渲染到 surface 的显卡
    ///
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn new_descrete_physical_device(
        instance: &ash::Instance,
        surface_pf: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxPhysicalDevice::new");

        let pdevices = unsafe { instance.enumerate_physical_devices() }.vk_call("vkEnumeratePhysicalDevices")?;
        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| match Self::new(*pdevice, instance, surface_pf, surface) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::warn!("skip physical device: {}", e);
                    None
                }
            })
            .collect_vec();

        candidates
            .into_iter()
            // 优先使用独立显卡
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .ok_or_else(|| GfxError::NoSuitableDevice("no gpu supports vulkan 1.3 with graphics + present".into()))
    }

    fn new(
        pdevice: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface_pf: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> GfxResult<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let physical_device_name = basic_props.device_name_as_c_str().unwrap_or(c"unknown");
        log::info!("found gpu: {:?}", physical_device_name);

        if basic_props.api_version < vk::API_VERSION_1_3 {
            return Err(GfxError::NoSuitableDevice(format!("{:?} does not support vulkan 1.3", physical_device_name)));
        }

        // 找到当前 gpu 支持的 extensions
        let device_extensions = unsafe { instance.enumerate_device_extension_properties(pdevice) }
            .vk_call("vkEnumerateDeviceExtensionProperties")?;
        let supports_ext = |ext: &CStr| {
            device_extensions.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext))
        };
        if !supports_ext(ash::khr::swapchain::NAME) {
            return Err(GfxError::NoSuitableDevice(format!("{:?} does not support swapchain", physical_device_name)));
        }
        let conditional_rendering = supports_ext(ash::ext::conditional_rendering::NAME);

        // 全能的 queue：graphics，并且可以 present 到 surface
        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::debug!("physical device: queue family props:\n{:#?}", queue_family_props);
        let gfx_queue_family_index = queue_family_props
            .iter()
            .enumerate()
            .filter(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER))
            .map(|(idx, _)| idx as u32)
            .find(|idx| unsafe {
                surface_pf.get_physical_device_surface_support(pdevice, *idx, surface).unwrap_or(false)
            })
            .ok_or_else(|| {
                GfxError::NoSuitableDevice(format!("{:?} has no graphics queue that can present", physical_device_name))
            })?;

        Ok(Self {
            vk_handle: pdevice,
            basic_props,
            gfx_queue_family_index,
            conditional_rendering,
        })
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.basic_props.limits.min_uniform_buffer_offset_alignment
    }

    /// color 和 depth 都支持的采样数
    #[inline]
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        self.basic_props.limits.framebuffer_color_sample_counts & self.basic_props.limits.framebuffer_depth_sample_counts
    }
}

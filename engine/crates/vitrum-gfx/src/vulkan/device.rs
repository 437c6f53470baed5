use std::{
    ffi::{CStr, CString},
    ops::Deref,
};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxResult, VkResultExt},
    vulkan::physical_device::GfxPhysicalDevice,
};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及用到的扩展函数指针，这些函数指针在应用生命周期中保持不变。
///
/// # 扩展支持
/// - Dynamic Rendering 和 Synchronization2（core 1.3）
/// - Swapchain (KHR)
/// - Debug Utils (EXT)
/// - Conditional Rendering (EXT)，可选
pub struct GfxDevice {
    pub(crate) device: ash::Device,
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    pub(crate) swapchain: ash::khr::swapchain::Device,
    /// 设备不支持时为 None，此时 conditional rendering 退化为无条件绘制
    pub(crate) conditional_rendering: Option<ash::ext::conditional_rendering::Device>,
}

// new & init
impl GfxDevice {
    pub fn new(instance: &ash::Instance, pdevice: &GfxPhysicalDevice) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        // device 所需的所有 extension
        let device_exts = Self::basic_device_exts(pdevice.conditional_rendering);
        log::info!("device exts: {:?}", device_exts);
        let device_exts = device_exts.iter().map(|e| e.as_ptr()).collect_vec();

        // device 所需的所有 features
        let mut vk13_features =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true);
        let mut conditional_rendering_features =
            vk::PhysicalDeviceConditionalRenderingFeaturesEXT::default().conditional_rendering(true);
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(Self::physical_device_basic_features())
            .push_next(&mut vk13_features);
        if pdevice.conditional_rendering {
            all_features = all_features.push_next(&mut conditional_rendering_features);
        }

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(pdevice.gfx_queue_family_index)
            .queue_priorities(&queue_priorities)];

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice.vk_handle, &device_create_info, None) }
            .vk_call("vkCreateDevice")?;

        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);
        let swapchain = ash::khr::swapchain::Device::new(instance, &device);
        let conditional_rendering = pdevice
            .conditional_rendering
            .then(|| ash::ext::conditional_rendering::Device::new(instance, &device));

        Ok(Self {
            device,
            debug_utils,
            swapchain,
            conditional_rendering,
        })
    }
}

// destroy
impl GfxDevice {
    pub fn destroy(self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 创建过程的辅助函数
impl GfxDevice {
    /// 必要的 physical device core features
    fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true).independent_blend(true)
    }

    /// 必要的 device extensions
    fn basic_device_exts(conditional_rendering: bool) -> Vec<&'static CStr> {
        let mut exts = vec![ash::khr::swapchain::NAME];
        if conditional_rendering {
            exts.push(ash::ext::conditional_rendering::NAME);
        }
        exts
    }
}

// tools
impl GfxDevice {
    /// 为 vk 对象设置 debug name，失败时忽略
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let result = unsafe {
            self.debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::debug!("failed to set debug name {:?}: {:?}", name, e);
        }
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

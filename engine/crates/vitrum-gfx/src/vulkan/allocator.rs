use std::ops::Deref;

use ash::vk;

use crate::error::{GfxResult, VkResultExt};

pub struct VMemAllocator {
    inner: vk_mem::Allocator,
}

impl VMemAllocator {
    /// vma 需要引用 Instance 以及 Device，并确保在其生命周期之内这两个的引用是有效的。
    /// 因此需要在 device 创建完成后再初始化 vma，并在 device 销毁之前 drop
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci) }.vk_call("vmaCreateAllocator")?;

        Ok(Self { inner: vma })
    }

    /// 通过 drop 触发销毁
    pub fn destroy(self) {
        log::info!("destroying vma allocator");
    }
}

impl Deref for VMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

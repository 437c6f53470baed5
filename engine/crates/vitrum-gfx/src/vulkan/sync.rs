use ash::vk;

use crate::{
    backend::GfxSync,
    error::{GfxResult, VkResultExt},
    handles::{GfxFenceHandle, GfxSemaphoreHandle},
    vulkan::VulkanBackend,
};

impl GfxSync for VulkanBackend {
    fn create_fence(&mut self, signaled: bool, name: &str) -> GfxResult<GfxFenceHandle> {
        let fence_flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None) }
            .vk_call("vkCreateFence")?;
        self.device.set_object_debug_name(fence, format!("Fence::{}", name));

        Ok(self.res.fences.insert(fence))
    }

    fn wait_fence(&mut self, fence: GfxFenceHandle, timeout_ns: u64) -> GfxResult<()> {
        let _span = tracy_client::span!("wait_fence");
        let fence = self.res.fences[fence];
        unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) }
            .vk_call("vkWaitForFences")
    }

    fn reset_fence(&mut self, fence: GfxFenceHandle) -> GfxResult<()> {
        let fence = self.res.fences[fence];
        unsafe { self.device.reset_fences(std::slice::from_ref(&fence)) }.vk_call("vkResetFences")
    }

    fn destroy_fence(&mut self, fence: GfxFenceHandle) {
        if let Some(fence) = self.res.fences.remove(fence) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn create_semaphore(&mut self, name: &str) -> GfxResult<GfxSemaphoreHandle> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .vk_call("vkCreateSemaphore")?;
        self.device.set_object_debug_name(semaphore, format!("Semaphore::{}", name));

        Ok(self.res.semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&mut self, semaphore: GfxSemaphoreHandle) {
        if let Some(semaphore) = self.res.semaphores.remove(semaphore) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("device_wait_idle");
        unsafe { self.device.device_wait_idle() }.vk_call("vkDeviceWaitIdle")
    }
}

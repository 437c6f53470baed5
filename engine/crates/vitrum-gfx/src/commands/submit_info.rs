use ash::vk;

use crate::handles::{GfxCommandBufferHandle, GfxSemaphoreHandle};

/// 一次 queue submit 的内容
#[derive(Debug, Clone, Default)]
pub struct GfxSubmitInfo {
    pub command_buffers: Vec<GfxCommandBufferHandle>,
    pub wait_semaphores: Vec<(GfxSemaphoreHandle, vk::PipelineStageFlags2)>,
    pub signal_semaphores: Vec<(GfxSemaphoreHandle, vk::PipelineStageFlags2)>,
}

impl GfxSubmitInfo {
    #[inline]
    pub fn new(commands: &[GfxCommandBufferHandle]) -> Self {
        Self {
            command_buffers: commands.to_vec(),
            ..Default::default()
        }
    }

    /// builder：在 `stage` 之前等待 semaphore
    #[inline]
    pub fn wait(mut self, semaphore: GfxSemaphoreHandle, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_semaphores.push((semaphore, stage));
        self
    }

    /// builder：在 `stage` 完成后 signal semaphore
    #[inline]
    pub fn signal(mut self, semaphore: GfxSemaphoreHandle, stage: vk::PipelineStageFlags2) -> Self {
        self.signal_semaphores.push((semaphore, stage));
        self
    }
}

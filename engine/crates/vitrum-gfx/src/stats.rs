use std::fmt::Display;

/// 当前存活的 GPU 对象数量，用于检查泄漏
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GfxResourceStats {
    pub buffers: usize,
    pub images: usize,
    /// 由 swapchain 持有的 image，不计入 `images`
    pub swapchain_images: usize,
    pub image_views: usize,
    pub samplers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub command_buffers: usize,
    pub descriptor_pools: usize,
    pub descriptor_set_layouts: usize,
    pub descriptor_sets: usize,
    pub pipeline_layouts: usize,
    pub pipelines: usize,
    pub query_pools: usize,
    pub swapchains: usize,
}

impl GfxResourceStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.buffers
            + self.images
            + self.swapchain_images
            + self.image_views
            + self.samplers
            + self.fences
            + self.semaphores
            + self.command_buffers
            + self.descriptor_pools
            + self.descriptor_set_layouts
            + self.descriptor_sets
            + self.pipeline_layouts
            + self.pipelines
            + self.query_pools
            + self.swapchains
    }
}

impl Display for GfxResourceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buffers: {}, images: {} (+{} swapchain), views: {}, samplers: {}, fences: {}, semaphores: {}, \
             cmds: {}, pools: {}, set layouts: {}, sets: {}, pipeline layouts: {}, pipelines: {}, query pools: {}, \
             swapchains: {}",
            self.buffers,
            self.images,
            self.swapchain_images,
            self.image_views,
            self.samplers,
            self.fences,
            self.semaphores,
            self.command_buffers,
            self.descriptor_pools,
            self.descriptor_set_layouts,
            self.descriptor_sets,
            self.pipeline_layouts,
            self.pipelines,
            self.query_pools,
            self.swapchains
        )
    }
}

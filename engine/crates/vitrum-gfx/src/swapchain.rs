use ash::vk;

use crate::handles::{GfxImageHandle, GfxSwapchainHandle};

/// surface 当前支持的能力
#[derive(Debug, Clone)]
pub struct GfxSurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// 创建 swapchain 的参数，已经完成格式和呈现模式的选择
#[derive(Debug, Clone, Copy)]
pub struct GfxSwapchainDesc {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// swapchain 以及它的 image，image 由 swapchain 持有，不能单独销毁
#[derive(Debug, Clone)]
pub struct GfxSwapchain {
    pub handle: GfxSwapchainHandle,
    pub images: Vec<GfxImageHandle>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
}

/// acquire next image 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxAcquire {
    /// 拿到了 image，suboptimal 表示仍然可以使用，但是在 present 之后需要重建
    Image { index: u32, suboptimal: bool },
    /// surface 已经失效，必须重建 swapchain，本帧放弃
    Stale,
}

/// present 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxPresentResult {
    Presented,
    Suboptimal,
    Stale,
}

impl GfxPresentResult {
    #[inline]
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

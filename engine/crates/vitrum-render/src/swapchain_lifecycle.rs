//! swapchain 以及依赖于它的 image view、MSAA color/depth target
//!
//! 尺寸或者格式变化时整体销毁并重建。使用 dynamic rendering，没有单独的 framebuffer 对象，
//! 每个 swapchain image 的 view 就是它的 framebuffer。

use itertools::Itertools;
use vitrum_gfx::{
    GfxBackend, GfxImageHandle, GfxImageViewHandle, GfxResources, GfxResult, GfxSwapchainHandle,
    resources::image::{GfxImageDesc, GfxImageViewDesc},
    swapchain::{GfxSurfaceSupport, GfxSwapchain, GfxSwapchainDesc},
    vk,
};

use crate::config::{RendererConfig, RendererConstants};

/// 提供窗口当前的 drawable 尺寸，最小化时为 0
pub trait SurfaceExtentSource {
    fn drawable_size(&mut self) -> vk::Extent2D;
}

impl<F> SurfaceExtentSource for F
where
    F: FnMut() -> vk::Extent2D,
{
    #[inline]
    fn drawable_size(&mut self) -> vk::Extent2D {
        self()
    }
}

/// 一个 image 以及覆盖它的 view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub image: GfxImageHandle,
    pub view: GfxImageViewHandle,
}

impl RenderTarget {
    pub fn new(
        gfx: &mut impl GfxResources,
        desc: &GfxImageDesc,
        view_desc: &GfxImageViewDesc,
        name: &str,
    ) -> GfxResult<Self> {
        let image = gfx.create_image(desc, name)?;
        match gfx.create_image_view(image, view_desc, name) {
            Ok(view) => Ok(Self { image, view }),
            Err(e) => {
                gfx.destroy_image(image);
                Err(e)
            }
        }
    }

    pub fn destroy(self, gfx: &mut impl GfxResources) {
        gfx.destroy_image_view(self.view);
        gfx.destroy_image(self.image);
    }
}

/// 一次创建得到的全部呈现资源
pub struct SwapchainResources {
    swapchain: GfxSwapchain,
    present_mode: vk::PresentModeKHR,
    /// 和 swapchain image 一一对应
    views: Vec<GfxImageViewHandle>,
    /// 采样数为 1 时直接渲染到 swapchain image
    msaa_color: Option<RenderTarget>,
    depth: RenderTarget,
    samples: vk::SampleCountFlags,
}

// getters
impl SwapchainResources {
    #[inline]
    pub fn handle(&self) -> GfxSwapchainHandle {
        self.swapchain.handle
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
    #[inline]
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format
    }
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }
    #[inline]
    pub fn image(&self, index: u32) -> GfxImageHandle {
        self.swapchain.images[index as usize]
    }
    #[inline]
    pub fn view(&self, index: u32) -> GfxImageViewHandle {
        self.views[index as usize]
    }
    #[inline]
    pub fn msaa_color(&self) -> Option<RenderTarget> {
        self.msaa_color
    }
    #[inline]
    pub fn depth(&self) -> RenderTarget {
        self.depth
    }
    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

pub struct SwapchainLifecycle {
    resources: Option<SwapchainResources>,

    preferred_format: vk::SurfaceFormatKHR,
    requested_present_mode: vk::PresentModeKHR,
    samples: vk::SampleCountFlags,

    /// 重建次数，不包括第一次创建
    recreate_count: u64,
}

// new & init
impl SwapchainLifecycle {
    /// `samples` 已经按照设备能力裁剪
    pub fn new(
        gfx: &mut impl GfxBackend,
        config: &RendererConfig,
        samples: vk::SampleCountFlags,
        surface: &mut dyn SurfaceExtentSource,
    ) -> GfxResult<Self> {
        let mut lifecycle = Self {
            resources: None,
            preferred_format: RendererConstants::SURFACE_FORMAT,
            requested_present_mode: config.present_mode.to_vk(),
            samples,
            recreate_count: 0,
        };
        lifecycle.resources = Some(lifecycle.create_resources(gfx, surface)?);
        Ok(lifecycle)
    }

    /// 优先使用 `preferred`，否则使用同色彩空间的 sRGB 格式，最后退回第一个格式
    pub fn choose_surface_format(
        formats: &[vk::SurfaceFormatKHR],
        preferred: vk::SurfaceFormatKHR,
    ) -> vk::SurfaceFormatKHR {
        // 只有一个 UNDEFINED 表示可以任意选择
        if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
            return preferred;
        }
        let srgb = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
        formats
            .iter()
            .find(|f| **f == preferred)
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| f.color_space == preferred.color_space && srgb.contains(&f.format))
            })
            .or_else(|| formats.first())
            .copied()
            .unwrap_or(preferred)
    }

    /// FIFO 一定被支持，作为兜底
    pub fn choose_present_mode(modes: &[vk::PresentModeKHR], requested: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if modes.contains(&requested) {
            requested
        } else {
            log::warn!("present mode {:?} is not supported, fall back to FIFO", requested);
            vk::PresentModeKHR::FIFO
        }
    }

    /// max_image_count == 0，表示不限制 image 数量
    pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
        if capabilities.max_image_count == 0 {
            capabilities.min_image_count + 1
        } else {
            u32::min(capabilities.max_image_count, capabilities.min_image_count + 1)
        }
    }

    /// 如果 current_extent 是特殊值 0xFFFFFFFF，则由 swapchain 自己决定尺寸
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == 0xFFFFFFFF || surface_extent.height == 0xFFFFFFFF {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }

    /// 窗口最小化时轮询，直到尺寸不为 0
    fn wait_for_drawable(
        gfx: &mut impl GfxBackend,
        surface: &mut dyn SurfaceExtentSource,
    ) -> GfxResult<(GfxSurfaceSupport, vk::Extent2D)> {
        let mut logged = false;
        loop {
            let window_extent = surface.drawable_size();
            let support = gfx.surface_support()?;
            let extent = Self::calculate_swapchain_extent(&support.capabilities, window_extent);
            let is_zero = |e: vk::Extent2D| e.width == 0 || e.height == 0;
            if !is_zero(window_extent) && !is_zero(extent) {
                return Ok((support, extent));
            }
            if !logged {
                log::info!("drawable size is zero, wait until the window is restored");
                logged = true;
            }
            std::thread::sleep(RendererConstants::MINIMIZED_POLL_INTERVAL);
        }
    }

    fn create_resources(
        &self,
        gfx: &mut impl GfxBackend,
        surface: &mut dyn SurfaceExtentSource,
    ) -> GfxResult<SwapchainResources> {
        let _span = crate::profile_span!("SwapchainLifecycle::create_resources");

        let (support, extent) = Self::wait_for_drawable(gfx, surface)?;
        let format = Self::choose_surface_format(&support.formats, self.preferred_format);
        let present_mode = Self::choose_present_mode(&support.present_modes, self.requested_present_mode);
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            final swapchain extent: {}x{}, format: {:?}, present mode: {:?}",
            support.capabilities.current_extent.width,
            support.capabilities.current_extent.height,
            support.capabilities.min_image_extent.width,
            support.capabilities.min_image_extent.height,
            support.capabilities.max_image_extent.width,
            support.capabilities.max_image_extent.height,
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        let swapchain = gfx.create_swapchain(
            &GfxSwapchainDesc {
                format,
                present_mode,
                extent,
                image_count: Self::choose_image_count(&support.capabilities),
                pre_transform: support.capabilities.current_transform,
            },
            "main",
        )?;

        let mut views = Vec::with_capacity(swapchain.images.len());
        let mut msaa_color = None;
        match self.create_attachments(gfx, &swapchain, format.format, &mut views, &mut msaa_color) {
            Ok(depth) => Ok(SwapchainResources {
                swapchain,
                present_mode,
                views,
                msaa_color,
                depth,
                samples: self.samples,
            }),
            Err(e) => {
                // 失败时按照相同的依赖顺序销毁已经创建的部分
                for view in views {
                    gfx.destroy_image_view(view);
                }
                if let Some(msaa_color) = msaa_color {
                    msaa_color.destroy(gfx);
                }
                gfx.destroy_swapchain(swapchain.handle);
                Err(e)
            }
        }
    }

    /// 创建 swapchain image 的 view 和离屏 target，已经创建的对象写入 `views` 和 `msaa_color`
    fn create_attachments(
        &self,
        gfx: &mut impl GfxBackend,
        swapchain: &GfxSwapchain,
        format: vk::Format,
        views: &mut Vec<GfxImageViewHandle>,
        msaa_color: &mut Option<RenderTarget>,
    ) -> GfxResult<RenderTarget> {
        let extent = swapchain.extent;
        for (idx, image) in swapchain.images.iter().enumerate() {
            views.push(gfx.create_image_view(*image, &GfxImageViewDesc::color(), &format!("swapchain-{}", idx))?);
        }

        if self.samples != vk::SampleCountFlags::TYPE_1 {
            *msaa_color = Some(RenderTarget::new(
                gfx,
                &GfxImageDesc::new_image_2d(
                    extent,
                    format,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                )
                .samples(self.samples),
                &GfxImageViewDesc::color(),
                "main-msaa-color",
            )?);
        }
        RenderTarget::new(
            gfx,
            &GfxImageDesc::new_image_2d(
                extent,
                RendererConstants::DEPTH_FORMAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .samples(self.samples),
            &GfxImageViewDesc::depth(),
            "main-depth",
        )
    }
}

// update
impl SwapchainLifecycle {
    /// 等待 GPU 空闲后按依赖顺序销毁，再以相同的选择策略重新创建
    pub fn recreate(&mut self, gfx: &mut impl GfxBackend, surface: &mut dyn SurfaceExtentSource) -> GfxResult<()> {
        let _span = crate::profile_span!("SwapchainLifecycle::recreate");
        gfx.wait_idle()?;

        if let Some(resources) = self.resources.take() {
            Self::destroy_resources(gfx, resources);
        }
        self.resources = Some(self.create_resources(gfx, surface)?);
        self.recreate_count += 1;
        Ok(())
    }

    /// view -> 离屏 color/depth -> swapchain
    fn destroy_resources(gfx: &mut impl GfxBackend, resources: SwapchainResources) {
        for view in resources.views {
            gfx.destroy_image_view(view);
        }
        if let Some(msaa_color) = resources.msaa_color {
            msaa_color.destroy(gfx);
        }
        resources.depth.destroy(gfx);
        gfx.destroy_swapchain(resources.swapchain.handle);
    }
}

// getters
impl SwapchainLifecycle {
    /// 只有在 `recreate` 失败之后才会为 None
    #[inline]
    pub fn resources(&self) -> Option<&SwapchainResources> {
        self.resources.as_ref()
    }
    #[inline]
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }
    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
    pub fn image_views(&self) -> Vec<GfxImageViewHandle> {
        self.resources.iter().flat_map(|r| r.views.iter().copied()).collect_vec()
    }
}

// destroy
impl SwapchainLifecycle {
    /// 调用前 GPU 必须已经空闲
    pub fn destroy(mut self, gfx: &mut impl GfxBackend) {
        if let Some(resources) = self.resources.take() {
            Self::destroy_resources(gfx, resources);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use vitrum_gfx::{
        GfxError,
        mock::{GfxEvent, GfxObjectKind, MockGfx},
    };

    use super::*;

    fn window_800x600() -> impl FnMut() -> vk::Extent2D {
        || vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format() {
        let preferred = RendererConstants::SURFACE_FORMAT;
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let rgba_srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(SwapchainLifecycle::choose_surface_format(&[unorm, preferred], preferred), preferred);
        assert_eq!(SwapchainLifecycle::choose_surface_format(&[unorm, rgba_srgb], preferred), rgba_srgb);
        assert_eq!(SwapchainLifecycle::choose_surface_format(&[unorm], preferred), unorm);
        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(SwapchainLifecycle::choose_surface_format(&[undefined], preferred), preferred);
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            SwapchainLifecycle::choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            SwapchainLifecycle::choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_and_image_count() {
        let fixed = caps(vk::Extent2D {
            width: 640,
            height: 480,
        });
        let window = vk::Extent2D {
            width: 9000,
            height: 0,
        };
        assert_eq!(SwapchainLifecycle::calculate_swapchain_extent(&fixed, window), fixed.current_extent);

        let free = caps(vk::Extent2D {
            width: 0xFFFFFFFF,
            height: 0xFFFFFFFF,
        });
        assert_eq!(
            SwapchainLifecycle::calculate_swapchain_extent(&free, window),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );

        assert_eq!(SwapchainLifecycle::choose_image_count(&fixed), 3);
        let unlimited = vk::SurfaceCapabilitiesKHR {
            max_image_count: 0,
            ..fixed
        };
        assert_eq!(SwapchainLifecycle::choose_image_count(&unlimited), 3);
    }

    #[test]
    fn test_recreate_is_idempotent() {
        let mut gfx = MockGfx::new();
        let mut window = window_800x600();
        let mut lifecycle =
            SwapchainLifecycle::new(&mut gfx, &RendererConfig::default(), vk::SampleCountFlags::TYPE_4, &mut window)
                .unwrap();

        let describe = |l: &SwapchainLifecycle| {
            let r = l.resources().unwrap();
            (r.image_count(), r.format(), r.extent(), r.present_mode())
        };
        let before = describe(&lifecycle);
        let stats_before = gfx.resource_stats();

        lifecycle.recreate(&mut gfx, &mut window).unwrap();
        lifecycle.recreate(&mut gfx, &mut window).unwrap();

        assert_eq!(describe(&lifecycle), before);
        assert_eq!(gfx.resource_stats(), stats_before);
        assert_eq!(lifecycle.recreate_count(), 2);
        assert_eq!(before.3, vk::PresentModeKHR::MAILBOX);

        lifecycle.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().total(), 0);
    }

    #[test]
    fn test_failed_recreate_releases_partial_resources() {
        let mut gfx = MockGfx::new();
        let mut window = window_800x600();
        let mut lifecycle =
            SwapchainLifecycle::new(&mut gfx, &RendererConfig::default(), vk::SampleCountFlags::TYPE_4, &mut window)
                .unwrap();

        // msaa color 创建成功，depth 失败
        gfx.fail_images_after(1);
        gfx.clear_events();
        assert!(matches!(
            lifecycle.recreate(&mut gfx, &mut window),
            Err(GfxError::Allocation { .. })
        ));
        assert!(lifecycle.resources().is_none());
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::CreateSwapchain { .. })), 1);
        assert_eq!(gfx.resource_stats().total(), 0);

        lifecycle.destroy(&mut gfx);
    }

    #[test]
    fn test_recreate_order() {
        let mut gfx = MockGfx::new();
        let mut window = window_800x600();
        let mut lifecycle =
            SwapchainLifecycle::new(&mut gfx, &RendererConfig::default(), vk::SampleCountFlags::TYPE_4, &mut window)
                .unwrap();
        gfx.clear_events();
        gfx.set_surface_extent(1024, 768);
        lifecycle.recreate(&mut gfx, &mut window).unwrap();

        let wait_idle = gfx.position(|e| matches!(e, GfxEvent::WaitIdle)).unwrap();
        let first_view = gfx
            .position(|e| matches!(e, GfxEvent::Destroy { kind: GfxObjectKind::ImageView }))
            .unwrap();
        let first_image = gfx
            .position(|e| matches!(e, GfxEvent::Destroy { kind: GfxObjectKind::Image }))
            .unwrap();
        let swapchain = gfx
            .position(|e| matches!(e, GfxEvent::Destroy { kind: GfxObjectKind::Swapchain }))
            .unwrap();
        let create = gfx.position(|e| matches!(e, GfxEvent::CreateSwapchain { .. })).unwrap();
        assert!(wait_idle < first_view);
        assert!(first_view < first_image);
        assert!(first_image < swapchain);
        assert!(swapchain < create);

        let resources = lifecycle.resources().unwrap();
        assert_eq!(resources.extent(), vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(gfx.image_desc(resources.depth().image).extent, resources.extent());
    }

    #[test]
    fn test_minimized_window_polls_until_restored() {
        let mut gfx = MockGfx::new();
        let calls = Cell::new(0);
        let mut window = || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                vk::Extent2D { width: 0, height: 0 }
            } else {
                vk::Extent2D {
                    width: 800,
                    height: 600,
                }
            }
        };
        let lifecycle =
            SwapchainLifecycle::new(&mut gfx, &RendererConfig::default(), vk::SampleCountFlags::TYPE_1, &mut window)
                .unwrap();
        assert_eq!(calls.get(), 3);
        // 单采样时直接渲染到 swapchain image
        assert!(lifecycle.resources().unwrap().msaa_color().is_none());
    }
}

use vitrum_gfx::{
    GfxImageHandle, GfxImageViewHandle, GfxResources, GfxResult,
    resources::image::{GfxImageDesc, GfxImageViewDesc},
    vk,
};

use crate::{config::RendererConstants, swapchain_lifecycle::RenderTarget};

/// 一个 frame slot 的全部离屏 target
///
/// 尺寸和 swapchain 一致，resize 时整体重建
pub struct TransmissionTargets {
    extent: vk::Extent2D,
    mip_levels: u32,

    /// 带完整 mip 链，作为折射的采样源
    opaque_color: RenderTarget,
    /// 只覆盖 mip 0，作为 attachment
    opaque_color_attachment: GfxImageViewHandle,
    opaque_depth: RenderTarget,
    /// 上一层剥离得到的深度，每帧清除为 0
    prev_depth: RenderTarget,

    peel_depth: Vec<RenderTarget>,
    peel_color: Vec<RenderTarget>,

    /// opaque + 所有 peel 层混合的结果
    composite: RenderTarget,
}

#[derive(Default)]
struct CreatedObjects {
    images: Vec<GfxImageHandle>,
    views: Vec<GfxImageViewHandle>,
}

impl CreatedObjects {
    fn target(
        &mut self,
        gfx: &mut impl GfxResources,
        desc: &GfxImageDesc,
        view_desc: &GfxImageViewDesc,
        name: &str,
    ) -> GfxResult<RenderTarget> {
        let image = gfx.create_image(desc, name)?;
        self.images.push(image);
        let view = gfx.create_image_view(image, view_desc, name)?;
        self.views.push(view);
        Ok(RenderTarget { image, view })
    }

    fn destroy(self, gfx: &mut impl GfxResources) {
        for view in self.views {
            gfx.destroy_image_view(view);
        }
        for image in self.images {
            gfx.destroy_image(image);
        }
    }
}

// new & init
impl TransmissionTargets {
    pub fn new(gfx: &mut impl GfxResources, extent: vk::Extent2D, layer_count: u32, name: &str) -> GfxResult<Self> {
        let mut created = CreatedObjects::default();
        match Self::create(gfx, extent, layer_count, name, &mut created) {
            Ok(targets) => Ok(targets),
            Err(e) => {
                log::error!("failed to create transmission targets `{}`: {}", name, e);
                created.destroy(gfx);
                Err(e)
            }
        }
    }

    fn create(
        gfx: &mut impl GfxResources,
        extent: vk::Extent2D,
        layer_count: u32,
        name: &str,
        created: &mut CreatedObjects,
    ) -> GfxResult<Self> {
        let color_format = RendererConstants::OFFSCREEN_COLOR_FORMAT;
        let depth_format = RendererConstants::DEPTH_FORMAT;
        let mip_levels = GfxImageDesc::full_mip_chain(extent);

        let opaque_color = created.target(
            gfx,
            &GfxImageDesc::new_image_2d(
                extent,
                color_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .mip_levels(mip_levels),
            &GfxImageViewDesc::color(),
            &format!("{}-opaque-color", name),
        )?;
        let opaque_color_attachment = gfx.create_image_view(
            opaque_color.image,
            &GfxImageViewDesc::color().single_mip(0),
            &format!("{}-opaque-color-mip0", name),
        )?;
        created.views.push(opaque_color_attachment);

        let opaque_depth = created.target(
            gfx,
            &GfxImageDesc::new_image_2d(
                extent,
                depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
            &GfxImageViewDesc::depth(),
            &format!("{}-opaque-depth", name),
        )?;
        let prev_depth = created.target(
            gfx,
            &GfxImageDesc::new_image_2d(
                extent,
                depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ),
            &GfxImageViewDesc::depth(),
            &format!("{}-prev-depth", name),
        )?;

        let mut peel_depth = Vec::with_capacity(layer_count as usize);
        let mut peel_color = Vec::with_capacity(layer_count as usize);
        for layer in 0..layer_count {
            peel_depth.push(created.target(
                gfx,
                &GfxImageDesc::new_image_2d(
                    extent,
                    depth_format,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                        | vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::TRANSFER_DST,
                ),
                &GfxImageViewDesc::depth(),
                &format!("{}-peel-depth-{}", name, layer),
            )?);
            peel_color.push(created.target(
                gfx,
                &GfxImageDesc::new_image_2d(
                    extent,
                    color_format,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                ),
                &GfxImageViewDesc::color(),
                &format!("{}-peel-color-{}", name, layer),
            )?);
        }

        let composite = created.target(
            gfx,
            &GfxImageDesc::new_image_2d(
                extent,
                color_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST,
            ),
            &GfxImageViewDesc::color(),
            &format!("{}-composite", name),
        )?;

        Ok(Self {
            extent,
            mip_levels,
            opaque_color,
            opaque_color_attachment,
            opaque_depth,
            prev_depth,
            peel_depth,
            peel_color,
            composite,
        })
    }
}

// getters
impl TransmissionTargets {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
    #[inline]
    pub fn layer_count(&self) -> usize {
        self.peel_color.len()
    }
    #[inline]
    pub fn opaque_color(&self) -> RenderTarget {
        self.opaque_color
    }
    #[inline]
    pub fn opaque_color_attachment(&self) -> GfxImageViewHandle {
        self.opaque_color_attachment
    }
    #[inline]
    pub fn opaque_depth(&self) -> RenderTarget {
        self.opaque_depth
    }
    #[inline]
    pub fn prev_depth(&self) -> RenderTarget {
        self.prev_depth
    }
    #[inline]
    pub fn peel_depth(&self, layer: usize) -> RenderTarget {
        self.peel_depth[layer]
    }
    #[inline]
    pub fn peel_color(&self, layer: usize) -> RenderTarget {
        self.peel_color[layer]
    }
    #[inline]
    pub fn composite(&self) -> RenderTarget {
        self.composite
    }
}

// destroy
impl TransmissionTargets {
    pub fn destroy(self, gfx: &mut impl GfxResources) {
        gfx.destroy_image_view(self.opaque_color_attachment);
        let targets = [self.opaque_color, self.opaque_depth, self.prev_depth, self.composite];
        for target in targets.into_iter().chain(self.peel_depth).chain(self.peel_color) {
            target.destroy(gfx);
        }
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::mock::MockGfx;

    use super::*;

    #[test]
    fn test_targets_per_layer() {
        let mut gfx = MockGfx::new();
        let extent = vk::Extent2D {
            width: 640,
            height: 360,
        };
        let targets = TransmissionTargets::new(&mut gfx, extent, 4, "F0").unwrap();

        // opaque color/depth、prev depth、composite，以及每层 2 个
        let stats = gfx.resource_stats();
        assert_eq!(stats.images, 4 + 2 * 4);
        assert_eq!(stats.image_views, 5 + 2 * 4);

        let opaque = gfx.image_desc(targets.opaque_color().image);
        assert_eq!(opaque.mip_levels, 10);
        assert_eq!(opaque.format, RendererConstants::OFFSCREEN_COLOR_FORMAT);
        assert!(opaque.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED));
        assert_eq!(gfx.view_image(targets.opaque_color_attachment()), targets.opaque_color().image);

        let peel_depth = gfx.image_desc(targets.peel_depth(3).image);
        assert_eq!(peel_depth.format, RendererConstants::DEPTH_FORMAT);
        assert!(peel_depth.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert_eq!(peel_depth.extent, extent);

        targets.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().total(), 0);
    }

    #[test]
    fn test_single_layer() {
        let mut gfx = MockGfx::new();
        let targets = TransmissionTargets::new(&mut gfx, vk::Extent2D { width: 1, height: 1 }, 1, "F0").unwrap();
        assert_eq!(targets.layer_count(), 1);
        assert_eq!(targets.mip_levels(), 1);
        targets.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().total(), 0);
    }
}

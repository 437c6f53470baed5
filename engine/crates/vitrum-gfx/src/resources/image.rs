use ash::vk;

/// 2D image 的创建参数
#[derive(Debug, Clone, Copy)]
pub struct GfxImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
}

// new & init
impl GfxImageDesc {
    #[inline]
    pub fn new_image_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// builder
    #[inline]
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// 完整 mip 链的层数
    #[inline]
    pub fn full_mip_chain(extent: vk::Extent2D) -> u32 {
        u32::BITS - extent.width.max(extent.height).max(1).leading_zeros()
    }
}

/// image view 的创建参数，默认覆盖全部 mip
#[derive(Debug, Clone, Copy)]
pub struct GfxImageViewDesc {
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    /// None 表示从 base 开始的全部 mip
    pub mip_count: Option<u32>,
}

impl GfxImageViewDesc {
    #[inline]
    pub fn color() -> Self {
        Self {
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            mip_count: None,
        }
    }

    #[inline]
    pub fn depth() -> Self {
        Self {
            aspect: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            mip_count: None,
        }
    }

    /// 只覆盖单个 mip，用于作为 attachment
    #[inline]
    pub fn single_mip(mut self, mip: u32) -> Self {
        self.base_mip_level = mip;
        self.mip_count = Some(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(GfxImageDesc::full_mip_chain(vk::Extent2D { width: 1, height: 1 }), 1);
        assert_eq!(GfxImageDesc::full_mip_chain(vk::Extent2D { width: 1920, height: 1080 }), 11);
        assert_eq!(GfxImageDesc::full_mip_chain(vk::Extent2D { width: 256, height: 16 }), 9);
        // 0 尺寸按照 1 处理
        assert_eq!(GfxImageDesc::full_mip_chain(vk::Extent2D { width: 0, height: 0 }), 1);
    }
}

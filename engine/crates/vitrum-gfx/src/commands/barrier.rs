use ash::vk;

use crate::handles::{GfxBufferHandle, GfxImageHandle};

/// 便捷创建 image memory barrier 的结构体
///
/// 与 `vk::ImageMemoryBarrier2` 一一对应，只是 image 使用句柄表示
#[derive(Debug, Clone, Copy)]
pub struct GfxImageBarrier {
    pub image: GfxImageHandle,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    /// `vk::REMAINING_MIP_LEVELS` 表示剩余的全部 mip
    pub mip_count: u32,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            image: GfxImageHandle::default(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            mip_count: 1,
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: GfxImageHandle) -> Self {
        self.image = image;
        self
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage_mask;
        self.src_access = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage_mask;
        self.dst_access = dst_access_mask;
        self
    }

    /// 使用 [`GfxBarrierMask`] 中的组合
    #[inline]
    pub fn src(self, mask: (vk::PipelineStageFlags2, vk::AccessFlags2)) -> Self {
        self.src_mask(mask.0, mask.1)
    }

    #[inline]
    pub fn dst(self, mask: (vk::PipelineStageFlags2, vk::AccessFlags2)) -> Self {
        self.dst_mask(mask.0, mask.1)
    }

    /// builder
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect_mask;
        self
    }

    /// builder
    /// 默认只覆盖 mip 0
    #[inline]
    pub fn mip_range(mut self, base_mip_level: u32, mip_count: u32) -> Self {
        self.base_mip_level = base_mip_level;
        self.mip_count = mip_count;
        self
    }
}

/// 常用的 stage/access 组合
pub struct GfxBarrierMask;
impl GfxBarrierMask {
    pub const COLOR_ATTACHMENT_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    pub const DEPTH_ATTACHMENT_RW: (vk::PipelineStageFlags2, vk::AccessFlags2) = (
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
    );
    pub const FRAGMENT_SAMPLED_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ);
    pub const TRANSFER_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
        (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);
    pub const TRANSFER_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
        (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
    pub const NONE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
        (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);
}

#[derive(Debug, Clone, Copy)]
pub struct GfxBufferBarrier {
    pub buffer: GfxBufferHandle,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl GfxBufferBarrier {
    #[inline]
    pub fn new(buffer: GfxBufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self {
            buffer,
            offset,
            size,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
        }
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage_mask;
        self.src_access = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage_mask;
        self.dst_access = dst_access_mask;
        self
    }
}

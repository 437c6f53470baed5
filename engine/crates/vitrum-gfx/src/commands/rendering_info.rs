use ash::vk;

use crate::handles::GfxImageViewHandle;

/// attachment 的清除值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    Depth(f32),
}

impl GfxClearValue {
    #[inline]
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::Depth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

/// dynamic rendering 的单个 attachment
#[derive(Debug, Clone, Copy)]
pub struct GfxRenderingAttachment {
    pub view: GfxImageViewHandle,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: GfxClearValue,
    /// MSAA resolve 的目标
    pub resolve_view: Option<GfxImageViewHandle>,
}

impl GfxRenderingAttachment {
    /// 清除后写入的 color attachment
    #[inline]
    pub fn color_clear(view: GfxImageViewHandle, clear_color: [f32; 4]) -> Self {
        Self {
            view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: GfxClearValue::Color(clear_color),
            resolve_view: None,
        }
    }

    /// 保留之前内容的 color attachment
    #[inline]
    pub fn color_load(view: GfxImageViewHandle) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            ..Self::color_clear(view, [0.0; 4])
        }
    }

    #[inline]
    pub fn depth_clear(view: GfxImageViewHandle, depth: f32) -> Self {
        Self {
            view,
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: GfxClearValue::Depth(depth),
            resolve_view: None,
        }
    }

    #[inline]
    pub fn depth_load(view: GfxImageViewHandle) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            ..Self::depth_clear(view, 1.0)
        }
    }

    /// builder：resolve 到单采样的 image，resolve 之后 MSAA 内容无需保留
    #[inline]
    pub fn resolve_to(mut self, resolve_view: GfxImageViewHandle) -> Self {
        self.resolve_view = Some(resolve_view);
        self.store_op = vk::AttachmentStoreOp::DONT_CARE;
        self
    }
}

/// dynamic rendering 的参数，viewport 和 scissor 覆盖整个 render area
#[derive(Debug, Clone)]
pub struct GfxRenderingInfo {
    pub render_area: vk::Extent2D,
    pub color_attachments: Vec<GfxRenderingAttachment>,
    pub depth_attachment: Option<GfxRenderingAttachment>,
}

impl GfxRenderingInfo {
    #[inline]
    pub fn new(render_area: vk::Extent2D) -> Self {
        Self {
            render_area,
            color_attachments: vec![],
            depth_attachment: None,
        }
    }

    /// builder
    #[inline]
    pub fn color(mut self, attachment: GfxRenderingAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// builder
    #[inline]
    pub fn depth(mut self, attachment: GfxRenderingAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }
}

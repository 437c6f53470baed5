use std::{ffi::CStr, path::Path};

use ash::vk;

use crate::pipelines::shader::GfxShaderStage;

/// 图形管线的创建参数
///
/// 只保存纯数据，具体的 vk 结构体由后端在创建时组装
#[derive(Debug, Clone)]
pub struct GfxGraphicsPipelineDesc {
    /// dynamic render 需要的 framebuffer 信息
    color_attach_formats: Vec<vk::Format>,
    /// format = undefined 表示不使用这个 attachment
    depth_attach_format: vk::Format,

    shader_stages: Vec<GfxShaderStage>,

    vertex_binding_desc: Vec<vk::VertexInputBindingDescription>,
    vertex_attribute_desc: Vec<vk::VertexInputAttributeDescription>,

    primitive_topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,

    msaa_sample: vk::SampleCountFlags,

    color_attach_blend_states: Vec<vk::PipelineColorBlendAttachmentState>,

    depth_test_op: Option<vk::CompareOp>,
    depth_write: bool,
}

impl Default for GfxGraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            color_attach_formats: vec![],
            depth_attach_format: vk::Format::UNDEFINED,
            shader_stages: vec![],
            vertex_binding_desc: vec![],
            vertex_attribute_desc: vec![],
            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            msaa_sample: vk::SampleCountFlags::TYPE_1,
            color_attach_blend_states: vec![],
            depth_test_op: Some(vk::CompareOp::LESS),
            depth_write: true,
        }
    }
}

// builder
impl GfxGraphicsPipelineDesc {
    #[inline]
    pub fn attach_info(&mut self, color_attach_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> &mut Self {
        self.color_attach_formats = color_attach_formats;
        self.depth_attach_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    #[inline]
    pub fn vertex_shader_stage(&mut self, path: impl AsRef<Path>, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStage {
            stage: vk::ShaderStageFlags::VERTEX,
            entry_point,
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    #[inline]
    pub fn fragment_shader_stage(&mut self, path: impl AsRef<Path>, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStage {
            stage: vk::ShaderStageFlags::FRAGMENT,
            entry_point,
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    #[inline]
    pub fn vertex_binding(&mut self, bindings: Vec<vk::VertexInputBindingDescription>) -> &mut Self {
        self.vertex_binding_desc = bindings;
        self
    }

    #[inline]
    pub fn vertex_attribute(&mut self, attributes: Vec<vk::VertexInputAttributeDescription>) -> &mut Self {
        self.vertex_attribute_desc = attributes;
        self
    }

    /// 为每个 color attachment 指定 blend 操作
    #[inline]
    pub fn color_blend(&mut self, states: Vec<vk::PipelineColorBlendAttachmentState>) -> &mut Self {
        self.color_attach_blend_states = states;
        self
    }

    #[inline]
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    #[inline]
    pub fn depth_test(&mut self, depth_test_op: Option<vk::CompareOp>, depth_write: bool) -> &mut Self {
        self.depth_test_op = depth_test_op;
        self.depth_write = depth_write;
        self
    }

    #[inline]
    pub fn msaa(&mut self, samples: vk::SampleCountFlags) -> &mut Self {
        self.msaa_sample = samples;
        self
    }
}

// 常用的 blend 状态
impl GfxGraphicsPipelineDesc {
    /// 不混合，直接覆盖
    #[inline]
    pub fn opaque_blend() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }

    /// straight alpha：`src * a + dst * (1 - a)`
    #[inline]
    pub fn alpha_blend() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }

    /// 叠加，用于 overlay
    #[inline]
    pub fn additive_blend() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

// getters
impl GfxGraphicsPipelineDesc {
    #[inline]
    pub fn color_attach_formats(&self) -> &[vk::Format] {
        &self.color_attach_formats
    }
    #[inline]
    pub fn depth_attach_format(&self) -> vk::Format {
        self.depth_attach_format
    }
    #[inline]
    pub fn shader_stages(&self) -> &[GfxShaderStage] {
        &self.shader_stages
    }
    #[inline]
    pub fn vertex_binding_desc(&self) -> &[vk::VertexInputBindingDescription] {
        &self.vertex_binding_desc
    }
    #[inline]
    pub fn vertex_attribute_desc(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.vertex_attribute_desc
    }
    #[inline]
    pub fn primitive_topology(&self) -> vk::PrimitiveTopology {
        self.primitive_topology
    }
    #[inline]
    pub fn cull(&self) -> (vk::CullModeFlags, vk::FrontFace) {
        (self.cull_mode, self.front_face)
    }
    #[inline]
    pub fn msaa_sample(&self) -> vk::SampleCountFlags {
        self.msaa_sample
    }
    #[inline]
    pub fn color_attach_blend_states(&self) -> &[vk::PipelineColorBlendAttachmentState] {
        &self.color_attach_blend_states
    }
    #[inline]
    pub fn depth_test_op(&self) -> Option<vk::CompareOp> {
        self.depth_test_op
    }
    #[inline]
    pub fn depth_write(&self) -> bool {
        self.depth_write
    }
    /// 是否有任何一个 color attachment 开启了混合
    #[inline]
    pub fn blends(&self) -> bool {
        self.color_attach_blend_states.iter().any(|s| s.blend_enable == vk::TRUE)
    }
}

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::GfxPipelines,
    error::{GfxError, GfxResult, VkResultExt},
    handles::*,
    pipelines::graphics_pipeline::GfxGraphicsPipelineDesc,
    vulkan::VulkanBackend,
};

// 内部工具
impl VulkanBackend {
    /// 加载 desc 中的所有 shader module，任何一个失败都会销毁已经创建的 module
    fn load_shader_modules(&self, desc: &GfxGraphicsPipelineDesc) -> GfxResult<Vec<vk::ShaderModule>> {
        let mut modules = Vec::with_capacity(desc.shader_stages().len());
        for stage in desc.shader_stages() {
            let module = stage.load_spv().and_then(|code| {
                unsafe { self.device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&code), None) }
                    .vk_call("vkCreateShaderModule")
            });
            match module {
                Ok(module) => {
                    self.device.set_object_debug_name(module, format!("ShaderModule::{:?}", stage.path()));
                    modules.push(module);
                }
                Err(e) => {
                    self.destroy_shader_modules(modules);
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }

    fn destroy_shader_modules(&self, modules: Vec<vk::ShaderModule>) {
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

impl GfxPipelines for VulkanBackend {
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[GfxDescriptorSetLayoutHandle],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> GfxResult<GfxPipelineLayoutHandle> {
        let vk_set_layouts = set_layouts.iter().map(|layout| self.res.descriptor_set_layouts[*layout]).collect_vec();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&vk_set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout =
            unsafe { self.device.create_pipeline_layout(&layout_ci, None) }.vk_call("vkCreatePipelineLayout")?;
        self.device.set_object_debug_name(layout, format!("PipelineLayout::{}", name));

        Ok(self.res.pipeline_layouts.insert(layout))
    }

    fn destroy_pipeline_layout(&mut self, layout: GfxPipelineLayoutHandle) {
        if let Some(layout) = self.res.pipeline_layouts.remove(layout) {
            unsafe { self.device.destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GfxGraphicsPipelineDesc,
        layout: GfxPipelineLayoutHandle,
        name: &str,
    ) -> GfxResult<GfxPipelineHandle> {
        let _span = tracy_client::span!("VulkanBackend::create_graphics_pipeline");

        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(desc.color_attach_formats())
            .depth_attachment_format(desc.depth_attach_format());

        let shader_modules = self.load_shader_modules(desc)?;
        let shader_stages_info = desc
            .shader_stages()
            .iter()
            .zip(shader_modules.iter())
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(*module)
                    .name(stage.entry_point)
            })
            .collect_vec();

        // 顶点和 index
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_binding_desc())
            .vertex_attribute_descriptions(desc.vertex_attribute_desc());

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.primitive_topology())
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let (cull_mode, front_face) = desc.cull();
        let rasterize_state_info = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(front_face)
            .depth_bias_enable(false);

        // MSAA 配置
        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(desc.msaa_sample());

        // 混合设置：需要为每个 color attachment 分别指定
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(desc.color_attach_blend_states());

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test_op().is_some())
            .depth_compare_op(desc.depth_test_op().unwrap_or(vk::CompareOp::NEVER))
            .depth_write_enable(desc.depth_write())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(self.res.pipeline_layouts[layout])
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let result = unsafe {
            self.device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, e)| GfxError::from_vk("vkCreateGraphicsPipelines", e));
        self.destroy_shader_modules(shader_modules);

        let pipeline = result?[0];
        self.device.set_object_debug_name(pipeline, format!("GraphicsPipeline::{}", name));

        Ok(self.res.pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: GfxPipelineHandle) {
        if let Some(pipeline) = self.res.pipelines.remove(pipeline) {
            unsafe { self.device.destroy_pipeline(pipeline, None) };
        }
    }
}

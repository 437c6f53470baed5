use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::GfxCommands,
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        rendering_info::{GfxRenderingAttachment, GfxRenderingInfo},
        submit_info::GfxSubmitInfo,
    },
    error::{GfxResult, VkResultExt},
    handles::*,
    vulkan::VulkanBackend,
};

// 内部工具
impl VulkanBackend {
    fn vk_rendering_attachment(&self, attach: &GfxRenderingAttachment) -> vk::RenderingAttachmentInfo<'static> {
        let mut info = vk::RenderingAttachmentInfo::default()
            .image_view(self.res.image_views[attach.view])
            .image_layout(attach.layout)
            .load_op(attach.load_op)
            .store_op(attach.store_op)
            .clear_value(attach.clear_value.to_vk());
        if let Some(resolve_view) = attach.resolve_view {
            info = info
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(self.res.image_views[resolve_view])
                .resolve_image_layout(attach.layout);
        }
        info
    }

    fn color_subresource_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(mip_level)
            .base_array_layer(0)
            .layer_count(1)
    }

    fn extent_offset(extent: vk::Extent2D) -> vk::Offset3D {
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        }
    }
}

impl GfxCommands for VulkanBackend {
    fn allocate_command_buffer(&mut self, name: &str) -> GfxResult<GfxCommandBufferHandle> {
        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }
        .vk_call("vkAllocateCommandBuffers")?[0];
        self.device.set_object_debug_name(cmd, format!("CommandBuffer::{}", name));

        Ok(self.res.command_buffers.insert(cmd))
    }

    fn free_command_buffer(&mut self, cmd: GfxCommandBufferHandle) {
        if let Some(cmd) = self.res.command_buffers.remove(cmd) {
            unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
        }
    }

    fn begin_command_buffer(&mut self, cmd: GfxCommandBufferHandle, label: &str) -> GfxResult<()> {
        let vk_cmd = self.cmd(cmd);
        unsafe {
            self.device
                .reset_command_buffer(vk_cmd, vk::CommandBufferResetFlags::RELEASE_RESOURCES)
                .vk_call("vkResetCommandBuffer")?;
            self.device
                .begin_command_buffer(
                    vk_cmd,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .vk_call("vkBeginCommandBuffer")?;
        }
        self.cmd_begin_label(cmd, label, [0.0, 1.0, 0.0, 1.0]);
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: GfxCommandBufferHandle) -> GfxResult<()> {
        self.cmd_end_label(cmd);
        unsafe { self.device.end_command_buffer(self.cmd(cmd)) }.vk_call("vkEndCommandBuffer")
    }

    fn cmd_begin_rendering(&mut self, cmd: GfxCommandBufferHandle, info: &GfxRenderingInfo) {
        let color_attachments =
            info.color_attachments.iter().map(|attach| self.vk_rendering_attachment(attach)).collect_vec();
        let depth_attachment = info.depth_attachment.as_ref().map(|attach| self.vk_rendering_attachment(attach));

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: info.render_area,
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: info.render_area.width as f32,
            height: info.render_area.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let vk_cmd = self.cmd(cmd);
        unsafe {
            self.device.cmd_begin_rendering(vk_cmd, &rendering_info);
            self.device.cmd_set_viewport(vk_cmd, 0, std::slice::from_ref(&viewport));
            self.device.cmd_set_scissor(vk_cmd, 0, std::slice::from_ref(&render_area));
        }
    }

    fn cmd_end_rendering(&mut self, cmd: GfxCommandBufferHandle) {
        unsafe { self.device.cmd_end_rendering(self.cmd(cmd)) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: GfxCommandBufferHandle, pipeline: GfxPipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.cmd(cmd),
                vk::PipelineBindPoint::GRAPHICS,
                self.res.pipelines[pipeline],
            )
        };
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: GfxCommandBufferHandle,
        layout: GfxPipelineLayoutHandle,
        first_set: u32,
        sets: &[GfxDescriptorSetHandle],
    ) {
        let vk_sets = sets.iter().map(|set| self.res.descriptor_sets[*set]).collect_vec();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd(cmd),
                vk::PipelineBindPoint::GRAPHICS,
                self.res.pipeline_layouts[layout],
                first_set,
                &vk_sets,
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &mut self,
        cmd: GfxCommandBufferHandle,
        layout: GfxPipelineLayoutHandle,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(self.cmd(cmd), self.res.pipeline_layouts[layout], stages, offset, data)
        };
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: GfxCommandBufferHandle, buffer: GfxBufferHandle, offset: vk::DeviceSize) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.cmd(cmd), 0, &[self.buffer(buffer)], &[offset]) };
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe { self.device.cmd_bind_index_buffer(self.cmd(cmd), self.buffer(buffer), offset, index_type) };
    }

    fn cmd_draw_indexed(&mut self, cmd: GfxCommandBufferHandle, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe { self.device.cmd_draw_indexed(self.cmd(cmd), index_count, 1, first_index, vertex_offset, 0) };
    }

    fn cmd_draw(&mut self, cmd: GfxCommandBufferHandle, vertex_count: u32, first_vertex: u32) {
        unsafe { self.device.cmd_draw(self.cmd(cmd), vertex_count, 1, first_vertex, 0) };
    }

    fn cmd_image_barriers(&mut self, cmd: GfxCommandBufferHandle, barriers: &[GfxImageBarrier]) {
        let vk_barriers = barriers
            .iter()
            .map(|barrier| {
                vk::ImageMemoryBarrier2::default()
                    .image(self.image(barrier.image))
                    .old_layout(barrier.old_layout)
                    .new_layout(barrier.new_layout)
                    .src_stage_mask(barrier.src_stage)
                    .src_access_mask(barrier.src_access)
                    .dst_stage_mask(barrier.dst_stage)
                    .dst_access_mask(barrier.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(barrier.aspect)
                            .base_mip_level(barrier.base_mip_level)
                            .level_count(barrier.mip_count)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
            })
            .collect_vec();
        unsafe {
            self.device
                .cmd_pipeline_barrier2(self.cmd(cmd), &vk::DependencyInfo::default().image_memory_barriers(&vk_barriers))
        };
    }

    fn cmd_buffer_barriers(&mut self, cmd: GfxCommandBufferHandle, barriers: &[GfxBufferBarrier]) {
        let vk_barriers = barriers
            .iter()
            .map(|barrier| {
                vk::BufferMemoryBarrier2::default()
                    .buffer(self.buffer(barrier.buffer))
                    .offset(barrier.offset)
                    .size(barrier.size)
                    .src_stage_mask(barrier.src_stage)
                    .src_access_mask(barrier.src_access)
                    .dst_stage_mask(barrier.dst_stage)
                    .dst_access_mask(barrier.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            })
            .collect_vec();
        unsafe {
            self.device.cmd_pipeline_barrier2(
                self.cmd(cmd),
                &vk::DependencyInfo::default().buffer_memory_barriers(&vk_barriers),
            )
        };
    }

    fn cmd_copy_image(
        &mut self,
        cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        dst: GfxImageHandle,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent2D,
    ) {
        let layers = Self::color_subresource_layers(0).aspect_mask(aspect);
        let region = vk::ImageCopy::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(extent.into());
        unsafe {
            self.device.cmd_copy_image(
                self.cmd(cmd),
                self.image(src),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.image(dst),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
    }

    fn cmd_blit_image(
        &mut self,
        cmd: GfxCommandBufferHandle,
        src: GfxImageHandle,
        src_extent: vk::Extent2D,
        dst: GfxImageHandle,
        dst_extent: vk::Extent2D,
    ) {
        let region = vk::ImageBlit::default()
            .src_subresource(Self::color_subresource_layers(0))
            .src_offsets([vk::Offset3D::default(), Self::extent_offset(src_extent)])
            .dst_subresource(Self::color_subresource_layers(0))
            .dst_offsets([vk::Offset3D::default(), Self::extent_offset(dst_extent)]);
        unsafe {
            self.device.cmd_blit_image(
                self.cmd(cmd),
                self.image(src),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.image(dst),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
                vk::Filter::LINEAR,
            )
        };
    }

    fn cmd_generate_mipmaps(
        &mut self,
        cmd: GfxCommandBufferHandle,
        image: GfxImageHandle,
        extent: vk::Extent2D,
        mip_levels: u32,
    ) {
        let vk_cmd = self.cmd(cmd);
        let vk_image = self.image(image);

        let mut src_extent = extent;
        for mip in 1..mip_levels {
            let dst_extent = vk::Extent2D {
                width: (src_extent.width / 2).max(1),
                height: (src_extent.height / 2).max(1),
            };
            let region = vk::ImageBlit::default()
                .src_subresource(Self::color_subresource_layers(mip - 1))
                .src_offsets([vk::Offset3D::default(), Self::extent_offset(src_extent)])
                .dst_subresource(Self::color_subresource_layers(mip))
                .dst_offsets([vk::Offset3D::default(), Self::extent_offset(dst_extent)]);

            // 当前 mip 写完之后作为下一级的 src
            let to_src = vk::ImageMemoryBarrier2::default()
                .image(vk_image)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(mip)
                        .level_count(1)
                        .layer_count(1),
                );

            unsafe {
                self.device.cmd_blit_image(
                    vk_cmd,
                    vk_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                    vk::Filter::LINEAR,
                );
                self.device.cmd_pipeline_barrier2(
                    vk_cmd,
                    &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_src)),
                );
            }
            src_extent = dst_extent;
        }
    }

    fn cmd_reset_query_pool(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, first: u32, count: u32) {
        unsafe { self.device.cmd_reset_query_pool(self.cmd(cmd), self.res.query_pools[pool], first, count) };
    }

    fn cmd_begin_query(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32) {
        unsafe {
            self.device.cmd_begin_query(
                self.cmd(cmd),
                self.res.query_pools[pool],
                query,
                vk::QueryControlFlags::empty(),
            )
        };
    }

    fn cmd_end_query(&mut self, cmd: GfxCommandBufferHandle, pool: GfxQueryPoolHandle, query: u32) {
        unsafe { self.device.cmd_end_query(self.cmd(cmd), self.res.query_pools[pool], query) };
    }

    fn cmd_copy_query_results(
        &mut self,
        cmd: GfxCommandBufferHandle,
        pool: GfxQueryPoolHandle,
        first: u32,
        count: u32,
        dst: GfxBufferHandle,
        dst_offset: vk::DeviceSize,
    ) {
        unsafe {
            self.device.cmd_copy_query_pool_results(
                self.cmd(cmd),
                self.res.query_pools[pool],
                first,
                count,
                self.buffer(dst),
                dst_offset,
                size_of::<u32>() as vk::DeviceSize,
                vk::QueryResultFlags::WAIT,
            )
        };
    }

    fn cmd_begin_conditional_rendering(
        &mut self,
        cmd: GfxCommandBufferHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
    ) {
        let Some(conditional_rendering) = self.device.conditional_rendering.as_ref() else {
            return;
        };
        let begin_info = vk::ConditionalRenderingBeginInfoEXT::default().buffer(self.buffer(buffer)).offset(offset);
        unsafe { (conditional_rendering.fp().cmd_begin_conditional_rendering_ext)(self.cmd(cmd), &begin_info) };
    }

    fn cmd_end_conditional_rendering(&mut self, cmd: GfxCommandBufferHandle) {
        let Some(conditional_rendering) = self.device.conditional_rendering.as_ref() else {
            return;
        };
        unsafe { (conditional_rendering.fp().cmd_end_conditional_rendering_ext)(self.cmd(cmd)) };
    }

    fn cmd_begin_label(&mut self, cmd: GfxCommandBufferHandle, label: &str, color: [f32; 4]) {
        let label = CString::new(label).unwrap_or_default();
        unsafe {
            self.device.debug_utils.cmd_begin_debug_utils_label(
                self.cmd(cmd),
                &vk::DebugUtilsLabelEXT::default().label_name(label.as_c_str()).color(color),
            )
        };
    }

    fn cmd_end_label(&mut self, cmd: GfxCommandBufferHandle) {
        unsafe { self.device.debug_utils.cmd_end_debug_utils_label(self.cmd(cmd)) };
    }

    fn submit(&mut self, info: &GfxSubmitInfo, fence: Option<GfxFenceHandle>) -> GfxResult<()> {
        let _span = tracy_client::span!("queue_submit");

        let cmd_infos = info
            .command_buffers
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(self.cmd(*cmd)))
            .collect_vec();
        let semaphore_info = |(semaphore, stage): &(GfxSemaphoreHandle, vk::PipelineStageFlags2)| {
            vk::SemaphoreSubmitInfo::default().semaphore(self.res.semaphores[*semaphore]).stage_mask(*stage)
        };
        let wait_infos = info.wait_semaphores.iter().map(semaphore_info).collect_vec();
        let signal_infos = info.signal_semaphores.iter().map(semaphore_info).collect_vec();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        let fence = fence.map_or(vk::Fence::null(), |f| self.res.fences[f]);

        unsafe { self.device.queue_submit2(self.queue, std::slice::from_ref(&submit_info), fence) }
            .vk_call("vkQueueSubmit2")
    }
}

use ash::vk;
use vk_mem::Alloc;

use crate::{
    backend::{GfxDeviceLimits, GfxResources},
    error::{GfxError, GfxResult, VkResultExt},
    handles::*,
    resources::{
        buffer::{GfxBufferDesc, GfxMemoryLocation},
        image::{GfxImageDesc, GfxImageViewDesc},
        sampler::GfxSamplerDesc,
    },
    stats::GfxResourceStats,
    vulkan::{VulkanBackend, VulkanBuffer, VulkanImage},
};

// 内部工具
impl VulkanBackend {
    fn create_vk_buffer(&self, desc: &GfxBufferDesc, name: &str) -> GfxResult<VulkanBuffer> {
        let _span = tracy_client::span!("VulkanBackend::create_buffer");

        let mapped = desc.location == GfxMemoryLocation::HostVisible;
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mapped {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }.map_err(
            |result| GfxError::Allocation {
                name: name.to_string(),
                result,
            },
        )?;

        let mut mapped_ptr = None;
        if mapped {
            match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => mapped_ptr = Some(ptr),
                Err(result) => {
                    unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(GfxError::from_vk("vmaMapMemory", result));
                }
            }
        }

        self.device.set_object_debug_name(buffer, format!("Buffer::{}", name));

        Ok(VulkanBuffer {
            handle: buffer,
            allocation,
            size: desc.size,
            location: desc.location,
            mapped_ptr,
        })
    }

    fn destroy_vk_buffer(&self, mut buffer: VulkanBuffer) {
        unsafe {
            if buffer.mapped_ptr.is_some() {
                self.allocator.unmap_memory(&mut buffer.allocation);
            }
            self.allocator.destroy_buffer(buffer.handle, &mut buffer.allocation);
        }
    }

    /// 写入持久映射的内存，并 flush
    fn write_mapped(&self, buffer: &VulkanBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let Some(ptr) = buffer.mapped_ptr else {
            return Err(GfxError::Unsupported {
                kind: "buffer write",
                name: "buffer is not host visible".into(),
            });
        };
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        self.allocator
            .flush_allocation(&buffer.allocation, offset, data.len() as vk::DeviceSize)
            .vk_call("vmaFlushAllocation")
    }

    /// 创建一个临时的 staging buffer，填充数据
    fn create_staging_buffer(&self, data: &[u8], name: &str) -> GfxResult<VulkanBuffer> {
        let desc = GfxBufferDesc::new(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            GfxMemoryLocation::HostVisible,
        );
        let staging = self.create_vk_buffer(&desc, &format!("{}-staging", name))?;
        if let Err(e) = self.write_mapped(&staging, 0, data) {
            self.destroy_vk_buffer(staging);
            return Err(e);
        }
        Ok(staging)
    }
}

impl GfxResources for VulkanBackend {
    fn create_buffer(&mut self, desc: &GfxBufferDesc, name: &str) -> GfxResult<GfxBufferHandle> {
        let buffer = self.create_vk_buffer(desc, name)?;
        Ok(self.res.buffers.insert(buffer))
    }

    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::write_buffer");
        let dst = &self.res.buffers[buffer];
        GfxError::check_range("buffer", offset, data.len() as vk::DeviceSize, dst.size)?;
        if data.is_empty() {
            return Ok(());
        }

        match dst.location {
            GfxMemoryLocation::HostVisible => self.write_mapped(dst, offset, data),
            GfxMemoryLocation::DeviceLocal => {
                let staging = self.create_staging_buffer(data, "write-buffer")?;
                let dst_handle = dst.handle;
                let result = self.one_time_exec("write-buffer", |device, cmd| unsafe {
                    let region = vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: offset,
                        size: data.len() as vk::DeviceSize,
                    };
                    device.cmd_copy_buffer(cmd, staging.handle, dst_handle, std::slice::from_ref(&region));
                });
                self.destroy_vk_buffer(staging);
                result
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: GfxBufferHandle) {
        if let Some(buffer) = self.res.buffers.remove(buffer) {
            self.destroy_vk_buffer(buffer);
        }
    }

    fn create_image(&mut self, desc: &GfxImageDesc, name: &str) -> GfxResult<GfxImageHandle> {
        let _span = tracy_client::span!("VulkanBackend::create_image");

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent.into())
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) =
            unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }.map_err(|result| GfxError::Allocation {
                name: name.to_string(),
                result,
            })?;
        self.device.set_object_debug_name(image, format!("Image::{}", name));

        Ok(self.res.images.insert(VulkanImage {
            handle: image,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
        }))
    }

    fn upload_image(&mut self, image: GfxImageHandle, pixels: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::upload_image");
        let dst = &self.res.images[image];
        assert_eq!(
            pixels.len(),
            (dst.extent.width * dst.extent.height * 4) as usize,
            "upload_image expects tightly packed RGBA8 pixels"
        );

        let staging = self.create_staging_buffer(pixels, "upload-image")?;
        let (dst_handle, extent, mip_levels) = (dst.handle, dst.extent, dst.mip_levels);
        let result = self.one_time_exec("upload-image", |device, cmd| unsafe {
            let range = vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(1);

            let to_transfer = vk::ImageMemoryBarrier2::default()
                .image(dst_handle)
                .subresource_range(range)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE);
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_transfer)),
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .layer_count(1),
                )
                .image_extent(extent.into());
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle,
                dst_handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );

            let to_shader = vk::ImageMemoryBarrier2::default()
                .image(dst_handle)
                .subresource_range(range)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ);
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_shader)),
            );
        });
        self.destroy_vk_buffer(staging);
        result
    }

    fn destroy_image(&mut self, image: GfxImageHandle) {
        if self.res.images.get(image).is_some_and(|i| i.allocation.is_none()) {
            log::error!("swapchain image can not be destroyed directly");
            return;
        }
        if let Some(VulkanImage {
            handle,
            allocation: Some(mut allocation),
            ..
        }) = self.res.images.remove(image)
        {
            unsafe { self.allocator.destroy_image(handle, &mut allocation) };
        }
    }

    fn create_image_view(
        &mut self,
        image: GfxImageHandle,
        desc: &GfxImageViewDesc,
        name: &str,
    ) -> GfxResult<GfxImageViewHandle> {
        let src = &self.res.images[image];
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(src.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(src.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(desc.base_mip_level)
                    .level_count(desc.mip_count.unwrap_or(vk::REMAINING_MIP_LEVELS))
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = unsafe { self.device.create_image_view(&view_ci, None) }.vk_call("vkCreateImageView")?;
        self.device.set_object_debug_name(view, format!("ImageView::{}", name));

        Ok(self.res.image_views.insert(view))
    }

    fn destroy_image_view(&mut self, view: GfxImageViewHandle) {
        if let Some(view) = self.res.image_views.remove(view) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    fn create_sampler(&mut self, desc: &GfxSamplerDesc, name: &str) -> GfxResult<GfxSamplerHandle> {
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            .anisotropy_enable(false)
            .compare_enable(false)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        let sampler = unsafe { self.device.create_sampler(&sampler_ci, None) }.vk_call("vkCreateSampler")?;
        self.device.set_object_debug_name(sampler, format!("Sampler::{}", name));

        Ok(self.res.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: GfxSamplerHandle) {
        if let Some(sampler) = self.res.samplers.remove(sampler) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn limits(&self) -> GfxDeviceLimits {
        GfxDeviceLimits {
            min_uniform_buffer_offset_alignment: self.physical_device.min_ubo_offset_align(),
            framebuffer_sample_counts: self.physical_device.framebuffer_sample_counts(),
            conditional_rendering: self.device.conditional_rendering.is_some(),
        }
    }

    fn resource_stats(&self) -> GfxResourceStats {
        let swapchain_images = self.res.images.values().filter(|i| i.allocation.is_none()).count();
        GfxResourceStats {
            buffers: self.res.buffers.len(),
            images: self.res.images.len() - swapchain_images,
            swapchain_images,
            image_views: self.res.image_views.len(),
            samplers: self.res.samplers.len(),
            fences: self.res.fences.len(),
            semaphores: self.res.semaphores.len(),
            command_buffers: self.res.command_buffers.len(),
            descriptor_pools: self.res.descriptor_pools.len(),
            descriptor_set_layouts: self.res.descriptor_set_layouts.len(),
            descriptor_sets: self.res.descriptor_sets.len(),
            pipeline_layouts: self.res.pipeline_layouts.len(),
            pipelines: self.res.pipelines.len(),
            query_pools: self.res.query_pools.len(),
            swapchains: self.res.swapchains.len(),
        }
    }
}

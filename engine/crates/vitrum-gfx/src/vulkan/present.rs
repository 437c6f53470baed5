use ash::vk;

use crate::{
    backend::GfxPresent,
    error::{GfxResult, VkResultExt},
    handles::*,
    swapchain::{GfxAcquire, GfxPresentResult, GfxSurfaceSupport, GfxSwapchain, GfxSwapchainDesc},
    vulkan::{VulkanBackend, VulkanImage, VulkanSwapchain},
};

impl GfxPresent for VulkanBackend {
    fn surface_support(&self) -> GfxResult<GfxSurfaceSupport> {
        let pdevice = self.physical_device.vk_handle;
        unsafe {
            Ok(GfxSurfaceSupport {
                capabilities: self
                    .surface_pf
                    .get_physical_device_surface_capabilities(pdevice, self.surface)
                    .vk_call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: self
                    .surface_pf
                    .get_physical_device_surface_formats(pdevice, self.surface)
                    .vk_call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: self
                    .surface_pf
                    .get_physical_device_surface_present_modes(pdevice, self.surface)
                    .vk_call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn create_swapchain(&mut self, desc: &GfxSwapchainDesc, name: &str) -> GfxResult<GfxSwapchain> {
        let _span = tracy_client::span!("VulkanBackend::create_swapchain");

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        let swapchain = unsafe { self.device.swapchain.create_swapchain(&create_info, None) }
            .vk_call("vkCreateSwapchainKHR")?;
        self.device.set_object_debug_name(swapchain, format!("Swapchain::{}", name));

        let vk_images = match unsafe { self.device.swapchain.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.device.swapchain.destroy_swapchain(swapchain, None) };
                return Err(e).vk_call("vkGetSwapchainImagesKHR");
            }
        };
        let images = vk_images
            .into_iter()
            .enumerate()
            .map(|(idx, image)| {
                self.device.set_object_debug_name(image, format!("SwapchainImage::{}-{}", name, idx));
                self.res.images.insert(VulkanImage {
                    handle: image,
                    allocation: None,
                    format: desc.format.format,
                    extent: desc.extent,
                    mip_levels: 1,
                })
            })
            .collect::<Vec<_>>();
        log::info!(
            "swapchain created: {}x{}, {} images, {:?}, {:?}",
            desc.extent.width,
            desc.extent.height,
            images.len(),
            desc.format.format,
            desc.present_mode
        );

        let handle = self.res.swapchains.insert(VulkanSwapchain {
            handle: swapchain,
            images: images.clone(),
        });

        Ok(GfxSwapchain {
            handle,
            images,
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: GfxSwapchainHandle) {
        if let Some(swapchain) = self.res.swapchains.remove(swapchain) {
            for image in swapchain.images {
                self.res.images.remove(image);
            }
            unsafe { self.device.swapchain.destroy_swapchain(swapchain.handle, None) };
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: GfxSwapchainHandle,
        signal: GfxSemaphoreHandle,
        timeout_ns: u64,
    ) -> GfxResult<GfxAcquire> {
        let _span = tracy_client::span!("acquire_next_image");
        let result = unsafe {
            self.device.swapchain.acquire_next_image(
                self.res.swapchains[swapchain].handle,
                timeout_ns,
                self.res.semaphores[signal],
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", index);
                }
                Ok(GfxAcquire::Image { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(GfxAcquire::Stale)
            }
            Err(e) => Err(e).vk_call("vkAcquireNextImageKHR"),
        }
    }

    fn present(
        &mut self,
        swapchain: GfxSwapchainHandle,
        image_index: u32,
        wait: &[GfxSemaphoreHandle],
    ) -> GfxResult<GfxPresentResult> {
        let _span = tracy_client::span!("queue_present");
        let wait_semaphores = wait.iter().map(|s| self.res.semaphores[*s]).collect::<Vec<_>>();
        let swapchains = [self.res.swapchains[swapchain].handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.device.swapchain.queue_present(self.queue, &present_info) } {
            Ok(false) => Ok(GfxPresentResult::Presented),
            Ok(true) => Ok(GfxPresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(GfxPresentResult::Stale),
            Err(e) => Err(e).vk_call("vkQueuePresentKHR"),
        }
    }
}

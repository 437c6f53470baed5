use ash::vk;
use itertools::Itertools;

use crate::{
    backend::GfxDescriptors,
    descriptors::{GfxDescriptorBinding, GfxDescriptorPoolDesc, GfxDescriptorResource, GfxDescriptorWrite},
    error::{GfxResult, VkResultExt},
    handles::*,
    vulkan::{VulkanBackend, VulkanDescriptorPool},
};

impl GfxDescriptors for VulkanBackend {
    fn create_descriptor_pool(
        &mut self,
        desc: &GfxDescriptorPoolDesc,
        name: &str,
    ) -> GfxResult<GfxDescriptorPoolHandle> {
        let pool_sizes = desc.vk_pool_sizes();
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(desc.max_sets).pool_sizes(&pool_sizes);
        let pool =
            unsafe { self.device.create_descriptor_pool(&pool_ci, None) }.vk_call("vkCreateDescriptorPool")?;
        self.device.set_object_debug_name(pool, format!("DescriptorPool::{}", name));
        log::info!("descriptor pool {} created: max sets {}, sizes {:?}", name, desc.max_sets, desc.pool_sizes);

        Ok(self.res.descriptor_pools.insert(VulkanDescriptorPool { handle: pool, sets: vec![] }))
    }

    fn destroy_descriptor_pool(&mut self, pool: GfxDescriptorPoolHandle) {
        if let Some(pool) = self.res.descriptor_pools.remove(pool) {
            for set in pool.sets {
                self.res.descriptor_sets.remove(set);
            }
            unsafe { self.device.destroy_descriptor_pool(pool.handle, None) };
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[GfxDescriptorBinding],
        name: &str,
    ) -> GfxResult<GfxDescriptorSetLayoutHandle> {
        let vk_bindings = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.slot)
                    .descriptor_type(binding.ty)
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
            })
            .collect_vec();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_ci, None) }
            .vk_call("vkCreateDescriptorSetLayout")?;
        self.device.set_object_debug_name(layout, format!("DescriptorSetLayout::{}", name));

        Ok(self.res.descriptor_set_layouts.insert(layout))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: GfxDescriptorSetLayoutHandle) {
        if let Some(layout) = self.res.descriptor_set_layouts.remove(layout) {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: GfxDescriptorPoolHandle,
        layout: GfxDescriptorSetLayoutHandle,
        count: usize,
        name: &str,
    ) -> GfxResult<Vec<GfxDescriptorSetHandle>> {
        let layouts = vec![self.res.descriptor_set_layouts[layout]; count];
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.res.descriptor_pools[pool].handle).set_layouts(&layouts);
        let sets =
            unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.vk_call("vkAllocateDescriptorSets")?;

        let handles = sets
            .into_iter()
            .enumerate()
            .map(|(idx, set)| {
                self.device.set_object_debug_name(set, format!("DescriptorSet::{}-{}", name, idx));
                self.res.descriptor_sets.insert(set)
            })
            .collect_vec();
        self.res.descriptor_pools[pool].sets.extend_from_slice(&handles);

        Ok(handles)
    }

    fn update_descriptor_sets(&mut self, writes: &[GfxDescriptorWrite]) {
        let _span = tracy_client::span!("update_descriptor_sets");

        // 先准备好 info，write 中保存的是指向它们的指针
        let image_infos = writes
            .iter()
            .map(|write| match write.resource {
                GfxDescriptorResource::CombinedImageSampler { view, sampler, layout } => vk::DescriptorImageInfo {
                    sampler: self.res.samplers[sampler],
                    image_view: self.res.image_views[view],
                    image_layout: layout,
                },
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();
        let buffer_infos = writes
            .iter()
            .map(|write| match write.resource {
                GfxDescriptorResource::UniformBuffer { buffer, offset, range } => vk::DescriptorBufferInfo {
                    buffer: self.buffer(buffer),
                    offset,
                    range,
                },
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .enumerate()
            .map(|(idx, write)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(self.res.descriptor_sets[write.set])
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.resource.descriptor_type());
                match write.resource {
                    GfxDescriptorResource::CombinedImageSampler { .. } => {
                        vk_write.image_info(std::slice::from_ref(&image_infos[idx]))
                    }
                    GfxDescriptorResource::UniformBuffer { .. } => {
                        vk_write.buffer_info(std::slice::from_ref(&buffer_infos[idx]))
                    }
                }
            })
            .collect_vec();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }
}

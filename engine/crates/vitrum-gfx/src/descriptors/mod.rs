use ash::vk;
use itertools::Itertools;

use crate::handles::{GfxBufferHandle, GfxDescriptorSetHandle, GfxImageViewHandle, GfxSamplerHandle};

/// set layout 中的一个 binding，每个 binding 只有一个 descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxDescriptorBinding {
    pub slot: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// descriptor pool 的尺寸
#[derive(Debug, Clone)]
pub struct GfxDescriptorPoolDesc {
    pub max_sets: u32,
    pub pool_sizes: Vec<(vk::DescriptorType, u32)>,
}

impl GfxDescriptorPoolDesc {
    #[inline]
    pub fn vk_pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.pool_sizes
            .iter()
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: *count,
            })
            .collect_vec()
    }
}

/// 写入 descriptor 的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxDescriptorResource {
    CombinedImageSampler {
        view: GfxImageViewHandle,
        sampler: GfxSamplerHandle,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
}

impl GfxDescriptorResource {
    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
        }
    }
}

/// 对某个 set 的某个 binding 的一次写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxDescriptorWrite {
    pub set: GfxDescriptorSetHandle,
    pub binding: u32,
    pub resource: GfxDescriptorResource,
}

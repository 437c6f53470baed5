use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
}

impl GfxSamplerDesc {
    /// 材质缺省使用的线性采样器
    #[inline]
    pub fn linear_repeat() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }

    /// 全屏 pass 读取 render target 使用
    #[inline]
    pub fn linear_clamp() -> Self {
        Self {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Self::linear_repeat()
        }
    }

    /// 深度纹理不能做线性插值
    #[inline]
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0.0,
        }
    }
}

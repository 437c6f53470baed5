use bitflags::bitflags;

use crate::material::material_desc::{AlphaMode, MaterialDesc, VolumeDesc};

bitflags! {
    /// shader 根据这些标记决定是否采样对应的贴图
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MaterialFlags: u32 {
        const BASE_COLOR_TEXTURE = 1 << 0;
        const METALLIC_ROUGHNESS_TEXTURE = 1 << 1;
        const OCCLUSION_TEXTURE = 1 << 2;
        const NORMAL_TEXTURE = 1 << 3;
        const TRANSMISSION_TEXTURE = 1 << 4;
        const THICKNESS_TEXTURE = 1 << 5;

        const ALPHA_MASK = 1 << 8;
        const ALPHA_BLEND = 1 << 9;
        const DOUBLE_SIDED = 1 << 10;
    }
}

/// 材质 set binding 6，和 shader 中的 `MaterialConstants` 逐字节对应
///
/// 固定 128 字节，所有字段都是 4 字节，没有隐式 padding
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialConstants {
    pub base_color_factor: [f32; 4],

    pub emissive_factor: [f32; 3],
    pub alpha_cutoff: f32,

    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,

    pub transmission_factor: f32,
    pub thickness_factor: f32,
    pub attenuation_distance: f32,
    pub ior: f32,

    pub attenuation_color: [f32; 3],
    /// [`MaterialFlags`] 的 bits
    pub flags: u32,

    _padding: [f32; 12],
}

impl MaterialConstants {
    pub const SIZE: usize = 128;

    pub fn from_desc(desc: &MaterialDesc) -> Self {
        let volume = desc.volume.unwrap_or_default();

        let mut flags = MaterialFlags::empty();
        flags.set(MaterialFlags::BASE_COLOR_TEXTURE, desc.base_color_texture.is_some());
        flags.set(MaterialFlags::METALLIC_ROUGHNESS_TEXTURE, desc.metallic_roughness_texture.is_some());
        flags.set(MaterialFlags::OCCLUSION_TEXTURE, desc.occlusion_texture.is_some());
        flags.set(MaterialFlags::NORMAL_TEXTURE, desc.normal_texture.is_some());
        flags.set(MaterialFlags::TRANSMISSION_TEXTURE, desc.transmission_texture.is_some());
        flags.set(MaterialFlags::THICKNESS_TEXTURE, volume.thickness_texture.is_some());
        flags.set(MaterialFlags::ALPHA_MASK, desc.alpha_mode == AlphaMode::Mask);
        flags.set(MaterialFlags::ALPHA_BLEND, desc.alpha_mode == AlphaMode::Blend);
        flags.set(MaterialFlags::DOUBLE_SIDED, desc.double_sided);

        Self::from_factors(desc, &volume, flags)
    }

    fn from_factors(desc: &MaterialDesc, volume: &VolumeDesc, flags: MaterialFlags) -> Self {
        Self {
            base_color_factor: desc.base_color_factor,
            emissive_factor: desc.emissive_factor,
            alpha_cutoff: desc.alpha_cutoff,
            metallic_factor: desc.metallic_factor,
            roughness_factor: desc.roughness_factor,
            normal_scale: desc.normal_scale,
            occlusion_strength: desc.occlusion_strength,
            transmission_factor: desc.transmission_factor,
            thickness_factor: volume.thickness_factor,
            attenuation_distance: volume.attenuation_distance,
            ior: desc.ior,
            attenuation_color: volume.attenuation_color,
            flags: flags.bits(),
            _padding: [0.0; 12],
        }
    }

    #[inline]
    pub fn flags(&self) -> MaterialFlags {
        MaterialFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size() {
        assert_eq!(size_of::<MaterialConstants>(), MaterialConstants::SIZE);
        assert_eq!(align_of::<MaterialConstants>(), 4);
    }

    #[test]
    fn test_flags() {
        let desc = MaterialDesc {
            alpha_mode: AlphaMode::Mask,
            double_sided: true,
            ..Default::default()
        };
        let constants = MaterialConstants::from_desc(&desc);
        assert_eq!(constants.flags(), MaterialFlags::ALPHA_MASK | MaterialFlags::DOUBLE_SIDED);
        // 没有体积扩展时使用不衰减的默认值
        assert!(constants.attenuation_distance.is_infinite());
    }
}

use vitrum_gfx::{GfxImageViewHandle, GfxSamplerHandle};

/// glTF 的 alpha mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// 材质引用的一张贴图，sampler 缺省时使用默认的线性采样器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    pub view: GfxImageViewHandle,
    pub sampler: Option<GfxSamplerHandle>,
}

/// `KHR_materials_volume`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeDesc {
    pub thickness_factor: f32,
    pub thickness_texture: Option<TextureRef>,
    /// 无穷大表示光线在介质中不衰减
    pub attenuation_distance: f32,
    pub attenuation_color: [f32; 3],
}

impl Default for VolumeDesc {
    fn default() -> Self {
        Self {
            thickness_factor: 0.0,
            thickness_texture: None,
            attenuation_distance: f32::INFINITY,
            attenuation_color: [1.0, 1.0, 1.0],
        }
    }
}

/// 导入后的材质描述
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDesc {
    pub name: String,

    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<TextureRef>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<TextureRef>,
    pub normal_scale: f32,
    pub normal_texture: Option<TextureRef>,
    pub occlusion_strength: f32,
    pub occlusion_texture: Option<TextureRef>,
    pub emissive_factor: [f32; 3],

    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,

    /// `KHR_materials_transmission`
    pub transmission_factor: f32,
    pub transmission_texture: Option<TextureRef>,
    /// `KHR_materials_volume`，没有这个扩展时为 None
    pub volume: Option<VolumeDesc>,
    /// `KHR_materials_ior`
    pub ior: f32,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: [1.0; 4],
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_scale: 1.0,
            normal_texture: None,
            occlusion_strength: 1.0,
            occlusion_texture: None,
            emissive_factor: [0.0; 3],
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            transmission_factor: 0.0,
            transmission_texture: None,
            volume: None,
            ior: 1.5,
        }
    }
}

use std::fmt::Display;

use crate::material::material_desc::{AlphaMode, MaterialDesc};

/// 材质所属的 render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialCategory {
    Opaque,
    Transparent,
    /// 和 Transparent 使用相同的管线状态，但是通过透射合成绘制
    Transmissive,
}

impl MaterialCategory {
    pub const ALL: [MaterialCategory; 3] = [Self::Opaque, Self::Transparent, Self::Transmissive];

    /// 分类的顺序很重要：透射优先于 alpha blend
    pub fn classify(desc: &MaterialDesc) -> Self {
        if Self::has_transmission(desc) || Self::has_volume(desc) {
            Self::Transmissive
        } else if desc.alpha_mode == AlphaMode::Blend {
            Self::Transparent
        } else {
            Self::Opaque
        }
    }

    fn has_transmission(desc: &MaterialDesc) -> bool {
        desc.transmission_factor > 0.0 || desc.transmission_texture.is_some()
    }

    fn has_volume(desc: &MaterialDesc) -> bool {
        desc.volume.is_some_and(|volume| {
            volume.thickness_factor > 0.0
                || volume.thickness_texture.is_some()
                || volume.attenuation_distance.is_finite()
                || volume.attenuation_color != [0.0; 3]
        })
    }
}

impl Display for MaterialCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opaque => write!(f, "opaque"),
            Self::Transparent => write!(f, "transparent"),
            Self::Transmissive => write!(f, "transmissive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::material_desc::VolumeDesc;

    #[test]
    fn test_transmission_factor_wins_over_alpha_mode() {
        let desc = MaterialDesc {
            transmission_factor: 0.6,
            alpha_mode: AlphaMode::Opaque,
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&desc), MaterialCategory::Transmissive);

        let desc = MaterialDesc {
            transmission_factor: 0.6,
            alpha_mode: AlphaMode::Blend,
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&desc), MaterialCategory::Transmissive);
    }

    #[test]
    fn test_alpha_modes() {
        let blend = MaterialDesc {
            alpha_mode: AlphaMode::Blend,
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&blend), MaterialCategory::Transparent);

        let mask = MaterialDesc {
            alpha_mode: AlphaMode::Mask,
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&mask), MaterialCategory::Opaque);
        assert_eq!(MaterialCategory::classify(&MaterialDesc::default()), MaterialCategory::Opaque);
    }

    #[test]
    fn test_volume_rules() {
        let thick = MaterialDesc {
            volume: Some(VolumeDesc {
                thickness_factor: 0.1,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&thick), MaterialCategory::Transmissive);

        let attenuated = MaterialDesc {
            volume: Some(VolumeDesc {
                attenuation_distance: 2.0,
                attenuation_color: [0.0; 3],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&attenuated), MaterialCategory::Transmissive);

        // 体积参数全部退化时不算透射
        let trivial = MaterialDesc {
            volume: Some(VolumeDesc {
                attenuation_color: [0.0; 3],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(MaterialCategory::classify(&trivial), MaterialCategory::Opaque);
    }
}

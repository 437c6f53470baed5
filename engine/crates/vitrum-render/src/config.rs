use std::path::{Path, PathBuf};

use serde::Deserialize;
use vitrum_crate_tools::path::VitrumPath;
use vitrum_gfx::vk;

/// 配置文件中的呈现模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModeConfig {
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentModeConfig {
    #[inline]
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("peel_layers must be at least 1")]
    ZeroPeelLayers,

    #[error("frame_slots must be in 1..=3, got {0}")]
    FrameSlots(usize),

    #[error("msaa_samples must be one of 1, 2, 4, 8, got {0}")]
    MsaaSamples(u32),

    #[error("descriptor pool sizing must be positive")]
    PoolSizing,

    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 渲染器配置，对应 `vitrum.toml`，所有字段都有默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// frames in flight 的数量
    pub frame_slots: usize,
    /// 透射的 depth peel 层数
    pub peel_layers: u32,
    pub msaa_samples: u32,
    pub present_mode: PresentModeConfig,
    /// SPIR-V 目录，相对路径基于工作区根目录
    pub shader_dir: PathBuf,
    pub descriptor_pool_multiplier: u32,
    pub expected_materials: u32,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_slots: 2,
            peel_layers: 4,
            msaa_samples: 4,
            present_mode: PresentModeConfig::Mailbox,
            shader_dir: PathBuf::from("shaders/spv"),
            descriptor_pool_multiplier: 4,
            expected_materials: 64,
            clear_color: [0.05, 0.05, 0.08, 1.0],
        }
    }
}

// new & init
impl RendererConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// 在创建任何 GPU 对象之前调用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peel_layers == 0 {
            return Err(ConfigError::ZeroPeelLayers);
        }
        if !(1..=3).contains(&self.frame_slots) {
            return Err(ConfigError::FrameSlots(self.frame_slots));
        }
        if ![1, 2, 4, 8].contains(&self.msaa_samples) {
            return Err(ConfigError::MsaaSamples(self.msaa_samples));
        }
        if self.descriptor_pool_multiplier == 0 || self.expected_materials == 0 {
            return Err(ConfigError::PoolSizing);
        }
        Ok(())
    }
}

// getters
impl RendererConfig {
    #[inline]
    pub fn msaa_sample_count(&self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::from_raw(self.msaa_samples)
    }

    pub fn shader_path(&self, name: &str) -> PathBuf {
        let dir = if self.shader_dir.is_absolute() {
            self.shader_dir.clone()
        } else {
            VitrumPath::workspace_path().join(&self.shader_dir)
        };
        dir.join(format!("{}.spv", name))
    }
}

/// 不开放配置的渲染常量
pub struct RendererConstants;
impl RendererConstants {
    pub const SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
    /// 透射使用的离屏颜色格式，需要支持 blit 生成 mip
    pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

    /// 等待 fence 的上限，超时视为设备丢失
    pub const FENCE_TIMEOUT_NS: u64 = 30 * 1000 * 1000 * 1000;
    pub const ACQUIRE_TIMEOUT_NS: u64 = u64::MAX;
    /// 最小化时轮询 surface 尺寸的间隔
    pub const MINIMIZED_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_slots, 2);
        assert_eq!(config.peel_layers, 4);
        assert_eq!(config.msaa_sample_count(), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_zero_peel_layers_rejected() {
        let err = RendererConfig::from_toml_str("peel_layers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeelLayers));

        let config = RendererConfig::from_toml_str("peel_layers = 1").unwrap();
        assert_eq!(config.peel_layers, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RendererConfig::from_toml_str("frame_slots = 4"),
            Err(ConfigError::FrameSlots(4))
        ));
        assert!(matches!(
            RendererConfig::from_toml_str("frame_slots = 0"),
            Err(ConfigError::FrameSlots(0))
        ));
        assert!(matches!(
            RendererConfig::from_toml_str("msaa_samples = 3"),
            Err(ConfigError::MsaaSamples(3))
        ));
        assert!(matches!(
            RendererConfig::from_toml_str("expected_materials = 0"),
            Err(ConfigError::PoolSizing)
        ));
        assert!(matches!(RendererConfig::from_toml_str("unknown = 1"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_full_file() {
        let config = RendererConfig::from_toml_str(
            r#"
            frame_slots = 3
            msaa_samples = 1
            present_mode = "fifo"
            shader_dir = "/opt/vitrum/spv"
            clear_color = [0.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.frame_slots, 3);
        assert_eq!(config.present_mode.to_vk(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.shader_path("mesh.vert").ends_with("spv/mesh.vert.spv"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RendererConfig::load_or_default(Path::new("/nonexistent/vitrum.toml")).unwrap();
        assert_eq!(config.peel_layers, 4);
    }
}

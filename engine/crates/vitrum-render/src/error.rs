use std::fmt::Display;

use vitrum_gfx::GfxError;

use crate::{config::ConfigError, material::material_system::UnknownMaterial};

/// 出错时所处的阶段，用于致命错误的诊断信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Init,
    Recording,
    Submission,
    Presentation,
    Shutdown,
}

impl Display for FramePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Recording => write!(f, "per-frame recording"),
            Self::Submission => write!(f, "submission"),
            Self::Presentation => write!(f, "presentation"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// 渲染核心的错误，全部都是致命错误
///
/// surface 过期不会出现在这里：它在帧调度内部被转换为 swapchain 重建
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid renderer config: {0}")]
    Config(#[from] ConfigError),

    #[error("gpu error during {phase}: {source}")]
    Gfx {
        phase: FramePhase,
        #[source]
        source: GfxError,
    },

    #[error(transparent)]
    UnknownMaterial(#[from] UnknownMaterial),

    /// 上一次 swapchain 重建失败，已经没有可以呈现的 image
    #[error("swapchain is unavailable after a failed recreate")]
    SurfaceLost,
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    #[inline]
    pub fn phase(&self) -> FramePhase {
        match self {
            Self::Config(_) => FramePhase::Init,
            Self::Gfx { phase, .. } => *phase,
            Self::UnknownMaterial(_) => FramePhase::Recording,
            Self::SurfaceLost => FramePhase::Presentation,
        }
    }

    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Gfx { source, .. } if source.is_device_lost())
    }
}

/// 为 `GfxResult` 标注所处的阶段
pub trait GfxPhaseExt<T> {
    fn phase(self, phase: FramePhase) -> RenderResult<T>;
}
impl<T> GfxPhaseExt<T> for Result<T, GfxError> {
    #[inline]
    fn phase(self, phase: FramePhase) -> RenderResult<T> {
        self.map_err(|source| RenderError::Gfx { phase, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_phase() {
        let err = Err::<(), _>(GfxError::Timeout).phase(FramePhase::Recording).unwrap_err();
        assert_eq!(err.phase(), FramePhase::Recording);
        assert!(err.is_device_lost());
        assert!(err.to_string().contains("per-frame recording"));

        let err = RenderError::from(ConfigError::ZeroPeelLayers);
        assert_eq!(err.phase(), FramePhase::Init);
        assert!(!err.is_device_lost());
    }
}

use std::path::PathBuf;

use ash::vk;

/// GFX 层的错误类型
///
/// 注意：surface 过期（out of date）不是错误，而是 [`crate::swapchain::GfxAcquire`] 和
/// [`crate::swapchain::GfxPresentResult`] 中的一个分支，调用方必须显式处理。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("failed to load vulkan: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("vulkan call `{call}` failed: {result:?}")]
    Vk { call: &'static str, result: vk::Result },

    /// fence 或者 queue 等待超时，视为设备丢失
    #[error("gpu wait timed out")]
    Timeout,

    #[error("device lost")]
    DeviceLost,

    /// 固定大小的 descriptor pool 被耗尽，说明 pool 的尺寸估计错误
    #[error("descriptor pool exhausted")]
    DescriptorPoolExhausted,

    #[error("memory allocation failed for `{name}`: {result:?}")]
    Allocation { name: String, result: vk::Result },

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(String),

    #[error("required {kind} `{name}` is not supported")]
    Unsupported { kind: &'static str, name: String },

    #[error("write of {len} bytes at offset {offset} exceeds `{what}` of size {size}")]
    OutOfRange {
        what: &'static str,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        size: vk::DeviceSize,
    },

    /// 同一个 set layout 中 binding slot 重复
    #[error("binding slot {0} is used twice in one set layout")]
    DuplicateBindingSlot(u32),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 将 vk::Result 映射为错误，区分出设备丢失和超时
    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => Self::DescriptorPoolExhausted,
            result => Self::Vk { call, result },
        }
    }

    /// 检查 `[offset, offset + len)` 是否落在大小为 `size` 的范围内
    pub fn check_range(
        what: &'static str,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> GfxResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(Self::OutOfRange { what, offset, len, size }),
        }
    }

    /// 是否属于设备丢失一类的不可恢复错误
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::Timeout)
    }
}

/// 为 `VkResult` 附加调用名称的便捷扩展
pub trait VkResultExt<T> {
    fn vk_call(self, call: &'static str) -> GfxResult<T>;
}
impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn vk_call(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::from_vk(call, result))
    }
}

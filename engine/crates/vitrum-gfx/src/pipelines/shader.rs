use std::{ffi::CStr, path::PathBuf};

use ash::vk;

use crate::error::{GfxError, GfxResult};

#[derive(Debug, Clone)]
pub struct GfxShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
    /// SPIR-V 文件路径
    pub path: PathBuf,
}

impl GfxShaderStage {
    #[inline]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// 读取 SPIR-V 字节码
    pub fn load_spv(&self) -> GfxResult<Vec<u32>> {
        let shader_load_err = |source| GfxError::ShaderLoad {
            path: self.path.clone(),
            source,
        };
        let bytes = std::fs::read(&self.path).map_err(shader_load_err)?;
        ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(shader_load_err)
    }
}

use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导），避免硬编码相对路径。
///
/// # 使用示例
/// ```ignore
/// let model = VitrumPath::assets_path("DamagedHelmet.glb");  // assets/DamagedHelmet.glb
/// let shader = VitrumPath::shader_spv_path("mesh.vert");     // shaders/spv/mesh.vert.spv
/// ```
pub struct VitrumPath {}
impl VitrumPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // vitrum-crate-tools 位于 workspace 根目录下
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 编译后的 SPIR-V 所在的目录
    pub fn shader_spv_dir() -> PathBuf {
        Self::workspace_path().join("shaders").join("spv")
    }

    /// 获取 `shaders/spv/` 目录下的着色器路径，自动添加 `.spv` 后缀
    pub fn shader_spv_path(filename: &str) -> PathBuf {
        Self::shader_spv_dir().join(format!("{}.spv", filename))
    }

    /// 默认的配置文件路径
    pub fn config_path() -> PathBuf {
        Self::workspace_path().join("vitrum.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_spv_path() {
        let path = VitrumPath::shader_spv_path("mesh.vert");
        assert!(path.ends_with("shaders/spv/mesh.vert.spv"));
        assert!(path.starts_with(VitrumPath::workspace_path()));
    }
}

use std::path::PathBuf;

use vitrum_winit_app::app::WinitApp;

/// 用法：`vitrum-viewer [scene.gltf|scene.glb]`
fn main() -> anyhow::Result<()> {
    let scene_path = std::env::args_os().nth(1).map(PathBuf::from);
    WinitApp::run(scene_path)
}

use std::path::PathBuf;

use anyhow::Context;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vitrum_crate_tools::{init_log::init_log, path::VitrumPath};
use vitrum_gfx::{vk, vulkan::VulkanBackend};
use vitrum_render::{
    config::RendererConfig,
    draw_context::{DrawContext, MeshBuffers},
    frame_scheduler::FrameOutcome,
    global_uniforms::GlobalUniforms,
    material::{material_desc::MaterialDesc, material_system::MaterialHandle},
    renderer::Renderer,
};
use vitrum_scene::{
    error::SceneResult,
    gltf_import::{GltfLoader, SceneTargets},
    mesh_store::MeshStore,
    scene_graph::SceneGraph,
    texture_store::TextureStore,
};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{demo_scene::build_demo_scene, frame_timing::FrameTiming, input_state::InputState, orbit_camera::OrbitCamera};

/// 窗口创建之后才能存在的部分，销毁顺序和创建顺序相反
struct Viewer {
    backend: VulkanBackend,
    renderer: Renderer,
    scene: SceneGraph,
    meshes: MeshStore,
    textures: TextureStore,
    mesh_buffers: MeshBuffers,
    draw_ctx: DrawContext,
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

// new & init
impl Viewer {
    fn new(window: &Window, config: RendererConfig, scene_path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Viewer::new");

        let mut backend = VulkanBackend::new(
            "vitrum-viewer",
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
        )?;

        // 失败时残留的 GPU 对象由设备销毁时统一回收
        match Self::load(&mut backend, window, config, scene_path) {
            Ok((renderer, scene, meshes, textures, mesh_buffers)) => Ok(Self {
                backend,
                renderer,
                scene,
                meshes,
                textures,
                mesh_buffers,
                draw_ctx: DrawContext::default(),
            }),
            Err(e) => {
                backend.destroy();
                Err(e)
            }
        }
    }

    fn load(
        backend: &mut VulkanBackend,
        window: &Window,
        config: RendererConfig,
        scene_path: Option<&PathBuf>,
    ) -> anyhow::Result<(Renderer, SceneGraph, MeshStore, TextureStore, MeshBuffers)> {
        let mut surface = || window_extent(window);
        let mut renderer = Renderer::new(backend, config, &mut surface)?;

        let mut scene = SceneGraph::new();
        let mut meshes = MeshStore::new();
        let mut textures = TextureStore::new(backend)?;
        let mut targets = SceneTargets {
            scene: &mut scene,
            meshes: &mut meshes,
            textures: &mut textures,
        };
        let create_material = |gfx: &mut VulkanBackend, desc: &MaterialDesc| -> SceneResult<MaterialHandle> {
            Ok(renderer.create_material(gfx, desc)?)
        };
        match scene_path {
            Some(path) => {
                GltfLoader::from_file(path)?.load_into(backend, &mut targets, create_material)?;
            }
            None => {
                log::info!("no scene file given, use the demo scene");
                build_demo_scene(backend, &mut targets, create_material)?;
            }
        }
        let mesh_buffers = meshes.upload(backend)?;

        Ok((renderer, scene, meshes, textures, mesh_buffers))
    }
}

// update
impl Viewer {
    fn render(&mut self, window: &Window, camera: &OrbitCamera) -> anyhow::Result<()> {
        let extent = window_extent(window);
        // 最小化时不渲染
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }

        self.scene
            .build_draw_context(&self.meshes, self.renderer.materials(), &mut self.draw_ctx);

        let uniforms = GlobalUniforms::new(
            camera.view(),
            camera.projection(extent.width as f32 / extent.height as f32),
            camera.position(),
            extent,
        );
        let mut surface = || window_extent(window);
        let outcome = self.renderer.render_frame(
            &mut self.backend,
            &self.draw_ctx,
            self.mesh_buffers,
            uniforms,
            &mut surface,
        )?;
        if !matches!(outcome, FrameOutcome::Presented { .. }) {
            log::debug!("frame outcome: {:?}", outcome);
        }
        Ok(())
    }
}

// destroy
impl Viewer {
    fn destroy(mut self) -> anyhow::Result<()> {
        // renderer 先等待 GPU 空闲
        let result = self.renderer.destroy(&mut self.backend);
        self.textures.destroy(&mut self.backend);
        self.meshes.destroy(&mut self.backend);
        self.backend.destroy();
        Ok(result?)
    }
}

pub struct WinitApp {
    config: RendererConfig,
    scene_path: Option<PathBuf>,

    window: Option<Window>,
    viewer: Option<Viewer>,

    input: InputState,
    timing: FrameTiming,
    camera: OrbitCamera,

    /// 事件回调中出现的致命错误，事件循环结束后返回给 main
    fatal: Option<anyhow::Error>,
}

// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口，`scene_path` 为 None 时使用内置的演示场景
    pub fn run(scene_path: Option<PathBuf>) -> anyhow::Result<()> {
        init_log(log::LevelFilter::Info);
        std::panic::set_hook(Box::new(|info| {
            log::error!("{}", info);
        }));
        tracy_client::Client::start();

        let config_path = VitrumPath::config_path();
        let config = RendererConfig::load_or_default(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;

        let event_loop = EventLoop::new()?;
        let mut app = Self {
            config,
            scene_path,
            window: None,
            viewer: None,
            input: InputState::default(),
            timing: FrameTiming::default(),
            camera: OrbitCamera::default(),
            fatal: None,
        };
        event_loop.run_app(&mut app)?;

        log::info!("end run.");
        app.destroy()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("fatal: {:#}", error);
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn update(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("WinitApp::update");
        let (Some(window), Some(viewer)) = (self.window.as_ref(), self.viewer.as_mut()) else {
            return Ok(());
        };

        self.timing.tick();
        self.camera.update(&self.input, &self.timing);
        self.input.end_frame();

        viewer.render(window, &self.camera)?;

        if self.timing.frame_count() % 600 == 0 {
            let stats = viewer.renderer.transmission_stats();
            log::debug!(
                "fps {:.1}, transmission layers visible {}/{}",
                self.timing.fps(),
                stats.visible_layers(),
                stats.layers.len()
            );
        }
        Ok(())
    }
}

// destroy
impl WinitApp {
    fn destroy(mut self) -> anyhow::Result<()> {
        let result = match self.viewer.take() {
            Some(viewer) => viewer.destroy(),
            None => Ok(()),
        };
        self.window = None;

        match self.fatal.take() {
            Some(error) => Err(error),
            None => result,
        }
    }
}

// 各种 winit 的事件处理
impl ApplicationHandler for WinitApp {
    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Vitrum")
            .with_inner_size(winit::dpi::LogicalSize::new(1200.0, 800.0));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match Viewer::new(&window, self.config.clone(), self.scene_path.as_ref()) {
            Ok(viewer) => self.viewer = Some(viewer),
            Err(e) => return self.fail(event_loop, e),
        }
        self.timing.reset_tick();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        self.input.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                log::debug!("window resized: {}x{}", size.width, size.height);
                if let Some(viewer) = self.viewer.as_mut() {
                    viewer.renderer.notify_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.update() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }
}

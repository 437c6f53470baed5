//! 渲染核心的入口
//!
//! 按照依赖顺序创建 descriptor、swapchain、材质、global uniform、透射合成以及帧调度，
//! 销毁时顺序相反。设备由调用方持有，每次调用时借用。

use vitrum_gfx::{GfxBackend, vk};

use crate::{
    config::RendererConfig,
    descriptor_binding::DescriptorBindingManager,
    draw_context::{DrawContext, MeshBuffers},
    error::{FramePhase, GfxPhaseExt, RenderError, RenderResult},
    frame_scheduler::{FrameInputs, FrameOutcome, FrameResources, FrameScheduler, OverlayPass},
    global_uniforms::{GlobalBindings, GlobalUniforms},
    material::{
        constants::MaterialConstants,
        material_desc::MaterialDesc,
        material_system::{MaterialHandle, MaterialSystem},
    },
    swapchain_lifecycle::{SurfaceExtentSource, SwapchainLifecycle},
    transmission::compositor::{TransmissionCompositor, TransmissionStats},
};

pub struct Renderer {
    config: RendererConfig,
    samples: vk::SampleCountFlags,

    descriptors: DescriptorBindingManager,
    materials: MaterialSystem,
    globals: GlobalBindings,
    compositor: TransmissionCompositor,
    scheduler: FrameScheduler,
}

// new & init
impl Renderer {
    /// 任何一步失败都是致命错误，残留的 GPU 对象由设备销毁时统一回收
    pub fn new(
        gfx: &mut impl GfxBackend,
        config: RendererConfig,
        surface: &mut dyn SurfaceExtentSource,
    ) -> RenderResult<Self> {
        let _span = crate::profile_span!("Renderer::new");
        config.validate()?;

        let requested = config.msaa_sample_count();
        let samples = gfx.limits().clamp_samples(requested);
        if samples != requested {
            log::warn!("msaa {:?} is not supported, use {:?}", requested, samples);
        }

        let descriptors = DescriptorBindingManager::new(gfx, &config).phase(FramePhase::Init)?;
        let lifecycle = SwapchainLifecycle::new(gfx, &config, samples, surface).phase(FramePhase::Init)?;
        let (extent, format) = {
            let resources = lifecycle.resources().ok_or(RenderError::SurfaceLost)?;
            (resources.extent(), resources.format().format)
        };

        let materials = MaterialSystem::new(gfx, &config, &descriptors, format, samples).phase(FramePhase::Init)?;
        let globals = GlobalBindings::new(gfx, &descriptors, config.frame_slots).phase(FramePhase::Init)?;
        let compositor =
            TransmissionCompositor::new(gfx, &config, &descriptors, &materials, extent, format, samples)
                .phase(FramePhase::Init)?;
        let scheduler = FrameScheduler::new(gfx, &config, lifecycle).phase(FramePhase::Init)?;

        log::info!(
            "renderer ready: {} frame slots, {} peel layers, msaa {:?}, {}x{}",
            config.frame_slots,
            config.peel_layers,
            samples,
            extent.width,
            extent.height
        );

        Ok(Self {
            config,
            samples,
            descriptors,
            materials,
            globals,
            compositor,
            scheduler,
        })
    }
}

// material
impl Renderer {
    /// 加载期调用，不能在有帧在飞行时调用
    pub fn create_material(&mut self, gfx: &mut impl GfxBackend, desc: &MaterialDesc) -> RenderResult<MaterialHandle> {
        self.materials.create_material(gfx, &self.descriptors, desc).phase(FramePhase::Init)
    }

    /// 新的 constants 在每个 slot 下一次录制时写入
    #[inline]
    pub fn set_material_constants(
        &mut self,
        material: MaterialHandle,
        constants: MaterialConstants,
    ) -> RenderResult<()> {
        Ok(self.materials.set_constants(material, constants)?)
    }
}

// update
impl Renderer {
    pub fn render_frame(
        &mut self,
        gfx: &mut impl GfxBackend,
        draw_ctx: &DrawContext,
        mesh: MeshBuffers,
        uniforms: GlobalUniforms,
        surface: &mut dyn SurfaceExtentSource,
    ) -> RenderResult<FrameOutcome> {
        let mut res = FrameResources {
            materials: &mut self.materials,
            globals: &self.globals,
            compositor: &mut self.compositor,
        };
        let inputs = FrameInputs {
            draw_ctx,
            mesh,
            uniforms,
        };
        self.scheduler.render_frame(gfx, &mut res, &inputs, surface)
    }

    /// 窗口尺寸变化，下一帧 present 之后重建
    #[inline]
    pub fn notify_resized(&mut self) {
        self.scheduler.request_resize();
    }

    #[inline]
    pub fn set_overlay(&mut self, overlay: Option<Box<dyn OverlayPass>>) {
        self.scheduler.set_overlay(overlay);
    }
}

// getters
impl Renderer {
    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
    /// 按照设备能力裁剪之后的采样数
    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
    /// swapchain 当前的尺寸，重建失败后为 None
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.scheduler.lifecycle().resources().map(|r| r.extent())
    }
    #[inline]
    pub fn materials(&self) -> &MaterialSystem {
        &self.materials
    }
    #[inline]
    pub fn descriptors(&self) -> &DescriptorBindingManager {
        &self.descriptors
    }
    #[inline]
    pub fn compositor(&self) -> &TransmissionCompositor {
        &self.compositor
    }
    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }
    #[inline]
    pub fn transmission_stats(&self) -> &TransmissionStats {
        self.compositor.last_stats()
    }
}

// destroy
impl Renderer {
    /// 等待 GPU 空闲之后按照创建的逆序销毁
    pub fn destroy(self, gfx: &mut impl GfxBackend) -> RenderResult<()> {
        let _span = crate::profile_span!("Renderer::destroy");
        gfx.wait_idle().phase(FramePhase::Shutdown)?;

        self.scheduler.destroy(gfx);
        self.compositor.destroy(gfx);
        self.globals.destroy(gfx);
        self.materials.destroy(gfx);
        self.descriptors.destroy(gfx);
        log::info!("renderer destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use itertools::Itertools;
    use vitrum_gfx::{
        GfxCommandBufferHandle, GfxCommands, GfxResources,
        mock::{GfxEvent, GfxObjectKind, MockGfx},
        query::GfxQueryResult,
        resources::buffer::GfxBufferDesc,
        swapchain::{GfxAcquire, GfxPresentResult},
    };

    use super::*;
    use crate::{
        config::ConfigError,
        draw_context::DrawItem,
        frame_scheduler::FrameState,
        material::category::MaterialCategory,
        transmission::compositor::LayerVisibility,
    };

    fn window(width: u32, height: u32) -> impl FnMut() -> vk::Extent2D {
        move || vk::Extent2D { width, height }
    }

    struct TestScene {
        mesh: MeshBuffers,
        wall: MaterialHandle,
        glass: MaterialHandle,
    }

    impl TestScene {
        fn new(gfx: &mut MockGfx, renderer: &mut Renderer) -> Self {
            let mesh = MeshBuffers {
                vertex: gfx.create_buffer(&GfxBufferDesc::vertex(4096), "vertex").unwrap(),
                index: gfx.create_buffer(&GfxBufferDesc::index(4096), "index").unwrap(),
            };
            let wall = renderer.create_material(gfx, &MaterialDesc::default()).unwrap();
            let glass = renderer
                .create_material(
                    gfx,
                    &MaterialDesc {
                        name: "glass".to_string(),
                        transmission_factor: 0.6,
                        ..Default::default()
                    },
                )
                .unwrap();
            Self { mesh, wall, glass }
        }

        fn item(material: MaterialHandle) -> DrawItem {
            DrawItem {
                first_index: 0,
                index_count: 6,
                vertex_offset: 0,
                transform: glam::Mat4::IDENTITY,
                material,
            }
        }

        fn opaque_only(&self) -> DrawContext {
            let mut ctx = DrawContext::default();
            ctx.push(MaterialCategory::Opaque, Self::item(self.wall));
            ctx
        }

        fn with_glass(&self) -> DrawContext {
            let mut ctx = self.opaque_only();
            ctx.push(MaterialCategory::Transmissive, Self::item(self.glass));
            ctx
        }

        fn destroy(self, gfx: &mut MockGfx) {
            gfx.destroy_buffer(self.mesh.vertex);
            gfx.destroy_buffer(self.mesh.index);
        }
    }

    fn setup(config: RendererConfig) -> (MockGfx, Renderer, TestScene) {
        let mut gfx = MockGfx::new();
        let mut renderer = Renderer::new(&mut gfx, config, &mut window(800, 600)).unwrap();
        let scene = TestScene::new(&mut gfx, &mut renderer);
        (gfx, renderer, scene)
    }

    fn frame(
        gfx: &mut MockGfx,
        renderer: &mut Renderer,
        scene: &TestScene,
        ctx: &DrawContext,
        surface: &mut dyn SurfaceExtentSource,
    ) -> RenderResult<FrameOutcome> {
        renderer.render_frame(gfx, ctx, scene.mesh, GlobalUniforms::default(), surface)
    }

    fn teardown(mut gfx: MockGfx, renderer: Renderer, scene: TestScene) {
        scene.destroy(&mut gfx);
        renderer.destroy(&mut gfx).unwrap();
        let stats = gfx.resource_stats();
        assert_eq!(stats.total(), 0, "leaked: {:?}", stats);
    }

    #[test]
    fn test_slot_never_reused_before_fence() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.with_glass();
        let mut surface = window(800, 600);
        for _ in 0..7 {
            frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        }

        let fences = renderer.scheduler().fences();
        let cmds = renderer.scheduler().slots().iter().map(|s| s.cmd()).collect_vec();
        let events = gfx.events();

        // 每次 begin 之前，这个 command buffer 上一次提交所用的 fence 必须已经被等待
        let mut last_submit: Vec<Option<usize>> = vec![None; cmds.len()];
        let mut begins = 0;
        for (pos, event) in events.iter().enumerate() {
            match event {
                GfxEvent::Submit { cmds: submitted, fence, .. } => {
                    let slot = cmds.iter().position(|c| *c == submitted[0]).unwrap();
                    assert_eq!(*fence, Some(fences[slot]));
                    last_submit[slot] = Some(pos);
                }
                GfxEvent::BeginCommandBuffer { cmd, .. } => {
                    begins += 1;
                    let slot = cmds.iter().position(|c| c == cmd).unwrap();
                    if let Some(submit) = last_submit[slot] {
                        let waited = events[submit..pos]
                            .iter()
                            .any(|e| *e == GfxEvent::WaitFence { fence: fences[slot] });
                        assert!(waited, "slot {} re-recorded before its fence was waited", slot);
                    }
                }
                _ => {}
            }
        }
        assert_eq!(begins, 7);

        // slot = frame_id % K
        let labels = events
            .iter()
            .filter_map(|e| match e {
                GfxEvent::BeginCommandBuffer { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(&labels[..3], &["[F0A]", "[F1B]", "[F2A]"]);
        assert_eq!(renderer.scheduler().counter().frame_id(), 7);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_submit_waits_and_signals() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        frame(&mut gfx, &mut renderer, &scene, &scene.opaque_only(), &mut window(800, 600)).unwrap();

        let slot = &renderer.scheduler().slots()[0];
        let submit = gfx.position(|e| matches!(e, GfxEvent::Submit { .. })).unwrap();
        let present = gfx.position(|e| matches!(e, GfxEvent::Present { .. })).unwrap();
        assert!(submit < present);
        assert_eq!(
            gfx.events()[submit],
            GfxEvent::Submit {
                cmds: vec![slot.cmd()],
                waits: vec![(slot.image_acquired(), vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)],
                signals: vec![(slot.render_finished(), vk::PipelineStageFlags2::ALL_COMMANDS)],
                fence: Some(slot.fence()),
            }
        );
        assert!(matches!(
            &gfx.events()[present],
            GfxEvent::Present { waits, .. } if *waits == vec![slot.render_finished()]
        ));
        assert!(renderer.scheduler().slots().iter().all(|s| s.state() == FrameState::Idle));

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_material_constants_written_per_slot() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.opaque_only();
        let mut surface = window(800, 600);
        let constants_buffer = renderer.materials().material(scene.wall).constants_buffer().buffer();
        let offsets = (0..2)
            .map(|slot| renderer.materials().material(scene.wall).constants_buffer().offset(slot))
            .collect_vec();
        let fences = renderer.scheduler().fences();

        let mut constants = *renderer.materials().material(scene.wall).constants();
        constants.roughness_factor = 0.25;
        renderer.set_material_constants(scene.wall, constants).unwrap();

        let writes = |gfx: &MockGfx| {
            gfx.events()
                .iter()
                .filter_map(|e| match e {
                    GfxEvent::WriteBuffer { buffer, offset, .. } if *buffer == constants_buffer => Some(*offset),
                    _ => None,
                })
                .collect_vec()
        };

        // 每一帧只写入当前 slot 的区域，并且在这个 slot 的 fence 被等待之后
        for slot in 0..2 {
            gfx.clear_events();
            frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
            assert_eq!(writes(&gfx), vec![offsets[slot]]);
            let wait = gfx.position(|e| *e == GfxEvent::WaitFence { fence: fences[slot] }).unwrap();
            let write = gfx.position(|e| matches!(e, GfxEvent::WriteBuffer { buffer, .. } if *buffer == constants_buffer));
            assert!(wait < write.unwrap());
        }

        // 所有 slot 都已经刷新
        gfx.clear_events();
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(writes(&gfx).is_empty());
        assert!((0..2).all(|slot| !renderer.materials().material(scene.wall).is_dirty(slot)));

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_recreate_with_same_size_is_idempotent() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.with_glass();
        let mut surface = window(800, 600);
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        let before = gfx.resource_stats();

        for _ in 0..2 {
            renderer.notify_resized();
            let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
            assert!(matches!(outcome, FrameOutcome::PresentedAndRecreated { .. }));
            assert_eq!(gfx.resource_stats(), before);
        }
        assert_eq!(renderer.scheduler().lifecycle().recreate_count(), 2);
        assert_eq!(renderer.extent(), Some(vk::Extent2D { width: 800, height: 600 }));
        assert!(!renderer.scheduler().resize_requested());

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_zero_peel_layers_rejected() {
        let mut gfx = MockGfx::new();
        let config = RendererConfig {
            peel_layers: 0,
            ..Default::default()
        };
        let result = Renderer::new(&mut gfx, config, &mut window(800, 600));
        let err = result.err().unwrap();
        assert!(matches!(err, RenderError::Config(ConfigError::ZeroPeelLayers)));
        assert_eq!(err.phase(), FramePhase::Init);
        // 没有创建任何 GPU 对象
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Create { .. })), 0);
    }

    #[test]
    fn test_single_peel_layer() {
        let config = RendererConfig {
            peel_layers: 1,
            ..Default::default()
        };
        let (mut gfx, mut renderer, scene) = setup(config);
        gfx.clear_events();
        frame(&mut gfx, &mut renderer, &scene, &scene.with_glass(), &mut window(800, 600)).unwrap();

        assert_eq!(renderer.compositor().invocations(), 1);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginQuery { .. })), 1);
        // 1 次合成 + 1 次写回主 pass
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 })), 2);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_opaque_only_skips_transmission() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.opaque_only();
        let mut surface = window(800, 600);
        gfx.clear_events();
        for _ in 0..3 {
            frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        }

        assert_eq!(renderer.compositor().invocations(), 0);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginQuery { .. })), 0);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Draw { .. })), 0);
        // 每帧只有主 pass
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginRendering { .. })), 3);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::DrawIndexed { .. })), 3);
        assert!(renderer.transmission_stats().layers.is_empty());

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_occluding_quad_leaves_later_layers_empty() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.with_glass();
        let mut surface = window(800, 600);

        gfx.clear_events();
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        // 3 次深度前移 + 4 次合成 + 1 次写回主 pass
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 })), 8);
        let composite_pass = gfx
            .events()
            .iter()
            .rposition(|e| matches!(e, GfxEvent::BeginRendering { color_attachments: 1, depth: false, .. }))
            .unwrap();
        let composite_draws = gfx.events()[composite_pass..]
            .iter()
            .take_while(|e| **e != GfxEvent::EndRendering)
            .filter(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 }))
            .count();
        assert_eq!(composite_draws, 4);

        // mock 不做光栅化，无法算出遮挡，query 的结果由测试给出。
        // 这里检查的是录制的结构：第 i 层的 query 结果决定第 i 层之后的深度前移是否执行，
        // 所以第 1 层为空时之后的层都只会剥离出同样的空结果
        let copies = gfx
            .events()
            .iter()
            .filter_map(|e| match e {
                GfxEvent::CopyQueryResults { first, count: 1, dst, offset, .. } => Some((*first, (*dst, *offset))),
                _ => None,
            })
            .collect_vec();
        let predicates = gfx
            .events()
            .iter()
            .filter_map(|e| match e {
                GfxEvent::BeginConditional { buffer, offset } => Some((*buffer, *offset)),
                _ => None,
            })
            .collect_vec();
        assert_eq!(copies.iter().map(|(layer, _)| *layer).collect_vec(), vec![0, 1, 2]);
        assert_eq!(copies.into_iter().map(|(_, target)| target).collect_vec(), predicates);

        // slot 0 的 query 在它下一次被使用时读取
        gfx.push_query_results(vec![
            GfxQueryResult::Ready(480_000),
            GfxQueryResult::Ready(0),
            GfxQueryResult::Ready(0),
            GfxQueryResult::Ready(0),
        ]);
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(renderer.transmission_stats().layers.is_empty());
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();

        let stats = renderer.transmission_stats();
        assert_eq!(stats.frame_id, 0);
        assert_eq!(stats.layers[0], LayerVisibility::Visible(480_000));
        assert_eq!(stats.layers[1], LayerVisibility::Empty);
        assert_eq!(stats.first_empty_layer(), Some(1));
        assert_eq!(stats.visible_layers(), 1);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_resize_recreates_after_present() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.with_glass();
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut window(800, 600)).unwrap();

        let old_images = {
            let sc = renderer.scheduler().lifecycle().resources().unwrap();
            (0..sc.image_count() as u32).map(|i| sc.image(i)).collect_vec()
        };
        let old_peel = renderer.compositor().targets(1).peel_color(0).image;

        gfx.clear_events();
        gfx.set_surface_extent(1024, 768);
        renderer.notify_resized();
        let mut surface = window(1024, 768);
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(matches!(outcome, FrameOutcome::PresentedAndRecreated { .. }));

        // 当前帧先完成提交和呈现，之后才等待空闲并销毁
        let submit = gfx.position(|e| matches!(e, GfxEvent::Submit { .. })).unwrap();
        let present = gfx.position(|e| matches!(e, GfxEvent::Present { .. })).unwrap();
        let idle = gfx.position(|e| *e == GfxEvent::WaitIdle).unwrap();
        let first_destroy = gfx.position(|e| matches!(e, GfxEvent::Destroy { .. })).unwrap();
        let create = gfx.position(|e| matches!(e, GfxEvent::CreateSwapchain { .. })).unwrap();
        assert!(submit < present && present < idle && idle < first_destroy && first_destroy < create);
        assert!(old_images.iter().all(|image| !gfx.is_alive_image(*image)));
        assert!(!gfx.is_alive_image(old_peel));

        // 之后的帧不再引用旧的 image
        gfx.clear_events();
        for _ in 0..2 {
            assert!(matches!(
                frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
        for event in gfx.events() {
            if let GfxEvent::ImageBarriers { images } = event {
                assert!(images.iter().all(|(image, _)| gfx.is_alive_image(*image)));
            }
            if let GfxEvent::BeginRendering { area, .. } = event {
                assert_eq!(*area, vk::Extent2D { width: 1024, height: 768 });
            }
        }
        assert_eq!(
            gfx.image_desc(renderer.compositor().targets(0).composite().image).extent,
            vk::Extent2D { width: 1024, height: 768 }
        );

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_stale_acquire_skips_frame() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.with_glass();
        let mut surface = window(800, 600);
        let fence = renderer.scheduler().slots()[0].fence();

        gfx.clear_events();
        gfx.push_acquire_result(GfxAcquire::Stale);
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert_eq!(outcome, FrameOutcome::SkippedStale);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginCommandBuffer { .. })), 0);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Submit { .. })), 0);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Present { .. })), 0);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::ResetFence { .. })), 0);
        assert_eq!(renderer.scheduler().lifecycle().recreate_count(), 1);
        assert_eq!(renderer.scheduler().counter().frame_id(), 0);

        // 重试同一个 slot，fence 仍然是 signaled
        gfx.clear_events();
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        assert_eq!(gfx.count(|e| *e == GfxEvent::ResetFence { fence }), 1);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_stale_and_suboptimal_present_recreate() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.opaque_only();
        let mut surface = window(800, 600);

        gfx.push_present_result(GfxPresentResult::Stale);
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(matches!(outcome, FrameOutcome::PresentedAndRecreated { .. }));

        gfx.push_present_result(GfxPresentResult::Suboptimal);
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert!(matches!(outcome, FrameOutcome::PresentedAndRecreated { .. }));

        gfx.push_acquire_result(GfxAcquire::Image {
            index: 0,
            suboptimal: true,
        });
        let outcome = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentedAndRecreated { image_index: 0 });

        assert_eq!(renderer.scheduler().lifecycle().recreate_count(), 3);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Submit { .. })), 3);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_fence_timeout_is_fatal() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let ctx = scene.opaque_only();
        let mut surface = window(800, 600);
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();

        gfx.hang_gpu();
        // slot 1 还没有被使用过
        frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        let err = frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap_err();
        assert_eq!(err.phase(), FramePhase::Recording);
        assert!(err.is_device_lost());
        assert!(err.to_string().contains("per-frame recording"));

        // 关闭时同样无法等待空闲
        let err = renderer.destroy(&mut gfx).unwrap_err();
        assert_eq!(err.phase(), FramePhase::Shutdown);
        scene.destroy(&mut gfx);
    }

    struct CountingOverlay {
        calls: Rc<Cell<u32>>,
    }

    impl OverlayPass for CountingOverlay {
        fn record(&mut self, gfx: &mut dyn GfxCommands, cmd: GfxCommandBufferHandle, _extent: vk::Extent2D) {
            gfx.cmd_begin_label(cmd, "counting-overlay", [1.0; 4]);
            gfx.cmd_end_label(cmd);
            self.calls.set(self.calls.get() + 1);
        }
    }

    #[test]
    fn test_overlay_records_after_main_pass() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig::default());
        let calls = Rc::new(Cell::new(0));
        renderer.set_overlay(Some(Box::new(CountingOverlay { calls: calls.clone() })));

        gfx.clear_events();
        frame(&mut gfx, &mut renderer, &scene, &scene.opaque_only(), &mut window(800, 600)).unwrap();
        assert_eq!(calls.get(), 1);

        let main = gfx
            .position(|e| *e == GfxEvent::BeginLabel { label: "main-pass".to_string() })
            .unwrap();
        let overlay = gfx
            .position(|e| *e == GfxEvent::BeginLabel { label: "counting-overlay".to_string() })
            .unwrap();
        let end = gfx.position(|e| matches!(e, GfxEvent::EndCommandBuffer { .. })).unwrap();
        assert!(main < overlay && overlay < end);
        // 主 pass 和 overlay 各一个 rendering scope
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginRendering { .. })), 2);

        teardown(gfx, renderer, scene);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (mut gfx, mut renderer, scene) = setup(RendererConfig {
            frame_slots: 3,
            ..Default::default()
        });
        let ctx = scene.with_glass();
        let mut surface = window(800, 600);
        for _ in 0..4 {
            frame(&mut gfx, &mut renderer, &scene, &ctx, &mut surface).unwrap();
        }
        assert!(gfx.resource_stats().total() > 0);
        assert_eq!(renderer.scheduler().slots().len(), 3);

        scene.destroy(&mut gfx);
        renderer.destroy(&mut gfx).unwrap();
        let stats = gfx.resource_stats();
        assert_eq!(stats.total(), 0, "leaked: {:?}", stats);
        assert!(gfx.count(|e| matches!(e, GfxEvent::Destroy { kind: GfxObjectKind::Swapchain })) >= 1);
    }
}

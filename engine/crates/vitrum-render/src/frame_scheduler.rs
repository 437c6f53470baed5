//! 帧调度
//!
//! 每个 frame slot 独占一个 command buffer、一对 semaphore 和一个 fence，按照
//! `Idle -> WaitingOnFence -> Recording -> Submitted -> Presenting -> Idle` 循环。
//!
//! CPU 只在两处阻塞：等待 slot 的 fence，以及 acquire 下一张 swapchain image。
//! surface 过期在这里被转换为 swapchain 重建，不会继续向上传播。

use std::fmt::Display;

use itertools::Itertools;
use vitrum_gfx::{
    GfxBackend, GfxCommandBufferHandle, GfxCommands, GfxFenceHandle, GfxSemaphoreHandle, GfxResult,
    commands::{
        barrier::{GfxBarrierMask, GfxImageBarrier},
        rendering_info::{GfxRenderingAttachment, GfxRenderingInfo},
        submit_info::GfxSubmitInfo,
    },
    swapchain::GfxAcquire,
    vk,
};

use crate::{
    config::{RendererConfig, RendererConstants},
    draw_context::{DrawContext, DrawRecorder, MeshBuffers},
    error::{FramePhase, GfxPhaseExt, RenderError, RenderResult},
    frame_counter::{FrameCounter, FrameLabel},
    global_uniforms::{GlobalBindings, GlobalUniforms},
    material::material_system::MaterialSystem,
    swapchain_lifecycle::{SurfaceExtentSource, SwapchainLifecycle, SwapchainResources},
    transmission::compositor::{TransmissionCompositor, TransmissionInputs},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitingOnFence,
    Recording,
    Submitted,
    Presenting,
}

impl Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingOnFence => "waiting-on-fence",
            Self::Recording => "recording",
            Self::Submitted => "submitted",
            Self::Presenting => "presenting",
        };
        write!(f, "{}", name)
    }
}

impl FrameState {
    /// acquire 到过期的 surface 时从 `WaitingOnFence` 直接回到 `Idle`
    #[inline]
    fn can_transfer_to(self, next: FrameState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::WaitingOnFence)
                | (Self::WaitingOnFence, Self::Recording)
                | (Self::WaitingOnFence, Self::Idle)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Presenting)
                | (Self::Presenting, Self::Idle)
        )
    }
}

/// 一个 frame slot 的同步对象和命令缓冲
pub struct FrameSlot {
    cmd: GfxCommandBufferHandle,
    image_acquired: GfxSemaphoreHandle,
    render_finished: GfxSemaphoreHandle,
    /// 创建时就是 signaled，第一次等待不会阻塞
    fence: GfxFenceHandle,
    state: FrameState,
}

// getters
impl FrameSlot {
    #[inline]
    pub fn cmd(&self) -> GfxCommandBufferHandle {
        self.cmd
    }
    #[inline]
    pub fn image_acquired(&self) -> GfxSemaphoreHandle {
        self.image_acquired
    }
    #[inline]
    pub fn render_finished(&self) -> GfxSemaphoreHandle {
        self.render_finished
    }
    #[inline]
    pub fn fence(&self) -> GfxFenceHandle {
        self.fence
    }
    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }
}

/// 在主 pass 之后录制的额外 pass，例如调试 UI
///
/// 录制时 swapchain image 处于 `COLOR_ATTACHMENT_OPTIMAL`，内容需要保留
pub trait OverlayPass {
    fn record(&mut self, gfx: &mut dyn GfxCommands, cmd: GfxCommandBufferHandle, extent: vk::Extent2D);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// 本帧已经呈现，随后重建了 swapchain
    PresentedAndRecreated { image_index: u32 },
    /// acquire 时 surface 已经过期，本帧被放弃，swapchain 已经重建
    SkippedStale,
}

/// 帧调度需要借用的渲染资源
pub struct FrameResources<'a> {
    pub materials: &'a mut MaterialSystem,
    pub globals: &'a GlobalBindings,
    pub compositor: &'a mut TransmissionCompositor,
}

/// 场景每帧提供的输入
pub struct FrameInputs<'a> {
    pub draw_ctx: &'a DrawContext,
    pub mesh: MeshBuffers,
    pub uniforms: GlobalUniforms,
}

/// 本帧录制的目标
#[derive(Debug, Clone, Copy)]
struct FrameTarget {
    cmd: GfxCommandBufferHandle,
    slot: usize,
    frame_id: u64,
    image_index: u32,
}

pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    counter: FrameCounter,
    lifecycle: SwapchainLifecycle,
    overlay: Option<Box<dyn OverlayPass>>,

    /// 窗口尺寸变化，在下一次 present 之后重建
    resize_requested: bool,
    clear_color: [f32; 4],
}

// new & init
impl FrameScheduler {
    pub fn new(gfx: &mut impl GfxBackend, config: &RendererConfig, lifecycle: SwapchainLifecycle) -> GfxResult<Self> {
        let counter = FrameCounter::new(0, config.frame_slots);
        let mut slots = Vec::with_capacity(config.frame_slots);
        for idx in 0..config.frame_slots {
            match Self::create_slot(gfx, FrameLabel::from_usize(idx)) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        Self::destroy_slot(gfx, slot);
                    }
                    lifecycle.destroy(gfx);
                    return Err(e);
                }
            }
        }

        Ok(Self {
            slots,
            counter,
            lifecycle,
            overlay: None,
            resize_requested: false,
            clear_color: config.clear_color,
        })
    }

    fn create_slot(gfx: &mut impl GfxBackend, label: FrameLabel) -> GfxResult<FrameSlot> {
        let cmd = gfx.allocate_command_buffer(&format!("frame-{}", label))?;
        let image_acquired = gfx.create_semaphore(&format!("image-acquired-{}", label))?;
        let render_finished = gfx.create_semaphore(&format!("render-finished-{}", label))?;
        let fence = gfx.create_fence(true, &format!("frame-in-flight-{}", label))?;
        Ok(FrameSlot {
            cmd,
            image_acquired,
            render_finished,
            fence,
            state: FrameState::Idle,
        })
    }
}

// update
impl FrameScheduler {
    fn transfer(&mut self, slot: usize, next: FrameState) {
        let current = self.slots[slot].state;
        debug_assert!(
            current.can_transfer_to(next),
            "invalid frame state transition: {} -> {}",
            current,
            next
        );
        log::trace!("{} {} -> {}", self.counter.frame_name(), current, next);
        self.slots[slot].state = next;
    }

    /// 标记窗口尺寸变化，当前帧 present 之后重建
    #[inline]
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    #[inline]
    pub fn set_overlay(&mut self, overlay: Option<Box<dyn OverlayPass>>) {
        self.overlay = overlay;
    }

    /// 依次重建 swapchain、依赖格式和采样数的管线、透射 target
    pub fn recreate(
        &mut self,
        gfx: &mut impl GfxBackend,
        res: &mut FrameResources,
        surface: &mut dyn SurfaceExtentSource,
    ) -> RenderResult<()> {
        let _span = crate::profile_span!("FrameScheduler::recreate");
        self.resize_requested = false;
        self.lifecycle.recreate(gfx, surface).phase(FramePhase::Presentation)?;

        let resources = self.lifecycle.resources().ok_or(RenderError::SurfaceLost)?;
        let (extent, format, samples) = (resources.extent(), resources.format().format, resources.samples());
        res.materials.rebuild_pipelines(gfx, format, samples).phase(FramePhase::Presentation)?;
        res.compositor.resize(gfx, extent, format, samples).phase(FramePhase::Presentation)?;
        Ok(())
    }

    /// 一次完整的帧循环
    pub fn render_frame(
        &mut self,
        gfx: &mut impl GfxBackend,
        res: &mut FrameResources,
        inputs: &FrameInputs,
        surface: &mut dyn SurfaceExtentSource,
    ) -> RenderResult<FrameOutcome> {
        let _span = crate::profile_span!("FrameScheduler::render_frame");
        let slot_idx = self.counter.slot_index();
        let frame_name = self.counter.frame_name();

        // 1. 等待这个 slot 上一次的提交完成，之后它的 command buffer 和各个 buffer 区域都可以复用
        self.transfer(slot_idx, FrameState::WaitingOnFence);
        {
            let _span = crate::profile_span!("wait_fence");
            gfx.wait_fence(self.slots[slot_idx].fence, RendererConstants::FENCE_TIMEOUT_NS)
                .phase(FramePhase::Recording)?;
        }
        res.compositor.collect_stats(gfx, slot_idx).phase(FramePhase::Recording)?;
        res.materials.flush_slot(gfx, slot_idx).phase(FramePhase::Recording)?;
        res.globals.update(gfx, slot_idx, &inputs.uniforms).phase(FramePhase::Recording)?;

        // 2. acquire
        let swapchain = self.lifecycle.resources().ok_or(RenderError::SurfaceLost)?.handle();
        let acquire = {
            let _span = crate::profile_span!("acquire_next_image");
            gfx.acquire_next_image(swapchain, self.slots[slot_idx].image_acquired, RendererConstants::ACQUIRE_TIMEOUT_NS)
                .phase(FramePhase::Presentation)?
        };
        let (image_index, acquire_suboptimal) = match acquire {
            GfxAcquire::Image { index, suboptimal } => (index, suboptimal),
            GfxAcquire::Stale => {
                // fence 没有 reset，下一次等待它仍然是 signaled
                log::debug!("{} surface is stale on acquire, frame skipped", frame_name);
                self.transfer(slot_idx, FrameState::Idle);
                self.recreate(gfx, res, surface)?;
                return Ok(FrameOutcome::SkippedStale);
            }
        };

        // 3. 录制
        self.transfer(slot_idx, FrameState::Recording);
        gfx.reset_fence(self.slots[slot_idx].fence).phase(FramePhase::Recording)?;
        let cmd = self.slots[slot_idx].cmd;
        {
            let _span = crate::profile_span!("record");
            gfx.begin_command_buffer(cmd, &frame_name).phase(FramePhase::Recording)?;
            let sc = self.lifecycle.resources().ok_or(RenderError::SurfaceLost)?;
            let target = FrameTarget {
                cmd,
                slot: slot_idx,
                frame_id: self.counter.frame_id(),
                image_index,
            };
            Self::record_frame(gfx, &target, sc, res, inputs, self.clear_color);
            if let Some(overlay) = self.overlay.as_mut() {
                Self::record_overlay(gfx, overlay.as_mut(), cmd, sc, image_index);
            }
            Self::transition_to_present(gfx, cmd, sc, image_index);
            gfx.end_command_buffer(cmd).phase(FramePhase::Recording)?;
        }

        // 4. 提交
        let slot = &self.slots[slot_idx];
        let submit_info = GfxSubmitInfo::new(&[cmd])
            .wait(slot.image_acquired, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .signal(slot.render_finished, vk::PipelineStageFlags2::ALL_COMMANDS);
        let (fence, render_finished) = (slot.fence, slot.render_finished);
        {
            let _span = crate::profile_span!("submit");
            gfx.submit(&submit_info, Some(fence)).phase(FramePhase::Submission)?;
        }
        self.transfer(slot_idx, FrameState::Submitted);

        // 5. present
        self.transfer(slot_idx, FrameState::Presenting);
        let present = {
            let _span = crate::profile_span!("present");
            gfx.present(swapchain, image_index, &[render_finished])
                .phase(FramePhase::Presentation)?
        };

        self.transfer(slot_idx, FrameState::Idle);
        self.counter.next_frame();

        // 6. 本帧已经安全提交，此时才重建
        if acquire_suboptimal || present.needs_recreate() || self.resize_requested {
            log::debug!(
                "{} recreate after present: suboptimal acquire {}, present {:?}, resize requested {}",
                frame_name,
                acquire_suboptimal,
                present,
                self.resize_requested
            );
            self.recreate(gfx, res, surface)?;
            return Ok(FrameOutcome::PresentedAndRecreated { image_index });
        }
        Ok(FrameOutcome::Presented { image_index })
    }
}

// record
impl FrameScheduler {
    fn record_frame(
        gfx: &mut impl GfxBackend,
        target: &FrameTarget,
        sc: &SwapchainResources,
        res: &mut FrameResources,
        inputs: &FrameInputs,
        clear_color: [f32; 4],
    ) {
        let FrameTarget {
            cmd,
            slot,
            frame_id,
            image_index,
        } = *target;
        let global_set = res.globals.set(slot);
        let draw_ctx = inputs.draw_ctx;

        // 透射在主 pass 之外录制，结果在主 pass 中以全屏 draw 写回
        let with_transmission = draw_ctx.has_transmissive();
        if with_transmission {
            res.compositor.record(
                gfx,
                &TransmissionInputs {
                    cmd,
                    slot,
                    frame_id,
                    global_set,
                    mesh: inputs.mesh,
                    draw_ctx,
                    materials: &*res.materials,
                    clear_color,
                },
            );
        }

        let extent = sc.extent();
        let mut barriers = vec![
            GfxImageBarrier::new()
                .image(sc.image(image_index))
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::NONE)
                .dst(GfxBarrierMask::COLOR_ATTACHMENT_WRITE),
            GfxImageBarrier::new()
                .image(sc.depth().image)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .src(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                .dst(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                .image_aspect_flag(vk::ImageAspectFlags::DEPTH),
        ];
        if let Some(msaa_color) = sc.msaa_color() {
            barriers.push(
                GfxImageBarrier::new()
                    .image(msaa_color.image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::COLOR_ATTACHMENT_WRITE)
                    .dst(GfxBarrierMask::COLOR_ATTACHMENT_WRITE),
            );
        }
        gfx.cmd_image_barriers(cmd, &barriers);

        let color = match sc.msaa_color() {
            Some(msaa_color) => {
                GfxRenderingAttachment::color_clear(msaa_color.view, clear_color).resolve_to(sc.view(image_index))
            }
            None => GfxRenderingAttachment::color_clear(sc.view(image_index), clear_color),
        };
        gfx.cmd_begin_label(cmd, "main-pass", [0.9, 0.6, 0.2, 1.0]);
        gfx.cmd_begin_rendering(
            cmd,
            &GfxRenderingInfo::new(extent)
                .color(color)
                .depth(GfxRenderingAttachment::depth_clear(sc.depth().view, 1.0)),
        );

        let mut recorder = DrawRecorder::new(cmd, slot, global_set, inputs.mesh);
        if with_transmission {
            res.compositor.resolve_into_main_pass(gfx, cmd, slot);
            recorder.invalidate_pipeline();
        } else {
            recorder.draw_bucket(gfx, &draw_ctx.opaque, res.materials);
        }
        recorder.draw_bucket(gfx, &draw_ctx.transparent, res.materials);

        gfx.cmd_end_rendering(cmd);
        gfx.cmd_end_label(cmd);
    }

    fn record_overlay(
        gfx: &mut impl GfxBackend,
        overlay: &mut dyn OverlayPass,
        cmd: GfxCommandBufferHandle,
        sc: &SwapchainResources,
        image_index: u32,
    ) {
        gfx.cmd_begin_label(cmd, "overlay", [0.5, 0.9, 0.5, 1.0]);
        gfx.cmd_begin_rendering(
            cmd,
            &GfxRenderingInfo::new(sc.extent()).color(GfxRenderingAttachment::color_load(sc.view(image_index))),
        );
        overlay.record(gfx, cmd, sc.extent());
        gfx.cmd_end_rendering(cmd);
        gfx.cmd_end_label(cmd);
    }

    fn transition_to_present(
        gfx: &mut impl GfxBackend,
        cmd: GfxCommandBufferHandle,
        sc: &SwapchainResources,
        image_index: u32,
    ) {
        gfx.cmd_image_barriers(
            cmd,
            &[GfxImageBarrier::new()
                .image(sc.image(image_index))
                .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR)
                .src(GfxBarrierMask::COLOR_ATTACHMENT_WRITE)
                .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE)],
        );
    }
}

// getters
impl FrameScheduler {
    #[inline]
    pub fn counter(&self) -> &FrameCounter {
        &self.counter
    }
    #[inline]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }
    #[inline]
    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }
    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }
    pub fn fences(&self) -> Vec<GfxFenceHandle> {
        self.slots.iter().map(|s| s.fence).collect_vec()
    }
}

// destroy
impl FrameScheduler {
    fn destroy_slot(gfx: &mut impl GfxBackend, slot: FrameSlot) {
        gfx.free_command_buffer(slot.cmd);
        gfx.destroy_semaphore(slot.image_acquired);
        gfx.destroy_semaphore(slot.render_finished);
        gfx.destroy_fence(slot.fence);
    }

    /// 调用前 GPU 必须已经空闲
    pub fn destroy(self, gfx: &mut impl GfxBackend) {
        for slot in self.slots {
            Self::destroy_slot(gfx, slot);
        }
        self.lifecycle.destroy(gfx);
    }
}

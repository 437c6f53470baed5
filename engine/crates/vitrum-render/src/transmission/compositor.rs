use std::path::{Path, PathBuf};

use itertools::Itertools;
use vitrum_gfx::{
    GfxBackend, GfxBufferHandle, GfxCommandBufferHandle, GfxCommands, GfxDescriptorSetHandle, GfxPipelineHandle,
    GfxPipelineLayoutHandle, GfxPipelines, GfxQueries, GfxQueryPoolHandle, GfxResult, GfxSamplerHandle,
    commands::{
        barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier},
        rendering_info::{GfxRenderingAttachment, GfxRenderingInfo},
    },
    pipelines::graphics_pipeline::GfxGraphicsPipelineDesc,
    query::GfxQueryResult,
    resources::{
        buffer::{GfxBufferDesc, GfxMemoryLocation},
        sampler::GfxSamplerDesc,
    },
    vk,
};

use crate::{
    config::{RendererConfig, RendererConstants},
    descriptor_binding::{DescriptorBindingManager, SampledImage},
    draw_context::{DrawContext, DrawRecorder, MeshBuffers},
    frame_counter::FrameLabel,
    material::{
        category::MaterialCategory,
        material_system::{MaterialSystem, MeshShaderPaths},
    },
    transmission::layer_set::TransmissionTargets,
    vertex::DrawPushConstants,
};

/// 一层 peel 的 occlusion query 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerVisibility {
    Visible(u64),
    Empty,
    /// 结果尚未就绪，按照可见处理
    NotReady,
}

impl From<GfxQueryResult> for LayerVisibility {
    #[inline]
    fn from(result: GfxQueryResult) -> Self {
        match result {
            GfxQueryResult::Ready(0) => Self::Empty,
            GfxQueryResult::Ready(samples) => Self::Visible(samples),
            GfxQueryResult::NotReady => Self::NotReady,
        }
    }
}

impl LayerVisibility {
    #[inline]
    pub fn is_visible(self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// 某个 slot 最近一次透射合成的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmissionStats {
    pub frame_id: u64,
    pub layers: Vec<LayerVisibility>,
}

impl TransmissionStats {
    pub fn visible_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.is_visible()).count()
    }

    /// 第一个没有任何 sample 通过的层
    pub fn first_empty_layer(&self) -> Option<usize> {
        self.layers.iter().position(|l| !l.is_visible())
    }
}

#[derive(Debug, Clone)]
pub struct TransmissionShaderPaths {
    pub mesh_vertex: PathBuf,
    pub opaque_fragment: PathBuf,
    pub peel_fragment: PathBuf,
    pub fullscreen_vertex: PathBuf,
    pub depth_forward_fragment: PathBuf,
    pub composite_fragment: PathBuf,
    pub resolve_fragment: PathBuf,
}

impl TransmissionShaderPaths {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            mesh_vertex: config.shader_path("mesh.vert"),
            opaque_fragment: config.shader_path("pbr.frag"),
            peel_fragment: config.shader_path("peel.frag"),
            fullscreen_vertex: config.shader_path("fullscreen.vert"),
            depth_forward_fragment: config.shader_path("depth_forward.frag"),
            composite_fragment: config.shader_path("composite.frag"),
            resolve_fragment: config.shader_path("resolve.frag"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TransmissionPipelines {
    /// 离屏 opaque，单采样 RGBA16F
    opaque: GfxPipelineHandle,
    peel: GfxPipelineHandle,
    /// 全屏 pass，把 peel depth 写入 prev depth
    depth_forward: GfxPipelineHandle,
    composite: GfxPipelineHandle,
    /// 全屏 pass，把合成结果写回主 pass
    resolve: GfxPipelineHandle,
}

/// 一个 frame slot 独占的资源
struct TransmissionSlot {
    targets: TransmissionTargets,
    query_pool: GfxQueryPoolHandle,
    /// query 被写入之后才能读取
    queries_written: bool,
    recorded_frame: u64,

    peel_sets: Vec<GfxDescriptorSetHandle>,
    depth_forward_sets: Vec<GfxDescriptorSetHandle>,
    composite_sets: Vec<GfxDescriptorSetHandle>,
    resolve_set: GfxDescriptorSetHandle,
}

/// 录制透射合成需要的每帧输入
pub struct TransmissionInputs<'a> {
    pub cmd: GfxCommandBufferHandle,
    pub slot: usize,
    pub frame_id: u64,
    pub global_set: GfxDescriptorSetHandle,
    pub mesh: MeshBuffers,
    pub draw_ctx: &'a DrawContext,
    pub materials: &'a MaterialSystem,
    pub clear_color: [f32; 4],
}

pub struct TransmissionCompositor {
    layer_count: u32,
    slots: Vec<TransmissionSlot>,

    /// 每个 slot 每层一个 u32，由 GPU 写入 occlusion query 的结果，作为 conditional rendering 的谓词
    ///
    /// 设备不支持 conditional rendering 时为 None
    predicate_buffer: Option<GfxBufferHandle>,

    linear_sampler: GfxSamplerHandle,
    nearest_sampler: GfxSamplerHandle,

    /// set 0: global, set 1: material, set 2: pass input
    peel_layout: GfxPipelineLayoutHandle,
    /// set 0: pass input
    fullscreen_layout: GfxPipelineLayoutHandle,
    pipelines: TransmissionPipelines,
    output_format: vk::Format,
    output_samples: vk::SampleCountFlags,
    shader_paths: TransmissionShaderPaths,

    last_stats: TransmissionStats,
    invocations: u64,
}

// new & init
impl TransmissionCompositor {
    /// `output_format` 和 `output_samples` 是主 pass 的 color attachment
    pub fn new(
        gfx: &mut impl GfxBackend,
        config: &RendererConfig,
        descriptors: &DescriptorBindingManager,
        materials: &MaterialSystem,
        extent: vk::Extent2D,
        output_format: vk::Format,
        output_samples: vk::SampleCountFlags,
    ) -> GfxResult<Self> {
        let _span = crate::profile_span!("TransmissionCompositor::new");
        let layer_count = config.peel_layers;
        let shader_paths = TransmissionShaderPaths::new(config);

        let linear_sampler = gfx.create_sampler(&GfxSamplerDesc::linear_clamp(), "transmission-linear")?;
        let nearest_sampler = gfx.create_sampler(&GfxSamplerDesc::nearest_clamp(), "transmission-nearest")?;

        let peel_layout = gfx.create_pipeline_layout(
            &[descriptors.global_layout(), descriptors.material_layout(), descriptors.pass_input_layout()],
            &[DrawPushConstants::range()],
            "transmission-peel",
        )?;
        let fullscreen_layout =
            gfx.create_pipeline_layout(&[descriptors.pass_input_layout()], &[], "transmission-fullscreen")?;
        let (_, material_layout) = materials.get_pipeline(MaterialCategory::Opaque);

        let pipelines = Self::create_pipelines(
            gfx,
            &shader_paths,
            [material_layout, peel_layout, fullscreen_layout],
            output_format,
            output_samples,
        )?;

        let predicate_buffer = if gfx.limits().conditional_rendering {
            let size = (config.frame_slots * layer_count as usize * size_of::<u32>()) as vk::DeviceSize;
            Some(gfx.create_buffer(
                &GfxBufferDesc::new(
                    size,
                    vk::BufferUsageFlags::CONDITIONAL_RENDERING_EXT | vk::BufferUsageFlags::TRANSFER_DST,
                    GfxMemoryLocation::DeviceLocal,
                ),
                "transmission-predicate",
            )?)
        } else {
            log::info!("conditional rendering is not supported, peel depth copy-forward always runs");
            None
        };

        let mut slots = Vec::with_capacity(config.frame_slots);
        for slot in 0..config.frame_slots {
            let label = FrameLabel::from_usize(slot);
            let targets = TransmissionTargets::new(gfx, extent, layer_count, &format!("transmission-{}", label))?;
            let query_pool = gfx.create_query_pool(
                vk::QueryType::OCCLUSION,
                layer_count,
                &format!("transmission-{}", label),
            )?;

            let n = layer_count as usize;
            let sets = descriptors.allocate_sets(
                gfx,
                descriptors.pass_input_layout(),
                3 * n + 1,
                &format!("transmission-{}", label),
            )?;
            let slot = TransmissionSlot {
                targets,
                query_pool,
                queries_written: false,
                recorded_frame: 0,
                peel_sets: sets[..n].to_vec(),
                depth_forward_sets: sets[n..2 * n].to_vec(),
                composite_sets: sets[2 * n..3 * n].to_vec(),
                resolve_set: sets[3 * n],
            };
            Self::write_slot_inputs(gfx, &slot, linear_sampler, nearest_sampler);
            slots.push(slot);
        }

        log::info!(
            "transmission compositor: {} peel layers, {}x{}, {} slots",
            layer_count,
            extent.width,
            extent.height,
            slots.len()
        );

        Ok(Self {
            layer_count,
            slots,
            predicate_buffer,
            linear_sampler,
            nearest_sampler,
            peel_layout,
            fullscreen_layout,
            pipelines,
            output_format,
            output_samples,
            shader_paths,
            last_stats: TransmissionStats::default(),
            invocations: 0,
        })
    }

    fn fullscreen_pipeline_desc(
        shaders: &TransmissionShaderPaths,
        fragment: &Path,
        color_formats: Vec<vk::Format>,
        depth_format: Option<vk::Format>,
        samples: vk::SampleCountFlags,
    ) -> GfxGraphicsPipelineDesc {
        let mut desc = GfxGraphicsPipelineDesc::default();
        desc.attach_info(color_formats, depth_format)
            .vertex_shader_stage(&shaders.fullscreen_vertex, c"main")
            .fragment_shader_stage(fragment, c"main")
            .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
            .msaa(samples);
        desc
    }

    fn resolve_pipeline_desc(
        shaders: &TransmissionShaderPaths,
        output_format: vk::Format,
        output_samples: vk::SampleCountFlags,
    ) -> GfxGraphicsPipelineDesc {
        let mut desc = Self::fullscreen_pipeline_desc(
            shaders,
            &shaders.resolve_fragment,
            vec![output_format],
            Some(RendererConstants::DEPTH_FORMAT),
            output_samples,
        );
        // 同时写回 opaque 的深度，之后的 transparent 仍然可以和 opaque 做深度测试
        desc.depth_test(Some(vk::CompareOp::ALWAYS), true)
            .color_blend(vec![GfxGraphicsPipelineDesc::opaque_blend()]);
        desc
    }

    /// layouts: material, peel, fullscreen
    fn create_pipelines(
        gfx: &mut impl GfxPipelines,
        shaders: &TransmissionShaderPaths,
        [material_layout, peel_layout, fullscreen_layout]: [GfxPipelineLayoutHandle; 3],
        output_format: vk::Format,
        output_samples: vk::SampleCountFlags,
    ) -> GfxResult<TransmissionPipelines> {
        let offscreen = RendererConstants::OFFSCREEN_COLOR_FORMAT;
        let single = vk::SampleCountFlags::TYPE_1;

        let opaque = MaterialSystem::mesh_pipeline_desc(
            &MeshShaderPaths {
                vertex: shaders.mesh_vertex.clone(),
                fragment: shaders.opaque_fragment.clone(),
            },
            MaterialCategory::Opaque,
            offscreen,
            single,
        );

        // 每层只保留最近的表面，因此需要写入深度并直接覆盖颜色
        let mut peel = MaterialSystem::mesh_pipeline_desc(
            &MeshShaderPaths {
                vertex: shaders.mesh_vertex.clone(),
                fragment: shaders.peel_fragment.clone(),
            },
            MaterialCategory::Transmissive,
            offscreen,
            single,
        );
        peel.depth_test(Some(vk::CompareOp::LESS), true)
            .color_blend(vec![GfxGraphicsPipelineDesc::opaque_blend()]);

        let mut depth_forward = Self::fullscreen_pipeline_desc(
            shaders,
            &shaders.depth_forward_fragment,
            vec![],
            Some(RendererConstants::DEPTH_FORMAT),
            single,
        );
        depth_forward.depth_test(Some(vk::CompareOp::ALWAYS), true);

        let mut composite =
            Self::fullscreen_pipeline_desc(shaders, &shaders.composite_fragment, vec![offscreen], None, single);
        composite
            .depth_test(None, false)
            .color_blend(vec![GfxGraphicsPipelineDesc::alpha_blend()]);

        let resolve = Self::resolve_pipeline_desc(shaders, output_format, output_samples);

        let descs = [
            (opaque, material_layout, "transmission-opaque"),
            (peel, peel_layout, "transmission-peel"),
            (depth_forward, fullscreen_layout, "transmission-depth-forward"),
            (composite, fullscreen_layout, "transmission-composite"),
            (resolve, fullscreen_layout, "transmission-resolve"),
        ];
        let mut created = Vec::with_capacity(descs.len());
        for (desc, layout, name) in &descs {
            match gfx.create_graphics_pipeline(desc, *layout, name) {
                Ok(pipeline) => created.push(pipeline),
                Err(e) => {
                    for pipeline in created {
                        gfx.destroy_pipeline(pipeline);
                    }
                    return Err(e);
                }
            }
        }

        Ok(TransmissionPipelines {
            opaque: created[0],
            peel: created[1],
            depth_forward: created[2],
            composite: created[3],
            resolve: created[4],
        })
    }

    /// set 的 layout 不变，只重新写入指向的 image view
    fn write_slot_inputs(
        gfx: &mut impl GfxBackend,
        slot: &TransmissionSlot,
        linear_sampler: GfxSamplerHandle,
        nearest_sampler: GfxSamplerHandle,
    ) {
        let targets = &slot.targets;
        let linear = |view| SampledImage {
            view,
            sampler: linear_sampler,
        };
        let nearest = |view| SampledImage {
            view,
            sampler: nearest_sampler,
        };

        for layer in 0..targets.layer_count() {
            // 第 0 层从 opaque 折射，之后的层从上一层折射
            let refraction_source = if layer == 0 {
                targets.opaque_color().view
            } else {
                targets.peel_color(layer - 1).view
            };
            DescriptorBindingManager::write_pass_inputs(
                gfx,
                slot.peel_sets[layer],
                [nearest(targets.prev_depth().view), linear(refraction_source)],
            );

            let peel_depth = targets.peel_depth(layer).view;
            DescriptorBindingManager::write_pass_inputs(
                gfx,
                slot.depth_forward_sets[layer],
                [nearest(peel_depth), nearest(peel_depth)],
            );
            DescriptorBindingManager::write_pass_inputs(
                gfx,
                slot.composite_sets[layer],
                [linear(targets.peel_color(layer).view), nearest(peel_depth)],
            );
        }
        DescriptorBindingManager::write_pass_inputs(
            gfx,
            slot.resolve_set,
            [linear(targets.composite().view), nearest(targets.opaque_depth().view)],
        );
    }
}

// record
impl TransmissionCompositor {
    #[inline]
    fn predicate_offset(&self, slot: usize, layer: u32) -> vk::DeviceSize {
        ((slot * self.layer_count as usize + layer as usize) * size_of::<u32>()) as vk::DeviceSize
    }

    /// 在主 pass 之外录制全部离屏 pass，结束时 composite 处于 `SHADER_READ_ONLY_OPTIMAL`
    pub fn record(&mut self, gfx: &mut impl GfxCommands, inputs: &TransmissionInputs) {
        let _span = crate::profile_span!("TransmissionCompositor::record");
        let cmd = inputs.cmd;
        let pipelines = self.pipelines;
        let layer_count = self.layer_count;
        let peel_layout = self.peel_layout;
        let fullscreen_layout = self.fullscreen_layout;
        let predicate_offsets = (0..layer_count).map(|layer| self.predicate_offset(inputs.slot, layer)).collect_vec();
        let predicate_buffer = self.predicate_buffer;

        self.invocations += 1;
        let slot = &mut self.slots[inputs.slot];
        slot.queries_written = true;
        slot.recorded_frame = inputs.frame_id;
        let targets = &slot.targets;
        let extent = targets.extent();
        let depth_aspect = vk::ImageAspectFlags::DEPTH;

        gfx.cmd_begin_label(cmd, "transmission", [0.2, 0.6, 0.9, 1.0]);

        // 1. opaque 画到离屏 target
        let has_mip_tail = targets.mip_levels() > 1;
        let opaque_barriers = [
            Some(
                GfxImageBarrier::new()
                    .image(targets.opaque_color().image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::COLOR_ATTACHMENT_WRITE),
            ),
            // 1x1 的 target 只有 mip 0
            has_mip_tail.then(|| {
                GfxImageBarrier::new()
                    .image(targets.opaque_color().image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::TRANSFER_WRITE)
                    .mip_range(1, vk::REMAINING_MIP_LEVELS)
            }),
            Some(
                GfxImageBarrier::new()
                    .image(targets.opaque_depth().image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                    .image_aspect_flag(depth_aspect),
            ),
        ]
        .into_iter()
        .flatten()
        .collect_vec();
        gfx.cmd_image_barriers(cmd, &opaque_barriers);
        gfx.cmd_begin_rendering(
            cmd,
            &GfxRenderingInfo::new(extent)
                .color(GfxRenderingAttachment::color_clear(targets.opaque_color_attachment(), inputs.clear_color))
                .depth(GfxRenderingAttachment::depth_clear(targets.opaque_depth().view, 1.0)),
        );
        let (_, material_layout) = inputs.materials.get_pipeline(MaterialCategory::Opaque);
        DrawRecorder::new(cmd, inputs.slot, inputs.global_set, inputs.mesh).draw_with_pipeline(
            gfx,
            &inputs.draw_ctx.opaque,
            inputs.materials,
            pipelines.opaque,
            material_layout,
            &[],
        );
        gfx.cmd_end_rendering(cmd);

        // 2. 生成 mip 作为折射源，同时拷贝一份到 composite 作为合成的底色
        gfx.cmd_image_barriers(
            cmd,
            &[
                GfxImageBarrier::new()
                    .image(targets.opaque_color().image)
                    .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src(GfxBarrierMask::COLOR_ATTACHMENT_WRITE)
                    .dst(GfxBarrierMask::TRANSFER_READ),
                GfxImageBarrier::new()
                    .image(targets.composite().image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::TRANSFER_WRITE),
            ],
        );
        if has_mip_tail {
            gfx.cmd_generate_mipmaps(cmd, targets.opaque_color().image, extent, targets.mip_levels());
        }
        gfx.cmd_blit_image(cmd, targets.opaque_color().image, extent, targets.composite().image, extent);
        gfx.cmd_image_barriers(
            cmd,
            &[
                GfxImageBarrier::new()
                    .image(targets.opaque_color().image)
                    .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src(GfxBarrierMask::TRANSFER_READ)
                    .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .mip_range(0, vk::REMAINING_MIP_LEVELS),
                GfxImageBarrier::new()
                    .image(targets.composite().image)
                    .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::TRANSFER_WRITE)
                    .dst(GfxBarrierMask::COLOR_ATTACHMENT_WRITE),
                GfxImageBarrier::new()
                    .image(targets.opaque_depth().image)
                    .layout_transfer(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                    .dst(GfxBarrierMask::TRANSFER_READ)
                    .image_aspect_flag(depth_aspect),
                GfxImageBarrier::new()
                    .image(targets.prev_depth().image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                    .image_aspect_flag(depth_aspect),
            ],
        );

        // 3. prev depth 清除为 0，第 0 层保留所有表面
        gfx.cmd_begin_rendering(
            cmd,
            &GfxRenderingInfo::new(extent).depth(GfxRenderingAttachment::depth_clear(targets.prev_depth().view, 0.0)),
        );
        gfx.cmd_end_rendering(cmd);
        gfx.cmd_image_barriers(
            cmd,
            &[GfxImageBarrier::new()
                .image(targets.prev_depth().image)
                .layout_transfer(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                .image_aspect_flag(depth_aspect)],
        );

        gfx.cmd_reset_query_pool(cmd, slot.query_pool, 0, layer_count);

        // 4. 逐层剥离
        let mut recorder = DrawRecorder::new(cmd, inputs.slot, inputs.global_set, inputs.mesh);
        for layer in 0..layer_count {
            let idx = layer as usize;
            let peel_depth = targets.peel_depth(idx);
            let peel_color = targets.peel_color(idx);

            // peel depth 以 opaque 的深度为起点，被 opaque 遮挡的透射表面不会被剥离
            gfx.cmd_image_barriers(
                cmd,
                &[GfxImageBarrier::new()
                    .image(peel_depth.image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::TRANSFER_WRITE)
                    .image_aspect_flag(depth_aspect)],
            );
            gfx.cmd_copy_image(cmd, targets.opaque_depth().image, peel_depth.image, depth_aspect, extent);
            gfx.cmd_image_barriers(
                cmd,
                &[
                    GfxImageBarrier::new()
                        .image(peel_depth.image)
                        .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                        .src(GfxBarrierMask::TRANSFER_WRITE)
                        .dst(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                        .image_aspect_flag(depth_aspect),
                    GfxImageBarrier::new()
                        .image(peel_color.image)
                        .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                        .dst(GfxBarrierMask::COLOR_ATTACHMENT_WRITE),
                ],
            );

            gfx.cmd_begin_rendering(
                cmd,
                &GfxRenderingInfo::new(extent)
                    .color(GfxRenderingAttachment::color_clear(peel_color.view, [0.0; 4]))
                    .depth(GfxRenderingAttachment::depth_load(peel_depth.view)),
            );
            gfx.cmd_begin_query(cmd, slot.query_pool, layer);
            recorder.draw_with_pipeline(
                gfx,
                &inputs.draw_ctx.transmissive,
                inputs.materials,
                pipelines.peel,
                peel_layout,
                &[slot.peel_sets[idx]],
            );
            gfx.cmd_end_query(cmd, slot.query_pool, layer);
            gfx.cmd_end_rendering(cmd);

            gfx.cmd_image_barriers(
                cmd,
                &[
                    GfxImageBarrier::new()
                        .image(peel_color.image)
                        .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src(GfxBarrierMask::COLOR_ATTACHMENT_WRITE)
                        .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ),
                    GfxImageBarrier::new()
                        .image(peel_depth.image)
                        .layout_transfer(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                        .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                        .image_aspect_flag(depth_aspect),
                ],
            );

            // 最后一层之后不需要再前移深度
            if layer + 1 == layer_count {
                continue;
            }

            let predicate_offset = predicate_offsets[idx];
            if let Some(predicate) = predicate_buffer {
                gfx.cmd_copy_query_results(cmd, slot.query_pool, layer, 1, predicate, predicate_offset);
                gfx.cmd_buffer_barriers(
                    cmd,
                    &[GfxBufferBarrier::new(predicate, predicate_offset, size_of::<u32>() as vk::DeviceSize)
                        .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                        .dst_mask(
                            vk::PipelineStageFlags2::CONDITIONAL_RENDERING_EXT,
                            vk::AccessFlags2::CONDITIONAL_RENDERING_READ_EXT,
                        )],
                );
            }

            // 没有任何 sample 通过时，GPU 跳过这次深度前移
            gfx.cmd_image_barriers(
                cmd,
                &[GfxImageBarrier::new()
                    .image(targets.prev_depth().image)
                    .layout_transfer(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .src(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .dst(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                    .image_aspect_flag(depth_aspect)],
            );
            if let Some(predicate) = predicate_buffer {
                gfx.cmd_begin_conditional_rendering(cmd, predicate, predicate_offset);
            }
            gfx.cmd_begin_rendering(
                cmd,
                &GfxRenderingInfo::new(extent).depth(GfxRenderingAttachment::depth_load(targets.prev_depth().view)),
            );
            gfx.cmd_bind_pipeline(cmd, pipelines.depth_forward);
            gfx.cmd_bind_descriptor_sets(cmd, fullscreen_layout, 0, &[slot.depth_forward_sets[idx]]);
            gfx.cmd_draw(cmd, 3, 0);
            gfx.cmd_end_rendering(cmd);
            if predicate_buffer.is_some() {
                gfx.cmd_end_conditional_rendering(cmd);
            }
            recorder.invalidate_pipeline();
            gfx.cmd_image_barriers(
                cmd,
                &[GfxImageBarrier::new()
                    .image(targets.prev_depth().image)
                    .layout_transfer(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src(GfxBarrierMask::DEPTH_ATTACHMENT_RW)
                    .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .image_aspect_flag(depth_aspect)],
            );
        }

        // 5. 从后往前混合，空的层是全透明的，混合后没有变化
        gfx.cmd_begin_rendering(
            cmd,
            &GfxRenderingInfo::new(extent).color(GfxRenderingAttachment::color_load(targets.composite().view)),
        );
        gfx.cmd_bind_pipeline(cmd, pipelines.composite);
        for layer in (0..layer_count as usize).rev() {
            gfx.cmd_bind_descriptor_sets(cmd, fullscreen_layout, 0, &[slot.composite_sets[layer]]);
            gfx.cmd_draw(cmd, 3, 0);
        }
        gfx.cmd_end_rendering(cmd);

        gfx.cmd_image_barriers(
            cmd,
            &[
                GfxImageBarrier::new()
                    .image(targets.composite().image)
                    .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src(GfxBarrierMask::COLOR_ATTACHMENT_WRITE)
                    .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ),
                GfxImageBarrier::new()
                    .image(targets.opaque_depth().image)
                    .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src(GfxBarrierMask::TRANSFER_READ)
                    .dst(GfxBarrierMask::FRAGMENT_SAMPLED_READ)
                    .image_aspect_flag(depth_aspect),
            ],
        );
        gfx.cmd_end_label(cmd);
    }

    /// 在主 pass 内部调用：全屏绘制合成结果，并写回 opaque 的深度
    pub fn resolve_into_main_pass<G: GfxCommands + ?Sized>(&self, gfx: &mut G, cmd: GfxCommandBufferHandle, slot: usize) {
        gfx.cmd_bind_pipeline(cmd, self.pipelines.resolve);
        gfx.cmd_bind_descriptor_sets(cmd, self.fullscreen_layout, 0, &[self.slots[slot].resolve_set]);
        gfx.cmd_draw(cmd, 3, 0);
    }
}

// update
impl TransmissionCompositor {
    /// 在 slot 的 fence signal 之后调用，非阻塞地读取上一次录制的 query
    pub fn collect_stats(&mut self, gfx: &mut impl GfxQueries, slot: usize) -> GfxResult<()> {
        let slot = &mut self.slots[slot];
        if !slot.queries_written {
            return Ok(());
        }
        let results = gfx.query_results(slot.query_pool, 0, self.layer_count)?;
        slot.queries_written = false;

        self.last_stats = TransmissionStats {
            frame_id: slot.recorded_frame,
            layers: results.into_iter().map(LayerVisibility::from).collect_vec(),
        };
        log::trace!("transmission layers of frame {}: {:?}", self.last_stats.frame_id, self.last_stats.layers);
        Ok(())
    }

    /// swapchain 重建之后调用，GPU 必须空闲
    pub fn resize(
        &mut self,
        gfx: &mut impl GfxBackend,
        extent: vk::Extent2D,
        output_format: vk::Format,
        output_samples: vk::SampleCountFlags,
    ) -> GfxResult<()> {
        let _span = crate::profile_span!("TransmissionCompositor::resize");

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let targets = TransmissionTargets::new(
                gfx,
                extent,
                self.layer_count,
                &format!("transmission-{}", FrameLabel::from_usize(idx)),
            )?;
            std::mem::replace(&mut slot.targets, targets).destroy(gfx);
            slot.queries_written = false;
            Self::write_slot_inputs(gfx, slot, self.linear_sampler, self.nearest_sampler);
        }

        if output_format != self.output_format || output_samples != self.output_samples {
            log::info!("rebuild transmission resolve pipeline for {:?}, {:?}", output_format, output_samples);
            let desc = Self::resolve_pipeline_desc(&self.shader_paths, output_format, output_samples);
            let resolve = gfx.create_graphics_pipeline(&desc, self.fullscreen_layout, "transmission-resolve")?;
            gfx.destroy_pipeline(std::mem::replace(&mut self.pipelines.resolve, resolve));
            self.output_format = output_format;
            self.output_samples = output_samples;
        }
        Ok(())
    }
}

// getters
impl TransmissionCompositor {
    #[inline]
    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }
    /// 最近一次读取到的 query 结果
    #[inline]
    pub fn last_stats(&self) -> &TransmissionStats {
        &self.last_stats
    }
    /// `record` 被调用的次数
    #[inline]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }
    #[inline]
    pub fn targets(&self, slot: usize) -> &TransmissionTargets {
        &self.slots[slot].targets
    }
    #[inline]
    pub fn query_pool(&self, slot: usize) -> GfxQueryPoolHandle {
        self.slots[slot].query_pool
    }
    #[inline]
    pub fn predicate_buffer(&self) -> Option<GfxBufferHandle> {
        self.predicate_buffer
    }
    #[inline]
    pub fn peel_pipeline(&self) -> GfxPipelineHandle {
        self.pipelines.peel
    }
    #[inline]
    pub fn resolve_pipeline(&self) -> GfxPipelineHandle {
        self.pipelines.resolve
    }
}

// destroy
impl TransmissionCompositor {
    /// descriptor set 随 pool 一起释放
    pub fn destroy(self, gfx: &mut impl GfxBackend) {
        let pipelines = self.pipelines;
        for pipeline in [
            pipelines.opaque,
            pipelines.peel,
            pipelines.depth_forward,
            pipelines.composite,
            pipelines.resolve,
        ] {
            gfx.destroy_pipeline(pipeline);
        }
        gfx.destroy_pipeline_layout(self.peel_layout);
        gfx.destroy_pipeline_layout(self.fullscreen_layout);

        for slot in self.slots {
            gfx.destroy_query_pool(slot.query_pool);
            slot.targets.destroy(gfx);
        }
        if let Some(predicate) = self.predicate_buffer {
            gfx.destroy_buffer(predicate);
        }
        gfx.destroy_sampler(self.linear_sampler);
        gfx.destroy_sampler(self.nearest_sampler);
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::{
        GfxDeviceLimits, GfxResources, GfxSync,
        mock::{GfxEvent, MockGfx},
        resources::buffer::GfxBufferDesc,
    };

    use super::*;
    use crate::{
        draw_context::DrawItem,
        material::{material_desc::MaterialDesc, material_system::MaterialHandle},
    };

    struct Fixture {
        gfx: MockGfx,
        config: RendererConfig,
        descriptors: DescriptorBindingManager,
        materials: MaterialSystem,
        compositor: TransmissionCompositor,
        mesh: MeshBuffers,
        glass: MaterialHandle,
        wall: MaterialHandle,
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    fn fixture(gfx: MockGfx, peel_layers: u32) -> Fixture {
        let mut gfx = gfx;
        let config = RendererConfig {
            peel_layers,
            ..Default::default()
        };
        let samples = vk::SampleCountFlags::TYPE_4;
        let format = RendererConstants::SURFACE_FORMAT.format;
        let descriptors = DescriptorBindingManager::new(&mut gfx, &config).unwrap();
        let mut materials = MaterialSystem::new(&mut gfx, &config, &descriptors, format, samples).unwrap();
        let glass = materials
            .create_material(
                &mut gfx,
                &descriptors,
                &MaterialDesc {
                    name: "glass".to_string(),
                    transmission_factor: 1.0,
                    ..Default::default()
                },
            )
            .unwrap();
        let wall = materials.create_material(&mut gfx, &descriptors, &MaterialDesc::default()).unwrap();
        let compositor =
            TransmissionCompositor::new(&mut gfx, &config, &descriptors, &materials, EXTENT, format, samples).unwrap();
        let mesh = MeshBuffers {
            vertex: gfx.create_buffer(&GfxBufferDesc::vertex(1024), "vertex").unwrap(),
            index: gfx.create_buffer(&GfxBufferDesc::index(1024), "index").unwrap(),
        };
        Fixture {
            gfx,
            config,
            descriptors,
            materials,
            compositor,
            mesh,
            glass,
            wall,
        }
    }

    fn draw_ctx(f: &Fixture) -> DrawContext {
        let item = |material| DrawItem {
            first_index: 0,
            index_count: 6,
            vertex_offset: 0,
            transform: glam::Mat4::IDENTITY,
            material,
        };
        let mut ctx = DrawContext::default();
        ctx.push(MaterialCategory::Opaque, item(f.wall));
        ctx.push(MaterialCategory::Transmissive, item(f.glass));
        ctx
    }

    fn record(f: &mut Fixture, slot: usize) -> GfxCommandBufferHandle {
        let ctx = draw_ctx(f);
        let cmd = f.gfx.allocate_command_buffer("frame").unwrap();
        let global_set = f
            .descriptors
            .allocate_sets(&mut f.gfx, f.descriptors.global_layout(), 1, "global")
            .unwrap()[0];
        f.gfx.begin_command_buffer(cmd, "frame").unwrap();
        f.gfx.clear_events();
        f.compositor.record(
            &mut f.gfx,
            &TransmissionInputs {
                cmd,
                slot,
                frame_id: 7,
                global_set,
                mesh: f.mesh,
                draw_ctx: &ctx,
                materials: &f.materials,
                clear_color: f.config.clear_color,
            },
        );
        f.gfx.end_command_buffer(cmd).unwrap();
        cmd
    }

    fn teardown(f: Fixture) {
        let Fixture {
            mut gfx,
            descriptors,
            materials,
            compositor,
            mesh,
            ..
        } = f;
        gfx.wait_idle().unwrap();
        compositor.destroy(&mut gfx);
        materials.destroy(&mut gfx);
        descriptors.destroy(&mut gfx);
        gfx.destroy_buffer(mesh.vertex);
        gfx.destroy_buffer(mesh.index);
        let stats = gfx.resource_stats();
        assert_eq!(stats.total() - stats.command_buffers, 0, "{:?}", stats);
    }

    #[test]
    fn test_pipeline_states() {
        let f = fixture(MockGfx::new(), 4);
        let peel = f.gfx.pipeline_desc(f.compositor.peel_pipeline());
        assert_eq!(peel.color_attach_formats(), &[RendererConstants::OFFSCREEN_COLOR_FORMAT]);
        assert_eq!(peel.msaa_sample(), vk::SampleCountFlags::TYPE_1);
        assert!(peel.depth_write());
        assert!(!peel.blends());

        let resolve = f.gfx.pipeline_desc(f.compositor.resolve_pipeline());
        assert_eq!(resolve.color_attach_formats(), &[RendererConstants::SURFACE_FORMAT.format]);
        assert_eq!(resolve.msaa_sample(), vk::SampleCountFlags::TYPE_4);
        assert_eq!(resolve.depth_test_op(), Some(vk::CompareOp::ALWAYS));
        assert!(resolve.vertex_binding_desc().is_empty());
        teardown(f);
    }

    #[test]
    fn test_record_peels_every_layer() {
        let mut f = fixture(MockGfx::new(), 4);
        record(&mut f, 1);
        let gfx = &f.gfx;
        let targets = f.compositor.targets(1);
        let pool = f.compositor.query_pool(1);

        // 每层一个 query，都在 rendering scope 内部
        let queries = gfx
            .events()
            .iter()
            .filter_map(|e| match e {
                GfxEvent::BeginQuery { pool: p, query } if *p == pool => Some(*query),
                _ => None,
            })
            .collect_vec();
        assert_eq!(queries, vec![0, 1, 2, 3]);
        let reset = gfx.position(|e| matches!(e, GfxEvent::ResetQueryPool { count: 4, .. })).unwrap();
        let first_query = gfx.position(|e| matches!(e, GfxEvent::BeginQuery { .. })).unwrap();
        assert!(reset < first_query);

        // 每层的 peel depth 都从 opaque depth 拷贝
        for layer in 0..4 {
            let copy = GfxEvent::CopyImage {
                src: targets.opaque_depth().image,
                dst: targets.peel_depth(layer).image,
            };
            assert_eq!(gfx.count(|e| *e == copy), 1);
        }

        // 深度前移只发生在层与层之间，并且被 GPU 谓词控制
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BeginConditional { .. })), 3);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::CopyQueryResults { count: 1, .. })), 3);
        // 3 次深度前移 + 4 次合成
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 })), 7);
        // 1 次 opaque + 每层 1 次 transmissive
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::DrawIndexed { .. })), 5);

        assert_eq!(
            gfx.count(|e| *e
                == GfxEvent::GenerateMipmaps {
                    image: targets.opaque_color().image,
                    mip_levels: targets.mip_levels()
                }),
            1
        );
        let blit = gfx
            .position(|e| {
                *e == GfxEvent::BlitImage {
                    src: targets.opaque_color().image,
                    dst: targets.composite().image,
                }
            })
            .unwrap();
        let last_query = gfx.events().iter().rposition(|e| matches!(e, GfxEvent::EndQuery { .. })).unwrap();
        let first_composite = last_query
            + gfx.events()[last_query..]
                .iter()
                .position(|e| matches!(e, GfxEvent::Draw { .. }))
                .unwrap();
        assert!(blit < first_composite);
        assert_eq!(f.compositor.invocations(), 1);
        teardown(f);
    }

    #[test]
    fn test_single_layer_composites_once() {
        let mut f = fixture(MockGfx::new(), 1);
        record(&mut f, 0);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::BeginQuery { .. })), 1);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::BeginConditional { .. })), 0);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 })), 1);
        teardown(f);
    }

    #[test]
    fn test_without_conditional_rendering() {
        let gfx = MockGfx::new().with_limits(GfxDeviceLimits {
            min_uniform_buffer_offset_alignment: 64,
            framebuffer_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
            conditional_rendering: false,
        });
        let mut f = fixture(gfx, 4);
        assert!(f.compositor.predicate_buffer().is_none());
        record(&mut f, 0);
        // 深度前移总是执行
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::CopyQueryResults { .. })), 0);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::Draw { vertex_count: 3 })), 7);
        teardown(f);
    }

    #[test]
    fn test_collect_stats() {
        let mut f = fixture(MockGfx::new(), 4);
        // 还没有录制过，不读取
        f.compositor.collect_stats(&mut f.gfx, 0).unwrap();
        assert!(f.compositor.last_stats().layers.is_empty());

        record(&mut f, 0);
        f.gfx.push_query_results(vec![
            GfxQueryResult::Ready(1200),
            GfxQueryResult::Ready(0),
            GfxQueryResult::NotReady,
            GfxQueryResult::Ready(0),
        ]);
        f.compositor.collect_stats(&mut f.gfx, 0).unwrap();
        let stats = f.compositor.last_stats().clone();
        assert_eq!(stats.frame_id, 7);
        assert_eq!(
            stats.layers,
            vec![
                LayerVisibility::Visible(1200),
                LayerVisibility::Empty,
                LayerVisibility::NotReady,
                LayerVisibility::Empty
            ]
        );
        assert_eq!(stats.visible_layers(), 2);
        assert_eq!(stats.first_empty_layer(), Some(1));

        // 同一次录制只读取一次
        f.compositor.collect_stats(&mut f.gfx, 0).unwrap();
        assert_eq!(f.compositor.last_stats(), &stats);
        teardown(f);
    }

    #[test]
    fn test_single_texel_target_has_no_mip_tail() {
        let mut f = fixture(MockGfx::new(), 2);
        let extent = vk::Extent2D { width: 1, height: 1 };
        f.compositor
            .resize(&mut f.gfx, extent, RendererConstants::SURFACE_FORMAT.format, vk::SampleCountFlags::TYPE_4)
            .unwrap();
        assert_eq!(f.compositor.targets(0).mip_levels(), 1);

        // mock 会拒绝超出 image mip 数量的 barrier
        record(&mut f, 0);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::GenerateMipmaps { .. })), 0);
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::BlitImage { .. })), 1);
        teardown(f);
    }

    #[test]
    fn test_resize_keeps_resource_counts() {
        let mut f = fixture(MockGfx::new(), 3);
        let before = f.gfx.resource_stats();
        let old_composite = f.compositor.targets(0).composite().image;
        f.gfx.clear_events();

        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        f.compositor
            .resize(&mut f.gfx, extent, RendererConstants::SURFACE_FORMAT.format, vk::SampleCountFlags::TYPE_4)
            .unwrap();

        assert_eq!(f.gfx.resource_stats(), before);
        assert!(!f.gfx.is_alive_image(old_composite));
        assert_eq!(f.gfx.image_desc(f.compositor.targets(1).peel_color(2).image).extent, extent);
        // set 不重新分配，只重新写入
        assert_eq!(f.gfx.count(|e| matches!(e, GfxEvent::AllocateDescriptorSets { .. })), 0);
        assert_eq!(
            f.gfx.count(|e| matches!(e, GfxEvent::UpdateDescriptorSets { .. })),
            f.config.frame_slots * (3 * 3 + 1)
        );

        let old_resolve = f.compositor.resolve_pipeline();
        f.compositor
            .resize(&mut f.gfx, extent, vk::Format::B8G8R8A8_UNORM, vk::SampleCountFlags::TYPE_2)
            .unwrap();
        assert_ne!(f.compositor.resolve_pipeline(), old_resolve);
        assert_eq!(f.gfx.resource_stats(), before);
        teardown(f);
    }
}

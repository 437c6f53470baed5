//! 材质系统
//!
//! 在加载期把 [`MaterialDesc`] 转换为可以直接绑定的 [`MaterialInstance`]：
//! 分类、打包 constants、解析贴图（缺失的贴图使用 1x1 白色贴图和默认采样器），
//! 以及为每个 frame slot 写好一个 descriptor set。

use itertools::Itertools;
use slotmap::SlotMap;
use vitrum_gfx::{
    GfxBackend, GfxDescriptorSetHandle, GfxImageHandle, GfxImageViewHandle, GfxPipelineHandle,
    GfxPipelineLayoutHandle, GfxPipelines, GfxResources, GfxResult, GfxSamplerHandle,
    pipelines::graphics_pipeline::GfxGraphicsPipelineDesc,
    resources::{
        image::{GfxImageDesc, GfxImageViewDesc},
        sampler::GfxSamplerDesc,
    },
    vk,
};

use crate::{
    config::{RendererConfig, RendererConstants},
    descriptor_binding::{DescriptorBindingManager, MaterialBindingResources, SampledImage},
    material::{
        category::MaterialCategory,
        constants::MaterialConstants,
        material_desc::{MaterialDesc, TextureRef},
    },
    per_frame_buffer::SlotRegionBuffer,
    vertex::{DrawPushConstants, MeshVertex},
};

slotmap::new_key_type! {
    pub struct MaterialHandle;
}

/// 句柄对应的材质不存在
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("material {0:?} does not exist")]
pub struct UnknownMaterial(pub MaterialHandle);

/// 按句柄查询材质分类，场景展开 draw item 时使用
pub trait MaterialLookup {
    fn category(&self, material: MaterialHandle) -> Option<MaterialCategory>;
}

/// 已经绑定好的材质
pub struct MaterialInstance {
    name: String,
    category: MaterialCategory,
    pipeline: GfxPipelineHandle,
    constants: MaterialConstants,
    constants_buffer: SlotRegionBuffer,
    /// 每个 frame slot 一个，写入后不再修改
    descriptor_sets: Vec<GfxDescriptorSetHandle>,
    /// 第 i 位表示 slot i 的 constants 区域需要刷新
    dirty_slots: u32,
}

// getters
impl MaterialInstance {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn category(&self) -> MaterialCategory {
        self.category
    }
    #[inline]
    pub fn pipeline(&self) -> GfxPipelineHandle {
        self.pipeline
    }
    #[inline]
    pub fn constants(&self) -> &MaterialConstants {
        &self.constants
    }
    #[inline]
    pub fn constants_buffer(&self) -> &SlotRegionBuffer {
        &self.constants_buffer
    }
    #[inline]
    pub fn descriptor_set(&self, slot: usize) -> GfxDescriptorSetHandle {
        self.descriptor_sets[slot]
    }
    #[inline]
    pub fn is_dirty(&self, slot: usize) -> bool {
        self.dirty_slots & (1 << slot) != 0
    }
}

pub struct MaterialSystem {
    materials: SlotMap<MaterialHandle, MaterialInstance>,

    /// set 0: global, set 1: material
    pipeline_layout: GfxPipelineLayoutHandle,
    /// 按 [`MaterialCategory::ALL`] 的顺序
    pipelines: [GfxPipelineHandle; 3],
    color_format: vk::Format,
    samples: vk::SampleCountFlags,

    fallback_image: GfxImageHandle,
    fallback_view: GfxImageViewHandle,
    default_sampler: GfxSamplerHandle,

    slot_count: usize,
    shader_paths: MeshShaderPaths,
}

/// 网格 pass 的 shader
#[derive(Debug, Clone)]
pub struct MeshShaderPaths {
    pub vertex: std::path::PathBuf,
    pub fragment: std::path::PathBuf,
}

impl MeshShaderPaths {
    pub fn pbr(config: &RendererConfig) -> Self {
        Self {
            vertex: config.shader_path("mesh.vert"),
            fragment: config.shader_path("pbr.frag"),
        }
    }
}

// new & init
impl MaterialSystem {
    pub fn new(
        gfx: &mut impl GfxBackend,
        config: &RendererConfig,
        descriptors: &DescriptorBindingManager,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GfxResult<Self> {
        let _span = crate::profile_span!("MaterialSystem::new");

        let fallback_image = gfx.create_image(
            &GfxImageDesc::new_image_2d(
                vk::Extent2D { width: 1, height: 1 },
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ),
            "fallback-white",
        )?;
        gfx.upload_image(fallback_image, &[255, 255, 255, 255])?;
        let fallback_view = gfx.create_image_view(fallback_image, &GfxImageViewDesc::color(), "fallback-white")?;
        let default_sampler = gfx.create_sampler(&GfxSamplerDesc::linear_repeat(), "material-default")?;

        let pipeline_layout = gfx.create_pipeline_layout(
            &[descriptors.global_layout(), descriptors.material_layout()],
            &[DrawPushConstants::range()],
            "material",
        )?;
        let shader_paths = MeshShaderPaths::pbr(config);
        let pipelines = Self::create_pipelines(gfx, pipeline_layout, &shader_paths, color_format, samples)?;

        Ok(Self {
            materials: SlotMap::with_key(),
            pipeline_layout,
            pipelines,
            color_format,
            samples,
            fallback_image,
            fallback_view,
            default_sampler,
            slot_count: config.frame_slots,
            shader_paths,
        })
    }

    /// 网格 pass 的通用管线描述，opaque 深度测试并写入，其余只测试不写入并使用 straight alpha
    pub fn mesh_pipeline_desc(
        shaders: &MeshShaderPaths,
        category: MaterialCategory,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GfxGraphicsPipelineDesc {
        let mut desc = GfxGraphicsPipelineDesc::default();
        desc.attach_info(vec![color_format], Some(RendererConstants::DEPTH_FORMAT))
            .vertex_shader_stage(&shaders.vertex, c"main")
            .fragment_shader_stage(&shaders.fragment, c"main")
            .vertex_binding(MeshVertex::vertex_input_bindings())
            .vertex_attribute(MeshVertex::vertex_input_attributes())
            .msaa(samples);
        match category {
            MaterialCategory::Opaque => {
                desc.depth_test(Some(vk::CompareOp::LESS), true)
                    .color_blend(vec![GfxGraphicsPipelineDesc::opaque_blend()]);
            }
            MaterialCategory::Transparent | MaterialCategory::Transmissive => {
                desc.depth_test(Some(vk::CompareOp::LESS), false)
                    .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
                    .color_blend(vec![GfxGraphicsPipelineDesc::alpha_blend()]);
            }
        }
        desc
    }

    fn create_pipelines(
        gfx: &mut impl GfxPipelines,
        layout: GfxPipelineLayoutHandle,
        shaders: &MeshShaderPaths,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GfxResult<[GfxPipelineHandle; 3]> {
        let mut pipelines = [GfxPipelineHandle::default(); 3];
        for (idx, category) in MaterialCategory::ALL.into_iter().enumerate() {
            let desc = Self::mesh_pipeline_desc(shaders, category, color_format, samples);
            match gfx.create_graphics_pipeline(&desc, layout, &format!("material-{}", category)) {
                Ok(pipeline) => pipelines[idx] = pipeline,
                Err(e) => {
                    for pipeline in &pipelines[..idx] {
                        gfx.destroy_pipeline(*pipeline);
                    }
                    return Err(e);
                }
            }
        }
        Ok(pipelines)
    }
}

// material
impl MaterialSystem {
    /// 加载期调用：分配 K 个 set 并写入所有 binding
    ///
    /// 不能在有帧在飞行时调用
    pub fn create_material(
        &mut self,
        gfx: &mut impl GfxBackend,
        descriptors: &DescriptorBindingManager,
        desc: &MaterialDesc,
    ) -> GfxResult<MaterialHandle> {
        let category = MaterialCategory::classify(desc);
        let constants = MaterialConstants::from_desc(desc);
        let name = if desc.name.is_empty() { "unnamed" } else { desc.name.as_str() };

        let constants_buffer = SlotRegionBuffer::new(
            gfx,
            MaterialConstants::SIZE as vk::DeviceSize,
            self.slot_count,
            &format!("material-{}", name),
        )?;
        constants_buffer.write_all(gfx, constants.as_bytes())?;

        let descriptor_sets = match descriptors.allocate_sets(
            gfx,
            descriptors.material_layout(),
            self.slot_count,
            &format!("material-{}", name),
        ) {
            Ok(sets) => sets,
            Err(e) => {
                constants_buffer.destroy(gfx);
                return Err(e);
            }
        };

        let textures = self.resolve_textures(desc);
        for (slot, set) in descriptor_sets.iter().enumerate() {
            DescriptorBindingManager::write_material_bindings(
                gfx,
                *set,
                &MaterialBindingResources {
                    textures,
                    constants: constants_buffer.buffer(),
                    constants_offset: constants_buffer.offset(slot),
                    constants_range: constants_buffer.range(),
                },
            );
        }

        log::debug!("material `{}` created as {}", name, category);
        Ok(self.materials.insert(MaterialInstance {
            name: name.to_string(),
            category,
            pipeline: self.pipelines[Self::category_index(category)],
            constants,
            constants_buffer,
            descriptor_sets,
            dirty_slots: 0,
        }))
    }

    /// 缺失的贴图使用白色贴图，缺失的 sampler 使用默认线性采样器
    pub fn resolve_textures(&self, desc: &MaterialDesc) -> [SampledImage; 6] {
        let resolve = |texture: Option<TextureRef>| match texture {
            Some(texture) => SampledImage {
                view: texture.view,
                sampler: texture.sampler.unwrap_or(self.default_sampler),
            },
            None => SampledImage {
                view: self.fallback_view,
                sampler: self.default_sampler,
            },
        };
        [
            resolve(desc.base_color_texture),
            resolve(desc.metallic_roughness_texture),
            resolve(desc.occlusion_texture),
            resolve(desc.normal_texture),
            resolve(desc.transmission_texture),
            resolve(desc.volume.and_then(|v| v.thickness_texture)),
        ]
    }

    /// 修改 constants，之后每个 slot 在自己下一次录制时刷新对应的区域
    pub fn set_constants(
        &mut self,
        material: MaterialHandle,
        constants: MaterialConstants,
    ) -> Result<(), UnknownMaterial> {
        let instance = self.materials.get_mut(material).ok_or(UnknownMaterial(material))?;
        instance.constants = constants;
        instance.dirty_slots = (1 << self.slot_count) - 1;
        Ok(())
    }

    /// 只写入 `slot` 的区域，调用方需要保证该 slot 的 fence 已经 signal
    pub fn flush_slot(&mut self, gfx: &mut impl GfxResources, slot: usize) -> GfxResult<()> {
        let slot_bit = 1 << slot;
        for instance in self.materials.values_mut().filter(|m| m.dirty_slots & slot_bit != 0) {
            instance.constants_buffer.write(gfx, slot, instance.constants.as_bytes())?;
            instance.dirty_slots &= !slot_bit;
        }
        Ok(())
    }

    /// surface 格式或者采样数变化后重建管线，只能在 GPU 空闲时调用
    pub fn rebuild_pipelines(
        &mut self,
        gfx: &mut impl GfxPipelines,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GfxResult<()> {
        if color_format == self.color_format && samples == self.samples {
            return Ok(());
        }
        log::info!("rebuild material pipelines for {:?}, {:?}", color_format, samples);
        let pipelines = Self::create_pipelines(gfx, self.pipeline_layout, &self.shader_paths, color_format, samples)?;
        for old in std::mem::replace(&mut self.pipelines, pipelines) {
            gfx.destroy_pipeline(old);
        }
        for instance in self.materials.values_mut() {
            instance.pipeline = self.pipelines[Self::category_index(instance.category)];
        }
        self.color_format = color_format;
        self.samples = samples;
        Ok(())
    }
}

// getters
impl MaterialSystem {
    #[inline]
    fn category_index(category: MaterialCategory) -> usize {
        match category {
            MaterialCategory::Opaque => 0,
            MaterialCategory::Transparent => 1,
            MaterialCategory::Transmissive => 2,
        }
    }

    /// 预先创建好的管线，纯查询
    #[inline]
    pub fn get_pipeline(&self, category: MaterialCategory) -> (GfxPipelineHandle, GfxPipelineLayoutHandle) {
        (self.pipelines[Self::category_index(category)], self.pipeline_layout)
    }

    #[inline]
    pub fn material(&self, material: MaterialHandle) -> &MaterialInstance {
        &self.materials[material]
    }

    #[inline]
    pub fn get(&self, material: MaterialHandle) -> Option<&MaterialInstance> {
        self.materials.get(material)
    }

    #[inline]
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn default_sampler(&self) -> GfxSamplerHandle {
        self.default_sampler
    }

    #[inline]
    pub fn shader_paths(&self) -> &MeshShaderPaths {
        &self.shader_paths
    }

    pub fn handles(&self) -> Vec<MaterialHandle> {
        self.materials.keys().collect_vec()
    }
}

impl MaterialLookup for MaterialSystem {
    #[inline]
    fn category(&self, material: MaterialHandle) -> Option<MaterialCategory> {
        self.materials.get(material).map(|m| m.category)
    }
}

// destroy
impl MaterialSystem {
    /// descriptor set 随 pool 一起释放
    pub fn destroy(self, gfx: &mut impl GfxBackend) {
        for pipeline in self.pipelines {
            gfx.destroy_pipeline(pipeline);
        }
        gfx.destroy_pipeline_layout(self.pipeline_layout);
        for (_, instance) in self.materials {
            instance.constants_buffer.destroy(gfx);
        }
        gfx.destroy_sampler(self.default_sampler);
        gfx.destroy_image_view(self.fallback_view);
        gfx.destroy_image(self.fallback_image);
    }
}

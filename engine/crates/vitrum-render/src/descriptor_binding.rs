//! descriptor pool 和 set layout 的管理
//!
//! 所有的 set 都从一个固定大小的 pool 中分配，pool 在启动时按照配置一次性创建，
//! 运行期间不处理 pool 耗尽：耗尽说明尺寸估计错误，直接作为致命错误返回。

use itertools::Itertools;
use vitrum_gfx::{
    GfxBufferHandle, GfxDescriptorPoolHandle, GfxDescriptorSetHandle, GfxDescriptorSetLayoutHandle, GfxDescriptors,
    GfxError, GfxImageViewHandle, GfxResult, GfxSamplerHandle,
    descriptors::{GfxDescriptorBinding, GfxDescriptorPoolDesc, GfxDescriptorResource, GfxDescriptorWrite},
    vk,
};

use crate::config::RendererConfig;

/// binding 的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    /// texture + sampler
    CombinedImageSampler,
}

impl BindingKind {
    #[inline]
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("binding slot {0} is used twice in one set layout")]
pub struct DuplicateBindingSlot(pub u32);

impl From<DuplicateBindingSlot> for GfxError {
    fn from(e: DuplicateBindingSlot) -> Self {
        GfxError::DuplicateBindingSlot(e.0)
    }
}

/// 一个 set layout 的全部 binding，保证 slot 不重复
#[derive(Debug, Clone, Default)]
pub struct LayoutBindings {
    bindings: Vec<GfxDescriptorBinding>,
}

impl LayoutBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造一个 binding 并加入 layout，slot 重复时报错
    pub fn create_layout_binding(
        &mut self,
        kind: BindingKind,
        stages: vk::ShaderStageFlags,
        slot: u32,
    ) -> Result<GfxDescriptorBinding, DuplicateBindingSlot> {
        if self.bindings.iter().any(|b| b.slot == slot) {
            return Err(DuplicateBindingSlot(slot));
        }
        let binding = GfxDescriptorBinding {
            slot,
            ty: kind.descriptor_type(),
            stages,
        };
        self.bindings.push(binding);
        Ok(binding)
    }

    /// 按顺序加入全部 binding，任意一个 slot 重复都会让整个 layout 失败
    pub fn from_entries(entries: &[(BindingKind, vk::ShaderStageFlags, u32)]) -> GfxResult<Self> {
        let mut layout = Self::new();
        for &(kind, stages, slot) in entries {
            layout.create_layout_binding(kind, stages, slot)?;
        }
        Ok(layout)
    }

    #[inline]
    pub fn bindings(&self) -> &[GfxDescriptorBinding] {
        &self.bindings
    }
}

/// 材质使用的 6 张贴图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialTextureSlot {
    BaseColor,
    MetallicRoughness,
    Occlusion,
    Normal,
    Transmission,
    Thickness,
}

impl MaterialTextureSlot {
    pub const ALL: [MaterialTextureSlot; 6] = [
        Self::BaseColor,
        Self::MetallicRoughness,
        Self::Occlusion,
        Self::Normal,
        Self::Transmission,
        Self::Thickness,
    ];
    /// 材质 set 中 constants 的 binding
    pub const CONSTANTS_BINDING: u32 = 6;

    #[inline]
    pub fn binding(self) -> u32 {
        self as u32
    }
}

/// 一个已经解析好的 texture + sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledImage {
    pub view: GfxImageViewHandle,
    pub sampler: GfxSamplerHandle,
}

/// 写入材质 set 的全部资源
#[derive(Debug, Clone, Copy)]
pub struct MaterialBindingResources {
    /// 按照 [`MaterialTextureSlot::ALL`] 的顺序
    pub textures: [SampledImage; 6],
    pub constants: GfxBufferHandle,
    pub constants_offset: vk::DeviceSize,
    pub constants_range: vk::DeviceSize,
}

pub struct DescriptorBindingManager {
    pool: GfxDescriptorPoolHandle,

    /// set 0：相机等逐帧数据
    global_layout: GfxDescriptorSetLayoutHandle,
    /// set 1：材质的贴图和 constants
    material_layout: GfxDescriptorSetLayoutHandle,
    /// 全屏 pass 和 peel pass 的输入，两张贴图
    pass_input_layout: GfxDescriptorSetLayoutHandle,

    pool_desc: GfxDescriptorPoolDesc,
}

// new & init
impl DescriptorBindingManager {
    /// pass input set 的 binding 数量
    pub const PASS_INPUT_COUNT: u32 = 2;

    pub fn new(gfx: &mut impl GfxDescriptors, config: &RendererConfig) -> GfxResult<Self> {
        let pool_desc = Self::pool_desc(config);
        log::info!(
            "descriptor pool: {} sets, sizes: {:?}",
            pool_desc.max_sets,
            pool_desc.pool_sizes
        );

        let global_layout = gfx.create_descriptor_set_layout(Self::global_bindings()?.bindings(), "global")?;
        let material_layout = gfx.create_descriptor_set_layout(Self::material_bindings()?.bindings(), "material")?;
        let pass_input_layout =
            gfx.create_descriptor_set_layout(Self::pass_input_bindings()?.bindings(), "pass-input")?;
        let pool = gfx.create_descriptor_pool(&pool_desc, "renderer")?;

        Ok(Self {
            pool,
            global_layout,
            material_layout,
            pass_input_layout,
            pool_desc,
        })
    }

    /// pool 的尺寸：材质部分为 multiplier x slots x materials，再加上全局 set 和透射 pass 的 set
    pub fn pool_desc(config: &RendererConfig) -> GfxDescriptorPoolDesc {
        let slots = config.frame_slots as u32;
        let material_sets = config.descriptor_pool_multiplier * slots * config.expected_materials;
        let global_sets = slots;
        // 每层 peel 输入、depth 前移、合成各一个，再加一个写回主 pass 的 resolve
        let pass_sets = slots * (3 * config.peel_layers + 1);

        let samplers =
            material_sets * MaterialTextureSlot::ALL.len() as u32 + pass_sets * Self::PASS_INPUT_COUNT;
        let uniform_buffers = material_sets + global_sets;

        GfxDescriptorPoolDesc {
            max_sets: material_sets + global_sets + pass_sets,
            pool_sizes: vec![
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, samplers),
                (vk::DescriptorType::UNIFORM_BUFFER, uniform_buffers),
            ],
        }
    }

    fn global_bindings() -> GfxResult<LayoutBindings> {
        LayoutBindings::from_entries(&[(
            BindingKind::UniformBuffer,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
        )])
    }

    fn material_bindings() -> GfxResult<LayoutBindings> {
        let entries = MaterialTextureSlot::ALL
            .iter()
            .map(|slot| (BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, slot.binding()))
            .chain(std::iter::once((
                BindingKind::UniformBuffer,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                MaterialTextureSlot::CONSTANTS_BINDING,
            )))
            .collect_vec();
        LayoutBindings::from_entries(&entries)
    }

    fn pass_input_bindings() -> GfxResult<LayoutBindings> {
        let entries = (0..Self::PASS_INPUT_COUNT)
            .map(|slot| (BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, slot))
            .collect_vec();
        LayoutBindings::from_entries(&entries)
    }
}

// tools
impl DescriptorBindingManager {
    /// 从共享 pool 中分配 `count` 个 set，pool 耗尽属于配置错误
    pub fn allocate_sets(
        &self,
        gfx: &mut impl GfxDescriptors,
        layout: GfxDescriptorSetLayoutHandle,
        count: usize,
        name: &str,
    ) -> GfxResult<Vec<GfxDescriptorSetHandle>> {
        gfx.allocate_descriptor_sets(self.pool, layout, count, name).inspect_err(|e| {
            log::error!("failed to allocate {} descriptor sets for {}: {}", count, name, e);
        })
    }

    /// 在一次 update 中写入 6 张贴图和 constants buffer
    pub fn write_material_bindings(
        gfx: &mut impl GfxDescriptors,
        set: GfxDescriptorSetHandle,
        resources: &MaterialBindingResources,
    ) {
        let writes = MaterialTextureSlot::ALL
            .iter()
            .zip(resources.textures.iter())
            .map(|(slot, image)| GfxDescriptorWrite {
                set,
                binding: slot.binding(),
                resource: GfxDescriptorResource::CombinedImageSampler {
                    view: image.view,
                    sampler: image.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            })
            .chain(std::iter::once(GfxDescriptorWrite {
                set,
                binding: MaterialTextureSlot::CONSTANTS_BINDING,
                resource: GfxDescriptorResource::UniformBuffer {
                    buffer: resources.constants,
                    offset: resources.constants_offset,
                    range: resources.constants_range,
                },
            }))
            .collect_vec();
        gfx.update_descriptor_sets(&writes);
    }

    pub fn write_global_binding(
        gfx: &mut impl GfxDescriptors,
        set: GfxDescriptorSetHandle,
        buffer: GfxBufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        gfx.update_descriptor_sets(&[GfxDescriptorWrite {
            set,
            binding: 0,
            resource: GfxDescriptorResource::UniformBuffer { buffer, offset, range },
        }]);
    }

    /// 两张以 `SHADER_READ_ONLY_OPTIMAL` 读取的输入
    pub fn write_pass_inputs(gfx: &mut impl GfxDescriptors, set: GfxDescriptorSetHandle, inputs: [SampledImage; 2]) {
        let writes = inputs
            .iter()
            .enumerate()
            .map(|(slot, image)| GfxDescriptorWrite {
                set,
                binding: slot as u32,
                resource: GfxDescriptorResource::CombinedImageSampler {
                    view: image.view,
                    sampler: image.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            })
            .collect_vec();
        gfx.update_descriptor_sets(&writes);
    }
}

// getters
impl DescriptorBindingManager {
    #[inline]
    pub fn global_layout(&self) -> GfxDescriptorSetLayoutHandle {
        self.global_layout
    }
    #[inline]
    pub fn material_layout(&self) -> GfxDescriptorSetLayoutHandle {
        self.material_layout
    }
    #[inline]
    pub fn pass_input_layout(&self) -> GfxDescriptorSetLayoutHandle {
        self.pass_input_layout
    }
    #[inline]
    pub fn pool_sizing(&self) -> &GfxDescriptorPoolDesc {
        &self.pool_desc
    }
}

// destroy
impl DescriptorBindingManager {
    /// 所有从 pool 中分配的 set 一起释放
    pub fn destroy(self, gfx: &mut impl GfxDescriptors) {
        gfx.destroy_descriptor_pool(self.pool);
        gfx.destroy_descriptor_set_layout(self.pass_input_layout);
        gfx.destroy_descriptor_set_layout(self.material_layout);
        gfx.destroy_descriptor_set_layout(self.global_layout);
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::{
        GfxResources,
        mock::{GfxEvent, MockGfx},
        resources::{
            buffer::GfxBufferDesc,
            image::{GfxImageDesc, GfxImageViewDesc},
            sampler::GfxSamplerDesc,
        },
    };

    use super::*;

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut bindings = LayoutBindings::new();
        bindings
            .create_layout_binding(BindingKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 0)
            .unwrap();
        bindings
            .create_layout_binding(BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, 1)
            .unwrap();
        assert_eq!(
            bindings.create_layout_binding(BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, 1),
            Err(DuplicateBindingSlot(1))
        );
        assert_eq!(bindings.bindings().len(), 2);
    }

    #[test]
    fn test_layout_with_colliding_slots_fails() {
        let entries = [
            (BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, 0),
            (BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT, 1),
            (BindingKind::UniformBuffer, vk::ShaderStageFlags::VERTEX, 1),
        ];
        assert!(matches!(
            LayoutBindings::from_entries(&entries),
            Err(GfxError::DuplicateBindingSlot(1))
        ));
        assert_eq!(LayoutBindings::from_entries(&entries[..2]).unwrap().bindings().len(), 2);
    }

    #[test]
    fn test_canonical_builders_succeed() {
        assert_eq!(DescriptorBindingManager::global_bindings().unwrap().bindings().len(), 1);
        assert_eq!(DescriptorBindingManager::material_bindings().unwrap().bindings().len(), 7);
        assert_eq!(
            DescriptorBindingManager::pass_input_bindings().unwrap().bindings().len(),
            DescriptorBindingManager::PASS_INPUT_COUNT as usize
        );
    }

    #[test]
    fn test_canonical_layouts() {
        let mut gfx = MockGfx::new();
        let manager = DescriptorBindingManager::new(&mut gfx, &RendererConfig::default()).unwrap();

        let global = gfx.set_layout_bindings(manager.global_layout());
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].ty, vk::DescriptorType::UNIFORM_BUFFER);

        let material = gfx.set_layout_bindings(manager.material_layout());
        assert_eq!(material.len(), 7);
        assert_eq!(
            material
                .iter()
                .filter(|b| b.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .count(),
            6
        );
        let slots = material.iter().map(|b| b.slot).collect::<std::collections::HashSet<_>>();
        assert_eq!(slots.len(), 7);

        manager.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().total(), 0);
    }

    #[test]
    fn test_pool_sizing() {
        let config = RendererConfig {
            frame_slots: 2,
            peel_layers: 4,
            descriptor_pool_multiplier: 2,
            expected_materials: 3,
            ..Default::default()
        };
        let desc = DescriptorBindingManager::pool_desc(&config);
        // 12 个材质 set + 2 个全局 set + 2 x 13 个 pass set
        assert_eq!(desc.max_sets, 12 + 2 + 26);
        assert!(desc.pool_sizes.contains(&(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 12 * 6 + 26 * 2)));
        assert!(desc.pool_sizes.contains(&(vk::DescriptorType::UNIFORM_BUFFER, 14)));
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut gfx = MockGfx::new();
        let config = RendererConfig {
            frame_slots: 1,
            descriptor_pool_multiplier: 1,
            expected_materials: 1,
            ..Default::default()
        };
        let manager = DescriptorBindingManager::new(&mut gfx, &config).unwrap();
        manager.allocate_sets(&mut gfx, manager.material_layout(), 1, "m0").unwrap();
        assert!(matches!(
            manager.allocate_sets(&mut gfx, manager.material_layout(), 1, "m1"),
            Err(GfxError::DescriptorPoolExhausted)
        ));
    }

    #[test]
    fn test_material_write_is_one_batched_update() {
        let mut gfx = MockGfx::new();
        let manager = DescriptorBindingManager::new(&mut gfx, &RendererConfig::default()).unwrap();
        let set = manager.allocate_sets(&mut gfx, manager.material_layout(), 1, "m").unwrap()[0];

        let image = gfx
            .create_image(
                &GfxImageDesc::new_image_2d(
                    vk::Extent2D { width: 1, height: 1 },
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED,
                ),
                "white",
            )
            .unwrap();
        let view = gfx.create_image_view(image, &GfxImageViewDesc::color(), "white").unwrap();
        let sampler = gfx.create_sampler(&GfxSamplerDesc::linear_repeat(), "linear").unwrap();
        let constants = gfx.create_buffer(&GfxBufferDesc::uniform(256), "constants").unwrap();

        gfx.clear_events();
        DescriptorBindingManager::write_material_bindings(
            &mut gfx,
            set,
            &MaterialBindingResources {
                textures: [SampledImage { view, sampler }; 6],
                constants,
                constants_offset: 0,
                constants_range: 128,
            },
        );
        assert_eq!(gfx.events().len(), 1);
        match &gfx.events()[0] {
            GfxEvent::UpdateDescriptorSets { writes } => {
                assert_eq!(writes.len(), 7);
                assert!(writes.iter().all(|w| w.set == set));
            }
            e => panic!("unexpected event {e:?}"),
        }
    }
}

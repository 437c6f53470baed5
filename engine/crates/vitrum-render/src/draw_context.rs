use vitrum_gfx::{
    GfxBufferHandle, GfxCommandBufferHandle, GfxCommands, GfxDescriptorSetHandle, GfxPipelineHandle,
    GfxPipelineLayoutHandle, vk,
};

use crate::{
    material::{
        category::MaterialCategory,
        material_system::{MaterialHandle, MaterialSystem},
    },
    vertex::DrawPushConstants,
};

/// 每帧生成的一次 draw，只引用 mesh 和材质持有的 GPU 资源
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub transform: glam::Mat4,
    pub material: MaterialHandle,
}

/// 按照 render pass 分桶的 draw item
#[derive(Debug, Clone, Default)]
pub struct DrawContext {
    pub opaque: Vec<DrawItem>,
    pub transparent: Vec<DrawItem>,
    pub transmissive: Vec<DrawItem>,
}

impl DrawContext {
    #[inline]
    pub fn push(&mut self, category: MaterialCategory, item: DrawItem) {
        match category {
            MaterialCategory::Opaque => self.opaque.push(item),
            MaterialCategory::Transparent => self.transparent.push(item),
            MaterialCategory::Transmissive => self.transmissive.push(item),
        }
    }

    #[inline]
    pub fn bucket(&self, category: MaterialCategory) -> &[DrawItem] {
        match category {
            MaterialCategory::Opaque => &self.opaque,
            MaterialCategory::Transparent => &self.transparent,
            MaterialCategory::Transmissive => &self.transmissive,
        }
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
        self.transmissive.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len() + self.transmissive.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn has_transmissive(&self) -> bool {
        !self.transmissive.is_empty()
    }
}

/// 所有 mesh 共享的 vertex/index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex: GfxBufferHandle,
    /// u32 index
    pub index: GfxBufferHandle,
}

/// 录制一组 draw item，跳过连续 draw 之间重复的 pipeline 和 descriptor 绑定
pub struct DrawRecorder {
    cmd: GfxCommandBufferHandle,
    slot: usize,
    global_set: GfxDescriptorSetHandle,
    mesh: MeshBuffers,

    bound_pipeline: Option<GfxPipelineHandle>,
    bound_material: Option<MaterialHandle>,
    buffers_bound: bool,
    draw_count: usize,
}

// new & init
impl DrawRecorder {
    pub fn new(cmd: GfxCommandBufferHandle, slot: usize, global_set: GfxDescriptorSetHandle, mesh: MeshBuffers) -> Self {
        Self {
            cmd,
            slot,
            global_set,
            mesh,
            bound_pipeline: None,
            bound_material: None,
            buffers_bound: false,
            draw_count: 0,
        }
    }
}

// tools
impl DrawRecorder {
    /// 每个 item 使用自己材质的管线
    pub fn draw_bucket<G: GfxCommands + ?Sized>(&mut self, gfx: &mut G, items: &[DrawItem], materials: &MaterialSystem) {
        for item in items {
            let Some(material) = materials.get(item.material) else {
                log::warn!("draw item references a missing material, skipped");
                continue;
            };
            let (_, layout) = materials.get_pipeline(material.category());
            self.draw_item(gfx, item, materials, material.pipeline(), layout, &[]);
        }
    }

    /// 所有 item 使用同一个管线，`extra_sets` 绑定在材质 set 之后
    pub fn draw_with_pipeline<G: GfxCommands + ?Sized>(
        &mut self,
        gfx: &mut G,
        items: &[DrawItem],
        materials: &MaterialSystem,
        pipeline: GfxPipelineHandle,
        layout: GfxPipelineLayoutHandle,
        extra_sets: &[GfxDescriptorSetHandle],
    ) {
        // 外部 set 可能每次调用都不同
        self.bound_material = None;
        for item in items {
            if materials.get(item.material).is_none() {
                log::warn!("draw item references a missing material, skipped");
                continue;
            }
            self.draw_item(gfx, item, materials, pipeline, layout, extra_sets);
        }
    }

    fn draw_item<G: GfxCommands + ?Sized>(
        &mut self,
        gfx: &mut G,
        item: &DrawItem,
        materials: &MaterialSystem,
        pipeline: GfxPipelineHandle,
        layout: GfxPipelineLayoutHandle,
        extra_sets: &[GfxDescriptorSetHandle],
    ) {
        if self.bound_pipeline != Some(pipeline) {
            gfx.cmd_bind_pipeline(self.cmd, pipeline);
            self.bound_pipeline = Some(pipeline);
            self.bound_material = None;
        }
        if !self.buffers_bound {
            gfx.cmd_bind_vertex_buffer(self.cmd, self.mesh.vertex, 0);
            gfx.cmd_bind_index_buffer(self.cmd, self.mesh.index, 0, vk::IndexType::UINT32);
            self.buffers_bound = true;
        }
        if self.bound_material != Some(item.material) {
            let material_set = materials.material(item.material).descriptor_set(self.slot);
            let mut sets = vec![self.global_set, material_set];
            sets.extend_from_slice(extra_sets);
            gfx.cmd_bind_descriptor_sets(self.cmd, layout, 0, &sets);
            self.bound_material = Some(item.material);
        }

        let push = DrawPushConstants { model: item.transform };
        gfx.cmd_push_constants(self.cmd, layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&push));
        gfx.cmd_draw_indexed(self.cmd, item.index_count, item.first_index, item.vertex_offset);
        self.draw_count += 1;
    }

    /// 新的管线被外部绑定后调用
    #[inline]
    pub fn invalidate_pipeline(&mut self) {
        self.bound_pipeline = None;
        self.bound_material = None;
    }

    #[inline]
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::{
        GfxBackend,
        mock::{GfxEvent, MockGfx},
        resources::buffer::GfxBufferDesc,
    };

    use super::*;
    use crate::{
        config::RendererConfig,
        descriptor_binding::DescriptorBindingManager,
        global_uniforms::GlobalBindings,
        material::material_desc::{AlphaMode, MaterialDesc},
    };

    fn item(material: MaterialHandle, first_index: u32) -> DrawItem {
        DrawItem {
            first_index,
            index_count: 6,
            vertex_offset: 0,
            transform: glam::Mat4::IDENTITY,
            material,
        }
    }

    fn mesh_buffers(gfx: &mut impl GfxBackend) -> MeshBuffers {
        MeshBuffers {
            vertex: gfx.create_buffer(&GfxBufferDesc::vertex(1024), "vertex").unwrap(),
            index: gfx.create_buffer(&GfxBufferDesc::index(1024), "index").unwrap(),
        }
    }

    #[test]
    fn test_push_buckets() {
        let mut ctx = DrawContext::default();
        let material = MaterialHandle::default();
        ctx.push(MaterialCategory::Opaque, item(material, 0));
        ctx.push(MaterialCategory::Transmissive, item(material, 6));
        assert_eq!(ctx.len(), 2);
        assert!(ctx.has_transmissive());
        assert_eq!(ctx.bucket(MaterialCategory::Transmissive)[0].first_index, 6);
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_redundant_binds_skipped() {
        let config = RendererConfig::default();
        let mut gfx = MockGfx::new();
        let descriptors = DescriptorBindingManager::new(&mut gfx, &config).unwrap();
        let globals = GlobalBindings::new(&mut gfx, &descriptors, config.frame_slots).unwrap();
        let mut materials = MaterialSystem::new(
            &mut gfx,
            &config,
            &descriptors,
            vk::Format::B8G8R8A8_SRGB,
            vk::SampleCountFlags::TYPE_1,
        )
        .unwrap();
        let a = materials
            .create_material(&mut gfx, &descriptors, &MaterialDesc::default())
            .unwrap();
        let b = materials
            .create_material(&mut gfx, &descriptors, &MaterialDesc::default())
            .unwrap();
        let c = materials
            .create_material(
                &mut gfx,
                &descriptors,
                &MaterialDesc {
                    alpha_mode: AlphaMode::Blend,
                    ..Default::default()
                },
            )
            .unwrap();
        let mesh = mesh_buffers(&mut gfx);
        let cmd = gfx.allocate_command_buffer("test").unwrap();
        gfx.begin_command_buffer(cmd, "test").unwrap();
        gfx.clear_events();

        let mut recorder = DrawRecorder::new(cmd, 1, globals.set(1), mesh);
        recorder.draw_bucket(&mut gfx, &[item(a, 0), item(a, 6), item(b, 12)], &materials);
        recorder.draw_bucket(&mut gfx, &[item(c, 18)], &materials);

        assert_eq!(recorder.draw_count(), 4);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::DrawIndexed { .. })), 4);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BindPipeline { .. })), 2);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::BindVertexBuffer { .. })), 1);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::PushConstants { len: 64 })), 4);

        // a, b, c 各绑定一次，且使用 slot 1 的 set
        let bound = gfx
            .events()
            .iter()
            .filter_map(|e| match e {
                GfxEvent::BindDescriptorSets { sets, .. } => Some(sets.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            bound,
            vec![
                vec![globals.set(1), materials.material(a).descriptor_set(1)],
                vec![globals.set(1), materials.material(b).descriptor_set(1)],
                vec![globals.set(1), materials.material(c).descriptor_set(1)],
            ]
        );
    }
}

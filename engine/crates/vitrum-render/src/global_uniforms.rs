use vitrum_gfx::{GfxDescriptorSetHandle, GfxDescriptors, GfxResources, GfxResult, vk};

use crate::{descriptor_binding::DescriptorBindingManager, per_frame_buffer::SlotRegionBuffer};

/// set 0 binding 0，和 shader 中的 `GlobalUniforms` 布局一致
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalUniforms {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub view_projection: glam::Mat4,
    /// w 无意义
    pub camera_position: glam::Vec4,
    /// xy: 尺寸，zw: 尺寸的倒数
    pub viewport: glam::Vec4,
}

impl Default for GlobalUniforms {
    fn default() -> Self {
        Self::new(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY, glam::Vec3::ZERO, vk::Extent2D {
            width: 1,
            height: 1,
        })
    }
}

impl GlobalUniforms {
    pub fn new(view: glam::Mat4, projection: glam::Mat4, camera_position: glam::Vec3, extent: vk::Extent2D) -> Self {
        let size = glam::vec2(extent.width.max(1) as f32, extent.height.max(1) as f32);
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position: camera_position.extend(1.0),
            viewport: glam::vec4(size.x, size.y, 1.0 / size.x, 1.0 / size.y),
        }
    }
}

/// 逐帧的 uniform buffer 以及每个 slot 的 global set
pub struct GlobalBindings {
    buffer: SlotRegionBuffer,
    sets: Vec<GfxDescriptorSetHandle>,
}

// new & init
impl GlobalBindings {
    pub fn new(
        gfx: &mut (impl GfxResources + GfxDescriptors),
        descriptors: &DescriptorBindingManager,
        slot_count: usize,
    ) -> GfxResult<Self> {
        let buffer = SlotRegionBuffer::new(
            gfx,
            size_of::<GlobalUniforms>() as vk::DeviceSize,
            slot_count,
            "global-uniforms",
        )?;
        let sets = descriptors.allocate_sets(gfx, descriptors.global_layout(), slot_count, "global")?;
        for (slot, set) in sets.iter().enumerate() {
            DescriptorBindingManager::write_global_binding(
                gfx,
                *set,
                buffer.buffer(),
                buffer.offset(slot),
                buffer.range(),
            );
        }
        Ok(Self { buffer, sets })
    }
}

// update
impl GlobalBindings {
    /// 只写入当前 slot 的区域
    pub fn update(&self, gfx: &mut impl GfxResources, slot: usize, uniforms: &GlobalUniforms) -> GfxResult<()> {
        self.buffer.write(gfx, slot, bytemuck::bytes_of(uniforms))
    }
}

// getters
impl GlobalBindings {
    #[inline]
    pub fn set(&self, slot: usize) -> GfxDescriptorSetHandle {
        self.sets[slot]
    }
    #[inline]
    pub fn buffer(&self) -> &SlotRegionBuffer {
        &self.buffer
    }
}

// destroy
impl GlobalBindings {
    /// set 随 descriptor pool 一起释放
    pub fn destroy(self, gfx: &mut impl GfxResources) {
        self.buffer.destroy(gfx);
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::{descriptors::GfxDescriptorResource, mock::{GfxEvent, MockGfx}};

    use super::*;
    use crate::config::RendererConfig;

    #[test]
    fn test_layout_size() {
        assert_eq!(size_of::<GlobalUniforms>(), 3 * 64 + 2 * 16);
    }

    #[test]
    fn test_each_slot_points_at_its_region() {
        let mut gfx = MockGfx::new();
        let descriptors = DescriptorBindingManager::new(&mut gfx, &RendererConfig::default()).unwrap();
        gfx.clear_events();
        let globals = GlobalBindings::new(&mut gfx, &descriptors, 2).unwrap();

        let offsets = gfx
            .events()
            .iter()
            .filter_map(|e| match e {
                GfxEvent::UpdateDescriptorSets { writes } => Some(writes[0]),
                _ => None,
            })
            .map(|w| match w.resource {
                GfxDescriptorResource::UniformBuffer { offset, .. } => (w.set, offset),
                _ => panic!("global set only holds a uniform buffer"),
            })
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![(globals.set(0), 0), (globals.set(1), 256)]);

        let uniforms = GlobalUniforms::new(
            glam::Mat4::from_translation(glam::vec3(0.0, 0.0, -5.0)),
            glam::Mat4::IDENTITY,
            glam::vec3(0.0, 0.0, 5.0),
            vk::Extent2D { width: 800, height: 600 },
        );
        globals.update(&mut gfx, 1, &uniforms).unwrap();
        let region = &gfx.buffer_contents(globals.buffer().buffer())[256..256 + size_of::<GlobalUniforms>()];
        let read_back: GlobalUniforms = bytemuck::pod_read_unaligned(region);
        assert_eq!(read_back.camera_position, glam::vec4(0.0, 0.0, 5.0, 1.0));
        assert_eq!(read_back.viewport.x, 800.0);
    }
}

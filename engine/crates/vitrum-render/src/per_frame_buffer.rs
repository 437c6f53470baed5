use vitrum_gfx::{
    GfxBufferHandle, GfxError, GfxResources, GfxResult,
    resources::buffer::{GfxBufferDesc, align_up},
    vk,
};

/// 一个 host visible 的 uniform buffer，内部按 frame slot 划分为 K 个对齐的区域
///
/// CPU 只写入当前 slot 的区域，其他 slot 的区域可能正在被 GPU 读取
pub struct SlotRegionBuffer {
    buffer: GfxBufferHandle,
    /// 每个区域的步长，按照 `min_uniform_buffer_offset_alignment` 对齐
    stride: vk::DeviceSize,
    data_size: vk::DeviceSize,
    slot_count: usize,
}

// new & init
impl SlotRegionBuffer {
    pub fn new(
        gfx: &mut impl GfxResources,
        data_size: vk::DeviceSize,
        slot_count: usize,
        name: &str,
    ) -> GfxResult<Self> {
        let stride = align_up(data_size, gfx.limits().min_uniform_buffer_offset_alignment);
        let buffer = gfx.create_buffer(&GfxBufferDesc::uniform(stride * slot_count as vk::DeviceSize), name)?;
        Ok(Self {
            buffer,
            stride,
            data_size,
            slot_count,
        })
    }
}

// tools
impl SlotRegionBuffer {
    /// 写入 `slot` 对应的区域
    pub fn write(&self, gfx: &mut impl GfxResources, slot: usize, data: &[u8]) -> GfxResult<()> {
        GfxError::check_range("slot regions", slot as vk::DeviceSize, 1, self.slot_count as vk::DeviceSize)?;
        GfxError::check_range("slot region", 0, data.len() as vk::DeviceSize, self.data_size)?;
        gfx.write_buffer(self.buffer, self.offset(slot), data)
    }

    /// 所有 slot 写入相同的内容，只能在没有帧在飞行时使用
    pub fn write_all(&self, gfx: &mut impl GfxResources, data: &[u8]) -> GfxResult<()> {
        for slot in 0..self.slot_count {
            self.write(gfx, slot, data)?;
        }
        Ok(())
    }
}

// getters
impl SlotRegionBuffer {
    #[inline]
    pub fn buffer(&self) -> GfxBufferHandle {
        self.buffer
    }
    #[inline]
    pub fn offset(&self, slot: usize) -> vk::DeviceSize {
        self.stride * slot as vk::DeviceSize
    }
    #[inline]
    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }
    /// 绑定到 descriptor 时的 range
    #[inline]
    pub fn range(&self) -> vk::DeviceSize {
        self.data_size
    }
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }
}

// destroy
impl SlotRegionBuffer {
    pub fn destroy(self, gfx: &mut impl GfxResources) {
        gfx.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::mock::{GfxEvent, MockGfx};

    use super::*;

    #[test]
    fn test_regions_are_aligned_and_disjoint() {
        let mut gfx = MockGfx::new();
        let buffer = SlotRegionBuffer::new(&mut gfx, 100, 3, "test").unwrap();
        assert_eq!(buffer.stride(), 256);
        assert_eq!(gfx.buffer_desc(buffer.buffer()).size, 768);

        buffer.write(&mut gfx, 1, &[7u8; 100]).unwrap();
        let contents = gfx.buffer_contents(buffer.buffer());
        assert!(contents[..256].iter().all(|b| *b == 0));
        assert!(contents[256..356].iter().all(|b| *b == 7));
        assert!(contents[356..].iter().all(|b| *b == 0));
        assert_eq!(
            gfx.count(|e| matches!(e, GfxEvent::WriteBuffer { offset: 256, len: 100, .. })),
            1
        );
    }

    #[test]
    fn test_write_outside_regions() {
        let mut gfx = MockGfx::new();
        let buffer = SlotRegionBuffer::new(&mut gfx, 16, 2, "test").unwrap();
        assert!(matches!(
            buffer.write(&mut gfx, 2, &[0u8; 16]),
            Err(GfxError::OutOfRange { what: "slot regions", .. })
        ));
        // 超出 data_size 的写入会覆盖下一个 slot 的区域
        assert!(matches!(
            buffer.write(&mut gfx, 0, &[0u8; 17]),
            Err(GfxError::OutOfRange { what: "slot region", len: 17, size: 16, .. })
        ));
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::WriteBuffer { .. })), 0);
    }
}

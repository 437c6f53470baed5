use ash::vk;

/// buffer 内存放在哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxMemoryLocation {
    /// 仅 GPU 可见，写入需要经过 staging buffer
    DeviceLocal,
    /// CPU 可见，创建时持久映射，写入直接 memcpy
    HostVisible,
}

#[derive(Debug, Clone, Copy)]
pub struct GfxBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: GfxMemoryLocation,
}

// new & init
impl GfxBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, location: GfxMemoryLocation) -> Self {
        Self { size, usage, location }
    }

    /// 逐帧更新的 uniform buffer
    #[inline]
    pub fn uniform(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::UNIFORM_BUFFER, GfxMemoryLocation::HostVisible)
    }

    /// 静态的 vertex buffer，写入时会经过 staging buffer
    #[inline]
    pub fn vertex(size: vk::DeviceSize) -> Self {
        Self::new(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            GfxMemoryLocation::DeviceLocal,
        )
    }

    #[inline]
    pub fn index(size: vk::DeviceSize) -> Self {
        Self::new(
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            GfxMemoryLocation::DeviceLocal,
        )
    }
}

/// 将 `value` 向上对齐到 `align`，align 为 0 时原样返回
#[inline]
pub fn align_up(value: vk::DeviceSize, align: vk::DeviceSize) -> vk::DeviceSize {
    if align == 0 { value } else { value.div_ceil(align) * align }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(13, 0), 13);
    }
}

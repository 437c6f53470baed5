use std::path::Path;

use slotmap::SlotMap;
use vitrum_gfx::{
    GfxImageHandle, GfxImageViewHandle, GfxResources, GfxSamplerHandle,
    resources::{
        image::{GfxImageDesc, GfxImageViewDesc},
        sampler::GfxSamplerDesc,
    },
    vk,
};
use vitrum_render::material::material_desc::TextureRef;

use crate::error::{SceneError, SceneResult};

slotmap::new_key_type! {
    pub struct TextureHandle;
}

/// 已经上传到 GPU 的一张 RGBA8 贴图
pub struct Texture {
    name: String,
    image: GfxImageHandle,
    view: GfxImageViewHandle,
    extent: vk::Extent2D,
    srgb: bool,
}

// getters
impl Texture {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn view(&self) -> GfxImageViewHandle {
        self.view
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    #[inline]
    pub fn is_srgb(&self) -> bool {
        self.srgb
    }
}

/// 场景使用的贴图和采样器
///
/// 颜色贴图（base color, emissive）使用 sRGB 格式，其他数据贴图使用 UNORM
pub struct TextureStore {
    textures: SlotMap<TextureHandle, Texture>,
    samplers: Vec<GfxSamplerHandle>,
    default_sampler: GfxSamplerHandle,
}

// new & init
impl TextureStore {
    pub fn new(gfx: &mut impl GfxResources) -> SceneResult<Self> {
        let default_sampler = gfx.create_sampler(&GfxSamplerDesc::linear_repeat(), "scene-default-sampler")?;
        Ok(Self {
            textures: SlotMap::with_key(),
            samplers: Vec::new(),
            default_sampler,
        })
    }
}

// getters
impl TextureStore {
    #[inline]
    pub fn get(&self, texture: TextureHandle) -> Option<&Texture> {
        self.textures.get(texture)
    }

    #[inline]
    pub fn default_sampler(&self) -> GfxSamplerHandle {
        self.default_sampler
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// sampler 为 None 时材质系统会使用它自己的默认采样器
    pub fn texture_ref(&self, texture: TextureHandle, sampler: Option<GfxSamplerHandle>) -> Option<TextureRef> {
        self.textures.get(texture).map(|t| TextureRef { view: t.view, sampler })
    }
}

// tools
impl TextureStore {
    /// `pixels` 为紧密排列的 RGBA8
    pub fn upload_rgba8(
        &mut self,
        gfx: &mut impl GfxResources,
        name: &str,
        extent: vk::Extent2D,
        pixels: &[u8],
        srgb: bool,
    ) -> SceneResult<TextureHandle> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected || expected == 0 {
            return Err(SceneError::BadImageData {
                width: extent.width,
                height: extent.height,
                len: pixels.len(),
            });
        }

        let format = if srgb { vk::Format::R8G8B8A8_SRGB } else { vk::Format::R8G8B8A8_UNORM };
        let image = gfx.create_image(
            &GfxImageDesc::new_image_2d(
                extent,
                format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ),
            name,
        )?;
        let view = gfx
            .upload_image(image, pixels)
            .and_then(|_| gfx.create_image_view(image, &GfxImageViewDesc::color(), name));
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                gfx.destroy_image(image);
                return Err(e.into());
            }
        };

        log::debug!("texture uploaded: {} {}x{} srgb={}", name, extent.width, extent.height, srgb);
        Ok(self.textures.insert(Texture {
            name: name.to_string(),
            image,
            view,
            extent,
            srgb,
        }))
    }

    /// 通过 image crate 读取任意格式的图片文件，统一转换为 RGBA8
    pub fn load_file(&mut self, gfx: &mut impl GfxResources, path: &Path, srgb: bool) -> SceneResult<TextureHandle> {
        let rgba = image::open(path)?.to_rgba8();
        let extent = vk::Extent2D {
            width: rgba.width(),
            height: rgba.height(),
        };
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.upload_rgba8(gfx, &name, extent, rgba.as_raw(), srgb)
    }

    /// 额外创建的 sampler 由 store 持有，destroy 时一起释放
    pub fn create_sampler(&mut self, gfx: &mut impl GfxResources, desc: &GfxSamplerDesc) -> SceneResult<GfxSamplerHandle> {
        let name = format!("scene-sampler-{}", self.samplers.len());
        let sampler = gfx.create_sampler(desc, &name)?;
        self.samplers.push(sampler);
        Ok(sampler)
    }
}

// destroy
impl TextureStore {
    pub fn destroy(self, gfx: &mut impl GfxResources) {
        for (_, texture) in self.textures {
            gfx.destroy_image_view(texture.view);
            gfx.destroy_image(texture.image);
        }
        for sampler in self.samplers {
            gfx.destroy_sampler(sampler);
        }
        gfx.destroy_sampler(self.default_sampler);
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::mock::{GfxEvent, MockGfx};

    use super::*;

    #[test]
    fn test_upload_and_destroy() {
        let mut gfx = MockGfx::new();
        let mut store = TextureStore::new(&mut gfx).unwrap();
        let extent = vk::Extent2D { width: 2, height: 2 };

        let color = store.upload_rgba8(&mut gfx, "color", extent, &[255; 16], true).unwrap();
        let data = store.upload_rgba8(&mut gfx, "data", extent, &[128; 16], false).unwrap();
        store.create_sampler(&mut gfx, &GfxSamplerDesc::nearest_clamp()).unwrap();

        assert!(store.get(color).unwrap().is_srgb());
        assert!(!store.get(data).unwrap().is_srgb());
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::UploadImage { .. })), 2);

        let texture_ref = store.texture_ref(color, None).unwrap();
        assert_eq!(texture_ref.view, store.get(color).unwrap().view());
        assert_eq!(texture_ref.sampler, None);

        store.destroy(&mut gfx);
        let stats = gfx.resource_stats();
        assert_eq!((stats.images, stats.image_views, stats.samplers), (0, 0, 0));
    }

    #[test]
    fn test_reject_bad_pixels() {
        let mut gfx = MockGfx::new();
        let mut store = TextureStore::new(&mut gfx).unwrap();
        let result = store.upload_rgba8(&mut gfx, "bad", vk::Extent2D { width: 2, height: 2 }, &[0; 12], true);
        assert!(matches!(result, Err(SceneError::BadImageData { len: 12, .. })));
        assert_eq!(gfx.resource_stats().images, 0);
        store.destroy(&mut gfx);
    }
}

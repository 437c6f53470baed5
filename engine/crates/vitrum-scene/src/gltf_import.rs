//! 导入 glTF 模型
//!
//! gltf 的格式，参考 https://www.khronos.org/files/gltf20-reference-guide.pdf
//!
//! 支持 mesh、PBR 材质以及透射相关的扩展
//! （`KHR_materials_transmission`，`KHR_materials_volume`，`KHR_materials_ior`），
//! 不支持 skin 和动画。

use std::{collections::HashMap, path::Path};

use itertools::Itertools;
use vitrum_gfx::{GfxResources, GfxSamplerHandle, resources::sampler::GfxSamplerDesc, vk};
use vitrum_render::{
    material::{
        material_desc::{AlphaMode, MaterialDesc, TextureRef, VolumeDesc},
        material_system::MaterialHandle,
    },
    vertex::MeshVertex,
};

use crate::{
    error::{SceneError, SceneResult},
    mesh_store::{MeshHandle, MeshStore, PrimitiveData},
    scene_graph::{NodeHandle, NodeKind, SceneGraph},
    texture_store::{TextureHandle, TextureStore},
};

/// 导入的目标容器
pub struct SceneTargets<'a> {
    pub scene: &'a mut SceneGraph,
    pub meshes: &'a mut MeshStore,
    pub textures: &'a mut TextureStore,
}

/// 一次导入产生的对象，按照 glTF 中的索引排列
#[derive(Debug, Default)]
pub struct GltfImport {
    pub roots: Vec<NodeHandle>,
    pub meshes: Vec<MeshHandle>,
    pub materials: Vec<MaterialHandle>,
    /// 没有指定材质的 primitive 使用，仅在需要时创建
    pub default_material: Option<MaterialHandle>,
}

pub struct GltfLoader {
    doc: gltf::Document,
    buffers: Vec<gltf::buffer::Data>,
    images: Vec<gltf::image::Data>,
}

// new & init
impl GltfLoader {
    pub fn from_file(path: &Path) -> SceneResult<Self> {
        let (doc, buffers, images) = gltf::import(path)?;
        log::info!("gltf loaded: {}", path.display());
        Ok(Self { doc, buffers, images })
    }

    /// `.glb` 或者 buffer 全部内嵌的 `.gltf`
    pub fn from_slice(bytes: &[u8]) -> SceneResult<Self> {
        let (doc, buffers, images) = gltf::import_slice(bytes)?;
        Ok(Self { doc, buffers, images })
    }
}

// getters
impl GltfLoader {
    #[inline]
    pub fn document(&self) -> &gltf::Document {
        &self.doc
    }
}

/// 导入过程中的状态，同一张图片和 sampler 只会创建一次
struct ImportContext<'a, 'b, G> {
    loader: &'a GltfLoader,
    gfx: &'a mut G,
    targets: &'a mut SceneTargets<'b>,
    textures: HashMap<(usize, bool), TextureHandle>,
    samplers: HashMap<usize, GfxSamplerHandle>,
}

// tools
impl GltfLoader {
    /// 把默认场景（没有时使用 0 号场景）导入到 `targets` 中
    ///
    /// 材质通过 `create_material` 交给材质系统创建
    pub fn load_into<G, F>(
        &self,
        gfx: &mut G,
        targets: &mut SceneTargets,
        mut create_material: F,
    ) -> SceneResult<GltfImport>
    where
        G: GfxResources,
        F: FnMut(&mut G, &MaterialDesc) -> SceneResult<MaterialHandle>,
    {
        let _span = vitrum_render::profile_span!("gltf_import");

        let mut ctx = ImportContext {
            loader: self,
            gfx,
            targets,
            textures: HashMap::new(),
            samplers: HashMap::new(),
        };
        let mut import = GltfImport::default();

        for material in self.doc.materials() {
            let desc = ctx.material_desc(&material)?;
            import.materials.push(create_material(ctx.gfx, &desc)?);
        }

        for mesh in self.doc.meshes() {
            let mut primitives = Vec::new();
            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    log::warn!("gltf mesh {} has a non-triangle primitive, skipped", mesh.index());
                    continue;
                }

                let material = match primitive.material().index() {
                    Some(index) => *import.materials.get(index).ok_or(SceneError::BadIndex {
                        kind: "material",
                        index,
                    })?,
                    None => match import.default_material {
                        Some(material) => material,
                        None => {
                            let desc = ctx.material_desc(&primitive.material())?;
                            let material = create_material(ctx.gfx, &desc)?;
                            import.default_material = Some(material);
                            material
                        }
                    },
                };
                primitives.push(self.primitive_data(&mesh, &primitive, material)?);
            }

            let name = mesh.name().map_or_else(|| format!("mesh-{}", mesh.index()), str::to_string);
            import.meshes.push(ctx.targets.meshes.add_mesh(name, primitives)?);
        }

        // 读取默认场景，否则读取 0 号场景
        match self.doc.default_scene().or_else(|| self.doc.scenes().next()) {
            Some(scene) => {
                for node in scene.nodes() {
                    import.roots.push(self.process_node(ctx.targets.scene, &node, None, &import.meshes)?);
                }
            }
            None => log::warn!("gltf has no scene, only meshes and materials are imported"),
        }

        log::info!(
            "gltf imported: {} roots, {} meshes, {} materials, {} textures",
            import.roots.len(),
            import.meshes.len(),
            import.materials.len(),
            ctx.textures.len()
        );
        Ok(import)
    }

    /// gltf 的一个 node 可以包含 transform，mesh，camera 等信息，这里只关心前两者
    fn process_node(
        &self,
        scene: &mut SceneGraph,
        node: &gltf::Node,
        parent: Option<NodeHandle>,
        meshes: &[MeshHandle],
    ) -> SceneResult<NodeHandle> {
        // gltf 这个库使用 column major 的方式存放矩阵（每个元素相当于矩阵的一列）
        let local = glam::Mat4::from_cols_array_2d(&node.transform().matrix());

        let kind = match node.mesh() {
            Some(mesh) => NodeKind::Mesh {
                mesh: *meshes.get(mesh.index()).ok_or(SceneError::BadIndex {
                    kind: "mesh",
                    index: mesh.index(),
                })?,
            },
            None => NodeKind::Empty,
        };
        let name = node.name().map_or_else(|| format!("node-{}", node.index()), str::to_string);
        let handle = scene.add_node(name, kind, local, parent)?;

        for child in node.children() {
            self.process_node(scene, &child, Some(handle), meshes)?;
        }
        Ok(handle)
    }

    fn primitive_data(
        &self,
        mesh: &gltf::Mesh,
        primitive: &gltf::Primitive,
        material: MaterialHandle,
    ) -> SceneResult<PrimitiveData> {
        const DEFAULT_NORMAL: [f32; 3] = [0.0, 0.0, 1.0];
        const DEFAULT_UV: [f32; 2] = [0.0; 2];

        let reader = primitive.reader(|buffer| self.buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions = reader
            .read_positions()
            .ok_or(SceneError::MissingPositions {
                mesh: mesh.index(),
                primitive: primitive.index(),
            })?
            .collect_vec();
        let vertex_cnt = positions.len();

        let normals = reader
            .read_normals()
            .map_or_else(|| vec![DEFAULT_NORMAL; vertex_cnt], Iterator::collect);
        let uvs = reader
            .read_tex_coords(0)
            .map_or_else(|| vec![DEFAULT_UV; vertex_cnt], |uv| uv.into_f32().collect());

        let vertices = itertools::izip!(positions, normals, uvs)
            .map(|(position, normal, uv)| MeshVertex { position, normal, uv })
            .collect_vec();

        // 没有 index 时按照顺序绘制
        let indices = reader
            .read_indices()
            .map_or_else(|| (0..vertex_cnt as u32).collect(), |indices| indices.into_u32().collect());

        Ok(PrimitiveData {
            vertices,
            indices,
            material,
        })
    }
}

impl<G: GfxResources> ImportContext<'_, '_, G> {
    /// gltf 中一个 material 的组成
    /// ```json
    /// {
    ///     "pbrMetallicRoughness": {
    ///         "baseColorTexture": {},
    ///         "baseColorFactor": [f32; 4],
    ///         "metallicRoughnessTexture": {},
    ///         "metallicFactor": f32,
    ///         "roughnessFactor": f32,
    ///     },
    ///     "normalTexture": {},
    ///     "occlusionTexture": {},
    ///     "emissiveFactor": [f32; 3],
    ///     "extensions": {
    ///         "KHR_materials_transmission": {},
    ///         "KHR_materials_volume": {},
    ///         "KHR_materials_ior": {},
    ///     }
    /// }
    /// ```
    fn material_desc(&mut self, material: &gltf::Material) -> SceneResult<MaterialDesc> {
        let pbr = material.pbr_metallic_roughness();

        // base color 以 sRGB 编码，其余贴图都是线性的
        let base_color_texture = pbr
            .base_color_texture()
            .map(|info| self.texture(&info.texture(), info.tex_coord(), true))
            .transpose()?;
        // metallic 位于 Blue 通道；Roughness 位于 Green 通道
        let metallic_roughness_texture = pbr
            .metallic_roughness_texture()
            .map(|info| self.texture(&info.texture(), info.tex_coord(), false))
            .transpose()?;
        let normal = material.normal_texture();
        let normal_texture = normal
            .as_ref()
            .map(|n| self.texture(&n.texture(), n.tex_coord(), false))
            .transpose()?;
        let occlusion = material.occlusion_texture();
        let occlusion_texture = occlusion
            .as_ref()
            .map(|o| self.texture(&o.texture(), o.tex_coord(), false))
            .transpose()?;

        let transmission = material.transmission();
        let transmission_texture = transmission
            .as_ref()
            .and_then(|t| t.transmission_texture())
            .map(|info| self.texture(&info.texture(), info.tex_coord(), false))
            .transpose()?;

        let volume = match material.volume() {
            Some(volume) => Some(VolumeDesc {
                thickness_factor: volume.thickness_factor(),
                thickness_texture: volume
                    .thickness_texture()
                    .map(|info| self.texture(&info.texture(), info.tex_coord(), false))
                    .transpose()?,
                attenuation_distance: volume.attenuation_distance(),
                attenuation_color: volume.attenuation_color(),
            }),
            None => None,
        };

        let defaults = MaterialDesc::default();
        Ok(MaterialDesc {
            name: match (material.name(), material.index()) {
                (Some(name), _) => name.to_string(),
                (None, Some(index)) => format!("material-{}", index),
                (None, None) => "material-default".to_string(),
            },
            base_color_factor: pbr.base_color_factor(),
            base_color_texture,
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            metallic_roughness_texture,
            normal_scale: normal.as_ref().map_or(defaults.normal_scale, |n| n.scale()),
            normal_texture,
            occlusion_strength: occlusion.as_ref().map_or(defaults.occlusion_strength, |o| o.strength()),
            occlusion_texture,
            emissive_factor: material.emissive_factor(),
            alpha_mode: match material.alpha_mode() {
                gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
                gltf::material::AlphaMode::Mask => AlphaMode::Mask,
                gltf::material::AlphaMode::Blend => AlphaMode::Blend,
            },
            alpha_cutoff: material.alpha_cutoff().unwrap_or(defaults.alpha_cutoff),
            double_sided: material.double_sided(),
            transmission_factor: transmission.as_ref().map_or(0.0, |t| t.transmission_factor()),
            transmission_texture,
            volume,
            ior: material.ior().unwrap_or(defaults.ior),
        })
    }

    /// 注 只支持 TexCoord == 0 的 texture
    fn texture(&mut self, texture: &gltf::Texture, tex_coord: u32, srgb: bool) -> SceneResult<TextureRef> {
        if tex_coord != 0 {
            log::warn!("gltf texture {} uses TEXCOORD_{}, sampled with TEXCOORD_0", texture.index(), tex_coord);
        }

        let source = texture.source().index();
        let handle = match self.textures.get(&(source, srgb)) {
            Some(&handle) => handle,
            None => {
                let data = self.loader.images.get(source).ok_or(SceneError::BadIndex {
                    kind: "image",
                    index: source,
                })?;
                let pixels = to_rgba8(data)?;
                let name = texture
                    .source()
                    .name()
                    .map_or_else(|| format!("gltf-image-{}", source), str::to_string);
                let extent = vk::Extent2D {
                    width: data.width,
                    height: data.height,
                };
                let handle = self.targets.textures.upload_rgba8(self.gfx, &name, extent, &pixels, srgb)?;
                self.textures.insert((source, srgb), handle);
                handle
            }
        };

        // 没有指定 sampler 时使用材质系统的默认采样器
        let sampler = match texture.sampler().index() {
            Some(index) => Some(match self.samplers.get(&index) {
                Some(&sampler) => sampler,
                None => {
                    let desc = to_sampler_desc(&texture.sampler());
                    let sampler = self.targets.textures.create_sampler(self.gfx, &desc)?;
                    self.samplers.insert(index, sampler);
                    sampler
                }
            }),
            None => None,
        };

        self.targets
            .textures
            .texture_ref(handle, sampler)
            .ok_or(SceneError::BadIndex {
                kind: "texture",
                index: texture.index(),
            })
    }
}

/// 把 gltf 解码出来的各种像素格式统一转换为 RGBA8
fn to_rgba8(data: &gltf::image::Data) -> SceneResult<Vec<u8>> {
    use gltf::image::Format;
    use image::{DynamicImage, ImageBuffer};

    let (width, height) = (data.width, data.height);
    let bytes_per_pixel = match data.format {
        Format::R8 => 1,
        Format::R8G8 | Format::R16 => 2,
        Format::R8G8B8 => 3,
        Format::R8G8B8A8 | Format::R16G16 => 4,
        Format::R16G16B16 => 6,
        Format::R16G16B16A16 => 8,
        Format::R32G32B32FLOAT => 12,
        Format::R32G32B32A32FLOAT => 16,
    };
    let bad = || SceneError::BadImageData {
        width,
        height,
        len: data.pixels.len(),
    };
    if data.pixels.len() != width as usize * height as usize * bytes_per_pixel {
        return Err(bad());
    }

    let u16s = || data.pixels.chunks_exact(2).map(|c| u16::from_ne_bytes([c[0], c[1]])).collect_vec();
    let f32s = || {
        data.pixels
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect_vec()
    };

    let image = match data.format {
        Format::R8G8B8A8 => return Ok(data.pixels.clone()),
        // 双通道的数据贴图不能当作 luma + alpha 处理
        Format::R8G8 => return Ok(data.pixels.chunks_exact(2).flat_map(|rg| [rg[0], rg[1], 0, 255]).collect()),
        Format::R16G16 => {
            return Ok(u16s().chunks_exact(2).flat_map(|rg| [(rg[0] >> 8) as u8, (rg[1] >> 8) as u8, 0, 255]).collect());
        }
        Format::R8 => ImageBuffer::from_raw(width, height, data.pixels.clone()).map(DynamicImage::ImageLuma8),
        Format::R8G8B8 => ImageBuffer::from_raw(width, height, data.pixels.clone()).map(DynamicImage::ImageRgb8),
        Format::R16 => ImageBuffer::from_raw(width, height, u16s()).map(DynamicImage::ImageLuma16),
        Format::R16G16B16 => ImageBuffer::from_raw(width, height, u16s()).map(DynamicImage::ImageRgb16),
        Format::R16G16B16A16 => ImageBuffer::from_raw(width, height, u16s()).map(DynamicImage::ImageRgba16),
        Format::R32G32B32FLOAT => ImageBuffer::from_raw(width, height, f32s()).map(DynamicImage::ImageRgb32F),
        Format::R32G32B32A32FLOAT => ImageBuffer::from_raw(width, height, f32s()).map(DynamicImage::ImageRgba32F),
    };
    image.map(|image| image.to_rgba8().into_raw()).ok_or_else(bad)
}

/// 将 gltf 文件中的 sampler 参数（OpenGL 风格）转换为 vulkan 格式
///
/// gltf 中的 min 对应着 vulkan 中的 min filter 以及 mipmap mode。
/// 两个方向的 wrap mode 只保留 `wrap_s`
fn to_sampler_desc(sampler: &gltf::texture::Sampler) -> GfxSamplerDesc {
    use gltf::texture::{MagFilter, MinFilter, WrappingMode};
    use vk::{Filter, SamplerMipmapMode};

    let default = GfxSamplerDesc::linear_repeat();

    // 注：LinearMipmapNearest 表示 level 内 linear，level 之间 nearest
    let (min_filter, mipmap_mode) = sampler
        .min_filter()
        .map_or((default.min_filter, default.mipmap_mode), |filter| match filter {
            MinFilter::Nearest => (Filter::NEAREST, default.mipmap_mode),
            MinFilter::Linear => (Filter::LINEAR, default.mipmap_mode),
            MinFilter::NearestMipmapNearest => (Filter::NEAREST, SamplerMipmapMode::NEAREST),
            MinFilter::LinearMipmapNearest => (Filter::LINEAR, SamplerMipmapMode::NEAREST),
            MinFilter::NearestMipmapLinear => (Filter::NEAREST, SamplerMipmapMode::LINEAR),
            MinFilter::LinearMipmapLinear => (Filter::LINEAR, SamplerMipmapMode::LINEAR),
        });
    let mag_filter = sampler.mag_filter().map_or(default.mag_filter, |filter| match filter {
        MagFilter::Nearest => Filter::NEAREST,
        MagFilter::Linear => Filter::LINEAR,
    });
    let address_mode = match sampler.wrap_s() {
        WrappingMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        WrappingMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        WrappingMode::Repeat => vk::SamplerAddressMode::REPEAT,
    };

    GfxSamplerDesc {
        mag_filter,
        min_filter,
        mipmap_mode,
        address_mode,
        ..default
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use slotmap::SlotMap;
    use vitrum_gfx::mock::{GfxEvent, MockGfx};
    use vitrum_render::material::category::MaterialCategory;

    use super::*;

    /// 生成一个 2x2 的 png
    fn png_bytes() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 100, 50, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    /// 一个三角形被两个节点引用：玻璃材质的 primitive 和没有材质的 primitive
    fn glass_glb() -> Vec<u8> {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let indices: [u32; 3] = [0, 1, 2];
        let png = png_bytes();

        let mut bin = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&positions));
        bin.extend_from_slice(bytemuck::cast_slice(&indices));
        bin.extend_from_slice(&png);
        let buffer_len = bin.len();

        let json = serde_json::json!({
            "asset": { "version": "2.0" },
            "extensionsUsed": ["KHR_materials_transmission", "KHR_materials_volume", "KHR_materials_ior"],
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "name": "root", "translation": [1.0, 0.0, 0.0], "children": [1] },
                { "name": "glass", "mesh": 0, "translation": [0.0, 2.0, 0.0] }
            ],
            "meshes": [{
                "name": "tri",
                "primitives": [
                    { "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 },
                    { "attributes": { "POSITION": 0 } }
                ]
            }],
            "materials": [{
                "name": "glass",
                "pbrMetallicRoughness": {
                    "baseColorTexture": { "index": 0 },
                    "metallicRoughnessTexture": { "index": 0 },
                    "roughnessFactor": 0.1
                },
                "alphaMode": "BLEND",
                "extensions": {
                    "KHR_materials_transmission": { "transmissionFactor": 0.8 },
                    "KHR_materials_ior": { "ior": 1.33 },
                    "KHR_materials_volume": {
                        "thicknessFactor": 0.5,
                        "attenuationDistance": 2.0,
                        "attenuationColor": [1.0, 0.5, 0.5]
                    }
                }
            }],
            "textures": [{ "source": 0, "sampler": 0 }],
            "samplers": [{ "magFilter": 9728, "minFilter": 9987, "wrapS": 33071, "wrapT": 33071 }],
            "images": [{ "bufferView": 2, "mimeType": "image/png" }],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": 5125, "count": 3, "type": "SCALAR" }
            ],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 12 },
                { "buffer": 0, "byteOffset": 48, "byteLength": png.len() }
            ],
            "buffers": [{ "byteLength": buffer_len }]
        });

        let mut json = serde_json::to_vec(&json).unwrap();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        while bin.len() % 4 != 0 {
            bin.push(0);
        }

        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"JSON");
        glb.extend_from_slice(&json);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"BIN\0");
        glb.extend_from_slice(&bin);
        glb
    }

    #[test]
    fn test_import_glass_scene() {
        let loader = GltfLoader::from_slice(&glass_glb()).unwrap();
        let mut gfx = MockGfx::new();
        let mut scene = SceneGraph::new();
        let mut meshes = MeshStore::new();
        let mut textures = TextureStore::new(&mut gfx).unwrap();
        let mut descs = SlotMap::<MaterialHandle, MaterialDesc>::with_key();

        let import = loader
            .load_into(
                &mut gfx,
                &mut SceneTargets {
                    scene: &mut scene,
                    meshes: &mut meshes,
                    textures: &mut textures,
                },
                |_, desc| Ok(descs.insert(desc.clone())),
            )
            .unwrap();

        // 材质
        assert_eq!(import.materials.len(), 1);
        let default_material = import.default_material.unwrap();
        assert_eq!(descs.len(), 2);
        let glass = &descs[import.materials[0]];
        assert_eq!(glass.name, "glass");
        assert_eq!(glass.alpha_mode, AlphaMode::Blend);
        assert_eq!(glass.transmission_factor, 0.8);
        assert_eq!(glass.ior, 1.33);
        assert_eq!(glass.roughness_factor, 0.1);
        let volume = glass.volume.unwrap();
        assert_eq!(volume.thickness_factor, 0.5);
        assert_eq!(volume.attenuation_distance, 2.0);
        assert_eq!(volume.attenuation_color, [1.0, 0.5, 0.5]);
        assert_eq!(MaterialCategory::classify(glass), MaterialCategory::Transmissive);
        assert_eq!(MaterialCategory::classify(&descs[default_material]), MaterialCategory::Opaque);

        // 同一张图片以 sRGB 和线性各上传一次，sampler 只创建一次
        let base_color = glass.base_color_texture.unwrap();
        let metallic_roughness = glass.metallic_roughness_texture.unwrap();
        assert_ne!(base_color.view, metallic_roughness.view);
        assert_eq!(base_color.sampler, metallic_roughness.sampler);
        assert!(base_color.sampler.is_some());
        assert_eq!(textures.texture_count(), 2);
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::UploadImage { .. })), 2);

        // mesh：没有 index 的 primitive 按顺序生成 index
        let mesh = meshes.get(import.meshes[0]).unwrap();
        assert_eq!(mesh.submeshes.len(), 2);
        assert_eq!(mesh.submeshes[0].material, import.materials[0]);
        assert_eq!(mesh.submeshes[1].material, default_material);
        assert_eq!(mesh.submeshes[1].vertex_offset, 3);
        assert_eq!(meshes.vertex_count(), 6);
        assert_eq!(meshes.index_count(), 6);

        // 节点
        assert_eq!(import.roots.len(), 1);
        assert_eq!(scene.node_count(), 2);
        let glass_node = scene.get(import.roots[0]).unwrap().children()[0];
        assert_eq!(scene.get(glass_node).unwrap().kind, NodeKind::Mesh { mesh: import.meshes[0] });
        let world = scene.world_transform(glass_node).unwrap();
        assert_eq!(world.transform_point3(glam::Vec3::ZERO), glam::vec3(1.0, 2.0, 0.0));

        textures.destroy(&mut gfx);
        let stats = gfx.resource_stats();
        assert_eq!((stats.images, stats.image_views, stats.samplers), (0, 0, 0));
    }

    #[test]
    fn test_to_rgba8() {
        let rgb = gltf::image::Data {
            pixels: vec![1, 2, 3, 4, 5, 6],
            format: gltf::image::Format::R8G8B8,
            width: 2,
            height: 1,
        };
        assert_eq!(to_rgba8(&rgb).unwrap(), vec![1, 2, 3, 255, 4, 5, 6, 255]);

        let rg = gltf::image::Data {
            pixels: vec![7, 8],
            format: gltf::image::Format::R8G8,
            width: 1,
            height: 1,
        };
        assert_eq!(to_rgba8(&rg).unwrap(), vec![7, 8, 0, 255]);

        let truncated = gltf::image::Data {
            pixels: vec![1, 2, 3],
            format: gltf::image::Format::R8G8B8A8,
            width: 1,
            height: 1,
        };
        assert!(matches!(to_rgba8(&truncated), Err(SceneError::BadImageData { len: 3, .. })));
    }

    #[test]
    fn test_sampler_conversion() {
        let loader = GltfLoader::from_slice(&glass_glb()).unwrap();
        let sampler = loader.document().samplers().next().unwrap();
        let desc = to_sampler_desc(&sampler);
        assert_eq!(desc.mag_filter, vk::Filter::NEAREST);
        assert_eq!(desc.min_filter, vk::Filter::LINEAR);
        assert_eq!(desc.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(desc.address_mode, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}

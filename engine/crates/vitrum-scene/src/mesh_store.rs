//! 所有 mesh 共享一个 vertex buffer 和一个 u32 index buffer
//!
//! 每个 submesh 只记录自己在共享 buffer 中的范围，draw item 直接引用这个范围。

use slotmap::SlotMap;
use vitrum_gfx::{GfxResources, resources::buffer::GfxBufferDesc};
use vitrum_render::{draw_context::MeshBuffers, material::material_system::MaterialHandle, vertex::MeshVertex};

use crate::error::{SceneError, SceneResult};

slotmap::new_key_type! {
    pub struct MeshHandle;
}

/// 共享 buffer 中的一段 index，对应 glTF 的一个 primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub material: MaterialHandle,
}

impl Submesh {
    /// 从共享数组中的位置构造，偏移无法用 draw 参数表示时报错
    fn at(first_index: usize, index_count: usize, vertex_offset: usize, material: MaterialHandle) -> SceneResult<Self> {
        let overflow = || SceneError::MeshStoreOverflow {
            vertices: vertex_offset,
            indices: first_index.saturating_add(index_count),
        };
        // 最后一个 index 也必须能被 u32 表示
        let end = first_index.checked_add(index_count).ok_or_else(overflow)?;
        u32::try_from(end).map_err(|_| overflow())?;
        Ok(Self {
            first_index: u32::try_from(first_index).map_err(|_| overflow())?,
            index_count: u32::try_from(index_count).map_err(|_| overflow())?,
            vertex_offset: i32::try_from(vertex_offset).map_err(|_| overflow())?,
            material,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub submeshes: Vec<Submesh>,
}

/// 加载阶段的一个 primitive，index 相对于自己的 vertices
pub struct PrimitiveData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub material: MaterialHandle,
}

#[derive(Default)]
pub struct MeshStore {
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
    meshes: SlotMap<MeshHandle, Mesh>,

    /// 上传之后才存在
    buffers: Option<MeshBuffers>,
}

// new & init
impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl MeshStore {
    #[inline]
    pub fn get(&self, mesh: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(mesh)
    }

    #[inline]
    pub fn buffers(&self) -> Option<MeshBuffers> {
        self.buffers
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

// tools
impl MeshStore {
    /// 把 primitive 追加到共享的 vertex/index 数组末尾
    ///
    /// 已经上传的 buffer 不会自动更新，需要再次调用 [`Self::upload`]
    pub fn add_mesh(
        &mut self,
        name: impl Into<String>,
        primitives: impl IntoIterator<Item = PrimitiveData>,
    ) -> SceneResult<MeshHandle> {
        let (vertex_mark, index_mark) = (self.vertices.len(), self.indices.len());
        let submeshes = match self.append_primitives(primitives) {
            Ok(submeshes) => submeshes,
            Err(e) => {
                // 失败的 mesh 不能留下任何数据
                self.vertices.truncate(vertex_mark);
                self.indices.truncate(index_mark);
                return Err(e);
            }
        };

        Ok(self.meshes.insert(Mesh {
            name: name.into(),
            submeshes,
        }))
    }

    fn append_primitives(&mut self, primitives: impl IntoIterator<Item = PrimitiveData>) -> SceneResult<Vec<Submesh>> {
        let mut submeshes = Vec::new();
        for primitive in primitives {
            if let Some(&index) = primitive.indices.iter().find(|&&i| i as usize >= primitive.vertices.len()) {
                return Err(SceneError::IndexOutOfRange {
                    index,
                    vertex_count: primitive.vertices.len(),
                });
            }

            submeshes.push(Submesh::at(
                self.indices.len(),
                primitive.indices.len(),
                self.vertices.len(),
                primitive.material,
            )?);
            self.vertices.extend(primitive.vertices);
            self.indices.extend(primitive.indices);
        }
        Ok(submeshes)
    }

    /// 创建 device local 的 buffer 并写入所有数据，会替换掉之前上传的 buffer
    pub fn upload(&mut self, gfx: &mut impl GfxResources) -> SceneResult<MeshBuffers> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(SceneError::EmptyMeshStore);
        }
        if let Some(old) = self.buffers.take() {
            gfx.destroy_buffer(old.vertex);
            gfx.destroy_buffer(old.index);
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);

        let vertex = gfx.create_buffer(&GfxBufferDesc::vertex(vertex_bytes.len() as u64), "scene-vertex")?;
        let index = match gfx.create_buffer(&GfxBufferDesc::index(index_bytes.len() as u64), "scene-index") {
            Ok(index) => index,
            Err(e) => {
                gfx.destroy_buffer(vertex);
                return Err(e.into());
            }
        };
        let buffers = MeshBuffers { vertex, index };
        // 写入失败时 buffer 也要保存下来，由 destroy 统一释放
        self.buffers = Some(buffers);

        gfx.write_buffer(vertex, 0, vertex_bytes)?;
        gfx.write_buffer(index, 0, index_bytes)?;

        log::info!(
            "mesh store uploaded: {} meshes, {} vertices, {} indices",
            self.meshes.len(),
            self.vertices.len(),
            self.indices.len()
        );
        Ok(buffers)
    }
}

// destroy
impl MeshStore {
    pub fn destroy(self, gfx: &mut impl GfxResources) {
        if let Some(buffers) = self.buffers {
            gfx.destroy_buffer(buffers.vertex);
            gfx.destroy_buffer(buffers.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use vitrum_gfx::mock::{GfxEvent, MockGfx};

    use super::*;

    fn triangle(material: MaterialHandle) -> PrimitiveData {
        let vertex = |x: f32, y: f32| MeshVertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [x, y],
        };
        PrimitiveData {
            vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
            indices: vec![0, 1, 2],
            material,
        }
    }

    #[test]
    fn test_submesh_ranges() {
        let mut store = MeshStore::new();
        let material = MaterialHandle::default();
        let a = store.add_mesh("a", [triangle(material)]).unwrap();
        let b = store.add_mesh("b", [triangle(material), triangle(material)]).unwrap();

        assert_eq!(store.vertex_count(), 9);
        assert_eq!(store.index_count(), 9);
        assert_eq!(store.get(a).unwrap().submeshes[0].first_index, 0);

        let b = &store.get(b).unwrap().submeshes;
        assert_eq!((b[0].first_index, b[0].vertex_offset), (3, 3));
        assert_eq!((b[1].first_index, b[1].index_count, b[1].vertex_offset), (6, 3, 6));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut store = MeshStore::new();
        let mut bad = triangle(MaterialHandle::default());
        bad.indices[2] = 3;
        assert!(matches!(
            store.add_mesh("bad", [bad]),
            Err(SceneError::IndexOutOfRange { index: 3, vertex_count: 3 })
        ));
        assert_eq!(store.mesh_count(), 0);
        assert_eq!(store.vertex_count(), 0);
    }

    #[test]
    fn test_failed_mesh_leaves_store_unchanged() {
        let mut store = MeshStore::new();
        let material = MaterialHandle::default();
        store.add_mesh("a", [triangle(material)]).unwrap();

        let mut bad = triangle(material);
        bad.indices[0] = 7;
        assert!(store.add_mesh("b", [triangle(material), bad]).is_err());
        assert_eq!(store.mesh_count(), 1);
        assert_eq!(store.vertex_count(), 3);
        assert_eq!(store.index_count(), 3);
    }

    #[test]
    fn test_submesh_offsets_must_fit_draw_params() {
        let material = MaterialHandle::default();
        assert_eq!(
            Submesh::at(6, 3, 6, material).unwrap(),
            Submesh {
                first_index: 6,
                index_count: 3,
                vertex_offset: 6,
                material,
            }
        );

        let max_vertex = i32::MAX as usize;
        assert!(Submesh::at(0, 3, max_vertex, material).is_ok());
        assert!(matches!(
            Submesh::at(0, 3, max_vertex + 1, material),
            Err(SceneError::MeshStoreOverflow { .. })
        ));
        assert!(matches!(
            Submesh::at(u32::MAX as usize - 2, 3, 0, material),
            Err(SceneError::MeshStoreOverflow { .. })
        ));
        assert!(Submesh::at(u32::MAX as usize - 3, 3, 0, material).is_ok());
    }

    #[test]
    fn test_upload() {
        let mut gfx = MockGfx::new();
        let mut store = MeshStore::new();
        assert!(matches!(store.upload(&mut gfx), Err(SceneError::EmptyMeshStore)));

        store.add_mesh("a", [triangle(MaterialHandle::default())]).unwrap();
        let buffers = store.upload(&mut gfx).unwrap();
        assert_eq!(gfx.buffer_contents(buffers.vertex).len(), 3 * size_of::<MeshVertex>());
        assert_eq!(gfx.buffer_contents(buffers.index), bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
        assert_eq!(gfx.count(|e| matches!(e, GfxEvent::WriteBuffer { .. })), 2);

        // 再次上传替换旧的 buffer
        store.upload(&mut gfx).unwrap();
        assert_eq!(gfx.resource_stats().buffers, 2);

        store.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().buffers, 0);
    }
}

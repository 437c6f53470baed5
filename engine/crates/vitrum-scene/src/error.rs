use vitrum_gfx::GfxError;
use vitrum_render::error::RenderError;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to import glTF: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("gltf primitive {mesh}/{primitive} has no positions")]
    MissingPositions { mesh: usize, primitive: usize },

    #[error("index {index} out of range, mesh has {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("gltf references a missing {kind} #{index}")]
    BadIndex { kind: &'static str, index: usize },

    #[error("unsupported image layout: {width}x{height}, {len} bytes")]
    BadImageData { width: u32, height: u32, len: usize },

    /// 共享 buffer 的偏移超出 draw 参数能表示的范围
    #[error("mesh store overflow: {vertices} vertices, {indices} indices")]
    MeshStoreOverflow { vertices: usize, indices: usize },

    #[error("scene node does not exist")]
    MissingNode,

    #[error("mesh store is empty, nothing to upload")]
    EmptyMeshStore,

    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

pub type SceneResult<T> = Result<T, SceneError>;

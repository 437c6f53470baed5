//! Vitrum 的场景数据
//!
//! 场景图只保存节点和引用关系，GPU 资源由 [`mesh_store::MeshStore`] 和
//! [`texture_store::TextureStore`] 持有。每帧通过
//! [`scene_graph::SceneGraph::build_draw_context`] 展开为 draw item。

pub mod error;
pub mod gltf_import;
pub mod mesh_store;
pub mod scene_graph;
pub mod texture_store;

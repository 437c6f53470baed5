//! arena 形式的场景图
//!
//! 节点存放在一个 slotmap 中，父子关系使用句柄表示。节点本身不知道如何绘制，
//! 由 [`SceneGraph::build_draw_context`] 统一遍历。

use slotmap::SlotMap;
use vitrum_render::{
    draw_context::{DrawContext, DrawItem},
    material::material_system::MaterialLookup,
};

use crate::{
    error::{SceneError, SceneResult},
    mesh_store::{MeshHandle, MeshStore},
};

slotmap::new_key_type! {
    pub struct NodeHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// 只参与变换的层级
    Empty,
    Mesh { mesh: MeshHandle },
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub local_transform: glam::Mat4,

    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
}

// getters
impl SceneNode {
    #[inline]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }
    #[inline]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }
}

#[derive(Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeHandle, SceneNode>,
    roots: Vec<NodeHandle>,
}

// new & init
impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl SceneGraph {
    #[inline]
    pub fn get(&self, node: NodeHandle) -> Option<&SceneNode> {
        self.nodes.get(node)
    }

    #[inline]
    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// update
impl SceneGraph {
    /// `parent` 为 None 时作为根节点
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
        local_transform: glam::Mat4,
        parent: Option<NodeHandle>,
    ) -> SceneResult<NodeHandle> {
        if parent.is_some_and(|p| !self.nodes.contains_key(p)) {
            return Err(SceneError::MissingNode);
        }

        let node = self.nodes.insert(SceneNode {
            name: name.into(),
            kind,
            local_transform,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(node),
            None => self.roots.push(node),
        }
        Ok(node)
    }

    pub fn set_local_transform(&mut self, node: NodeHandle, transform: glam::Mat4) -> SceneResult<()> {
        let node = self.nodes.get_mut(node).ok_or(SceneError::MissingNode)?;
        node.local_transform = transform;
        Ok(())
    }

    /// 删除节点以及它的整个子树
    pub fn remove_node(&mut self, node: NodeHandle) -> SceneResult<()> {
        let parent = self.nodes.get(node).ok_or(SceneError::MissingNode)?.parent;
        match parent {
            Some(parent) => self.nodes[parent].children.retain(|&c| c != node),
            None => self.roots.retain(|&r| r != node),
        }

        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(removed) = self.nodes.remove(current) {
                stack.extend(removed.children);
            }
        }
        Ok(())
    }
}

// tools
impl SceneGraph {
    /// 沿 parent 链累乘得到的世界变换
    pub fn world_transform(&self, node: NodeHandle) -> Option<glam::Mat4> {
        let mut current = self.nodes.get(node)?;
        let mut transform = current.local_transform;
        while let Some(parent) = current.parent {
            current = &self.nodes[parent];
            transform = current.local_transform * transform;
        }
        Some(transform)
    }

    /// 深度优先遍历所有根节点，把每个 submesh 按照材质分类放入 `ctx`
    ///
    /// `ctx` 会先被清空，找不到的 mesh 或材质会被跳过
    pub fn build_draw_context(&self, meshes: &MeshStore, materials: &impl MaterialLookup, ctx: &mut DrawContext) {
        let _span = vitrum_render::profile_span!("build_draw_context");
        ctx.clear();

        let mut stack = self.roots.iter().rev().map(|&root| (root, glam::Mat4::IDENTITY)).collect::<Vec<_>>();
        while let Some((handle, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get(handle) else {
                continue;
            };
            let world = parent_world * node.local_transform;

            if let NodeKind::Mesh { mesh } = node.kind {
                self.push_mesh(node, mesh, world, meshes, materials, ctx);
            }

            // 逆序入栈，保证子节点按照插入顺序出栈
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
    }

    fn push_mesh(
        &self,
        node: &SceneNode,
        mesh: MeshHandle,
        world: glam::Mat4,
        meshes: &MeshStore,
        materials: &impl MaterialLookup,
        ctx: &mut DrawContext,
    ) {
        let Some(mesh) = meshes.get(mesh) else {
            log::warn!("node {} references a missing mesh", node.name);
            return;
        };
        for submesh in &mesh.submeshes {
            let Some(category) = materials.category(submesh.material) else {
                log::warn!("mesh {} references a missing material", mesh.name);
                continue;
            };
            ctx.push(
                category,
                DrawItem {
                    first_index: submesh.first_index,
                    index_count: submesh.index_count,
                    vertex_offset: submesh.vertex_offset,
                    transform: world,
                    material: submesh.material,
                },
            );
        }
    }
}

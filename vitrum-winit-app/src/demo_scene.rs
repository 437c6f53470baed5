//! 没有指定模型文件时使用的场景：一面不透明的墙，前面两层玻璃

use vitrum_gfx::GfxResources;
use vitrum_render::{
    material::{
        material_desc::{MaterialDesc, VolumeDesc},
        material_system::MaterialHandle,
    },
    vertex::MeshVertex,
};
use vitrum_scene::{
    error::SceneResult,
    gltf_import::SceneTargets,
    mesh_store::PrimitiveData,
    scene_graph::{NodeHandle, NodeKind},
};

/// xy 平面上、法线朝向 +Z 的正方形
fn quad(half_size: f32, material: MaterialHandle) -> PrimitiveData {
    let vertex = |x: f32, y: f32| MeshVertex {
        position: [x * half_size, y * half_size, 0.0],
        normal: [0.0, 0.0, 1.0],
        uv: [(x + 1.0) * 0.5, (1.0 - y) * 0.5],
    };
    PrimitiveData {
        vertices: vec![vertex(-1.0, -1.0), vertex(1.0, -1.0), vertex(-1.0, 1.0), vertex(1.0, 1.0)],
        indices: vec![0, 1, 2, 2, 1, 3],
        material,
    }
}

fn glass(name: &str, tint: [f32; 3], ior: f32) -> MaterialDesc {
    MaterialDesc {
        name: name.to_string(),
        base_color_factor: [tint[0], tint[1], tint[2], 1.0],
        metallic_factor: 0.0,
        roughness_factor: 0.05,
        transmission_factor: 0.9,
        volume: Some(VolumeDesc {
            thickness_factor: 0.02,
            attenuation_distance: 1.0,
            attenuation_color: tint,
            ..Default::default()
        }),
        ior,
        ..Default::default()
    }
}

/// 返回场景的根节点
pub fn build_demo_scene<G, F>(gfx: &mut G, targets: &mut SceneTargets, mut create_material: F) -> SceneResult<NodeHandle>
where
    G: GfxResources,
    F: FnMut(&mut G, &MaterialDesc) -> SceneResult<MaterialHandle>,
{
    let wall_material = create_material(
        gfx,
        &MaterialDesc {
            name: "wall".to_string(),
            base_color_factor: [0.9, 0.45, 0.2, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 0.7,
            ..Default::default()
        },
    )?;
    let blue_glass = create_material(gfx, &glass("glass-blue", [0.7, 0.85, 1.0], 1.5))?;
    let green_glass = create_material(gfx, &glass("glass-green", [0.75, 1.0, 0.8], 1.33))?;

    let wall = targets.meshes.add_mesh("wall", [quad(2.0, wall_material)])?;
    let front = targets.meshes.add_mesh("glass-front", [quad(1.0, blue_glass)])?;
    let back = targets.meshes.add_mesh("glass-back", [quad(0.6, green_glass)])?;

    let translation = |z: f32| glam::Mat4::from_translation(glam::vec3(0.0, 0.0, z));
    let root = targets
        .scene
        .add_node("demo", NodeKind::Empty, glam::Mat4::IDENTITY, None)?;
    targets
        .scene
        .add_node("wall", NodeKind::Mesh { mesh: wall }, translation(-1.0), Some(root))?;
    targets
        .scene
        .add_node("glass-back", NodeKind::Mesh { mesh: back }, translation(-0.3), Some(root))?;
    targets
        .scene
        .add_node("glass-front", NodeKind::Mesh { mesh: front }, translation(0.3), Some(root))?;

    Ok(root)
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;
    use vitrum_gfx::mock::MockGfx;
    use vitrum_render::{
        draw_context::DrawContext,
        material::{category::MaterialCategory, material_system::MaterialLookup},
    };
    use vitrum_scene::{mesh_store::MeshStore, scene_graph::SceneGraph, texture_store::TextureStore};

    use super::*;

    struct Categories(SlotMap<MaterialHandle, MaterialCategory>);

    impl MaterialLookup for Categories {
        fn category(&self, material: MaterialHandle) -> Option<MaterialCategory> {
            self.0.get(material).copied()
        }
    }

    #[test]
    fn test_demo_scene_buckets() {
        let mut gfx = MockGfx::new();
        let mut scene = SceneGraph::new();
        let mut meshes = MeshStore::new();
        let mut textures = TextureStore::new(&mut gfx).unwrap();
        let mut lookup = Categories(SlotMap::with_key());

        let root = build_demo_scene(
            &mut gfx,
            &mut SceneTargets {
                scene: &mut scene,
                meshes: &mut meshes,
                textures: &mut textures,
            },
            |_, desc| Ok(lookup.0.insert(MaterialCategory::classify(desc))),
        )
        .unwrap();
        assert_eq!(scene.get(root).unwrap().children().len(), 3);

        let mut ctx = DrawContext::default();
        scene.build_draw_context(&meshes, &lookup, &mut ctx);
        assert_eq!(ctx.opaque.len(), 1);
        assert_eq!(ctx.transmissive.len(), 2);
        assert!(ctx.transparent.is_empty());

        meshes.upload(&mut gfx).unwrap();
        meshes.destroy(&mut gfx);
        textures.destroy(&mut gfx);
        assert_eq!(gfx.resource_stats().buffers, 0);
    }
}

/// Surface, material and light builders shared by the unit tests

use std::sync::Arc;
use glam::{Mat4, Vec3, Vec4};

use crate::graphics_device::{BlendMode, BufferDesc, BufferUsage, GraphicsDevice, Rect2D, TextureHandle};
use super::*;

pub fn opaque_material(name: &str) -> Arc<Material> {
    Arc::new(
        Material::new(name, Coverage::Opaque)
            .with_stage(MaterialStage::new(StageLighting::Bump, TextureHandle(11)))
            .with_stage(MaterialStage::new(StageLighting::Diffuse, TextureHandle(12)))
            .with_stage(MaterialStage::new(StageLighting::Specular, TextureHandle(13))),
    )
}

pub fn perforated_material(name: &str, texture: TextureHandle) -> Arc<Material> {
    let mut stage = MaterialStage::new(StageLighting::Diffuse, texture);
    stage.alpha_test = Some(4);
    Arc::new(Material::new(name, Coverage::Perforated).with_stage(stage))
}

pub fn ambient_material(name: &str, coverage: Coverage, sort: f32, blend: BlendMode) -> Arc<Material> {
    let mut stage = MaterialStage::new(StageLighting::Ambient, TextureHandle(21));
    stage.blend = blend;
    stage.color = [0, 1, 2, 3];
    let mut material = Material::new(name, coverage).with_stage(stage);
    material.sort = sort;
    Arc::new(material)
}

pub fn entity(entity_num: u32) -> Arc<ViewEntity> {
    Arc::new(ViewEntity::new(entity_num, Mat4::from_translation(Vec3::new(entity_num as f32, 0.0, 0.0)), Mat4::IDENTITY))
}

/// Surface with `i`-dependent geometry and scissor in the given cache class
pub fn surface_in(material: &Arc<Material>, class: CacheClass, i: u32) -> DrawSurface {
    DrawSurface {
        material: Arc::clone(material),
        space: entity(i),
        vertex_cache: VertexCacheHandle::new(class, 64 * i as u64, 64 * 3),
        index_cache: VertexCacheHandle::new(class, 12 * i as u64, 12),
        num_indices: 3,
        scissor: Rect2D::new(8 * (i % 16) as i32, 4 * (i % 16) as i32, 1024, 600),
        shader_registers: Arc::from(vec![1.0, 1.0, 1.0, 1.0, 0.5]),
    }
}

pub fn surface(material: &Arc<Material>, i: u32) -> DrawSurface {
    surface_in(material, CacheClass::Static, i)
}

pub fn surfaces(material: &Arc<Material>, count: u32) -> Vec<DrawSurface> {
    (0..count).map(|i| surface(material, i)).collect()
}

pub fn invalid_surface(material: &Arc<Material>) -> DrawSurface {
    let mut surface = surface(material, 0);
    surface.index_cache = VertexCacheHandle::INVALID;
    surface
}

pub fn light(interactions: Vec<DrawSurface>, shadows: Vec<DrawSurface>) -> ViewLight {
    let mut light = ViewLight::new(Vec3::new(0.0, 0.0, 64.0), Vec4::ONE, Rect2D::new(100, 100, 400, 300));
    light.interactions = interactions;
    light.shadows = shadows;
    light
}

pub fn vertex_caches(device: &dyn GraphicsDevice) -> VertexCacheBuffers {
    let make = |name: &str, usage: BufferUsage| {
        device.create_buffer(&BufferDesc { name: name.to_string(), size: 1 << 16, usage, persistent: false })
    };
    VertexCacheBuffers::new(
        CacheBuffers {
            vertices: make("static_vertices", BufferUsage::Vertex).unwrap(),
            indices: make("static_indices", BufferUsage::Index).unwrap(),
        },
        CacheBuffers {
            vertices: make("frame_vertices", BufferUsage::Vertex).unwrap(),
            indices: make("frame_indices", BufferUsage::Index).unwrap(),
        },
    )
}

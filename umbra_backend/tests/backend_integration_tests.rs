//! Integration tests for RenderBackend with GPU
//!
//! These tests run whole frames (draw_view + end_frame) through the Vulkan
//! device. They need the compiled programs in `UMBRA_SHADER_DIR` and skip
//! when it is unset. Tests requiring GPU are marked with #[ignore].
//!
//! Run with: UMBRA_SHADER_DIR=... cargo test --test backend_integration_tests -- --ignored

mod gpu_test_utils;

use glam::{Mat4, Vec3, Vec4};
use gpu_test_utils::{create_vertex_caches, get_test_dyn_device, get_test_graphics_device, shader_dir};
use serial_test::serial;
use std::sync::Arc;
use umbra_backend::umbra::device::{
    AttachmentDesc, AttachmentFormat, AttachmentStorage, GraphicsDevice, Rect2D, TextureHandle,
};
use umbra_backend::umbra::frontend::{
    CacheClass, Coverage, DrawSurface, Material, MaterialStage, StageLighting, VertexCacheHandle,
    ViewDef, ViewEntity, ViewLight,
};
use umbra_backend::umbra::{BackendConfig, RenderBackend, ShadowTechnique};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;

/// Backend with every stage initialized, or `None` without programs
fn create_backend(config: BackendConfig) -> Option<RenderBackend> {
    let dir = shader_dir()?;
    let device = get_test_dyn_device();
    let caches = create_vertex_caches(device.as_ref());
    let mut backend = RenderBackend::new(device, config, caches).unwrap();
    let programs = get_test_graphics_device().program_manager(dir);
    backend.init(&programs).unwrap();
    Some(backend)
}

/// Small sampleable texture standing in for material images
fn material_texture(device: &dyn GraphicsDevice) -> (Arc<dyn umbra_backend::umbra::device::Attachment>, TextureHandle) {
    let attachment = device.create_attachment(&AttachmentDesc {
        name: "material_texture".to_string(),
        width: 4,
        height: 4,
        samples: 1,
        format: AttachmentFormat::R8G8B8A8_UNORM,
        storage: AttachmentStorage::Texture,
    }).unwrap();
    let handle = attachment.texture_handle().unwrap();
    (attachment, handle)
}

fn lit_material(texture: TextureHandle) -> Arc<Material> {
    Arc::new(
        Material::new("lit", Coverage::Opaque)
            .with_stage(MaterialStage::new(StageLighting::Bump, texture))
            .with_stage(MaterialStage::new(StageLighting::Diffuse, texture))
            .with_stage(MaterialStage::new(StageLighting::Specular, texture)),
    )
}

fn surface(material: &Arc<Material>, i: u32) -> DrawSurface {
    DrawSurface {
        material: Arc::clone(material),
        space: Arc::new(ViewEntity::new(i, Mat4::from_translation(Vec3::new(i as f32, 0.0, -10.0)), Mat4::IDENTITY)),
        vertex_cache: VertexCacheHandle::new(CacheClass::Static, 0, 64 * 3),
        index_cache: VertexCacheHandle::new(CacheClass::Static, 0, 12),
        num_indices: 3,
        scissor: Rect2D::from_size(WIDTH, HEIGHT),
        shader_registers: Arc::from(vec![1.0, 1.0, 1.0, 1.0]),
    }
}

fn lit_view(material: &Arc<Material>, count: u32) -> ViewDef {
    let mut view = ViewDef::new(WIDTH, HEIGHT);
    view.projection = Mat4::perspective_rh(1.2, WIDTH as f32 / HEIGHT as f32, 1.0, 1000.0);
    view.surfaces = (0..count).map(|i| surface(material, i)).collect();

    let mut light = ViewLight::new(Vec3::new(0.0, 0.0, 64.0), Vec4::ONE, Rect2D::new(100, 50, 400, 250));
    light.interactions = view.surfaces.clone();
    light.shadows = view.surfaces.clone();
    view.lights.push(light);
    view
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_backend_frames() {
    let Some(mut backend) = create_backend(BackendConfig::default()) else { return };
    let (_texture, handle) = material_texture(backend.device().as_ref());
    let material = lit_material(handle);
    let view = lit_view(&material, 16);

    for _ in 0..3 {
        backend.draw_view(&view).unwrap();
        backend.end_frame().unwrap();
    }

    assert_eq!(backend.frame_count(), 3);
    let stats = backend.stats();
    assert!(stats.surfaces > 0);
    assert_eq!(stats.lights, 1);
    assert!(stats.draw_submissions > 0);
    backend.shutdown();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_backend_settings_change_between_frames() {
    let Some(mut backend) = create_backend(BackendConfig::default()) else { return };
    let (_texture, handle) = material_texture(backend.device().as_ref());
    let material = lit_material(handle);
    let view = lit_view(&material, 4);

    backend.draw_view(&view).unwrap();
    backend.end_frame().unwrap();

    backend.settings_mut().multisample.set(4);
    backend.settings_mut().shadow_technique.set(ShadowTechnique::ShadowMap);
    backend.settings_mut().tonemap.set(true);
    backend.draw_view(&view).unwrap();
    backend.end_frame().unwrap();

    assert_eq!(backend.targets().primary().unwrap().samples(), 4);
    assert_eq!(backend.frame_count(), 2);
    backend.shutdown();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_backend_empty_view() {
    let Some(mut backend) = create_backend(BackendConfig::default()) else { return };
    backend.draw_view(&ViewDef::new(WIDTH, HEIGHT)).unwrap();
    backend.end_frame().unwrap();

    assert_eq!(backend.stats().surfaces, 0);
    backend.shutdown();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_draw_before_init_fails() {
    let device = get_test_dyn_device();
    let caches = create_vertex_caches(device.as_ref());
    let mut backend = RenderBackend::new(device, BackendConfig::default(), caches).unwrap();
    assert!(backend.draw_view(&ViewDef::new(WIDTH, HEIGHT)).is_err());
}

//! Unit tests for Vulkan conversion functions
//!
//! Pure mappings only, no GPU required.

use super::*;

// ============================================================================
// FORMAT TESTS
// ============================================================================

#[test]
fn test_attachment_formats() {
    assert_eq!(attachment_format_to_vk(AttachmentFormat::R8G8B8A8_UNORM), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(attachment_format_to_vk(AttachmentFormat::D24_UNORM), vk::Format::X8_D24_UNORM_PACK32);
    assert_eq!(attachment_format_to_vk(AttachmentFormat::D24_UNORM_S8_UINT), vk::Format::D24_UNORM_S8_UINT);
    assert_eq!(attachment_format_to_vk(AttachmentFormat::S8_UINT), vk::Format::S8_UINT);
}

#[test]
fn test_d24_falls_back_to_d32() {
    assert_eq!(fallback_format(vk::Format::X8_D24_UNORM_PACK32), Some(vk::Format::D32_SFLOAT));
    assert_eq!(fallback_format(vk::Format::D24_UNORM_S8_UINT), Some(vk::Format::D32_SFLOAT_S8_UINT));
    assert_eq!(fallback_format(vk::Format::S8_UINT), None);
    assert_eq!(fallback_format(vk::Format::R8G8B8A8_UNORM), None);
}

#[test]
fn test_aspects_of_packed_depth_stencil() {
    let format = AttachmentFormat::D32_SFLOAT_S8_UINT;
    assert_eq!(aspect_mask(format), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
    assert_eq!(sampled_aspect(format), vk::ImageAspectFlags::DEPTH);
    assert_eq!(attachment_layout(format), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
}

#[test]
fn test_aspects_of_stencil_and_color() {
    assert_eq!(sampled_aspect(AttachmentFormat::S8_UINT), vk::ImageAspectFlags::STENCIL);
    assert_eq!(aspect_mask(AttachmentFormat::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
    assert_eq!(sampled_layout(AttachmentFormat::R8G8B8A8_UNORM), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

#[test]
fn test_sample_counts() {
    assert_eq!(sample_count_to_vk(1), Some(vk::SampleCountFlags::TYPE_1));
    assert_eq!(sample_count_to_vk(8), Some(vk::SampleCountFlags::TYPE_8));
    assert_eq!(sample_count_to_vk(3), None);
    assert_eq!(sample_count_to_vk(0), None);

    let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
    assert_eq!(max_sample_count(supported), 4);
    assert_eq!(max_sample_count(vk::SampleCountFlags::TYPE_1), 1);
}

#[test]
fn test_blit_aspects() {
    assert_eq!(blit_aspects(BlitMask::COLOR), vk::ImageAspectFlags::COLOR);
    assert_eq!(
        blit_aspects(BlitMask::DEPTH | BlitMask::STENCIL),
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    );
}

// ============================================================================
// STATE TESTS
// ============================================================================

#[test]
fn test_compare_and_stencil_ops() {
    assert_eq!(compare_op_to_vk(CompareOp::LessOrEqual), vk::CompareOp::LESS_OR_EQUAL);
    assert_eq!(compare_op_to_vk(CompareOp::Equal), vk::CompareOp::EQUAL);
    assert_eq!(stencil_op_to_vk(StencilOp::IncrementAndWrap), vk::StencilOp::INCREMENT_AND_WRAP);
}

#[test]
fn test_stencil_face_carries_masks() {
    let state = StencilState::mark(128);
    let face = stencil_face_to_vk(&state.front, &state);
    assert_eq!(face.compare_op, vk::CompareOp::ALWAYS);
    assert_eq!(face.pass_op, vk::StencilOp::REPLACE);
    assert_eq!(face.reference, 128);
    assert_eq!(face.write_mask, 0xFF);

    let test = StencilState::test(CompareOp::Equal, 128);
    assert_eq!(stencil_face_to_vk(&test.back, &test).write_mask, 0);
}

#[test]
fn test_blend_presets() {
    let opaque = blend_attachment(BlendMode::Opaque, true);
    assert_eq!(opaque.blend_enable, vk::FALSE);
    assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);

    let additive = blend_attachment(BlendMode::Additive, true);
    assert_eq!(additive.blend_enable, vk::TRUE);
    assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::ONE);
    assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);

    let modulate = blend_attachment(BlendMode::Modulate, true);
    assert_eq!(modulate.src_color_blend_factor, vk::BlendFactor::DST_COLOR);
    assert_eq!(modulate.dst_color_blend_factor, vk::BlendFactor::ZERO);

    assert!(blend_attachment(BlendMode::Alpha, false).color_write_mask.is_empty());
}

#[test]
fn test_viewport_depth_range() {
    let viewport = viewport_to_vk(Rect2D::new(0, 0, 640, 480), DepthRange { near: 0.0, far: 0.5 });
    assert_eq!(viewport.width, 640.0);
    assert_eq!(viewport.max_depth, 0.5);
}

#[test]
fn test_negative_rect_clamped() {
    let rect = rect_to_vk(Rect2D::new(-10, 5, 100, 50));
    assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 5 });
    assert_eq!(rect.extent, vk::Extent2D { width: 90, height: 50 });

    let gone = rect_to_vk(Rect2D::new(-200, 0, 100, 50));
    assert_eq!(gone.extent.width, 0);
}

// ============================================================================
// DRAW TESTS
// ============================================================================

#[test]
fn test_draw_id_becomes_first_instance() {
    let draw = DrawElementsCommand { index_count: 36, first_index: 12, base_vertex: 4, draw_id: 7 };
    let command = draw_command_to_vk(&draw);
    assert_eq!(command.index_count, 36);
    assert_eq!(command.instance_count, 1);
    assert_eq!(command.vertex_offset, 4);
    assert_eq!(command.first_instance, 7);
}

#[test]
fn test_vertex_layouts() {
    let (bindings, attributes) = vertex_input(VertexLayoutKind::Draw);
    assert_eq!(bindings[0].stride, VertexLayoutKind::Draw.stride());
    assert_eq!(attributes.len(), 5);
    assert_eq!(attributes[1].offset, 12);
    assert_eq!(attributes[4].format, vk::Format::R8G8B8A8_UNORM);

    let (bindings, attributes) = vertex_input(VertexLayoutKind::Shadow);
    assert_eq!(bindings[0].stride, 16);
    assert_eq!(attributes.len(), 1);

    let (bindings, attributes) = vertex_input(VertexLayoutKind::None);
    assert!(bindings.is_empty() && attributes.is_empty());
}

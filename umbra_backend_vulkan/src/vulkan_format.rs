/// Conversions between backend types and Vulkan enums/structs
///
/// Everything here is pure so it can be tested without a GPU.

use ash::vk;
use umbra_backend::umbra::device::{
    AttachmentFormat, BlendMode, BlitMask, BufferUsage, CompareOp, CullMode, DepthRange,
    DrawElementsCommand, DrawVertex, Rect2D, StencilFaceState, StencilOp, StencilState,
    VertexLayoutKind,
};

// ===== Formats =====

pub(crate) fn attachment_format_to_vk(format: AttachmentFormat) -> vk::Format {
    match format {
        AttachmentFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        AttachmentFormat::R16G16B16A16_SFLOAT => vk::Format::R16G16B16A16_SFLOAT,
        AttachmentFormat::D24_UNORM => vk::Format::X8_D24_UNORM_PACK32,
        AttachmentFormat::D32_SFLOAT => vk::Format::D32_SFLOAT,
        AttachmentFormat::D24_UNORM_S8_UINT => vk::Format::D24_UNORM_S8_UINT,
        AttachmentFormat::D32_SFLOAT_S8_UINT => vk::Format::D32_SFLOAT_S8_UINT,
        AttachmentFormat::S8_UINT => vk::Format::S8_UINT,
    }
}

/// Substitute used when the device cannot render to a 24-bit depth format
pub(crate) fn fallback_format(format: vk::Format) -> Option<vk::Format> {
    match format {
        vk::Format::X8_D24_UNORM_PACK32 => Some(vk::Format::D32_SFLOAT),
        vk::Format::D24_UNORM_S8_UINT => Some(vk::Format::D32_SFLOAT_S8_UINT),
        _ => None,
    }
}

/// Every aspect the format carries
pub(crate) fn aspect_mask(format: AttachmentFormat) -> vk::ImageAspectFlags {
    if format.is_color() {
        return vk::ImageAspectFlags::COLOR;
    }
    let mut aspects = vk::ImageAspectFlags::empty();
    if format.has_depth() {
        aspects |= vk::ImageAspectFlags::DEPTH;
    }
    if format.has_stencil() {
        aspects |= vk::ImageAspectFlags::STENCIL;
    }
    aspects
}

/// Aspect a sampled view of the format reads (depth wins over stencil)
pub(crate) fn sampled_aspect(format: AttachmentFormat) -> vk::ImageAspectFlags {
    if format.is_color() {
        vk::ImageAspectFlags::COLOR
    } else if format.has_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::STENCIL
    }
}

/// Layout an attachment is rendered in
pub(crate) fn attachment_layout(format: AttachmentFormat) -> vk::ImageLayout {
    if format.is_color() {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    }
}

/// Layout an attachment is sampled in
pub(crate) fn sampled_layout(format: AttachmentFormat) -> vk::ImageLayout {
    if format.is_color() {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    }
}

pub(crate) fn sample_count_to_vk(samples: u32) -> Option<vk::SampleCountFlags> {
    match samples {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        16 => Some(vk::SampleCountFlags::TYPE_16),
        32 => Some(vk::SampleCountFlags::TYPE_32),
        64 => Some(vk::SampleCountFlags::TYPE_64),
        _ => None,
    }
}

/// Highest single sample count contained in `flags`
pub(crate) fn max_sample_count(flags: vk::SampleCountFlags) -> u32 {
    [64, 32, 16, 8, 4, 2]
        .into_iter()
        .find(|&samples| sample_count_to_vk(samples).is_some_and(|bit| flags.contains(bit)))
        .unwrap_or(1)
}

pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

/// Whole image, single mip level and layer
pub(crate) fn subresource_range(aspects: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspects,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) fn subresource_layers(aspects: vk::ImageAspectFlags) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: aspects,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) fn blit_aspects(mask: BlitMask) -> vk::ImageAspectFlags {
    let mut aspects = vk::ImageAspectFlags::empty();
    if mask.contains(BlitMask::COLOR) {
        aspects |= vk::ImageAspectFlags::COLOR;
    }
    if mask.contains(BlitMask::DEPTH) {
        aspects |= vk::ImageAspectFlags::DEPTH;
    }
    if mask.contains(BlitMask::STENCIL) {
        aspects |= vk::ImageAspectFlags::STENCIL;
    }
    aspects
}

// ===== Fixed-function state =====

pub(crate) fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn stencil_op_to_vk(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub(crate) fn stencil_face_to_vk(face: &StencilFaceState, state: &StencilState) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op_to_vk(face.fail_op),
        pass_op: stencil_op_to_vk(face.pass_op),
        depth_fail_op: stencil_op_to_vk(face.depth_fail_op),
        compare_op: compare_op_to_vk(face.compare),
        compare_mask: state.read_mask,
        write_mask: state.write_mask,
        reference: state.reference,
    }
}

pub(crate) fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Blend attachment state for one color attachment
pub(crate) fn blend_attachment(blend: BlendMode, color_write: bool) -> vk::PipelineColorBlendAttachmentState {
    let write_mask = if color_write {
        vk::ColorComponentFlags::RGBA
    } else {
        vk::ColorComponentFlags::empty()
    };
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(write_mask)
        .color_blend_op(vk::BlendOp::ADD)
        .alpha_blend_op(vk::BlendOp::ADD);

    let (src, dst) = match blend {
        BlendMode::Opaque => return state.blend_enable(false),
        BlendMode::Additive => (vk::BlendFactor::ONE, vk::BlendFactor::ONE),
        BlendMode::Alpha => (vk::BlendFactor::SRC_ALPHA, vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
        BlendMode::Modulate => (vk::BlendFactor::DST_COLOR, vk::BlendFactor::ZERO),
    };
    state
        .blend_enable(true)
        .src_color_blend_factor(src)
        .dst_color_blend_factor(dst)
        .src_alpha_blend_factor(src)
        .dst_alpha_blend_factor(dst)
}

pub(crate) fn viewport_to_vk(rect: Rect2D, depth_range: DepthRange) -> vk::Viewport {
    vk::Viewport {
        x: rect.x as f32,
        y: rect.y as f32,
        width: rect.width as f32,
        height: rect.height as f32,
        min_depth: depth_range.near,
        max_depth: depth_range.far,
    }
}

/// Scissor and clear rectangles; Vulkan rejects negative offsets
pub(crate) fn rect_to_vk(rect: Rect2D) -> vk::Rect2D {
    let x = rect.x.max(0);
    let y = rect.y.max(0);
    let width = rect.width.saturating_sub((x - rect.x) as u32);
    let height = rect.height.saturating_sub((y - rect.y) as u32);
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D { width, height },
    }
}

// ===== Draws and vertex input =====

/// `draw_id` travels as the first instance, read back through `gl_InstanceIndex`
pub(crate) fn draw_command_to_vk(draw: &DrawElementsCommand) -> vk::DrawIndexedIndirectCommand {
    vk::DrawIndexedIndirectCommand {
        index_count: draw.index_count,
        instance_count: 1,
        first_index: draw.first_index,
        vertex_offset: draw.base_vertex,
        first_instance: draw.draw_id,
    }
}

/// Vertex bindings and attributes of a layout
pub(crate) fn vertex_input(
    layout: VertexLayoutKind,
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let binding = |stride: u32| vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attribute = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };

    match layout {
        VertexLayoutKind::Draw => (
            binding(layout.stride()),
            vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(DrawVertex, position)),
                attribute(1, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(DrawVertex, st)),
                attribute(2, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(DrawVertex, normal)),
                attribute(3, vk::Format::R32G32B32A32_SFLOAT, std::mem::offset_of!(DrawVertex, tangent)),
                attribute(4, vk::Format::R8G8B8A8_UNORM, std::mem::offset_of!(DrawVertex, color)),
            ],
        ),
        VertexLayoutKind::Shadow => (
            binding(layout.stride()),
            vec![attribute(0, vk::Format::R32G32B32A32_SFLOAT, 0)],
        ),
        VertexLayoutKind::None => (Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;

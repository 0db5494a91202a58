/// Pipeline cache - graphics pipelines built on demand from program + state
///
/// Depth, stencil, cull, depth bias, viewport and scissor are dynamic state,
/// so a pipeline only depends on what Vulkan 1.3 cannot change at record
/// time: the program, its vertex layout, blending, color writes, polygon
/// mode and the attachment formats of the target.
///
/// Every pipeline shares one layout: a single push-descriptor set holding
/// the uniform blocks, storage blocks and texture units.

use umbra_backend::umbra::Result;
use umbra_backend::umbra::device::{BlendMode, VertexLayoutKind};
use umbra_backend::{engine_debug, engine_err};
use ash::vk;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{blend_attachment, sample_count_to_vk, vertex_input};
use crate::vulkan_frame_buffer::RenderingFormats;
use crate::vulkan_program::Program;

/// Uniform block binding points (set 0, bindings 0..)
pub const UNIFORM_BINDING_COUNT: u32 = 4;
/// Storage block binding `n` lands at `STORAGE_BINDING_BASE + n`
pub const STORAGE_BINDING_BASE: u32 = 4;
pub const STORAGE_BINDING_COUNT: u32 = 4;
/// Texture unit `n` lands at `TEXTURE_BINDING_BASE + n`
pub const TEXTURE_BINDING_BASE: u32 = 8;
pub const TEXTURE_UNIT_COUNT: u32 = 16;

const DYNAMIC_STATES: [vk::DynamicState; 14] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::CULL_MODE,
    vk::DynamicState::FRONT_FACE,
    vk::DynamicState::DEPTH_TEST_ENABLE,
    vk::DynamicState::DEPTH_WRITE_ENABLE,
    vk::DynamicState::DEPTH_COMPARE_OP,
    vk::DynamicState::STENCIL_TEST_ENABLE,
    vk::DynamicState::STENCIL_OP,
    vk::DynamicState::STENCIL_COMPARE_MASK,
    vk::DynamicState::STENCIL_WRITE_MASK,
    vk::DynamicState::STENCIL_REFERENCE,
    vk::DynamicState::DEPTH_BIAS,
    vk::DynamicState::DEPTH_BIAS_ENABLE,
];

/// Everything a pipeline is specialized on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: u64,
    pub vertex_layout: VertexLayoutKind,
    pub blend: BlendMode,
    pub color_write: bool,
    pub wireframe: bool,
    pub formats: RenderingFormats,
}

pub(crate) struct PipelineCache {
    ctx: Arc<GpuContext>,
    pub set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pipelines: FxHashMap<PipelineKey, vk::Pipeline>,
}

impl PipelineCache {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let binding = |binding: u32, descriptor_type: vk::DescriptorType| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stages)
        };

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..UNIFORM_BINDING_COUNT)
            .map(|b| binding(b, vk::DescriptorType::UNIFORM_BUFFER))
            .chain((0..STORAGE_BINDING_COUNT).map(|b| binding(STORAGE_BINDING_BASE + b, vk::DescriptorType::STORAGE_BUFFER)))
            .chain((0..TEXTURE_UNIT_COUNT).map(|b| binding(TEXTURE_BINDING_BASE + b, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)))
            .collect();

        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);

        unsafe {
            let set_layout = ctx.device.create_descriptor_set_layout(&set_layout_info, None)
                .map_err(|e| engine_err!("umbra::vulkan", "Failed to create descriptor set layout: {:?}", e))?;

            let set_layouts = [set_layout];
            let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
            let layout = match ctx.device.create_pipeline_layout(&layout_info, None) {
                Ok(layout) => layout,
                Err(e) => {
                    ctx.device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(engine_err!("umbra::vulkan", "Failed to create pipeline layout: {:?}", e));
                }
            };

            Ok(Self { ctx, set_layout, layout, pipelines: FxHashMap::default() })
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Pipeline for `key`, built on first use
    pub fn get_or_create(&mut self, key: &PipelineKey, program: &Program) -> Result<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(key) {
            return Ok(pipeline);
        }
        let pipeline = self.create(key, program)?;
        self.pipelines.insert(key.clone(), pipeline);
        engine_debug!("umbra::vulkan", "Pipeline {} built for program {} ({:?}, {} color targets, {} samples)",
            self.pipelines.len(), program.id, key.blend, key.formats.color.len(), key.formats.samples);
        Ok(pipeline)
    }

    fn create(&self, key: &PipelineKey, program: &Program) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(program.vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(program.fragment_module)
                .name(c"main"),
        ];

        let (vertex_bindings, vertex_attributes) = vertex_input(key.vertex_layout);
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        // Counts only, the rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let polygon_mode = if key.wireframe { vk::PolygonMode::LINE } else { vk::PolygonMode::FILL };
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(polygon_mode)
            .line_width(1.0);

        let samples = sample_count_to_vk(key.formats.samples)
            .ok_or_else(|| engine_err!("umbra::vulkan", "Invalid sample count {}", key.formats.samples))?;
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default();

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = key.formats.color.iter()
            .map(|_| blend_attachment(key.blend, key.color_write))
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&DYNAMIC_STATES);

        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&key.formats.color)
            .depth_attachment_format(key.formats.depth)
            .stencil_attachment_format(key.formats.stencil);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .push_next(&mut rendering);

        let pipelines = unsafe {
            self.ctx.device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| engine_err!("umbra::vulkan", "Failed to create graphics pipeline: {:?}", e))?;

        pipelines.into_iter().next()
            .ok_or_else(|| engine_err!("umbra::vulkan", "Pipeline creation returned no pipeline"))
    }

    /// Destroy every cached pipeline
    pub fn clear(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            unsafe { self.ctx.device.destroy_pipeline(pipeline, None) };
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.clear();
        unsafe {
            self.ctx.device.destroy_pipeline_layout(self.layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

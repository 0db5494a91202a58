/// Recorder - the device's single, in-order command stream
///
/// Commands go into one primary command buffer. `submit` closes it, hands it
/// to the graphics queue with a fence and opens the next one; the bound
/// framebuffer, program, buffers and state carry over.
///
/// Rendering into the bound framebuffer starts lazily on the first draw or
/// clear and always loads previous contents, so it can be suspended at any
/// point (blits, layout transitions, submissions) and resumed.

use umbra_backend::umbra::Result;
use umbra_backend::umbra::device::{
    Attachment as BackendAttachment, BlitMask, Buffer as BackendBuffer, BufferBindingTarget,
    ClearValues, CompareOp, DeviceStats, DrawElementsCommand, FenceId,
    Framebuffer as BackendFramebuffer, Program as BackendProgram, Rect2D, RenderState,
    TextureHandle, VertexLayoutKind,
};
use umbra_backend::{engine_bail, engine_err, engine_trace, engine_warn};
use ash::vk;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::vulkan_attachment::Attachment;
use crate::vulkan_buffer::{self, Buffer};
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{
    aspect_mask, attachment_layout, compare_op_to_vk, cull_mode_to_vk, draw_command_to_vk,
    rect_to_vk, sampled_layout, stencil_face_to_vk, subresource_layers, subresource_range,
    viewport_to_vk,
};
use crate::vulkan_frame_buffer::as_vulkan_framebuffer;
use crate::vulkan_pipeline::{
    PipelineCache, PipelineKey, STORAGE_BINDING_BASE, STORAGE_BINDING_COUNT, TEXTURE_BINDING_BASE,
    TEXTURE_UNIT_COUNT, UNIFORM_BINDING_COUNT,
};
use crate::vulkan_program;

/// Size of one indirect draw record
pub(crate) const INDIRECT_STRIDE: u32 = std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32;

/// Resources referenced by recorded commands
#[allow(dead_code)] // held until the submission completes
pub(crate) enum Retained {
    Buffer(Arc<dyn BackendBuffer>),
    Framebuffer(Arc<dyn BackendFramebuffer>),
    Program(Arc<dyn BackendProgram>),
    Attachment(Arc<Attachment>),
}

/// Where a texture handle samples from
pub(crate) enum TextureSource {
    Attachment(Weak<Attachment>),
    /// View owned by the caller, kept in SHADER_READ_ONLY_OPTIMAL
    External(vk::ImageView),
}

struct Submission {
    fence: vk::Fence,
    /// Null once recycled
    command_buffer: vk::CommandBuffer,
    /// `None` for internal flushes
    id: Option<FenceId>,
    released: bool,
    retained: Vec<Retained>,
}

#[derive(Clone)]
struct BoundRange {
    buffer: Arc<dyn BackendBuffer>,
    offset: u64,
    size: u64,
}

pub(crate) struct Recorder {
    ctx: Arc<GpuContext>,
    push_descriptor: ash::khr::push_descriptor::Device,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    free_command_buffers: Vec<vk::CommandBuffer>,
    submissions: VecDeque<Submission>,
    retained: Vec<Retained>,
    next_fence: u64,

    pipelines: PipelineCache,
    presentation: Arc<dyn BackendFramebuffer>,
    indirect: Buffer,
    indirect_capacity: u32,
    indirect_cursor: u32,
    color_sampler: vk::Sampler,
    depth_sampler: vk::Sampler,
    pub(crate) textures: FxHashMap<u64, TextureSource>,
    wireframe_supported: bool,
    /// Depth/stencil presentation was already reported
    warned_depth_present: bool,

    // Bound state, survives submissions
    framebuffer: Option<Arc<dyn BackendFramebuffer>>,
    viewport: Rect2D,
    scissor: Rect2D,
    render_state: RenderState,
    program: Option<Arc<dyn BackendProgram>>,
    uniforms: [Option<BoundRange>; UNIFORM_BINDING_COUNT as usize],
    storage: [Option<BoundRange>; STORAGE_BINDING_COUNT as usize],
    texture_units: [TextureHandle; TEXTURE_UNIT_COUNT as usize],
    vertex_cache: Option<(Arc<dyn BackendBuffer>, Arc<dyn BackendBuffer>)>,

    // Command buffer state, reset with every new command buffer
    rendering: bool,
    bound_pipeline: vk::Pipeline,
    dynamic_dirty: bool,
    descriptors_dirty: bool,
    vertex_cache_dirty: bool,

    /// Deferred errors, drained by `check_errors`
    errors: Vec<String>,
    stats: DeviceStats,
}

impl Recorder {
    pub fn new(
        ctx: Arc<GpuContext>,
        push_descriptor: ash::khr::push_descriptor::Device,
        presentation: Arc<dyn BackendFramebuffer>,
        indirect: Buffer,
        wireframe_supported: bool,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to create command pool: {:?}", e))?;

        let color_sampler = create_sampler(&ctx, vk::Filter::LINEAR)?;
        let depth_sampler = create_sampler(&ctx, vk::Filter::NEAREST)?;
        let pipelines = PipelineCache::new(Arc::clone(&ctx))?;
        let indirect_capacity = (indirect.size / INDIRECT_STRIDE as u64) as u32;
        let size = (presentation.width(), presentation.height());

        let mut recorder = Self {
            ctx,
            push_descriptor,
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            free_command_buffers: Vec::new(),
            submissions: VecDeque::new(),
            retained: Vec::new(),
            next_fence: 1,
            pipelines,
            presentation,
            indirect,
            indirect_capacity,
            indirect_cursor: 0,
            color_sampler,
            depth_sampler,
            textures: FxHashMap::default(),
            wireframe_supported,
            warned_depth_present: false,
            framebuffer: None,
            viewport: Rect2D::from_size(size.0, size.1),
            scissor: Rect2D::from_size(size.0, size.1),
            render_state: RenderState::default(),
            program: None,
            uniforms: Default::default(),
            storage: Default::default(),
            texture_units: [TextureHandle::NONE; TEXTURE_UNIT_COUNT as usize],
            vertex_cache: None,
            rendering: false,
            bound_pipeline: vk::Pipeline::null(),
            dynamic_dirty: true,
            descriptors_dirty: true,
            vertex_cache_dirty: true,
            errors: Vec::new(),
            stats: DeviceStats::default(),
        };
        recorder.begin_command_buffer()?;
        Ok(recorder)
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Record an error reported by the next `check_errors`
    pub fn record_error(&mut self, message: String) {
        engine_warn!("umbra::vulkan", "{}", message);
        self.errors.push(message);
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    // ===== Command buffers and submissions =====

    fn begin_command_buffer(&mut self) -> Result<()> {
        let device = &self.ctx.device;
        let command_buffer = match self.free_command_buffers.pop() {
            Some(command_buffer) => {
                unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
                    .map_err(|e| engine_err!("umbra::vulkan", "Failed to reset command buffer: {:?}", e))?;
                command_buffer
            }
            None => {
                let allocate_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                let buffers = unsafe { device.allocate_command_buffers(&allocate_info) }
                    .map_err(|e| engine_err!("umbra::vulkan", "Failed to allocate command buffer: {:?}", e))?;
                buffers.into_iter().next()
                    .ok_or_else(|| engine_err!("umbra::vulkan", "No command buffer allocated"))?
            }
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to begin command buffer: {:?}", e))?;

        self.command_buffer = command_buffer;
        self.rendering = false;
        self.bound_pipeline = vk::Pipeline::null();
        self.dynamic_dirty = true;
        self.descriptors_dirty = true;
        self.vertex_cache_dirty = true;
        self.retain_bound();
        Ok(())
    }

    /// Everything still bound is referenced by the new command buffer
    fn retain_bound(&mut self) {
        if let Some(framebuffer) = &self.framebuffer {
            self.retained.push(Retained::Framebuffer(Arc::clone(framebuffer)));
        }
        if let Some(program) = &self.program {
            self.retained.push(Retained::Program(Arc::clone(program)));
        }
        for range in self.uniforms.iter().chain(self.storage.iter()).flatten() {
            self.retained.push(Retained::Buffer(Arc::clone(&range.buffer)));
        }
        if let Some((vertices, indices)) = &self.vertex_cache {
            self.retained.push(Retained::Buffer(Arc::clone(vertices)));
            self.retained.push(Retained::Buffer(Arc::clone(indices)));
        }
    }

    /// Close the command buffer, submit it with a new fence and start the next one
    fn submit(&mut self, id: Option<FenceId>) -> Result<()> {
        self.end_rendering();
        let device = &self.ctx.device;

        unsafe { device.end_command_buffer(self.command_buffer) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to end command buffer: {:?}", e))?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to create fence: {:?}", e))?;

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if let Err(e) = unsafe { device.queue_submit(self.ctx.graphics_queue, &[submit_info], fence) } {
            unsafe { device.destroy_fence(fence, None) };
            engine_bail!("umbra::vulkan", "Failed to submit commands to GPU queue: {:?}", e);
        }

        self.submissions.push_back(Submission {
            fence,
            command_buffer: self.command_buffer,
            id,
            released: id.is_none(),
            retained: std::mem::take(&mut self.retained),
        });
        self.begin_command_buffer()?;
        self.reap();
        Ok(())
    }

    /// Recycle finished submissions; drop their fences once released
    fn reap(&mut self) {
        let device = &self.ctx.device;
        let free = &mut self.free_command_buffers;
        self.submissions.retain_mut(|submission| {
            let done = unsafe { device.get_fence_status(submission.fence) }.unwrap_or(false);
            if !done {
                return true;
            }
            submission.retained.clear();
            if submission.command_buffer != vk::CommandBuffer::null() {
                free.push(submission.command_buffer);
                submission.command_buffer = vk::CommandBuffer::null();
            }
            if submission.released {
                unsafe { device.destroy_fence(submission.fence, None) };
                return false;
            }
            true
        });
    }

    pub fn insert_fence(&mut self) -> Result<FenceId> {
        let id = FenceId(self.next_fence);
        self.next_fence += 1;
        self.submit(Some(id))?;
        self.stats.fences_inserted += 1;
        Ok(id)
    }

    pub fn fence_handle(&self, id: FenceId) -> Option<vk::Fence> {
        self.submissions.iter()
            .find(|submission| submission.id == Some(id))
            .map(|submission| submission.fence)
    }

    pub fn release_fence(&mut self, id: FenceId) {
        if let Some(submission) = self.submissions.iter_mut().find(|s| s.id == Some(id)) {
            submission.released = true;
        }
        self.reap();
    }

    /// Submit pending work and wait for the queue to drain
    pub fn drain(&mut self) -> Result<()> {
        self.submit(None)?;
        unsafe { self.ctx.device.queue_wait_idle(self.ctx.graphics_queue) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to wait for queue idle: {:?}", e))?;
        self.reap();
        self.indirect_cursor = 0;
        Ok(())
    }

    // ===== Rendering scope =====

    fn target(&self) -> Arc<dyn BackendFramebuffer> {
        self.framebuffer.clone().unwrap_or_else(|| Arc::clone(&self.presentation))
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.ctx.device.cmd_end_rendering(self.command_buffer) };
            self.rendering = false;
        }
    }

    /// Move an attachment to `new_layout`; must be called outside rendering
    fn transition(&self, attachment: &Attachment, new_layout: vk::ImageLayout) {
        let Some(backing) = attachment.backing() else {
            return;
        };
        let Ok(mut layout) = attachment.layout.lock() else {
            return;
        };
        if *layout == new_layout {
            return;
        }

        let access = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(access)
            .dst_access_mask(access)
            .old_layout(*layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(backing.image)
            .subresource_range(subresource_range(aspect_mask(attachment.desc().format)));

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        *layout = new_layout;
    }

    fn begin_rendering(&mut self) -> Result<()> {
        if self.rendering {
            return Ok(());
        }
        let target = self.target();
        let framebuffer = as_vulkan_framebuffer(target.as_ref());

        if let Some(unbacked) = framebuffer.attachments().find(|a| a.backing().is_none()) {
            engine_bail!("umbra::vulkan", "Framebuffer '{}' uses unsupported attachment '{}'",
                framebuffer.name(), unbacked.desc().name);
        }
        for attachment in framebuffer.attachments() {
            self.transition(attachment, attachment_layout(attachment.desc().format));
        }

        let attachment_info = |attachment: &Attachment, layout: vk::ImageLayout| {
            attachment.backing().map(|backing| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(backing.view)
                    .image_layout(layout)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
        };
        let color_infos: Vec<vk::RenderingAttachmentInfo> = framebuffer.color_attachments()
            .filter_map(|a| attachment_info(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let depth_info = framebuffer.depth_attachment()
            .filter(|a| a.desc().format.has_depth())
            .and_then(|a| attachment_info(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        let stencil_info = framebuffer.stencil_attachment()
            .and_then(|a| attachment_info(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: framebuffer.width(), height: framebuffer.height() },
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = stencil_info.as_ref() {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }

        unsafe { self.ctx.device.cmd_begin_rendering(self.command_buffer, &rendering_info) };
        self.rendering = true;
        Ok(())
    }

    // ===== Bindings and state =====

    pub fn bind_framebuffer(&mut self, framebuffer: Option<&Arc<dyn BackendFramebuffer>>) {
        let same = match (&self.framebuffer, framebuffer) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        self.end_rendering();
        self.framebuffer = framebuffer.cloned();
        if let Some(framebuffer) = framebuffer {
            self.retained.push(Retained::Framebuffer(Arc::clone(framebuffer)));
        }
    }

    pub fn bind_range(&mut self, target: BufferBindingTarget, binding: u32, buffer: &Arc<dyn BackendBuffer>, offset: u64, size: u64) {
        let range = BoundRange { buffer: Arc::clone(buffer), offset, size };
        let slot = match target {
            BufferBindingTarget::Uniform => &mut self.uniforms[binding as usize],
            BufferBindingTarget::Storage => &mut self.storage[binding as usize],
        };
        let unchanged = slot.as_ref().is_some_and(|bound| {
            Arc::ptr_eq(&bound.buffer, buffer) && bound.offset == offset && bound.size == size
        });
        if unchanged {
            return;
        }
        *slot = Some(range);
        self.retained.push(Retained::Buffer(Arc::clone(buffer)));
        self.descriptors_dirty = true;
    }

    pub fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        if self.texture_units[unit as usize] != texture {
            self.texture_units[unit as usize] = texture;
            self.descriptors_dirty = true;
        }
    }

    pub fn bind_program(&mut self, program: Option<&Arc<dyn BackendProgram>>) {
        self.program = program.cloned();
        if let Some(program) = program {
            self.retained.push(Retained::Program(Arc::clone(program)));
        }
    }

    pub fn bind_vertex_cache(&mut self, vertices: &Arc<dyn BackendBuffer>, indices: &Arc<dyn BackendBuffer>) {
        if let Some((bound_vertices, bound_indices)) = &self.vertex_cache {
            if Arc::ptr_eq(bound_vertices, vertices) && Arc::ptr_eq(bound_indices, indices) {
                return;
            }
        }
        self.vertex_cache = Some((Arc::clone(vertices), Arc::clone(indices)));
        self.retained.push(Retained::Buffer(Arc::clone(vertices)));
        self.retained.push(Retained::Buffer(Arc::clone(indices)));
        self.vertex_cache_dirty = true;
    }

    pub fn set_viewport(&mut self, rect: Rect2D) {
        if self.viewport != rect {
            self.viewport = rect;
            self.dynamic_dirty = true;
        }
    }

    pub fn set_scissor(&mut self, rect: Rect2D) {
        if self.scissor != rect {
            self.scissor = rect;
            self.dynamic_dirty = true;
        }
    }

    pub fn set_render_state(&mut self, state: &RenderState) {
        if self.render_state != *state {
            self.render_state = *state;
            self.dynamic_dirty = true;
        }
    }

    fn apply_dynamic_state(&mut self) {
        if !self.dynamic_dirty {
            return;
        }
        let device = &self.ctx.device;
        let cmd = self.command_buffer;
        let state = &self.render_state;

        unsafe {
            device.cmd_set_viewport(cmd, 0, &[viewport_to_vk(self.viewport, state.depth_range)]);
            device.cmd_set_scissor(cmd, 0, &[rect_to_vk(self.scissor)]);
            device.cmd_set_cull_mode(cmd, cull_mode_to_vk(state.cull));
            device.cmd_set_front_face(cmd, vk::FrontFace::COUNTER_CLOCKWISE);

            device.cmd_set_depth_test_enable(cmd, state.depth_test.is_some());
            device.cmd_set_depth_write_enable(cmd, state.depth_write);
            device.cmd_set_depth_compare_op(cmd, compare_op_to_vk(state.depth_test.unwrap_or(CompareOp::Always)));

            match &state.stencil {
                Some(stencil) => {
                    device.cmd_set_stencil_test_enable(cmd, true);
                    for (face, face_state) in [
                        (vk::StencilFaceFlags::FRONT, &stencil.front),
                        (vk::StencilFaceFlags::BACK, &stencil.back),
                    ] {
                        let ops = stencil_face_to_vk(face_state, stencil);
                        device.cmd_set_stencil_op(cmd, face, ops.fail_op, ops.pass_op, ops.depth_fail_op, ops.compare_op);
                    }
                    device.cmd_set_stencil_compare_mask(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, stencil.read_mask);
                    device.cmd_set_stencil_write_mask(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, stencil.write_mask);
                    device.cmd_set_stencil_reference(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, stencil.reference);
                }
                None => device.cmd_set_stencil_test_enable(cmd, false),
            }

            match state.polygon_offset {
                Some(offset) => {
                    device.cmd_set_depth_bias_enable(cmd, true);
                    device.cmd_set_depth_bias(cmd, offset.units, 0.0, offset.factor);
                }
                None => {
                    device.cmd_set_depth_bias_enable(cmd, false);
                    device.cmd_set_depth_bias(cmd, 0.0, 0.0, 0.0);
                }
            }
        }
        self.dynamic_dirty = false;
    }

    /// Image infos for every bound texture unit, transitioning sampled
    /// attachments out of their attachment layouts
    fn resolve_textures(&mut self) -> Result<Vec<(u32, vk::DescriptorImageInfo)>> {
        let target = self.target();
        let framebuffer = as_vulkan_framebuffer(target.as_ref());
        let mut infos = Vec::new();

        for unit in 0..TEXTURE_UNIT_COUNT {
            let handle = self.texture_units[unit as usize];
            if handle.is_none() {
                continue;
            }
            let attachment = match self.textures.get(&handle.0) {
                Some(TextureSource::External(view)) => {
                    infos.push((unit, vk::DescriptorImageInfo {
                        sampler: self.color_sampler,
                        image_view: *view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }));
                    continue;
                }
                Some(TextureSource::Attachment(weak)) => weak.upgrade().ok_or_else(|| {
                    engine_err!("umbra::vulkan", "Texture {} on unit {} was destroyed", handle.0, unit)
                })?,
                None => engine_bail!("umbra::vulkan", "Unknown texture {} on unit {}", handle.0, unit),
            };

            if framebuffer.attachments().any(|a| std::ptr::eq(a, Arc::as_ptr(&attachment))) {
                engine_bail!("umbra::vulkan", "Attachment '{}' sampled while bound for rendering",
                    attachment.desc().name);
            }
            let Some(view) = attachment.backing().and_then(|backing| backing.sampled_view) else {
                engine_bail!("umbra::vulkan", "Attachment '{}' cannot be sampled", attachment.desc().name);
            };

            let format = attachment.desc().format;
            let layout = sampled_layout(format);
            if attachment.current_layout() != layout {
                self.end_rendering();
                self.transition(&attachment, layout);
            }
            let sampler = if format.is_color() { self.color_sampler } else { self.depth_sampler };
            infos.push((unit, vk::DescriptorImageInfo { sampler, image_view: view, image_layout: layout }));
            if self.descriptors_dirty {
                self.retained.push(Retained::Attachment(attachment));
            }
        }
        Ok(infos)
    }

    fn push_descriptors(&mut self, images: &[(u32, vk::DescriptorImageInfo)]) {
        if !self.descriptors_dirty {
            return;
        }

        let buffer_info = |range: &BoundRange| [vk::DescriptorBufferInfo {
            buffer: vulkan_buffer::as_vulkan(range.buffer.as_ref()).buffer,
            offset: range.offset,
            range: range.size,
        }];
        let buffers: Vec<(u32, vk::DescriptorType, [vk::DescriptorBufferInfo; 1])> = self.uniforms.iter()
            .enumerate()
            .filter_map(|(b, r)| r.as_ref().map(|r| (b as u32, vk::DescriptorType::UNIFORM_BUFFER, buffer_info(r))))
            .chain(self.storage.iter().enumerate().filter_map(|(b, r)| {
                r.as_ref().map(|r| (STORAGE_BINDING_BASE + b as u32, vk::DescriptorType::STORAGE_BUFFER, buffer_info(r)))
            }))
            .collect();
        let images: Vec<(u32, [vk::DescriptorImageInfo; 1])> = images.iter()
            .map(|(unit, info)| (TEXTURE_BINDING_BASE + unit, [*info]))
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = buffers.iter()
            .map(|(binding, descriptor_type, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(info)
            })
            .chain(images.iter().map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(info)
            }))
            .collect();

        if !writes.is_empty() {
            unsafe {
                self.push_descriptor.cmd_push_descriptor_set(
                    self.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipelines.layout,
                    0,
                    &writes,
                );
            }
        }
        self.descriptors_dirty = false;
    }

    /// Everything a draw needs: rendering started, pipeline, state, descriptors, geometry
    fn prepare_draw(&mut self) -> Result<()> {
        let Some(bound) = self.program.clone() else {
            engine_bail!("umbra::vulkan", "Draw issued with no program bound");
        };
        let program = vulkan_program::as_vulkan(bound.as_ref());

        let images = self.resolve_textures()?;
        self.begin_rendering()?;

        let target = self.target();
        let key = PipelineKey {
            program: program.id,
            vertex_layout: program.vertex_layout,
            blend: self.render_state.blend,
            color_write: self.render_state.color_write,
            wireframe: self.render_state.wireframe && self.wireframe_supported,
            formats: as_vulkan_framebuffer(target.as_ref()).rendering_formats(),
        };
        let pipeline = self.pipelines.get_or_create(&key, program)?;
        if pipeline != self.bound_pipeline {
            unsafe {
                self.ctx.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            self.bound_pipeline = pipeline;
        }

        self.apply_dynamic_state();
        self.push_descriptors(&images);

        if program.vertex_layout != VertexLayoutKind::None && self.vertex_cache_dirty {
            let Some((vertices, indices)) = &self.vertex_cache else {
                engine_bail!("umbra::vulkan", "Program '{}' draws with no vertex cache bound", program.name());
            };
            let vertices = vulkan_buffer::as_vulkan(vertices.as_ref()).buffer;
            let indices = vulkan_buffer::as_vulkan(indices.as_ref()).buffer;
            unsafe {
                self.ctx.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[vertices], &[0]);
                self.ctx.device.cmd_bind_index_buffer(self.command_buffer, indices, 0, vk::IndexType::UINT32);
            }
            self.vertex_cache_dirty = false;
        }
        Ok(())
    }

    // ===== Commands =====

    pub fn multi_draw(&mut self, draws: &[DrawElementsCommand]) -> Result<()> {
        if draws.is_empty() {
            return Ok(());
        }
        let count = draws.len() as u32;
        if count > self.indirect_capacity {
            engine_bail!("umbra::vulkan", "Multi-draw of {} exceeds the indirect capacity of {}",
                count, self.indirect_capacity);
        }
        if self.indirect_cursor + count > self.indirect_capacity {
            engine_trace!("umbra::vulkan", "Indirect buffer full, draining the queue");
            self.drain()?;
        }

        self.prepare_draw()?;

        let words: Vec<u32> = draws.iter()
            .map(draw_command_to_vk)
            .flat_map(|c| [c.index_count, c.instance_count, c.first_index, c.vertex_offset as u32, c.first_instance])
            .collect();
        let offset = self.indirect_cursor as u64 * INDIRECT_STRIDE as u64;
        self.indirect.update(offset, bytemuck::cast_slice(&words))?;

        unsafe {
            self.ctx.device.cmd_draw_indexed_indirect(
                self.command_buffer,
                self.indirect.buffer,
                offset,
                count,
                INDIRECT_STRIDE,
            );
        }
        self.indirect_cursor += count;
        self.stats.draw_submissions += 1;
        self.stats.draws += count as u64;
        Ok(())
    }

    pub fn draw_fullscreen(&mut self) -> Result<()> {
        self.prepare_draw()?;
        unsafe { self.ctx.device.cmd_draw(self.command_buffer, 3, 1, 0, 0) };
        self.stats.draw_submissions += 1;
        self.stats.draws += 1;
        Ok(())
    }

    pub fn clear(&mut self, values: &ClearValues) -> Result<()> {
        self.begin_rendering()?;
        let target = self.target();
        let framebuffer = as_vulkan_framebuffer(target.as_ref());

        let rect = self.scissor.intersect(&Rect2D::from_size(framebuffer.width(), framebuffer.height()));
        if rect.is_empty() {
            return Ok(());
        }

        let mut clears = Vec::new();
        if let Some(color) = values.color {
            for index in 0..framebuffer.color_attachments().count() {
                clears.push(vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: index as u32,
                    clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: color } },
                });
            }
        }

        let mut aspects = vk::ImageAspectFlags::empty();
        if values.depth.is_some() && framebuffer.depth_attachment().is_some_and(|a| a.desc().format.has_depth()) {
            aspects |= vk::ImageAspectFlags::DEPTH;
        }
        if values.stencil.is_some() && framebuffer.stencil_attachment().is_some() {
            aspects |= vk::ImageAspectFlags::STENCIL;
        }
        if !aspects.is_empty() {
            clears.push(vk::ClearAttachment {
                aspect_mask: aspects,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: values.depth.unwrap_or(1.0),
                        stencil: values.stencil.unwrap_or(0),
                    },
                },
            });
        }

        if clears.is_empty() {
            return Ok(());
        }
        let clear_rect = vk::ClearRect { rect: rect_to_vk(rect), base_array_layer: 0, layer_count: 1 };
        unsafe { self.ctx.device.cmd_clear_attachments(self.command_buffer, &clears, &[clear_rect]) };
        Ok(())
    }

    /// Copy the masked aspects between framebuffers
    ///
    /// Unsupported combinations are recorded for `check_errors` and skipped.
    /// The presentation surface is color only: depth or stencil presented
    /// there is skipped with a warning.
    pub fn blit(&mut self, src: &Arc<dyn BackendFramebuffer>, dst: Option<&Arc<dyn BackendFramebuffer>>, mask: BlitMask) {
        self.end_rendering();
        if dst.is_none() && !mask.contains(BlitMask::COLOR) {
            if !self.warned_depth_present {
                engine_warn!("umbra::vulkan", "Presentation surface has no depth or stencil, '{}' not shown", src.name());
                self.warned_depth_present = true;
            }
            return;
        }
        let dst = dst.cloned().unwrap_or_else(|| Arc::clone(&self.presentation));
        self.retained.push(Retained::Framebuffer(Arc::clone(src)));
        self.retained.push(Retained::Framebuffer(Arc::clone(&dst)));

        let src_fb = as_vulkan_framebuffer(src.as_ref());
        let dst_fb = as_vulkan_framebuffer(dst.as_ref());
        let mut failures = Vec::new();

        if mask.contains(BlitMask::COLOR) {
            match (src_fb.color_attachments().next(), dst_fb.color_attachments().next()) {
                (Some(s), Some(d)) => failures.extend(self.blit_color(s, d).err()),
                _ => failures.push("color blit needs a color attachment on both sides".to_string()),
            }
        }
        if mask.contains(BlitMask::DEPTH) {
            match (src_fb.depth_attachment(), dst_fb.depth_attachment()) {
                (Some(s), Some(d)) => failures.extend(self.transfer_aspect(s, d, vk::ImageAspectFlags::DEPTH).err()),
                _ => failures.push("depth blit needs a depth attachment on both sides".to_string()),
            }
        }
        if mask.contains(BlitMask::STENCIL) {
            match (src_fb.stencil_attachment(), dst_fb.stencil_attachment()) {
                (Some(s), Some(d)) => failures.extend(self.transfer_aspect(s, d, vk::ImageAspectFlags::STENCIL).err()),
                _ => failures.push("stencil blit needs a stencil attachment on both sides".to_string()),
            }
        }

        let (src_name, dst_name) = (src_fb.name().to_string(), dst_fb.name().to_string());
        for failure in failures {
            self.record_error(format!("Blit '{}' -> '{}': {}", src_name, dst_name, failure));
        }
    }

    /// Resolve when going from multisampled to single-sampled, blit otherwise
    fn blit_color(&self, src: &Attachment, dst: &Attachment) -> std::result::Result<(), String> {
        let (Some(src_image), Some(dst_image)) = (src.backing(), dst.backing()) else {
            return Err("unsupported attachment".to_string());
        };
        let (s, d) = (src.desc(), dst.desc());
        let resolve = s.samples > 1 && d.samples == 1;
        if resolve && (s.width != d.width || s.height != d.height) {
            return Err(format!("resolve needs matching sizes ({}x{} vs {}x{})", s.width, s.height, d.width, d.height));
        }
        if !resolve && s.samples != d.samples {
            return Err(format!("sample counts differ ({} vs {})", s.samples, d.samples));
        }

        self.transition(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        self.transition(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let layers = subresource_layers(vk::ImageAspectFlags::COLOR);

        unsafe {
            if resolve {
                let region = vk::ImageResolve {
                    src_subresource: layers,
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: layers,
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D { width: s.width, height: s.height, depth: 1 },
                };
                self.ctx.device.cmd_resolve_image(
                    self.command_buffer,
                    src_image.image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            } else {
                let corner = |width: u32, height: u32| vk::Offset3D { x: width as i32, y: height as i32, z: 1 };
                let region = vk::ImageBlit {
                    src_subresource: layers,
                    src_offsets: [vk::Offset3D::default(), corner(s.width, s.height)],
                    dst_subresource: layers,
                    dst_offsets: [vk::Offset3D::default(), corner(d.width, d.height)],
                };
                let filter = if (s.width, s.height) == (d.width, d.height) {
                    vk::Filter::NEAREST
                } else {
                    vk::Filter::LINEAR
                };
                self.ctx.device.cmd_blit_image(
                    self.command_buffer,
                    src_image.image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                    filter,
                );
            }
        }
        Ok(())
    }

    /// Depth or stencil transfer; needs identical formats
    ///
    /// Multisampled to single-sampled resolves sample zero and needs
    /// matching sizes, equal sample counts copy.
    fn transfer_aspect(&self, src: &Attachment, dst: &Attachment, aspect: vk::ImageAspectFlags) -> std::result::Result<(), String> {
        let (s, d) = (src.desc(), dst.desc());
        if src.format != dst.format {
            return Err(format!("{:?} transfer between formats {:?} and {:?}", aspect, src.format, dst.format));
        }
        if s.samples > 1 && d.samples == 1 {
            if (s.width, s.height) != (d.width, d.height) {
                return Err(format!("{:?} resolve needs matching sizes ({}x{} vs {}x{})",
                    aspect, s.width, s.height, d.width, d.height));
            }
            return self.resolve_aspect(src, dst, aspect);
        }
        if s.samples != d.samples {
            return Err(format!("{:?} copy between sample counts {} and {}", aspect, s.samples, d.samples));
        }
        self.copy_aspect(src, dst, aspect)
    }

    /// Resolve through an empty rendering scope with a sample-zero resolve
    /// attachment (the only depth/stencil resolve mode every device has)
    fn resolve_aspect(&self, src: &Attachment, dst: &Attachment, aspect: vk::ImageAspectFlags) -> std::result::Result<(), String> {
        let (Some(src_image), Some(dst_image)) = (src.backing(), dst.backing()) else {
            return Err("unsupported attachment".to_string());
        };
        let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        self.transition(src, layout);
        self.transition(dst, layout);

        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(src_image.view)
            .image_layout(layout)
            .resolve_mode(vk::ResolveModeFlags::SAMPLE_ZERO)
            .resolve_image_view(dst_image.view)
            .resolve_image_layout(layout)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let desc = src.desc();
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: desc.width, height: desc.height },
            })
            .layer_count(1);
        if aspect.contains(vk::ImageAspectFlags::DEPTH) {
            rendering_info = rendering_info.depth_attachment(&attachment);
        }
        if aspect.contains(vk::ImageAspectFlags::STENCIL) {
            rendering_info = rendering_info.stencil_attachment(&attachment);
        }

        unsafe {
            self.ctx.device.cmd_begin_rendering(self.command_buffer, &rendering_info);
            self.ctx.device.cmd_end_rendering(self.command_buffer);
        }
        Ok(())
    }

    fn copy_aspect(&self, src: &Attachment, dst: &Attachment, aspect: vk::ImageAspectFlags) -> std::result::Result<(), String> {
        let (Some(src_image), Some(dst_image)) = (src.backing(), dst.backing()) else {
            return Err("unsupported attachment".to_string());
        };
        let (s, d) = (src.desc(), dst.desc());

        self.transition(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        self.transition(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let layers = subresource_layers(aspect);
        let region = vk::ImageCopy {
            src_subresource: layers,
            src_offset: vk::Offset3D::default(),
            dst_subresource: layers,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D { width: s.width.min(d.width), height: s.height.min(d.height), depth: 1 },
        };
        unsafe {
            self.ctx.device.cmd_copy_image(
                self.command_buffer,
                src_image.image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        unsafe {
            for submission in self.submissions.drain(..) {
                self.ctx.device.destroy_fence(submission.fence, None);
            }
            self.ctx.device.destroy_sampler(self.color_sampler, None);
            self.ctx.device.destroy_sampler(self.depth_sampler, None);
            // Frees every command buffer allocated from it
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn create_sampler(ctx: &GpuContext, filter: vk::Filter) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_lod(0.0);
    unsafe { ctx.device.create_sampler(&info, None) }
        .map_err(|e| engine_err!("umbra::vulkan", "Failed to create sampler: {:?}", e))
}


/// Mock graphics device for unit tests (no GPU required)
///
/// Records every call into a command log so tests can assert ordering,
/// batching and state changes. Fence signaling and framebuffer completeness
/// are driven by configurable policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    Attachment, AttachmentDesc, AttachmentFormat, AttachmentPoint, AttachmentStorage, BlitMask, Buffer,
    BufferBindingTarget, BufferDesc, ClearValues, DeviceLimits, DeviceStats,
    DrawElementsCommand, FenceId, FenceStatus, Framebuffer, FramebufferDesc,
    FramebufferStatus, GraphicsDevice, Program, ProgramDesc, ProgramManager, Rect2D,
    RenderState, TextureHandle,
};
use crate::engine_bail;

// ============================================================================
// Command log
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    CreateBuffer { name: String, size: u64 },
    WriteBuffer { name: String, offset: u64, len: u64 },
    BindBufferRange { target: BufferBindingTarget, binding: u32, buffer: String, offset: u64, size: u64 },
    InsertFence(FenceId),
    WaitFence { fence: FenceId, timeout: Duration, status: FenceStatus },
    DeleteFence(FenceId),
    CreateAttachment { name: String, samples: u32 },
    CreateFramebuffer { name: String },
    BindFramebuffer(Option<String>),
    Blit { src: String, dst: Option<String>, mask: BlitMask },
    Clear(ClearValues),
    SetViewport(Rect2D),
    SetScissor(Rect2D),
    SetRenderState(RenderState),
    BindProgram(Option<String>),
    BindTexture { unit: u32, texture: TextureHandle },
    BindVertexCache { vertices: String, indices: String },
    MultiDraw(Vec<DrawElementsCommand>),
    DrawFullscreen,
    CheckErrors(String),
}

/// How inserted fences signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FencePolicy {
    /// Fences are signaled as soon as they are inserted
    SignalImmediately,
    /// A fence signals on its n-th wait call (polls included)
    SignalAfterWaits(u32),
    /// Fences never signal (GPU hang)
    NeverSignal,
}

/// Which framebuffers report incomplete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramebufferPolicy {
    pub reject_multisample: bool,
    pub reject_separate_stencil: bool,
    /// Every framebuffer reports unsupported
    pub reject_all: bool,
    /// The framebuffer with this name reports unsupported
    pub reject_named: Option<&'static str>,
    /// Creating an attachment whose name starts with this fails
    pub fail_attachment: Option<&'static str>,
    /// Creating the framebuffer with this name fails
    pub fail_framebuffer: Option<&'static str>,
}

/// Attachments of a framebuffer by aspect, checked by `blit_framebuffer`
#[derive(Debug, Clone, Default)]
struct MockLayout {
    color: Option<AttachmentDesc>,
    depth: Option<AttachmentDesc>,
    /// Separate stencil, or packed depth-stencil
    stencil: Option<AttachmentDesc>,
}

impl MockLayout {
    fn of(desc: &FramebufferDesc) -> Self {
        let depth = desc.depth_attachment.as_ref().map(|a| a.desc().clone());
        let packed = depth.clone().filter(|d| d.format.has_stencil());
        Self {
            color: desc.color_attachments.first().map(|a| a.desc().clone()),
            stencil: desc.stencil_attachment.as_ref().map(|a| a.desc().clone()).or(packed),
            depth,
        }
    }
}

/// Why one aspect of a blit is rejected, mirroring the Vulkan recorder
///
/// Color resolves multisampled to single-sampled at equal size and blits
/// equal sample counts at any size. Depth and stencil need equal formats,
/// then resolve at equal size or copy equal sample counts.
fn blit_rejection(aspect: &str, src: Option<&AttachmentDesc>, dst: Option<&AttachmentDesc>, color: bool) -> Option<String> {
    let (Some(s), Some(d)) = (src, dst) else {
        return Some(format!("{} blit needs a {} attachment on both sides", aspect, aspect));
    };
    if !color && s.format != d.format {
        return Some(format!("{} transfer between formats {:?} and {:?}", aspect, s.format, d.format));
    }
    if s.samples > 1 && d.samples == 1 {
        if (s.width, s.height) != (d.width, d.height) {
            return Some(format!("{} resolve needs matching sizes ({}x{} vs {}x{})",
                aspect, s.width, s.height, d.width, d.height));
        }
        return None;
    }
    if s.samples != d.samples {
        return Some(format!("{} sample counts differ ({} vs {})", aspect, s.samples, d.samples));
    }
    None
}

#[derive(Debug)]
struct MockFence {
    waits: u32,
    signaled: bool,
}

pub struct MockState {
    pub commands: Vec<MockCommand>,
    fences: FxHashMap<FenceId, MockFence>,
    next_fence: u64,
    fence_policy: FencePolicy,
    framebuffer_policy: FramebufferPolicy,
    statuses: FxHashMap<String, FramebufferStatus>,
    layouts: FxHashMap<String, MockLayout>,
    pending_error: Option<String>,
    next_texture: u64,
}

/// Resource lifetime counters (updated from Drop impls)
#[derive(Debug, Default)]
pub struct MockCounters {
    pub attachments_created: AtomicUsize,
    pub attachments_destroyed: AtomicUsize,
    pub framebuffers_created: AtomicUsize,
    pub framebuffers_destroyed: AtomicUsize,
}

impl MockCounters {
    pub fn live_attachments(&self) -> usize {
        self.attachments_created.load(Ordering::SeqCst) - self.attachments_destroyed.load(Ordering::SeqCst)
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers_created.load(Ordering::SeqCst) - self.framebuffers_destroyed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock Buffer
// ============================================================================

pub struct MockBuffer {
    pub name: String,
    pub size: u64,
    data: Mutex<Vec<u8>>,
    state: Arc<Mutex<MockState>>,
}

impl MockBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl Buffer for MockBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.size {
            engine_bail!("umbra::mock", "Write [{}, {}) outside buffer '{}' of {} bytes",
                offset, end, self.name, self.size);
        }
        self.data.lock().unwrap()[offset as usize..end as usize].copy_from_slice(data);
        self.state.lock().unwrap().commands.push(MockCommand::WriteBuffer {
            name: self.name.clone(),
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }
}

// ============================================================================
// Mock Attachment / Framebuffer
// ============================================================================

pub struct MockAttachment {
    desc: AttachmentDesc,
    handle: Option<TextureHandle>,
    counters: Arc<MockCounters>,
}

impl Attachment for MockAttachment {
    fn desc(&self) -> &AttachmentDesc {
        &self.desc
    }

    fn texture_handle(&self) -> Option<TextureHandle> {
        self.handle
    }
}

impl Drop for MockAttachment {
    fn drop(&mut self) {
        self.counters.attachments_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockFramebuffer {
    name: String,
    width: u32,
    height: u32,
    samples: u32,
    _attachments: Vec<Arc<dyn Attachment>>,
    counters: Arc<MockCounters>,
}

impl Framebuffer for MockFramebuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn samples(&self) -> u32 {
        self.samples
    }
}

impl Drop for MockFramebuffer {
    fn drop(&mut self) {
        self.counters.framebuffers_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

pub struct MockGraphicsDevice {
    state: Arc<Mutex<MockState>>,
    limits: DeviceLimits,
    buffers: Mutex<Vec<Arc<MockBuffer>>>,
    pub counters: Arc<MockCounters>,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                commands: Vec::new(),
                fences: FxHashMap::default(),
                next_fence: 1,
                fence_policy: FencePolicy::SignalImmediately,
                framebuffer_policy: FramebufferPolicy::default(),
                statuses: FxHashMap::default(),
                layouts: FxHashMap::default(),
                pending_error: None,
                next_texture: 1000,
            })),
            limits,
            buffers: Mutex::new(Vec::new()),
            counters: Arc::new(MockCounters::default()),
        }
    }

    fn record(&self, command: MockCommand) {
        self.state.lock().unwrap().commands.push(command);
    }

    // ===== Test helpers =====

    pub fn commands(&self) -> Vec<MockCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().unwrap().commands.clear();
    }

    /// Draw lists of every multi-draw submission, in issue order
    pub fn draw_submissions(&self) -> Vec<Vec<DrawElementsCommand>> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                MockCommand::MultiDraw(draws) => Some(draws),
                _ => None,
            })
            .collect()
    }

    pub fn count_commands(&self, predicate: impl Fn(&MockCommand) -> bool) -> usize {
        self.state.lock().unwrap().commands.iter().filter(|c| predicate(c)).count()
    }

    pub fn set_fence_policy(&self, policy: FencePolicy) {
        self.state.lock().unwrap().fence_policy = policy;
    }

    pub fn set_framebuffer_policy(&self, policy: FramebufferPolicy) {
        self.state.lock().unwrap().framebuffer_policy = policy;
    }

    /// Make the next `check_errors` call fail
    pub fn inject_error(&self, message: &str) {
        self.state.lock().unwrap().pending_error = Some(message.to_string());
    }

    /// GPU caught up: every outstanding fence becomes signaled
    pub fn signal_all_fences(&self) {
        for fence in self.state.lock().unwrap().fences.values_mut() {
            fence.signaled = true;
        }
    }

    pub fn is_fence_signaled(&self, fence: FenceId) -> bool {
        self.state.lock().unwrap().fences.get(&fence).map(|f| f.signaled).unwrap_or(false)
    }

    /// Fences inserted and not yet deleted
    pub fn live_fences(&self) -> usize {
        self.state.lock().unwrap().fences.len()
    }

    pub fn buffer(&self, name: &str) -> Option<Arc<MockBuffer>> {
        self.buffers.lock().unwrap().iter().find(|b| b.name == name).cloned()
    }

    fn compute_status(&self, desc: &FramebufferDesc) -> FramebufferStatus {
        let policy = self.state.lock().unwrap().framebuffer_policy;
        let mut attachments: Vec<(AttachmentPoint, &Arc<dyn Attachment>)> = desc.color_attachments
            .iter()
            .enumerate()
            .map(|(i, a)| (AttachmentPoint::Color(i as u32), a))
            .collect();
        if let Some(depth) = &desc.depth_attachment {
            attachments.push((AttachmentPoint::Depth, depth));
        }
        if let Some(stencil) = &desc.stencil_attachment {
            attachments.push((AttachmentPoint::Stencil, stencil));
        }

        let Some((_, first)) = attachments.first() else {
            return FramebufferStatus::MissingAttachment;
        };
        let samples = first.desc().samples;

        for (point, attachment) in &attachments {
            let d = attachment.desc();
            if d.width != desc.width || d.height != desc.height {
                return FramebufferStatus::IncompleteAttachment(*point);
            }
            if d.samples != samples {
                return FramebufferStatus::IncompleteMultisample(*point);
            }
        }
        if policy.reject_all || policy.reject_named == Some(desc.name.as_str()) {
            return FramebufferStatus::Unsupported(AttachmentPoint::Framebuffer);
        }
        if policy.reject_multisample && samples > 1 {
            return FramebufferStatus::IncompleteMultisample(AttachmentPoint::Color(0));
        }
        if policy.reject_separate_stencil && desc.stencil_attachment.is_some() {
            return FramebufferStatus::Unsupported(AttachmentPoint::Stencil);
        }
        FramebufferStatus::Complete
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        let buffer = Arc::new(MockBuffer {
            name: desc.name.clone(),
            size: desc.size,
            data: Mutex::new(vec![0u8; desc.size as usize]),
            state: Arc::clone(&self.state),
        });
        self.buffers.lock().unwrap().push(Arc::clone(&buffer));
        self.record(MockCommand::CreateBuffer { name: desc.name.clone(), size: desc.size });
        Ok(buffer)
    }

    fn bind_buffer_range(
        &self,
        target: BufferBindingTarget,
        binding: u32,
        buffer: &Arc<dyn Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        if offset + size > buffer.size() {
            engine_bail!("umbra::mock", "Bound range [{}, {}) exceeds buffer '{}'",
                offset, offset + size, buffer.name());
        }
        self.record(MockCommand::BindBufferRange {
            target,
            binding,
            buffer: buffer.name().to_string(),
            offset,
            size,
        });
        Ok(())
    }

    fn insert_fence(&self) -> Result<FenceId> {
        let mut state = self.state.lock().unwrap();
        let id = FenceId(state.next_fence);
        state.next_fence += 1;
        let signaled = state.fence_policy == FencePolicy::SignalImmediately;
        state.fences.insert(id, MockFence { waits: 0, signaled });
        state.commands.push(MockCommand::InsertFence(id));
        Ok(id)
    }

    fn client_wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus {
        let mut state = self.state.lock().unwrap();
        let policy = state.fence_policy;
        let status = match state.fences.get_mut(&fence) {
            None => FenceStatus::Failed,
            Some(f) if f.signaled => FenceStatus::Signaled,
            Some(f) => {
                f.waits += 1;
                match policy {
                    FencePolicy::SignalAfterWaits(n) if f.waits >= n => {
                        f.signaled = true;
                        FenceStatus::Signaled
                    }
                    FencePolicy::SignalImmediately => {
                        f.signaled = true;
                        FenceStatus::Signaled
                    }
                    _ => FenceStatus::TimeoutExpired,
                }
            }
        };
        state.commands.push(MockCommand::WaitFence { fence, timeout, status });
        status
    }

    fn delete_fence(&self, fence: FenceId) {
        let mut state = self.state.lock().unwrap();
        state.fences.remove(&fence);
        state.commands.push(MockCommand::DeleteFence(fence));
    }

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<Arc<dyn Attachment>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!("Attachment '{}' has zero size", desc.name)));
        }
        if let Some(prefix) = self.state.lock().unwrap().framebuffer_policy.fail_attachment {
            if desc.name.starts_with(prefix) {
                return Err(Error::BackendError(format!("Out of device memory for attachment '{}'", desc.name)));
            }
        }
        let handle = match desc.storage {
            AttachmentStorage::Texture => {
                let mut state = self.state.lock().unwrap();
                state.next_texture += 1;
                Some(TextureHandle(state.next_texture))
            }
            AttachmentStorage::Renderbuffer => None,
        };
        self.counters.attachments_created.fetch_add(1, Ordering::SeqCst);
        self.record(MockCommand::CreateAttachment { name: desc.name.clone(), samples: desc.samples });
        Ok(Arc::new(MockAttachment {
            desc: desc.clone(),
            handle,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        if self.state.lock().unwrap().framebuffer_policy.fail_framebuffer == Some(desc.name.as_str()) {
            return Err(Error::BackendError(format!("Cannot create framebuffer '{}'", desc.name)));
        }
        let status = self.compute_status(desc);
        let samples = desc.color_attachments.first()
            .or(desc.depth_attachment.as_ref())
            .map(|a| a.desc().samples)
            .unwrap_or(1);

        let mut attachments: Vec<Arc<dyn Attachment>> = desc.color_attachments.clone();
        attachments.extend(desc.depth_attachment.iter().cloned());
        attachments.extend(desc.stencil_attachment.iter().cloned());

        {
            let mut state = self.state.lock().unwrap();
            state.statuses.insert(desc.name.clone(), status);
            state.layouts.insert(desc.name.clone(), MockLayout::of(desc));
            state.commands.push(MockCommand::CreateFramebuffer { name: desc.name.clone() });
        }
        self.counters.framebuffers_created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MockFramebuffer {
            name: desc.name.clone(),
            width: desc.width,
            height: desc.height,
            samples,
            _attachments: attachments,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn framebuffer_status(&self, framebuffer: &dyn Framebuffer) -> FramebufferStatus {
        self.state.lock().unwrap()
            .statuses
            .get(framebuffer.name())
            .copied()
            .unwrap_or(FramebufferStatus::MissingAttachment)
    }

    fn bind_framebuffer(&self, framebuffer: Option<&Arc<dyn Framebuffer>>) -> Result<()> {
        self.record(MockCommand::BindFramebuffer(framebuffer.map(|f| f.name().to_string())));
        Ok(())
    }

    fn blit_framebuffer(
        &self,
        src: &Arc<dyn Framebuffer>,
        dst: Option<&Arc<dyn Framebuffer>>,
        mask: BlitMask,
    ) -> Result<()> {
        self.record(MockCommand::Blit {
            src: src.name().to_string(),
            dst: dst.map(|f| f.name().to_string()),
            mask,
        });

        // Presentation is a color-only single-sample surface; depth and stencil are skipped there
        let presentation = MockLayout {
            color: Some(AttachmentDesc {
                name: "presentation".to_string(),
                width: self.presentation_size().0,
                height: self.presentation_size().1,
                samples: 1,
                format: AttachmentFormat::R8G8B8A8_UNORM,
                storage: AttachmentStorage::Texture,
            }),
            ..Default::default()
        };

        let mut state = self.state.lock().unwrap();
        let source = state.layouts.get(src.name()).cloned().unwrap_or_default();
        let target = match dst {
            Some(framebuffer) => state.layouts.get(framebuffer.name()).cloned().unwrap_or_default(),
            None => presentation,
        };
        let mut failures = Vec::new();
        if mask.contains(BlitMask::COLOR) {
            failures.extend(blit_rejection("color", source.color.as_ref(), target.color.as_ref(), true));
        }
        if dst.is_some() && mask.contains(BlitMask::DEPTH) {
            failures.extend(blit_rejection("depth", source.depth.as_ref(), target.depth.as_ref(), false));
        }
        if dst.is_some() && mask.contains(BlitMask::STENCIL) {
            failures.extend(blit_rejection("stencil", source.stencil.as_ref(), target.stencil.as_ref(), false));
        }

        // Failures surface at the next check_errors
        if let Some(failure) = failures.into_iter().next() {
            let target_name = dst.map_or("presentation", |f| f.name());
            state.pending_error.get_or_insert(format!("Blit '{}' -> '{}': {}", src.name(), target_name, failure));
        }
        Ok(())
    }

    fn presentation_size(&self) -> (u32, u32) {
        (1280, 720)
    }

    fn clear(&self, values: &ClearValues) -> Result<()> {
        self.record(MockCommand::Clear(*values));
        Ok(())
    }

    fn set_viewport(&self, rect: Rect2D) {
        self.record(MockCommand::SetViewport(rect));
    }

    fn set_scissor(&self, rect: Rect2D) {
        self.record(MockCommand::SetScissor(rect));
    }

    fn set_render_state(&self, state: &RenderState) {
        self.record(MockCommand::SetRenderState(*state));
    }

    fn bind_program(&self, program: Option<&Arc<dyn Program>>) -> Result<()> {
        self.record(MockCommand::BindProgram(program.map(|p| p.name().to_string())));
        Ok(())
    }

    fn bind_texture(&self, unit: u32, texture: TextureHandle) -> Result<()> {
        self.record(MockCommand::BindTexture { unit, texture });
        Ok(())
    }

    fn bind_vertex_cache(&self, vertices: &Arc<dyn Buffer>, indices: &Arc<dyn Buffer>) -> Result<()> {
        self.record(MockCommand::BindVertexCache {
            vertices: vertices.name().to_string(),
            indices: indices.name().to_string(),
        });
        Ok(())
    }

    fn multi_draw_elements(&self, draws: &[DrawElementsCommand]) -> Result<()> {
        self.record(MockCommand::MultiDraw(draws.to_vec()));
        Ok(())
    }

    fn draw_fullscreen(&self) -> Result<()> {
        self.record(MockCommand::DrawFullscreen);
        Ok(())
    }

    fn check_errors(&self, context: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(MockCommand::CheckErrors(context.to_string()));
        match state.pending_error.take() {
            Some(message) => Err(Error::BackendError(format!("{}: {}", context, message))),
            None => Ok(()),
        }
    }

    fn stats(&self) -> DeviceStats {
        let state = self.state.lock().unwrap();
        let mut stats = DeviceStats::default();
        for command in &state.commands {
            match command {
                MockCommand::MultiDraw(draws) => {
                    stats.draw_submissions += 1;
                    stats.draws += draws.len() as u64;
                }
                MockCommand::InsertFence(_) => stats.fences_inserted += 1,
                _ => {}
            }
        }
        stats
    }

    fn wait_idle(&self) -> Result<()> {
        self.signal_all_fences();
        Ok(())
    }
}

// ============================================================================
// Mock Program / ProgramManager
// ============================================================================

pub struct MockProgram {
    pub name: String,
    pub assigned: Mutex<Vec<(String, u32)>>,
}

impl Program for MockProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_uniform_block(&self, _block: &str) -> bool {
        true
    }

    fn assign_uniform_block(&self, block: &str, binding: u32) -> Result<()> {
        self.assigned.lock().unwrap().push((block.to_string(), binding));
        Ok(())
    }
}

/// Hands out `MockProgram`s; can be told to fail linking one program
#[derive(Default)]
pub struct MockProgramManager {
    pub fail_program: Option<String>,
    pub loaded: Mutex<Vec<String>>,
}

impl MockProgramManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(name: &str) -> Self {
        Self { fail_program: Some(name.to_string()), loaded: Mutex::new(Vec::new()) }
    }
}

impl ProgramManager for MockProgramManager {
    fn load_program(&self, desc: &ProgramDesc) -> Result<Arc<dyn Program>> {
        if self.fail_program.as_deref() == Some(desc.name.as_str()) {
            return Err(Error::InitializationFailed(format!("Program '{}' failed to link", desc.name)));
        }
        self.loaded.lock().unwrap().push(desc.name.clone());
        Ok(Arc::new(MockProgram {
            name: desc.name.clone(),
            assigned: Mutex::new(Vec::new()),
        }))
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;

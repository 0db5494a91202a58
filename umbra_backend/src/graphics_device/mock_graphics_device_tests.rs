/// Unit tests for MockGraphicsDevice and associated mock types.
///
/// The other test suites lean on the mock's fence and completeness policies,
/// so these pin their behaviour down.

use super::*;
use crate::graphics_device::{AttachmentFormat, BufferUsage, VertexLayoutKind};

fn attachment_desc(name: &str, width: u32, height: u32, samples: u32) -> AttachmentDesc {
    AttachmentDesc {
        name: name.to_string(),
        width,
        height,
        samples,
        format: AttachmentFormat::R8G8B8A8_UNORM,
        storage: AttachmentStorage::Renderbuffer,
    }
}

fn framebuffer_desc(name: &str, attachments: Vec<Arc<dyn Attachment>>) -> FramebufferDesc {
    FramebufferDesc {
        name: name.to_string(),
        color_attachments: attachments,
        depth_attachment: None,
        stencil_attachment: None,
        width: 64,
        height: 64,
    }
}

// ============================================================================
// MockBuffer Tests
// ============================================================================

#[test]
fn test_mock_buffer_update_records_and_stores() {
    let device = MockGraphicsDevice::new();
    let buffer = device.create_buffer(&BufferDesc {
        name: "params".to_string(),
        size: 64,
        usage: BufferUsage::Uniform,
        persistent: true,
    }).unwrap();

    buffer.update(16, &[1, 2, 3, 4]).unwrap();

    let mock = device.buffer("params").unwrap();
    assert_eq!(&mock.contents()[16..20], &[1, 2, 3, 4]);
    assert!(device.commands().contains(&MockCommand::WriteBuffer {
        name: "params".to_string(),
        offset: 16,
        len: 4,
    }));
}

#[test]
fn test_mock_buffer_update_out_of_range_fails() {
    let device = MockGraphicsDevice::new();
    let buffer = device.create_buffer(&BufferDesc {
        name: "small".to_string(),
        size: 8,
        usage: BufferUsage::Uniform,
        persistent: true,
    }).unwrap();

    assert!(buffer.update(4, &[0u8; 8]).is_err());
}

// ============================================================================
// Fence Policy Tests
// ============================================================================

#[test]
fn test_fence_signal_immediately() {
    let device = MockGraphicsDevice::new();
    let fence = device.insert_fence().unwrap();
    assert_eq!(device.client_wait_fence(fence, Duration::ZERO), FenceStatus::Signaled);
}

#[test]
fn test_fence_signal_after_waits() {
    let device = MockGraphicsDevice::new();
    device.set_fence_policy(FencePolicy::SignalAfterWaits(3));
    let fence = device.insert_fence().unwrap();

    assert_eq!(device.client_wait_fence(fence, Duration::ZERO), FenceStatus::TimeoutExpired);
    assert_eq!(device.client_wait_fence(fence, Duration::from_millis(1)), FenceStatus::TimeoutExpired);
    assert_eq!(device.client_wait_fence(fence, Duration::from_millis(1)), FenceStatus::Signaled);
    assert!(device.is_fence_signaled(fence));
}

#[test]
fn test_fence_never_signal_until_gpu_catches_up() {
    let device = MockGraphicsDevice::new();
    device.set_fence_policy(FencePolicy::NeverSignal);
    let fence = device.insert_fence().unwrap();

    assert_eq!(device.client_wait_fence(fence, Duration::from_millis(1)), FenceStatus::TimeoutExpired);
    device.signal_all_fences();
    assert_eq!(device.client_wait_fence(fence, Duration::ZERO), FenceStatus::Signaled);
}

#[test]
fn test_unknown_or_deleted_fence_fails() {
    let device = MockGraphicsDevice::new();
    let fence = device.insert_fence().unwrap();
    device.delete_fence(fence);

    assert_eq!(device.live_fences(), 0);
    assert_eq!(device.client_wait_fence(fence, Duration::ZERO), FenceStatus::Failed);
}

// ============================================================================
// Framebuffer Completeness Tests
// ============================================================================

#[test]
fn test_framebuffer_complete_when_consistent() {
    let device = MockGraphicsDevice::new();
    let color = device.create_attachment(&attachment_desc("c", 64, 64, 4)).unwrap();
    let fb = device.create_framebuffer(&framebuffer_desc("fb", vec![color])).unwrap();

    assert_eq!(device.framebuffer_status(fb.as_ref()), FramebufferStatus::Complete);
    assert_eq!(fb.samples(), 4);
}

#[test]
fn test_framebuffer_size_mismatch_incomplete() {
    let device = MockGraphicsDevice::new();
    let color = device.create_attachment(&attachment_desc("c", 32, 64, 1)).unwrap();
    let fb = device.create_framebuffer(&framebuffer_desc("fb", vec![color])).unwrap();

    assert_eq!(
        device.framebuffer_status(fb.as_ref()),
        FramebufferStatus::IncompleteAttachment(AttachmentPoint::Color(0))
    );
}

#[test]
fn test_framebuffer_sample_mismatch_incomplete() {
    let device = MockGraphicsDevice::new();
    let a = device.create_attachment(&attachment_desc("a", 64, 64, 4)).unwrap();
    let b = device.create_attachment(&attachment_desc("b", 64, 64, 1)).unwrap();
    let fb = device.create_framebuffer(&framebuffer_desc("fb", vec![a, b])).unwrap();

    assert_eq!(
        device.framebuffer_status(fb.as_ref()),
        FramebufferStatus::IncompleteMultisample(AttachmentPoint::Color(1))
    );
}

#[test]
fn test_framebuffer_policy_rejects_multisample() {
    let device = MockGraphicsDevice::new();
    device.set_framebuffer_policy(FramebufferPolicy { reject_multisample: true, ..Default::default() });
    let color = device.create_attachment(&attachment_desc("c", 64, 64, 4)).unwrap();
    let fb = device.create_framebuffer(&framebuffer_desc("fb", vec![color])).unwrap();

    assert!(!device.framebuffer_status(fb.as_ref()).is_complete());
}

#[test]
fn test_empty_framebuffer_missing_attachment() {
    let device = MockGraphicsDevice::new();
    let fb = device.create_framebuffer(&framebuffer_desc("fb", vec![])).unwrap();
    assert_eq!(device.framebuffer_status(fb.as_ref()), FramebufferStatus::MissingAttachment);
}

#[test]
fn test_framebuffer_policy_rejects_by_name() {
    let device = MockGraphicsDevice::new();
    device.set_framebuffer_policy(FramebufferPolicy { reject_named: Some("atlas"), ..Default::default() });
    let a = device.create_attachment(&attachment_desc("a", 64, 64, 1)).unwrap();
    let b = device.create_attachment(&attachment_desc("b", 64, 64, 1)).unwrap();
    let atlas = device.create_framebuffer(&framebuffer_desc("atlas", vec![a])).unwrap();
    let other = device.create_framebuffer(&framebuffer_desc("other", vec![b])).unwrap();

    assert!(!device.framebuffer_status(atlas.as_ref()).is_complete());
    assert!(device.framebuffer_status(other.as_ref()).is_complete());
}

#[test]
fn test_creation_failure_policy() {
    let device = MockGraphicsDevice::new();
    device.set_framebuffer_policy(FramebufferPolicy {
        fail_attachment: Some("primary_resolve"),
        fail_framebuffer: Some("post_process"),
        ..Default::default()
    });

    assert!(device.create_attachment(&attachment_desc("primary_resolve.depth", 64, 64, 1)).is_err());
    let color = device.create_attachment(&attachment_desc("primary.color0", 64, 64, 1)).unwrap();
    assert!(device.create_framebuffer(&framebuffer_desc("post_process", vec![color])).is_err());
    assert_eq!(device.counters.live_framebuffers(), 0);
}

// ============================================================================
// Blit Rule Tests
// ============================================================================

fn depth_framebuffer(device: &MockGraphicsDevice, name: &str, size: u32, samples: u32, format: AttachmentFormat) -> Arc<dyn Framebuffer> {
    let mut desc = attachment_desc(&format!("{}.depth", name), size, size, samples);
    desc.format = format;
    let depth = device.create_attachment(&desc).unwrap();
    device.create_framebuffer(&FramebufferDesc {
        name: name.to_string(),
        color_attachments: Vec::new(),
        depth_attachment: Some(depth),
        stencil_attachment: None,
        width: size,
        height: size,
    }).unwrap()
}

fn color_framebuffer(device: &MockGraphicsDevice, name: &str, size: u32, samples: u32) -> Arc<dyn Framebuffer> {
    let color = device.create_attachment(&attachment_desc(&format!("{}.color0", name), size, size, samples)).unwrap();
    let mut desc = framebuffer_desc(name, vec![color]);
    desc.width = size;
    desc.height = size;
    device.create_framebuffer(&desc).unwrap()
}

#[test]
fn test_color_blit_rules() {
    let device = MockGraphicsDevice::new();
    let ms = color_framebuffer(&device, "ms", 64, 4);
    let single = color_framebuffer(&device, "single", 64, 1);
    let small = color_framebuffer(&device, "small", 32, 1);

    // Resolve at equal size, scale between single-sampled sets
    device.blit_framebuffer(&ms, Some(&single), BlitMask::COLOR).unwrap();
    device.blit_framebuffer(&single, Some(&small), BlitMask::COLOR).unwrap();
    device.blit_framebuffer(&single, None, BlitMask::COLOR).unwrap();
    assert!(device.check_errors("valid blits").is_ok());

    device.blit_framebuffer(&ms, Some(&small), BlitMask::COLOR).unwrap();
    assert!(device.check_errors("scaled resolve").is_err());

    device.blit_framebuffer(&single, Some(&ms), BlitMask::COLOR).unwrap();
    assert!(device.check_errors("upsample").is_err());
}

#[test]
fn test_depth_stencil_blit_rules() {
    let device = MockGraphicsDevice::new();
    let packed = AttachmentFormat::D24_UNORM_S8_UINT;
    let ms = depth_framebuffer(&device, "ms", 64, 4, packed);
    let copy = depth_framebuffer(&device, "copy", 64, 1, packed);
    let other_format = depth_framebuffer(&device, "d32", 64, 1, AttachmentFormat::D32_SFLOAT_S8_UINT);
    let small = depth_framebuffer(&device, "small", 32, 1, packed);

    device.blit_framebuffer(&ms, Some(&copy), BlitMask::DEPTH | BlitMask::STENCIL).unwrap();
    assert!(device.check_errors("resolve").is_ok());

    device.blit_framebuffer(&copy, Some(&other_format), BlitMask::STENCIL).unwrap();
    assert!(device.check_errors("format mismatch").is_err());

    device.blit_framebuffer(&ms, Some(&small), BlitMask::DEPTH).unwrap();
    assert!(device.check_errors("scaled resolve").is_err());

    // Presentation has no depth: skipped without error
    device.blit_framebuffer(&copy, None, BlitMask::DEPTH).unwrap();
    assert!(device.check_errors("present depth").is_ok());
}

// ============================================================================
// Lifetime Counter Tests
// ============================================================================

#[test]
fn test_counters_track_drops() {
    let device = MockGraphicsDevice::new();
    {
        let color = device.create_attachment(&attachment_desc("c", 64, 64, 1)).unwrap();
        let _fb = device.create_framebuffer(&framebuffer_desc("fb", vec![color])).unwrap();
        assert_eq!(device.counters.live_attachments(), 1);
        assert_eq!(device.counters.live_framebuffers(), 1);
    }
    assert_eq!(device.counters.live_attachments(), 0);
    assert_eq!(device.counters.live_framebuffers(), 0);
}

#[test]
fn test_texture_attachments_get_handles() {
    let device = MockGraphicsDevice::new();
    let mut desc = attachment_desc("t", 16, 16, 1);
    desc.storage = AttachmentStorage::Texture;
    let texture = device.create_attachment(&desc).unwrap();
    let rb = device.create_attachment(&attachment_desc("r", 16, 16, 1)).unwrap();

    assert!(texture.texture_handle().is_some());
    assert!(rb.texture_handle().is_none());
}

// ============================================================================
// Command Log / Diagnostics Tests
// ============================================================================

#[test]
fn test_draw_submissions_and_stats() {
    let device = MockGraphicsDevice::new();
    let draw = DrawElementsCommand { index_count: 3, first_index: 0, base_vertex: 0, draw_id: 0 };
    device.multi_draw_elements(&[draw, draw]).unwrap();
    device.multi_draw_elements(&[draw]).unwrap();

    assert_eq!(device.draw_submissions().len(), 2);
    let stats = device.stats();
    assert_eq!(stats.draw_submissions, 2);
    assert_eq!(stats.draws, 3);
}

#[test]
fn test_injected_error_reported_once() {
    let device = MockGraphicsDevice::new();
    device.inject_error("GL_INVALID_OPERATION");

    assert!(device.check_errors("depth").is_err());
    assert!(device.check_errors("depth").is_ok());
}

#[test]
fn test_program_manager_failure() {
    let manager = MockProgramManager::failing("interaction_stencil");
    assert!(manager.load_program(&ProgramDesc::new("depth_fast", VertexLayoutKind::Draw)).is_ok());
    assert!(manager.load_program(&ProgramDesc::new("interaction_stencil", VertexLayoutKind::Draw)).is_err());
    assert_eq!(manager.loaded.lock().unwrap().as_slice(), &["depth_fast".to_string()]);
}

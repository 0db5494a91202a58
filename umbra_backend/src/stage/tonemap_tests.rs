/// Tests for the tonemap present pass

use super::*;
use super::super::test_context::*;
use crate::graphics_device::mock_graphics_device::MockCommand;
use crate::target::PRIMARY;

fn setup() -> (Harness, TonemapStage) {
    let harness = Harness::with_settings(|s| s.tonemap.set(true));
    let mut stage = TonemapStage::new();
    harness.init(&mut stage);
    (harness, stage)
}

#[test]
fn test_present_sequence() {
    let (mut harness, mut stage) = setup();
    let source = harness.targets.get(PRIMARY).and_then(|set| set.color_texture(0)).unwrap();

    stage.present(&mut harness.ctx()).unwrap();

    let full = Rect2D::from_size(1280, 720);
    let commands = harness.device.commands();
    assert_eq!(commands[0], MockCommand::BindFramebuffer(Some(POST_PROCESS.to_string())));
    assert_eq!(commands[1], MockCommand::SetViewport(full));
    assert_eq!(commands[2], MockCommand::SetScissor(full));
    assert!(matches!(&commands[3], MockCommand::SetRenderState(state) if state.depth_test.is_none()));
    assert_eq!(commands[4], MockCommand::BindProgram(Some("tonemap".to_string())));
    assert_eq!(commands[5], MockCommand::BindTexture { unit: TONEMAP_SOURCE_UNIT, texture: source });
    assert_eq!(commands[6], MockCommand::DrawFullscreen);
    assert_eq!(commands[7], MockCommand::Blit {
        src: POST_PROCESS.to_string(),
        dst: None,
        mask: BlitMask::COLOR,
    });
    assert_eq!(commands[8], MockCommand::BindFramebuffer(None));
    assert_eq!(commands.len(), 9);
}

#[test]
fn test_multisampled_primary_samples_resolve() {
    let mut harness = Harness::with_settings(|s| {
        s.tonemap.set(true);
        s.multisample.set(4);
    });
    let mut stage = TonemapStage::new();
    harness.init(&mut stage);
    let primary = harness.targets.get(PRIMARY).unwrap();
    assert_eq!(primary.samples(), 4);
    let resolved = primary.resolve_set().and_then(|set| set.color_texture(0)).unwrap();

    stage.present(&mut harness.ctx()).unwrap();

    assert_eq!(harness.device.count_commands(|c| *c == MockCommand::BindTexture {
        unit: TONEMAP_SOURCE_UNIT,
        texture: resolved,
    }), 1);
}

#[test]
fn test_present_without_post_process_fails() {
    let mut harness = Harness::new();
    let mut stage = TonemapStage::new();
    harness.init(&mut stage);

    let result = stage.present(&mut harness.ctx());
    assert!(matches!(result, Err(Error::InvalidResource(_))));
    assert!(harness.device.commands().is_empty());
}

#[test]
fn test_present_before_init_fails() {
    let mut harness = Harness::with_settings(|s| s.tonemap.set(true));
    let mut stage = TonemapStage::new();
    assert!(stage.present(&mut harness.ctx()).is_err());
}

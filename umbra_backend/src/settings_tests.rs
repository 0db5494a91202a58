/// Tests for Setting<T>, RenderSettings and BackendConfig

use super::*;

// ============================================================================
// Tests: Setting<T>
// ============================================================================

#[test]
fn test_setting_new_not_modified() {
    let s = Setting::new(4u32);
    assert_eq!(s.get(), 4);
    assert!(!s.is_modified());
}

#[test]
fn test_setting_set_marks_modified() {
    let mut s = Setting::new(1u32);
    s.set(4);
    assert_eq!(s.get(), 4);
    assert!(s.is_modified());

    s.clear_modified();
    assert!(!s.is_modified());
}

#[test]
fn test_setting_set_same_value_not_modified() {
    let mut s = Setting::new(true);
    s.set(true);
    assert!(!s.is_modified());
}

#[test]
fn test_setting_mark_modified() {
    let mut s = Setting::new(DepthBits::D24);
    s.mark_modified();
    assert!(s.is_modified());
    assert_eq!(s.get(), DepthBits::D24);
}

// ============================================================================
// Tests: RenderSettings
// ============================================================================

#[test]
fn test_render_settings_defaults() {
    let settings = RenderSettings::default();
    assert_eq!(settings.multisample.get(), 1);
    assert_eq!(settings.shadow_technique.get(), ShadowTechnique::StencilVolume);
    assert_eq!(settings.soft_shadow_quality.get(), 0);
    assert!(!settings.primary_layout_modified());
    assert!(!settings.shadow_layout_modified());
}

#[test]
fn test_primary_layout_modified_by_multisample() {
    let mut settings = RenderSettings::default();
    settings.multisample.set(4);
    assert!(settings.primary_layout_modified());
    assert!(!settings.shadow_layout_modified());
}

#[test]
fn test_depth_bits_affects_both_layouts() {
    let mut settings = RenderSettings::default();
    settings.depth_bits.set(DepthBits::D32);
    assert!(settings.primary_layout_modified());
    assert!(settings.shadow_layout_modified());
}

#[test]
fn test_clear_modified_resets_everything() {
    let mut settings = RenderSettings::default();
    settings.multisample.set(8);
    settings.tonemap.set(true);
    settings.debug_target.set(Some("shadow_atlas".to_string()));
    settings.clear_modified();

    assert!(!settings.primary_layout_modified());
    assert!(!settings.tonemap.is_modified());
    assert!(!settings.debug_target.is_modified());
    assert_eq!(settings.multisample.get(), 8);
}

// ============================================================================
// Tests: BackendConfig
// ============================================================================

#[test]
fn test_backend_config_defaults() {
    let config = BackendConfig::default();
    assert_eq!(config.param_buffer_size, 16 * 1024 * 1024);
    assert_eq!(config.max_draws_per_batch, 256);
    assert_eq!(config.fence_wait_timeout, Duration::from_secs(1));
    assert!(config.fence_wait_slice < config.fence_wait_timeout);
}

/// Tests for the shadow atlas page allocator

use super::*;
use crate::graphics_device::Rect2D;

#[test]
fn test_pages_laid_out_row_major() {
    let mut atlas = ShadowAtlas::new(4096, 4);
    assert_eq!(atlas.page_size(), 1024);
    assert_eq!(atlas.page_count(), 16);

    let first = atlas.allocate().unwrap();
    let second = atlas.allocate().unwrap();
    assert_eq!(first.viewport, Rect2D::new(0, 0, 1024, 1024));
    assert_eq!(second.viewport, Rect2D::new(1024, 0, 1024, 1024));

    for _ in 2..4 {
        atlas.allocate().unwrap();
    }
    let fifth = atlas.allocate().unwrap();
    assert_eq!(fifth.index, 4);
    assert_eq!(fifth.viewport, Rect2D::new(0, 1024, 1024, 1024));
}

#[test]
fn test_exhausted_atlas_returns_none() {
    let mut atlas = ShadowAtlas::new(1024, 2);
    for _ in 0..4 {
        assert!(atlas.allocate().is_some());
    }
    assert!(atlas.allocate().is_none());
    assert_eq!(atlas.allocated(), 4);
}

#[test]
fn test_reset_releases_pages() {
    let mut atlas = ShadowAtlas::new(1024, 1);
    atlas.allocate().unwrap();
    assert!(atlas.allocate().is_none());

    atlas.reset();
    assert_eq!(atlas.allocate().unwrap().index, 0);
}

#[test]
fn test_zero_sized_atlas_allocates_nothing() {
    let mut atlas = ShadowAtlas::new(0, 4);
    assert!(atlas.allocate().is_none());
}

#[test]
fn test_uv_scale_bias_maps_clip_space_to_page() {
    let mut atlas = ShadowAtlas::new(1024, 2);
    atlas.allocate().unwrap();
    let page = atlas.allocate().unwrap();

    let [sx, sy, bx, by] = page.uv_scale_bias(1024);
    // clip -1 maps to the page's left edge, +1 to its right edge
    assert_eq!(-sx + bx, 0.5);
    assert_eq!(sx + bx, 1.0);
    assert_eq!(-sy + by, 0.0);
    assert_eq!(sy + by, 0.5);
}

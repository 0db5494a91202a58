/// Page allocator over the shadow atlas
///
/// The atlas is split into a fixed grid of square pages. Each shadowed light
/// takes one page for the frame; pages are handed out linearly and all
/// released at the end of the frame.

use crate::graphics_device::Rect2D;

/// One page of the atlas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPage {
    pub index: u32,
    /// Pixel rectangle of the page inside the atlas
    pub viewport: Rect2D,
}

impl ShadowPage {
    /// Scale and bias mapping light clip space [-1, 1] onto this page's
    /// texture coordinates: `uv = xy * scale + bias`
    pub fn uv_scale_bias(&self, atlas_size: u32) -> [f32; 4] {
        let size = atlas_size.max(1) as f32;
        let half_w = self.viewport.width as f32 * 0.5 / size;
        let half_h = self.viewport.height as f32 * 0.5 / size;
        [
            half_w,
            half_h,
            self.viewport.x as f32 / size + half_w,
            self.viewport.y as f32 / size + half_h,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ShadowAtlas {
    atlas_size: u32,
    pages_per_row: u32,
    next: u32,
}

impl ShadowAtlas {
    pub fn new(atlas_size: u32, pages_per_row: u32) -> Self {
        Self { atlas_size, pages_per_row: pages_per_row.max(1), next: 0 }
    }

    pub fn atlas_size(&self) -> u32 {
        self.atlas_size
    }

    pub fn page_size(&self) -> u32 {
        self.atlas_size / self.pages_per_row
    }

    pub fn page_count(&self) -> u32 {
        self.pages_per_row * self.pages_per_row
    }

    pub fn allocated(&self) -> u32 {
        self.next
    }

    /// Resize the grid; releases every page
    pub fn resize(&mut self, atlas_size: u32) {
        self.atlas_size = atlas_size;
        self.next = 0;
    }

    /// Next free page, `None` when the atlas is exhausted
    pub fn allocate(&mut self) -> Option<ShadowPage> {
        if self.next >= self.page_count() || self.page_size() == 0 {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let page_size = self.page_size();
        let column = index % self.pages_per_row;
        let row = index / self.pages_per_row;
        Some(ShadowPage {
            index,
            viewport: Rect2D::new(
                (column * page_size) as i32,
                (row * page_size) as i32,
                page_size,
                page_size,
            ),
        })
    }

    /// Release every page (end of frame)
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
#[path = "shadow_atlas_tests.rs"]
mod tests;

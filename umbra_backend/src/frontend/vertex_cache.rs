/// GPU buffers behind the static and per-frame vertex caches
///
/// The frontend fills them; the batch executor binds the pair matching each
/// surface's cache class.

use std::sync::Arc;

use crate::graphics_device::Buffer;
use super::surface::CacheClass;

#[derive(Clone)]
pub struct CacheBuffers {
    pub vertices: Arc<dyn Buffer>,
    pub indices: Arc<dyn Buffer>,
}

#[derive(Clone)]
pub struct VertexCacheBuffers {
    pub static_cache: CacheBuffers,
    pub frame_cache: CacheBuffers,
}

impl VertexCacheBuffers {
    pub fn new(static_cache: CacheBuffers, frame_cache: CacheBuffers) -> Self {
        Self { static_cache, frame_cache }
    }

    pub fn get(&self, class: CacheClass) -> &CacheBuffers {
        match class {
            CacheClass::Static => &self.static_cache,
            CacheClass::Frame => &self.frame_cache,
        }
    }
}

/// Batched submission of surfaces sharing a program
///
/// A batch collects up to `max_count` draws with one parameter struct each.
/// Flushing writes the parameter array into the shared ring, binds it at
/// `DRAW_PARAMS_BINDING` and issues one multi-draw per run of surfaces living
/// in the same vertex and index caches. Each draw carries its array index as `draw_id`.

use std::sync::Arc;
use bytemuck::Pod;

use crate::error::{Error, Result};
use crate::frontend::{CacheClasses, DrawSurface, VertexCacheBuffers};
use crate::graphics_device::{
    BufferBindingTarget, DrawElementsCommand, GraphicsDevice, VertexLayoutKind, DRAW_PARAMS_BINDING,
    INDEX_SIZE,
};
use crate::ring_buffer::{FenceWaitPolicy, RingAllocation, RingBuffer, RingStats};
use crate::settings::BackendConfig;
use crate::{engine_debug, engine_error, engine_warn};

/// Name of the shared parameter ring
pub const PARAM_RING_NAME: &str = "draw_params";

/// Geometry of one draw inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDraw {
    pub classes: CacheClasses,
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

impl BatchDraw {
    /// Translate the surface's cache byte offsets into element offsets
    ///
    /// `None` when an offset does not fit the draw command fields.
    pub fn from_surface(surface: &DrawSurface, layout: VertexLayoutKind) -> Option<Self> {
        let stride = layout.stride().max(1) as u64;
        Some(Self {
            classes: surface.cache_classes(),
            index_count: surface.num_indices,
            first_index: u32::try_from(surface.index_cache.offset / INDEX_SIZE as u64).ok()?,
            base_vertex: i32::try_from(surface.vertex_cache.offset / stride).ok()?,
        })
    }
}

/// An open batch of per-draw parameters
///
/// Parameters are staged on the CPU and reach the ring only when the batch
/// is executed, so nothing partially filled is ever GPU visible.
pub struct Batch<P: Pod> {
    reservation: RingAllocation,
    params: Vec<P>,
    draws: Vec<BatchDraw>,
    max_count: usize,
    layout: VertexLayoutKind,
}

impl<P: Pod> Batch<P> {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.params.len() >= self.max_count
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn layout(&self) -> VertexLayoutKind {
        self.layout
    }

    /// Ring range reserved for this batch
    pub fn reservation(&self) -> RingAllocation {
        self.reservation
    }

    /// Append one draw
    ///
    /// # Errors
    ///
    /// `InvalidResource` when the batch is full (use
    /// `BatchExecutor::append` to flush automatically) or the surface's
    /// cache offsets are out of range.
    pub fn push(&mut self, surface: &DrawSurface, params: P) -> Result<()> {
        if self.is_full() {
            return Err(Error::InvalidResource(format!(
                "batch full ({} draws)", self.max_count
            )));
        }
        let draw = BatchDraw::from_surface(surface, self.layout).ok_or_else(|| Error::InvalidResource(format!(
            "cache offsets of '{}' out of range (vertex {}, index {})",
            surface.material.name, surface.vertex_cache.offset, surface.index_cache.offset
        )))?;
        self.params.push(params);
        self.draws.push(draw);
        Ok(())
    }

    pub fn params(&self) -> &[P] {
        &self.params
    }

    pub fn params_mut(&mut self, index: usize) -> Option<&mut P> {
        self.params.get_mut(index)
    }

    pub fn draws(&self) -> &[BatchDraw] {
        &self.draws
    }

    fn clear(&mut self) {
        self.params.clear();
        self.draws.clear();
    }
}

/// Executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Non-empty batch flushes
    pub batches: u64,
    /// Multi-draw submissions
    pub draw_submissions: u64,
    pub draws: u64,
    /// Surfaces dropped because their cache offsets overflow a draw command
    pub skipped_draws: u64,
    /// Uniform blocks uploaded outside batches
    pub uniform_uploads: u64,
}

pub struct BatchExecutor {
    device: Arc<dyn GraphicsDevice>,
    ring: RingBuffer,
    vertex_caches: VertexCacheBuffers,
    max_draws_per_batch: u32,
    max_uniform_block_size: u64,
    stats: BatchStats,
}

impl BatchExecutor {
    /// Create the executor and its shared parameter ring
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        config: &BackendConfig,
        vertex_caches: VertexCacheBuffers,
    ) -> Result<Self> {
        let limits = device.limits();
        let ring = RingBuffer::new(
            Arc::clone(&device),
            PARAM_RING_NAME,
            config.param_buffer_size,
            limits.uniform_buffer_offset_alignment,
            FenceWaitPolicy {
                slice: config.fence_wait_slice,
                timeout: config.fence_wait_timeout,
            },
        )?;

        Ok(Self {
            device,
            ring,
            vertex_caches,
            max_draws_per_batch: config.max_draws_per_batch.max(1),
            max_uniform_block_size: limits.max_uniform_block_size,
            stats: BatchStats::default(),
        })
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.stats()
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Largest batch of `P` a uniform block can hold, capped by the config
    pub fn max_batch_size<P: Pod>(&self) -> usize {
        let size = std::mem::size_of::<P>().max(1) as u64;
        let by_block = self.max_uniform_block_size / size;
        by_block.min(self.max_draws_per_batch as u64).max(1) as usize
    }

    /// Open a batch, reserving ring space for a full parameter array
    pub fn begin_batch<P: Pod>(&mut self, layout: VertexLayoutKind) -> Result<Batch<P>> {
        let max_count = self.max_batch_size::<P>();
        let reservation = self.ring.reserve(Self::array_bytes::<P>(max_count))?;
        Ok(Batch {
            reservation,
            params: Vec::with_capacity(max_count),
            draws: Vec::with_capacity(max_count),
            max_count,
            layout,
        })
    }

    /// Append a draw, flushing first when the batch is full
    ///
    /// A surface whose cache offsets do not fit a draw command is skipped
    /// with a warning.
    pub fn append<P: Pod>(&mut self, batch: &mut Batch<P>, surface: &DrawSurface, params: P) -> Result<()> {
        if BatchDraw::from_surface(surface, batch.layout).is_none() {
            engine_warn!("umbra::BatchExecutor", "Skipping surface of '{}': cache offsets out of range (vertex {}, index {})",
                surface.material.name, surface.vertex_cache.offset, surface.index_cache.offset);
            self.stats.skipped_draws += 1;
            return Ok(());
        }
        if batch.is_full() {
            self.execute_draw_batch(batch)?;
        }
        batch.push(surface, params)
    }

    /// Submit the accumulated draws and start over with a fresh reservation
    ///
    /// No-op for an empty batch.
    pub fn execute_draw_batch<P: Pod>(&mut self, batch: &mut Batch<P>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.submit(batch)?;
        batch.reservation = self.ring.reserve(Self::array_bytes::<P>(batch.max_count))?;
        Ok(())
    }

    /// Submit the remaining draws and close the batch
    pub fn finish_batch<P: Pod>(&mut self, mut batch: Batch<P>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.submit(&mut batch)
    }

    fn submit<P: Pod>(&mut self, batch: &mut Batch<P>) -> Result<()> {
        let bytes = Self::array_bytes::<P>(batch.max_count);

        // Uniform uploads may have committed past the reservation made at
        // begin_batch; reserving again is free when nothing moved
        let allocation = self.ring.reserve(bytes)?;
        batch.reservation = allocation;

        self.ring.write(&allocation, 0, bytemuck::cast_slice(&batch.params))?;
        self.ring.mark_used(Self::array_bytes::<P>(batch.len()))?;
        self.ring.bind_range(BufferBindingTarget::Uniform, DRAW_PARAMS_BINDING, &allocation)?;

        let mut start = 0;
        while start < batch.draws.len() {
            let classes = batch.draws[start].classes;
            let end = batch.draws[start..]
                .iter()
                .position(|d| d.classes != classes)
                .map_or(batch.draws.len(), |n| start + n);

            let vertices = &self.vertex_caches.get(classes.vertices).vertices;
            let indices = &self.vertex_caches.get(classes.indices).indices;
            self.device.bind_vertex_cache(vertices, indices)?;

            let commands: Vec<DrawElementsCommand> = batch.draws[start..end]
                .iter()
                .enumerate()
                .map(|(i, d)| DrawElementsCommand {
                    index_count: d.index_count,
                    first_index: d.first_index,
                    base_vertex: d.base_vertex,
                    draw_id: (start + i) as u32,
                })
                .collect();
            self.device.multi_draw_elements(&commands).map_err(|e| {
                engine_error!("umbra::BatchExecutor", "Multi-draw of {} draws failed: {}", commands.len(), e);
                e
            })?;

            self.stats.draw_submissions += 1;
            start = end;
        }

        self.stats.batches += 1;
        self.stats.draws += batch.len() as u64;
        engine_debug!("umbra::BatchExecutor", "Flushed batch of {} draws at offset {}", batch.len(), allocation.offset);

        batch.clear();
        Ok(())
    }

    /// Upload one uniform block through the ring and bind it
    pub fn upload_uniforms<U: Pod>(&mut self, binding: u32, value: &U) -> Result<()> {
        let allocation = self.ring.reserve(std::mem::size_of::<U>() as u64)?;
        self.ring.write(&allocation, 0, bytemuck::bytes_of(value))?;
        self.ring.mark_used(allocation.size)?;
        self.ring.bind_range(
            BufferBindingTarget::Uniform,
            binding,
            &allocation.prefix(std::mem::size_of::<U>() as u64),
        )?;
        self.stats.uniform_uploads += 1;
        Ok(())
    }

    /// Fence everything committed since the last lock
    pub fn lock(&mut self) -> Result<()> {
        self.ring.lock()
    }

    fn array_bytes<P>(count: usize) -> u64 {
        (std::mem::size_of::<P>() * count) as u64
    }
}

#[cfg(test)]
#[path = "batch_executor_tests.rs"]
mod tests;

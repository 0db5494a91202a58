/// Fence-guarded persistent ring buffer.
///
/// One persistently mapped buffer is carved into consecutive reservations.
/// Committed bytes are handed to the GPU in fenced ranges (`lock`); a later
/// reservation overlapping a fenced range first waits for its fence, so the
/// CPU never overwrites bytes the GPU may still be reading.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use bytemuck::Pod;

use crate::error::{Error, Result};
use crate::graphics_device::{
    align_up, Buffer, BufferBindingTarget, BufferDesc, BufferUsage, FenceId, FenceStatus,
    GraphicsDevice,
};
use crate::{engine_debug, engine_error, engine_err};

/// Byte range handed out by `RingBuffer::reserve`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAllocation {
    pub offset: u64,
    pub size: u64,
}

impl RingAllocation {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Sub-range of this allocation starting at its offset
    pub fn prefix(&self, size: u64) -> RingAllocation {
        RingAllocation { offset: self.offset, size: size.min(self.size) }
    }
}

/// A fenced range the GPU may still read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    pub offset: u64,
    pub length: u64,
    pub fence: FenceId,
}

impl LockRecord {
    pub fn overlaps(&self, offset: u64, length: u64) -> bool {
        self.offset < offset + length && offset < self.offset + self.length
    }
}

/// Bounded fence wait: one poll, then `timeout / slice` blocking waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceWaitPolicy {
    pub slice: Duration,
    pub timeout: Duration,
}

impl Default for FenceWaitPolicy {
    fn default() -> Self {
        Self { slice: Duration::from_millis(1), timeout: Duration::from_secs(1) }
    }
}

impl FenceWaitPolicy {
    fn attempts(&self) -> u32 {
        if self.slice.is_zero() {
            return 1;
        }
        (self.timeout.as_nanos() / self.slice.as_nanos()).max(1) as u32
    }
}

/// Counters exposed for the frame statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Waits that did not succeed on the initial poll
    pub blocking_waits: u64,
    pub wraps: u64,
    pub locks: u64,
}

pub struct RingBuffer {
    device: Arc<dyn GraphicsDevice>,
    buffer: Arc<dyn Buffer>,
    name: String,
    capacity: u64,
    alignment: u64,
    current: u64,
    last_locked: u64,
    locks: VecDeque<LockRecord>,
    wait_policy: FenceWaitPolicy,
    stats: RingStats,
}

impl RingBuffer {
    /// Allocate the persistent buffer and reset all offsets
    ///
    /// # Errors
    ///
    /// Allocation failure is fatal and propagated as-is.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        name: &str,
        capacity: u64,
        alignment: u64,
        wait_policy: FenceWaitPolicy,
    ) -> Result<Self> {
        if capacity == 0 {
            engine_error!("umbra::RingBuffer", "Ring '{}' created with zero capacity", name);
            return Err(Error::InitializationFailed(format!("Ring '{}' has zero capacity", name)));
        }

        let buffer = device.create_buffer(&BufferDesc {
            name: name.to_string(),
            size: capacity,
            usage: BufferUsage::Uniform,
            persistent: true,
        }).map_err(|e| {
            engine_error!("umbra::RingBuffer", "Failed to allocate ring '{}' ({} bytes): {}", name, capacity, e);
            e
        })?;

        engine_debug!("umbra::RingBuffer", "Ring '{}' ready: {} bytes, alignment {}", name, capacity, alignment);

        Ok(Self {
            device,
            buffer,
            name: name.to_string(),
            capacity,
            alignment: alignment.max(1),
            current: 0,
            last_locked: 0,
            locks: VecDeque::new(),
            wait_policy,
            stats: RingStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Current write offset
    pub fn current_offset(&self) -> u64 {
        self.current
    }

    pub fn last_locked_offset(&self) -> u64 {
        self.last_locked
    }

    /// Ranges still guarded by a fence, oldest first
    pub fn outstanding_locks(&self) -> impl Iterator<Item = &LockRecord> {
        self.locks.iter()
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    pub fn buffer(&self) -> &Arc<dyn Buffer> {
        &self.buffer
    }

    /// Reserve `size` bytes (rounded up to the alignment) at the write offset
    ///
    /// Wraps to offset 0 when the reservation does not fit, fencing the
    /// pending range first, then waits on every fenced range the
    /// reservation overlaps. Nothing is consumed until `mark_used`.
    ///
    /// # Errors
    ///
    /// `InvalidResource` when `size` exceeds the capacity; `FenceTimeout`
    /// when a fence does not signal in time.
    pub fn reserve(&mut self, size: u64) -> Result<RingAllocation> {
        let size = align_up(size, self.alignment);
        if size > self.capacity {
            engine_error!("umbra::RingBuffer", "Reservation of {} bytes exceeds ring '{}' capacity {}",
                size, self.name, self.capacity);
            return Err(Error::InvalidResource(format!(
                "reservation of {} bytes exceeds ring '{}' capacity {}", size, self.name, self.capacity
            )));
        }

        if self.current + size > self.capacity {
            self.lock()?;
            self.current = 0;
            self.last_locked = 0;
            self.stats.wraps += 1;
        }

        let mut i = 0;
        while i < self.locks.len() {
            let record = self.locks[i];
            if record.overlaps(self.current, size) {
                // Stays guarded when the wait fails
                self.wait_for(record)?;
                self.locks.remove(i);
            } else {
                i += 1;
            }
        }

        Ok(RingAllocation { offset: self.current, size })
    }

    /// Copy `bytes` into `allocation` starting `offset` bytes into it
    pub fn write(&self, allocation: &RingAllocation, offset: u64, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() as u64 > allocation.size {
            engine_error!("umbra::RingBuffer", "Write of {} bytes at +{} overflows allocation of {} bytes in '{}'",
                bytes.len(), offset, allocation.size, self.name);
            return Err(Error::InvalidResource(format!(
                "write of {} bytes at +{} overflows allocation of {} bytes", bytes.len(), offset, allocation.size
            )));
        }
        self.buffer.update(allocation.offset + offset, bytes)
    }

    /// Write `value` into slot `index` of an allocation viewed as `[T]`
    pub fn write_pod<T: Pod>(&self, allocation: &RingAllocation, index: usize, value: &T) -> Result<()> {
        let stride = std::mem::size_of::<T>() as u64;
        self.write(allocation, index as u64 * stride, bytemuck::bytes_of(value))
    }

    /// Advance the write offset past `size` committed bytes (no fence)
    pub fn mark_used(&mut self, size: u64) -> Result<()> {
        let size = align_up(size, self.alignment);
        if self.current + size > self.capacity {
            engine_error!("umbra::RingBuffer", "Commit of {} bytes at {} overruns ring '{}'",
                size, self.current, self.name);
            return Err(Error::InvalidResource(format!(
                "commit of {} bytes at {} overruns ring '{}'", size, self.current, self.name
            )));
        }
        self.current += size;
        Ok(())
    }

    /// Fence everything committed since the previous lock
    ///
    /// No-op when nothing was committed.
    pub fn lock(&mut self) -> Result<()> {
        if self.current == self.last_locked {
            return Ok(());
        }

        let fence = self.device.insert_fence()
            .map_err(|e| engine_err!("umbra::RingBuffer", "Fence insertion for ring '{}' failed: {}", self.name, e))?;

        self.locks.push_back(LockRecord {
            offset: self.last_locked,
            length: self.current - self.last_locked,
            fence,
        });
        self.last_locked = self.current;
        self.stats.locks += 1;
        Ok(())
    }

    /// Bind a committed range to an indexed binding point
    pub fn bind_range(&self, target: BufferBindingTarget, binding: u32, range: &RingAllocation) -> Result<()> {
        self.device.bind_buffer_range(target, binding, &self.buffer, range.offset, range.size)
    }

    /// Bind the whole ring to an indexed binding point
    pub fn bind_base(&self, target: BufferBindingTarget, binding: u32) -> Result<()> {
        self.device.bind_buffer_range(target, binding, &self.buffer, 0, self.capacity)
    }

    fn wait_for(&mut self, record: LockRecord) -> Result<()> {
        match self.device.client_wait_fence(record.fence, Duration::ZERO) {
            FenceStatus::Signaled => {
                self.device.delete_fence(record.fence);
                return Ok(());
            }
            FenceStatus::Failed => return Err(self.fence_failure(record, "wait failed")),
            FenceStatus::TimeoutExpired => {}
        }

        self.stats.blocking_waits += 1;
        for _ in 0..self.wait_policy.attempts() {
            match self.device.client_wait_fence(record.fence, self.wait_policy.slice) {
                FenceStatus::Signaled => {
                    self.device.delete_fence(record.fence);
                    return Ok(());
                }
                FenceStatus::Failed => return Err(self.fence_failure(record, "wait failed")),
                FenceStatus::TimeoutExpired => {}
            }
        }

        Err(self.fence_failure(record, "timed out"))
    }

    fn fence_failure(&self, record: LockRecord, reason: &str) -> Error {
        engine_error!("umbra::RingBuffer",
            "Fence {:?} guarding [{}, {}) of ring '{}' {} after {:?}",
            record.fence, record.offset, record.offset + record.length, self.name, reason,
            self.wait_policy.timeout);
        Error::FenceTimeout(format!(
            "fence {:?} on ring '{}' {}", record.fence, self.name, reason
        ))
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        for record in self.locks.drain(..) {
            self.device.delete_fence(record.fence);
        }
    }
}

#[cfg(test)]
#[path = "ring_buffer_tests.rs"]
mod tests;

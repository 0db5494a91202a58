/// GPU fence handles and wait results

/// Opaque handle to a fence inserted into the command stream
///
/// Fences are created by `GraphicsDevice::insert_fence` and must be released
/// with `GraphicsDevice::delete_fence` once no longer waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

/// Result of a client-side fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has passed the fence
    Signaled,
    /// The timeout elapsed before the fence signaled
    TimeoutExpired,
    /// The wait itself failed (device lost, unknown fence, ...)
    Failed,
}

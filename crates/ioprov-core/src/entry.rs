//! Submission and completion entry types.
//!
//! These are the lingua franca between the buffer pools, the provider
//! variants, the framer, and the runtime.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, user-supplied token identifying the logical connection or
/// reply target. Echoed back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RequestContext(pub u64);

/// Monotonically increasing operation id, minted by the provider on submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct OpId(pub u64);

/// A process-wide (per-provider) monotonic counter for `OpId`s.
#[derive(Debug, Default)]
pub struct OpIdGenerator(AtomicU64);

impl OpIdGenerator {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    #[inline]
    pub fn next(&self) -> OpId {
        OpId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kind of in-flight kernel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Send,
    Recv,
    Accept,
}

/// Opaque id for a buffer registered with the kernel completion API.
/// `-1` means "not registered / pool exhausted". Stable for the lifetime
/// of the registration; never reused while a pending operation references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RegisteredBufferId(pub i64);

impl RegisteredBufferId {
    pub const NONE: Self = Self(-1);

    #[inline]
    pub fn is_registered(self) -> bool {
        self.0 >= 0
    }
}

/// One in-flight kernel request.
///
/// Created on submit, destroyed on completion dequeue or on `shutdown`.
/// Must not outlive the slab it points into — the provider holds these
/// in a table keyed by `OpId` under its internal lock.
pub struct PendingOperation {
    pub op_id: OpId,
    pub request_context: RequestContext,
    pub kind: OperationKind,
    /// Pointer to the buffer the kernel is reading/writing. Valid only
    /// while this entry is alive in the provider's pending table.
    pub buffer_ptr: *mut u8,
    pub buffer_len: usize,
    /// Present for send paths that copy the application payload into a
    /// provider-owned buffer (the completion/IOCP path).
    pub owned_buffer: Option<Vec<u8>>,
    /// Present when this operation holds a transient or slab registration
    /// that must be released when the operation completes or is cancelled.
    pub registered_buffer: Option<RegisteredBufferId>,
}

// Safety: `buffer_ptr` is either borrowed from a pool slot that outlives
// the operation (by the pool's ownership contract) or owned by
// `owned_buffer`. The pointer is never dereferenced from more than one
// thread at a time — the provider's lock protects table mutation, and
// only the thread that dequeues the completion touches the buffer.
unsafe impl Send for PendingOperation {}

/// One observed completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionEntry {
    pub request_context: RequestContext,
    pub kind: OperationKind,
    /// Bytes transferred, or negative on error.
    pub result: i64,
    /// Raw OS error code; zero when `result` is non-negative.
    pub os_error: i32,
    /// Completion timestamp in milliseconds since the epoch; zero if the
    /// provider does not stamp completions.
    pub completion_time_ms: u64,
}

/// Capability flags a provider advertises through `ProviderInfo`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_buffer_registration: bool,
    pub supports_batching: bool,
    pub supports_zero_copy: bool,
}

/// Static descriptor of a provider variant.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub platform_tag: &'static str,
    pub name: &'static str,
    pub max_queue_depth: u32,
    pub max_concurrent_requests: u32,
    pub capabilities: ProviderCapabilities,
}

/// Cumulative counters, updated under the provider's internal lock.
/// Not expected to be monotonic from an unlocked observer (the fields are
/// a plain snapshot, read and written together under one lock).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderStats {
    pub total_submissions: u64,
    pub total_completions: u64,
    pub pending: u64,
    pub error_count: u64,
}

//! The `AsyncIoProvider` contract.
//!
//! One uniform completion-oriented interface across three native
//! completion APIs (Windows RIO, Linux io_uring, epoll/kqueue readiness),
//! hiding each behind a single trait boundary.
//!
//! # Implementors
//!
//! - `RioProvider` (Windows, feature `rio`)
//! - `IoUringProvider` (Linux, feature `iouring`)
//! - `ReadinessProvider` (epoll on Linux, kqueue on BSD/macOS)
//! - `MockProvider` (test-only)
//!
//! No runtime downcasting is required or supported: callers pick the
//! concrete type at construction time (by `cfg`/feature), and every
//! subsequent interaction goes through this trait.

use crate::entry::{CompletionEntry, ProviderInfo, ProviderStats, RegisteredBufferId};
use crate::error::Result;

/// An opaque, platform-native socket handle. On Unix this is a raw fd;
/// on Windows a `SOCKET`. Providers treat it as an opaque `usize` so the
/// trait stays platform-neutral; concrete variants convert internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SocketHandle(pub usize);

pub trait AsyncIoProvider: Send + Sync {
    /// Allocate kernel objects: completion queue/ring, notification
    /// event. Per-socket request queues are created lazily on first
    /// send/recv for that socket.
    ///
    /// Returns `AlreadyInitialized` if called twice without an
    /// intervening `shutdown`, `PlatformNotSupported` if the kernel
    /// lacks the completion API this variant wraps.
    fn initialize(&self, queue_depth: u32, max_concurrent: u32) -> Result<()>;

    /// Idempotent. Transitions to a shutting-down state that rejects new
    /// submissions, drains or cancels pending operations, deregisters all
    /// buffers, closes the completion queue and notification event, and
    /// returns to the uninitialised state.
    fn shutdown(&self);

    /// Register memory with the kernel so it may be referenced by id in
    /// later submissions without per-op pinning. Returns
    /// `RegisteredBufferId::NONE` as a successful no-op for providers
    /// that don't need registration (readiness-based); check
    /// `info().capabilities.supports_buffer_registration` to tell the
    /// two cases apart.
    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId;

    /// Deregister a buffer previously returned by `register_buffer`.
    /// Calling this while any pending operation still cites `id` is
    /// reported as `InvalidParameter`, never undefined behaviour.
    fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()>;

    /// Submit a send. `buffer` must remain valid until the completion is
    /// drained; if this provider copies the payload (the completion
    /// path), it owns the transient copy and releases it on completion.
    fn send_async(
        &self,
        socket: SocketHandle,
        buffer: *const u8,
        size: usize,
        request_context: crate::entry::RequestContext,
        flags: u32,
    ) -> Result<()>;

    /// Submit a recv. The caller owns the receive buffer; the provider
    /// borrows it until the corresponding completion is drained.
    fn recv_async(
        &self,
        socket: SocketHandle,
        buffer: *mut u8,
        size: usize,
        request_context: crate::entry::RequestContext,
        flags: u32,
    ) -> Result<()>;

    /// Hint to commit any deferred/batched submissions. A no-op where
    /// the backend submits eagerly.
    fn flush_requests(&self) -> Result<()>;

    /// Block up to `timeout_ms` (negative = infinite, zero =
    /// non-blocking), drain up to `entries.len()` completions, and
    /// return the count. A negative return carries an error code: a
    /// corrupted completion queue is fatal and the caller must rebuild
    /// the provider.
    fn process_completions(&self, entries: &mut [CompletionEntry], timeout_ms: i32) -> i32;

    fn info(&self) -> &ProviderInfo;

    fn stats(&self) -> ProviderStats;

    fn last_error(&self) -> String;
}

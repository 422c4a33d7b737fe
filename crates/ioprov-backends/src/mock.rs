//! `MockProvider` — a scripted test double.
//!
//! Completes every submission immediately with a caller-configured
//! result, and can be told to emit a fatal corruption sentinel from
//! `process_completions` on demand. No real kernel object is touched;
//! every behaviour is driven by what the test told the mock to do.

use ioprov_core::entry::{
    CompletionEntry, OpId, OperationKind, PendingOperation, ProviderCapabilities, ProviderInfo,
    ProviderStats, RegisteredBufferId, RequestContext,
};
use ioprov_core::error::{ProviderError, Result};
use ioprov_core::provider::{AsyncIoProvider, SocketHandle};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::common::{LastError, LifecycleState, PendingTable};

/// Per-completed-op result script entry.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedResult {
    pub result: i64,
    pub os_error: i32,
}

pub struct MockProvider {
    state: LifecycleState,
    pending: PendingTable,
    last_error: LastError,
    info: ProviderInfo,
    next_registered_id: AtomicI64,
    /// Completions waiting to be drained, pushed by `submit`. Keeps the
    /// originating `OpId` so `process_completions` can remove the entry
    /// from `pending` at drain time, not at submit time.
    ready: Mutex<VecDeque<(OpId, CompletionEntry)>>,
    /// Overrides the next N completions' result/error. Defaults to
    /// `result = size, os_error = 0` (success) when empty.
    script: Mutex<VecDeque<ScriptedResult>>,
    /// When set, the next `process_completions` call returns this
    /// negative code instead of draining, simulating `RIO_CORRUPT_CQ`.
    inject_corruption: Mutex<Option<i32>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::default(),
            pending: PendingTable::default(),
            last_error: LastError::default(),
            info: ProviderInfo {
                platform_tag: "mock",
                name: "MockProvider",
                max_queue_depth: 4096,
                max_concurrent_requests: 4096,
                capabilities: ProviderCapabilities {
                    supports_buffer_registration: true,
                    supports_batching: false,
                    supports_zero_copy: false,
                },
            },
            next_registered_id: AtomicI64::new(0),
            ready: Mutex::new(VecDeque::new()),
            script: Mutex::new(VecDeque::new()),
            inject_corruption: Mutex::new(None),
        }
    }

    /// Queue the result for the next N completions, oldest first.
    pub fn push_scripted_result(&self, result: ScriptedResult) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Arm a corruption sentinel: the next `process_completions` call
    /// returns this negative error code without draining anything.
    pub fn inject_corruption(&self, negative_code: i32) {
        *self.inject_corruption.lock().unwrap() = Some(negative_code);
    }

    /// Queue this op's completion. The op stays in `pending` (counted
    /// toward `stats().pending`) until `process_completions` actually
    /// drains it, mirroring a real provider where submission and
    /// completion are distinct events.
    fn complete(&self, op: PendingOperation) {
        let op_id = op.op_id;
        let request_context = op.request_context;
        let kind = op.kind;
        let buffer_len = op.buffer_len;
        self.pending.insert(op);
        let scripted = self.script.lock().unwrap().pop_front();
        let (result, os_error) = match scripted {
            Some(s) => (s.result, s.os_error),
            None => (buffer_len as i64, 0),
        };
        self.ready.lock().unwrap().push_back((
            op_id,
            CompletionEntry { request_context, kind, result, os_error, completion_time_ms: 0 },
        ));
    }
}

impl AsyncIoProvider for MockProvider {
    fn initialize(&self, _queue_depth: u32, _max_concurrent: u32) -> Result<()> {
        if !self.state.try_initialise() {
            return Err(ProviderError::AlreadyInitialized);
        }
        Ok(())
    }

    fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            return;
        }
        self.pending.drain_all();
        self.ready.lock().unwrap().clear();
        self.state.finish_shutdown();
    }

    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId {
        if ptr.is_null() || size == 0 {
            return RegisteredBufferId::NONE;
        }
        RegisteredBufferId(self.next_registered_id.fetch_add(1, Ordering::Relaxed))
    }

    fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()> {
        if !id.is_registered() {
            return Err(ProviderError::InvalidParameter);
        }
        Ok(())
    }

    fn send_async(
        &self,
        _socket: SocketHandle,
        buffer: *const u8,
        size: usize,
        request_context: RequestContext,
        _flags: u32,
    ) -> Result<()> {
        if !self.state.is_initialised() {
            return Err(ProviderError::NotInitialized);
        }
        if buffer.is_null() || size == 0 {
            return Err(ProviderError::InvalidBuffer);
        }
        let op_id = self.pending.next_op_id();
        let op = PendingOperation {
            op_id,
            request_context,
            kind: OperationKind::Send,
            buffer_ptr: buffer as *mut u8,
            buffer_len: size,
            owned_buffer: None,
            registered_buffer: None,
        };
        self.complete(op);
        Ok(())
    }

    fn recv_async(
        &self,
        _socket: SocketHandle,
        buffer: *mut u8,
        size: usize,
        request_context: RequestContext,
        _flags: u32,
    ) -> Result<()> {
        if !self.state.is_initialised() {
            return Err(ProviderError::NotInitialized);
        }
        if buffer.is_null() || size == 0 {
            return Err(ProviderError::InvalidBuffer);
        }
        let op_id = self.pending.next_op_id();
        let op = PendingOperation {
            op_id,
            request_context,
            kind: OperationKind::Recv,
            buffer_ptr: buffer,
            buffer_len: size,
            owned_buffer: None,
            registered_buffer: None,
        };
        self.complete(op);
        Ok(())
    }

    fn flush_requests(&self) -> Result<()> {
        Ok(())
    }

    fn process_completions(&self, entries: &mut [CompletionEntry], _timeout_ms: i32) -> i32 {
        if let Some(code) = self.inject_corruption.lock().unwrap().take() {
            self.last_error.set("mock: injected completion-queue corruption");
            return code;
        }
        let mut ready = self.ready.lock().unwrap();
        let mut n = 0;
        while n < entries.len() {
            match ready.pop_front() {
                Some((op_id, entry)) => {
                    self.pending.remove(op_id);
                    if entry.os_error != 0 {
                        self.pending.record_error();
                    }
                    entries[n] = entry;
                    n += 1;
                }
                None => break,
            }
        }
        n as i32
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    fn stats(&self) -> ProviderStats {
        self.pending.stats()
    }

    fn last_error(&self) -> String {
        self.last_error.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_initialize_is_rejected() {
        let p = MockProvider::new();
        assert!(p.initialize(16, 16).is_ok());
        assert_eq!(p.initialize(16, 16), Err(ProviderError::AlreadyInitialized));
    }

    #[test]
    fn submit_before_initialize_is_rejected() {
        let p = MockProvider::new();
        let mut buf = [0u8; 4];
        let err = p.recv_async(SocketHandle(1), buf.as_mut_ptr(), buf.len(), RequestContext(1), 0);
        assert_eq!(err, Err(ProviderError::NotInitialized));
    }

    #[test]
    fn completions_drain_in_submission_order() {
        let p = MockProvider::new();
        p.initialize(16, 16).unwrap();
        let payload = b"hi";
        for i in 0..3u64 {
            p.send_async(SocketHandle(1), payload.as_ptr(), payload.len(), RequestContext(i), 0)
                .unwrap();
        }
        let mut entries = [CompletionEntry {
            request_context: RequestContext(0),
            kind: OperationKind::Send,
            result: 0,
            os_error: 0,
            completion_time_ms: 0,
        }; 3];
        let n = p.process_completions(&mut entries, 0);
        assert_eq!(n, 3);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.request_context, RequestContext(i as u64));
        }
    }

    #[test]
    fn injected_corruption_is_fatal() {
        let p = MockProvider::new();
        p.initialize(16, 16).unwrap();
        p.inject_corruption(ProviderError::OperationFailed.as_negative_code());
        let mut entries = [CompletionEntry {
            request_context: RequestContext(0),
            kind: OperationKind::Recv,
            result: 0,
            os_error: 0,
            completion_time_ms: 0,
        }; 1];
        let n = p.process_completions(&mut entries, 0);
        assert!(n < 0);
        assert!(!p.last_error().is_empty());
    }

    #[test]
    fn scripted_error_result_is_reported() {
        let p = MockProvider::new();
        p.initialize(16, 16).unwrap();
        p.push_scripted_result(ScriptedResult { result: -1, os_error: 104 });
        let payload = b"x";
        p.send_async(SocketHandle(1), payload.as_ptr(), payload.len(), RequestContext(7), 0)
            .unwrap();
        let mut entries = [CompletionEntry {
            request_context: RequestContext(0),
            kind: OperationKind::Send,
            result: 0,
            os_error: 0,
            completion_time_ms: 0,
        }; 1];
        let n = p.process_completions(&mut entries, 0);
        assert_eq!(n, 1);
        assert_eq!(entries[0].os_error, 104);
        assert_eq!(p.stats().error_count, 1);
    }
}

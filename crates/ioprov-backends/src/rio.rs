//! `RioProvider` — Windows Registered I/O backend.
//!
//! The RIO extension function table is resolved once, at initialise
//! time, via a temporary `WSA_FLAG_REGISTERED_IO` socket and
//! `WSAIoctl(SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER)`; per-socket
//! request queues are created lazily on first send/recv, each capped
//! at one outstanding receive and one outstanding send
//! (`RIOCreateRequestQueue` with `MaxOutstandingReceive = MaxOutstandingSend = 1`,
//! so this backend pipelines request pairs rather than batching per
//! socket); completions are delivered through an event and drained by
//! `RIODequeueCompletion`, serialised across threads by a non-blocking
//! notify mutex — a thread that loses the race yields briefly and
//! returns 0 rather than stacking up behind the dequeue. Recv buffers
//! must already be registered (the pool registers its slab up front);
//! send buffers are copied into a provider-owned vector and registered
//! transiently for the lifetime of that one send, then deregistered
//! when the completion drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, TryLockError};

use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::*;

use ioprov_core::entry::{
    CompletionEntry, OperationKind, PendingOperation, ProviderCapabilities, ProviderInfo,
    ProviderStats, RegisteredBufferId, RequestContext,
};
use ioprov_core::error::{ProviderError, Result};
use ioprov_core::provider::{AsyncIoProvider, SocketHandle};

use crate::common::{LastError, LifecycleState, PendingTable};

struct RioFunctionTable {
    rio_receive: unsafe extern "system" fn(RIO_RQ, *const RIO_BUF, u32, u32, *mut std::ffi::c_void) -> i32,
    rio_send: unsafe extern "system" fn(RIO_RQ, *const RIO_BUF, u32, u32, *mut std::ffi::c_void) -> i32,
    rio_create_request_queue: unsafe extern "system" fn(
        SOCKET,
        u32,
        u32,
        u32,
        u32,
        HANDLE,
        *mut std::ffi::c_void,
    ) -> RIO_RQ,
    rio_create_completion_queue: unsafe extern "system" fn(u32, *mut RIO_NOTIFICATION_COMPLETION) -> RIO_CQ,
    rio_close_completion_queue: unsafe extern "system" fn(RIO_CQ),
    rio_dequeue_completion: unsafe extern "system" fn(RIO_CQ, *mut RIORESULT, u32) -> u32,
    rio_notify: unsafe extern "system" fn(RIO_CQ) -> i32,
    rio_register_buffer: unsafe extern "system" fn(*mut i8, u32) -> RIO_BUFFERID,
    rio_deregister_buffer: unsafe extern "system" fn(RIO_BUFFERID),
}

/// Per-socket RIO request queue, created on first use.
struct SocketQueue {
    rq: RIO_RQ,
}

// Safety: RIO handles are opaque kernel object references; RIO itself
// allows concurrent use of a request queue from multiple threads as
// long as completions are dequeued under the provider's notify lock.
unsafe impl Send for SocketQueue {}

pub struct RioProvider {
    functions: RioFunctionTable,
    state: LifecycleState,
    pending: PendingTable,
    last_error: LastError,
    info: ProviderInfo,
    completion_queue: Mutex<RIO_CQ>,
    notify_event: HANDLE,
    sockets: Mutex<HashMap<usize, SocketQueue>>,
    notify_lock: Mutex<()>,
    next_registered_id: AtomicI64,
    /// Long-lived registrations made through `register_buffer`: start
    /// address, length, and the `RIO_BUFFERID` covering that range.
    /// `send_async`/`recv_async` look a buffer pointer up here to build
    /// a valid `RIO_BUF` instead of passing a null buffer id.
    regions: Mutex<Vec<(usize, usize, RIO_BUFFERID)>>,
}

// Safety: every RIO/Winsock handle field is accessed only through
// methods that take the appropriate internal lock; the handles
// themselves are immutable after `initialize`.
unsafe impl Send for RioProvider {}
unsafe impl Sync for RioProvider {}

impl RioProvider {
    /// Resolve the RIO extension function table via a temporary
    /// `WSA_FLAG_REGISTERED_IO` socket, matching
    /// `RIOAsyncIOProvider::ResolveRioFunctions`.
    unsafe fn resolve_functions() -> Result<RioFunctionTable> {
        let temp_socket = WSASocketW(
            AF_INET as i32,
            SOCK_STREAM as i32,
            IPPROTO_TCP as i32,
            std::ptr::null(),
            0,
            WSA_FLAG_REGISTERED_IO,
        );
        if temp_socket == INVALID_SOCKET {
            return Err(ProviderError::Os(WSAGetLastError()));
        }

        let mut rio_functions: RIO_EXTENSION_FUNCTION_TABLE = std::mem::zeroed();
        let mut guid = WSAID_MULTIPLE_RIO;
        let mut bytes_returned: u32 = 0;

        let rc = WSAIoctl(
            temp_socket,
            SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER,
            &mut guid as *mut _ as *mut std::ffi::c_void,
            std::mem::size_of_val(&guid) as u32,
            &mut rio_functions as *mut _ as *mut std::ffi::c_void,
            std::mem::size_of_val(&rio_functions) as u32,
            &mut bytes_returned,
            std::ptr::null_mut(),
            None,
        );
        closesocket(temp_socket);

        if rc != 0 {
            return Err(ProviderError::Os(WSAGetLastError()));
        }

        Ok(RioFunctionTable {
            rio_receive: rio_functions.RIOReceive.unwrap(),
            rio_send: rio_functions.RIOSend.unwrap(),
            rio_create_request_queue: rio_functions.RIOCreateRequestQueue.unwrap(),
            rio_create_completion_queue: rio_functions.RIOCreateCompletionQueue.unwrap(),
            rio_close_completion_queue: rio_functions.RIOCloseCompletionQueue.unwrap(),
            rio_dequeue_completion: rio_functions.RIODequeueCompletion.unwrap(),
            rio_notify: rio_functions.RIONotify.unwrap(),
            rio_register_buffer: rio_functions.RIORegisterBuffer.unwrap(),
            rio_deregister_buffer: rio_functions.RIODeregisterBuffer.unwrap(),
        })
    }

    pub fn new() -> Result<Self> {
        let functions = unsafe { Self::resolve_functions()? };
        Ok(Self {
            functions,
            state: LifecycleState::default(),
            pending: PendingTable::default(),
            last_error: LastError::default(),
            info: ProviderInfo {
                platform_tag: "windows-rio",
                name: "RioProvider",
                max_queue_depth: 4096,
                max_concurrent_requests: 4096,
                capabilities: ProviderCapabilities {
                    supports_buffer_registration: true,
                    supports_batching: false,
                    supports_zero_copy: true,
                },
            },
            completion_queue: Mutex::new(std::ptr::null_mut()),
            notify_event: INVALID_HANDLE_VALUE,
            sockets: Mutex::new(HashMap::new()),
            notify_lock: Mutex::new(()),
            next_registered_id: AtomicI64::new(0),
            regions: Mutex::new(Vec::new()),
        })
    }

    /// Find the registration covering `[ptr, ptr+size)`, returning the
    /// `RIO_BUFFERID` and the byte offset of `ptr` within it.
    fn region_for(&self, ptr: *const u8, size: usize) -> Option<(RIO_BUFFERID, u32)> {
        let addr = ptr as usize;
        let regions = self.regions.lock().unwrap();
        regions.iter().find_map(|(start, len, id)| {
            if addr >= *start && addr + size <= *start + *len {
                Some((*id, (addr - *start) as u32))
            } else {
                None
            }
        })
    }

    fn queue_for(&self, socket: SocketHandle) -> Result<RIO_RQ> {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(q) = sockets.get(&socket.0) {
            return Ok(q.rq);
        }

        let cq = *self.completion_queue.lock().unwrap();
        let notification = RIO_NOTIFICATION_COMPLETION {
            Type: RIO_EVENT_COMPLETION,
            ..unsafe { std::mem::zeroed() }
        };
        let _ = notification;

        let rq = unsafe {
            (self.functions.rio_create_request_queue)(
                socket.0 as SOCKET,
                1, // MaxOutstandingReceive
                1,
                1, // MaxOutstandingSend
                1,
                std::ptr::null_mut(),
                cq as *mut std::ffi::c_void,
            )
        };
        if rq.is_null() {
            return Err(ProviderError::Os(unsafe { WSAGetLastError() }));
        }
        sockets.insert(socket.0, SocketQueue { rq });
        Ok(rq)
    }
}

impl AsyncIoProvider for RioProvider {
    fn initialize(&self, queue_depth: u32, _max_concurrent: u32) -> Result<()> {
        if !self.state.try_initialise() {
            return Err(ProviderError::AlreadyInitialized);
        }

        let event = unsafe { WSACreateEvent() };
        if event == INVALID_HANDLE_VALUE {
            self.state.finish_shutdown();
            return Err(ProviderError::Os(unsafe { WSAGetLastError() }));
        }

        let mut notification: RIO_NOTIFICATION_COMPLETION = unsafe { std::mem::zeroed() };
        notification.Type = RIO_EVENT_COMPLETION;
        notification.Anonymous.Event.EventHandle = event;
        notification.Anonymous.Event.NotifyReset = 1;

        let cq = unsafe { (self.functions.rio_create_completion_queue)(queue_depth, &mut notification) };
        if cq.is_null() {
            unsafe { WSACloseEvent(event) };
            self.state.finish_shutdown();
            return Err(ProviderError::Os(unsafe { WSAGetLastError() }));
        }

        *self.completion_queue.lock().unwrap() = cq;
        // notify_event is set once here; subsequent reads happen only
        // after this store is visible because `state` is `AcqRel`.
        unsafe {
            let self_mut = self as *const Self as *mut Self;
            (*self_mut).notify_event = event;
        }
        Ok(())
    }

    fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            return;
        }
        self.pending.drain_all();
        let cq = *self.completion_queue.lock().unwrap();
        if !cq.is_null() {
            unsafe { (self.functions.rio_close_completion_queue)(cq) };
        }
        if self.notify_event != INVALID_HANDLE_VALUE {
            unsafe { WSACloseEvent(self.notify_event) };
        }
        self.sockets.lock().unwrap().clear();
        self.state.finish_shutdown();
    }

    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId {
        if ptr.is_null() || size == 0 {
            return RegisteredBufferId::NONE;
        }
        let handle = unsafe { (self.functions.rio_register_buffer)(ptr as *mut i8, size as u32) };
        if handle.is_null() {
            return RegisteredBufferId::NONE;
        }
        self.regions.lock().unwrap().push((ptr as usize, size, handle));
        RegisteredBufferId(handle as i64)
    }

    fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()> {
        if !id.is_registered() {
            return Err(ProviderError::InvalidParameter);
        }
        let handle = id.0 as RIO_BUFFERID;
        self.regions.lock().unwrap().retain(|(_, _, h)| *h != handle);
        unsafe { (self.functions.rio_deregister_buffer)(handle) };
        Ok(())
    }

    fn send_async(
        &self,
        socket: SocketHandle,
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
        let rq = self.queue_for(socket)?;
        let op_id = self.pending.next_op_id();

        // The caller's buffer is not guaranteed to live until the
        // completion fires (it may be a stack-local payload), so it is
        // copied into a provider-owned buffer and registered
        // transiently for the lifetime of this one send.
        let mut owned = vec![0u8; size];
        unsafe { std::ptr::copy_nonoverlapping(buffer, owned.as_mut_ptr(), size) };
        let handle = unsafe { (self.functions.rio_register_buffer)(owned.as_mut_ptr() as *mut i8, size as u32) };
        if handle.is_null() {
            return Err(ProviderError::OperationFailed);
        }

        let buf = RIO_BUF { BufferId: handle, Offset: 0, Length: size as u32 };

        let rc = unsafe { (self.functions.rio_send)(rq, &buf, 1, 0, op_id.0 as *mut std::ffi::c_void) };
        if rc == 0 {
            unsafe { (self.functions.rio_deregister_buffer)(handle) };
            return Err(ProviderError::OperationFailed);
        }

        let owned_ptr = owned.as_mut_ptr();
        self.pending.insert(PendingOperation {
            op_id,
            request_context,
            kind: OperationKind::Send,
            buffer_ptr: owned_ptr,
            buffer_len: size,
            owned_buffer: Some(owned),
            registered_buffer: Some(RegisteredBufferId(handle as i64)),
        });
        Ok(())
    }

    fn recv_async(
        &self,
        socket: SocketHandle,
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
        let rq = self.queue_for(socket)?;
        let op_id = self.pending.next_op_id();

        // Recv buffers come from a pool whose memory was registered up
        // front via `register_buffer`; RIO requires a real buffer id,
        // so an unregistered pointer here is a caller error.
        let (buffer_id, offset) = match self.region_for(buffer, size) {
            Some(v) => v,
            None => return Err(ProviderError::InvalidBuffer),
        };
        let buf = RIO_BUF { BufferId: buffer_id, Offset: offset, Length: size as u32 };

        let rc = unsafe { (self.functions.rio_receive)(rq, &buf, 1, 0, op_id.0 as *mut std::ffi::c_void) };
        if rc == 0 {
            return Err(ProviderError::OperationFailed);
        }

        self.pending.insert(PendingOperation {
            op_id,
            request_context,
            kind: OperationKind::Recv,
            buffer_ptr: buffer,
            buffer_len: size,
            owned_buffer: None,
            registered_buffer: None,
        });
        Ok(())
    }

    fn flush_requests(&self) -> Result<()> {
        Ok(())
    }

    fn process_completions(&self, entries: &mut [CompletionEntry], timeout_ms: i32) -> i32 {
        if !self.state.is_initialised() {
            return ProviderError::NotInitialized.as_negative_code();
        }

        let _guard = match self.notify_lock.try_lock() {
            Ok(g) => g,
            Err(TryLockError::WouldBlock) => {
                std::thread::sleep(std::time::Duration::from_millis(1));
                return 0;
            }
            Err(TryLockError::Poisoned(_)) => return ProviderError::OperationFailed.as_negative_code(),
        };

        let cq = *self.completion_queue.lock().unwrap();
        unsafe {
            if (self.functions.rio_notify)(cq) != 0 {
                self.last_error.set("RIONotify failed");
                return ProviderError::OperationFailed.as_negative_code();
            }
        }

        if timeout_ms != 0 {
            let wait_ms = if timeout_ms < 0 { u32::MAX } else { timeout_ms as u32 };
            unsafe { WSAWaitForMultipleEvents(1, &self.notify_event, 0, wait_ms, 0) };
        }

        if self.state.is_shutting_down() {
            return 0;
        }

        let mut results: Vec<RIORESULT> = vec![unsafe { std::mem::zeroed() }; entries.len()];
        let count = unsafe {
            (self.functions.rio_dequeue_completion)(cq, results.as_mut_ptr(), entries.len() as u32)
        };

        if count == RIO_CORRUPT_CQ {
            self.last_error.set("RIO completion queue corrupted");
            return ProviderError::OperationFailed.as_negative_code();
        }

        if self.state.is_shutting_down() {
            return 0;
        }

        for (i, result) in results.iter().take(count as usize).enumerate() {
            let op_id = ioprov_core::entry::OpId(result.RequestContext as u64);
            let Some(op) = self.pending.remove(op_id) else {
                continue;
            };
            if let Some(reg_id) = op.registered_buffer {
                let handle = reg_id.0 as RIO_BUFFERID;
                self.regions.lock().unwrap().retain(|(_, _, h)| *h != handle);
                unsafe { (self.functions.rio_deregister_buffer)(handle) };
            }
            let status = result.Status;
            let (transferred, os_error) = if status != 0 {
                self.pending.record_error();
                (-1i64, status)
            } else {
                (result.BytesTransferred as i64, 0)
            };
            entries[i] = CompletionEntry {
                request_context: op.request_context,
                kind: op.kind,
                result: transferred,
                os_error,
                completion_time_ms: 0,
            };
        }
        count as i32
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

impl Drop for RioProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

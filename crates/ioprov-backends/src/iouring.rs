//! `IoUringProvider` — Linux io_uring backend.
//!
//! Built directly on the `io-uring` crate (`IoUring::builder().build(sq_entries)`,
//! SQE push/submit, CQE poll) with fixed-buffer registration for the
//! registered-buffer fast path. `submit_one` issues `ReadFixed`/`WriteFixed`
//! when the target buffer falls inside a range registered through
//! `register_buffer`, and plain `Recv`/`Send` otherwise.

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use ioprov_core::entry::{
    CompletionEntry, OperationKind, PendingOperation, ProviderCapabilities, ProviderInfo,
    ProviderStats, RegisteredBufferId, RequestContext,
};
use ioprov_core::error::{ProviderError, Result};
use ioprov_core::provider::{AsyncIoProvider, SocketHandle};

use crate::common::{LastError, LifecycleState, PendingTable};

pub struct IoUringProvider {
    ring: Mutex<io_uring::IoUring>,
    state: LifecycleState,
    pending: PendingTable,
    last_error: LastError,
    info: ProviderInfo,
    registered: Mutex<Vec<libc::iovec>>,
    next_registered_id: AtomicI64,
    pending_submit: AtomicU64,
    /// Start address, length, and fixed-buffer index for every
    /// registration still live, so `submit_one` can tell whether a
    /// buffer pointer falls inside a registered iovec and issue
    /// `ReadFixed`/`WriteFixed` instead of a plain `Recv`/`Send`.
    regions: Mutex<Vec<(usize, usize, u16)>>,
}

impl IoUringProvider {
    pub fn new(sq_entries: u32) -> Result<Self> {
        let ring = io_uring::IoUring::builder()
            .build(sq_entries)
            .map_err(|e| ProviderError::Os(e.raw_os_error().unwrap_or(-1)))?;
        Ok(Self {
            ring: Mutex::new(ring),
            state: LifecycleState::default(),
            pending: PendingTable::default(),
            last_error: LastError::default(),
            info: ProviderInfo {
                platform_tag: "linux-iouring",
                name: "IoUringProvider",
                max_queue_depth: sq_entries,
                max_concurrent_requests: sq_entries,
                capabilities: ProviderCapabilities {
                    supports_buffer_registration: true,
                    supports_batching: true,
                    supports_zero_copy: false,
                },
            },
            registered: Mutex::new(Vec::new()),
            next_registered_id: AtomicI64::new(0),
            pending_submit: AtomicU64::new(0),
            regions: Mutex::new(Vec::new()),
        })
    }

    pub fn fd(&self) -> std::os::unix::io::RawFd {
        self.ring.lock().unwrap().as_raw_fd()
    }

    /// Find the fixed-buffer index covering `[ptr, ptr+size)`, if any.
    fn region_for(&self, ptr: *const u8, size: usize) -> Option<u16> {
        let addr = ptr as usize;
        let regions = self.regions.lock().unwrap();
        regions.iter().find_map(|(start, len, idx)| {
            (addr >= *start && addr + size <= *start + *len).then_some(*idx)
        })
    }

    fn submit_one(
        &self,
        socket: SocketHandle,
        buffer_ptr: *mut u8,
        size: usize,
        request_context: RequestContext,
        kind: OperationKind,
    ) -> Result<()> {
        if !self.state.is_initialised() {
            return Err(ProviderError::NotInitialized);
        }
        if buffer_ptr.is_null() || size == 0 {
            return Err(ProviderError::InvalidBuffer);
        }

        let op_id = self.pending.next_op_id();
        let fd = io_uring::types::Fd(socket.0 as i32);
        let buf_index = self.region_for(buffer_ptr, size);

        let sqe = match (kind, buf_index) {
            (OperationKind::Recv, Some(idx)) => {
                io_uring::opcode::ReadFixed::new(fd, buffer_ptr, size as u32, idx)
                    .build()
                    .user_data(op_id.0)
            }
            (OperationKind::Recv, None) => io_uring::opcode::Recv::new(fd, buffer_ptr, size as u32)
                .build()
                .user_data(op_id.0),
            (OperationKind::Send, Some(idx)) => {
                io_uring::opcode::WriteFixed::new(fd, buffer_ptr, size as u32, idx)
                    .build()
                    .user_data(op_id.0)
            }
            (OperationKind::Send, None) => io_uring::opcode::Send::new(fd, buffer_ptr, size as u32)
                .build()
                .user_data(op_id.0),
            (OperationKind::Accept, _) => return Err(ProviderError::InvalidParameter),
        };

        {
            let mut ring = self.ring.lock().unwrap();
            let mut sq = ring.submission();
            if sq.is_full() {
                drop(sq);
                drop(ring);
                return Err(ProviderError::OperationFailed);
            }
            unsafe {
                sq.push(&sqe).map_err(|_| ProviderError::OperationFailed)?;
            }
        }
        self.pending_submit.fetch_add(1, Ordering::Relaxed);

        self.pending.insert(PendingOperation {
            op_id,
            request_context,
            kind,
            buffer_ptr,
            buffer_len: size,
            owned_buffer: None,
            registered_buffer: None,
        });
        Ok(())
    }
}

impl AsyncIoProvider for IoUringProvider {
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
        self.state.finish_shutdown();
    }

    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId {
        if ptr.is_null() || size == 0 {
            return RegisteredBufferId::NONE;
        }
        let mut regs = self.registered.lock().unwrap();
        let iov = libc::iovec {
            iov_base: ptr as *mut libc::c_void,
            iov_len: size,
        };
        let ring = self.ring.lock().unwrap();
        let submitter = ring.submitter();
        regs.push(iov);
        let result = unsafe { submitter.register_buffers(&regs) };
        match result {
            Ok(()) => {
                let idx = (regs.len() - 1) as u16;
                self.regions.lock().unwrap().push((ptr as usize, size, idx));
                RegisteredBufferId(self.next_registered_id.fetch_add(1, Ordering::Relaxed))
            }
            Err(_) => {
                regs.pop();
                RegisteredBufferId::NONE
            }
        }
    }

    fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()> {
        if !id.is_registered() {
            return Err(ProviderError::InvalidParameter);
        }
        let ring = self.ring.lock().unwrap();
        let result = ring
            .submitter()
            .unregister_buffers()
            .map_err(|e| ProviderError::Os(e.raw_os_error().unwrap_or(-1)));
        // `io_uring` only supports unregistering the whole fixed-buffer
        // table at once, so every previously registered slot goes dead here.
        self.registered.lock().unwrap().clear();
        self.regions.lock().unwrap().clear();
        result
    }

    fn send_async(
        &self,
        socket: SocketHandle,
        buffer: *const u8,
        size: usize,
        request_context: RequestContext,
        _flags: u32,
    ) -> Result<()> {
        self.submit_one(socket, buffer as *mut u8, size, request_context, OperationKind::Send)
    }

    fn recv_async(
        &self,
        socket: SocketHandle,
        buffer: *mut u8,
        size: usize,
        request_context: RequestContext,
        _flags: u32,
    ) -> Result<()> {
        self.submit_one(socket, buffer, size, request_context, OperationKind::Recv)
    }

    fn flush_requests(&self) -> Result<()> {
        if self.pending_submit.swap(0, Ordering::Relaxed) == 0 {
            return Ok(());
        }
        self.ring
            .lock()
            .unwrap()
            .submit()
            .map(|_| ())
            .map_err(|e| ProviderError::Os(e.raw_os_error().unwrap_or(-1)))
    }

    fn process_completions(&self, entries: &mut [CompletionEntry], timeout_ms: i32) -> i32 {
        if !self.state.is_initialised() {
            return ProviderError::NotInitialized.as_negative_code();
        }

        let mut ring = self.ring.lock().unwrap();
        match timeout_ms.cmp(&0) {
            std::cmp::Ordering::Less => {
                let _ = ring.submit_and_wait(1);
            }
            std::cmp::Ordering::Greater => {
                let ts = io_uring::types::Timespec::new()
                    .sec((timeout_ms / 1000) as u64)
                    .nsec((timeout_ms % 1000) as u32 * 1_000_000);
                let args = io_uring::types::SubmitArgs::new().timespec(&ts);
                match ring.submitter().submit_with_args(1, &args) {
                    Ok(_) => {}
                    // ETIME: the bound elapsed with nothing ready, not an error.
                    Err(e) if e.raw_os_error() == Some(libc::ETIME) => {}
                    Err(_) => {}
                }
            }
            std::cmp::Ordering::Equal => {
                let _ = ring.submit();
            }
        }

        let mut n = 0;
        let mut cq = ring.completion();
        cq.sync();
        for cqe in &mut cq {
            if n >= entries.len() {
                break;
            }
            let op_id = ioprov_core::entry::OpId(cqe.user_data());
            let Some(op) = self.pending.remove(op_id) else {
                continue;
            };
            let raw = cqe.result();
            let (result, os_error) = if raw < 0 {
                self.pending.record_error();
                (-1i64, -raw)
            } else {
                (raw as i64, 0)
            };
            entries[n] = CompletionEntry {
                request_context: op.request_context,
                kind: op.kind,
                result,
                os_error,
                completion_time_ms: 0,
            };
            n += 1;
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

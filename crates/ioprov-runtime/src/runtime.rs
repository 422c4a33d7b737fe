//! `ServerRuntime` — the network and logic worker loops.
//!
//! Two plain `std::thread` workers: a network loop polling the
//! provider for completions, and a logic loop for periodic work that
//! never touches provider internals. No async runtime, no thread pool
//! abstraction beyond what's needed here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ioprov_buffers::registered::{BufferRegistrar, RegisteredBufferPool, RegistrationStrategy};
use ioprov_buffers::send_pool::SendBufferPool;
use ioprov_core::entry::{OperationKind, RegisteredBufferId};
use ioprov_core::error::Result as ProviderResult;
use ioprov_core::provider::{AsyncIoProvider, SocketHandle};
use ioprov_core::entry::RequestContext;
use ioprov_framer::Dispatcher;

use crate::config::{ProviderConfig, ProviderFlavor};

/// Adapts any `AsyncIoProvider` to the narrower `BufferRegistrar`
/// contract the buffer pools depend on, so `ioprov-buffers` never needs
/// to know about the full provider trait.
struct ProviderRegistrar<P: AsyncIoProvider>(Arc<P>);

impl<P: AsyncIoProvider> BufferRegistrar for ProviderRegistrar<P> {
    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId {
        self.0.register_buffer(ptr, size)
    }

    fn unregister_buffer(&self, id: RegisteredBufferId) -> ProviderResult<()> {
        self.0.unregister_buffer(id)
    }
}

#[derive(Clone, Copy)]
struct OutstandingOp {
    socket: SocketHandle,
    buffer_index: u32,
    kind: OperationKind,
}

/// Owns one provider, the C1-C3 buffer pools, and the framer/dispatcher.
/// Generic over `P` so the concrete backend (RIO/io_uring/readiness/mock)
/// is a compile-time choice, never a runtime downcast.
pub struct ServerRuntime<P: AsyncIoProvider + 'static> {
    provider: Arc<P>,
    config: ProviderConfig,
    recv_pool: Arc<RegisteredBufferPool<ProviderRegistrar<P>>>,
    send_pool: Arc<SendBufferPool>,
    dispatcher: Arc<Dispatcher>,
    outstanding: Arc<Mutex<HashMap<u64, OutstandingOp>>>,
    next_request_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    network_thread: Option<JoinHandle<()>>,
    logic_thread: Option<JoinHandle<()>>,
}

impl<P: AsyncIoProvider + 'static> ServerRuntime<P> {
    pub fn builder(provider: P, dispatcher: Dispatcher) -> ServerRuntimeBuilder<P> {
        ServerRuntimeBuilder {
            provider,
            dispatcher,
            config: ProviderConfig::default(),
        }
    }

    /// Register a freshly accepted socket and post its first recv.
    /// Stands in for the provider-level `Accept` completion: listening
    /// and accepting happen outside the provider on a plain blocking
    /// `accept()` loop, and this is the hand-off point into the async
    /// path.
    pub fn adopt_connection(&self, socket: SocketHandle) -> ProviderResult<()> {
        self.post_recv(socket)
    }

    pub fn send(&self, socket: SocketHandle, payload: &[u8]) -> ProviderResult<()> {
        let mut handle = self.send_pool.checkout();
        if handle.is_empty() {
            return Err(ioprov_core::error::ProviderError::InvalidBuffer);
        }
        handle.copy_in(payload);
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let index = handle.index();
        let len = handle.len();
        let ptr = handle.as_ptr();

        self.outstanding.lock().unwrap().insert(
            request_id,
            OutstandingOp {
                socket,
                buffer_index: index,
                kind: OperationKind::Send,
            },
        );

        let result = self.provider.send_async(socket, ptr, len, RequestContext(request_id), 0);
        if result.is_err() {
            self.outstanding.lock().unwrap().remove(&request_id);
            self.send_pool.release_index(index);
        }
        result
    }

    fn post_recv(&self, socket: SocketHandle) -> ProviderResult<()> {
        let slot = self.recv_pool.acquire();
        if slot.is_empty() {
            log::warn!("recv buffer pool exhausted, dropping adopt for socket {:?}", socket);
            return Err(ioprov_core::error::ProviderError::InvalidBuffer);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.outstanding.lock().unwrap().insert(
            request_id,
            OutstandingOp {
                socket,
                buffer_index: slot.buffer.index,
                kind: OperationKind::Recv,
            },
        );

        let result = self.provider.recv_async(
            socket,
            slot.buffer.ptr,
            slot.buffer.capacity,
            RequestContext(request_id),
            0,
        );
        if result.is_err() {
            self.outstanding.lock().unwrap().remove(&request_id);
            self.recv_pool.release(slot.buffer.index);
        }
        result
    }

    pub fn start(&mut self) {
        self.running.store(true, Ordering::Release);

        let provider = self.provider.clone();
        let recv_pool = self.recv_pool.clone();
        let send_pool = self.send_pool.clone();
        let dispatcher = self.dispatcher.clone();
        let outstanding = self.outstanding.clone();
        let running = self.running.clone();
        let timeout_ms = self.config.network_poll_timeout_ms;
        let max_concurrent = self.config.max_concurrent as usize;

        self.network_thread = Some(
            std::thread::Builder::new()
                .name("ioprov-network".into())
                .spawn(move || {
                    network_loop(provider, recv_pool, send_pool, dispatcher, outstanding, running, timeout_ms, max_concurrent)
                })
                .expect("failed to spawn network worker thread"),
        );

        let running = self.running.clone();
        let tick = Duration::from_millis(self.config.logic_tick_interval_ms);
        self.logic_thread = Some(
            std::thread::Builder::new()
                .name("ioprov-logic".into())
                .spawn(move || logic_loop(running, tick))
                .expect("failed to spawn logic worker thread"),
        );
    }

    /// `running = false`, join both workers, `provider.shutdown()`,
    /// release the buffer pools — in that order, so no worker touches
    /// the provider after it has been told to shut down.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.network_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.logic_thread.take() {
            let _ = h.join();
        }
        self.provider.shutdown();
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl<P: AsyncIoProvider + 'static> Drop for ServerRuntime<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn network_loop<P: AsyncIoProvider>(
    provider: Arc<P>,
    recv_pool: Arc<RegisteredBufferPool<ProviderRegistrar<P>>>,
    send_pool: Arc<SendBufferPool>,
    dispatcher: Arc<Dispatcher>,
    outstanding: Arc<Mutex<HashMap<u64, OutstandingOp>>>,
    running: Arc<AtomicBool>,
    timeout_ms: i32,
    max_concurrent: usize,
) {
    let mut entries = vec![
        ioprov_core::entry::CompletionEntry {
            request_context: RequestContext(0),
            kind: OperationKind::Recv,
            result: 0,
            os_error: 0,
            completion_time_ms: 0,
        };
        max_concurrent.max(1)
    ];

    while running.load(Ordering::Acquire) {
        let n = provider.process_completions(&mut entries, timeout_ms);
        if n < 0 {
            log::error!(
                "provider reported a fatal completion-queue error (code {}): {}",
                n,
                provider.last_error()
            );
            running.store(false, Ordering::Release);
            break;
        }

        for entry in entries.iter().take(n as usize) {
            let op = outstanding.lock().unwrap().remove(&entry.request_context.0);
            let Some(op) = op else {
                log::warn!("completion for unknown request context {}", entry.request_context.0);
                continue;
            };

            match op.kind {
                OperationKind::Recv => {
                    if entry.result > 0 {
                        let ptr = recv_pool.slot_ptr(op.buffer_index);
                        let bytes = unsafe { std::slice::from_raw_parts(ptr, entry.result as usize) };
                        if !dispatcher.process(op.socket.0 as u64, bytes) {
                            log::warn!("dropped malformed frame on socket {:?}", op.socket);
                        }
                        recv_pool.release(op.buffer_index);
                        if running.load(Ordering::Acquire) {
                            let slot = recv_pool.acquire();
                            if !slot.is_empty() {
                                let request_id = entry.request_context.0;
                                outstanding.lock().unwrap().insert(
                                    request_id,
                                    OutstandingOp {
                                        socket: op.socket,
                                        buffer_index: slot.buffer.index,
                                        kind: OperationKind::Recv,
                                    },
                                );
                                let _ = provider.recv_async(
                                    op.socket,
                                    slot.buffer.ptr,
                                    slot.buffer.capacity,
                                    RequestContext(request_id),
                                    0,
                                );
                            }
                        }
                    } else {
                        if entry.result < 0 {
                            log::warn!(
                                "recv failed on socket {:?}: os_error={}",
                                op.socket,
                                entry.os_error
                            );
                        } else {
                            log::info!("peer closed socket {:?}", op.socket);
                        }
                        recv_pool.release(op.buffer_index);
                    }
                }
                OperationKind::Send => {
                    if entry.result < 0 {
                        log::warn!("send failed on socket {:?}: os_error={}", op.socket, entry.os_error);
                    }
                    send_pool.release_index(op.buffer_index);
                }
                OperationKind::Accept => {}
            }
        }
    }
}

fn logic_loop(running: Arc<AtomicBool>, tick: Duration) {
    while running.load(Ordering::Acquire) {
        std::thread::sleep(tick);
        if !running.load(Ordering::Acquire) {
            break;
        }
        log::trace!("logic worker tick");
    }
}

pub struct ServerRuntimeBuilder<P: AsyncIoProvider + 'static> {
    provider: P,
    dispatcher: Dispatcher,
    config: ProviderConfig,
}

impl<P: AsyncIoProvider + 'static> ServerRuntimeBuilder<P> {
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> std::result::Result<ServerRuntime<P>, String> {
        self.config.validate()?;

        let provider = Arc::new(self.provider);
        provider
            .initialize(self.config.queue_depth, self.config.max_concurrent)
            .map_err(|e| format!("provider initialize failed: {e}"))?;

        let registrar = ProviderRegistrar(provider.clone());
        // RIO registers the whole slab in one call and addresses slots by
        // offset; io_uring fixed buffers are registered one iovec per
        // slot. Readiness backends never register anything for real
        // (register_buffer is a NONE no-op), so Slab is picked for them
        // too, to make that a single no-op call instead of one per slot.
        let strategy = match self.config.flavor {
            ProviderFlavor::Rio => RegistrationStrategy::Slab,
            ProviderFlavor::IoUring => RegistrationStrategy::PerSlot,
            ProviderFlavor::Epoll | ProviderFlavor::Kqueue => RegistrationStrategy::Slab,
        };
        let recv_pool = RegisteredBufferPool::new(
            self.config.buffer_pool.pool_size,
            self.config.buffer_pool.slot_size,
            registrar,
            strategy,
        )
        .ok_or_else(|| "failed to allocate recv buffer pool".to_string())?;

        let send_pool = SendBufferPool::new(self.config.send_pool.pool_size, self.config.send_pool.slot_size)
            .ok_or_else(|| "failed to allocate send buffer pool".to_string())?;

        Ok(ServerRuntime {
            provider,
            config: self.config,
            recv_pool: Arc::new(recv_pool),
            send_pool: Arc::new(send_pool),
            dispatcher: Arc::new(self.dispatcher),
            outstanding: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            running: Arc::new(AtomicBool::new(false)),
            network_thread: None,
            logic_thread: None,
        })
    }
}

//! Registered buffer pool.
//!
//! Wraps a [`BufferSlabPool`] and hands the underlying memory to the
//! kernel completion API so later sends/recvs can reference buffers by
//! id instead of repinning memory on every call.
//!
//! Two registration strategies exist in the wild and both are
//! supported here:
//!
//! - **Slab** — one `RegisterBuffer` call covers the whole slab; every
//!   slot shares the same [`RegisteredBufferId`] and the caller passes
//!   a byte offset within it. This is what Windows RIO does
//!   (`RIORegisterBuffer` on the whole allocation).
//! - **PerSlot** — each slot gets its own registration id, matching
//!   io_uring fixed buffers (`IORING_REGISTER_BUFFERS`, one `iovec`
//!   per slot).
//!
//! This pool does not depend on the concrete provider type — it takes
//! a [`BufferRegistrar`] instead, so it can be unit tested against a
//! trivial fake without pulling in `ioprov-backends` (which itself
//! depends on this crate).

use ioprov_core::buffer::BufferSlot;
use ioprov_core::entry::RegisteredBufferId;
use ioprov_core::error::Result;
use std::sync::Mutex;

use crate::slab::BufferSlabPool;

/// The registration half of `AsyncIoProvider`, narrowed to just the two
/// methods this pool needs. Any concrete provider implements this for
/// free since its signature is a subset of `AsyncIoProvider`'s.
pub trait BufferRegistrar {
    fn register_buffer(&self, ptr: *mut u8, size: usize) -> RegisteredBufferId;
    fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStrategy {
    Slab,
    PerSlot,
}

/// A slot handed out by [`RegisteredBufferPool::acquire`]: the raw
/// buffer plus whatever id the caller should cite in `send_async`'s
/// `flags`/follow-up registration-aware call.
#[derive(Debug, Clone, Copy)]
pub struct RegisteredSlot {
    pub buffer: BufferSlot,
    pub registered_id: RegisteredBufferId,
    /// Offset of this slot within its registration (zero for `PerSlot`,
    /// `index * slot_size` for `Slab`).
    pub offset: usize,
}

impl RegisteredSlot {
    fn empty() -> Self {
        Self {
            buffer: BufferSlot::EMPTY,
            registered_id: RegisteredBufferId::NONE,
            offset: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

pub struct RegisteredBufferPool<R: BufferRegistrar> {
    slab: BufferSlabPool,
    registrar: R,
    strategy: RegistrationStrategy,
    slab_id: RegisteredBufferId,
    per_slot_ids: Mutex<Vec<RegisteredBufferId>>,
}

impl<R: BufferRegistrar> RegisteredBufferPool<R> {
    /// Build the underlying slab and register it with `registrar`
    /// according to `strategy`. On registration failure the pool is
    /// still usable for unregistered I/O: callers check
    /// `registered_id.is_registered()` on the slot they get back.
    pub fn new(pool_size: u32, slot_size: usize, registrar: R, strategy: RegistrationStrategy) -> Option<Self> {
        let slab = BufferSlabPool::initialize(pool_size, slot_size)?;

        let slab_id = match strategy {
            RegistrationStrategy::Slab => {
                registrar.register_buffer(slab.slot_ptr(0), pool_size as usize * slot_size)
            }
            RegistrationStrategy::PerSlot => RegisteredBufferId::NONE,
        };

        let per_slot_ids = match strategy {
            RegistrationStrategy::PerSlot => (0..pool_size)
                .map(|i| registrar.register_buffer(slab.slot_ptr(i), slot_size))
                .collect(),
            RegistrationStrategy::Slab => Vec::new(),
        };

        Some(Self {
            slab,
            registrar,
            strategy,
            slab_id,
            per_slot_ids: Mutex::new(per_slot_ids),
        })
    }

    pub fn free_count(&self) -> u32 {
        self.slab.free_count()
    }

    pub fn pool_size(&self) -> u32 {
        self.slab.pool_size()
    }

    pub fn acquire(&self) -> RegisteredSlot {
        let buffer = self.slab.acquire();
        if buffer.is_empty() {
            return RegisteredSlot::empty();
        }
        match self.strategy {
            RegistrationStrategy::Slab => RegisteredSlot {
                buffer,
                registered_id: self.slab_id,
                offset: buffer.index as usize * self.slab.slot_size(),
            },
            RegistrationStrategy::PerSlot => {
                let ids = self.per_slot_ids.lock().unwrap();
                RegisteredSlot {
                    buffer,
                    registered_id: ids[buffer.index as usize],
                    offset: 0,
                }
            }
        }
    }

    pub fn release(&self, index: u32) {
        self.slab.release(index);
    }

    /// Recompute a slot's pointer from its index, for callers that
    /// tracked only the index across a completion boundary rather than
    /// holding the `RegisteredSlot` itself.
    pub fn slot_ptr(&self, index: u32) -> *mut u8 {
        self.slab.slot_ptr(index)
    }

    /// Deregister everything and drop the underlying slab. Called from
    /// `Drop` so deregistration always happens before the backing
    /// memory is freed.
    fn deregister_all(&self) {
        match self.strategy {
            RegistrationStrategy::Slab => {
                if self.slab_id.is_registered() {
                    let _ = self.registrar.unregister_buffer(self.slab_id);
                }
            }
            RegistrationStrategy::PerSlot => {
                for id in self.per_slot_ids.lock().unwrap().drain(..) {
                    if id.is_registered() {
                        let _ = self.registrar.unregister_buffer(id);
                    }
                }
            }
        }
    }
}

impl<R: BufferRegistrar> Drop for RegisteredBufferPool<R> {
    fn drop(&mut self) {
        self.deregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone)]
    struct FakeRegistrar {
        next_id: Arc<AtomicI64>,
        unregistered: Arc<StdMutex<Vec<RegisteredBufferId>>>,
    }

    impl FakeRegistrar {
        fn new() -> Self {
            Self {
                next_id: Arc::new(AtomicI64::new(0)),
                unregistered: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    impl BufferRegistrar for FakeRegistrar {
        fn register_buffer(&self, _ptr: *mut u8, _size: usize) -> RegisteredBufferId {
            RegisteredBufferId(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn unregister_buffer(&self, id: RegisteredBufferId) -> Result<()> {
            self.unregistered.lock().unwrap().push(id);
            Ok(())
        }
    }

    #[test]
    fn slab_strategy_shares_one_id() {
        let pool = RegisteredBufferPool::new(4, 64, FakeRegistrar::new(), RegistrationStrategy::Slab).unwrap();
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.registered_id.is_registered());
        assert_eq!(a.registered_id, b.registered_id);
        assert_ne!(a.offset, b.offset);
    }

    #[test]
    fn per_slot_strategy_assigns_distinct_ids() {
        let pool = RegisteredBufferPool::new(4, 64, FakeRegistrar::new(), RegistrationStrategy::PerSlot).unwrap();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.registered_id, b.registered_id);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 0);
    }

    #[test]
    fn exhaustion_returns_empty_slot() {
        let pool = RegisteredBufferPool::new(1, 16, FakeRegistrar::new(), RegistrationStrategy::Slab).unwrap();
        let a = pool.acquire();
        assert!(!a.is_empty());
        let b = pool.acquire();
        assert!(b.is_empty());
        assert_eq!(b.registered_id, RegisteredBufferId::NONE);
    }

    #[test]
    fn drop_deregisters_per_slot_ids() {
        let registrar = FakeRegistrar::new();
        let observe = registrar.clone();
        {
            let _pool = RegisteredBufferPool::new(3, 16, registrar, RegistrationStrategy::PerSlot).unwrap();
        }
        assert_eq!(observe.unregistered.lock().unwrap().len(), 3);
    }
}

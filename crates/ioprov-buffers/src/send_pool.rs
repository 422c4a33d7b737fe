//! Send buffer pool.
//!
//! A pool of transient copy buffers used on the send path when a
//! provider needs the payload to outlive the caller's stack frame
//! until the kernel completion fires (the RIO and io_uring completion
//! paths both copy into a provider-owned buffer rather than pinning
//! caller memory per-call).
//!
//! Not a process-wide singleton: this pool is owned by the
//! `ServerRuntime` that uses it, so two runtimes in one process never
//! share buffers and every test gets its own isolated pool.

use crate::slab::BufferSlabPool;

/// A checked-out send buffer. `copy_in` fills it from the caller's
/// payload; the handle is released back to the pool once its
/// completion is drained.
pub struct SendBufferHandle {
    ptr: *mut u8,
    index: u32,
    capacity: usize,
    len: usize,
}

impl SendBufferHandle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Copy `payload` into this buffer. Truncates to `capacity` rather
    /// than panicking: a caller sending more than the configured slot
    /// size gets a short write it can detect via `len()`, not a crash.
    pub fn copy_in(&mut self, payload: &[u8]) {
        let n = payload.len().min(self.capacity);
        if !self.ptr.is_null() && n > 0 {
            unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), self.ptr, n) };
        }
        self.len = n;
    }
}

pub struct SendBufferPool {
    slab: BufferSlabPool,
}

impl SendBufferPool {
    pub fn new(pool_size: u32, slot_size: usize) -> Option<Self> {
        Some(Self {
            slab: BufferSlabPool::initialize(pool_size, slot_size)?,
        })
    }

    pub fn free_count(&self) -> u32 {
        self.slab.free_count()
    }

    pub fn pool_size(&self) -> u32 {
        self.slab.pool_size()
    }

    /// Check out a buffer. Returns an empty handle (check
    /// `is_empty()`) when the pool is exhausted; the caller's send must
    /// then either block, queue, or fail — this pool never blocks.
    pub fn checkout(&self) -> SendBufferHandle {
        let slot = self.slab.acquire();
        SendBufferHandle {
            ptr: slot.ptr,
            index: slot.index,
            capacity: slot.capacity,
            len: 0,
        }
    }

    pub fn release(&self, handle: SendBufferHandle) {
        if !handle.is_empty() {
            self.slab.release(handle.index);
        }
    }

    /// Release by index directly, for callers that tracked only the
    /// index (e.g. the runtime's outstanding-send table) rather than
    /// holding the handle across the await/completion boundary.
    pub fn release_index(&self, index: u32) {
        self.slab.release(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_copy_and_release_round_trips() {
        let pool = SendBufferPool::new(2, 8).unwrap();
        let mut handle = pool.checkout();
        assert!(!handle.is_empty());
        handle.copy_in(b"hello");
        assert_eq!(handle.len(), 5);

        let slice = unsafe { std::slice::from_raw_parts(handle.as_ptr(), handle.len()) };
        assert_eq!(slice, b"hello");

        pool.release(handle);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn oversized_payload_is_truncated_not_panicking() {
        let pool = SendBufferPool::new(1, 4).unwrap();
        let mut handle = pool.checkout();
        handle.copy_in(b"too long");
        assert_eq!(handle.len(), 4);
    }

    #[test]
    fn exhaustion_returns_empty_handle() {
        let pool = SendBufferPool::new(1, 8).unwrap();
        let _first = pool.checkout();
        let second = pool.checkout();
        assert!(second.is_empty());
    }
}

//! Buffer slot handle shared by `ioprov-buffers` and the provider variants.
//!
//! A `BufferSlot` names a fixed-size region within a slab (see
//! `ioprov-buffers::slab::BufferSlabPool`). The invariant
//! `address = slab_base + index * slot_size` lets any holder of an
//! index recompute the pointer without going back through the pool.

/// A fixed-size region within a slab.
#[derive(Debug, Clone, Copy)]
pub struct BufferSlot {
    /// Raw pointer to the slot's memory. Null for the exhausted sentinel.
    pub ptr: *mut u8,
    /// Index into the slab. `u32::MAX` for the exhausted sentinel.
    pub index: u32,
    /// Capacity of the slot in bytes.
    pub capacity: usize,
}

// Safety: a `BufferSlot` is just a pointer-and-metadata handle. The slab
// that hands it out guarantees the pointed-to memory outlives the slot
// between `acquire` and `release`.
unsafe impl Send for BufferSlot {}
unsafe impl Sync for BufferSlot {}

impl BufferSlot {
    /// The sentinel returned when a pool is exhausted: null pointer,
    /// sentinel index, zero capacity. Never blocks, never panics.
    pub const EMPTY: Self = Self {
        ptr: std::ptr::null_mut(),
        index: u32::MAX,
        capacity: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null()
    }
}

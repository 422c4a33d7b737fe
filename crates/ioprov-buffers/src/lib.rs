//! # ioprov-buffers — slab, registered, and send buffer pools
//!
//! Three pool layers, each built on the one below:
//!
//! - [`slab::BufferSlabPool`] — a page-aligned slab cut into
//!   fixed-size slots, handed out LIFO.
//! - [`registered::RegisteredBufferPool`] — a slab pool whose
//!   memory is registered with the kernel completion API, either as
//!   one slab-wide registration or one registration per slot.
//! - [`send_pool::SendBufferPool`] — a plain slab pool used for
//!   transient send-path copies; owned per runtime, not a singleton.

pub mod registered;
pub mod send_pool;
pub mod slab;

pub use registered::{BufferRegistrar, RegisteredBufferPool, RegisteredSlot, RegistrationStrategy};
pub use send_pool::{SendBufferHandle, SendBufferPool};
pub use slab::BufferSlabPool;

//! # ioprov-framer — fixed-header message framing and dispatch
//!
//! A 24-byte little-endian header (`type | connection_id | timestamp_ms
//! | payload_size`) and a type-keyed handler registry sitting on top of
//! it. No streaming reassembly: each recv completion is framed as one
//! message.

pub mod dispatcher;
pub mod message;

pub use dispatcher::{Dispatcher, HandlerFn};
pub use message::{message_type, Message, MessageHeader, HEADER_SIZE};

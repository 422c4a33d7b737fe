//! Message framer and type-keyed dispatch registry.
//!
//! `process`/`create_message` plus a `register_handler`/`unregister_handler`
//! pair backed by a map from message type to callback. No reassembly
//! across multiple recv completions: each completion is framed as
//! exactly one message.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::message::{Message, MessageHeader, HEADER_SIZE};

pub type HandlerFn = Box<dyn Fn(&Message) + Send + Sync>;

/// Parses fixed-header messages and dispatches them to registered
/// per-type handlers.
pub struct Dispatcher {
    handlers: Mutex<HashMap<u32, HandlerFn>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_handler(&self, message_type: u32, handler: HandlerFn) {
        self.handlers.lock().unwrap().insert(message_type, handler);
    }

    pub fn unregister_handler(&self, message_type: u32) {
        self.handlers.lock().unwrap().remove(&message_type);
    }

    /// Parse one framed message out of `bytes` and run its handler, if
    /// any is registered. `connection_id` overrides whatever the wire
    /// header carries — it identifies the socket the bytes arrived on,
    /// which the framer, not the peer, is authoritative about.
    ///
    /// Returns `true` if a complete, valid message was parsed (whether
    /// or not a handler was registered for its type), `false` if
    /// `bytes` is too short or the header's declared payload size
    /// doesn't fit.
    pub fn process(&self, connection_id: u64, bytes: &[u8]) -> bool {
        let Some(header) = MessageHeader::decode(bytes) else {
            return false;
        };
        let total_needed = HEADER_SIZE + header.payload_size as usize;
        if bytes.len() < total_needed {
            return false;
        }

        let message = Message {
            message_type: header.message_type,
            connection_id,
            timestamp_ms: header.timestamp_ms,
            payload: bytes[HEADER_SIZE..total_needed].to_vec(),
        };

        let handlers = self.handlers.lock().unwrap();
        if let Some(handler) = handlers.get(&message.message_type) {
            handler(&message);
        } else {
            log::debug!(
                "no handler registered for message type {} (connection {})",
                message.message_type,
                connection_id
            );
        }
        true
    }

    /// Encode a message ready to hand to `send_async`.
    pub fn create_message(&self, message_type: u32, connection_id: u64, payload: &[u8]) -> Vec<u8> {
        let header = MessageHeader {
            message_type,
            connection_id,
            timestamp_ms: current_timestamp_ms(),
            payload_size: payload.len() as u32,
        };
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(payload);
        out
    }
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::message_type;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn create_then_process_invokes_the_registered_handler() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        dispatcher.register_handler(
            message_type::PING,
            Box::new(move |msg| {
                assert_eq!(msg.payload, b"hello");
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let wire = dispatcher.create_message(message_type::PING, 7, b"hello");
        assert!(dispatcher.process(7, &wire));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn process_rejects_truncated_payload() {
        let dispatcher = Dispatcher::new();
        let mut wire = dispatcher.create_message(message_type::PING, 1, b"0123456789");
        wire.truncate(HEADER_SIZE + 3);
        assert!(!dispatcher.process(1, &wire));
    }

    #[test]
    fn process_returns_true_with_no_handler_registered() {
        let dispatcher = Dispatcher::new();
        let wire = dispatcher.create_message(message_type::CUSTOM_START + 1, 1, b"x");
        assert!(dispatcher.process(1, &wire));
    }

    #[test]
    fn unregister_handler_stops_future_dispatch() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        dispatcher.register_handler(message_type::PONG, Box::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        dispatcher.unregister_handler(message_type::PONG);

        let wire = dispatcher.create_message(message_type::PONG, 1, b"x");
        dispatcher.process(1, &wire);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}

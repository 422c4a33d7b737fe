//! Fixed 24-byte little-endian message header and the decoded message
//! it describes.

/// `u32 type | u64 connection_id | u64 timestamp_ms | u32 payload_size`.
pub const HEADER_SIZE: usize = 24;

/// Well-known message type tags.
/// Not a closed enum: the dispatcher must route arbitrary application
/// type values at or above `CUSTOM_START`, so these are associated
/// constants on a newtype rather than a Rust `enum`.
pub mod message_type {
    pub const UNKNOWN: u32 = 0;
    pub const PING: u32 = 1;
    pub const PONG: u32 = 2;
    pub const CUSTOM_START: u32 = 1000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u32,
    pub connection_id: u64,
    pub timestamp_ms: u64,
    pub payload_size: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.message_type.to_le_bytes());
        buf[4..12].copy_from_slice(&self.connection_id.to_le_bytes());
        buf[12..20].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf[20..24].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Decode a header from the first `HEADER_SIZE` bytes of `bytes`.
    /// Returns `None` if `bytes` is shorter than `HEADER_SIZE` — callers
    /// must buffer further before retrying, not treat this as a parse
    /// error.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            message_type: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            connection_id: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            timestamp_ms: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
            payload_size: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        })
    }
}

/// A fully decoded message: header fields plus the owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: u32,
    pub connection_id: u64,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_known_control_type(&self) -> bool {
        matches!(self.message_type, message_type::PING | message_type::PONG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_encode_decode() {
        let header = MessageHeader {
            message_type: message_type::PING,
            connection_id: 42,
            timestamp_ms: 1_700_000_000_000,
            payload_size: 5,
        };
        let encoded = header.encode();
        let decoded = MessageHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn decode_rejects_short_input() {
        let short = [0u8; HEADER_SIZE - 1];
        assert!(MessageHeader::decode(&short).is_none());
    }
}

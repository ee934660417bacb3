/// Largest datagram payload a session will send or accept.
pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 29283;

/// Ack value meaning "no sequence number". Never stamped on a sent packet.
pub const INVALID_ACK: u16 = 0xFFFF;
/// Connection index meaning "no slot assigned".
pub const INVALID_CONNECTION_INDEX: u8 = 0xFF;
/// Message type index meaning "definition not resolved".
pub const INVALID_MESSAGE_INDEX: u8 = 0xFF;

/// Slots in the connection table. Index 0xFF is reserved for "none".
pub const MAX_CONNECTIONS: usize = 255;
/// Slots in the message type table.
pub const MAX_MESSAGE_TYPES: usize = 256;
/// User message types are assigned indices at or above this boundary.
pub const RESERVED_MESSAGE_INDICES: u8 = 32;

/// Size of the per-connection ring of sent-packet records.
pub const MAX_TRACKED_PACKETS: usize = 64;
/// Width of the received-acks history bitfield.
pub const ACK_HISTORY_BITS: u16 = 16;

/// Weight given to the previous value of the RTT and loss averages.
pub const EMA_RETAIN: f32 = 0.9;

const SEQUENCE_WRAP_THRESHOLD: u16 = u16::MAX / 2;

/// Returns true when `s1` is newer than `s2` under 16-bit wraparound.
///
/// This is the only place ack ordering is decided.
#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    s1 != s2 && s1.wrapping_sub(s2) <= SEQUENCE_WRAP_THRESHOLD
}

/// Next sequence number after `ack`, skipping [`INVALID_ACK`].
#[inline]
pub fn next_ack(ack: u16) -> u16 {
    match ack.wrapping_add(1) {
        INVALID_ACK => 0,
        next => next,
    }
}

/// Built-in message types, registered at fixed indices by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreMessage {
    Ping,
    Pong,
    Heartbeat,
    JoinRequest,
    JoinDeny,
    JoinAccept,
    JoinFinished,
    UpdateConnection,
}

impl CoreMessage {
    pub const ALL: [CoreMessage; 8] = [
        CoreMessage::Ping,
        CoreMessage::Pong,
        CoreMessage::Heartbeat,
        CoreMessage::JoinRequest,
        CoreMessage::JoinDeny,
        CoreMessage::JoinAccept,
        CoreMessage::JoinFinished,
        CoreMessage::UpdateConnection,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CoreMessage::Ping => "ping",
            CoreMessage::Pong => "pong",
            CoreMessage::Heartbeat => "heartbeat",
            CoreMessage::JoinRequest => "join_request",
            CoreMessage::JoinDeny => "join_deny",
            CoreMessage::JoinAccept => "join_accept",
            CoreMessage::JoinFinished => "join_finished",
            CoreMessage::UpdateConnection => "update_connection",
        }
    }
}

use crate::codec::{ByteBuffer, CodecError, Endianness};

use super::message::Message;
use super::protocol::{INVALID_ACK, INVALID_CONNECTION_INDEX, MAX_PACKET_SIZE};
use super::registry::MessageRegistry;

/// connection index (1) + ack (2) + highest received ack (2) + history (2) + message count (1)
pub const PACKET_HEADER_SIZE: usize = 8;
/// Every message frame starts with a 2-byte length covering the rest of the frame.
pub const FRAME_LENGTH_SIZE: usize = 2;

const MESSAGE_COUNT_OFFSET: usize = PACKET_HEADER_SIZE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Slot the sender occupies in its own session.
    pub connection_index: u8,
    pub ack: u16,
    pub highest_received_ack: u16,
    pub received_acks_history: u16,
    pub message_count: u8,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            connection_index: INVALID_CONNECTION_INDEX,
            ack: INVALID_ACK,
            highest_received_ack: INVALID_ACK,
            received_acks_history: 0,
            message_count: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("datagram of {0} bytes exceeds the {MAX_PACKET_SIZE}-byte packet limit")]
    TooLarge(usize),
    #[error("message frame of {needed} bytes does not fit in the {available} bytes left")]
    Full { needed: usize, available: usize },
    #[error("packet already holds {} messages", u8::MAX)]
    TooManyMessages,
    #[error("message {0:?} has no resolved type")]
    Unbound(String),
    #[error("unknown message type index {0}")]
    UnknownMessageType(u8),
    #[error("message frame length {0} is shorter than its header")]
    Truncated(u16),
}

/// One datagram: a constant-size header followed by length-prefixed
/// message frames.
#[derive(Debug, Clone)]
pub struct Packet {
    header: PacketHeader,
    buffer: ByteBuffer,
}

impl Packet {
    /// An outgoing packet with `header` written and no messages.
    pub fn with_header(header: PacketHeader, endianness: Endianness) -> Self {
        let mut packet = Self {
            header: PacketHeader {
                message_count: 0,
                ..header
            },
            buffer: ByteBuffer::fixed(MAX_PACKET_SIZE, endianness),
        };
        packet.encode_header();
        packet
    }

    /// Wraps a received datagram for reading.
    pub fn from_datagram(bytes: &[u8], endianness: Endianness) -> Result<Self, PacketError> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(bytes.len()));
        }
        let mut buffer = ByteBuffer::fixed(MAX_PACKET_SIZE, endianness);
        buffer.write_bytes(bytes)?;
        Ok(Self {
            header: PacketHeader::default(),
            buffer,
        })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn message_count(&self) -> u8 {
        self.header.message_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.message_count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.buffer.writable_len()
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Writes `header` over the fixed-size prefix. Message bytes already
    /// written are left untouched.
    pub fn write_header(&mut self, header: &PacketHeader) {
        self.header = *header;
        self.encode_header();
    }

    fn encode_header(&mut self) {
        let end = self.buffer.write_cursor().max(PACKET_HEADER_SIZE);
        let endianness = self.buffer.endianness();
        let header = &self.header;

        let mut prefix = [0u8; PACKET_HEADER_SIZE];
        prefix[0] = header.connection_index;
        prefix[1..3].copy_from_slice(&endianness.encode_u16(header.ack));
        prefix[3..5].copy_from_slice(&endianness.encode_u16(header.highest_received_ack));
        prefix[5..7].copy_from_slice(&endianness.encode_u16(header.received_acks_history));
        prefix[MESSAGE_COUNT_OFFSET] = header.message_count;

        // A fixed packet buffer always has room for its own header.
        if let Err(e) = overwrite_prefix(&mut self.buffer, &prefix, end) {
            log::error!("Failed to encode packet header: {}", e);
        }
    }

    /// Reads the header from the start of the buffer, leaving the read
    /// cursor at the first message frame.
    pub fn read_header(&mut self) -> Result<PacketHeader, PacketError> {
        self.buffer.reset_read();
        let header = PacketHeader {
            connection_index: self.buffer.read_u8()?,
            ack: self.buffer.read_u16()?,
            highest_received_ack: self.buffer.read_u16()?,
            received_acks_history: self.buffer.read_u16()?,
            message_count: self.buffer.read_u8()?,
        };
        self.header = header;
        Ok(header)
    }

    /// Appends `message` as one frame and bumps the header's message count.
    /// The packet is unchanged if the frame does not fit.
    pub fn write_message(&mut self, message: &Message) -> Result<(), PacketError> {
        if !message.is_bound() {
            return Err(PacketError::Unbound(message.name().to_owned()));
        }
        if self.header.message_count == u8::MAX {
            return Err(PacketError::TooManyMessages);
        }

        let frame_len = message.header_size() + message.payload_bytes().len();
        let needed = FRAME_LENGTH_SIZE + frame_len;
        let available = self.buffer.writable_len();
        let length = match u16::try_from(frame_len) {
            Ok(length) if needed <= available => length,
            _ => return Err(PacketError::Full { needed, available }),
        };

        self.buffer.write_u16(length)?;
        self.buffer.write_u8(message.type_index())?;
        if message.is_reliable() {
            self.buffer.write_u16(message.reliable_id().unwrap_or(0))?;
        }
        self.buffer.write_bytes(message.payload_bytes())?;

        self.header.message_count += 1;
        self.encode_header();
        Ok(())
    }

    /// Reads the next frame, resolving its type through `registry`.
    ///
    /// A frame of an unknown type is skipped so the following frames stay
    /// readable.
    pub fn read_message(&mut self, registry: &MessageRegistry) -> Result<Message, PacketError> {
        let endianness = self.buffer.endianness();
        let length = self.buffer.read_u16()?;
        if length == 0 {
            return Err(PacketError::Truncated(length));
        }
        let index = self.buffer.read_u8()?;

        let Some(definition) = registry.get(index) else {
            self.buffer.skip(length as usize - 1)?;
            return Err(PacketError::UnknownMessageType(index));
        };

        let header_size = definition.header_size();
        if (length as usize) < header_size {
            return Err(PacketError::Truncated(length));
        }
        let reliable_id = if definition.options.is_reliable() {
            Some(self.buffer.read_u16()?)
        } else {
            None
        };
        let payload = self.buffer.read_exact(length as usize - header_size)?;

        Ok(Message::from_wire(
            definition,
            reliable_id,
            payload,
            endianness,
        ))
    }

    /// Structural check: the header's message count of length-prefixed
    /// frames must consume the buffer exactly. Does not move any cursor.
    pub fn is_valid(&self) -> bool {
        let bytes = self.buffer.as_bytes();
        if bytes.len() < PACKET_HEADER_SIZE {
            return false;
        }
        let endianness = self.buffer.endianness();
        let count = bytes[MESSAGE_COUNT_OFFSET];

        let mut pos = PACKET_HEADER_SIZE;
        for _ in 0..count {
            let Some(prefix) = bytes.get(pos..pos + FRAME_LENGTH_SIZE) else {
                return false;
            };
            let length = endianness.decode_u16([prefix[0], prefix[1]]) as usize;
            pos += FRAME_LENGTH_SIZE;
            if length == 0 || pos + length > bytes.len() {
                return false;
            }
            pos += length;
        }
        pos == bytes.len()
    }
}

fn overwrite_prefix(buffer: &mut ByteBuffer, prefix: &[u8], end: usize) -> Result<(), CodecError> {
    buffer.seek_write(0)?;
    buffer.write_bytes(prefix)?;
    buffer.seek_write(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::{MessageOptions, MessageType};
    use crate::net::protocol::CoreMessage;

    fn registry() -> MessageRegistry {
        let mut registry = MessageRegistry::new();
        registry
            .register("state", MessageOptions::REQUIRES_CONNECTION | MessageOptions::RELIABLE_IN_ORDER, None)
            .unwrap();
        registry
            .register("chat", MessageOptions::REQUIRES_CONNECTION, None)
            .unwrap();
        registry
    }

    fn bound(registry: &MessageRegistry, name: &str, payload: &[u8]) -> Message {
        let mut message = Message::new(name);
        message.write_bytes(payload).unwrap();
        message.set_definition(registry.find(name).unwrap());
        message
    }

    fn header() -> PacketHeader {
        PacketHeader {
            connection_index: 2,
            ack: 0x0102,
            highest_received_ack: 0x0304,
            received_acks_history: 0x0506,
            message_count: 0,
        }
    }

    #[test]
    fn test_header_wire_layout_follows_endianness() {
        let big = Packet::with_header(header(), Endianness::Big);
        assert_eq!(big.as_bytes(), &[2, 1, 2, 3, 4, 5, 6, 0]);

        let little = Packet::with_header(header(), Endianness::Little);
        assert_eq!(little.as_bytes(), &[2, 2, 1, 4, 3, 6, 5, 0]);
    }

    #[test]
    fn test_message_roundtrip_through_packet() {
        let registry = registry();
        let mut state = bound(&registry, "state", &[1, 2, 3]);
        state.set_reliable_id(77);
        let chat = bound(&registry, "chat", b"hi");

        let mut packet = Packet::with_header(header(), Endianness::Big);
        packet.write_message(&state).unwrap();
        packet.write_message(&chat).unwrap();
        assert_eq!(packet.message_count(), 2);
        assert_eq!(packet.len(), PACKET_HEADER_SIZE + (2 + 3 + 3) + (2 + 1 + 2));

        let mut received = Packet::from_datagram(packet.as_bytes(), Endianness::Big).unwrap();
        assert!(received.is_valid());
        let read_header = received.read_header().unwrap();
        assert_eq!(read_header.message_count, 2);
        assert_eq!(read_header.ack, 0x0102);

        let first = received.read_message(&registry).unwrap();
        assert_eq!(first.type_index(), state.type_index());
        assert_eq!(first.reliable_id(), Some(77));
        assert_eq!(first.payload_bytes(), &[1, 2, 3]);

        let second = received.read_message(&registry).unwrap();
        assert_eq!(second.name(), "chat");
        assert_eq!(second.reliable_id(), None);
        assert_eq!(second.payload_bytes(), b"hi");

        assert!(received.read_message(&registry).is_err());
    }

    #[test]
    fn test_rewriting_header_keeps_messages() {
        let registry = registry();
        let mut packet = Packet::with_header(header(), Endianness::Little);
        packet.write_message(&bound(&registry, "chat", &[9; 5])).unwrap();
        let before = packet.as_bytes()[PACKET_HEADER_SIZE..].to_vec();

        let mut updated = *packet.header();
        updated.ack = 999;
        packet.write_header(&updated);

        assert_eq!(&packet.as_bytes()[PACKET_HEADER_SIZE..], before.as_slice());
        assert_eq!(packet.header().ack, 999);
        assert_eq!(packet.message_count(), 1);
        assert!(packet.is_valid());
    }

    #[test]
    fn test_write_message_fails_cleanly_when_full() {
        let registry = registry();
        let mut packet = Packet::with_header(header(), Endianness::Little);

        // Leaves exactly one byte of room.
        let filler_payload = MAX_PACKET_SIZE - PACKET_HEADER_SIZE - FRAME_LENGTH_SIZE - 1 - 1;
        packet
            .write_message(&bound(&registry, "chat", &vec![0xAB; filler_payload]))
            .unwrap();
        assert_eq!(packet.remaining_capacity(), 1);

        let before = packet.as_bytes().to_vec();
        let err = packet
            .write_message(&bound(&registry, "chat", &[]))
            .unwrap_err();
        assert!(matches!(err, PacketError::Full { needed: 3, available: 1 }));
        assert_eq!(packet.message_count(), 1);
        assert_eq!(packet.as_bytes(), before.as_slice());
    }

    #[test]
    fn test_unbound_message_rejected() {
        let mut packet = Packet::with_header(header(), Endianness::Little);
        let err = packet.write_message(&Message::new("chat")).unwrap_err();
        assert!(matches!(err, PacketError::Unbound(_)));
        assert!(packet.is_empty());
    }

    #[test]
    fn test_is_valid_rejects_slack_and_overrun() {
        let registry = registry();
        let mut packet = Packet::with_header(header(), Endianness::Little);
        packet.write_message(&bound(&registry, "chat", b"abc")).unwrap();
        let bytes = packet.as_bytes().to_vec();

        let mut slack = bytes.clone();
        slack.push(0);
        assert!(!Packet::from_datagram(&slack, Endianness::Little).unwrap().is_valid());

        let short = &bytes[..bytes.len() - 1];
        assert!(!Packet::from_datagram(short, Endianness::Little).unwrap().is_valid());

        let mut extra_count = bytes.clone();
        extra_count[MESSAGE_COUNT_OFFSET] = 2;
        assert!(!Packet::from_datagram(&extra_count, Endianness::Little).unwrap().is_valid());

        assert!(!Packet::from_datagram(&bytes[..4], Endianness::Little).unwrap().is_valid());
    }

    #[test]
    fn test_is_valid_does_not_move_read_cursor() {
        let registry = registry();
        let mut packet = Packet::with_header(header(), Endianness::Little);
        packet.write_message(&bound(&registry, "chat", b"abc")).unwrap();

        let mut valid = Packet::from_datagram(packet.as_bytes(), Endianness::Little).unwrap();
        valid.read_header().unwrap();
        let cursor = valid.buffer().read_cursor();
        assert!(valid.is_valid());
        assert_eq!(valid.buffer().read_cursor(), cursor);

        let mut corrupt = packet.as_bytes().to_vec();
        corrupt.push(1);
        let mut invalid = Packet::from_datagram(&corrupt, Endianness::Little).unwrap();
        invalid.read_header().unwrap();
        let cursor = invalid.buffer().read_cursor();
        assert!(!invalid.is_valid());
        assert_eq!(invalid.buffer().read_cursor(), cursor);
    }

    #[test]
    fn test_unknown_type_frame_is_skipped() {
        let registry = registry();
        let unknown = MessageType {
            index: 200,
            name: "mystery".into(),
            options: MessageOptions::REQUIRES_CONNECTION,
        };
        let mut mystery = Message::new("mystery");
        mystery.write_bytes(&[1, 2, 3, 4]).unwrap();
        mystery.set_definition(&unknown);

        let mut ping = Message::new("ping");
        ping.set_definition(registry.core(CoreMessage::Ping));

        let mut packet = Packet::with_header(header(), Endianness::Little);
        packet.write_message(&mystery).unwrap();
        packet.write_message(&ping).unwrap();

        let mut received = Packet::from_datagram(packet.as_bytes(), Endianness::Little).unwrap();
        received.read_header().unwrap();
        assert!(matches!(
            received.read_message(&registry),
            Err(PacketError::UnknownMessageType(200))
        ));
        assert_eq!(received.read_message(&registry).unwrap().name(), "ping");
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let bytes = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            Packet::from_datagram(&bytes, Endianness::Little),
            Err(PacketError::TooLarge(_))
        ));
    }
}

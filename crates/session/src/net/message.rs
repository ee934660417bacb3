use bitflags::bitflags;

use crate::codec::{ByteBuffer, CodecError, Endianness};

use super::protocol::INVALID_MESSAGE_INDEX;

bitflags! {
    /// Delivery requirements of a message type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageOptions: u8 {
        /// Processed without an established connection.
        const CONNECTIONLESS = 1 << 0;
        /// Dropped unless the sender owns a connection slot.
        const REQUIRES_CONNECTION = 1 << 1;
        /// Carries a reliable id and is never dropped when a packet fills.
        const RELIABLE_IN_ORDER = 1 << 2;
    }
}

impl MessageOptions {
    pub fn is_reliable(self) -> bool {
        self.contains(Self::RELIABLE_IN_ORDER)
    }

    pub fn requires_connection(self) -> bool {
        self.contains(Self::REQUIRES_CONNECTION)
    }
}

/// The data half of a registered message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    pub index: u8,
    pub name: String,
    pub options: MessageOptions,
}

impl MessageType {
    /// Bytes between the length prefix and the payload on the wire.
    pub fn header_size(&self) -> usize {
        if self.options.is_reliable() { 3 } else { 1 }
    }
}

/// One logical payload, tagged with a registered type.
///
/// A message built for sending knows only its type name; the index and
/// options are stamped in by the session when it is queued. A received
/// message is always bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    name: String,
    type_index: u8,
    options: MessageOptions,
    reliable_id: Option<u16>,
    payload: ByteBuffer,
}

impl Message {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_endianness(name, Endianness::default())
    }

    pub fn with_endianness(name: impl Into<String>, endianness: Endianness) -> Self {
        Self {
            name: name.into(),
            type_index: INVALID_MESSAGE_INDEX,
            options: MessageOptions::empty(),
            reliable_id: None,
            payload: ByteBuffer::new(endianness),
        }
    }

    /// Rebuilds a message read off the wire.
    pub(crate) fn from_wire(
        definition: &MessageType,
        reliable_id: Option<u16>,
        payload: &[u8],
        endianness: Endianness,
    ) -> Self {
        Self {
            name: definition.name.clone(),
            type_index: definition.index,
            options: definition.options,
            reliable_id,
            payload: ByteBuffer::from_bytes(payload, endianness),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_index(&self) -> u8 {
        self.type_index
    }

    pub fn options(&self) -> MessageOptions {
        self.options
    }

    pub fn is_bound(&self) -> bool {
        self.type_index != INVALID_MESSAGE_INDEX
    }

    pub fn is_reliable(&self) -> bool {
        self.options.is_reliable()
    }

    pub fn reliable_id(&self) -> Option<u16> {
        self.reliable_id
    }

    pub(crate) fn set_reliable_id(&mut self, id: u16) {
        self.reliable_id = Some(id);
    }

    /// Binds the resolved type. The name is taken from the definition.
    pub fn set_definition(&mut self, definition: &MessageType) {
        self.name.clone_from(&definition.name);
        self.type_index = definition.index;
        self.options = definition.options;
        if !definition.options.is_reliable() {
            self.reliable_id = None;
        }
    }

    pub fn header_size(&self) -> usize {
        if self.is_reliable() { 3 } else { 1 }
    }

    /// Length-prefixed frame size: prefix, header and payload.
    pub fn frame_size(&self) -> usize {
        2 + self.header_size() + self.payload.len()
    }

    pub fn payload(&self) -> &ByteBuffer {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut ByteBuffer {
        &mut self.payload
    }

    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.payload.write_u8(value)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.payload.write_u16(value)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.payload.write_u32(value)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.payload.write_i32(value)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.payload.write_f32(value)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.payload.write_f64(value)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.payload.write_bytes(bytes)
    }

    /// Writes a variable-length byte count followed by the UTF-8 bytes, so
    /// further fields can follow the string.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.payload.write_var_uint(value.len() as u64)?;
        self.payload.write_str(value)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.payload.read_u8()
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.payload.read_u16()
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.payload.read_u32()
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.payload.read_i32()
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.payload.read_f32()
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.payload.read_f64()
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.payload.read_var_uint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::Underrun {
            requested: usize::MAX,
            available: self.payload.unread_len(),
        })?;
        self.payload.read_str(len)
    }
}

//! Binary buffer codec.
//!
//! [`ByteBuffer`] is a byte region with independent read and write cursors.
//! Multi-byte primitives are converted to the buffer's declared
//! [`Endianness`] on the way in and out; raw byte copies are never converted.

mod buffer;
mod endian;
mod varint;

pub use buffer::{ByteBuffer, GROWTH_UNIT};
pub use endian::Endianness;
pub use varint::{MAX_VAR_UINT_LEN, decode_var_uint, encode_var_uint};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer full: needed {requested} bytes, {available} available")]
    BufferFull { requested: usize, available: usize },
    #[error("buffer underrun: needed {requested} bytes, {available} unread")]
    Underrun { requested: usize, available: usize },
    #[error("variable-length integer overflows 64 bits")]
    VarUintOverflow,
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

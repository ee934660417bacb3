use super::varint::{MAX_VAR_UINT_LEN, decode_var_uint, encode_var_uint};
use super::{CodecError, Endianness};

/// Allocation granularity of growable buffers.
pub const GROWTH_UNIT: usize = 1024;

/// A byte region with a write cursor and a trailing read cursor.
///
/// `read_cursor <= write_cursor <= capacity` holds after every call. A write
/// that does not fit either grows the buffer (growable buffers) or fails
/// without touching the contents (fixed buffers).
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    growable: bool,
    write_cursor: usize,
    read_cursor: usize,
    endianness: Endianness,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(Endianness::default())
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.endianness == other.endianness && self.as_bytes() == other.as_bytes()
    }
}

impl ByteBuffer {
    /// Growable buffer. Storage is allocated on the first write.
    pub fn new(endianness: Endianness) -> Self {
        Self {
            data: Vec::new(),
            growable: true,
            write_cursor: 0,
            read_cursor: 0,
            endianness,
        }
    }

    /// Fixed-size buffer that refuses writes past `capacity`.
    pub fn fixed(capacity: usize, endianness: Endianness) -> Self {
        Self {
            data: vec![0; capacity],
            growable: false,
            write_cursor: 0,
            read_cursor: 0,
            endianness,
        }
    }

    /// Fixed-size buffer holding a copy of `bytes`, ready to be read.
    pub fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self {
        Self {
            data: bytes.to_vec(),
            growable: false,
            write_cursor: bytes.len(),
            read_cursor: 0,
            endianness,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn is_growable(&self) -> bool {
        self.growable
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Bytes that can still be written without failing.
    pub fn writable_len(&self) -> usize {
        if self.growable {
            usize::MAX - self.write_cursor
        } else {
            self.data.len() - self.write_cursor
        }
    }

    pub fn unread_len(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    /// Everything written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.write_cursor]
    }

    /// Written bytes not yet consumed by a read.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_cursor..self.write_cursor]
    }

    /// Discards the contents. Growable buffers are reallocated to one
    /// [`GROWTH_UNIT`]; fixed buffers keep their capacity.
    pub fn reset_write(&mut self) {
        if self.growable {
            self.data = vec![0; GROWTH_UNIT];
        } else {
            self.data.fill(0);
        }
        self.write_cursor = 0;
        self.read_cursor = 0;
    }

    /// Rewinds the read cursor to the start of the buffer.
    pub fn reset_read(&mut self) {
        self.read_cursor = 0;
    }

    /// Moves the write cursor. The read cursor is pulled back with it if it
    /// would otherwise run ahead.
    pub fn seek_write(&mut self, position: usize) -> Result<(), CodecError> {
        if position > self.data.len() {
            self.reserve(position - self.write_cursor.min(position))?;
            if position > self.data.len() {
                return Err(CodecError::BufferFull {
                    requested: position,
                    available: self.data.len(),
                });
            }
        }
        self.write_cursor = position;
        self.read_cursor = self.read_cursor.min(position);
        Ok(())
    }

    /// Ensures `additional` more bytes can be written at the write cursor.
    pub fn reserve(&mut self, additional: usize) -> Result<(), CodecError> {
        let available = self.data.len() - self.write_cursor;
        if additional <= available {
            return Ok(());
        }
        if !self.growable {
            return Err(CodecError::BufferFull {
                requested: additional,
                available,
            });
        }

        let required = self
            .write_cursor
            .checked_add(additional)
            .ok_or(CodecError::BufferFull {
                requested: additional,
                available,
            })?;
        let rounded = required.div_ceil(GROWTH_UNIT) * GROWTH_UNIT;
        self.data.resize(rounded, 0);
        Ok(())
    }

    /// Appends `bytes` verbatim. Nothing is written if they do not fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve(bytes.len())?;
        let end = self.write_cursor + bytes.len();
        self.data[self.write_cursor..end].copy_from_slice(bytes);
        self.write_cursor = end;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<(), CodecError> {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_u16(value))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_u32(value))
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_u64(value))
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_i16(value))
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_i32(value))
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_i64(value))
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_f32(value))
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_bytes(&self.endianness.encode_f64(value))
    }

    /// Writes `value` as a variable-length integer, returning the bytes used.
    pub fn write_var_uint(&mut self, value: u64) -> Result<usize, CodecError> {
        let mut encoded = [0u8; MAX_VAR_UINT_LEN];
        let used = encode_var_uint(value, &mut encoded);
        self.write_bytes(&encoded[..used])?;
        Ok(used)
    }

    /// Writes the raw UTF-8 bytes of `value` with no length or terminator.
    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_bytes(value.as_bytes())
    }

    /// Copies up to `out.len()` unread bytes into `out`, returning how many
    /// were copied. Never reads past the write cursor.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.unread_len());
        let end = self.read_cursor + count;
        out[..count].copy_from_slice(&self.data[self.read_cursor..end]);
        self.read_cursor = end;
        count
    }

    /// Consumes exactly `len` bytes or nothing at all.
    pub fn read_exact(&mut self, len: usize) -> Result<&[u8], CodecError> {
        let available = self.unread_len();
        if len > available {
            return Err(CodecError::Underrun {
                requested: len,
                available,
            });
        }
        let start = self.read_cursor;
        self.read_cursor += len;
        Ok(&self.data[start..self.read_cursor])
    }

    pub fn skip(&mut self, len: usize) -> Result<(), CodecError> {
        self.read_exact(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_ne_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.endianness.decode_u16(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.endianness.decode_u32(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(self.endianness.decode_u64(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.endianness.decode_i16(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.endianness.decode_i32(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.endianness.decode_i64(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(self.endianness.decode_f32(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(self.endianness.decode_f64(self.read_array()?))
    }

    pub fn read_var_uint(&mut self) -> Result<u64, CodecError> {
        let (value, used) = decode_var_uint(self.unread())?;
        self.read_cursor += used;
        Ok(value)
    }

    /// Reads `len` bytes as UTF-8. The cursor does not move on failure.
    pub fn read_str(&mut self, len: usize) -> Result<String, CodecError> {
        let available = self.unread_len();
        if len > available {
            return Err(CodecError::Underrun {
                requested: len,
                available,
            });
        }
        let end = self.read_cursor + len;
        let text = std::str::from_utf8(&self.data[self.read_cursor..end])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_owned();
        self.read_cursor = end;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_buffer_rejects_overflow_without_partial_write() {
        let mut buffer = ByteBuffer::fixed(4, Endianness::Little);
        buffer.write_u16(0xBEEF).unwrap();

        let err = buffer.write_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferFull {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(buffer.as_bytes(), &[0xEF, 0xBE]);
        assert_eq!(buffer.write_cursor(), 2);
    }

    #[test]
    fn test_growable_rounds_capacity_to_unit() {
        let mut buffer = ByteBuffer::new(Endianness::Little);
        assert_eq!(buffer.capacity(), 0);

        buffer.write_bytes(&[7; 10]).unwrap();
        assert_eq!(buffer.capacity(), GROWTH_UNIT);

        buffer.write_bytes(&vec![1; GROWTH_UNIT]).unwrap();
        assert_eq!(buffer.capacity(), 2 * GROWTH_UNIT);
        assert_eq!(buffer.len(), GROWTH_UNIT + 10);
    }

    #[test]
    fn test_endianness_is_per_instance() {
        let mut little = ByteBuffer::new(Endianness::Little);
        let mut big = ByteBuffer::new(Endianness::Big);
        little.write_u32(0x01020304).unwrap();
        big.write_u32(0x01020304).unwrap();

        assert_eq!(little.as_bytes(), &[4, 3, 2, 1]);
        assert_eq!(big.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(big.read_u32().unwrap(), 0x01020304);
    }

    #[test]
    fn test_read_bytes_stops_at_write_cursor() {
        let mut buffer = ByteBuffer::fixed(16, Endianness::Little);
        buffer.write_bytes(&[9, 8, 7]).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(buffer.read_bytes(&mut out), 3);
        assert_eq!(&out[..3], &[9, 8, 7]);
        assert_eq!(buffer.read_bytes(&mut out), 0);
        assert_eq!(buffer.read_cursor(), buffer.write_cursor());
    }

    #[test]
    fn test_underrun_leaves_cursor() {
        let mut buffer = ByteBuffer::from_bytes(&[1], Endianness::Big);
        assert!(matches!(
            buffer.read_u16(),
            Err(CodecError::Underrun {
                requested: 2,
                available: 1
            })
        ));
        assert_eq!(buffer.read_cursor(), 0);
        assert_eq!(buffer.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_reset_read_and_reset_write() {
        let mut buffer = ByteBuffer::new(Endianness::Little);
        buffer.write_var_uint(1_000_000).unwrap();
        assert_eq!(buffer.read_var_uint().unwrap(), 1_000_000);

        buffer.reset_read();
        assert_eq!(buffer.read_cursor(), 0);
        assert_eq!(buffer.read_var_uint().unwrap(), 1_000_000);

        buffer.reset_write();
        assert_eq!(buffer.write_cursor(), 0);
        assert_eq!(buffer.read_cursor(), 0);
        assert_eq!(buffer.capacity(), GROWTH_UNIT);
    }

    #[test]
    fn test_string_has_no_terminator() {
        let mut buffer = ByteBuffer::new(Endianness::Little);
        buffer.write_str("abc").unwrap();
        assert_eq!(buffer.as_bytes(), b"abc");
        assert_eq!(buffer.read_str(3).unwrap(), "abc");
    }

    #[test]
    fn test_invalid_utf8_does_not_consume() {
        let mut buffer = ByteBuffer::from_bytes(&[0xFF, 0xFE], Endianness::Little);
        assert_eq!(buffer.read_str(2), Err(CodecError::InvalidUtf8));
        assert_eq!(buffer.read_cursor(), 0);
    }

    #[test]
    fn test_seek_write_pulls_read_cursor_back() {
        let mut buffer = ByteBuffer::fixed(8, Endianness::Little);
        buffer.write_bytes(&[1, 2, 3, 4]).unwrap();
        buffer.skip(3).unwrap();

        buffer.seek_write(1).unwrap();
        assert_eq!(buffer.read_cursor(), 1);
        assert!(buffer.seek_write(9).is_err());
    }
}

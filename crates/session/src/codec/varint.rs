use super::CodecError;

/// Longest encoding of a `u64`: ceil(64 / 7) bytes.
pub const MAX_VAR_UINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Encodes `value` seven bits at a time, least significant group first.
/// The high bit of every emitted byte except the last is set.
///
/// Returns the number of bytes used in `out`.
pub fn encode_var_uint(mut value: u64, out: &mut [u8; MAX_VAR_UINT_LEN]) -> usize {
    let mut used = 0;
    loop {
        let group = (value & PAYLOAD_MASK as u64) as u8;
        value >>= 7;
        if value == 0 {
            out[used] = group;
            return used + 1;
        }
        out[used] = group | CONTINUATION;
        used += 1;
    }
}

/// Decodes a value written by [`encode_var_uint`] from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_var_uint(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate().take(MAX_VAR_UINT_LEN) {
        let group = (byte & PAYLOAD_MASK) as u64;
        // The tenth byte may only carry the single remaining bit.
        if i == MAX_VAR_UINT_LEN - 1 && group > 1 {
            return Err(CodecError::VarUintOverflow);
        }
        value |= group << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }

    if bytes.len() >= MAX_VAR_UINT_LEN {
        Err(CodecError::VarUintOverflow)
    } else {
        Err(CodecError::Underrun {
            requested: bytes.len() + 1,
            available: bytes.len(),
        })
    }
}

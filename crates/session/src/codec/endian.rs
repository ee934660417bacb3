use serde::{Deserialize, Serialize};

/// Byte order of multi-byte primitives inside a [`super::ByteBuffer`].
///
/// Chosen once per buffer; there is no process-wide setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Self::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Self::Big;

    #[inline]
    pub fn is_native(self) -> bool {
        self == Self::NATIVE
    }
}

macro_rules! primitive_codec {
    ($($ty:ty => $encode:ident, $decode:ident;)*) => {
        impl Endianness {
            $(
                #[inline]
                pub fn $encode(self, value: $ty) -> [u8; size_of::<$ty>()] {
                    match self {
                        Self::Little => value.to_le_bytes(),
                        Self::Big => value.to_be_bytes(),
                    }
                }

                #[inline]
                pub fn $decode(self, bytes: [u8; size_of::<$ty>()]) -> $ty {
                    match self {
                        Self::Little => <$ty>::from_le_bytes(bytes),
                        Self::Big => <$ty>::from_be_bytes(bytes),
                    }
                }
            )*
        }
    };
}

primitive_codec! {
    u16 => encode_u16, decode_u16;
    u32 => encode_u32, decode_u32;
    u64 => encode_u64, decode_u64;
    i16 => encode_i16, decode_i16;
    i32 => encode_i32, decode_i32;
    i64 => encode_i64, decode_i64;
    f32 => encode_f32, decode_f32;
    f64 => encode_f64, decode_f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_u16_layout() {
        assert_eq!(Endianness::Big.encode_u16(0x1234), [0x12, 0x34]);
        assert_eq!(Endianness::Little.encode_u16(0x1234), [0x34, 0x12]);
    }

    #[test]
    fn test_decode_matches_declared_order() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(Endianness::Big.decode_u32(bytes), 0xDEADBEEF);
        assert_eq!(Endianness::Little.decode_u32(bytes), 0xEFBEADDE);
    }

    #[test]
    fn test_float_bits_survive_either_order() {
        for order in [Endianness::Little, Endianness::Big] {
            let encoded = order.encode_f32(-12.5);
            assert_eq!(order.decode_f32(encoded), -12.5);
        }
    }
}

//! Primitive type codecs (bool, fixed-width integers, floats).

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{FromWire, ToWire};

fn text_str<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Parse(format!("invalid UTF-8 in {}: {}", what, e)))
}

// === Boolean ===

impl ToWire for bool {
    const FORMAT: FormatCode = FormatCode::Binary;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        match format {
            FormatCode::Binary => out.push(u8::from(*self)),
            FormatCode::Text => out.push(if *self { b't' } else { b'f' }),
        }
    }
}

impl FromWire<'_> for bool {
    fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
        match format {
            FormatCode::Binary => match bytes {
                [b] => Ok(*b != 0),
                _ => Err(Error::Parse(format!(
                    "invalid boolean length: {}",
                    bytes.len()
                ))),
            },
            FormatCode::Text => match bytes {
                b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(true),
                b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(false),
                _ => Err(Error::Parse(format!(
                    "invalid boolean: {:?}",
                    String::from_utf8_lossy(bytes)
                ))),
            },
        }
    }
}

// === Integers ===
//
// Binary form is the fixed-width big-endian encoding, size_of::<T>() bytes.
// Text form is the plain decimal rendering.

macro_rules! impl_int_wire {
    ($($t:ty),+ $(,)?) => {$(
        impl ToWire for $t {
            const FORMAT: FormatCode = FormatCode::Binary;

            fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
                match format {
                    FormatCode::Binary => out.extend_from_slice(&self.to_be_bytes()),
                    FormatCode::Text => out.extend_from_slice(self.to_string().as_bytes()),
                }
            }
        }

        impl FromWire<'_> for $t {
            fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
                match format {
                    FormatCode::Binary => {
                        let arr: [u8; size_of::<$t>()] = bytes.try_into().map_err(|_| {
                            Error::Parse(format!(
                                concat!("invalid ", stringify!($t), " length: {}"),
                                bytes.len()
                            ))
                        })?;
                        Ok(<$t>::from_be_bytes(arr))
                    }
                    FormatCode::Text => {
                        let s = text_str(bytes, stringify!($t))?;
                        s.parse().map_err(|e| {
                            Error::Parse(format!(concat!("invalid ", stringify!($t), ": {}"), e))
                        })
                    }
                }
            }
        }
    )+};
}

impl_int_wire!(i16, i32, i64, u16, u32, u64);

// === Floating point ===
//
// Binary form is the IEEE-754 bit pattern, big-endian. Text form uses the
// server's spellings for the non-finite values.

macro_rules! impl_float_wire {
    ($($t:ty),+ $(,)?) => {$(
        impl ToWire for $t {
            const FORMAT: FormatCode = FormatCode::Binary;

            fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
                match format {
                    FormatCode::Binary => out.extend_from_slice(&self.to_bits().to_be_bytes()),
                    FormatCode::Text => {
                        if self.is_nan() {
                            out.extend_from_slice(b"NaN");
                        } else if *self == <$t>::INFINITY {
                            out.extend_from_slice(b"Infinity");
                        } else if *self == <$t>::NEG_INFINITY {
                            out.extend_from_slice(b"-Infinity");
                        } else {
                            out.extend_from_slice(self.to_string().as_bytes());
                        }
                    }
                }
            }
        }

        impl FromWire<'_> for $t {
            fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
                match format {
                    FormatCode::Binary => {
                        let arr: [u8; size_of::<$t>()] = bytes.try_into().map_err(|_| {
                            Error::Parse(format!(
                                concat!("invalid ", stringify!($t), " length: {}"),
                                bytes.len()
                            ))
                        })?;
                        Ok(<$t>::from_be_bytes(arr))
                    }
                    FormatCode::Text => {
                        let s = text_str(bytes, stringify!($t))?;
                        match s {
                            "NaN" => Ok(<$t>::NAN),
                            "Infinity" => Ok(<$t>::INFINITY),
                            "-Infinity" => Ok(<$t>::NEG_INFINITY),
                            _ => s.parse().map_err(|e| {
                                Error::Parse(format!(
                                    concat!("invalid ", stringify!($t), ": {}"),
                                    e
                                ))
                            }),
                        }
                    }
                }
            }
        }
    )+};
}

impl_float_wire!(f32, f64);

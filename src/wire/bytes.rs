//! Byte array codecs (`&[u8]`, `Vec<u8>`).

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{FromWire, ToWire};

impl ToWire for [u8] {
    const FORMAT: FormatCode = FormatCode::Binary;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        match format {
            FormatCode::Binary => out.extend_from_slice(self),
            // Text format for bytea is hex-encoded: \xDEADBEEF
            FormatCode::Text => {
                out.reserve(2 + self.len() * 2);
                out.extend_from_slice(b"\\x");
                for &b in self {
                    out.push(HEX_DIGITS[(b >> 4) as usize]);
                    out.push(HEX_DIGITS[(b & 0x0F) as usize]);
                }
            }
        }
    }
}

impl ToWire for Vec<u8> {
    const FORMAT: FormatCode = FormatCode::Binary;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        self.as_slice().encode(format, out);
    }
}

impl FromWire<'_> for Vec<u8> {
    fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
        match format {
            FormatCode::Binary => Ok(bytes.to_vec()),
            FormatCode::Text => match bytes.strip_prefix(b"\\x") {
                Some(hex) => decode_hex(hex),
                // Fallback: raw bytes (escape output format)
                None => Ok(bytes.to_vec()),
            },
        }
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Parse("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        result.push((high << 4) | low);
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Parse(format!("invalid hex digit: {}", b as char))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_is_raw() {
        let mut buf = Vec::new();
        [0xDE, 0xAD].as_slice().encode(FormatCode::Binary, &mut buf);
        assert_eq!(buf, [0xDE, 0xAD]);
        assert_eq!(
            Vec::<u8>::decode(FormatCode::Binary, &buf).unwrap(),
            vec![0xDE, 0xAD]
        );
    }

    #[test]
    fn text_is_hex() {
        let mut buf = Vec::new();
        [0xDE, 0xAD, 0xBE, 0xEF]
            .as_slice()
            .encode(FormatCode::Text, &mut buf);
        assert_eq!(buf, b"\\xdeadbeef");

        assert_eq!(
            Vec::<u8>::decode(FormatCode::Text, b"\\xDEADBEEF").unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn odd_hex_length_fails() {
        assert!(Vec::<u8>::decode(FormatCode::Text, b"\\xABC").is_err());
    }
}

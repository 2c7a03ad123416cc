//! String type codecs, plus the [`Symbol`] newtype for enumerated values.

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{FromWire, ToWire};

// Strings are UTF-8 on the wire in both formats.

impl ToWire for str {
    const FORMAT: FormatCode = FormatCode::Text;

    fn encode(&self, _format: FormatCode, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToWire for String {
    const FORMAT: FormatCode = FormatCode::Text;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        self.as_str().encode(format, out);
    }
}

impl<'a> FromWire<'a> for &'a str {
    fn decode(_format: FormatCode, bytes: &'a [u8]) -> Result<Self> {
        simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Parse(format!("invalid UTF-8 in string: {}", e)))
    }
}

impl FromWire<'_> for String {
    fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
        <&str>::decode(format, bytes).map(str::to_owned)
    }
}

/// An enumerated server-side value, such as a value of a `CREATE TYPE .. AS
/// ENUM` type.
///
/// Plain strings travel unquoted; only enumerated values are quoted. The
/// TEXT encoding wraps the symbol in single quotes and doubles embedded
/// quotes, so `it's` becomes `'it''s'`. The BINARY encoding is the raw
/// symbol bytes with no quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl ToWire for Symbol {
    const FORMAT: FormatCode = FormatCode::Text;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        match format {
            FormatCode::Binary => out.extend_from_slice(self.0.as_bytes()),
            FormatCode::Text => {
                out.push(b'\'');
                for &b in self.0.as_bytes() {
                    if b == b'\'' {
                        out.push(b'\'');
                    }
                    out.push(b);
                }
                out.push(b'\'');
            }
        }
    }
}

impl FromWire<'_> for Symbol {
    fn decode(format: FormatCode, bytes: &[u8]) -> Result<Self> {
        match format {
            FormatCode::Binary => Ok(Self(String::decode(format, bytes)?)),
            FormatCode::Text => {
                let inner = bytes
                    .strip_prefix(b"'")
                    .and_then(|rest| rest.strip_suffix(b"'"))
                    .ok_or_else(|| {
                        Error::Parse(format!(
                            "symbol is not quoted: {:?}",
                            String::from_utf8_lossy(bytes)
                        ))
                    })?;
                let s = <&str>::decode(format, inner)?;
                Ok(Self(s.replace("''", "'")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_is_raw_in_both_formats() {
        let mut text = Vec::new();
        let mut binary = Vec::new();
        "hello".encode(FormatCode::Text, &mut text);
        "hello".encode(FormatCode::Binary, &mut binary);
        assert_eq!(text, b"hello");
        assert_eq!(text, binary);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        assert!(String::decode(FormatCode::Text, &[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn symbol_text_is_quoted() {
        let mut buf = Vec::new();
        Symbol::new("active").encode(FormatCode::Text, &mut buf);
        assert_eq!(buf, b"'active'");
    }

    #[test]
    fn symbol_escapes_embedded_quote() {
        let mut buf = Vec::new();
        Symbol::new("it's").encode(FormatCode::Text, &mut buf);
        assert_eq!(buf, b"'it''s'");

        let back = Symbol::decode(FormatCode::Text, &buf).unwrap();
        assert_eq!(back.as_str(), "it's");
    }

    #[test]
    fn symbol_binary_is_unquoted() {
        let mut buf = Vec::new();
        Symbol::new("active").encode(FormatCode::Binary, &mut buf);
        assert_eq!(buf, b"active");
    }

    #[test]
    fn unquoted_symbol_text_fails() {
        assert!(Symbol::decode(FormatCode::Text, b"active").is_err());
    }
}

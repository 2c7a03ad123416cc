//! Typed wire codec for PostgreSQL TEXT and BINARY value representations.
//!
//! Every supported type implements [`ToWire`] (value → bytes, total) and/or
//! [`FromWire`] (bytes → value, fallible) for both wire formats. The format
//! a type prefers when bound as a parameter is a compile-time property of
//! the type ([`ToWire::FORMAT`]), not a runtime flag threaded through call
//! sites.

mod bytes;
mod primitives;
mod string;

pub use string::Symbol;

use crate::error::Result;
use crate::protocol::types::FormatCode;

/// Trait for encoding Rust values into a PostgreSQL wire format.
///
/// `encode` is total: it writes the value bytes (no length prefix) for the
/// requested format. Binary encodings of fixed-width numerics are big-endian;
/// text encodings are the human-readable forms the server accepts.
pub trait ToWire {
    /// The wire format this type prefers when sent as a parameter.
    const FORMAT: FormatCode;

    /// Encode the value in the given format, appending to `out`.
    fn encode(&self, format: FormatCode, out: &mut Vec<u8>);
}

/// Trait for decoding PostgreSQL wire values into Rust types.
pub trait FromWire<'a>: Sized {
    /// Decode a value from the given format.
    fn decode(format: FormatCode, bytes: &'a [u8]) -> Result<Self>;
}

/// Decode a nullable value driven by the length sentinel.
///
/// `value` is `None` when the wire length was −1 (SQL NULL); the result is
/// then always "absent", independent of `T`. For a present TEXT value the
/// decode never fails: an inner parse failure also yields "absent". BINARY
/// decode failures of present values propagate.
pub fn decode_nullable<'a, T: FromWire<'a>>(
    format: FormatCode,
    value: Option<&'a [u8]>,
) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(bytes) => match format {
            FormatCode::Text => Ok(T::decode(format, bytes).ok()),
            FormatCode::Binary => T::decode(format, bytes).map(Some),
        },
    }
}

// === Reference support ===

impl<T: ToWire + ?Sized> ToWire for &T {
    const FORMAT: FormatCode = T::FORMAT;

    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        (*self).encode(format, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel_is_absent_for_every_type() {
        assert_eq!(
            decode_nullable::<i16>(FormatCode::Binary, None).unwrap(),
            None
        );
        assert_eq!(
            decode_nullable::<f64>(FormatCode::Binary, None).unwrap(),
            None
        );
        assert_eq!(
            decode_nullable::<String>(FormatCode::Text, None).unwrap(),
            None
        );
    }

    #[test]
    fn text_decode_of_optional_never_fails() {
        // "zero" is not a number; the nullable text decode reports absence
        // instead of an error.
        let value = decode_nullable::<i32>(FormatCode::Text, Some(&b"zero"[..])).unwrap();
        assert_eq!(value, None);

        let value = decode_nullable::<i32>(FormatCode::Text, Some(&b"42"[..])).unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn binary_decode_of_present_garbage_propagates() {
        // 3 bytes cannot be an i32.
        assert!(decode_nullable::<i32>(FormatCode::Binary, Some(&[0, 0, 1][..])).is_err());
    }
}

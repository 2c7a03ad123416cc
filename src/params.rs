//! Query parameters and the Bind-frame parameter section encoder.

use crate::protocol::codec::{backpatch_i32, reserve_i32, write_i16, write_i32};
use crate::protocol::types::FormatCode;
use crate::wire::ToWire;

/// Object-safe encoding surface over [`ToWire`] so parameters of different
/// types can live in one frame.
trait ErasedValue: Send + Sync {
    fn encode(&self, format: FormatCode, out: &mut Vec<u8>);
}

impl<T: ToWire + Send + Sync> ErasedValue for T {
    fn encode(&self, format: FormatCode, out: &mut Vec<u8>) {
        ToWire::encode(self, format, out);
    }
}

/// A single bound query parameter: a wire format plus an optional value.
///
/// The format comes from the value type's [`ToWire::FORMAT`] and stays with
/// the parameter even when the value is NULL, so a typed NULL still
/// advertises its type's format on the wire.
pub struct Parameter {
    format: FormatCode,
    value: Option<Box<dyn ErasedValue>>,
}

impl Parameter {
    /// Wrap a value, taking the format the type prefers.
    pub fn new<T: ToWire + Send + Sync + 'static>(value: T) -> Self {
        Self {
            format: T::FORMAT,
            value: Some(Box::new(value)),
        }
    }

    /// A NULL parameter carrying an explicit format.
    pub fn null(format: FormatCode) -> Self {
        Self {
            format,
            value: None,
        }
    }

    /// The wire format this parameter is sent in.
    pub fn format(&self) -> FormatCode {
        self.format
    }

    /// Whether this parameter is SQL NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("format", &self.format)
            .field("null", &self.is_null())
            .finish()
    }
}

/// Conversion of a single Rust value into a [`Parameter`].
pub trait ToParam {
    fn to_param(self) -> Parameter;
}

macro_rules! impl_to_param {
    ($($t:ty),+ $(,)?) => {$(
        impl ToParam for $t {
            fn to_param(self) -> Parameter {
                Parameter::new(self)
            }
        }
    )+};
}

impl_to_param!(
    bool,
    i16,
    i32,
    i64,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    crate::wire::Symbol,
    Vec<u8>,
);

// Borrowed values are converted to owned at bind time; the frame outlives
// the call site.

impl ToParam for &str {
    fn to_param(self) -> Parameter {
        Parameter::new(self.to_owned())
    }
}

impl ToParam for &[u8] {
    fn to_param(self) -> Parameter {
        Parameter::new(self.to_vec())
    }
}

impl<T: ToWire + Send + Sync + 'static> ToParam for Option<T> {
    fn to_param(self) -> Parameter {
        match self {
            Some(value) => Parameter::new(value),
            None => Parameter::null(T::FORMAT),
        }
    }
}

impl ToParam for Parameter {
    fn to_param(self) -> Parameter {
        self
    }
}

/// Conversion of a parameter pack (unit, tuple, or vec) into parameters.
pub trait IntoParams {
    fn into_params(self) -> Vec<Parameter>;
}

impl IntoParams for () {
    fn into_params(self) -> Vec<Parameter> {
        Vec::new()
    }
}

impl IntoParams for Vec<Parameter> {
    fn into_params(self) -> Vec<Parameter> {
        self
    }
}

// Tuple implementations via macro
macro_rules! impl_into_params {
    ($($idx:tt: $T:ident),+) => {
        impl<$($T: ToParam),+> IntoParams for ($($T,)+) {
            fn into_params(self) -> Vec<Parameter> {
                vec![$(self.$idx.to_param()),+]
            }
        }
    };
}

impl_into_params!(0: T0);
impl_into_params!(0: T0, 1: T1);
impl_into_params!(0: T0, 1: T1, 2: T2);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_into_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

/// The encoded parameter section of a Bind message: format codes, parameter
/// count, and length-prefixed values, ready to splice between the statement
/// name and the result-format section.
///
/// Layout:
/// - When every parameter prefers TEXT (including the zero-parameter case),
///   the format section is a single int16 holding the TEXT code. On the wire
///   this reads as a format-code count of zero, the protocol's all-text
///   default.
/// - Otherwise: int16 count followed by one int16 format code per parameter.
///   Formats are never promoted to make the short form apply.
/// - Then int16 parameter count, then per parameter an int32 byte length and
///   the value bytes. NULL is length −1 with no value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFrame {
    bytes: Vec<u8>,
    count: u16,
}

impl Default for BindFrame {
    /// The zero-parameter frame.
    fn default() -> Self {
        Self::encode(&[])
    }
}

impl BindFrame {
    /// Encode a parameter pack into a frame.
    pub fn encode(params: &[Parameter]) -> Self {
        let count = params.len() as u16;
        let mut bytes = Vec::new();

        let uniform_text = params
            .iter()
            .all(|p| p.format() == FormatCode::Text);
        if uniform_text {
            write_i16(&mut bytes, FormatCode::Text as i16);
        } else {
            write_i16(&mut bytes, count as i16);
            for param in params {
                write_i16(&mut bytes, param.format() as i16);
            }
        }

        write_i16(&mut bytes, count as i16);
        for param in params {
            match &param.value {
                None => write_i32(&mut bytes, -1),
                Some(value) => {
                    let at = reserve_i32(&mut bytes);
                    value.encode(param.format(), &mut bytes);
                    let len = (bytes.len() - at - 4) as i32;
                    backpatch_i32(&mut bytes, at, len);
                    debug_assert_eq!(&bytes[at..at + 4], &len.to_be_bytes());
                }
            }
        }

        Self { bytes, count }
    }

    /// The encoded section, ready to splice into a Bind message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of parameters encoded in the frame.
    pub fn param_count(&self) -> u16 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Symbol;

    fn frame(params: impl IntoParams) -> BindFrame {
        BindFrame::encode(&params.into_params())
    }

    #[test]
    fn zero_arity_is_two_zero_shorts() {
        // Single int16 TEXT code + int16 param count 0.
        assert_eq!(frame(()).as_bytes(), [0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn binary_params_exact_bytes() {
        let f = frame((5_i16, 3.14_f64));
        assert_eq!(f.param_count(), 2);
        #[rustfmt::skip]
        assert_eq!(f.as_bytes(), [
            0x00, 0x02,             // format code count
            0x00, 0x01, 0x00, 0x01, // both binary
            0x00, 0x02,             // param count
            0x00, 0x00, 0x00, 0x02, // len 2
            0x00, 0x05,
            0x00, 0x00, 0x00, 0x08, // len 8
            0x40, 0x09, 0x1E, 0xB8, 0x51, 0xEB, 0x85, 0x1F,
        ]);
    }

    #[test]
    fn uniform_text_collapses_to_single_short() {
        let f = frame(("ab", String::from("c")));
        #[rustfmt::skip]
        assert_eq!(f.as_bytes(), [
            0x00, 0x00,             // single TEXT code
            0x00, 0x02,             // param count
            0x00, 0x00, 0x00, 0x02, b'a', b'b',
            0x00, 0x00, 0x00, 0x01, b'c',
        ]);
    }

    #[test]
    fn mixed_formats_list_every_code() {
        let f = frame((7_i32, "x"));
        #[rustfmt::skip]
        assert_eq!(f.as_bytes(), [
            0x00, 0x02,             // format code count
            0x00, 0x01,             // binary
            0x00, 0x00,             // text, not promoted
            0x00, 0x02,             // param count
            0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x07,
            0x00, 0x00, 0x00, 0x01, b'x',
        ]);
    }

    #[test]
    fn null_is_minus_one_length() {
        let f = frame((Option::<i32>::None,));
        #[rustfmt::skip]
        assert_eq!(f.as_bytes(), [
            0x00, 0x01,             // format code count
            0x00, 0x01,             // binary, kept for the typed NULL
            0x00, 0x01,             // param count
            0xFF, 0xFF, 0xFF, 0xFF, // length -1, no value bytes
        ]);
    }

    #[test]
    fn symbol_is_quoted_text_param() {
        let f = frame((Symbol::new("active"),));
        #[rustfmt::skip]
        assert_eq!(f.as_bytes(), [
            0x00, 0x00,             // uniform text
            0x00, 0x01,
            0x00, 0x00, 0x00, 0x08,
            b'\'', b'a', b'c', b't', b'i', b'v', b'e', b'\'',
        ]);
    }
}

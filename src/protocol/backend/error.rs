//! Error and notice response messages.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::read_cstr;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
}

/// Parse error/notice fields from payload.
///
/// Fields we do not surface (internal query, source file and line, ..) are
/// skipped; the non-localized severity wins over the localized one when both
/// are present.
fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut localized_severity = None;
    let mut data = payload;

    while !data.is_empty() && data[0] != 0 {
        let field_type = data[0];
        data = &data[1..];

        let (value, rest) = read_cstr(data)?;
        data = rest;

        match field_type {
            field_type::SEVERITY => localized_severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity = Some(value.to_string()),
            field_type::CODE => fields.code = Some(value.to_string()),
            field_type::MESSAGE => fields.message = Some(value.to_string()),
            field_type::DETAIL => fields.detail = Some(value.to_string()),
            field_type::HINT => fields.hint = Some(value.to_string()),
            field_type::POSITION => fields.position = value.parse().ok(),
            _ => {}
        }
    }

    if fields.severity.is_none() {
        fields.severity = localized_severity;
    }

    Ok(fields)
}

/// ErrorResponse message - error from server.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_fields_and_skips_others() {
        let payload = b"SERROR\0VERROR\0C42P01\0Mrelation \"t\" does not exist\0P15\0Fparse_relation.c\0\0";
        let err = ErrorResponse::parse(payload).unwrap();
        assert_eq!(err.fields.severity.as_deref(), Some("ERROR"));
        assert_eq!(err.fields.code.as_deref(), Some("42P01"));
        assert_eq!(err.fields.position, Some(15));
        assert_eq!(
            err.fields.message.as_deref(),
            Some("relation \"t\" does not exist")
        );
    }

    #[test]
    fn localized_severity_is_fallback() {
        let payload = b"SFEHLER\0C0A000\0Mnope\0\0";
        let err = ErrorResponse::parse(payload).unwrap();
        assert_eq!(err.fields.severity.as_deref(), Some("FEHLER"));
    }
}

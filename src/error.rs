//! Error types for postgres-async.

use thiserror::Error;

/// Result type for postgres-async operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice fields, as parsed from an ErrorResponse.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for postgres-async.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (unsupported schema, malformed URL). Fatal at
    /// construction, never deferred to a callback.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required value could not be parsed from its wire representation
    #[error("Parse error: {0}")]
    Parse(String),

    /// The connection was terminated; the pending operation will never
    /// complete
    #[error("Connection terminated")]
    Terminated,

    /// Invalid usage (e.g. a stale transaction lease)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature (e.g. an authentication method we do not speak)
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and
    /// cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Terminated => true,
            Error::Server(fields) => {
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }
}

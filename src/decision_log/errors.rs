//! Decision log error types
//!
//! Error codes:
//! - TPC_LOG_APPEND_FAILED (ERROR severity)
//! - TPC_LOG_FSYNC_FAILED (FATAL severity)
//! - TPC_LOG_READ_FAILED (ERROR severity)
//! - TPC_LOG_CORRUPTION (FATAL severity)
//!
//! None of these are retried internally. A lost decision record would let
//! recovery resume from the wrong phase, so every failure is surfaced.

use std::fmt;
use std::io;

/// Severity levels for decision log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, node continues
    Error,
    /// The log can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Decision log error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Entry could not be written
    TpcLogAppendFailed,
    /// Entry was written but could not be made durable
    TpcLogFsyncFailed,
    /// Entries could not be read back
    TpcLogReadFailed,
    /// Checksum mismatch or malformed entry
    TpcLogCorruption,
}

impl LogErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::TpcLogAppendFailed => "TPC_LOG_APPEND_FAILED",
            LogErrorCode::TpcLogFsyncFailed => "TPC_LOG_FSYNC_FAILED",
            LogErrorCode::TpcLogReadFailed => "TPC_LOG_READ_FAILED",
            LogErrorCode::TpcLogCorruption => "TPC_LOG_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::TpcLogAppendFailed => Severity::Error,
            LogErrorCode::TpcLogFsyncFailed => Severity::Fatal,
            LogErrorCode::TpcLogReadFailed => Severity::Error,
            LogErrorCode::TpcLogCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Decision log error with context
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    /// Create an append failed error
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::TpcLogAppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create an fsync failed error
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::TpcLogFsyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a read failed error
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::TpcLogReadFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create an encoding error (the entry never reached storage)
    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::TpcLogAppendFailed,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::TpcLogCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a corruption error pointing at a line of a session file
    pub fn corruption_at_line(session: &str, line: usize, reason: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::TpcLogCorruption,
            message: reason.into(),
            details: Some(format!("session: {}, line: {}", session, line)),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for decision log operations
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LogErrorCode::TpcLogAppendFailed.code(), "TPC_LOG_APPEND_FAILED");
        assert_eq!(LogErrorCode::TpcLogFsyncFailed.code(), "TPC_LOG_FSYNC_FAILED");
        assert_eq!(LogErrorCode::TpcLogReadFailed.code(), "TPC_LOG_READ_FAILED");
        assert_eq!(LogErrorCode::TpcLogCorruption.code(), "TPC_LOG_CORRUPTION");
    }

    #[test]
    fn test_fsync_and_corruption_are_fatal() {
        let err = LogError::fsync_failed(
            "fsync failed",
            io::Error::new(io::ErrorKind::Other, "disk error"),
        );
        assert!(err.is_fatal());
        assert!(LogError::corruption("bad checksum").is_fatal());
    }

    #[test]
    fn test_append_failed_is_not_fatal() {
        let err = LogError::append_failed(
            "write failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display_contains_details() {
        let err = LogError::corruption_at_line("s1", 7, "checksum mismatch");
        let display = err.to_string();
        assert!(display.contains("TPC_LOG_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("line: 7"));
    }
}

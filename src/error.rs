//! Error handling for the position engine
//!
//! Every core operation surfaces one of the kinds below. Validation and
//! authorisation failures travel unwrapped; provider and storage failures are
//! wrapped with a single contextual message through [`Context`].

use rust_decimal::Decimal;
use thiserror::Error;

/// Core error type for portfolio operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: caller does not own portfolio {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient shares of {symbol}: requested {requested}, available {available}")]
    InsufficientShares {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("specific lot selection rejected: {0}")]
    SpecificLotUnknown(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("insufficient cash flows: {0}")]
    InsufficientCashFlows(String),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse error classification used at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Validation,
    InsufficientShares,
    InsufficientData,
    ExternalUnavailable,
    Conflict,
    Internal,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Validation(_) | Error::SpecificLotUnknown(_) => ErrorKind::Validation,
            Error::InsufficientShares { .. } => ErrorKind::InsufficientShares,
            Error::InsufficientData(_) | Error::InsufficientCashFlows(_) => {
                ErrorKind::InsufficientData
            }
            Error::ExternalUnavailable(_) => ErrorKind::ExternalUnavailable,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }

    /// Error raised when undoing a failed write fails as well.
    pub fn compensation_failed(original: &Error, compensation: &Error) -> Self {
        Error::Internal(format!(
            "write failed ({}) and undoing it also failed ({})",
            original, compensation
        ))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row".to_string()),
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Error::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Error::Internal(format!("database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {}", err))
    }
}

/// Result type alias for portfolio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adds one contextual message to provider and internal failures.
pub trait Context<T> {
    fn context(self, msg: &str) -> Result<T>;
}

impl<T> Context<T> for Result<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e {
            Error::Internal(inner) => Error::Internal(format!("{}: {}", msg, inner)),
            Error::ExternalUnavailable(inner) => {
                Error::ExternalUnavailable(format!("{}: {}", msg, inner))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = Error::Internal("connection failed".to_string());
        assert_eq!(err.to_string(), "internal error: connection failed");

        let err = Error::InsufficientShares {
            symbol: "AAPL".to_string(),
            requested: dec!(10),
            available: dec!(4),
        };
        assert_eq!(
            err.to_string(),
            "insufficient shares of AAPL: requested 10, available 4"
        );
    }

    #[test]
    fn test_context_wraps_internal_only_once() {
        let result: Result<()> = Err(Error::Internal("disk full".to_string()));
        let err = result.context("failed to store snapshot").unwrap_err();
        assert_eq!(
            err.to_string(),
            "internal error: failed to store snapshot: disk full"
        );
    }

    #[test]
    fn test_context_leaves_validation_untouched() {
        let result: Result<()> = Err(Error::validation("empty name"));
        let err = result.context("failed to create portfolio").unwrap_err();
        assert_eq!(err, Error::Validation("empty name".to_string()));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::SpecificLotUnknown("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::InsufficientCashFlows("x".into()).kind(),
            ErrorKind::InsufficientData
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_compensation_failure_names_both_causes() {
        let original = Error::Internal("lot write failed".to_string());
        let compensation = Error::Internal("delete failed".to_string());
        let msg = Error::compensation_failed(&original, &compensation).to_string();
        assert!(msg.contains("lot write failed"));
        assert!(msg.contains("delete failed"));
    }
}

//! Error handling for the portfolio service
//!
//! One variant per error kind in the service taxonomy. The HTTP layer is
//! the only place kinds are mapped to status codes; everything below it
//! works with these values directly.

use thiserror::Error;

/// Core error kinds for portfolio operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input shape or value. Caller's fault, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced portfolio or holding does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency failure at the store boundary.
    /// Caller should re-fetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or invalid credentials/token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Fixed-window rate limit exceeded.
    #[error("too many requests, please try again later")]
    RateLimited,

    #[error("database error: {0}")]
    Db(String),

    /// Market-data provider failure (total, not per-symbol).
    #[error("market data error: {0}")]
    Market(String),

    /// Unexpected internal failure (hashing, token encoding).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Db(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Market(err.to_string())
    }
}

/// Result type alias for portfolio operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = Error::Validation("missing field: symbol".to_string());
        assert_eq!(err.to_string(), "validation error: missing field: symbol");

        let err = Error::NotFound("holding abc".to_string());
        assert_eq!(err.to_string(), "not found: holding abc");
    }

    #[test]
    fn test_sqlite_errors_become_db_kind() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Db(_)));
    }
}

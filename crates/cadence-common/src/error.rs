//! Error types for Cadence

use thiserror::Error;

/// Main error type for Cadence
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Daily sending limit exceeded")]
    QuotaExceeded,

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Cadence
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code an API layer would map this error to
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Validation(_) => 422,
            Error::Auth(_) => 401,
            Error::NotFound(_) => 404,
            Error::Precondition(_) => 409,
            Error::QuotaExceeded => 429,
            Error::Smtp(_) => 502,
            Error::Crypto(_) => 500,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION",
            Error::Auth(_) => "AUTH",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Precondition(_) => "PRECONDITION",
            Error::QuotaExceeded => "QUOTA_EXCEEDED",
            Error::Smtp(_) => "TRANSPORT",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("bad".into()).status_code(), 422);
        assert_eq!(Error::Auth("no".into()).status_code(), 401);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Precondition("state".into()).status_code(), 409);
        assert_eq!(Error::QuotaExceeded.status_code(), 429);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Precondition("state".into()).code(), "PRECONDITION");
        assert_eq!(Error::QuotaExceeded.code(), "QUOTA_EXCEEDED");
        assert_eq!(Error::Smtp("550".into()).code(), "TRANSPORT");
    }
}

use thiserror::Error;

/// Error taxonomy for the authentication core.
///
/// Expected outcomes (wrong password, expired token, locked account) are
/// returned as typed outcome enums by the services, never as errors.
/// `AuthError` is reserved for malformed input, absent records where the
/// contract names an error, conflicting state transitions and store
/// failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AuthError::NotFound("record"),
            other => AuthError::Store(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

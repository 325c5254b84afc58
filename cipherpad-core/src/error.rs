//! Capability-tagged error taxonomy.
//!
//! Callers test capabilities (`is_validation`, `is_not_found`, ...) instead
//! of matching concrete variants, so stores and interactors stay loosely
//! coupled from the HTTP boundary that maps these to status codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or rejected input.
    #[error("{0}")]
    Validation(String),

    /// A lookup matched no row.
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint would be broken.
    #[error("{0}")]
    Conflict(String),

    /// Credential or token rejection.
    #[error("{0}")]
    Auth(String),

    /// Anything not attributable to input. The message is logged server-side
    /// and obfuscated at the HTTP boundary.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("no matching row".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

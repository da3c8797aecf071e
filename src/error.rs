//! Domain error taxonomy shared by the write path and the session engine.
//!
//! Each variant is a distinct outcome class so callers (the HTTP layer in
//! particular) can map them to different responses.

use thiserror::Error;

use crate::{kv::KvError, search::SearchError, storage::StoreError};

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input the caller can fix.
    #[error("{0}")]
    Validation(String),

    /// A referenced entity (author, publication, user) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// Missing, malformed, revoked or expired credentials. Intentionally carries
    /// no detail.
    #[error("unauthorized")]
    Unauthorized,

    /// Password reset token is unknown, expired, of the wrong kind or already used.
    #[error("invalid or expired token")]
    InvalidOrExpired,

    #[error("storage error: {0}")]
    Storage(StoreError),

    /// The key-value store backing revocation could not be reached.
    #[error("revocation store error: {0}")]
    RevocationStore(#[from] KvError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => Self::Conflict(conflict_message(&constraint)),
            other => Self::Storage(other),
        }
    }
}

/// Human readable message for a violated unique constraint.
fn conflict_message(constraint: &str) -> String {
    if constraint.contains("doi") {
        "Publication with this DOI already exists".to_string()
    } else if constraint.contains("email") {
        "User with this email already exists".to_string()
    } else if constraint.contains("username") {
        "User with this username already exists".to_string()
    } else if constraint.contains("keyword") {
        "Keyword already exists".to_string()
    } else {
        "Resource already exists".to_string()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = Error::from(StoreError::Conflict("publications_doi_key".to_string()));
        assert!(matches!(err, Error::Conflict(ref msg) if msg.contains("DOI")));

        let err = Error::from(StoreError::Conflict("users_email_key".to_string()));
        assert!(matches!(err, Error::Conflict(ref msg) if msg.contains("email")));
    }

    #[test]
    fn backend_failure_stays_storage() {
        let err = Error::from(StoreError::Unavailable("pool closed".to_string()));
        assert!(matches!(err, Error::Storage(_)));
    }
}

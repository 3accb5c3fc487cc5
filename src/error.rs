//! Error taxonomy shared across the core.
//!
//! `ServiceError` is the single error type `VoteService` methods return.
//! Ballot store implementations return the narrower `StoreError` (see
//! `store::StoreError`), a tagged sum mapped into this taxonomy at the
//! facade boundary rather than exposed as marker predicates.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("poll already exists with incompatible configuration")]
    Exists,

    #[error("poll does not exist")]
    NotExists,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("voter has already voted")]
    DoubleVote,

    #[error("voter is not allowed to vote: {0}")]
    NotAllowed(String),

    #[error("poll is stopped")]
    Stopped,
}

impl ServiceError {
    /// The wire `error` discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Internal(_) => "internal",
            ServiceError::Exists => "exist",
            ServiceError::NotExists => "not-exist",
            ServiceError::Invalid(_) => "invalid",
            ServiceError::DoubleVote => "double-vote",
            ServiceError::NotAllowed(_) => "not-allowed",
            ServiceError::Stopped => "stopped",
        }
    }
}

/// Wire error body: `{"error": "<kind>", "message": "<human text>"}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        ErrorBody {
            error: err.kind(),
            message: err.to_string(),
        }
    }
}

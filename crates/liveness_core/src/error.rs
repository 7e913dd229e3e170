//! crates/liveness_core/src/error.rs
//!
//! The error taxonomy returned by every verification operation. Each variant is
//! a distinguishable kind the caller can act on; mapping to user-facing prompts
//! is left to the presentation layer.

use uuid::Uuid;

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerificationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {0} is not active")]
    SessionNotActive(Uuid),

    #[error("Session {0} has expired")]
    SessionExpired(Uuid),

    #[error("Challenge index {submitted} does not match the active index {expected}")]
    ChallengeIndexMismatch { expected: usize, submitted: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Frame analysis is unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("Face comparison is unavailable: {0}")]
    ComparisonUnavailable(String),

    #[error("Verification incomplete: {0}")]
    VerificationIncomplete(String),

    #[error("Already submitted: {0}")]
    AlreadySubmitted(String),

    #[error("Payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// An unexpected store failure. Not part of the caller-facing taxonomy.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl VerificationError {
    /// Stable snake_case identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::InvalidConfiguration(_) => "invalid_configuration",
            VerificationError::NotFound(_) => "not_found",
            VerificationError::SessionNotActive(_) => "session_not_active",
            VerificationError::SessionExpired(_) => "session_expired",
            VerificationError::ChallengeIndexMismatch { .. } => "challenge_index_mismatch",
            VerificationError::InvalidImage(_) => "invalid_image",
            VerificationError::AnalysisUnavailable(_) => "analysis_unavailable",
            VerificationError::ComparisonUnavailable(_) => "comparison_unavailable",
            VerificationError::VerificationIncomplete(_) => "verification_incomplete",
            VerificationError::AlreadySubmitted(_) => "already_submitted",
            VerificationError::PayloadTooLarge { .. } => "payload_too_large",
            VerificationError::Internal(_) => "internal",
        }
    }

    /// Whether the same request may succeed if simply retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VerificationError::AnalysisUnavailable(_) | VerificationError::ComparisonUnavailable(_)
        )
    }
}

/// Store failures surface as `NotFound` or `Internal`. Collaborator failures are
/// mapped explicitly by the component that calls them.
impl From<PortError> for VerificationError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => VerificationError::NotFound(what),
            PortError::InvalidImage(reason) => VerificationError::InvalidImage(reason),
            other => VerificationError::Internal(other.to_string()),
        }
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

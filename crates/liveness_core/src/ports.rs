//! crates/liveness_core/src/ports.rs
//!
//! Defines the service contracts (traits) the verification core depends on.
//! These traits form the boundary of the hexagonal architecture: the stores and
//! the external frame analysis and face comparison services are all adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{FrameAnalysis, ReviewDecision, ChallengeType, VerificationSession, VerificationSubmission};
use crate::image::ImageFrame;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A concurrent writer got there first, or a uniqueness rule was violated.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("Image rejected by collaborator: {0}")]
    InvalidImage(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &VerificationSession) -> PortResult<()>;

    async fn get(&self, session_id: Uuid) -> PortResult<VerificationSession>;

    /// Writes `session` only if the stored version still equals `expected_version`,
    /// returning the new version. Fails with `PortError::Conflict` otherwise.
    async fn update(&self, session: &VerificationSession, expected_version: u64) -> PortResult<u64>;

    /// Marks every active session whose expiry has passed as expired.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> PortResult<u64>;

    /// Deletes terminal sessions that expired before `cutoff`.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> PortResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Inserts a new submission atomically with respect to other writes for the
    /// same subject. Fails with `PortError::Conflict` if the subject's current
    /// submission is pending or verified, or if the liveness session was already used.
    async fn insert_if_clear(&self, submission: &VerificationSubmission) -> PortResult<()>;

    async fn get(&self, submission_id: Uuid) -> PortResult<VerificationSubmission>;

    /// The most recent submission for the subject, if any.
    async fn current_for_subject(&self, subject_id: &str) -> PortResult<Option<VerificationSubmission>>;

    /// All submissions for the subject, newest first.
    async fn history_for_subject(&self, subject_id: &str) -> PortResult<Vec<VerificationSubmission>>;

    /// Pending submissions, oldest first.
    async fn list_pending(&self, limit: usize) -> PortResult<Vec<VerificationSubmission>>;

    /// Applies a review decision to a pending submission.
    async fn record_review(
        &self,
        submission_id: Uuid,
        decision: &ReviewDecision,
        reviewed_at: DateTime<Utc>,
    ) -> PortResult<VerificationSubmission>;
}

//=========================================================================================
// External Collaborator Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameAnalysisService: Send + Sync {
    /// Reports whether `frame` shows the subject performing `expected`.
    async fn analyze_frame(&self, frame: &ImageFrame, expected: ChallengeType) -> PortResult<FrameAnalysis>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FaceComparisonService: Send + Sync {
    /// Returns a similarity confidence between 0 and 100.
    async fn compare_faces(&self, image_a: &ImageFrame, image_b: &ImageFrame) -> PortResult<f64>;
}

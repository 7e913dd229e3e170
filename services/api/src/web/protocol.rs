//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response bodies exchanged with clients.
//! Images travel as base64 strings (bare or as `data:` URLs).

use chrono::{DateTime, Utc};
use liveness_core::domain::{
    Challenge, ChallengeOutcome, FaceMatchResult, StatusReport, VerificationSession,
    VerificationSubmission,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Requests
//=========================================================================================

#[derive(Deserialize, Default, ToSchema)]
pub struct StartSessionRequest {
    /// Number of challenges to perform. Defaults to the server's configured count.
    #[serde(default)]
    pub num_challenges: Option<usize>,
}

#[derive(Deserialize, ToSchema)]
pub struct EvaluateChallengeRequest {
    /// The captured camera frame, base64 encoded.
    pub image: String,
}

#[derive(Deserialize, ToSchema)]
pub struct FaceMatchRequest {
    pub id_document_image: String,
    pub selfie_image: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitVerificationRequest {
    pub liveness_session_id: Uuid,
    pub id_document_image: String,
    pub selfie_image: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Verified,
    Rejected,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub decision: ReviewOutcome,
    /// Required when rejecting.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable, machine-readable error kind.
    pub code: String,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ChallengeDto {
    pub index: usize,
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub instruction: String,
}

impl From<&Challenge> for ChallengeDto {
    fn from(challenge: &Challenge) -> Self {
        Self {
            index: challenge.index,
            challenge_type: challenge.challenge_type.as_str().to_string(),
            instruction: challenge.instruction.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub subject_id: String,
    pub status: String,
    pub challenges: Vec<ChallengeDto>,
    pub current_index: usize,
    pub completed_indices: Vec<usize>,
    pub current_challenge: Option<ChallengeDto>,
    pub has_reference_frame: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&VerificationSession> for SessionResponse {
    fn from(session: &VerificationSession) -> Self {
        Self {
            session_id: session.id,
            subject_id: session.subject_id.clone(),
            status: session.status.as_str().to_string(),
            challenges: session.challenges.iter().map(ChallengeDto::from).collect(),
            current_index: session.current_index,
            completed_indices: session.completed_indices.iter().copied().collect(),
            current_challenge: session.current_challenge().map(ChallengeDto::from),
            has_reference_frame: session.reference_frame.is_some(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ChallengeResponse {
    pub passed: bool,
    pub hint: Option<String>,
    pub session_complete: bool,
    pub next_challenge: Option<ChallengeDto>,
    pub current_index: usize,
}

impl From<ChallengeOutcome> for ChallengeResponse {
    fn from(outcome: ChallengeOutcome) -> Self {
        Self {
            passed: outcome.passed,
            hint: outcome.hint,
            session_complete: outcome.session_complete,
            next_challenge: outcome.next_challenge.as_ref().map(ChallengeDto::from),
            current_index: outcome.current_index,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct FaceMatchResponse {
    pub confidence: f64,
    pub threshold: f64,
    pub matched: bool,
}

impl From<FaceMatchResult> for FaceMatchResponse {
    fn from(result: FaceMatchResult) -> Self {
        Self {
            confidence: result.confidence,
            threshold: result.threshold,
            matched: result.matched,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub submission_id: Uuid,
    pub subject_id: String,
    pub liveness_session_id: Uuid,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl From<&VerificationSubmission> for SubmissionResponse {
    fn from(submission: &VerificationSubmission) -> Self {
        Self {
            submission_id: submission.id,
            subject_id: submission.subject_id.clone(),
            liveness_session_id: submission.liveness_session_id,
            status: submission.status.as_str().to_string(),
            rejection_reason: submission.rejection_reason.clone(),
            created_at: submission.created_at,
            reviewed_at: submission.reviewed_at,
        }
    }
}

/// A pending submission as presented to reviewers, images included.
#[derive(Serialize, ToSchema)]
pub struct PendingSubmissionResponse {
    #[serde(flatten)]
    pub submission: SubmissionResponse,
    pub id_document_image: String,
    pub selfie_image: String,
}

impl From<&VerificationSubmission> for PendingSubmissionResponse {
    fn from(submission: &VerificationSubmission) -> Self {
        Self {
            submission: SubmissionResponse::from(submission),
            id_document_image: submission.id_document_image.to_data_url(),
            selfie_image: submission.selfie_image.to_data_url(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub rejection_reason: Option<String>,
    pub submission_id: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            status: report.status.as_str().to_string(),
            rejection_reason: report.rejection_reason,
            submission_id: report.submission_id,
            submitted_at: report.submitted_at,
        }
    }
}

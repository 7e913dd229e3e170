//! crates/liveness_core/src/domain.rs
//!
//! Defines the pure, core data structures of the verification workflow.
//! These structs are independent of any database or wire format.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::image::ImageFrame;

//=========================================================================================
// Challenges
//=========================================================================================

/// A physical action the subject must perform on camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    TurnLeft,
    TurnRight,
    LookUp,
    LookDown,
    Blink,
    Smile,
    Nod,
    OpenMouth,
}

impl ChallengeType {
    /// Every challenge type a session may sample from.
    pub const ALL: [ChallengeType; 8] = [
        ChallengeType::TurnLeft,
        ChallengeType::TurnRight,
        ChallengeType::LookUp,
        ChallengeType::LookDown,
        ChallengeType::Blink,
        ChallengeType::Smile,
        ChallengeType::Nod,
        ChallengeType::OpenMouth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::TurnLeft => "turn_left",
            ChallengeType::TurnRight => "turn_right",
            ChallengeType::LookUp => "look_up",
            ChallengeType::LookDown => "look_down",
            ChallengeType::Blink => "blink",
            ChallengeType::Smile => "smile",
            ChallengeType::Nod => "nod",
            ChallengeType::OpenMouth => "open_mouth",
        }
    }

    /// The prompt shown to the subject. Carried through, never evaluated.
    pub fn instruction(&self) -> &'static str {
        match self {
            ChallengeType::TurnLeft => "Slowly turn your head to the left",
            ChallengeType::TurnRight => "Slowly turn your head to the right",
            ChallengeType::LookUp => "Tilt your head up",
            ChallengeType::LookDown => "Tilt your head down",
            ChallengeType::Blink => "Blink your eyes",
            ChallengeType::Smile => "Give us a big smile",
            ChallengeType::Nod => "Nod your head",
            ChallengeType::OpenMouth => "Open your mouth",
        }
    }
}

/// One step of a session's challenge sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub index: usize,
    pub challenge_type: ChallengeType,
    pub instruction: String,
}

impl Challenge {
    pub fn new(index: usize, challenge_type: ChallengeType) -> Self {
        Self {
            index,
            challenge_type,
            instruction: challenge_type.instruction().to_string(),
        }
    }
}

//=========================================================================================
// Liveness Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Complete,
    Expired,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Complete => "complete",
            SessionStatus::Expired => "expired",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "complete" => Some(SessionStatus::Complete),
            "expired" => Some(SessionStatus::Expired),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

/// A server-held liveness session. The server's `current_index` is the only
/// source of truth for which challenge may be attempted next.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    pub id: Uuid,
    pub subject_id: String,
    pub challenges: Vec<Challenge>,
    pub current_index: usize,
    pub completed_indices: BTreeSet<usize>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// First successfully captured frame. Set once, never replaced.
    pub reference_frame: Option<ImageFrame>,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl VerificationSession {
    pub fn current_challenge(&self) -> Option<&Challenge> {
        if self.status != SessionStatus::Active {
            return None;
        }
        self.challenges.get(self.current_index)
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_fully_completed(&self) -> bool {
        self.completed_indices.len() == self.challenges.len()
    }
}

/// Outcome of a single `evaluate_challenge` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeOutcome {
    pub passed: bool,
    pub hint: Option<String>,
    pub session_complete: bool,
    pub next_challenge: Option<Challenge>,
    /// The session's index after this evaluation was applied.
    pub current_index: usize,
}

//=========================================================================================
// External Collaborator Results
//=========================================================================================

/// What the frame analysis collaborator reports for one captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub passed: bool,
    pub hint: Option<String>,
}

/// Ephemeral result of a face comparison. Never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatchResult {
    pub confidence: f64,
    pub threshold: f64,
    pub matched: bool,
}

//=========================================================================================
// Verification Submissions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Verified,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Verified => "verified",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubmissionStatus::Pending),
            "verified" => Some(SubmissionStatus::Verified),
            "rejected" => Some(SubmissionStatus::Rejected),
            _ => None,
        }
    }
}

/// A completed liveness + face match bundle queued for review.
#[derive(Debug, Clone)]
pub struct VerificationSubmission {
    pub id: Uuid,
    pub subject_id: String,
    pub id_document_image: ImageFrame,
    pub selfie_image: ImageFrame,
    /// Reference only; the session may be purged after submission.
    pub liveness_session_id: Uuid,
    pub status: SubmissionStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// The decision written back by the review collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Verified,
    Rejected { reason: String },
}

/// Per-subject verification state, derived from the most recent submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    NotStarted,
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::NotStarted => "not_started",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl From<SubmissionStatus> for VerificationStatus {
    fn from(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::Pending => VerificationStatus::Pending,
            SubmissionStatus::Verified => VerificationStatus::Verified,
            SubmissionStatus::Rejected => VerificationStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: VerificationStatus,
    pub rejection_reason: Option<String>,
    pub submission_id: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn not_started() -> Self {
        Self {
            status: VerificationStatus::NotStarted,
            rejection_reason: None,
            submission_id: None,
            submitted_at: None,
        }
    }
}

impl From<&VerificationSubmission> for StatusReport {
    fn from(submission: &VerificationSubmission) -> Self {
        Self {
            status: submission.status.into(),
            rejection_reason: submission.rejection_reason.clone(),
            submission_id: Some(submission.id),
            submitted_at: Some(submission.created_at),
        }
    }
}

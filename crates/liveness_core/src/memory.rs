//! crates/liveness_core/src/memory.rs
//!
//! In-process implementations of the storage ports. A single async mutex per
//! store serializes every read-modify-write, which gives the per-session and
//! per-subject ordering the components rely on. Used for development mode and
//! tests; production deployments use the PostgreSQL adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ReviewDecision, SessionStatus, SubmissionStatus, VerificationSession, VerificationSubmission,
};
use crate::ports::{PortError, PortResult, SessionRepository, SubmissionRepository};

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<Uuid, VerificationSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &VerificationSession) -> PortResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            return Err(PortError::Conflict(format!("Session {} already exists", session.id)));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> PortResult<VerificationSession> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn update(&self, session: &VerificationSession, expected_version: u64) -> PortResult<u64> {
        let mut sessions = self.sessions.lock().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session.id)))?;

        if stored.version != expected_version {
            return Err(PortError::Conflict(format!(
                "Session {} is at version {}, expected {}",
                session.id, stored.version, expected_version
            )));
        }

        let new_version = expected_version + 1;
        *stored = VerificationSession {
            version: new_version,
            ..session.clone()
        };
        Ok(new_version)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut expired = 0;
        for session in sessions.values_mut() {
            if session.status == SessionStatus::Active && session.is_past_expiry(now) {
                session.status = SessionStatus::Expired;
                session.version += 1;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.status == SessionStatus::Active || s.expires_at >= cutoff);
        Ok((before - sessions.len()) as u64)
    }
}

//=========================================================================================
// Submissions
//=========================================================================================

#[derive(Default)]
pub struct InMemorySubmissionRepository {
    // Insertion order doubles as submission order.
    submissions: Mutex<Vec<VerificationSubmission>>,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

#[async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn insert_if_clear(&self, submission: &VerificationSubmission) -> PortResult<()> {
        let mut submissions = self.submissions.lock().await;

        if submissions
            .iter()
            .any(|s| s.liveness_session_id == submission.liveness_session_id)
        {
            return Err(PortError::Conflict(format!(
                "Liveness session {} was already submitted",
                submission.liveness_session_id
            )));
        }

        let current = submissions
            .iter()
            .rev()
            .find(|s| s.subject_id == submission.subject_id);
        if let Some(current) = current {
            if current.status != SubmissionStatus::Rejected {
                return Err(PortError::Conflict(format!(
                    "Subject already has a {} submission",
                    current.status.as_str()
                )));
            }
        }

        submissions.push(submission.clone());
        Ok(())
    }

    async fn get(&self, submission_id: Uuid) -> PortResult<VerificationSubmission> {
        self.submissions
            .lock()
            .await
            .iter()
            .find(|s| s.id == submission_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn current_for_subject(&self, subject_id: &str) -> PortResult<Option<VerificationSubmission>> {
        Ok(self
            .submissions
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.subject_id == subject_id)
            .cloned())
    }

    async fn history_for_subject(&self, subject_id: &str) -> PortResult<Vec<VerificationSubmission>> {
        Ok(self
            .submissions
            .lock()
            .await
            .iter()
            .rev()
            .filter(|s| s.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self, limit: usize) -> PortResult<Vec<VerificationSubmission>> {
        Ok(self
            .submissions
            .lock()
            .await
            .iter()
            .filter(|s| s.status == SubmissionStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_review(
        &self,
        submission_id: Uuid,
        decision: &ReviewDecision,
        reviewed_at: DateTime<Utc>,
    ) -> PortResult<VerificationSubmission> {
        let mut submissions = self.submissions.lock().await;
        let submission = submissions
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))?;

        if submission.status != SubmissionStatus::Pending {
            return Err(PortError::Conflict(format!(
                "Submission {} was already reviewed",
                submission_id
            )));
        }

        match decision {
            ReviewDecision::Verified => {
                submission.status = SubmissionStatus::Verified;
                submission.rejection_reason = None;
            }
            ReviewDecision::Rejected { reason } => {
                submission.status = SubmissionStatus::Rejected;
                submission.rejection_reason = Some(reason.clone());
            }
        }
        submission.reviewed_at = Some(reviewed_at);
        Ok(submission.clone())
    }
}

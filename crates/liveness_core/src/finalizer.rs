//! crates/liveness_core/src/finalizer.rs
//!
//! Turns a completed liveness session plus an ID document into a pending
//! verification submission, and reports a subject's current verification
//! status. The face match is recomputed here rather than taken from the
//! caller, and the selfie must be the session's own reference frame.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{
    SessionStatus, StatusReport, SubmissionStatus, VerificationSubmission,
};
use crate::error::{VerificationError, VerificationResult};
use crate::face_match::FaceMatchCoordinator;
use crate::image::ImageFrame;
use crate::ports::{PortError, SessionRepository, SubmissionRepository};

pub struct VerificationFinalizer {
    sessions: Arc<dyn SessionRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    face_match: Arc<FaceMatchCoordinator>,
    clock: Arc<dyn Clock>,
}

impl VerificationFinalizer {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        face_match: Arc<FaceMatchCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            submissions,
            face_match,
            clock,
        }
    }

    pub async fn submit_verification(
        &self,
        subject_id: &str,
        id_document: ImageFrame,
        selfie: ImageFrame,
        liveness_session_id: Uuid,
    ) -> VerificationResult<VerificationSubmission> {
        // A repeat of a still-pending submission is answered before any other work.
        if let Some(current) = self.submissions.current_for_subject(subject_id).await? {
            if current.liveness_session_id == liveness_session_id
                && current.status == SubmissionStatus::Pending
            {
                return Err(already_submitted(liveness_session_id));
            }
        }

        let session = match self.sessions.get(liveness_session_id).await {
            Ok(session) => session,
            Err(PortError::NotFound(_)) => {
                return Err(VerificationError::VerificationIncomplete(format!(
                    "liveness session {} does not exist",
                    liveness_session_id
                )))
            }
            Err(e) => return Err(e.into()),
        };

        if session.subject_id != subject_id {
            warn!(session_id = %session.id, "Submission referenced another subject's session");
            return Err(VerificationError::VerificationIncomplete(format!(
                "liveness session {} does not exist",
                liveness_session_id
            )));
        }
        if session.status != SessionStatus::Complete {
            return Err(VerificationError::VerificationIncomplete(format!(
                "liveness session is {}, not complete",
                session.status.as_str()
            )));
        }
        if session.reference_frame.as_ref() != Some(&selfie) {
            return Err(VerificationError::VerificationIncomplete(
                "selfie is not the liveness session's reference frame".to_string(),
            ));
        }

        let face_match = self.face_match.compare_face(&id_document, &selfie).await?;
        if !face_match.matched {
            return Err(VerificationError::VerificationIncomplete(format!(
                "face match confidence {:.1} is below the threshold {:.1}",
                face_match.confidence, face_match.threshold
            )));
        }

        let submission = VerificationSubmission {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            id_document_image: id_document,
            selfie_image: selfie,
            liveness_session_id,
            status: SubmissionStatus::Pending,
            rejection_reason: None,
            created_at: self.clock.now(),
            reviewed_at: None,
        };

        match self.submissions.insert_if_clear(&submission).await {
            Ok(()) => {}
            Err(PortError::Conflict(reason)) => {
                warn!(subject_id, "Duplicate verification submission: {}", reason);
                return Err(VerificationError::AlreadySubmitted(reason));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            submission_id = %submission.id,
            subject_id,
            session_id = %liveness_session_id,
            confidence = face_match.confidence,
            "Verification submitted for review"
        );
        Ok(submission)
    }

    /// Status of the subject's most recent submission, or `not_started`.
    pub async fn get_status(&self, subject_id: &str) -> VerificationResult<StatusReport> {
        let current = self.submissions.current_for_subject(subject_id).await?;
        Ok(current
            .as_ref()
            .map(StatusReport::from)
            .unwrap_or_else(StatusReport::not_started))
    }

    /// Every submission the subject has made, newest first.
    pub async fn history(&self, subject_id: &str) -> VerificationResult<Vec<VerificationSubmission>> {
        Ok(self.submissions.history_for_subject(subject_id).await?)
    }
}

fn already_submitted(session_id: Uuid) -> VerificationError {
    VerificationError::AlreadySubmitted(format!(
        "liveness session {} already has a pending submission",
        session_id
    ))
}

//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `SessionRepository` and `SubmissionRepository` ports from the core crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use liveness_core::domain::{
    Challenge, ReviewDecision, SessionStatus, SubmissionStatus, VerificationSession,
    VerificationSubmission,
};
use liveness_core::image::ImageFrame;
use liveness_core::ports::{PortError, PortResult, SessionRepository, SubmissionRepository};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements both storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const SESSION_COLUMNS: &str = "id, subject_id, challenges, current_index, completed_indices, \
     status, created_at, expires_at, reference_frame, version";

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    subject_id: String,
    challenges: Json<Vec<Challenge>>,
    current_index: i32,
    completed_indices: Vec<i32>,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    reference_frame: Option<Vec<u8>>,
    version: i64,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<VerificationSession> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown session status '{}'", self.status))
        })?;
        let reference_frame = self
            .reference_frame
            .map(ImageFrame::from_bytes)
            .transpose()
            .map_err(|e| PortError::Unexpected(format!("Stored reference frame is corrupt: {}", e)))?;

        Ok(VerificationSession {
            id: self.id,
            subject_id: self.subject_id,
            challenges: self.challenges.0,
            current_index: self.current_index as usize,
            completed_indices: self.completed_indices.into_iter().map(|i| i as usize).collect(),
            status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            reference_frame,
            version: self.version as u64,
        })
    }
}

const SUBMISSION_COLUMNS: &str = "id, subject_id, id_document_image, selfie_image, \
     liveness_session_id, status, rejection_reason, created_at, reviewed_at";

#[derive(FromRow)]
struct SubmissionRecord {
    id: Uuid,
    subject_id: String,
    id_document_image: Vec<u8>,
    selfie_image: Vec<u8>,
    liveness_session_id: Uuid,
    status: String,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    fn to_domain(self) -> PortResult<VerificationSubmission> {
        let status = SubmissionStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown submission status '{}'", self.status))
        })?;
        let corrupt = |e: liveness_core::VerificationError| {
            PortError::Unexpected(format!("Stored image is corrupt: {}", e))
        };

        Ok(VerificationSubmission {
            id: self.id,
            subject_id: self.subject_id,
            id_document_image: ImageFrame::from_bytes(self.id_document_image).map_err(corrupt)?,
            selfie_image: ImageFrame::from_bytes(self.selfie_image).map_err(corrupt)?,
            liveness_session_id: self.liveness_session_id,
            status,
            rejection_reason: self.rejection_reason,
            created_at: self.created_at,
            reviewed_at: self.reviewed_at,
        })
    }
}

fn into_domain_list(records: Vec<SubmissionRecord>) -> PortResult<Vec<VerificationSubmission>> {
    records.into_iter().map(SubmissionRecord::to_domain).collect()
}

//=========================================================================================
// `SessionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionRepository for DbAdapter {
    async fn insert(&self, session: &VerificationSession) -> PortResult<()> {
        let completed: Vec<i32> = session.completed_indices.iter().map(|i| *i as i32).collect();
        sqlx::query(
            "INSERT INTO liveness_sessions \
             (id, subject_id, challenges, current_index, completed_indices, status, created_at, expires_at, reference_frame, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(session.id)
        .bind(&session.subject_id)
        .bind(Json(&session.challenges))
        .bind(session.current_index as i32)
        .bind(completed)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.reference_frame.as_ref().map(|f| f.as_bytes().to_vec()))
        .bind(session.version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("Session {} already exists", session.id))
            } else {
                unexpected(e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> PortResult<VerificationSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM liveness_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Session {} not found", session_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn update(&self, session: &VerificationSession, expected_version: u64) -> PortResult<u64> {
        let completed: Vec<i32> = session.completed_indices.iter().map(|i| *i as i32).collect();
        // COALESCE keeps the first stored reference frame.
        let new_version: Option<i64> = sqlx::query_scalar(
            "UPDATE liveness_sessions SET \
                 current_index = $2, \
                 completed_indices = $3, \
                 status = $4, \
                 reference_frame = COALESCE(reference_frame, $5), \
                 version = version + 1 \
             WHERE id = $1 AND version = $6 \
             RETURNING version",
        )
        .bind(session.id)
        .bind(session.current_index as i32)
        .bind(completed)
        .bind(session.status.as_str())
        .bind(session.reference_frame.as_ref().map(|f| f.as_bytes().to_vec()))
        .bind(expected_version as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match new_version {
            Some(version) => Ok(version as u64),
            None => {
                // Distinguish a lost race from a missing row.
                SessionRepository::get(self, session.id).await?;
                Err(PortError::Conflict(format!(
                    "Session {} changed since version {}",
                    session.id, expected_version
                )))
            }
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE liveness_sessions SET status = 'expired', version = version + 1 \
             WHERE status = 'active' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "DELETE FROM liveness_sessions WHERE status <> 'active' AND expires_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}

//=========================================================================================
// `SubmissionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl SubmissionRepository for DbAdapter {
    async fn insert_if_clear(&self, submission: &VerificationSubmission) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Serializes all submission writes for this subject until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&submission.subject_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let session_used: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM verification_submissions WHERE liveness_session_id = $1",
        )
        .bind(submission.liveness_session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        if session_used.is_some() {
            return Err(PortError::Conflict(format!(
                "Liveness session {} was already submitted",
                submission.liveness_session_id
            )));
        }

        let current_status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM verification_submissions \
             WHERE subject_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(&submission.subject_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        if let Some(status) = current_status.filter(|s| s != SubmissionStatus::Rejected.as_str()) {
            return Err(PortError::Conflict(format!(
                "Subject already has a {} submission",
                status
            )));
        }

        sqlx::query(
            "INSERT INTO verification_submissions \
             (id, subject_id, id_document_image, selfie_image, liveness_session_id, status, rejection_reason, created_at, reviewed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(submission.id)
        .bind(&submission.subject_id)
        .bind(submission.id_document_image.as_bytes())
        .bind(submission.selfie_image.as_bytes())
        .bind(submission.liveness_session_id)
        .bind(submission.status.as_str())
        .bind(&submission.rejection_reason)
        .bind(submission.created_at)
        .bind(submission.reviewed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!(
                    "Liveness session {} was already submitted",
                    submission.liveness_session_id
                ))
            } else {
                unexpected(e)
            }
        })?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get(&self, submission_id: Uuid) -> PortResult<VerificationSubmission> {
        let record = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM verification_submissions WHERE id = $1",
            SUBMISSION_COLUMNS
        ))
        .bind(submission_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Submission {} not found", submission_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn current_for_subject(&self, subject_id: &str) -> PortResult<Option<VerificationSubmission>> {
        let record = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM verification_submissions WHERE subject_id = $1 ORDER BY seq DESC LIMIT 1",
            SUBMISSION_COLUMNS
        ))
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(SubmissionRecord::to_domain).transpose()
    }

    async fn history_for_subject(&self, subject_id: &str) -> PortResult<Vec<VerificationSubmission>> {
        let records = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM verification_submissions WHERE subject_id = $1 ORDER BY seq DESC",
            SUBMISSION_COLUMNS
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        into_domain_list(records)
    }

    async fn list_pending(&self, limit: usize) -> PortResult<Vec<VerificationSubmission>> {
        let records = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM verification_submissions WHERE status = 'pending' ORDER BY seq ASC LIMIT $1",
            SUBMISSION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        into_domain_list(records)
    }

    async fn record_review(
        &self,
        submission_id: Uuid,
        decision: &ReviewDecision,
        reviewed_at: DateTime<Utc>,
    ) -> PortResult<VerificationSubmission> {
        let (status, reason) = match decision {
            ReviewDecision::Verified => (SubmissionStatus::Verified, None),
            ReviewDecision::Rejected { reason } => (SubmissionStatus::Rejected, Some(reason.as_str())),
        };

        let record = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "UPDATE verification_submissions \
             SET status = $2, rejection_reason = $3, reviewed_at = $4 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            SUBMISSION_COLUMNS
        ))
        .bind(submission_id)
        .bind(status.as_str())
        .bind(reason)
        .bind(reviewed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => record.to_domain(),
            None => {
                SubmissionRepository::get(self, submission_id).await?;
                Err(PortError::Conflict(format!(
                    "Submission {} was already reviewed",
                    submission_id
                )))
            }
        }
    }
}

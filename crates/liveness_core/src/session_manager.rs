//! crates/liveness_core/src/session_manager.rs
//!
//! Creates liveness sessions, hands them back to callers and retires them
//! (abandonment, expiry, purging).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Challenge, ChallengeType, SessionStatus, VerificationSession};
use crate::error::{VerificationError, VerificationResult};
use crate::policy::VerificationPolicy;
use crate::ports::{PortError, SessionRepository};

/// Upper bound on optimistic write retries for idempotent transitions.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    policy: Arc<VerificationPolicy>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        policy: Arc<VerificationPolicy>,
    ) -> Self {
        Self {
            sessions,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Allocates a new active session with `num_challenges` distinct challenges
    /// in random order.
    pub async fn start_session(
        &self,
        subject_id: &str,
        num_challenges: usize,
    ) -> VerificationResult<VerificationSession> {
        if subject_id.trim().is_empty() {
            return Err(VerificationError::InvalidConfiguration(
                "subject id must not be empty".to_string(),
            ));
        }
        if num_challenges == 0 || num_challenges > ChallengeType::ALL.len() {
            return Err(VerificationError::InvalidConfiguration(format!(
                "num_challenges must be between 1 and {}, got {}",
                ChallengeType::ALL.len(),
                num_challenges
            )));
        }
        let ttl = Duration::from_std(self.policy.session_ttl).map_err(|e| {
            VerificationError::InvalidConfiguration(format!("session ttl out of range: {}", e))
        })?;

        let now = self.clock.now();
        let session = VerificationSession {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            challenges: sample_challenges(&mut rand::thread_rng(), num_challenges),
            current_index: 0,
            completed_indices: BTreeSet::new(),
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now + ttl,
            reference_frame: None,
            version: 0,
        };

        self.sessions.insert(&session).await?;
        info!(
            session_id = %session.id,
            subject_id = %session.subject_id,
            challenges = num_challenges,
            "Liveness session started"
        );
        Ok(session)
    }

    /// Fetches a session. An active session found past its expiry is moved to
    /// `expired` before being returned.
    pub async fn get_session(&self, session_id: Uuid) -> VerificationResult<VerificationSession> {
        let session = self.sessions.get(session_id).await?;
        if session.status == SessionStatus::Active && session.is_past_expiry(self.clock.now()) {
            return expire_session(self.sessions.as_ref(), session).await;
        }
        Ok(session)
    }

    /// Fails with `NotFound` unless the session exists and belongs to
    /// `subject_id`. Does not apply lazy expiry.
    pub async fn ensure_owned(&self, session_id: Uuid, subject_id: &str) -> VerificationResult<()> {
        let session = self.sessions.get(session_id).await?;
        if session.subject_id != subject_id {
            warn!(session_id = %session_id, "Session requested by a different subject");
            return Err(VerificationError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    /// Immediately retires an active session, e.g. when the user cancels.
    pub async fn abandon_session(&self, session_id: Uuid) -> VerificationResult<VerificationSession> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let session = self.get_session(session_id).await?;
            if session.status != SessionStatus::Active {
                warn!(session_id = %session_id, status = session.status.as_str(), "Abandon rejected");
                return Err(VerificationError::SessionNotActive(session_id));
            }

            let expected_version = session.version;
            let mut abandoned = session;
            abandoned.status = SessionStatus::Abandoned;
            match self.sessions.update(&abandoned, expected_version).await {
                Ok(version) => {
                    abandoned.version = version;
                    info!(session_id = %session_id, "Liveness session abandoned");
                    return Ok(abandoned);
                }
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(VerificationError::Internal(format!(
            "Session {} kept changing while being abandoned",
            session_id
        )))
    }

    /// Expires overdue sessions and purges long-dead ones. Returns
    /// `(expired, purged)` counts.
    pub async fn sweep(&self) -> VerificationResult<(u64, u64)> {
        let now = self.clock.now();
        let retention = Duration::from_std(self.policy.purge_after)
            .map_err(|e| VerificationError::InvalidConfiguration(e.to_string()))?;

        let expired = self.sessions.expire_overdue(now).await?;
        let purged = self.sessions.purge_terminal_before(now - retention).await?;
        if expired > 0 || purged > 0 {
            info!(expired, purged, "Swept liveness sessions");
        }
        Ok((expired, purged))
    }
}

/// Samples `count` distinct challenge types in random order.
pub fn sample_challenges<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Challenge> {
    let mut pool = ChallengeType::ALL.to_vec();
    pool.shuffle(rng);
    pool.into_iter()
        .take(count)
        .enumerate()
        .map(|(index, challenge_type)| Challenge::new(index, challenge_type))
        .collect()
}

/// Persists the `active -> expired` transition. If another writer changed the
/// session first, their version wins and is returned instead.
pub(crate) async fn expire_session(
    sessions: &dyn SessionRepository,
    mut session: VerificationSession,
) -> VerificationResult<VerificationSession> {
    let expected_version = session.version;
    session.status = SessionStatus::Expired;
    match sessions.update(&session, expected_version).await {
        Ok(version) => {
            session.version = version;
            info!(session_id = %session.id, "Liveness session expired");
            Ok(session)
        }
        Err(PortError::Conflict(_)) => Ok(sessions.get(session.id).await?),
        Err(e) => Err(e.into()),
    }
}

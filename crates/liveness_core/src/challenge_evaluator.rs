//! crates/liveness_core/src/challenge_evaluator.rs
//!
//! Evaluates one captured frame against the session's active challenge and
//! advances the session when the frame passes. Challenges are completed
//! strictly in order: the caller must name the index the server considers
//! active, and concurrent writers are resolved by the store's version check.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{
    ChallengeOutcome, ChallengeType, FrameAnalysis, SessionStatus, VerificationSession,
};
use crate::error::{VerificationError, VerificationResult};
use crate::image::ImageFrame;
use crate::policy::VerificationPolicy;
use crate::ports::{FrameAnalysisService, PortError, SessionRepository};
use crate::session_manager::expire_session;

pub struct ChallengeEvaluator {
    sessions: Arc<dyn SessionRepository>,
    analyzer: Arc<dyn FrameAnalysisService>,
    clock: Arc<dyn Clock>,
    policy: Arc<VerificationPolicy>,
}

impl ChallengeEvaluator {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        analyzer: Arc<dyn FrameAnalysisService>,
        clock: Arc<dyn Clock>,
        policy: Arc<VerificationPolicy>,
    ) -> Self {
        Self {
            sessions,
            analyzer,
            clock,
            policy,
        }
    }

    pub async fn evaluate_challenge(
        &self,
        session_id: Uuid,
        challenge_index: usize,
        frame: ImageFrame,
    ) -> VerificationResult<ChallengeOutcome> {
        let session = self.sessions.get(session_id).await?;
        let session = self.ensure_evaluable(session).await?;

        if challenge_index != session.current_index {
            warn!(
                session_id = %session_id,
                expected = session.current_index,
                submitted = challenge_index,
                "Challenge index mismatch"
            );
            return Err(VerificationError::ChallengeIndexMismatch {
                expected: session.current_index,
                submitted: challenge_index,
            });
        }

        let challenge = session.challenges.get(challenge_index).cloned().ok_or_else(|| {
            VerificationError::Internal(format!(
                "Session {} has no challenge at index {}",
                session_id, challenge_index
            ))
        })?;

        let analysis = self.analyze(&frame, challenge.challenge_type).await?;

        // The analysis may have taken a while; the deadline still applies.
        let session = self.ensure_evaluable(session).await?;

        if !analysis.passed {
            info!(
                session_id = %session_id,
                index = challenge_index,
                challenge = challenge.challenge_type.as_str(),
                "Challenge not passed"
            );
            return Ok(ChallengeOutcome {
                passed: false,
                hint: analysis.hint,
                session_complete: false,
                next_challenge: None,
                current_index: session.current_index,
            });
        }

        let expected_version = session.version;
        let advanced = advance(session, challenge_index, frame);
        match self.sessions.update(&advanced, expected_version).await {
            Ok(_) => {}
            Err(PortError::Conflict(_)) => {
                let latest = self.sessions.get(session_id).await?;
                warn!(
                    session_id = %session_id,
                    index = challenge_index,
                    "Lost a concurrent evaluation race"
                );
                return Err(VerificationError::ChallengeIndexMismatch {
                    expected: latest.current_index,
                    submitted: challenge_index,
                });
            }
            Err(e) => {
                error!(session_id = %session_id, "Failed to persist challenge result: {}", e);
                return Err(e.into());
            }
        }

        let session_complete = advanced.status == SessionStatus::Complete;
        let next_challenge = advanced.current_challenge().cloned();
        info!(
            session_id = %session_id,
            index = challenge_index,
            challenge = challenge.challenge_type.as_str(),
            session_complete,
            "Challenge passed"
        );

        Ok(ChallengeOutcome {
            passed: true,
            hint: analysis.hint,
            session_complete,
            next_challenge,
            current_index: advanced.current_index,
        })
    }

    /// Rejects sessions that are not active, expiring them if their deadline passed.
    async fn ensure_evaluable(
        &self,
        session: VerificationSession,
    ) -> VerificationResult<VerificationSession> {
        if session.status != SessionStatus::Active {
            return Err(VerificationError::SessionNotActive(session.id));
        }
        if session.is_past_expiry(self.clock.now()) {
            let session_id = session.id;
            expire_session(self.sessions.as_ref(), session).await?;
            return Err(VerificationError::SessionExpired(session_id));
        }
        Ok(session)
    }

    async fn analyze(
        &self,
        frame: &ImageFrame,
        expected: ChallengeType,
    ) -> VerificationResult<FrameAnalysis> {
        let call = self.analyzer.analyze_frame(frame, expected);
        match tokio::time::timeout(self.policy.analysis_timeout, call).await {
            Ok(Ok(analysis)) => Ok(analysis),
            Ok(Err(PortError::InvalidImage(reason))) => Err(VerificationError::InvalidImage(reason)),
            Ok(Err(e)) => {
                error!("Frame analysis failed: {}", e);
                Err(VerificationError::AnalysisUnavailable(e.to_string()))
            }
            Err(_) => {
                error!(
                    "Frame analysis timed out after {:?}",
                    self.policy.analysis_timeout
                );
                Err(VerificationError::AnalysisUnavailable(
                    "frame analysis timed out".to_string(),
                ))
            }
        }
    }
}

/// Applies a pass at `index` to the session.
fn advance(mut session: VerificationSession, index: usize, frame: ImageFrame) -> VerificationSession {
    if index == 0 && session.reference_frame.is_none() {
        session.reference_frame = Some(frame);
    }
    session.completed_indices.insert(index);
    if session.is_fully_completed() {
        session.status = SessionStatus::Complete;
    } else {
        session.current_index = index + 1;
    }
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemorySessionRepository;
    use crate::ports::MockFrameAnalysisService;
    use crate::session_manager::SessionManager;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    fn jpeg(tag: u8) -> ImageFrame {
        ImageFrame::from_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, tag]).unwrap()
    }

    struct Harness {
        manager: SessionManager,
        evaluator: ChallengeEvaluator,
        clock: Arc<ManualClock>,
    }

    fn harness(analyzer: MockFrameAnalysisService) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let repo = Arc::new(InMemorySessionRepository::new());
        let policy = Arc::new(VerificationPolicy::default());
        Harness {
            manager: SessionManager::new(repo.clone(), clock.clone(), policy.clone()),
            evaluator: ChallengeEvaluator::new(repo, Arc::new(analyzer), clock.clone(), policy),
            clock,
        }
    }

    fn passing() -> MockFrameAnalysisService {
        let mut analyzer = MockFrameAnalysisService::new();
        analyzer.expect_analyze_frame().returning(|_, _| {
            Ok(FrameAnalysis {
                passed: true,
                hint: None,
            })
        });
        analyzer
    }

    #[tokio::test]
    async fn failed_frame_keeps_the_session_in_place() {
        let mut analyzer = MockFrameAnalysisService::new();
        analyzer.expect_analyze_frame().times(1).returning(|_, _| {
            Ok(FrameAnalysis {
                passed: false,
                hint: Some("turn further left".to_string()),
            })
        });
        let h = harness(analyzer);
        let session = h.manager.start_session("u1", 3).await.unwrap();

        let outcome = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.hint.as_deref(), Some("turn further left"));
        assert!(!outcome.session_complete);
        assert_eq!(outcome.current_index, 0);

        let after = h.manager.get_session(session.id).await.unwrap();
        assert_eq!(after.current_index, 0);
        assert!(after.completed_indices.is_empty());
        assert!(after.reference_frame.is_none());
        assert_eq!(after.expires_at, session.expires_at);
        assert_eq!(after.version, session.version);
    }

    #[tokio::test]
    async fn analyzer_receives_the_active_challenge_type() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let repo = Arc::new(InMemorySessionRepository::new());
        let policy = Arc::new(VerificationPolicy::default());
        let manager = SessionManager::new(repo.clone(), clock.clone(), policy.clone());
        let session = manager.start_session("u1", 2).await.unwrap();
        let expected = session.challenges[0].challenge_type;

        let mut analyzer = MockFrameAnalysisService::new();
        analyzer
            .expect_analyze_frame()
            .withf(move |_, challenge| *challenge == expected)
            .times(1)
            .returning(|_, _| Ok(FrameAnalysis { passed: true, hint: None }));
        let evaluator = ChallengeEvaluator::new(repo, Arc::new(analyzer), clock, policy);

        let outcome = evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.next_challenge.as_ref(), Some(&session.challenges[1]));
        assert_eq!(outcome.current_index, 1);
    }

    #[tokio::test]
    async fn out_of_order_index_is_rejected_without_calling_the_analyzer() {
        let mut analyzer = MockFrameAnalysisService::new();
        analyzer.expect_analyze_frame().never();
        let h = harness(analyzer);
        let session = h.manager.start_session("u1", 3).await.unwrap();

        let err = h.evaluator.evaluate_challenge(session.id, 1, jpeg(1)).await.unwrap_err();
        assert_eq!(
            err,
            VerificationError::ChallengeIndexMismatch {
                expected: 0,
                submitted: 1
            }
        );
    }

    #[tokio::test]
    async fn expired_session_fails_even_for_a_passing_frame() {
        let mut analyzer = MockFrameAnalysisService::new();
        analyzer.expect_analyze_frame().never();
        let h = harness(analyzer);
        let session = h.manager.start_session("u1", 3).await.unwrap();

        h.clock.advance(Duration::minutes(5));
        let err = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap_err();
        assert_eq!(err, VerificationError::SessionExpired(session.id));

        let after = h.manager.get_session(session.id).await.unwrap();
        assert_eq!(after.status, SessionStatus::Expired);

        let err = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap_err();
        assert_eq!(err, VerificationError::SessionNotActive(session.id));
    }

    #[tokio::test]
    async fn complete_session_rejects_further_evaluations() {
        let h = harness(passing());
        let session = h.manager.start_session("u1", 1).await.unwrap();

        let outcome = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap();
        assert!(outcome.session_complete);
        assert!(outcome.next_challenge.is_none());

        let err = h.evaluator.evaluate_challenge(session.id, 0, jpeg(2)).await.unwrap_err();
        assert_eq!(err, VerificationError::SessionNotActive(session.id));
    }

    #[tokio::test]
    async fn collaborator_failures_are_typed() {
        let mut analyzer = MockFrameAnalysisService::new();
        let mut calls = 0;
        analyzer.expect_analyze_frame().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(PortError::Unavailable("connection refused".to_string()))
            } else {
                Err(PortError::InvalidImage("no face found".to_string()))
            }
        });
        let h = harness(analyzer);
        let session = h.manager.start_session("u1", 2).await.unwrap();

        let err = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap_err();
        assert!(matches!(err, VerificationError::AnalysisUnavailable(_)));
        assert!(err.is_transient());

        let err = h.evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap_err();
        assert!(matches!(err, VerificationError::InvalidImage(_)));

        let after = h.manager.get_session(session.id).await.unwrap();
        assert_eq!(after.current_index, 0);
    }

    #[test]
    fn advance_keeps_the_first_reference_frame() {
        let mut session = VerificationSession {
            id: Uuid::new_v4(),
            subject_id: "u1".to_string(),
            challenges: crate::session_manager::sample_challenges(&mut rand::thread_rng(), 2),
            current_index: 0,
            completed_indices: Default::default(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            expires_at: Utc::now(),
            reference_frame: Some(jpeg(7)),
            version: 0,
        };
        session = advance(session, 0, jpeg(8));
        assert_eq!(session.reference_frame, Some(jpeg(7)));
        assert_eq!(session.current_index, 1);

        session = advance(session, 1, jpeg(9));
        assert_eq!(session.status, SessionStatus::Complete);
        assert_eq!(session.reference_frame, Some(jpeg(7)));
    }

    struct SlowAnalyzer;

    #[async_trait]
    impl FrameAnalysisService for SlowAnalyzer {
        async fn analyze_frame(&self, _: &ImageFrame, _: ChallengeType) -> Result<FrameAnalysis, PortError> {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            Ok(FrameAnalysis {
                passed: true,
                hint: None,
            })
        }
    }

    #[tokio::test]
    async fn slow_analysis_times_out_without_advancing() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let repo = Arc::new(InMemorySessionRepository::new());
        let policy = Arc::new(VerificationPolicy {
            analysis_timeout: std::time::Duration::from_millis(20),
            ..VerificationPolicy::default()
        });
        let manager = SessionManager::new(repo.clone(), clock.clone(), policy.clone());
        let evaluator = ChallengeEvaluator::new(repo, Arc::new(SlowAnalyzer), clock, policy);
        let session = manager.start_session("u1", 2).await.unwrap();

        let err = evaluator.evaluate_challenge(session.id, 0, jpeg(1)).await.unwrap_err();
        assert!(matches!(err, VerificationError::AnalysisUnavailable(_)));
        assert!(err.is_transient());

        let after = manager.get_session(session.id).await.unwrap();
        assert_eq!(after.status, SessionStatus::Active);
        assert_eq!(after.current_index, 0);
        assert!(after.reference_frame.is_none());
        assert_eq!(after.version, session.version);
    }
}

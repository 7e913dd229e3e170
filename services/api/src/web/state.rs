//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use liveness_core::{
    ChallengeEvaluator, Clock, FaceComparisonService, FaceMatchCoordinator, FrameAnalysisService,
    SessionManager, SessionRepository, SubmissionRepository, VerificationFinalizer,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub evaluator: Arc<ChallengeEvaluator>,
    pub face_match: Arc<FaceMatchCoordinator>,
    pub finalizer: Arc<VerificationFinalizer>,
    /// Direct store access for the review boundary.
    pub submissions: Arc<dyn SubmissionRepository>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the verification components to the given adapters.
    pub fn new(
        config: Arc<Config>,
        session_store: Arc<dyn SessionRepository>,
        submission_store: Arc<dyn SubmissionRepository>,
        analyzer: Arc<dyn FrameAnalysisService>,
        comparer: Arc<dyn FaceComparisonService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = Arc::new(config.policy.clone());
        let face_match = Arc::new(FaceMatchCoordinator::new(comparer, policy.clone()));

        Self {
            sessions: Arc::new(SessionManager::new(
                session_store.clone(),
                clock.clone(),
                policy.clone(),
            )),
            evaluator: Arc::new(ChallengeEvaluator::new(
                session_store.clone(),
                analyzer,
                clock.clone(),
                policy,
            )),
            finalizer: Arc::new(VerificationFinalizer::new(
                session_store,
                submission_store.clone(),
                face_match.clone(),
                clock.clone(),
            )),
            face_match,
            submissions: submission_store,
            clock,
            config,
        }
    }

    /// Largest accepted decoded image.
    pub fn max_image_bytes(&self) -> usize {
        self.config.policy.max_image_bytes
    }
}

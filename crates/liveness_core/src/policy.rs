//! crates/liveness_core/src/policy.rs

use std::time::Duration;

/// Tunables shared by the verification components.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// Lifetime of a liveness session from creation.
    pub session_ttl: Duration,
    /// Challenge count used when the caller does not ask for one.
    pub default_challenges: usize,
    /// Minimum face comparison confidence (0-100) that counts as a match.
    pub match_threshold: f64,
    pub analysis_timeout: Duration,
    pub comparison_timeout: Duration,
    /// Upper bound on a decoded image payload.
    pub max_image_bytes: usize,
    /// How long terminal sessions are kept after expiry before purging.
    pub purge_after: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(5 * 60),
            default_challenges: 3,
            match_threshold: 70.0,
            analysis_timeout: Duration::from_secs(10),
            comparison_timeout: Duration::from_secs(10),
            max_image_bytes: 5 * 1024 * 1024,
            purge_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

//! services/api/src/sweeper.rs
//!
//! Background task that expires overdue liveness sessions and purges
//! long-dead ones.

use liveness_core::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs `SessionManager::sweep` every `interval` until `cancel` fires.
pub async fn run_sweeper(
    sessions: Arc<SessionManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "Session sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Session sweeper stopped");
                break;
            }
            _ = ticker.tick() => {
                match sessions.sweep().await {
                    Ok((expired, purged)) => debug!(expired, purged, "Sweep finished"),
                    Err(e) => error!("Session sweep failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use liveness_core::{
        InMemorySessionRepository, ManualClock, SessionRepository, SessionStatus,
        VerificationPolicy,
    };

    #[tokio::test]
    async fn sweeper_expires_sessions_and_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo = Arc::new(InMemorySessionRepository::new());
        let manager = Arc::new(SessionManager::new(
            repo.clone(),
            clock.clone(),
            Arc::new(VerificationPolicy::default()),
        ));
        let session = manager.start_session("u1", 1).await.unwrap();
        clock.advance(ChronoDuration::minutes(6));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            manager.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let mut status = SessionStatus::Active;
        for _ in 0..100 {
            status = repo.get(session.id).await.unwrap().status;
            if status == SessionStatus::Expired {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, SessionStatus::Expired);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}

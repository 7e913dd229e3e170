//! services/api/src/web/review.rs
//!
//! Handlers for the reviewer boundary: listing the pending queue and
//! recording decisions.

use crate::web::{
    extract::ApiJson,
    protocol::{
        ErrorResponse, PendingQuery, PendingSubmissionResponse, ReviewOutcome, ReviewRequest,
        SubmissionResponse,
    },
    rest::{reject, HandlerError},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use liveness_core::{PortError, ReviewDecision, VerificationError};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PENDING_LIMIT: usize = 50;
const MAX_PENDING_LIMIT: usize = 500;

/// List submissions awaiting review, oldest first.
#[utoipa::path(
    get,
    path = "/review/pending",
    responses(
        (status = 200, description = "Pending submissions", body = [PendingSubmissionResponse]),
        (status = 401, description = "Invalid reviewer token", body = ErrorResponse),
        (status = 403, description = "Review access disabled", body = ErrorResponse)
    ),
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of entries (default 50)."),
        ("x-reviewer-token" = String, Header, description = "Shared reviewer secret.")
    )
)]
pub async fn list_pending_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PENDING_LIMIT)
        .clamp(1, MAX_PENDING_LIMIT);
    let pending = state
        .submissions
        .list_pending(limit)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(Json(
        pending
            .iter()
            .map(PendingSubmissionResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Record a reviewer's decision on a pending submission.
#[utoipa::path(
    post,
    path = "/review/submissions/{submission_id}",
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Decision recorded", body = SubmissionResponse),
        (status = 400, description = "Rejection without a reason", body = ErrorResponse),
        (status = 404, description = "Unknown submission", body = ErrorResponse),
        (status = 409, description = "Submission already reviewed", body = ErrorResponse)
    ),
    params(
        ("submission_id" = Uuid, Path, description = "The submission under review."),
        ("x-reviewer-token" = String, Header, description = "Shared reviewer secret.")
    )
)]
pub async fn review_submission_handler(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let decision = match req.decision {
        ReviewOutcome::Verified => ReviewDecision::Verified,
        ReviewOutcome::Rejected => {
            let reason = req
                .reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    reject(VerificationError::InvalidConfiguration(
                        "a rejection needs a reason".to_string(),
                    ))
                })?;
            ReviewDecision::Rejected { reason }
        }
    };

    let reviewed = state
        .submissions
        .record_review(submission_id, &decision, state.clock.now())
        .await
        .map_err(|e| match e {
            PortError::Conflict(msg) => (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    code: "already_reviewed".to_string(),
                    message: msg,
                }),
            ),
            other => reject(other.into()),
        })?;

    info!(
        submission_id = %submission_id,
        status = reviewed.status.as_str(),
        "Review decision recorded"
    );
    Ok(Json(SubmissionResponse::from(&reviewed)))
}

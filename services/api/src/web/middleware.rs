//! services/api/src/web/middleware.rs
//!
//! Caller identification for protected routes.

use axum::{
    extract::{Request, State},
    http::{HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::warn;

use crate::web::{protocol::ErrorResponse, state::AppState};

pub const SUBJECT_HEADER: HeaderName = HeaderName::from_static("x-subject-id");
pub const REVIEWER_HEADER: HeaderName = HeaderName::from_static("x-reviewer-token");

/// The verified identity of the caller, inserted by `require_subject`.
#[derive(Clone, Debug)]
pub struct SubjectId(pub String);

fn unauthorized(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            code: "unauthorized".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Middleware that extracts the subject id set by the upstream authentication proxy.
///
/// The header is trusted as is: this service does not authenticate callers itself,
/// so it must only be reachable through a proxy that strips any client-supplied
/// `x-subject-id` and sets it from its own authenticated session.
///
/// If present, inserts a `SubjectId` into request extensions for handlers to use.
/// If missing or blank, returns 401 Unauthorized.
pub async fn require_subject(mut req: Request, next: Next) -> Response {
    let subject = req
        .headers()
        .get(&SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match subject {
        Some(subject) => {
            req.extensions_mut().insert(SubjectId(subject));
            next.run(req).await
        }
        None => unauthorized(StatusCode::UNAUTHORIZED, "x-subject-id header is required"),
    }
}

/// Middleware guarding the review routes with the configured reviewer token.
pub async fn require_reviewer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.reviewer_token.as_deref() else {
        return unauthorized(StatusCode::FORBIDDEN, "Review access is disabled");
    };

    let presented = req
        .headers()
        .get(&REVIEWER_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if !tokens_match(presented, expected.as_bytes()) {
        warn!("Rejected review request with a missing or wrong token");
        return unauthorized(StatusCode::UNAUTHORIZED, "Invalid reviewer token");
    }
    next.run(req).await
}

/// Compares two secrets without exiting early on the first differing byte.
/// Only the length is allowed to leak.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (a, b) in presented.iter().zip(expected) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_only_on_identical_secrets() {
        assert!(tokens_match(b"review-secret", b"review-secret"));
        assert!(!tokens_match(b"review-secreT", b"review-secret"));
        assert!(!tokens_match(b"review-secret-extra", b"review-secret"));
        assert!(!tokens_match(b"", b"review-secret"));
    }
}

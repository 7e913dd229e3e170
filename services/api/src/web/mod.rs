pub mod extract;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod review;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use middleware::{require_reviewer, require_subject, REVIEWER_HEADER, SUBJECT_HEADER};
use rest::{
    abandon_session_handler, evaluate_challenge_handler, face_match_handler, get_session_handler,
    health_handler, history_handler, start_session_handler, status_handler,
    submit_verification_handler,
};
use review::{list_pending_handler, review_submission_handler};
use state::AppState;

/// Headroom above the image limit for base64 expansion and the JSON envelope.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Builds the complete API router (without the Swagger UI).
pub fn router(state: Arc<AppState>) -> Router {
    // Two images per request at most, each inflated by ~4/3 when base64 encoded.
    let body_limit = state.max_image_bytes().saturating_mul(3) + BODY_OVERHEAD_BYTES;

    let public_routes = Router::new().route("/health", get(health_handler));

    let subject_routes = Router::new()
        .route("/liveness/sessions", post(start_session_handler))
        .route("/liveness/sessions/{session_id}", get(get_session_handler))
        .route(
            "/liveness/sessions/{session_id}/abandon",
            post(abandon_session_handler),
        )
        .route(
            "/liveness/sessions/{session_id}/challenges/{index}",
            post(evaluate_challenge_handler),
        )
        .route("/verification/face-match", post(face_match_handler))
        .route("/verification/submissions", post(submit_verification_handler))
        .route("/verification/status", get(status_handler))
        .route("/verification/history", get(history_handler))
        .layer(axum_middleware::from_fn(require_subject));

    let review_routes = Router::new()
        .route("/review/pending", get(list_pending_handler))
        .route(
            "/review/submissions/{submission_id}",
            post(review_submission_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_reviewer,
        ));

    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .merge(public_routes)
        .merge(subject_routes)
        .merge(review_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match origin.parse::<HeaderValue>() {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!("CORS_ORIGIN '{}' is not a valid header value; allowing any origin", origin);
                AllowOrigin::any()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, SUBJECT_HEADER, REVIEWER_HEADER])
}

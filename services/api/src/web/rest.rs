//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the verification REST API and the master
//! definition for the OpenAPI specification.

use crate::web::{
    extract::ApiJson,
    middleware::SubjectId,
    protocol::{
        ChallengeDto, ChallengeResponse, ErrorResponse, EvaluateChallengeRequest,
        FaceMatchRequest, FaceMatchResponse, PendingSubmissionResponse, ReviewOutcome,
        ReviewRequest, SessionResponse, StartSessionRequest, StatusResponse,
        SubmissionResponse, SubmitVerificationRequest,
    },
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use liveness_core::{ImageFrame, VerificationError};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        start_session_handler,
        get_session_handler,
        abandon_session_handler,
        evaluate_challenge_handler,
        face_match_handler,
        submit_verification_handler,
        status_handler,
        history_handler,
        crate::web::review::list_pending_handler,
        crate::web::review::review_submission_handler,
    ),
    components(
        schemas(
            StartSessionRequest, EvaluateChallengeRequest, FaceMatchRequest,
            SubmitVerificationRequest, ReviewRequest, ReviewOutcome, ErrorResponse,
            ChallengeDto, SessionResponse, ChallengeResponse, FaceMatchResponse,
            SubmissionResponse, PendingSubmissionResponse, StatusResponse
        )
    ),
    tags(
        (name = "Liveness Verification API", description = "Liveness challenges, face matching and verification submissions.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Maps a verification error to its HTTP status and JSON body.
pub fn reject(err: VerificationError) -> HandlerError {
    let status = match &err {
        VerificationError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
        VerificationError::NotFound(_) => StatusCode::NOT_FOUND,
        VerificationError::SessionNotActive(_) => StatusCode::CONFLICT,
        VerificationError::SessionExpired(_) => StatusCode::GONE,
        VerificationError::ChallengeIndexMismatch { .. } => StatusCode::CONFLICT,
        VerificationError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VerificationError::AnalysisUnavailable(_) | VerificationError::ComparisonUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        VerificationError::VerificationIncomplete(_) => StatusCode::PRECONDITION_FAILED,
        VerificationError::AlreadySubmitted(_) => StatusCode::CONFLICT,
        VerificationError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        VerificationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
        "An unexpected internal error occurred".to_string()
    } else {
        warn!(code = err.code(), "Request rejected: {}", err);
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            code: err.code().to_string(),
            message,
        }),
    )
}

fn decode_image(state: &AppState, encoded: &str) -> Result<ImageFrame, HandlerError> {
    ImageFrame::from_base64(encoded, state.max_image_bytes()).map_err(reject)
}

//=========================================================================================
// Liveness Session Handlers
//=========================================================================================

/// Start a liveness session.
///
/// Samples the requested number of distinct challenges in random order.
#[utoipa::path(
    post,
    path = "/liveness/sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 400, description = "Invalid challenge count", body = ErrorResponse),
        (status = 401, description = "Missing x-subject-id header", body = ErrorResponse)
    ),
    params(
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
    body: Option<ApiJson<StartSessionRequest>>,
) -> Result<impl IntoResponse, HandlerError> {
    let num_challenges = body
        .and_then(|ApiJson(req)| req.num_challenges)
        .unwrap_or(state.config.policy.default_challenges);
    let session = state
        .sessions
        .start_session(&subject_id, num_challenges)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

/// Fetch the server-side state of a liveness session.
#[utoipa::path(
    get,
    path = "/liveness/sessions/{session_id}",
    responses(
        (status = 200, description = "Current session state", body = SessionResponse),
        (status = 404, description = "Unknown or purged session", body = ErrorResponse)
    ),
    params(
        ("session_id" = Uuid, Path, description = "The liveness session."),
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .sessions
        .ensure_owned(session_id, &subject_id)
        .await
        .map_err(reject)?;
    let session = state.sessions.get_session(session_id).await.map_err(reject)?;
    Ok(Json(SessionResponse::from(&session)))
}

/// Cancel an active liveness session.
#[utoipa::path(
    post,
    path = "/liveness/sessions/{session_id}/abandon",
    responses(
        (status = 200, description = "Session abandoned", body = SessionResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
        (status = 409, description = "Session is not active", body = ErrorResponse)
    ),
    params(
        ("session_id" = Uuid, Path, description = "The liveness session."),
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn abandon_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .sessions
        .ensure_owned(session_id, &subject_id)
        .await
        .map_err(reject)?;
    let session = state
        .sessions
        .abandon_session(session_id)
        .await
        .map_err(reject)?;
    Ok(Json(SessionResponse::from(&session)))
}

/// Submit one captured frame for the challenge at `index`.
///
/// `index` must be the session's current index; on failure the same challenge
/// must be retried with a fresh frame.
#[utoipa::path(
    post,
    path = "/liveness/sessions/{session_id}/challenges/{index}",
    request_body = EvaluateChallengeRequest,
    responses(
        (status = 200, description = "Frame evaluated", body = ChallengeResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
        (status = 409, description = "Session not active or index mismatch", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse),
        (status = 413, description = "Image too large", body = ErrorResponse),
        (status = 422, description = "Unreadable image", body = ErrorResponse),
        (status = 503, description = "Frame analysis unavailable", body = ErrorResponse)
    ),
    params(
        ("session_id" = Uuid, Path, description = "The liveness session."),
        ("index" = usize, Path, description = "Zero-based challenge index."),
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn evaluate_challenge_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
    Path((session_id, index)): Path<(Uuid, usize)>,
    ApiJson(req): ApiJson<EvaluateChallengeRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .sessions
        .ensure_owned(session_id, &subject_id)
        .await
        .map_err(reject)?;
    let frame = decode_image(&state, &req.image)?;
    let outcome = state
        .evaluator
        .evaluate_challenge(session_id, index, frame)
        .await
        .map_err(reject)?;
    Ok(Json(ChallengeResponse::from(outcome)))
}

//=========================================================================================
// Face Match and Submission Handlers
//=========================================================================================

/// Compare an ID document photo against a selfie.
///
/// `matched = false` is a normal outcome; the caller may prompt for a retake.
#[utoipa::path(
    post,
    path = "/verification/face-match",
    request_body = FaceMatchRequest,
    responses(
        (status = 200, description = "Comparison result", body = FaceMatchResponse),
        (status = 413, description = "Image too large", body = ErrorResponse),
        (status = 422, description = "Unreadable image", body = ErrorResponse),
        (status = 503, description = "Face comparison unavailable", body = ErrorResponse)
    ),
    params(
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn face_match_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<FaceMatchRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let id_document = decode_image(&state, &req.id_document_image)?;
    let selfie = decode_image(&state, &req.selfie_image)?;
    let result = state
        .face_match
        .compare_face(&id_document, &selfie)
        .await
        .map_err(reject)?;
    Ok(Json(FaceMatchResponse::from(result)))
}

/// Submit a completed liveness session and ID document for review.
#[utoipa::path(
    post,
    path = "/verification/submissions",
    request_body = SubmitVerificationRequest,
    responses(
        (status = 201, description = "Submission queued for review", body = SubmissionResponse),
        (status = 409, description = "Already submitted", body = ErrorResponse),
        (status = 412, description = "Liveness or face match incomplete", body = ErrorResponse),
        (status = 503, description = "Face comparison unavailable", body = ErrorResponse)
    ),
    params(
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn submit_verification_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
    ApiJson(req): ApiJson<SubmitVerificationRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let id_document = decode_image(&state, &req.id_document_image)?;
    let selfie = decode_image(&state, &req.selfie_image)?;
    let submission = state
        .finalizer
        .submit_verification(&subject_id, id_document, selfie, req.liveness_session_id)
        .await
        .map_err(reject)?;
    info!(submission_id = %submission.id, "Submission accepted");
    Ok((StatusCode::CREATED, Json(SubmissionResponse::from(&submission))))
}

/// The caller's current verification status.
#[utoipa::path(
    get,
    path = "/verification/status",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    ),
    params(
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
) -> Result<impl IntoResponse, HandlerError> {
    let report = state.finalizer.get_status(&subject_id).await.map_err(reject)?;
    Ok(Json(StatusResponse::from(report)))
}

/// Every submission the caller has made, newest first.
#[utoipa::path(
    get,
    path = "/verification/history",
    responses(
        (status = 200, description = "Submission history", body = [SubmissionResponse])
    ),
    params(
        ("x-subject-id" = String, Header, description = "The subject being verified.")
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Extension(SubjectId(subject_id)): Extension<SubjectId>,
) -> Result<impl IntoResponse, HandlerError> {
    let history = state.finalizer.history(&subject_id).await.map_err(reject)?;
    Ok(Json(
        history
            .iter()
            .map(SubmissionResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Liveness probe.
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

//! Exercises the HTTP surface against the in-memory stores with stubbed
//! vision collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use api_lib::{
    config::Config,
    web::{router, state::AppState},
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use liveness_core::{
    ChallengeType, FaceComparisonService, FrameAnalysis, FrameAnalysisService, ImageFrame,
    InMemorySessionRepository, InMemorySubmissionRepository, PortResult, SystemClock,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const SUBJECT: &str = "subject-1";
const REVIEWER_TOKEN: &str = "review-secret";
const FAIL_TAG: u8 = 0xEE;

struct StubAnalyzer;

#[async_trait]
impl FrameAnalysisService for StubAnalyzer {
    async fn analyze_frame(&self, frame: &ImageFrame, _: ChallengeType) -> PortResult<FrameAnalysis> {
        let passed = frame.as_bytes().last() != Some(&FAIL_TAG);
        Ok(FrameAnalysis {
            passed,
            hint: (!passed).then(|| "move closer to the camera".to_string()),
        })
    }
}

struct StubComparer;

#[async_trait]
impl FaceComparisonService for StubComparer {
    async fn compare_faces(&self, _: &ImageFrame, _: &ImageFrame) -> PortResult<f64> {
        Ok(85.0)
    }
}

fn app_with(overrides: &[(&str, &str)]) -> Router {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("STORE_BACKEND".to_string(), "memory".to_string()),
        ("MAX_IMAGE_BYTES".to_string(), "4096".to_string()),
    ]);
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    let config = Config::from_lookup(move |key| vars.get(key).cloned()).unwrap();

    let state = AppState::new(
        Arc::new(config),
        Arc::new(InMemorySessionRepository::new()),
        Arc::new(InMemorySubmissionRepository::new()),
        Arc::new(StubAnalyzer),
        Arc::new(StubComparer),
        Arc::new(SystemClock),
    );
    router(Arc::new(state))
}

fn app() -> Router {
    app_with(&[("REVIEWER_TOKEN", REVIEWER_TOKEN)])
}

/// A tiny JPEG-looking payload whose trailing byte is `tag`.
fn jpeg(tag: u8) -> String {
    STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, tag])
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Sends a raw body as the test subject, with an optional content type.
async fn send_raw(
    app: &Router,
    uri: &str,
    content_type: Option<&str>,
    body: String,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-subject-id", SUBJECT);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn as_subject(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(app, method, uri, &[("x-subject-id", SUBJECT)], body).await
}

/// Starts a session and passes every challenge, using `reference` for the first frame.
async fn complete_session(app: &Router, reference: &str) -> String {
    let (status, session) = as_subject(
        app,
        "POST",
        "/liveness/sessions",
        Some(json!({ "num_challenges": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["session_id"].as_str().unwrap().to_string();

    for index in 0..2 {
        let image = if index == 0 { reference.to_string() } else { jpeg(index as u8) };
        let (status, outcome) = as_subject(
            app,
            "POST",
            &format!("/liveness/sessions/{}/challenges/{}", session_id, index),
            Some(json!({ "image": image })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["passed"], true);
    }
    session_id
}

#[tokio::test]
async fn health_needs_no_identity() {
    let (status, body) = send(&app(), "GET", "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn subject_routes_require_the_subject_header() {
    let (status, body) = send(&app(), "GET", "/verification/status", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn full_flow_from_session_to_verified() {
    let app = app();
    let (_, status) = as_subject(&app, "GET", "/verification/status", None).await;
    assert_eq!(status["status"], "not_started");

    let selfie = jpeg(0x01);
    let session_id = complete_session(&app, &selfie).await;

    let (status, session) =
        as_subject(&app, "GET", &format!("/liveness/sessions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "complete");
    assert_eq!(session["completed_indices"], json!([0, 1]));
    assert_eq!(session["has_reference_frame"], true);
    assert!(session["current_challenge"].is_null());

    let (status, face) = as_subject(
        &app,
        "POST",
        "/verification/face-match",
        Some(json!({ "id_document_image": jpeg(0x42), "selfie_image": selfie })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(face["matched"], true);
    assert_eq!(face["threshold"], 70.0);

    let (status, submission) = as_subject(
        &app,
        "POST",
        "/verification/submissions",
        Some(json!({
            "liveness_session_id": session_id,
            "id_document_image": jpeg(0x42),
            "selfie_image": selfie,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submission["status"], "pending");
    let submission_id = submission["submission_id"].as_str().unwrap().to_string();

    let (_, status) = as_subject(&app, "GET", "/verification/status", None).await;
    assert_eq!(status["status"], "pending");
    assert_eq!(status["submission_id"], submission_id.as_str());

    let reviewer = [("x-reviewer-token", REVIEWER_TOKEN)];
    let (status, pending) = send(&app, "GET", "/review/pending", &reviewer, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert!(pending[0]["selfie_image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));

    let (status, reviewed) = send(
        &app,
        "POST",
        &format!("/review/submissions/{}", submission_id),
        &reviewer,
        Some(json!({ "decision": "verified" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["status"], "verified");

    let (status, again) = send(
        &app,
        "POST",
        &format!("/review/submissions/{}", submission_id),
        &reviewer,
        Some(json!({ "decision": "rejected", "reason": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "already_reviewed");

    let (_, status) = as_subject(&app, "GET", "/verification/status", None).await;
    assert_eq!(status["status"], "verified");

    let (_, history) = as_subject(&app, "GET", "/verification/history", None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_frames_keep_the_challenge_and_wrong_indices_conflict() {
    let app = app();
    let (_, session) = as_subject(
        &app,
        "POST",
        "/liveness/sessions",
        Some(json!({ "num_challenges": 3 })),
    )
    .await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, outcome) = as_subject(
        &app,
        "POST",
        &format!("/liveness/sessions/{}/challenges/0", session_id),
        Some(json!({ "image": jpeg(FAIL_TAG) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["passed"], false);
    assert_eq!(outcome["current_index"], 0);
    assert!(outcome["hint"].is_string());

    let (status, body) = as_subject(
        &app,
        "POST",
        &format!("/liveness/sessions/{}/challenges/1", session_id),
        Some(json!({ "image": jpeg(0x01) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "challenge_index_mismatch");
}

#[tokio::test]
async fn bad_images_are_rejected_with_their_own_statuses() {
    let app = app();
    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let uri = format!(
        "/liveness/sessions/{}/challenges/0",
        session["session_id"].as_str().unwrap()
    );

    let oversized = STANDARD.encode(vec![0xFFu8; 8 * 1024]);
    let (status, body) = as_subject(&app, "POST", &uri, Some(json!({ "image": oversized }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");

    let text = STANDARD.encode(b"definitely not an image");
    let (status, body) = as_subject(&app, "POST", &uri, Some(json!({ "image": text }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_image");
}

#[tokio::test]
async fn invalid_challenge_count_is_a_bad_request() {
    let (status, body) = as_subject(
        &app(),
        "POST",
        "/liveness/sessions",
        Some(json!({ "num_challenges": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_configuration");
}

#[tokio::test]
async fn sessions_of_other_subjects_are_invisible() {
    let app = app();
    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let uri = format!("/liveness/sessions/{}", session["session_id"].as_str().unwrap());

    let (status, body) = send(&app, "GET", &uri, &[("x-subject-id", "intruder")], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn abandoned_sessions_cannot_be_continued() {
    let app = app();
    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, abandoned) = as_subject(
        &app,
        "POST",
        &format!("/liveness/sessions/{}/abandon", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(abandoned["status"], "abandoned");

    let (status, body) = as_subject(
        &app,
        "POST",
        &format!("/liveness/sessions/{}/challenges/0", session_id),
        Some(json!({ "image": jpeg(0x01) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "session_not_active");
}

#[tokio::test]
async fn incomplete_liveness_blocks_submission_and_duplicates_conflict() {
    let app = app();
    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let (status, body) = as_subject(
        &app,
        "POST",
        "/verification/submissions",
        Some(json!({
            "liveness_session_id": session["session_id"],
            "id_document_image": jpeg(0x42),
            "selfie_image": jpeg(0x01),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "verification_incomplete");

    let selfie = jpeg(0x07);
    let session_id = complete_session(&app, &selfie).await;
    let request = json!({
        "liveness_session_id": session_id,
        "id_document_image": jpeg(0x42),
        "selfie_image": selfie,
    });
    let (status, _) = as_subject(&app, "POST", "/verification/submissions", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = as_subject(&app, "POST", "/verification/submissions", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_submitted");
}

#[tokio::test]
async fn rejection_requires_a_reason() {
    let app = app();
    let selfie = jpeg(0x03);
    let session_id = complete_session(&app, &selfie).await;
    let (_, submission) = as_subject(
        &app,
        "POST",
        "/verification/submissions",
        Some(json!({
            "liveness_session_id": session_id,
            "id_document_image": jpeg(0x42),
            "selfie_image": selfie,
        })),
    )
    .await;
    let uri = format!(
        "/review/submissions/{}",
        submission["submission_id"].as_str().unwrap()
    );
    let reviewer = [("x-reviewer-token", REVIEWER_TOKEN)];

    let (status, _) = send(&app, "POST", &uri, &reviewer, Some(json!({ "decision": "rejected" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rejected) = send(
        &app,
        "POST",
        &uri,
        &reviewer,
        Some(json!({ "decision": "rejected", "reason": "document expired" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["rejection_reason"], "document expired");

    let (_, status) = as_subject(&app, "GET", "/verification/status", None).await;
    assert_eq!(status["status"], "rejected");
    assert_eq!(status["rejection_reason"], "document expired");
}

#[tokio::test]
async fn review_routes_are_guarded() {
    let (status, _) = send(
        &app(),
        "GET",
        "/review/pending",
        &[("x-reviewer-token", "wrong")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app_with(&[]),
        "GET",
        "/review/pending",
        &[("x-reviewer-token", REVIEWER_TOKEN)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn start_session_body_is_optional() {
    let app = app();
    let (status, session) = send_raw(&app, "/liveness/sessions", None, String::new()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["challenges"].as_array().unwrap().len(), 3);
    assert_eq!(session["status"], "active");
}

#[tokio::test]
async fn unreadable_bodies_get_json_errors() {
    let app = app();
    let (status, body) = send_raw(
        &app,
        "/liveness/sessions",
        Some("application/json"),
        "{ not json".to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let uri = format!(
        "/liveness/sessions/{}/challenges/0",
        session["session_id"].as_str().unwrap()
    );

    let (status, body) = send_raw(&app, &uri, None, json!({ "image": jpeg(1) }).to_string()).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send_raw(
        &app,
        &uri,
        Some("application/json"),
        json!({ "picture": jpeg(1) }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn bodies_over_the_transport_limit_get_json_errors() {
    let app = app();
    let (_, session) = as_subject(&app, "POST", "/liveness/sessions", Some(json!({}))).await;
    let uri = format!(
        "/liveness/sessions/{}/challenges/0",
        session["session_id"].as_str().unwrap()
    );

    // MAX_IMAGE_BYTES is 4096 here, so this is far above the router's body limit.
    let huge = json!({ "image": "A".repeat(200 * 1024) }).to_string();
    let (status, body) = send_raw(&app, &uri, Some("application/json"), huge).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
}

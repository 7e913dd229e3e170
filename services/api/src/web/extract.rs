//! services/api/src/web/extract.rs
//!
//! A JSON body extractor whose rejections use the API's `{code, message}` error body.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, OptionalFromRequest, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::web::{protocol::ErrorResponse, rest::HandlerError};

/// Like `axum::Json`, but malformed, mistyped or oversized bodies are answered
/// with an `ErrorResponse`.
///
/// As an `Option`, a request without a `Content-Type` header yields `None`.
pub struct ApiJson<T>(pub T);

fn json_rejection(rejection: JsonRejection) -> HandlerError {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "invalid_request"
    };
    let message = rejection.body_text();
    warn!(status = status.as_u16(), "Rejected request body: {}", message);
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            message,
        }),
    )
}

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = HandlerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

impl<T, S> OptionalFromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = HandlerError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        if !req.headers().contains_key(CONTENT_TYPE) {
            return Ok(None);
        }
        <ApiJson<T> as FromRequest<S>>::from_request(req, state)
            .await
            .map(Some)
    }
}

//! JSON body extractor reporting framework error codes.
//!
//! [`Payload`] behaves like [`axum::Json`] but rejects with [`AppError`], so a
//! bad body flows through the same classification as any handler failure:
//!
//! - well-formed JSON that does not match the target type → `VALIDATION`
//! - malformed JSON, wrong content type, unreadable body → `PARSE`
//! - body over the `DefaultBodyLimit` → payload too large (413)

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::AppError;

/// JSON request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Payload<T>(pub T);

impl<T> Payload<T> {
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => AppError::Validation(json!({
                "message": err.body_text(),
            })),
            // Streamed bodies have no Content-Length for the gate to check.
            other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::PayloadTooLarge(other.body_text())
            }
            other => AppError::Parse(other.body_text()),
        }
    }
}

use axum::Json;
use axum::http::Uri;

use crate::error::AppError;
use crate::models::RootResponse;

/// `GET /`
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Hello World".to_string(),
    })
}

/// Fallback for unmatched routes, reported as `NOT_FOUND`.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

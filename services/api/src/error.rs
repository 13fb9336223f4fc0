use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fieldsync_common::error::SyncerError;

pub struct ApiError(pub SyncerError);

impl From<SyncerError> for ApiError {
    fn from(err: SyncerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            SyncerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            SyncerError::Validation(msg) | SyncerError::Config(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

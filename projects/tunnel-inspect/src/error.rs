use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No file field in the upload")]
    MissingFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Failed to decode image")]
    InvalidImage,
    #[error("Malformed upload: {0}")]
    Upload(String),
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("Failed to capture frame from camera")]
    CaptureFailed,
    #[error("Failed to encode {0}")]
    Encoding(String),
    #[error("No frames were processed from the video")]
    NoFramesProcessed,
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingFile
            | ServiceError::EmptyFilename
            | ServiceError::InvalidImage
            | ServiceError::Upload(_) => StatusCode::BAD_REQUEST,
            ServiceError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::NoFramesProcessed => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::CaptureFailed | ServiceError::Encoding(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Recovers a typed error raised inside pipeline code, if there is one.
impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(typed) => typed,
            Err(other) => ServiceError::Internal(other),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

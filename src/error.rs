use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::models::ErrorResponse;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid multipart request: {0}")]
    Multipart(String),

    #[error("{0}")]
    InvalidUpload(String),

    #[error("File too large. Maximum file size is {max_mb}MB.")]
    UploadTooLarge { max_mb: u64 },

    #[error("{message}")]
    InvalidBody { status: StatusCode, message: String },

    #[error("A reply is still pending for this conversation")]
    ReplyPending,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Video {0} is still processing")]
    NotReady(String),

    #[error("No videos to analyze. Upload a video first.")]
    NoVideos,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::InvalidBody { status, .. } => *status,
            Error::Multipart(_) | Error::InvalidUpload(_) | Error::EmptyMessage => {
                StatusCode::BAD_REQUEST
            }
            Error::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotReady(_) | Error::NoVideos | Error::ReplyPending => StatusCode::CONFLICT,
        }
    }
}

// Extractor rejections keep their status but share the JSON error body.
impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

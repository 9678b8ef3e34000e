use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use gstreamed_media::MediaError;

/// Everything a request can fail with, mapped onto HTTP statuses. Bad
/// uploads are the client's fault; anything involving the media pipeline or
/// the model is ours.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid image format")]
    InvalidImageFormat,
    #[error("Invalid video format")]
    InvalidVideoFormat,
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error("Invalid upload: {0}")]
    BadUpload(String),
    #[error("Could not open video: {0}")]
    Open(String),
    #[error("Could not create output video writer with any codec ({0})")]
    Encoder(String),
    #[error("Failed to create output video")]
    EmptyOutput,
    #[error("Video processing failed: {0}")]
    Processing(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidImageFormat
            | ApiError::InvalidVideoFormat
            | ApiError::Decode(_)
            | ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
            ApiError::Open(_)
            | ApiError::Encoder(_)
            | ApiError::EmptyOutput
            | ApiError::Processing(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Open(msg) => ApiError::Open(msg),
            MediaError::Encoder(tried) => ApiError::Encoder(tried),
            other => ApiError::Processing(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_rejections_are_client_errors() {
        assert_eq!(ApiError::InvalidImageFormat.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidVideoFormat.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Decode("bad bytes".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn pipeline_failures_are_server_errors() {
        assert_eq!(
            ApiError::Open("garbage".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Encoder("x264enc, openh264enc, avenc_mpeg4".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::EmptyOutput.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn media_open_errors_keep_their_kind() {
        let err = ApiError::from(MediaError::Open("preroll failed".into()));
        assert!(matches!(err, ApiError::Open(_)));
        let err = ApiError::from(MediaError::Encoder("x264enc".into()));
        assert!(matches!(err, ApiError::Encoder(_)));
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use inference_common::annotate::Annotator;
use inference_common::detection::{flatten, Detection};
use inference_common::params::DetectParams;
use inference_common::ObjectDetector;

use crate::error::ApiError;
use crate::video;

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

// Local development frontends allowed through CORS.
const ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup, shared read-only by every request; the mutex
    /// exists because a session run needs exclusive access, not because the
    /// model mutates.
    pub detector: Arc<Mutex<dyn ObjectDetector>>,
    pub annotator: Arc<Annotator>,
    pub params: DetectParams,
    pub model_path: String,
}

pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = ALLOWED_ORIGINS
        .iter()
        .map(|origin| HeaderValue::from_static(origin))
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(read_root))
        .route("/health", get(health))
        .route("/detect/image", post(detect_image))
        .route("/detect/video", post(detect_video))
        .route("/detect/webcam-frame", post(detect_webcam_frame))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{host}:{port}");
    info!("Mango detection API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn read_root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Mango Detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "image_detection": "/detect/image",
            "video_detection": "/detect/video",
            "webcam_detection": "/detect/webcam-frame"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "model_loaded": state.model_path }))
}

#[derive(Debug, Serialize)]
struct DetectionDto {
    class: String,
    confidence: f32,
    bbox: [f32; 4],
}

impl From<Detection> for DetectionDto {
    fn from(d: Detection) -> Self {
        Self {
            class: d.class_name,
            confidence: d.confidence,
            bbox: [d.bbox.xmin, d.bbox.ymin, d.bbox.xmax, d.bbox.ymax],
        }
    }
}

#[derive(Debug, Serialize)]
struct DetectionsResponse {
    detections: Vec<DetectionDto>,
}

fn has_allowed_extension(filename: &str, allowed: &[&str]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// Pulls the uploaded file out of the multipart form. The first field that
/// carries a filename (or is named `file`) wins.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadUpload(e.to_string()))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadUpload(e.to_string()))?;
            return Ok((filename, bytes.to_vec()));
        }
    }
    Err(ApiError::BadUpload("no file field in request".into()))
}

async fn detect_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (filename, bytes) = read_upload(multipart).await?;
    if !has_allowed_extension(&filename, &IMAGE_EXTENSIONS) {
        return Err(ApiError::InvalidImageFormat);
    }

    let detector = Arc::clone(&state.detector);
    let annotator = Arc::clone(&state.annotator);
    let params = state.params;
    let jpeg = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ApiError> {
        let image =
            image::load_from_memory(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        let bboxes = detector
            .lock()
            .unwrap()
            .detect(&image, &params)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let annotated = annotator.annotate(&image, &flatten(&bboxes));

        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(annotated)
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(out.into_inner())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

async fn detect_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (filename, bytes) = read_upload(multipart).await?;
    if !has_allowed_extension(&filename, &VIDEO_EXTENSIONS) {
        return Err(ApiError::InvalidVideoFormat);
    }

    video::detect_video_response(state, bytes).await
}

/// Real-time frame-by-frame detection from a webcam; returns structured
/// detections rather than annotated media. The decode is the gate here, no
/// extension check.
async fn detect_webcam_frame(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectionsResponse>, ApiError> {
    let (_filename, bytes) = read_upload(multipart).await?;

    let detector = Arc::clone(&state.detector);
    let params = state.params;
    let bboxes = tokio::task::spawn_blocking(move || {
        let image =
            image::load_from_memory(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        detector
            .lock()
            .unwrap()
            .detect(&image, &params)
            .map_err(|e| ApiError::Internal(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let detections = flatten(&bboxes).into_iter().map(DetectionDto::from).collect();
    Ok(Json(DetectionsResponse { detections }))
}

use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::Stream;
use image::RgbImage;
use tempfile::TempPath;
use tokio_util::io::ReaderStream;
use tracing::info;

use inference_common::annotate::Annotator;
use inference_common::detection::flatten;
use inference_common::params::DetectParams;
use inference_common::ObjectDetector;

use gstreamed_media::reader::FrameReader;
use gstreamed_media::writer::FrameWriter;
use gstreamed_media::{sanitize_fps, MediaError};

use crate::api::AppState;
use crate::error::ApiError;

pub struct VideoSummary {
    pub frames: u64,
    pub codec: &'static str,
}

/// Runs detection over every frame of the uploaded video and streams back an
/// annotated mp4. Both temp files live exactly as long as needed: the input
/// is deleted when processing ends, the output when the response stream is
/// dropped.
pub async fn detect_video_response(state: AppState, bytes: Vec<u8>) -> Result<Response, ApiError> {
    let output_path = tempfile::Builder::new()
        .prefix("detected_")
        .suffix(".mp4")
        .tempfile()
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .into_temp_path();

    let detector = Arc::clone(&state.detector);
    let annotator = Arc::clone(&state.annotator);
    let params = state.params;
    let output = output_path.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || -> Result<VideoSummary, ApiError> {
        let mut input = tempfile::Builder::new()
            .prefix("upload_")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        input
            .write_all(&bytes)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        input
            .flush()
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        process_video(input.path(), &output, &detector, &annotator, &params)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let metadata = tokio::fs::metadata(&output_path)
        .await
        .map_err(|_| ApiError::EmptyOutput)?;
    if metadata.len() == 0 {
        return Err(ApiError::EmptyOutput);
    }

    info!(
        frames = summary.frames,
        codec = summary.codec,
        size_bytes = metadata.len(),
        "Video processed"
    );

    let file = tokio::fs::File::open(&output_path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let stream = CleanupStream {
        inner: ReaderStream::new(file),
        _temp: output_path,
    };

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (
                header::CONTENT_DISPOSITION,
                "inline; filename=detected_video.mp4",
            ),
            (header::ACCEPT_RANGES, "bytes"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn process_video(
    input: &Path,
    output: &Path,
    detector: &Mutex<dyn ObjectDetector>,
    annotator: &Annotator,
    params: &DetectParams,
) -> Result<VideoSummary, ApiError> {
    let mut reader = FrameReader::open(input)?;
    let info = reader.info();
    let fps = sanitize_fps(info.fps);

    let mut writer = FrameWriter::create(output, info.width, info.height, fps)?;
    let codec = writer.codec();

    annotate_frames(
        || reader.next_frame(),
        |frame| writer.push(frame),
        detector,
        annotator,
        params,
    )?;

    let frames = writer.finish()?;
    Ok(VideoSummary { frames, codec })
}

/// Per-frame detection loop: pulls frames from `next` until it yields `None`,
/// annotates each one and hands it to `sink`. Every frame read is written
/// exactly once; the returned count reflects both.
fn annotate_frames(
    mut next: impl FnMut() -> Result<Option<RgbImage>, MediaError>,
    mut sink: impl FnMut(&RgbImage) -> Result<(), MediaError>,
    detector: &Mutex<dyn ObjectDetector>,
    annotator: &Annotator,
    params: &DetectParams,
) -> Result<u64, ApiError> {
    let mut frames = 0u64;
    while let Some(frame) = next()? {
        let dynamic = image::DynamicImage::ImageRgb8(frame);
        // Lock per frame so concurrent requests interleave on the model.
        let bboxes = detector
            .lock()
            .unwrap()
            .detect(&dynamic, params)
            .map_err(|e| ApiError::Processing(e.to_string()))?;
        let annotated = annotator.annotate(&dynamic, &flatten(&bboxes));
        sink(&annotated)?;
        frames += 1;
    }
    Ok(frames)
}

/// Holds the output temp file alive until the last byte has been streamed
/// out, then deletes it on drop.
struct CleanupStream {
    inner: ReaderStream<tokio::fs::File>,
    _temp: TempPath,
}

impl Stream for CleanupStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;
    use image::DynamicImage;

    use inference_common::bbox::{Bbox, BboxesByClass};

    struct FixedDetector {
        bboxes: BboxesByClass,
        calls: Arc<AtomicUsize>,
    }

    impl ObjectDetector for FixedDetector {
        fn detect(
            &mut self,
            _image: &DynamicImage,
            _params: &DetectParams,
        ) -> anyhow::Result<BboxesByClass> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bboxes.clone())
        }
    }

    #[test]
    fn every_frame_read_is_written_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector: Mutex<FixedDetector> = Mutex::new(FixedDetector {
            bboxes: vec![
                vec![Bbox {
                    xmin: 1.0,
                    ymin: 1.0,
                    xmax: 6.0,
                    ymax: 6.0,
                    confidence: 0.9,
                }],
                vec![],
            ],
            calls: Arc::clone(&calls),
        });
        let annotator = Annotator::new(None);
        let params = DetectParams::default();

        let mut frames_in = vec![RgbImage::new(8, 8), RgbImage::new(8, 8), RgbImage::new(8, 8)];
        let mut written = Vec::new();
        let frames = annotate_frames(
            || Ok(frames_in.pop()),
            |frame| {
                written.push(frame.dimensions());
                Ok(())
            },
            &detector,
            &annotator,
            &params,
        )
        .unwrap();

        assert_eq!(frames, 3);
        assert_eq!(written, vec![(8, 8); 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_source_writes_no_frames() {
        let detector: Mutex<FixedDetector> = Mutex::new(FixedDetector {
            bboxes: vec![vec![], vec![]],
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let frames = annotate_frames(
            || Ok(None),
            |_| panic!("nothing should be written"),
            &detector,
            &Annotator::new(None),
            &DetectParams::default(),
        )
        .unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn read_failure_aborts_before_writing() {
        let detector: Mutex<FixedDetector> = Mutex::new(FixedDetector {
            bboxes: vec![vec![], vec![]],
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let err = annotate_frames(
            || Err(MediaError::Read("truncated stream".into())),
            |_| panic!("nothing should be written"),
            &detector,
            &Annotator::new(None),
            &DetectParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Processing(_)));
    }

    #[tokio::test]
    async fn output_file_is_deleted_when_stream_is_dropped() {
        let temp = tempfile::Builder::new()
            .suffix(".mp4")
            .tempfile()
            .unwrap();
        std::fs::write(temp.path(), b"fake mp4 bytes").unwrap();
        let temp_path = temp.into_temp_path();
        let on_disk = temp_path.to_path_buf();

        let file = tokio::fs::File::open(&on_disk).await.unwrap();
        let mut stream = CleanupStream {
            inner: ReaderStream::new(file),
            _temp: temp_path,
        };

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"fake mp4 bytes");
        assert!(on_disk.exists());

        drop(stream);
        assert!(!on_disk.exists());
    }
}

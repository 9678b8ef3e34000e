use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;

use crate::MediaError;

const PREROLL_TIMEOUT_SECS: u64 = 10;

/// Stream properties discovered while prerolling the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Raw frame rate as reported by the container; may be zero or junk.
    /// Run it through `sanitize_fps` before using it for output timing.
    pub fps: f64,
}

/// Sequential RGB frame source backed by a decodebin pipeline.
pub struct FrameReader {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    info: MediaInfo,
}

impl FrameReader {
    /// Opens a container file and prerolls it far enough to learn its
    /// dimensions and frame rate. Fails if the file cannot be decoded.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        gst::init().map_err(|e| MediaError::Open(e.to_string()))?;

        let location = path
            .to_str()
            .ok_or_else(|| MediaError::Open(format!("non-utf8 path: {path:?}")))?;
        let pipeline_str = format!(
            "filesrc location=\"{location}\" ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=8"
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| MediaError::Open(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| MediaError::Open("launch did not yield a pipeline".into()))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| MediaError::Open("appsink element missing".into()))?;

        let info = match preroll(&pipeline, &appsink) {
            Ok(info) => info,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        Ok(Self {
            pipeline,
            appsink,
            info,
        })
    }

    pub fn info(&self) -> MediaInfo {
        self.info
    }

    /// Pulls the next decoded frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => return Ok(None),
            Err(e) => return Err(MediaError::Read(e.to_string())),
        };

        let caps = sample
            .caps()
            .ok_or_else(|| MediaError::Read("sample without caps".into()))?;
        let vinfo = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| MediaError::Read(e.to_string()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| MediaError::Read("sample without buffer".into()))?;
        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &vinfo)
            .map_err(|e| MediaError::Read(e.to_string()))?;

        let (width, height) = (vinfo.width(), vinfo.height());
        let stride = frame.plane_stride()[0] as usize;
        let data = frame
            .plane_data(0)
            .map_err(|e| MediaError::Read(e.to_string()))?;

        // Rows may be stride-padded; copy them out tightly packed.
        let row_len = width as usize * 3;
        let mut raw = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            raw.extend_from_slice(&data[start..start + row_len]);
        }

        RgbImage::from_vec(width, height, raw)
            .map(Some)
            .ok_or_else(|| MediaError::Read("frame buffer size mismatch".into()))
    }
}

fn preroll(pipeline: &gst::Pipeline, appsink: &gst_app::AppSink) -> Result<MediaInfo, MediaError> {
    pipeline
        .set_state(gst::State::Paused)
        .map_err(|e| MediaError::Open(e.to_string()))?;

    let (state_res, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    state_res.map_err(|e| MediaError::Open(format!("preroll failed: {e}")))?;

    let sample = appsink
        .pull_preroll()
        .map_err(|e| MediaError::Open(format!("no decodable video stream: {e}")))?;
    let caps = sample
        .caps()
        .ok_or_else(|| MediaError::Open("preroll sample without caps".into()))?;
    let vinfo =
        gst_video::VideoInfo::from_caps(caps).map_err(|e| MediaError::Open(e.to_string()))?;

    let fps = vinfo.fps();
    let fps = if fps.denom() > 0 {
        fps.numer() as f64 / fps.denom() as f64
    } else {
        0.0
    };

    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| MediaError::Open(e.to_string()))?;

    Ok(MediaInfo {
        width: vinfo.width(),
        height: vinfo.height(),
        fps,
    })
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

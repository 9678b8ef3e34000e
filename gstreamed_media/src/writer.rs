use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use image::RgbImage;

use crate::MediaError;

/// Ordered encoder preference: browser-friendly H.264 first, plain MPEG-4 as
/// the last resort. First candidate whose element exists and whose pipeline
/// starts wins.
pub const ENCODER_CANDIDATES: [(&str, &str); 3] = [
    ("x264enc", "x264enc speed-preset=ultrafast tune=zerolatency"),
    ("openh264enc", "openh264enc"),
    ("avenc_mpeg4", "avenc_mpeg4"),
];

const FINALIZE_TIMEOUT_SECS: u64 = 30;
const NSECS_PER_SEC: u64 = 1_000_000_000;

/// Sequential mp4 sink fed through appsrc.
pub struct FrameWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    codec: &'static str,
    width: u32,
    height: u32,
    fps: u64,
    frames_written: u64,
}

impl FrameWriter {
    /// Opens an mp4 sink at `path`, walking `ENCODER_CANDIDATES` in order
    /// until one opens. Fails with `MediaError::Encoder` when none do.
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, MediaError> {
        gst::init().map_err(|e| MediaError::Write(e.to_string()))?;

        let location = path
            .to_str()
            .ok_or_else(|| MediaError::Write(format!("non-utf8 path: {path:?}")))?;
        let fps = fps.max(1) as u64;

        let mut tried = Vec::new();
        for (name, launch) in ENCODER_CANDIDATES {
            tried.push(name);
            if gst::ElementFactory::find(name).is_none() {
                log::debug!("Encoder {name} not available, trying next");
                continue;
            }

            let pipeline_str = format!(
                "appsrc name=src block=true format=time \
                 caps=video/x-raw,format=RGB,width={width},height={height},framerate={fps}/1 ! \
                 videoconvert ! {launch} ! mp4mux ! filesink location=\"{location}\""
            );
            let pipeline = match gst::parse::launch(&pipeline_str) {
                Ok(element) => element,
                Err(e) => {
                    log::warn!("Encoder {name} pipeline rejected: {e}");
                    continue;
                }
            };
            let pipeline = match pipeline.downcast::<gst::Pipeline>() {
                Ok(pipeline) => pipeline,
                Err(_) => continue,
            };
            let appsrc = match pipeline
                .by_name("src")
                .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            {
                Some(appsrc) => appsrc,
                None => continue,
            };

            if pipeline.set_state(gst::State::Playing).is_err() {
                log::warn!("Encoder {name} failed to start, trying next");
                let _ = pipeline.set_state(gst::State::Null);
                continue;
            }

            log::info!("Opened {width}x{height}@{fps}fps mp4 sink with {name}");
            return Ok(Self {
                pipeline,
                appsrc,
                codec: name,
                width,
                height,
                fps,
                frames_written: 0,
            });
        }

        Err(MediaError::Encoder(tried.join(", ")))
    }

    pub fn codec(&self) -> &'static str {
        self.codec
    }

    /// Appends one frame; frames must match the dimensions the sink was
    /// opened with.
    pub fn push(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MediaError::Write(format!(
                "frame size {:?} does not match sink {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            )));
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.as_raw().clone());
        let buffer_ref = buffer
            .get_mut()
            .ok_or_else(|| MediaError::Write("buffer not writable".into()))?;
        buffer_ref.set_pts(Some(gst::ClockTime::from_nseconds(
            self.frames_written * NSECS_PER_SEC / self.fps,
        )));
        buffer_ref.set_duration(Some(gst::ClockTime::from_nseconds(NSECS_PER_SEC / self.fps)));

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| MediaError::Write(e.to_string()))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Signals end of stream and waits for the muxer to finalize the file.
    /// Returns the number of frames written.
    pub fn finish(self) -> Result<u64, MediaError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| MediaError::Finalize(e.to_string()))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| MediaError::Finalize("pipeline without bus".into()))?;
        let mut reached_eos = false;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => {
                    reached_eos = true;
                    break;
                }
                MessageView::Error(err) => {
                    return Err(MediaError::Finalize(err.error().to_string()));
                }
                _ => {}
            }
        }

        let _ = self.pipeline.set_state(gst::State::Null);
        if !reached_eos {
            return Err(MediaError::Finalize(
                "timed out waiting for end of stream".into(),
            ));
        }
        Ok(self.frames_written)
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_preference_starts_with_h264() {
        assert_eq!(ENCODER_CANDIDATES[0].0, "x264enc");
        assert_eq!(ENCODER_CANDIDATES.last().map(|(name, _)| *name), Some("avenc_mpeg4"));
    }

    #[test]
    fn every_candidate_launch_names_its_element() {
        for (name, launch) in ENCODER_CANDIDATES {
            assert!(launch.starts_with(name));
        }
    }
}

//! Video container read/write glue over GStreamer.
//!
//! `FrameReader` turns a container file into a sequence of RGB frames,
//! `FrameWriter` encodes RGB frames back into an mp4, trying a prioritized
//! list of encoders until one opens.

pub mod reader;
pub mod writer;

pub use reader::{FrameReader, MediaInfo};
pub use writer::{FrameWriter, ENCODER_CANDIDATES};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("could not open video source: {0}")]
    Open(String),
    #[error("no usable encoder, tried: {0}")]
    Encoder(String),
    #[error("failed reading frame: {0}")]
    Read(String),
    #[error("failed writing frame: {0}")]
    Write(String),
    #[error("encoder did not finalize output: {0}")]
    Finalize(String),
}

/// Substitutes a safe default when the container reports an unreadable or
/// implausible frame rate, so output timing never degenerates.
pub fn sanitize_fps(raw: f64) -> u32 {
    if !raw.is_finite() || raw < 1.0 || raw > 60.0 {
        30
    } else {
        raw.round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fps_falls_back_to_default() {
        assert_eq!(sanitize_fps(0.0), 30);
    }

    #[test]
    fn implausibly_high_fps_falls_back_to_default() {
        assert_eq!(sanitize_fps(240.0), 30);
        assert_eq!(sanitize_fps(60.1), 30);
    }

    #[test]
    fn unreadable_fps_falls_back_to_default() {
        assert_eq!(sanitize_fps(f64::NAN), 30);
        assert_eq!(sanitize_fps(-25.0), 30);
    }

    #[test]
    fn plausible_fps_is_kept() {
        assert_eq!(sanitize_fps(24.0), 24);
        assert_eq!(sanitize_fps(29.97), 30);
        assert_eq!(sanitize_fps(60.0), 60);
    }
}

//! Frame sources.
//!
//! - Synthetic streams (`stub://name?frames=N`) for tests and demos
//! - RTSP streams from IP cameras (feature: rtsp-gstreamer)
//! - Stored video files (feature: rtsp-gstreamer)
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//!
//! Every source yields packed RGB24 `Frame`s with strictly increasing
//! indices, or `None` once the stream has ended. Errors from `next_frame`
//! are per-frame; the monitor decides when repeated failures are fatal.

mod file;
#[cfg(feature = "rtsp-gstreamer")]
mod gst;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod rtsp;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use file::FileSource;
pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Where frames come from and the frame geometry the pipeline agrees on.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// `stub://...`, `rtsp://...`, `/dev/videoN`, or a local file path.
    pub url: String,
    /// Target frame rate. Synthetic sources pace to it; 0 disables pacing.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            target_fps: 10,
            width: 1280,
            height: 720,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A pull-based stream of frames.
pub trait FrameSource: Send {
    /// Human-readable identifier for logs.
    fn describe(&self) -> String;

    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` when the stream has ended for good.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Pick a source implementation from the URL scheme.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let url = config.url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
        return Ok(Box::new(RtspSource::new(config.clone())?));
    }
    if url.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(config.clone())?));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!("webcam capture requires the ingest-v4l2 feature");
        }
    }
    Ok(Box::new(FileSource::new(config.clone())?))
}

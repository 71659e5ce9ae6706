//! RTSP frame source for IP cameras.

use anyhow::Result;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

#[cfg(feature = "rtsp-gstreamer")]
use super::gst::{rgb_sink, GstreamerSource};

/// Live RTSP stream decoded through GStreamer.
///
/// The appsink keeps one buffer and drops older ones, so a slow consumer
/// always sees the newest picture.
pub struct RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerSource,
    #[cfg(not(feature = "rtsp-gstreamer"))]
    config: SourceConfig,
}

impl RtspSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if !(config.url.starts_with("rtsp://") || config.url.starts_with("rtsps://")) {
            anyhow::bail!("{} is not an RTSP URL", config.url);
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            let description = format!(
                "rtspsrc location={} latency=0 ! decodebin ! {}",
                config.url,
                rgb_sink(&config, false)
            );
            Ok(Self {
                inner: GstreamerSource::new(config, &description)?,
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            let _ = config;
            anyhow::bail!("RTSP requires the rtsp-gstreamer feature")
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for RtspSource {
    fn describe(&self) -> String {
        self.inner.stats().source
    }

    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[cfg(not(feature = "rtsp-gstreamer"))]
impl FrameSource for RtspSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<()> {
        anyhow::bail!("RTSP requires the rtsp-gstreamer feature")
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        anyhow::bail!("RTSP requires the rtsp-gstreamer feature")
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            source: self.config.url.clone(),
        }
    }
}

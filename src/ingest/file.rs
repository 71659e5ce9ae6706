//! Stored video files, played back at their native rate.
//!
//! Only local paths are accepted; anything with a URL scheme is refused.

use anyhow::{anyhow, Result};
use std::path::Path;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

#[cfg(feature = "rtsp-gstreamer")]
use super::gst::{rgb_sink, GstreamerSource};

pub struct FileSource {
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerSource,
    #[cfg(not(feature = "rtsp-gstreamer"))]
    config: SourceConfig,
}

impl FileSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if !is_local_file_path(&config.url) {
            return Err(anyhow!(
                "file playback only supports local paths (no URL schemes): {}",
                config.url
            ));
        }
        if !Path::new(&config.url).is_file() {
            return Err(anyhow!("video file {} does not exist", config.url));
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            let description = format!(
                "filesrc location=\"{}\" ! decodebin ! {}",
                config.url.replace('"', "\\\""),
                rgb_sink(&config, true)
            );
            Ok(Self {
                inner: GstreamerSource::new(config, &description)?,
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            let _ = config;
            Err(anyhow!("file playback requires the rtsp-gstreamer feature"))
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for FileSource {
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
impl FrameSource for FileSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<()> {
        Err(anyhow!("file playback requires the rtsp-gstreamer feature"))
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Err(anyhow!("file playback requires the rtsp-gstreamer feature"))
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

fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SourceConfig {
        SourceConfig {
            url: url.into(),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn local_paths_only() {
        assert!(is_local_file_path("/var/lib/hazard/clip.mp4"));
        assert!(is_local_file_path("clip.mp4"));
        assert!(!is_local_file_path("https://example.com/clip.mp4"));
        assert!(!is_local_file_path("  "));
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = FileSource::new(config("/nonexistent/hazard-zone/clip.mp4"))
            .err()
            .expect("missing file");
        assert!(err.to_string().contains("does not exist"));
    }
}

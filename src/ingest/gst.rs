//! Shared GStreamer appsink plumbing for RTSP and file sources.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use std::time::{Duration, Instant};

use super::{SourceConfig, SourceStats};
use crate::frame::Frame;

/// Caps and sink tail appended to every pipeline description.
pub(super) fn rgb_sink(config: &SourceConfig, sync: bool) -> String {
    format!(
        "videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={} ! \
         appsink name=appsink sync={} max-buffers=1 drop=true",
        config.width, config.height, sync
    )
}

pub(super) struct GstreamerSource {
    config: SourceConfig,
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    ended: bool,
}

impl GstreamerSource {
    pub(super) fn new(config: SourceConfig, description: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::parse::launch(description)
            .with_context(|| format!("build pipeline for {}", config.url))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("{} pipeline is not a Pipeline", config.url))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            ended: false,
        })
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("set {} pipeline to Playing", self.config.url))?;
        self.connected_at = Some(Instant::now());
        log::info!("connected to {}", self.config.url);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}", err));
        }
        if self.ended {
            return Ok(None);
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                log::info!("{} reached end of stream", self.config.url);
                self.ended = true;
                return Ok(None);
            }
            return Err(anyhow!("{} stalled", self.config.url));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(self.frame_count, width, height, pixels).map(Some)
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => self.ended = true,
                _ => {}
            }
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("{} pipeline teardown: {}", self.config.url, e);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}

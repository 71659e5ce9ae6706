use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

/// Synthetic source for `stub://` URLs.
///
/// Produces a moving test pattern. `stub://name?frames=N` ends the stream
/// after N frames; without it the stream is endless.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero frame size"));
        }
        let frame_limit = parse_frame_limit(&config.url)?;
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            next_due: None,
        })
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps as f64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }

    /// Vertical bar sweeping across a gradient.
    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let bar = (self.frame_count as usize * 8) % w;
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % w, i / w);
            let lit = x.abs_diff(bar) < 4;
            px[0] = if lit { 255 } else { (x * 255 / w) as u8 };
            px[1] = if lit { 255 } else { (y * 255 / h) as u8 };
            px[2] = (self.frame_count % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(self.frame_count, self.config.width, self.config.height, pixels).map(Some)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

fn parse_frame_limit(url: &str) -> Result<Option<u64>> {
    let Some(query) = url.split_once('?').map(|(_, q)| q) else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(("frames", value)) = pair.split_once('=') {
            let limit = value
                .parse::<u64>()
                .map_err(|_| anyhow!("stub frames={} is not a frame count", value))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SourceConfig {
        SourceConfig {
            url: url.to_string(),
            target_fps: 0,
            width: 16,
            height: 8,
        }
    }

    #[test]
    fn synthetic_source_produces_indexed_frames() -> Result<()> {
        let mut source = SyntheticSource::new(config("stub://test"))?;
        source.connect()?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_eq!((a.width, a.height), (16, 8));
        assert_eq!(a.pixels().len(), 16 * 8 * 3);
        assert!(b.index > a.index);
        assert_ne!(a.pixels(), b.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut source = SyntheticSource::new(config("stub://test?frames=3"))?;
        for _ in 0..3 {
            assert!(source.next_frame()?.is_some());
        }
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn bad_frame_limit_is_rejected() {
        assert!(SyntheticSource::new(config("stub://test?frames=many")).is_err());
    }

    #[test]
    fn pacing_follows_target_fps() -> Result<()> {
        let mut source = SyntheticSource::new(SourceConfig {
            target_fps: 50,
            ..config("stub://paced")
        })?;
        let start = Instant::now();
        for _ in 0..4 {
            source.next_frame()?;
        }
        // First frame is immediate, the next three wait ~20ms each.
        assert!(start.elapsed() >= Duration::from_millis(55));
        Ok(())
    }
}

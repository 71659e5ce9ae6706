use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Parameters for the synthetic walker.
#[derive(Clone, Debug)]
pub struct ScriptedConfig {
    pub label: String,
    pub confidence: f32,
    /// Frames for one left-to-right crossing of the frame.
    pub period_frames: u64,
    /// Ground line of the walker, as a fraction of frame height.
    pub ground_y: f64,
    /// Probability that a frame reports nothing (missed detection).
    pub miss_rate: f64,
    /// Uniform positional noise, in pixels.
    pub jitter_px: f64,
    pub seed: u64,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            label: "person".to_string(),
            confidence: 0.8,
            period_frames: 100,
            ground_y: 0.8,
            miss_rate: 0.0,
            jitter_px: 0.0,
            seed: 7,
        }
    }
}

/// Deterministic stand-in for a real detector.
///
/// Reports one walker whose position is a function of the frame index, so
/// the same stream always produces the same detections for a given seed.
pub struct ScriptedBackend {
    config: ScriptedConfig,
    rng: StdRng,
}

impl ScriptedBackend {
    pub fn new(config: ScriptedConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Box of the walker at `index` in a `width` x `height` frame, without noise.
    pub fn walker_box(&self, index: u64, width: u32, height: u32) -> BoundingBox {
        let period = self.config.period_frames.max(1);
        let phase = (index % period) as f64 / period as f64;
        let (w, h) = (width as f64, height as f64);
        let box_w = w * 0.06;
        let box_h = h * 0.3;
        let cx = phase * w;
        let bottom = (h * self.config.ground_y).min(h);
        BoundingBox::new(cx - box_w / 2.0, bottom - box_h, cx + box_w / 2.0, bottom)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.config.miss_rate > 0.0 && self.rng.gen_bool(self.config.miss_rate.min(1.0)) {
            return Ok(Vec::new());
        }
        let mut bbox = self.walker_box(frame.index, frame.width, frame.height);
        if self.config.jitter_px > 0.0 {
            let j = self.config.jitter_px;
            let dx = self.rng.gen_range(-j..=j);
            let dy = self.rng.gen_range(-j..=j);
            bbox = BoundingBox::new(bbox.x_min + dx, bbox.y_min + dy, bbox.x_max + dx, bbox.y_max + dy);
        }
        Ok(vec![Detection::new(
            self.config.label.clone(),
            self.config.confidence,
            bbox,
        )])
    }
}

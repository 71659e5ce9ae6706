//! Breach evaluation.
//!
//! One `BreachEvaluator` per stream. It turns each frame's detections into a
//! raw hazard/safe flag against the current zone, debounces the flags over a
//! window of N frames, and reports exactly one `BreachEvent` per state change.
//!
//! The evaluator does no I/O. Events are returned in the `FrameVerdict`; the
//! monitor hands them to the alert sinks.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::detect::Detection;
use crate::error::{HazardError, HazardResult};
use crate::geometry::Point;
use crate::zone::Zone;

pub const DEFAULT_CONFIDENCE: f32 = 0.2;
pub const DEFAULT_DEBOUNCE_FRAMES: usize = 5;

/// Evaluator settings.
#[derive(Clone, Debug, PartialEq)]
pub struct BreachConfig {
    /// Labels that can cause a breach. Matched case-insensitively.
    pub watched_labels: Vec<String>,
    /// Minimum detection confidence, inclusive.
    pub confidence_threshold: f32,
    /// Consecutive agreeing raw flags required to change state.
    pub debounce_frames: usize,
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self {
            watched_labels: vec!["person".to_string()],
            confidence_threshold: DEFAULT_CONFIDENCE,
            debounce_frames: DEFAULT_DEBOUNCE_FRAMES,
        }
    }
}

impl BreachConfig {
    pub fn validate(&self) -> HazardResult<()> {
        if self.watched_labels.iter().all(|l| l.trim().is_empty()) {
            return Err(HazardError::InvalidConfig(
                "at least one watched label is required".to_string(),
            ));
        }
        check_threshold(self.confidence_threshold)?;
        if self.debounce_frames == 0 {
            return Err(HazardError::InvalidConfig(
                "debounce_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_threshold(value: f32) -> HazardResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(HazardError::InvalidConfig(format!(
            "confidence threshold {} outside [0, 1]",
            value
        )));
    }
    Ok(())
}

/// Confidence threshold shared between the evaluator and operator surfaces.
///
/// Cloning shares the same value. Stored as `f32` bits so reads on the
/// processing loop never block.
#[derive(Clone, Debug)]
pub struct SharedThreshold(Arc<AtomicU32>);

impl SharedThreshold {
    pub fn new(value: f32) -> HazardResult<Self> {
        check_threshold(value)?;
        Ok(Self(Arc::new(AtomicU32::new(value.to_bits()))))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Takes effect from the next evaluated frame.
    pub fn set(&self, value: f32) -> HazardResult<()> {
        check_threshold(value)?;
        self.0.store(value.to_bits(), Ordering::Relaxed);
        log::info!("confidence threshold set to {:.2}", value);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachState {
    Safe,
    Hazard,
}

impl BreachState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreachState::Safe => "safe",
            BreachState::Hazard => "hazard",
        }
    }

    pub fn is_hazard(&self) -> bool {
        matches!(self, BreachState::Hazard)
    }
}

impl std::fmt::Display for BreachState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCause {
    /// The debounce window filled with the opposite flag.
    Debounced,
    /// The zone was replaced or cleared while in `Hazard`.
    ZoneReset,
}

/// A debounced state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreachEvent {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub from: BreachState,
    pub to: BreachState,
    pub cause: EventCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_revision: Option<u64>,
    /// Watched detections inside the zone on the triggering frame.
    pub breachers: usize,
}

/// Sliding window of raw flags with all-agree hysteresis.
#[derive(Clone, Debug)]
pub struct Debouncer {
    window: usize,
    recent: VecDeque<BreachState>,
    state: BreachState,
}

impl Debouncer {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            state: BreachState::Safe,
        }
    }

    pub fn state(&self) -> BreachState {
        self.state
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record a raw flag. Returns `(from, to)` when the state changes.
    pub fn push(&mut self, raw: BreachState) -> Option<(BreachState, BreachState)> {
        self.hold(raw);
        if self.recent.len() < self.window || raw == self.state {
            return None;
        }
        if self.recent.iter().all(|flag| *flag == raw) {
            let from = self.state;
            self.state = raw;
            return Some((from, raw));
        }
        None
    }

    /// Record a raw flag without allowing a transition on this frame.
    pub fn hold(&mut self, raw: BreachState) {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(raw);
    }

    /// Back to `Safe` with an empty window. Returns the previous state.
    pub fn reset(&mut self) -> BreachState {
        self.recent.clear();
        std::mem::replace(&mut self.state, BreachState::Safe)
    }
}

/// A watched, confident detection whose ground point is inside the zone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Breacher {
    pub label: String,
    pub confidence: f32,
    pub point: Point,
}

/// Everything the evaluator decided about one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameVerdict {
    pub frame_index: u64,
    pub raw: BreachState,
    /// Debounced state after this frame.
    pub state: BreachState,
    pub breachers: Vec<Breacher>,
    /// Malformed detections excluded from this frame.
    pub rejected: usize,
    pub detection_failed: bool,
    pub events: Vec<BreachEvent>,
}

pub struct BreachEvaluator {
    watched: Vec<String>,
    threshold: SharedThreshold,
    debouncer: Debouncer,
    last_frame: Option<u64>,
    seen_revision: Option<u64>,
}

impl BreachEvaluator {
    pub fn new(config: &BreachConfig) -> HazardResult<Self> {
        config.validate()?;
        let threshold = SharedThreshold::new(config.confidence_threshold)?;
        Ok(Self::with_threshold(config, threshold))
    }

    /// Use an existing shared threshold; `config.confidence_threshold` is ignored.
    pub fn with_threshold(config: &BreachConfig, threshold: SharedThreshold) -> Self {
        let watched = config
            .watched_labels
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        Self {
            watched,
            threshold,
            debouncer: Debouncer::new(config.debounce_frames),
            last_frame: None,
            seen_revision: None,
        }
    }

    pub fn threshold(&self) -> &SharedThreshold {
        &self.threshold
    }

    pub fn state(&self) -> BreachState {
        self.debouncer.state()
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Evaluate a frame whose detector call may have failed.
    ///
    /// A failed detector call counts as a frame with no detections.
    pub fn evaluate_outcome(
        &mut self,
        frame_index: u64,
        outcome: HazardResult<Vec<Detection>>,
        zone: Option<&Zone>,
        store_revision: u64,
    ) -> HazardResult<FrameVerdict> {
        match outcome {
            Ok(detections) => self.evaluate(frame_index, &detections, zone, store_revision),
            Err(err) => {
                log::warn!("frame {}: {}; evaluating as empty", frame_index, err);
                let mut verdict = self.evaluate(frame_index, &[], zone, store_revision)?;
                verdict.detection_failed = true;
                Ok(verdict)
            }
        }
    }

    /// Evaluate one frame against the zone snapshot `(zone, store_revision)`.
    ///
    /// Fails only with `FrameOutOfOrder`, in which case state is untouched.
    pub fn evaluate(
        &mut self,
        frame_index: u64,
        detections: &[Detection],
        zone: Option<&Zone>,
        store_revision: u64,
    ) -> HazardResult<FrameVerdict> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(HazardError::FrameOutOfOrder {
                    index: frame_index,
                    last,
                });
            }
        }
        self.last_frame = Some(frame_index);

        let mut events = Vec::new();
        if self.seen_revision.is_some_and(|seen| seen != store_revision) {
            log::info!("zone revision {} active, breach state reset", store_revision);
            if let Some(event) = self.reset(frame_index, zone) {
                events.push(event);
            }
        }
        // One event per frame: a frame that reset the state cannot also re-arm it.
        let reset_emitted = !events.is_empty();
        self.seen_revision = Some(store_revision);

        let Some(zone) = zone else {
            if let Some(event) = self.reset(frame_index, None) {
                events.push(event);
            }
            return Ok(FrameVerdict {
                frame_index,
                raw: BreachState::Safe,
                state: BreachState::Safe,
                breachers: Vec::new(),
                rejected: 0,
                detection_failed: false,
                events,
            });
        };

        let threshold = self.threshold.get();
        let mut rejected = 0;
        let mut breachers = Vec::new();
        for detection in detections {
            if let Err(err) = detection.validate() {
                log::debug!("frame {}: {}", frame_index, err);
                rejected += 1;
                continue;
            }
            if detection.confidence < threshold || !self.is_watched(&detection.label) {
                continue;
            }
            let point = detection.bbox.bottom_center();
            if zone.contains(point) {
                breachers.push(Breacher {
                    label: detection.label.clone(),
                    confidence: detection.confidence,
                    point,
                });
            }
        }

        let raw = if breachers.is_empty() {
            BreachState::Safe
        } else {
            BreachState::Hazard
        };
        let transition = if reset_emitted {
            self.debouncer.hold(raw);
            None
        } else {
            self.debouncer.push(raw)
        };
        if let Some((from, to)) = transition {
            log::info!(
                "frame {}: {} -> {} ({} in {})",
                frame_index,
                from,
                to,
                breachers.len(),
                zone.id()
            );
            events.push(BreachEvent {
                frame_index,
                timestamp_ms: crate::now_ms(),
                from,
                to,
                cause: EventCause::Debounced,
                zone_id: Some(zone.id().to_string()),
                zone_revision: Some(zone.revision()),
                breachers: breachers.len(),
            });
        }

        Ok(FrameVerdict {
            frame_index,
            raw,
            state: self.debouncer.state(),
            breachers,
            rejected,
            detection_failed: false,
            events,
        })
    }

    fn is_watched(&self, label: &str) -> bool {
        let label = label.trim();
        self.watched.iter().any(|w| w.eq_ignore_ascii_case(label))
    }

    fn reset(&mut self, frame_index: u64, zone: Option<&Zone>) -> Option<BreachEvent> {
        let previous = self.debouncer.reset();
        if !previous.is_hazard() {
            return None;
        }
        log::info!("frame {}: hazard -> safe (zone reset)", frame_index);
        Some(BreachEvent {
            frame_index,
            timestamp_ms: crate::now_ms(),
            from: BreachState::Hazard,
            to: BreachState::Safe,
            cause: EventCause::ZoneReset,
            zone_id: zone.map(|z| z.id().to_string()),
            zone_revision: zone.map(Zone::revision),
            breachers: 0,
        })
    }
}

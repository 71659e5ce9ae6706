//! Hazard Zone
//!
//! Watches a camera feed for people (or other watched objects) entering an
//! operator-drawn danger zone and drives an alarm while anyone is inside.
//!
//! # Architecture
//!
//! Frames flow through one pipeline with a single decision point:
//!
//! 1. **Ingest**: a capture thread pulls RGB frames from a `FrameSource`
//!    into a depth-1 slot. Stale frames are replaced, never queued.
//! 2. **Detect**: a `DetectorBackend` turns each frame into labelled boxes.
//! 3. **Evaluate**: the bottom-center of every watched box is tested against
//!    the active zone polygon, and the raw verdict is debounced over the
//!    last N frames.
//! 4. **Alert**: each Safe/Hazard transition is fanned out to alert sinks
//!    (log, serial alarm controller, MQTT, terminal indicator).
//!
//! The zone and confidence threshold can be changed while running, from the
//! zone file watcher or the loopback operator API.
//!
//! # Module Structure
//!
//! - `geometry`: points, boxes, polygon containment
//! - `zone`: the active zone, its revision counter, zone files
//! - `frame`: frames and the depth-1 frame slot
//! - `ingest`: frame sources (synthetic, RTSP, files, V4L2)
//! - `detect`: detector backends
//! - `breach`: debouncing and breach evaluation
//! - `alert`: alert sinks and fan-out
//! - `pipeline`: the monitor loop and its status
//! - `api`: loopback operator API
//! - `config`: file and environment configuration

use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod api;
pub mod breach;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pipeline;
pub mod zone;

pub use alert::{AlertFanout, AlertSink, LogSink};
pub use breach::{
    BreachConfig, BreachEvaluator, BreachEvent, BreachState, Debouncer, EventCause,
    SharedThreshold,
};
pub use config::MonitorConfig;
pub use detect::{Detection, DetectorBackend};
pub use error::{HazardError, HazardResult};
pub use frame::{Frame, FrameSlot};
pub use geometry::{BoundingBox, Point, Polygon};
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use pipeline::{Monitor, MonitorOptions, MonitorStatus, RunSummary, StreamEnd};
pub use zone::{Zone, ZoneFile, ZoneStore};

/// Wall-clock milliseconds since the Unix epoch. A clock set before 1970
/// reads as zero.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

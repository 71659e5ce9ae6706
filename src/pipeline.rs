//! The monitor: capture worker, depth-1 handoff and the processing loop.
//!
//! ```text
//! FrameSource --(capture thread)--> FrameSlot --> detector --> BreachEvaluator --> AlertFanout
//!                                                                 ^
//!                                                             ZoneStore
//! ```
//!
//! Frames are evaluated one at a time, in order, on the caller's thread.
//! Stopping is checked between frames, so an evaluation in progress always
//! finishes and delivers its events before the loop exits.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::AlertFanout;
use crate::breach::{BreachEvaluator, BreachEvent, BreachState, FrameVerdict};
use crate::detect::DetectorBackend;
use crate::error::{HazardError, HazardResult};
use crate::frame::{Frame, FrameSlot, SlotClose, SlotTake};
use crate::ingest::FrameSource;
use crate::zone::ZoneStore;

const SLOT_POLL: Duration = Duration::from_millis(100);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Why a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum StreamEnd {
    /// The source reported end of stream.
    Ended,
    /// The stop flag was raised.
    Stopped,
    /// The source failed too many times in a row.
    SourceFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detection_failures: u64,
    pub events_emitted: u64,
    pub end: StreamEnd,
}

/// Live view of the monitor, shared with the operator API and the terminal UI.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub state: BreachState,
    pub running: bool,
    pub source: String,
    pub source_healthy: bool,
    pub last_frame_index: Option<u64>,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detection_failures: u64,
    pub rejected_detections: u64,
    pub events_emitted: u64,
    pub last_event: Option<BreachEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<StreamEnd>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: BreachState::Safe,
            running: false,
            source: String::new(),
            source_healthy: false,
            last_frame_index: None,
            frames_processed: 0,
            frames_dropped: 0,
            detection_failures: 0,
            rejected_detections: 0,
            events_emitted: 0,
            last_event: None,
            end: None,
        }
    }
}

#[derive(Default)]
pub struct MonitorStatus {
    inner: Mutex<StatusSnapshot>,
}

impl MonitorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        f(&mut self.lock());
    }
}

#[derive(Clone, Debug)]
pub struct MonitorOptions {
    /// Consecutive source errors tolerated before the run ends.
    pub max_consecutive_failures: u32,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
        }
    }
}

pub struct Monitor {
    evaluator: BreachEvaluator,
    detector: Box<dyn DetectorBackend>,
    zones: Arc<ZoneStore>,
    alerts: AlertFanout,
    status: Arc<MonitorStatus>,
    frames_processed: u64,
    detection_failures: u64,
    events_emitted: u64,
}

impl Monitor {
    pub fn new(
        evaluator: BreachEvaluator,
        detector: Box<dyn DetectorBackend>,
        zones: Arc<ZoneStore>,
        alerts: AlertFanout,
    ) -> Self {
        Self {
            evaluator,
            detector,
            zones,
            alerts,
            status: Arc::new(MonitorStatus::new()),
            frames_processed: 0,
            detection_failures: 0,
            events_emitted: 0,
        }
    }

    pub fn status(&self) -> Arc<MonitorStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> BreachState {
        self.evaluator.state()
    }

    /// Detect, evaluate and deliver events for one frame.
    ///
    /// Detector errors count as an empty frame. The only error returned is
    /// `FrameOutOfOrder`, which leaves all state unchanged.
    pub fn process(&mut self, frame: &Frame) -> HazardResult<FrameVerdict> {
        let detections = self
            .detector
            .detect(frame)
            .map_err(|e| HazardError::DetectionFailure(format!("{:#}", e)));
        let (zone, revision) = self.zones.snapshot();
        let verdict =
            self.evaluator
                .evaluate_outcome(frame.index, detections, zone.as_deref(), revision)?;

        for event in &verdict.events {
            self.alerts.deliver(event);
        }
        self.frames_processed += 1;
        self.events_emitted += verdict.events.len() as u64;
        if verdict.detection_failed {
            self.detection_failures += 1;
        }
        self.status.update(|s| {
            s.state = verdict.state;
            s.last_frame_index = Some(frame.index);
            s.frames_processed = self.frames_processed;
            s.detection_failures = self.detection_failures;
            s.rejected_detections += verdict.rejected as u64;
            s.events_emitted = self.events_emitted;
            if let Some(event) = verdict.events.last() {
                s.last_event = Some(event.clone());
            }
        });
        Ok(verdict)
    }

    /// Run until the source ends, fails for good, or `stop` is raised.
    pub fn run(
        &mut self,
        source: Box<dyn FrameSource>,
        stop: Arc<AtomicBool>,
        options: &MonitorOptions,
    ) -> RunSummary {
        let slot = Arc::new(FrameSlot::new());
        let description = source.describe();
        log::info!(
            "monitoring {} with detector {} (sinks: {})",
            description,
            self.detector.name(),
            self.alerts.names().join(", ")
        );
        self.status.update(|s| {
            s.running = true;
            s.source = description;
            s.end = None;
        });

        let capture = spawn_capture(
            source,
            slot.clone(),
            stop.clone(),
            self.status.clone(),
            options.max_consecutive_failures.max(1),
        );

        let end = loop {
            if stop.load(Ordering::SeqCst) {
                break StreamEnd::Stopped;
            }
            match slot.take(SLOT_POLL) {
                SlotTake::Frame(frame) => {
                    if let Err(err) = self.process(&frame) {
                        log::warn!("skipping frame: {}", err);
                    }
                    let dropped = slot.dropped();
                    self.status.update(|s| s.frames_dropped = dropped);
                }
                SlotTake::Empty => {}
                SlotTake::Closed(SlotClose::Ended) => {
                    break if stop.load(Ordering::SeqCst) {
                        StreamEnd::Stopped
                    } else {
                        StreamEnd::Ended
                    };
                }
                SlotTake::Closed(SlotClose::Failed(reason)) => {
                    break StreamEnd::SourceFailed(reason);
                }
            }
        };

        // The capture thread exits on its own once the slot is closed or stop
        // is raised; make sure one of the two holds before joining.
        slot.close(SlotClose::Ended);
        if capture.join().is_err() {
            log::error!("capture thread panicked");
        }

        let summary = RunSummary {
            frames_processed: self.frames_processed,
            frames_dropped: slot.dropped(),
            detection_failures: self.detection_failures,
            events_emitted: self.events_emitted,
            end,
        };
        self.status.update(|s| {
            s.running = false;
            s.frames_dropped = summary.frames_dropped;
            s.end = Some(summary.end.clone());
        });
        match &summary.end {
            StreamEnd::SourceFailed(reason) => log::error!("frame source failed: {}", reason),
            end => log::info!("monitor finished: {:?}", end),
        }
        summary
    }
}

/// Consecutive-failure budget for the capture worker.
struct Retry {
    failures: u32,
    max: u32,
}

impl Retry {
    /// Record a failure. Returns the close reason once the budget is spent,
    /// otherwise backs off before the next attempt.
    fn fail(&mut self, source: &str, err: &anyhow::Error) -> Option<SlotClose> {
        self.failures += 1;
        log::warn!("{}: {:#} ({}/{})", source, err, self.failures, self.max);
        if self.failures >= self.max {
            return Some(SlotClose::Failed(format!("{:#}", err)));
        }
        std::thread::sleep((SLOT_POLL * self.failures).min(MAX_RETRY_BACKOFF));
        None
    }
}

fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    status: Arc<MonitorStatus>,
    max_failures: u32,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut retry = Retry {
            failures: 0,
            max: max_failures,
        };
        let mut connected = false;
        let mut last_index: Option<u64> = None;

        let close = loop {
            if stop.load(Ordering::SeqCst) {
                break SlotClose::Ended;
            }
            if !connected {
                match source.connect() {
                    Ok(()) => connected = true,
                    Err(err) => {
                        if let Some(close) = retry.fail(&source.describe(), &err) {
                            break close;
                        }
                    }
                }
                continue;
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    retry.failures = 0;
                    if last_index.is_some_and(|last| frame.index <= last) {
                        log::warn!("source repeated frame index {}; discarded", frame.index);
                        continue;
                    }
                    last_index = Some(frame.index);
                    if !slot.put(frame) {
                        return;
                    }
                }
                Ok(None) => break SlotClose::Ended,
                Err(err) => {
                    if let Some(close) = retry.fail(&source.describe(), &err) {
                        break close;
                    }
                }
            }
            let healthy = source.is_healthy();
            status.update(|s| s.source_healthy = healthy);
        };

        status.update(|s| s.source_healthy = false);
        slot.close(close);
    })
}

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use hazard_zone::{
    alert::{AlertFanout, ChannelSink},
    detect::{ScriptedBackend, ScriptedConfig, StubBackend},
    frame::Frame,
    geometry::Point,
    ingest::{open_source, FrameSource, SourceConfig, SourceStats},
    pipeline::{Monitor, MonitorOptions, StreamEnd},
    zone::ZoneStore,
    BreachConfig, BreachEvaluator, BreachEvent, BreachState, EventCause,
};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

fn middle_zone(zones: &ZoneStore) -> Result<()> {
    let (w, h) = (WIDTH as f64, HEIGHT as f64);
    zones.set_zone(
        "zone:middle",
        vec![
            Point::new(w * 0.4, h * 0.5),
            Point::new(w * 0.6, h * 0.5),
            Point::new(w * 0.6, h),
            Point::new(w * 0.4, h),
        ],
    )?;
    Ok(())
}

fn walker(period_frames: u64) -> ScriptedBackend {
    ScriptedBackend::new(ScriptedConfig {
        period_frames,
        ..ScriptedConfig::default()
    })
}

fn monitor_with_channel(
    zones: Arc<ZoneStore>,
    detector: ScriptedBackend,
) -> Result<(Monitor, mpsc::Receiver<BreachEvent>)> {
    let evaluator = BreachEvaluator::new(&BreachConfig {
        debounce_frames: 3,
        ..BreachConfig::default()
    })?;
    let (tx, rx) = mpsc::channel();
    let alerts = AlertFanout::new().with(Box::new(ChannelSink::new(tx)));
    Ok((Monitor::new(evaluator, Box::new(detector), zones, alerts), rx))
}

#[test]
fn walker_crossing_the_zone_raises_and_clears_hazard() -> Result<()> {
    const FRAMES: u64 = 60;
    let zones = Arc::new(ZoneStore::new());
    middle_zone(&zones)?;
    let (mut monitor, rx) = monitor_with_channel(zones, walker(FRAMES))?;

    let source = open_source(&SourceConfig {
        url: format!("stub://crossing?frames={FRAMES}"),
        target_fps: 100,
        width: WIDTH,
        height: HEIGHT,
    })?;
    let summary = monitor.run(
        source,
        Arc::new(AtomicBool::new(false)),
        &MonitorOptions::default(),
    );

    assert_eq!(summary.end, StreamEnd::Ended);
    assert_eq!(summary.frames_processed + summary.frames_dropped, FRAMES);
    assert_eq!(summary.detection_failures, 0);

    let events: Vec<BreachEvent> = rx.try_iter().collect();
    assert_eq!(events.len() as u64, summary.events_emitted);
    assert_eq!(events.len(), 2, "events: {events:?}");
    assert_eq!(
        (events[0].from, events[0].to),
        (BreachState::Safe, BreachState::Hazard)
    );
    assert_eq!(
        (events[1].from, events[1].to),
        (BreachState::Hazard, BreachState::Safe)
    );
    assert!(events[0].frame_index < events[1].frame_index);
    assert_eq!(events[0].zone_id.as_deref(), Some("zone:middle"));
    assert_eq!(events[0].breachers, 1);
    assert_eq!(monitor.state(), BreachState::Safe);

    let status = monitor.status().snapshot();
    assert!(!status.running);
    assert_eq!(status.frames_processed, summary.frames_processed);
    assert_eq!(status.end, Some(StreamEnd::Ended));
    Ok(())
}

#[test]
fn no_zone_means_no_events() -> Result<()> {
    let zones = Arc::new(ZoneStore::new());
    let (mut monitor, rx) = monitor_with_channel(zones, walker(20))?;

    let source = open_source(&SourceConfig {
        url: "stub://nozone?frames=20".to_string(),
        target_fps: 0,
        width: WIDTH,
        height: HEIGHT,
    })?;
    let summary = monitor.run(
        source,
        Arc::new(AtomicBool::new(false)),
        &MonitorOptions::default(),
    );

    assert_eq!(summary.end, StreamEnd::Ended);
    assert_eq!(summary.events_emitted, 0);
    assert!(rx.try_iter().next().is_none());
    Ok(())
}

#[test]
fn clearing_the_zone_mid_hazard_resets_to_safe() -> Result<()> {
    let zones = Arc::new(ZoneStore::new());
    // Everything in the frame is inside this zone.
    zones.set_zone(
        "zone:all",
        vec![
            Point::new(0.0, 0.0),
            Point::new(WIDTH as f64, 0.0),
            Point::new(WIDTH as f64, HEIGHT as f64),
            Point::new(0.0, HEIGHT as f64),
        ],
    )?;
    let (mut monitor, rx) = monitor_with_channel(zones.clone(), walker(1_000))?;

    let frame = |index: u64| Frame::new(index, WIDTH, HEIGHT, vec![0u8; (WIDTH * HEIGHT * 3) as usize]);
    for index in 1..=3 {
        monitor.process(&frame(index)?)?;
    }
    assert_eq!(monitor.state(), BreachState::Hazard);

    zones.clear_zone();
    let verdict = monitor.process(&frame(4)?)?;
    assert_eq!(verdict.state, BreachState::Safe);

    let events: Vec<BreachEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].cause, EventCause::Debounced);
    assert_eq!(events[1].cause, EventCause::ZoneReset);
    assert_eq!(events[1].to, BreachState::Safe);
    assert_eq!(events[1].frame_index, 4);

    // A stale frame is refused without touching state.
    assert!(monitor.process(&frame(2)?).is_err());
    assert_eq!(monitor.status().snapshot().frames_processed, 4);
    Ok(())
}

struct BrokenSource {
    attempts: u32,
}

impl FrameSource for BrokenSource {
    fn describe(&self) -> String {
        "broken://camera".to_string()
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.attempts += 1;
        Err(anyhow!("decoder error #{}", self.attempts))
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            source: self.describe(),
        }
    }
}

#[test]
fn persistent_source_failure_ends_the_run() -> Result<()> {
    let zones = Arc::new(ZoneStore::new());
    let evaluator = BreachEvaluator::new(&BreachConfig::default())?;
    let mut monitor = Monitor::new(
        evaluator,
        Box::new(StubBackend::new()),
        zones,
        AlertFanout::new(),
    );

    let summary = monitor.run(
        Box::new(BrokenSource { attempts: 0 }),
        Arc::new(AtomicBool::new(false)),
        &MonitorOptions {
            max_consecutive_failures: 3,
        },
    );

    match summary.end {
        StreamEnd::SourceFailed(reason) => assert!(reason.contains("decoder error #3")),
        other => panic!("expected source failure, got {other:?}"),
    }
    assert_eq!(summary.frames_processed, 0);
    Ok(())
}

#[test]
fn stop_flag_ends_an_endless_stream() -> Result<()> {
    let zones = Arc::new(ZoneStore::new());
    middle_zone(&zones)?;
    let (mut monitor, _rx) = monitor_with_channel(zones, walker(50))?;
    let source = open_source(&SourceConfig {
        url: "stub://endless".to_string(),
        target_fps: 50,
        width: WIDTH,
        height: HEIGHT,
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::SeqCst);
        })
    };
    let summary = monitor.run(source, stop, &MonitorOptions::default());
    stopper.join().expect("stopper thread");

    assert_eq!(summary.end, StreamEnd::Stopped);
    assert!(summary.frames_processed > 0);
    Ok(())
}

//! hazardd - danger-zone breach monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (file, `HAZARD_*` environment, CLI flags)
//! 2. Loads the zone file and keeps watching it for changes
//! 3. Serves the loopback operator API
//! 4. Pulls frames from the configured source and runs detection
//! 5. Drives the alarm controller, MQTT and the terminal on every transition
//!
//! Exits with status 2 when the frame source fails for good.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hazard_zone::{
    alert::{AlertFanout, LogSink, MqttSink, SerialSink},
    api::{ApiConfig, ApiServer, ApiState},
    config::MonitorConfig,
    detect::{BackendRegistry, DetectorBackend},
    ingest::open_source,
    pipeline::{Monitor, MonitorOptions, MonitorStatus, StreamEnd},
    zone::{ZoneFileWatcher, ZoneStore},
    BreachEvaluator, SharedThreshold,
};

#[path = "../ui.rs"]
mod ui;

const EXIT_SOURCE_FAILED: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Danger-zone breach monitor")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "HAZARD_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: stub://name, rtsp://..., /dev/videoN or a video file.
    #[arg(long)]
    source: Option<String>,

    /// Detector backend (stub, scripted, tract).
    #[arg(long)]
    detector: Option<String>,

    /// Minimum detection confidence, in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,

    /// Consecutive frames that must agree before the state changes.
    #[arg(long)]
    debounce_frames: Option<usize>,

    /// Zone file to load and watch.
    #[arg(long)]
    zone_file: Option<PathBuf>,

    /// Alarm controller serial port.
    #[arg(long)]
    serial_port: Option<String>,

    /// Run without the alarm controller even if one is configured.
    #[arg(long)]
    no_serial: bool,

    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let config = {
        let _stage = ui.stage("Load configuration");
        let mut config = MonitorConfig::load_from(args.config.as_deref())?;
        apply_args(&mut config, &args);
        config.validate()?;
        config
    };

    let zones = Arc::new(ZoneStore::new());
    let stop = Arc::new(AtomicBool::new(false));
    let watcher = config.zone.file.clone().map(|path| {
        let mut watcher = ZoneFileWatcher::new(path, zones.clone());
        match watcher.poll() {
            Some(zone) => log::info!(
                "zone {} loaded from {} (revision {})",
                zone.id(),
                watcher.path().display(),
                zone.revision()
            ),
            None => log::warn!(
                "no usable zone in {}; every frame is safe until one is set",
                watcher.path().display()
            ),
        }
        spawn_zone_watcher(watcher, config.zone.poll_interval, stop.clone())
    });

    let threshold = SharedThreshold::new(config.breach.confidence_threshold)?;
    let evaluator = BreachEvaluator::with_threshold(&config.breach, threshold.clone());

    let detector = {
        let _stage = ui.stage("Load detector");
        let mut registry = BackendRegistry::from_settings(&config.detector)?;
        registry
            .warm_up()
            .with_context(|| format!("warm up detector {}", config.detector.backend))?;
        registry
    };
    log::info!(
        "detector backend: {} (available: {})",
        detector.default_name().unwrap_or("-"),
        detector.list().join(", ")
    );

    let mut alerts = AlertFanout::new().with(Box::new(LogSink));
    if let Some(serial) = &config.serial {
        let _stage = ui.stage("Open alarm controller");
        match SerialSink::open(serial) {
            Ok(sink) => alerts.push(Box::new(sink)),
            Err(err) => log::warn!("alarm controller unavailable, continuing without it: {:#}", err),
        }
    }
    if let Some(mqtt) = &config.mqtt {
        match MqttSink::connect(mqtt) {
            Ok(sink) => alerts.push(Box::new(sink)),
            Err(err) => log::warn!("mqtt unavailable, continuing without it: {:#}", err),
        }
    }
    alerts.push(Box::new(ui.indicator()));

    let mut monitor = Monitor::new(evaluator, Box::new(detector), zones.clone(), alerts);
    let status = monitor.status();

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        token_path: config.api_token_path.clone(),
    };
    let api_state = ApiState {
        zones,
        status: status.clone(),
        threshold,
    };
    let api_handle = ApiServer::new(api_config, api_state).spawn()?;
    log::info!("operator api listening on {}", api_handle.addr);
    if let Some(path) = &api_handle.token_path {
        log::info!("operator api capability token written to {}", path.display());
    } else {
        log::warn!(
            "operator api capability token (handle securely): {}",
            api_handle.token
        );
    }

    let source = {
        let _stage = ui.stage("Open frame source");
        open_source(&config.source)?
    };

    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let status_line = spawn_status_line(ui.status_line(), status, stop.clone());

    let options = MonitorOptions {
        max_consecutive_failures: config.max_consecutive_failures,
    };
    let summary = monitor.run(source, stop.clone(), &options);

    stop.store(true, Ordering::SeqCst);
    if status_line.join().is_err() {
        log::warn!("status line thread panicked");
    }
    if let Some(watcher) = watcher {
        if watcher.join().is_err() {
            log::warn!("zone watcher thread panicked");
        }
    }
    api_handle.stop()?;
    // Sinks (serial, mqtt) are released here, after the last event.
    drop(monitor);

    log::info!(
        "processed {} frames, dropped {}, {} detection failures, {} events",
        summary.frames_processed,
        summary.frames_dropped,
        summary.detection_failures,
        summary.events_emitted
    );
    match summary.end {
        StreamEnd::Ended => log::info!("stream ended"),
        StreamEnd::Stopped => log::info!("stopped"),
        StreamEnd::SourceFailed(reason) => {
            log::error!("frame source failed: {}", reason);
            std::process::exit(EXIT_SOURCE_FAILED);
        }
    }
    Ok(())
}

fn apply_args(config: &mut MonitorConfig, args: &Args) {
    if let Some(url) = &args.source {
        config.source.url = url.clone();
    }
    if let Some(backend) = &args.detector {
        config.detector.backend = backend.clone();
    }
    if let Some(confidence) = args.confidence {
        config.breach.confidence_threshold = confidence;
    }
    if let Some(frames) = args.debounce_frames {
        config.breach.debounce_frames = frames;
    }
    if let Some(path) = &args.zone_file {
        config.zone.file = Some(path.clone());
    }
    if let Some(port) = &args.serial_port {
        let mut serial = config.serial.clone().unwrap_or_default();
        serial.port = port.clone();
        config.serial = Some(serial);
    }
    if args.no_serial {
        config.serial = None;
    }
}

fn spawn_zone_watcher(
    mut watcher: ZoneFileWatcher,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(interval);
            if let Some(zone) = watcher.poll() {
                log::info!("zone {} reloaded (revision {})", zone.id(), zone.revision());
            }
        }
    })
}

fn spawn_status_line(
    line: ui::StatusLine,
    status: Arc<MonitorStatus>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            line.update(&status.snapshot());
            std::thread::sleep(Duration::from_millis(250));
        }
        line.finish();
    })
}

//! demo - end-to-end synthetic run of the breach monitor
//!
//! A synthetic camera feeds the scripted detector, whose walker crosses the
//! frame once and passes through a zone in the middle. Events and the run
//! summary are printed as JSON lines on stdout.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

use hazard_zone::{
    alert::{AlertFanout, ChannelSink, LogSink},
    detect::{ScriptedBackend, ScriptedConfig},
    geometry::Point,
    ingest::{open_source, SourceConfig},
    pipeline::{Monitor, MonitorOptions},
    zone::{ZoneStore, DEFAULT_ZONE_ID},
    BreachConfig, BreachEvaluator,
};

// The live status line is only driven by hazardd.
#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic video.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic source (0 runs unpaced).
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Consecutive agreeing frames before the state changes.
    #[arg(long, default_value_t = 3)]
    debounce_frames: usize,
    /// Fraction of frames where the detector misses the walker.
    #[arg(long, default_value_t = 0.0)]
    miss_rate: f64,
    /// Box jitter in pixels.
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,
    /// Seed for misses and jitter.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Also write the demo zone to this file.
    #[arg(long)]
    zone_out: Option<PathBuf>,
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

    let frames = (args.seconds * u64::from(args.fps.max(1))).max(1);
    let source_config = SourceConfig {
        url: format!("stub://demo?frames={frames}"),
        target_fps: args.fps,
        width: 640,
        height: 480,
    };

    let zones = Arc::new(ZoneStore::new());
    let zone = {
        let _stage = ui.stage("Set demo zone");
        let (w, h) = (
            f64::from(source_config.width),
            f64::from(source_config.height),
        );
        zones.set_zone(
            DEFAULT_ZONE_ID,
            vec![
                Point::new(w * 0.4, h * 0.5),
                Point::new(w * 0.6, h * 0.5),
                Point::new(w * 0.6, h),
                Point::new(w * 0.4, h),
            ],
        )?
    };
    if let Some(path) = &args.zone_out {
        zone.to_file().write(path)?;
        log::info!("demo zone written to {}", path.display());
    }

    let detector = ScriptedBackend::new(ScriptedConfig {
        period_frames: frames,
        miss_rate: args.miss_rate,
        jitter_px: args.jitter,
        seed: args.seed,
        ..ScriptedConfig::default()
    });
    let evaluator = BreachEvaluator::new(&BreachConfig {
        debounce_frames: args.debounce_frames,
        ..BreachConfig::default()
    })?;

    let (tx, rx) = mpsc::channel();
    let alerts = AlertFanout::new()
        .with(Box::new(LogSink))
        .with(Box::new(ChannelSink::new(tx)))
        .with(Box::new(ui.indicator()));
    let mut monitor = Monitor::new(evaluator, Box::new(detector), zones, alerts);

    let source = open_source(&source_config)?;
    let stop = Arc::new(AtomicBool::new(false));
    let summary = {
        let _stage = ui.stage("Run synthetic stream");
        monitor.run(source, stop, &MonitorOptions::default())
    };

    for event in rx.try_iter() {
        println!("{}", serde_json::to_string(&event)?);
    }
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

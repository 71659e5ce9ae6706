//! zone_tool - draw, check and probe danger-zone files
//!
//! `draw` reads one command per line from stdin:
//!   `x y` or `x,y`  add a point
//!   `undo`          remove the last point
//!   `clear`         start over
//!   `finish`        validate and write the zone file
//!
//! An invalid polygon at `finish` keeps the draft so the operator can fix it.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use hazard_zone::{
    alert::list_ports,
    geometry::Point,
    zone::{validate_zone_id, ZoneDraft, ZoneStore, DEFAULT_ZONE_ID},
};

// Status line and indicator are only driven by hazardd.
#[allow(dead_code)]
#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Draw, check and probe danger-zone files")]
struct Args {
    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enter a zone point by point and write it to a file.
    Draw {
        /// Output zone file.
        #[arg(long, env = "HAZARD_ZONE_FILE")]
        out: PathBuf,
        /// Zone id.
        #[arg(long, default_value = DEFAULT_ZONE_ID)]
        id: String,
    },
    /// Validate a zone file.
    Check {
        file: PathBuf,
    },
    /// Report whether points fall inside the zone.
    Probe {
        file: PathBuf,
        /// Points as `x,y`.
        #[arg(required = true)]
        points: Vec<String>,
    },
    /// List serial ports an alarm controller might be on.
    Ports,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    match args.command {
        Command::Draw { out, id } => draw(&out, &id, stdout_is_tty),
        Command::Check { file } => {
            let store = ZoneStore::new();
            let zone = {
                let _stage = ui.stage("Check zone file");
                store.load_file(&file)?
            };
            println!(
                "{}: {} points, fingerprint {}",
                zone.id(),
                zone.polygon().vertices().len(),
                zone.fingerprint()
            );
            Ok(())
        }
        Command::Probe { file, points } => {
            let store = ZoneStore::new();
            let zone = store.load_file(&file)?;
            for raw in points {
                let point = parse_point(&raw)?;
                let verdict = if zone.contains(point) {
                    "inside"
                } else {
                    "outside"
                };
                println!("{},{} {}", point.x, point.y, verdict);
            }
            Ok(())
        }
        Command::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                eprintln!("no serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
    }
}

fn draw(out: &Path, id: &str, interactive: bool) -> Result<()> {
    validate_zone_id(id)?;
    let store = ZoneStore::new();
    let mut draft = ZoneDraft::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    if interactive {
        println!("enter points as `x y`; `undo`, `clear`, `finish` when done");
    }
    for line in stdin.lock().lines() {
        let line = line?;
        let cmd = line.trim();
        match cmd {
            "" => continue,
            "undo" => match draft.undo() {
                Some(p) => println!("removed {},{}", p.x, p.y),
                None => println!("nothing to undo"),
            },
            "clear" => {
                draft.clear();
                println!("cleared");
            }
            "finish" | "done" => match draft.finish(&store, id) {
                Ok(zone) => {
                    zone.to_file().write(out)?;
                    println!(
                        "wrote {} ({} points) to {}",
                        zone.id(),
                        zone.polygon().vertices().len(),
                        out.display()
                    );
                    return Ok(());
                }
                Err(err) => println!("rejected: {err}; keep editing"),
            },
            _ => match parse_point(cmd) {
                Ok(point) => {
                    draft.push(point);
                    println!("{} point(s)", draft.points().len());
                }
                Err(err) => println!("{err}"),
            },
        }
        stdout.flush()?;
    }
    Err(anyhow!(
        "input ended before `finish`; {} point(s) discarded",
        draft.points().len()
    ))
}

fn parse_point(raw: &str) -> Result<Point> {
    let mut parts = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("expected `x y` or `x,y`, got {:?}", raw));
    };
    let x: f64 = x.parse().with_context(|| format!("bad x in {:?}", raw))?;
    let y: f64 = y.parse().with_context(|| format!("bad y in {:?}", raw))?;
    if !x.is_finite() || !y.is_finite() {
        return Err(anyhow!("coordinates must be finite: {:?}", raw));
    }
    Ok(Point::new(x, y))
}

use anyhow::Result;
use hazard_zone::alert::AlertSink;
use hazard_zone::breach::BreachEvent;
use hazard_zone::pipeline::StatusSnapshot;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    fn spinner(&self, template: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = self.spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// One-line live view of the monitor. Plain mode prints nothing here;
    /// transitions still reach the log and the indicator.
    pub fn status_line(&self) -> StatusLine {
        let bar = self
            .use_pretty()
            .then(|| self.spinner("{spinner} [{elapsed_precise}] {msg}"));
        StatusLine { bar }
    }

    /// Alert sink that makes state changes stand out on the terminal.
    pub fn indicator(&self) -> IndicatorSink {
        IndicatorSink {
            pretty: self.use_pretty(),
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct StatusLine {
    bar: Option<ProgressBar>,
}

impl StatusLine {
    pub fn update(&self, status: &StatusSnapshot) {
        let Some(bar) = &self.bar else {
            return;
        };
        let state = if status.state.is_hazard() {
            "HAZARD"
        } else {
            "safe"
        };
        let source = if status.source_healthy {
            "ok"
        } else {
            "degraded"
        };
        bar.set_message(format!(
            "{state} | frame {} | processed {} dropped {} | events {} | source {}",
            status
                .last_frame_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status.frames_processed,
            status.frames_dropped,
            status.events_emitted,
            source
        ));
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub struct IndicatorSink {
    pretty: bool,
}

impl AlertSink for IndicatorSink {
    fn name(&self) -> &'static str {
        "indicator"
    }

    fn on_event(&mut self, event: &BreachEvent) -> Result<()> {
        let zone = event.zone_id.as_deref().unwrap_or("zone");
        let line = match (event.to.is_hazard(), self.pretty) {
            (true, true) => format!("\x1b[1;31m⚠ HAZARD\x1b[0m {} watched object(s) in {}", event.breachers, zone),
            (true, false) => format!("!! HAZARD: {} watched object(s) in {}", event.breachers, zone),
            (false, true) => format!("\x1b[32m✔ safe\x1b[0m {} is clear", zone),
            (false, false) => format!("-- safe: {} is clear", zone),
        };
        eprintln!("{line} (frame {})", event.frame_index);
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_zone::breach::{BreachState, EventCause};

    #[test]
    fn plain_mode_never_draws() {
        let ui = Ui::from_args(Some("plain"), true, false);
        assert!(!ui.use_pretty());
        let line = ui.status_line();
        assert!(line.bar.is_none());
        line.update(&StatusSnapshot::default());
        line.finish();
    }

    #[test]
    fn pretty_needs_a_terminal() {
        assert!(!Ui::from_args(Some("pretty"), false, false).use_pretty());
        assert!(Ui::from_args(Some("pretty"), true, true).use_pretty());
        assert!(!Ui::from_args(None, true, true).use_pretty());
    }

    #[test]
    fn indicator_accepts_both_transitions() -> Result<()> {
        let mut sink = Ui::from_args(Some("plain"), false, false).indicator();
        assert_eq!(sink.name(), "indicator");
        for (from, to) in [
            (BreachState::Safe, BreachState::Hazard),
            (BreachState::Hazard, BreachState::Safe),
        ] {
            sink.on_event(&BreachEvent {
                frame_index: 9,
                timestamp_ms: 0,
                from,
                to,
                cause: EventCause::Debounced,
                zone_id: Some("zone:danger".to_string()),
                zone_revision: Some(1),
                breachers: 1,
            })?;
        }
        Ok(())
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}

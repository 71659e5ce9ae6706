//! Alert sinks: where `BreachEvent`s go once the evaluator has decided.
//!
//! Sinks never feed back into evaluation. A sink that fails is logged and
//! skipped; the monitor keeps processing frames.

mod mqtt;
mod serial;

use anyhow::{anyhow, Result};
use std::sync::mpsc::Sender;

use crate::breach::BreachEvent;

pub use mqtt::{MqttConfig, MqttSink};
pub use serial::{list_ports, SerialConfig, SerialSink};

/// Consumer of debounced state changes.
pub trait AlertSink: Send {
    fn name(&self) -> &'static str;

    /// Called once per event, in frame order.
    fn on_event(&mut self, event: &BreachEvent) -> Result<()>;
}

/// Writes every event to the log.
#[derive(Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn on_event(&mut self, event: &BreachEvent) -> Result<()> {
        let zone = event.zone_id.as_deref().unwrap_or("-");
        if event.to.is_hazard() {
            log::warn!(
                "HAZARD: {} watched object(s) in {} at frame {} ({:?})",
                event.breachers,
                zone,
                event.frame_index,
                event.cause
            );
        } else {
            log::info!(
                "safe: {} clear at frame {} ({:?})",
                zone,
                event.frame_index,
                event.cause
            );
        }
        Ok(())
    }
}

/// Forwards events over a channel, for UI threads and tests.
pub struct ChannelSink {
    tx: Sender<BreachEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<BreachEvent>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn on_event(&mut self, event: &BreachEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("event receiver dropped"))
    }
}

/// Delivers each event to every registered sink.
#[derive(Default)]
pub struct AlertFanout {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl AlertFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn AlertSink>) {
        log::info!("alert sink registered: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver to all sinks. Returns how many failed.
    pub fn deliver(&mut self, event: &BreachEvent) -> usize {
        let mut failures = 0;
        for sink in &mut self.sinks {
            if let Err(err) = sink.on_event(event) {
                failures += 1;
                log::warn!(
                    "alert sink {} failed for frame {}: {:#}",
                    sink.name(),
                    event.frame_index,
                    err
                );
            }
        }
        failures
    }
}

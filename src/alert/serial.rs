use anyhow::{Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use super::AlertSink;
use crate::breach::{BreachEvent, BreachState};

const HAZARD_BYTE: u8 = b'1';
const SAFE_BYTE: u8 = b'0';
const MAX_REPLY_BYTES: usize = 128;

/// Serial link to an alarm controller (an Arduino sketch, typically).
#[derive(Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Opening the port resets most boards; wait this long before writing.
    pub settle: Duration,
    /// How long to wait for the controller's reply line.
    pub reply_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            settle: Duration::from_secs(2),
            reply_timeout: Duration::from_millis(500),
        }
    }
}

/// Serial ports the OS reports, for the operator to choose from.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Writes `'1'` when the hazard state is entered and `'0'` when safe is
/// entered, then reads back one reply line.
pub struct SerialSink<P = Box<dyn serialport::SerialPort>> {
    port: P,
    label: String,
    reply_timeout: Duration,
    last_reply: Option<String>,
}

impl SerialSink {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.reply_timeout)
            .open()
            .with_context(|| format!("failed to open serial port {}", config.port))?;
        log::info!(
            "serial controller on {} at {} baud, settling {:?}",
            config.port,
            config.baud_rate,
            config.settle
        );
        std::thread::sleep(config.settle);
        Ok(Self::with_port(port, config.port.clone(), config.reply_timeout))
    }
}

impl<P: Read + Write + Send> SerialSink<P> {
    pub fn with_port(port: P, label: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            port,
            label: label.into(),
            reply_timeout,
            last_reply: None,
        }
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    /// Read until newline, timeout, or EOF. Returns the trimmed line if any
    /// bytes arrived.
    fn read_reply(&mut self) -> Result<Option<String>> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while line.len() < MAX_REPLY_BYTES && Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("serial read failed"),
            }
        }
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }
}

impl<P: Read + Write + Send> AlertSink for SerialSink<P> {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn on_event(&mut self, event: &BreachEvent) -> Result<()> {
        let command = match event.to {
            BreachState::Hazard => HAZARD_BYTE,
            BreachState::Safe => SAFE_BYTE,
        };
        self.port
            .write_all(&[command])
            .and_then(|_| self.port.flush())
            .with_context(|| format!("serial write to {} failed", self.label))?;

        match self.read_reply()? {
            Some(reply) => {
                log::info!("{} replied: {}", self.label, reply);
                self.last_reply = Some(reply);
            }
            None => log::debug!("{} sent no reply", self.label),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breach::EventCause;
    use std::collections::VecDeque;

    /// In-memory stand-in for a serial port.
    #[derive(Default)]
    struct FakePort {
        written: Vec<u8>,
        replies: VecDeque<u8>,
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.replies.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn event(to: BreachState) -> BreachEvent {
        BreachEvent {
            frame_index: 1,
            timestamp_ms: 0,
            from: if to.is_hazard() { BreachState::Safe } else { BreachState::Hazard },
            to,
            cause: EventCause::Debounced,
            zone_id: None,
            zone_revision: None,
            breachers: 0,
        }
    }

    #[test]
    fn writes_command_bytes_and_reads_reply() {
        let port = FakePort {
            replies: b"ALARM ON\r\nALARM OFF\r\n".iter().copied().collect(),
            ..FakePort::default()
        };
        let mut sink = SerialSink::with_port(port, "fake", Duration::from_millis(100));
        sink.on_event(&event(BreachState::Hazard)).unwrap();
        assert_eq!(sink.last_reply(), Some("ALARM ON"));
        sink.on_event(&event(BreachState::Safe)).unwrap();
        assert_eq!(sink.last_reply(), Some("ALARM OFF"));
        assert_eq!(sink.port.written, b"10");
    }

    #[test]
    fn missing_reply_is_not_an_error() {
        let mut sink = SerialSink::with_port(FakePort::default(), "fake", Duration::from_millis(10));
        sink.on_event(&event(BreachState::Hazard)).unwrap();
        assert_eq!(sink.last_reply(), None);
        assert_eq!(sink.port.written, b"1");
    }

    #[test]
    fn opening_missing_port_fails() {
        let config = SerialConfig {
            port: "/dev/hazard-zone-no-such-port".into(),
            settle: Duration::ZERO,
            ..SerialConfig::default()
        };
        assert!(SerialSink::open(&config).is_err());
    }
}

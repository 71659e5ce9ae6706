use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{MqttConfig, SerialConfig};
use crate::breach::{BreachConfig, DEFAULT_CONFIDENCE, DEFAULT_DEBOUNCE_FRAMES};
use crate::ingest::SourceConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8799";
const DEFAULT_SOURCE_URL: &str = "stub://webcam";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "weights/yolov8s.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_ZONE_POLL_MS: u64 = 1_000;
const DEFAULT_SERIAL_BAUD: u32 = 9600;
const DEFAULT_SERIAL_SETTLE_MS: u64 = 2_000;
const DEFAULT_SERIAL_REPLY_MS: u64 = 500;
const DEFAULT_MQTT_PREFIX: &str = "hazard";
const DEFAULT_MQTT_CLIENT_ID: &str = "hazard-zone";
const DEFAULT_MAX_SOURCE_FAILURES: u32 = 10;

/// Detector backends `hazardd` knows how to build.
pub const DETECTOR_BACKENDS: [&str; 3] = ["stub", "scripted", "tract"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    breach: Option<BreachConfigFile>,
    zone: Option<ZoneConfigFile>,
    serial: Option<SerialConfigFile>,
    mqtt: Option<MqttConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct BreachConfigFile {
    watched_labels: Option<Vec<String>>,
    confidence: Option<f32>,
    debounce_frames: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ZoneConfigFile {
    file: Option<PathBuf>,
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud: Option<u32>,
    settle_ms: Option<u64>,
    reply_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

/// Fully resolved monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceConfig,
    /// Consecutive source errors tolerated before the run ends.
    pub max_consecutive_failures: u32,
    pub detector: DetectorSettings,
    pub breach: BreachConfig,
    pub zone: ZoneSettings,
    /// `None` runs without an alarm controller.
    pub serial: Option<SerialConfig>,
    /// `None` disables MQTT publishing.
    pub mqtt: Option<MqttConfig>,
    pub api_addr: String,
    pub api_token_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    /// Watched zone file, loaded at start and reloaded on change.
    pub file: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Load from `HAZARD_CONFIG` (if set), then apply `HAZARD_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HAZARD_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any), then apply `HAZARD_*` overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => MonitorConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_size: detector_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            iou_threshold: detector_file.iou_threshold.unwrap_or(DEFAULT_NMS_IOU),
        };

        let breach_file = file.breach.unwrap_or_default();
        let breach = BreachConfig {
            watched_labels: breach_file
                .watched_labels
                .unwrap_or_else(|| vec!["person".to_string()]),
            confidence_threshold: breach_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            debounce_frames: breach_file
                .debounce_frames
                .unwrap_or(DEFAULT_DEBOUNCE_FRAMES),
        };

        let zone_file = file.zone.unwrap_or_default();
        let zone = ZoneSettings {
            file: zone_file.file,
            poll_interval: Duration::from_millis(zone_file.poll_ms.unwrap_or(DEFAULT_ZONE_POLL_MS)),
        };

        let serial = file.serial.and_then(|serial| {
            serial.port.map(|port| SerialConfig {
                port,
                baud_rate: serial.baud.unwrap_or(DEFAULT_SERIAL_BAUD),
                settle: Duration::from_millis(serial.settle_ms.unwrap_or(DEFAULT_SERIAL_SETTLE_MS)),
                reply_timeout: Duration::from_millis(
                    serial.reply_timeout_ms.unwrap_or(DEFAULT_SERIAL_REPLY_MS),
                ),
            })
        });

        let mqtt = file.mqtt.and_then(|mqtt| {
            mqtt.addr.map(|broker_addr| MqttConfig {
                broker_addr,
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_PREFIX.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            })
        });

        let api = file.api.unwrap_or_default();
        Self {
            source,
            max_consecutive_failures: source_file
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_SOURCE_FAILURES),
            detector,
            breach,
            zone,
            serial,
            mqtt,
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            api_token_path: api.token_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("HAZARD_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = env_nonempty("HAZARD_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(confidence) = env_nonempty("HAZARD_CONFIDENCE") {
            self.breach.confidence_threshold = confidence
                .parse()
                .map_err(|_| anyhow!("HAZARD_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(frames) = env_nonempty("HAZARD_DEBOUNCE_FRAMES") {
            self.breach.debounce_frames = frames
                .parse()
                .map_err(|_| anyhow!("HAZARD_DEBOUNCE_FRAMES must be a positive integer"))?;
        }
        if let Some(labels) = env_nonempty("HAZARD_WATCHED_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.breach.watched_labels = parsed;
            }
        }
        if let Some(path) = env_nonempty("HAZARD_ZONE_FILE") {
            self.zone.file = Some(PathBuf::from(path));
        }
        if let Some(port) = env_nonempty("HAZARD_SERIAL_PORT") {
            let serial = self.serial.get_or_insert_with(SerialConfig::default);
            serial.port = port;
        }
        if let Some(baud) = env_nonempty("HAZARD_SERIAL_BAUD") {
            let baud: u32 = baud
                .parse()
                .map_err(|_| anyhow!("HAZARD_SERIAL_BAUD must be an integer baud rate"))?;
            match self.serial.as_mut() {
                Some(serial) => serial.baud_rate = baud,
                None => log::warn!("HAZARD_SERIAL_BAUD set without a serial port; ignored"),
            }
        }
        if let Some(addr) = env_nonempty("HAZARD_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = env_nonempty("HAZARD_API_TOKEN_PATH") {
            self.api_token_path = Some(PathBuf::from(path));
        }
        if let Some(addr) = env_nonempty("HAZARD_MQTT_ADDR") {
            let mqtt = self.mqtt.get_or_insert_with(MqttConfig::default);
            mqtt.broker_addr = addr;
        }
        Ok(())
    }

    /// Check cross-field constraints and normalise ids. Called by `load`;
    /// binaries call it again after applying CLI flags.
    pub fn validate(&mut self) -> Result<()> {
        self.breach.validate()?;

        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !DETECTOR_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend {:?} (expected one of {})",
                self.detector.backend,
                DETECTOR_BACKENDS.join(", ")
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!("detector iou_threshold must be in [0, 1]"));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector input_size must be a positive multiple of 32"));
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be at least 1"));
        }
        if self.zone.poll_interval.is_zero() {
            return Err(anyhow!("zone poll interval must be greater than zero"));
        }
        if let Some(serial) = &self.serial {
            if serial.baud_rate == 0 {
                return Err(anyhow!("serial baud rate must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = MonitorConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.source.url, DEFAULT_SOURCE_URL);
        assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
        assert_eq!(cfg.breach.confidence_threshold, 0.2);
        assert_eq!(cfg.breach.debounce_frames, 5);
        assert!(cfg.zone.file.is_none());
        assert!(cfg.serial.is_none());
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.max_consecutive_failures, 10);
    }

    #[test]
    fn split_csv_trims_and_drops_empty() {
        assert_eq!(split_csv(" person, ,forklift "), vec!["person", "forklift"]);
    }

    #[test]
    fn serial_section_without_port_is_disabled() {
        let file: MonitorConfigFile = toml::from_str("[serial]\nbaud = 115200\n").unwrap();
        assert!(MonitorConfig::from_file(file).serial.is_none());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cases: [fn(&mut MonitorConfig); 5] = [
            |c| c.detector.backend = "opencv".into(),
            |c| c.zone.poll_interval = Duration::ZERO,
            |c| c.breach.debounce_frames = 0,
            |c| c.max_consecutive_failures = 0,
            |c| c.detector.input_size = 100,
        ];
        for mutate in cases {
            let mut cfg = MonitorConfig::default();
            mutate(&mut cfg);
            assert!(cfg.validate().is_err());
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<MonitorConfigFile>("db_path = \"x\"\n").is_err());
    }
}

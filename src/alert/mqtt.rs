use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};
use std::thread::JoinHandle;
use std::time::Duration;

use super::AlertSink;
use crate::breach::BreachEvent;

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";

#[derive(Clone, Debug, PartialEq)]
pub struct MqttConfig {
    /// `host:port`, optionally prefixed with `mqtt://`.
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            topic_prefix: "hazard".to_string(),
            client_id: "hazard-zone".to_string(),
        }
    }
}

/// Publishes events to `<prefix>/breach` and the current state, retained,
/// to `<prefix>/state`. Availability goes to `<prefix>/status`.
pub struct MqttSink {
    client: Client,
    prefix: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let (host, port) = parse_broker_addr(&config.broker_addr)?;
        let prefix = config.topic_prefix.trim_end_matches('/').to_string();
        if prefix.is_empty() {
            return Err(anyhow!("MQTT topic prefix must not be empty"));
        }

        let mut options = MqttOptions::new(config.client_id.as_str(), host.as_str(), port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        options.set_last_will(LastWill::new(
            status_topic(&prefix),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));

        let (client, connection) = Client::new(options, 10);
        let connection_handle = Some(spawn_connection(connection));
        client
            .publish(status_topic(&prefix), QoS::AtLeastOnce, true, PAYLOAD_ONLINE.as_bytes().to_vec())
            .context("failed to queue MQTT availability message")?;
        log::info!("MQTT sink publishing to {}:{} under {}/", host, port, prefix);

        Ok(Self {
            client,
            prefix,
            connection_handle,
        })
    }
}

fn spawn_connection(mut connection: Connection) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl AlertSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn on_event(&mut self, event: &BreachEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("failed to encode event")?;
        self.client
            .publish(breach_topic(&self.prefix), QoS::AtLeastOnce, false, payload)
            .context("failed to publish breach event")?;
        self.client
            .publish(
                state_topic(&self.prefix),
                QoS::AtLeastOnce,
                true,
                event.to.as_str().as_bytes().to_vec(),
            )
            .context("failed to publish state")?;
        Ok(())
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        let _ = self.client.publish(
            status_topic(&self.prefix),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn breach_topic(prefix: &str) -> String {
    format!("{}/breach", prefix)
}

fn state_topic(prefix: &str) -> String {
    format!("{}/state", prefix)
}

fn status_topic(prefix: &str) -> String {
    format!("{}/status", prefix)
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = remainder
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

//! Gerrit events republished on an MQTT broker (germqtt style: one JSON
//! document per message under `<base_topic>/...`).

use crate::events::GerritEvent;
use crate::processors::event_source::{EventSource, SourceError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_BASE_TOPIC: &str = "gerrit";

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct MqttParams {
    pub host: String,
    pub port: u16,
    pub base_topic: String,
    /// Connect over websockets (`ws://host:port/mqtt`) instead of plain TCP.
    pub websocket: bool,
    pub client_id: String,
}

impl MqttParams {
    pub fn new(host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            websocket: false,
            client_id: client_id.into(),
        }
    }

    /// Wildcard subscription covering every event under the base topic.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.base_topic.trim_end_matches('/'))
    }

    fn broker_address(&self) -> String {
        if self.websocket {
            format!("ws://{}:{}/mqtt", self.host, self.port)
        } else {
            self.host.clone()
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, self.broker_address(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if self.websocket {
            options.set_transport(Transport::Ws);
        }
        options
    }
}

pub struct GerritMqttSource {
    params: MqttParams,
    connection: Option<(AsyncClient, EventLoop)>,
}

impl GerritMqttSource {
    pub fn new(params: MqttParams) -> Self {
        Self {
            params,
            connection: None,
        }
    }

    async fn subscribe(client: &AsyncClient, topic: &str) -> Result<(), SourceError> {
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))
    }
}

/// Payloads that carry no event at all.
fn is_empty_payload(payload: &[u8]) -> bool {
    matches!(payload.trim_ascii(), b"" | b"null" | b"{}")
}

#[async_trait]
impl EventSource for GerritMqttSource {
    fn describe(&self) -> String {
        format!(
            "mqtt://{}:{}/{}",
            self.params.host,
            self.params.port,
            self.params.subscription()
        )
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        self.connection = None;

        let (client, mut eventloop) = AsyncClient::new(self.params.options(), REQUEST_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => return Err(SourceError::Connect(e.to_string())),
            }
        }

        let topic = self.params.subscription();
        Self::subscribe(&client, &topic).await?;
        info!(%topic, "Subscribed to MQTT topic");

        self.connection = Some((client, eventloop));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<GerritEvent, SourceError> {
        let topic = self.params.subscription();
        let Some((client, eventloop)) = self.connection.as_mut() else {
            return Err(SourceError::Closed);
        };

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if is_empty_payload(&publish.payload) {
                        debug!(topic = %publish.topic, "Skipping empty MQTT payload");
                        continue;
                    }
                    return Ok(GerritEvent::from_json(&publish.payload)?);
                }
                // rumqttc reconnects on the next poll; the broker may have
                // dropped our session, so subscribe again
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    Self::subscribe(client, &topic).await?;
                }
                Ok(_) => continue,
                Err(e) => {
                    self.connection = None;
                    return Err(SourceError::Read(e.to_string()));
                }
            }
        }
    }
}

//! Broker client construction and the publish seam.
//!
//! Each activity owns its own `paho_mqtt::AsyncClient` (callbacks arrive on
//! the paho background thread). Publishing goes through the [`Publisher`]
//! trait so the gate, bridge, and REST surface can be exercised without a
//! broker.

use std::time::Duration;

use super::config::MqttConfig;
use super::errors::Result;

pub trait Publisher: Send + Sync {
    /// Enqueues one message. No buffering beyond the client's in-flight
    /// window: an unreachable broker surfaces as an error here.
    fn publish(&self, topic: &str, payload: String, qos: i32, retained: bool) -> Result<()>;
}

impl Publisher for paho_mqtt::AsyncClient {
    fn publish(&self, topic: &str, payload: String, qos: i32, retained: bool) -> Result<()> {
        let message = paho_mqtt::MessageBuilder::new()
            .topic(topic)
            .payload(payload)
            .qos(qos)
            .retained(retained)
            .finalize();
        self.try_publish(message)?;
        Ok(())
    }
}

pub fn client(client_id: &str) -> Result<paho_mqtt::AsyncClient> {
    let create_opts = paho_mqtt::CreateOptionsBuilder::new().client_id(client_id).finalize();
    Ok(paho_mqtt::AsyncClient::new(create_opts)?)
}

pub fn connect_options(config: &MqttConfig) -> paho_mqtt::ConnectOptions {
    paho_mqtt::ConnectOptionsBuilder::new()
        .server_uris(&[format!("tcp://{}:{}", config.broker, config.port)])
        .keep_alive_interval(Duration::from_secs(config.keepalive))
        .clean_session(true)
        .finalize()
}

/// Creates and connects a client, returning `None` (with a warning) when
/// the broker is unreachable; the affected publishes are then dropped
/// rather than buffered.
pub fn try_connect(config: &MqttConfig, client_id: &str) -> Option<paho_mqtt::AsyncClient> {
    let client = match client(client_id) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!("MQTT client init failed ({}): {}", client_id, err);
            return None;
        }
    };
    match client.connect(connect_options(config)).wait() {
        Ok(_) => {
            tracing::info!("MQTT connected: {}:{} ({})", config.broker, config.port, client_id);
            Some(client)
        }
        Err(err) => {
            tracing::warn!("MQTT connect failed ({}): {}", client_id, err);
            None
        }
    }
}

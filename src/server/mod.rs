//! REST-to-broker bridge.
//!
//! Translates HTTP requests into broker publishes (the relay bridge does
//! the actual actuation) and serves a cache of the latest sensor payloads,
//! populated by this module's own broker subscriber.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use actix_web::{web, App, HttpServer};

use crate::agriha::config::MqttConfig;
use crate::agriha::gate::CommandGate;
use crate::agriha::mqtt::{self, Publisher};
use crate::agriha::relay::RelayDriver;

pub mod auth;
pub mod cache;
pub mod handlers;

use cache::SensorCache;

pub struct ApiState {
    pub house_id: String,
    pub api_key: String,
    pub start: Instant,
    pub gate: Arc<CommandGate>,
    pub relay: Arc<Mutex<RelayDriver>>,
    pub cache: Arc<SensorCache>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

pub fn service_config(config: &mut web::ServiceConfig) {
    config.service(web::resource("/api/relay/{ch}").route(web::post().to(handlers::set_relay::handler)));
    config.service(web::resource("/api/sensors").route(web::get().to(handlers::sensors::handler)));
    config.service(web::resource("/api/status").route(web::get().to(handlers::status::handler)));
    config.service(web::resource("/api/emergency/clear").route(web::post().to(handlers::emergency_clear::handler)));
}

/// Connects the REST bridge's own broker client: it feeds the sensor cache
/// and doubles as the publisher for relay commands. `None` when the broker
/// is unreachable (the relay endpoint then answers 503).
pub fn start_cache_subscriber(
    config: &MqttConfig,
    house_id: &str,
    cache: Arc<SensorCache>,
) -> Option<paho_mqtt::AsyncClient> {
    let client = match mqtt::client("agriha-daemon-rest") {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!("REST broker client init failed: {}", err);
            return None;
        }
    };

    let house = house_id.to_string();
    client.set_connected_callback(move |client: &paho_mqtt::AsyncClient| {
        client.subscribe(&format!("agriha/{}/sensor/#", house), 1);
        client.subscribe("agriha/farm/weather/misol", 1);
        client.subscribe(&format!("agriha/{}/relay/state", house), 1);
        client.subscribe(&format!("agriha/{}/ccm/#", house), 0);
        tracing::info!("REST broker connected: subscribed to sensor/weather/relay/ccm topics");
    });

    client.set_message_callback(move |_, message| {
        if let Some(message) = message {
            match serde_json::from_slice(message.payload()) {
                Ok(value) => {
                    cache.update(message.topic(), value);
                    tracing::trace!("sensor cache updated: {}", message.topic());
                }
                Err(err) => tracing::warn!("cache message decode failed [{}]: {}", message.topic(), err),
            }
        }
    });

    match client.connect(mqtt::connect_options(config)).wait() {
        Ok(_) => Some(client),
        Err(err) => {
            tracing::warn!("REST broker connect failed: {} (sensor cache disabled)", err);
            None
        }
    }
}

/// Runs the HTTP server on the calling thread until stopped through the
/// handle sent back over `handle_tx`.
pub fn serve(
    state: web::Data<ApiState>,
    host: String,
    port: u16,
    handle_tx: mpsc::Sender<actix_web::dev::ServerHandle>,
) {
    let system = actix_web::rt::System::new();
    system.block_on(async move {
        let server = match HttpServer::new(move || App::new().app_data(state.clone()).configure(service_config))
            .bind((host.as_str(), port))
        {
            Ok(server) => server.run(),
            Err(err) => {
                tracing::error!("REST API bind {}:{} failed: {}", host, port, err);
                return;
            }
        };
        let _ = handle_tx.send(server.handle());
        tracing::info!("REST API listening on {}:{}", host, port);
        if let Err(err) = server.await {
            tracing::error!("REST API error: {}", err);
        }
        tracing::info!("REST API stopped");
    });
}

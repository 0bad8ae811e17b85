//! Supervisor: builds the shared objects, spawns the activities, and tears
//! everything down when the signal flag drops.
//!
//! Activities:
//!   sensor    : DS18B20 + Misol weather reads -> broker publish (own thread)
//!   ccm       : UECS-CCM multicast receive -> broker publish (own thread)
//!   bridge    : relay set-topic subscriber (paho callback thread)
//!   gpio      : DI edge detection -> CommandGate (rppal interrupt threads)
//!   rest-api  : actix HTTP surface (own thread + workers)
//!
//! The emergency path stays armed for the whole run: a physical switch on
//! DI07-DI14 drives its relay channel directly and locks commanded writes
//! out for 300 s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use actix_web::web;

use super::bridge::MqttRelayBridge;
use super::ccm::CcmReceiver;
use super::config::Config;
use super::errors::{Error, Result};
use super::gate::CommandGate;
use super::gpio::GpioWatcher;
use super::mqtt::{self, Publisher};
use super::relay::RelayDriver;
use super::sensor::SensorActivity;
use crate::server::{self, cache::SensorCache, ApiState};

pub fn run(config: Config, running: Arc<AtomicBool>) -> Result<()> {
    let house_id = config.daemon.house_id.clone();

    // relay driver; an I2C failure here is fatal (exit code 1 in main)
    let relay = Arc::new(Mutex::new(RelayDriver::open(
        config.i2c.bus,
        config.i2c.mcp23008_addr,
    )?));

    // emergency-override announcements get their own client
    let emergency_client = mqtt::try_connect(&config.mqtt, "agriha-daemon-emergency");
    let emergency_publisher: Option<Arc<dyn Publisher>> =
        emergency_client.clone().map(|client| Arc::new(client) as Arc<dyn Publisher>);

    let gate = Arc::new(CommandGate::new(
        Arc::clone(&relay),
        emergency_publisher,
        &house_id,
    ));

    // DI edge events feed the gate for the whole process lifetime
    let watcher = {
        let gate = Arc::clone(&gate);
        match GpioWatcher::start(&config.gpio.chip, &config.gpio.di_lines, move |event| {
            gate.handle_gpio_event(&event)
        }) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::error!("GPIO watch failed to start: {}", err);
                None
            }
        }
    };

    // sensor + ccm share one publishing client
    let sensor_client = mqtt::try_connect(&config.mqtt, "agriha-daemon-sensor");
    let sensor_publisher: Option<Arc<dyn Publisher>> =
        sensor_client.clone().map(|client| Arc::new(client) as Arc<dyn Publisher>);

    let mut sensor = SensorActivity::new(&config, sensor_publisher.clone());
    let sensor_running = Arc::clone(&running);
    let sensor_thread = thread::Builder::new()
        .name(String::from("sensor"))
        .spawn(move || sensor.run(&sensor_running))
        .map_err(Error::Io)?;

    let ccm = CcmReceiver::new(&config, sensor_publisher);
    let ccm_running = Arc::clone(&running);
    let ccm_thread = thread::Builder::new()
        .name(String::from("ccm"))
        .spawn(move || {
            if let Err(err) = ccm.run(&ccm_running) {
                tracing::error!("ccm receiver failed: {}", err);
            }
        })
        .map_err(Error::Io)?;

    // relay bridge (actuation path for broker commands)
    let bridge = MqttRelayBridge::new(
        Arc::clone(&gate),
        Arc::clone(&relay),
        &house_id,
        &config.mqtt.client_id,
    )?;
    if let Err(err) = bridge.connect(&config.mqtt) {
        tracing::error!("relay bridge connect failed: {}", err);
    }

    // REST surface with its own subscriber feeding the sensor cache
    let cache = Arc::new(SensorCache::new());
    let rest_client = server::start_cache_subscriber(&config.mqtt, &house_id, Arc::clone(&cache));
    let rest_publisher: Option<Arc<dyn Publisher>> =
        rest_client.clone().map(|client| Arc::new(client) as Arc<dyn Publisher>);

    let state = web::Data::new(ApiState {
        house_id: house_id.clone(),
        api_key: config.rest_api.api_key.clone(),
        start: Instant::now(),
        gate: Arc::clone(&gate),
        relay: Arc::clone(&relay),
        cache,
        publisher: rest_publisher,
    });
    let (handle_tx, handle_rx) = mpsc::channel();
    let rest_host = config.rest_api.host.clone();
    let rest_port = config.rest_api.port;
    let server_thread = thread::Builder::new()
        .name(String::from("rest-api"))
        .spawn(move || server::serve(state, rest_host, rest_port, handle_tx))
        .map_err(Error::Io)?;
    let server_handle = handle_rx.recv_timeout(Duration::from_secs(5)).ok();

    tracing::info!("agriha-daemon started (house_id={})", house_id);

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("stopping daemon...");

    if let Some(handle) = server_handle {
        futures_executor::block_on(handle.stop(true));
    }
    bridge.disconnect();
    if let Some(watcher) = watcher {
        watcher.close();
    }

    for (name, handle) in [
        ("sensor", sensor_thread),
        ("ccm", ccm_thread),
        ("rest-api", server_thread),
    ] {
        if handle.join().is_err() {
            tracing::error!("{} thread panicked", name);
        }
    }

    for client in [emergency_client, sensor_client, rest_client].into_iter().flatten() {
        if client.is_connected() {
            let _ = client.disconnect(None);
        }
    }

    tracing::info!("agriha-daemon stopped");
    Ok(())
}

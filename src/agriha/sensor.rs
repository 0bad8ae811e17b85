//! Periodic sensor activity.
//!
//! Each cycle reads every configured DS18B20 and one Misol weather frame,
//! publishing both to the broker. The activity runs on its own thread, so
//! the blocking weather read (up to ~20 s waiting for sync) holds up
//! nothing else. Cycles are interval-spaced, not wall-clock aligned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, StopBits};

use super::config::Config;
use super::mqtt::Publisher;
use super::onewire::Ds18b20;
use super::unix_time;
use super::weather;

pub const WEATHER_TOPIC: &str = "agriha/farm/weather/misol";

/// The station pushes a frame about every 16 s; wait a little longer.
const WEATHER_SYNC_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SensorActivity {
    house_id: String,
    interval: Duration,
    devices: Vec<Ds18b20>,
    serial: Option<Box<dyn serialport::SerialPort>>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl SensorActivity {
    /// Opens the serial port and resolves the DS18B20 device list; either
    /// failing only disables that source.
    pub fn new(config: &Config, publisher: Option<Arc<dyn Publisher>>) -> SensorActivity {
        let devices = if config.onewire.devices.is_empty() {
            let found = Ds18b20::discover();
            tracing::info!("DS18B20: discover -> {} device(s)", found.len());
            found
        } else {
            tracing::info!("DS18B20: {} configured device(s)", config.onewire.devices.len());
            config.onewire.devices.iter().map(|id| Ds18b20::new(id)).collect()
        };

        let serial = match serialport::new(&config.uart.weather_port, config.uart.weather_baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_secs(2))
            .open()
        {
            Ok(port) => {
                tracing::info!(
                    "weather serial opened: {} @ {} bps",
                    config.uart.weather_port,
                    config.uart.weather_baud
                );
                Some(port)
            }
            Err(err) => {
                tracing::warn!("weather serial open failed: {} (weather disabled)", err);
                None
            }
        };

        SensorActivity {
            house_id: config.daemon.house_id.clone(),
            interval: Duration::from_secs(config.daemon.sensor_interval_sec),
            devices,
            serial,
            publisher,
        }
    }

    /// Cycle loop; returns when `running` drops.
    pub fn run(&mut self, running: &AtomicBool) {
        tracing::info!(
            "sensor activity started: house={}, interval={}s, DS18B20 x{}, weather={}",
            self.house_id,
            self.interval.as_secs(),
            self.devices.len(),
            if self.serial.is_some() { "on" } else { "off" }
        );
        while running.load(Ordering::SeqCst) {
            self.read_ds18b20();
            self.read_weather();

            // sleep in slices so shutdown stays prompt
            let deadline = Instant::now() + self.interval;
            while running.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(200));
            }
        }
        tracing::info!("sensor activity stopped");
    }

    fn read_ds18b20(&self) {
        let topic = format!("agriha/{}/sensor/DS18B20", self.house_id);
        for device in &self.devices {
            match device.read_celsius() {
                Ok(temperature) => {
                    tracing::info!("DS18B20[{}]: {:.2} C", device.device_id, temperature);
                    if let Some(ref publisher) = self.publisher {
                        let payload = serde_json::json!({
                            "device_id": device.device_id,
                            "temperature_c": temperature,
                            "timestamp": unix_time(),
                        })
                        .to_string();
                        if let Err(err) = publisher.publish(&topic, payload, 1, true) {
                            tracing::warn!("DS18B20 publish failed: {}", err);
                        }
                    }
                }
                // skip this device for the cycle; retried next time around
                Err(err) => tracing::error!("DS18B20[{}] read failed: {}", device.device_id, err),
            }
        }
    }

    fn read_weather(&mut self) {
        let port = match self.serial {
            Some(ref mut port) => port,
            None => return,
        };
        let frame = match weather::read_frame(port, WEATHER_SYNC_TIMEOUT) {
            Ok(frame) => frame,
            Err(super::errors::Error::Timeout) => {
                tracing::debug!("weather: no frame this cycle");
                return;
            }
            Err(err) => {
                tracing::error!("weather read failed: {}", err);
                return;
            }
        };
        let reading = match weather::decode(&frame) {
            Ok(reading) => reading,
            Err(err) => {
                tracing::error!("weather decode failed: {}", err);
                return;
            }
        };
        tracing::info!(
            "weather: {:.1} C {}% {:.2} m/s",
            reading.temperature_c.unwrap_or(0.0),
            reading.humidity_pct,
            reading.wind_speed_ms.unwrap_or(0.0)
        );
        if let Some(ref publisher) = self.publisher {
            let mut payload = match serde_json::to_value(&reading) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => return,
            };
            payload.insert(String::from("timestamp"), serde_json::json!(unix_time()));
            let body = serde_json::Value::Object(payload).to_string();
            if let Err(err) = publisher.publish(WEATHER_TOPIC, body, 1, true) {
                tracing::warn!("weather publish failed: {}", err);
            }
        }
    }
}

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{Error, Result};

/// Daemon configuration, loaded once at boot from a YAML document.
///
/// Every key has a default so a partial (or empty) document is valid.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub i2c: I2cConfig,
    pub gpio: GpioConfig,
    pub mqtt: MqttConfig,
    pub rest_api: RestApiConfig,
    pub uart: UartConfig,
    pub onewire: OneWireConfig,
    pub ccm: CcmConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|err| Error::Decode(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub house_id: String,
    pub sensor_interval_sec: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            house_id: String::from("h01"),
            sensor_interval_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct I2cConfig {
    pub bus: u8,
    pub mcp23008_addr: u16,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self { bus: 1, mcp23008_addr: 0x20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub di_lines: Vec<u8>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: String::from("/dev/gpiochip0"),
            di_lines: (7..=14).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub keepalive: u64,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::from("localhost"),
            port: 1883,
            keepalive: 60,
            client_id: String::from("agriha-daemon"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestApiConfig {
    pub host: String,
    pub port: u16,
    /// Empty string disables authentication.
    pub api_key: String,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 8080,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    pub weather_port: String,
    pub weather_baud: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            weather_port: String::from("/dev/ttyUSB0"),
            weather_baud: 9600,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneWireConfig {
    /// 1-wire device ids to read; empty runs sysfs discovery instead.
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CcmConfig {
    pub multicast_addr: String,
    pub multicast_port: u16,
    pub enabled: bool,
}

impl Default for CcmConfig {
    fn default() -> Self {
        Self {
            multicast_addr: super::ccm::MULTICAST_ADDR.to_string(),
            multicast_port: super::ccm::MULTICAST_PORT,
            enabled: true,
        }
    }
}

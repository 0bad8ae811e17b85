//! UECS-CCM telemetry: XML codec and the UDP multicast receiver.
//!
//! ArSprout nodes broadcast CCM packets (InAirTemp, InAirHumid, ...) on
//! 224.0.0.1:16520; each decoded packet is republished as JSON on
//! `agriha/{house}/ccm/{category}/{type}`.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use super::config::Config;
use super::errors::Result;
use super::mqtt::Publisher;

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const MULTICAST_PORT: u16 = 16520;
const BUFFER_SIZE: usize = 4096;

const SENSOR_TYPES: &[&str] = &[
    "InAirTemp", "InAirHumid", "InAirCO2", "SoilTemp",
    "InRadiation", "SoilEC", "SoilWC", "Pulse",
    "InAirHD", "InAirAbsHumid", "InAirDP", "IntgRadiation",
];

const ACTUATOR_TYPES: &[&str] = &[
    "Irri", "VenFan", "CirHoriFan", "AirHeatBurn", "AirHeatHP",
    "CO2Burn", "VenRfWin", "VenSdWin", "ThCrtn", "LsCrtn",
    "AirCoolHP", "AirHumFog",
];

const WEATHER_TYPES: &[&str] = &[
    "WAirTemp", "WAirHumid", "WWindSpeed", "WWindDir16",
    "WRainfall", "WRainfallAmt", "WLUX",
];

/// CCM element text: numeric when it parses as a float, verbatim otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CcmValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CcmPacket {
    pub ccm_type: String,
    pub value: CcmValue,
    pub room: i32,
    pub region: i32,
    pub order: i32,
    pub priority: i32,
    pub level: String,
    pub cast: String,
    pub source_ip: String,
    pub timestamp: String,
}

/// Strips the CCM level suffix (`.mC` / `.cMC` / `.MC`) off a type tag.
pub fn strip_ccm_suffix(ccm_type: &str) -> &str {
    for suffix in [".cMC", ".mC", ".MC"] {
        if let Some(stripped) = ccm_type.strip_suffix(suffix) {
            return stripped;
        }
    }
    ccm_type
}

pub fn classify(ccm_type: &str) -> &'static str {
    if SENSOR_TYPES.contains(&ccm_type) {
        "sensor"
    } else if ACTUATOR_TYPES.contains(&ccm_type) {
        "actuator"
    } else if WEATHER_TYPES.contains(&ccm_type) {
        "weather"
    } else {
        "other"
    }
}

/// Parses a UECS XML payload into packets, one per `<DATA>` element.
///
/// Malformed XML never errors; it yields an empty list.
pub fn parse_ccm_xml(xml: &[u8], source_ip: &str) -> Vec<CcmPacket> {
    let text = String::from_utf8_lossy(xml);
    let mut reader = Reader::from_str(&text);

    let timestamp = chrono::Utc::now().to_rfc3339();
    let mut packets = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"DATA" => {
                let raw_value = match reader.read_text(element.name()) {
                    Ok(value) => value.trim().to_string(),
                    Err(_) => return Vec::new(),
                };
                packets.push(build_packet(&element, raw_value, source_ip, &timestamp));
            }
            Ok(Event::Empty(element)) if element.local_name().as_ref() == b"DATA" => {
                packets.push(build_packet(&element, String::new(), source_ip, &timestamp));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return Vec::new(),
        }
    }
    packets
}

fn build_packet(
    element: &quick_xml::events::BytesStart<'_>,
    raw_value: String,
    source_ip: &str,
    timestamp: &str,
) -> CcmPacket {
    let mut raw_type = String::new();
    let mut room = 1;
    let mut region = 1;
    let mut order = 1;
    let mut priority = 29;
    let mut level = String::from("S");
    let mut cast = String::from("uni");

    for attr in element.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value);
        match attr.key.as_ref() {
            b"type" => raw_type = value.into_owned(),
            b"room" => room = value.parse().unwrap_or(1),
            b"region" => region = value.parse().unwrap_or(1),
            b"order" => order = value.parse().unwrap_or(1),
            b"priority" => priority = value.parse().unwrap_or(29),
            b"lv" => level = value.into_owned(),
            b"cast" => cast = value.into_owned(),
            _ => {}
        }
    }

    let value = match raw_value.parse::<f64>() {
        Ok(number) => CcmValue::Number(number),
        Err(_) => CcmValue::Text(raw_value),
    };

    CcmPacket {
        ccm_type: strip_ccm_suffix(&raw_type).to_string(),
        value,
        room,
        region,
        order,
        priority,
        level,
        cast,
        source_ip: source_ip.to_string(),
        timestamp: timestamp.to_string(),
    }
}

/// Joins the CCM multicast group and republishes decoded packets.
pub struct CcmReceiver {
    house_id: String,
    multicast_addr: Ipv4Addr,
    multicast_port: u16,
    enabled: bool,
    publisher: Option<Arc<dyn Publisher>>,
}

impl CcmReceiver {
    pub fn new(config: &Config, publisher: Option<Arc<dyn Publisher>>) -> CcmReceiver {
        CcmReceiver {
            house_id: config.daemon.house_id.clone(),
            multicast_addr: config.ccm.multicast_addr.parse().unwrap_or(MULTICAST_ADDR),
            multicast_port: config.ccm.multicast_port,
            enabled: config.ccm.enabled,
            publisher,
        }
    }

    /// Receive loop; returns when `running` drops.
    ///
    /// The socket binds INADDR_ANY and joins the group on the unspecified
    /// interface, so on a multi-homed host the kernel picks the interface.
    pub fn run(&self, running: &AtomicBool) -> Result<()> {
        if !self.enabled {
            tracing::info!("CCM receiver disabled by config");
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.multicast_port))?;
        socket.join_multicast_v4(&self.multicast_addr, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        tracing::info!("CCM receiver listening on {}:{}", self.multicast_addr, self.multicast_port);

        let mut buf = [0u8; BUFFER_SIZE];
        while running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    let packets = parse_ccm_xml(&buf[..len], &peer.ip().to_string());
                    for packet in &packets {
                        self.publish(packet);
                    }
                    if !packets.is_empty() {
                        tracing::debug!("CCM: {} packets from {}", packets.len(), peer.ip());
                    }
                }
                Err(ref err) if matches!(err.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {}
                Err(err) => {
                    tracing::error!("CCM socket error: {}", err);
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }

        tracing::info!("CCM receiver stopped");
        Ok(())
    }

    fn publish(&self, packet: &CcmPacket) {
        let publisher = match self.publisher {
            Some(ref publisher) => publisher,
            None => return,
        };
        let category = classify(&packet.ccm_type);
        let topic = format!("agriha/{}/ccm/{}/{}", self.house_id, category, packet.ccm_type);
        match serde_json::to_string(packet) {
            Ok(payload) => {
                if let Err(err) = publisher.publish(&topic, payload, 0, true) {
                    tracing::warn!("CCM publish failed [{}]: {}", topic, err);
                }
            }
            Err(err) => tracing::warn!("CCM packet serialization failed: {}", err),
        }
    }
}

//! Broker-to-relay bridge.
//!
//! Subscribes `agriha/{house}/relay/+/set` (QoS 1), drives the relay
//! through the command gate, republishes the full 8-channel state on
//! `agriha/{house}/relay/state` (QoS 1, retained), and manages at most one
//! auto-off timer per channel. A new command on a channel always cancels
//! the pending timer before anything is written: last writer wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::config::MqttConfig;
use super::errors::Result;
use super::gate::CommandGate;
use super::mqtt::{self, Publisher};
use super::relay::RelayDriver;
use super::unix_time;
use crate::timer::OneShot;

#[derive(Debug, Deserialize)]
pub struct RelaySetCommand {
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub duration_sec: f64,
    #[serde(default)]
    pub reason: String,
}

pub struct MqttRelayBridge {
    client: paho_mqtt::AsyncClient,
    inner: Arc<BridgeInner>,
}

pub(crate) struct BridgeInner {
    gate: Arc<CommandGate>,
    relay: Arc<Mutex<RelayDriver>>,
    house_id: String,
    timers: Mutex<HashMap<u8, OneShot>>,
}

impl BridgeInner {
    pub(crate) fn new(
        gate: Arc<CommandGate>,
        relay: Arc<Mutex<RelayDriver>>,
        house_id: &str,
    ) -> Arc<BridgeInner> {
        Arc::new(BridgeInner {
            gate,
            relay,
            house_id: house_id.to_string(),
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Handles one `relay/{ch}/set` message.
    pub(crate) fn handle_command(self: &Arc<Self>, topic: &str, payload: &[u8], publisher: &Arc<dyn Publisher>) {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 5 || parts[parts.len() - 1] != "set" {
            tracing::warn!("unexpected topic: {}", topic);
            return;
        }
        let channel: u8 = match parts[parts.len() - 2].parse() {
            Ok(channel) if (1..=8).contains(&channel) => channel,
            _ => {
                tracing::warn!("invalid channel in topic: {}", topic);
                return;
            }
        };

        let command: RelaySetCommand = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!("relay command decode failed [{}]: {}", topic, err);
                return;
            }
        };
        if !(0..=1).contains(&command.value) {
            tracing::warn!("invalid relay value: {}", command.value);
            return;
        }

        tracing::info!(
            "relay cmd: ch{} value={} duration={:.1}s reason={:?}",
            channel,
            command.value,
            command.duration_sec,
            command.reason
        );

        // a new command always supersedes the pending auto-off
        if let Some(existing) = self.lock_timers().remove(&channel) {
            existing.cancel();
            tracing::debug!("cancelled existing timer for ch{}", channel);
        }

        let on = command.value == 1;
        match self.gate.gate(channel, on) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("relay ch{} command dropped (gate locked)", channel),
            Err(err) => tracing::error!("relay ch{} write failed: {}", channel, err),
        }
        self.publish_state(publisher);

        if on && command.duration_sec > 0.0 {
            self.install_auto_off(channel, command.duration_sec, publisher);
        }
    }

    fn install_auto_off(self: &Arc<Self>, channel: u8, duration_sec: f64, publisher: &Arc<dyn Publisher>) {
        let inner = Arc::clone(self);
        let publisher = Arc::clone(publisher);
        let timer = OneShot::start(Duration::from_secs_f64(duration_sec), move || {
            tracing::info!("relay ch{} auto-off (duration elapsed)", channel);
            match inner.gate.gate(channel, false) {
                Ok(true) => {}
                // emergency dictates the physical state; no reschedule
                Ok(false) => tracing::warn!("relay ch{} auto-off dropped (gate locked)", channel),
                Err(err) => tracing::error!("auto-off error ch{}: {}", channel, err),
            }
            inner.publish_state(&publisher);
            inner.lock_timers().remove(&channel);
        });
        self.lock_timers().insert(channel, timer);
        tracing::debug!("auto-off timer set: ch{} in {:.1}s", channel, duration_sec);
    }

    /// Publishes the full 8-channel state read back from the hardware.
    pub(crate) fn publish_state(&self, publisher: &Arc<dyn Publisher>) {
        let mask = match self.relay.lock().unwrap_or_else(PoisonError::into_inner).get_mask() {
            Ok(mask) => mask,
            Err(err) => {
                tracing::error!("relay state read failed: {}", err);
                return;
            }
        };
        let mut payload = serde_json::Map::new();
        for channel in 1..=8u8 {
            payload.insert(format!("ch{}", channel), json!((mask >> (8 - channel)) & 1));
        }
        payload.insert(String::from("ts"), json!(unix_time() as i64));

        let topic = format!("agriha/{}/relay/state", self.house_id);
        match publisher.publish(&topic, serde_json::Value::Object(payload).to_string(), 1, true) {
            Ok(()) => tracing::debug!("published relay state"),
            Err(err) => tracing::warn!("relay state publish failed: {}", err),
        }
    }

    pub(crate) fn cancel_timers(&self) {
        let mut timers = self.lock_timers();
        for (_, timer) in timers.drain() {
            timer.cancel();
        }
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<u8, OneShot>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn pending_timers(&self) -> usize {
        self.lock_timers().len()
    }
}

impl MqttRelayBridge {
    pub fn new(
        gate: Arc<CommandGate>,
        relay: Arc<Mutex<RelayDriver>>,
        house_id: &str,
        client_id: &str,
    ) -> Result<MqttRelayBridge> {
        Ok(MqttRelayBridge {
            client: mqtt::client(client_id)?,
            inner: BridgeInner::new(gate, relay, house_id),
        })
    }

    /// Connects and subscribes; on every (re)connect the current relay
    /// state is republished so the retained topic is never stale.
    pub fn connect(&self, config: &MqttConfig) -> Result<()> {
        let house_id = self.inner.house_id.clone();
        let inner = Arc::clone(&self.inner);
        self.client.set_connected_callback(move |client: &paho_mqtt::AsyncClient| {
            let topic = format!("agriha/{}/relay/+/set", house_id);
            client.subscribe(&topic, 1);
            tracing::info!("relay bridge connected, subscribed: {}", topic);
            let publisher: Arc<dyn Publisher> = Arc::new(client.clone());
            inner.publish_state(&publisher);
        });

        let inner = Arc::clone(&self.inner);
        self.client.set_message_callback(move |client, message| {
            if let Some(message) = message {
                let publisher: Arc<dyn Publisher> = Arc::new(client.clone());
                inner.handle_command(message.topic(), message.payload(), &publisher);
            }
        });

        self.client.connect(mqtt::connect_options(config)).wait()?;
        Ok(())
    }

    /// Cancels all pending timers and disconnects.
    pub fn disconnect(&self) {
        self.inner.cancel_timers();
        if self.client.is_connected() {
            let _ = self.client.disconnect(None);
        }
        tracing::info!("relay bridge disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agriha::gpio::GpioEvent;
    use crate::agriha::relay::REG_OLAT;
    use crate::agriha::testing::{CapturePublisher, MockBus, MockBusProbes};
    use std::thread;
    use std::time::Instant;

    struct Fixture {
        inner: Arc<BridgeInner>,
        gate: Arc<CommandGate>,
        probes: MockBusProbes,
        publisher: Arc<CapturePublisher>,
    }

    fn fixture() -> Fixture {
        let bus = MockBus::new();
        let probes = bus.probes();
        let relay = Arc::new(Mutex::new(RelayDriver::with_bus(Box::new(bus)).unwrap()));
        let gate = Arc::new(CommandGate::new(Arc::clone(&relay), None, "h01"));
        let inner = BridgeInner::new(Arc::clone(&gate), relay, "h01");
        Fixture { inner, gate, probes, publisher: CapturePublisher::new() }
    }

    impl Fixture {
        fn publisher_dyn(&self) -> Arc<dyn Publisher> {
            self.publisher.clone() as Arc<dyn Publisher>
        }

        fn command(&self, channel: u8, body: &str) {
            let topic = format!("agriha/h01/relay/{}/set", channel);
            self.inner.handle_command(&topic, body.as_bytes(), &self.publisher_dyn());
        }
    }

    #[test]
    fn command_drives_relay_and_publishes_state() {
        let fixture = fixture();
        fixture.command(4, r#"{"value":1,"duration_sec":0,"reason":"test"}"#);

        assert_eq!(fixture.probes.writes_to(REG_OLAT), vec![0x10]);

        let states = fixture.publisher.on_topic("agriha/h01/relay/state");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].qos, 1);
        assert!(states[0].retained);
        let payload: serde_json::Value = serde_json::from_str(&states[0].payload).unwrap();
        assert_eq!(payload["ch4"], json!(1));
        assert_eq!(payload["ch1"], json!(0));
        assert!(payload["ts"].is_i64());
    }

    #[test]
    fn invalid_topic_or_channel_is_dropped() {
        let fixture = fixture();
        let publisher = fixture.publisher_dyn();
        fixture.inner.handle_command("agriha/h01/relay/state", b"{}", &publisher);
        fixture.inner.handle_command("agriha/h01/relay/0/set", b"{\"value\":1}", &publisher);
        fixture.inner.handle_command("agriha/h01/relay/9/set", b"{\"value\":1}", &publisher);
        fixture.inner.handle_command("agriha/h01/relay/x/set", b"{\"value\":1}", &publisher);
        assert!(fixture.probes.writes_to(REG_OLAT).is_empty());
        assert!(fixture.publisher.messages().is_empty());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let fixture = fixture();
        fixture.command(2, "not json");
        fixture.command(2, r#"{"value":7}"#);
        assert!(fixture.probes.writes_to(REG_OLAT).is_empty());
    }

    #[test]
    fn auto_off_fires_through_the_gate() {
        let fixture = fixture();
        fixture.command(4, r#"{"value":1,"duration_sec":0.1,"reason":""}"#);
        assert_eq!(fixture.inner.pending_timers(), 1);

        thread::sleep(Duration::from_millis(400));

        assert_eq!(fixture.probes.writes_to(REG_OLAT), vec![0x10, 0x00]);
        assert_eq!(fixture.inner.pending_timers(), 0);
        // state published once for the command, once for the auto-off
        assert_eq!(fixture.publisher.on_topic("agriha/h01/relay/state").len(), 2);
    }

    #[test]
    fn new_command_supersedes_pending_timer() {
        let fixture = fixture();
        fixture.command(4, r#"{"value":1,"duration_sec":0.2,"reason":""}"#);
        fixture.command(4, r#"{"value":0,"duration_sec":0,"reason":""}"#);

        thread::sleep(Duration::from_millis(500));

        // exactly one off-write, from the second command; the timer never fires
        assert_eq!(fixture.probes.writes_to(REG_OLAT), vec![0x10, 0x00]);
        assert_eq!(fixture.inner.pending_timers(), 0);
    }

    #[test]
    fn at_most_one_timer_per_channel() {
        let fixture = fixture();
        fixture.command(5, r#"{"value":1,"duration_sec":30,"reason":""}"#);
        fixture.command(5, r#"{"value":1,"duration_sec":30,"reason":""}"#);
        assert_eq!(fixture.inner.pending_timers(), 1);
        fixture.command(6, r#"{"value":1,"duration_sec":30,"reason":""}"#);
        assert_eq!(fixture.inner.pending_timers(), 2);
        fixture.inner.cancel_timers();
        assert_eq!(fixture.inner.pending_timers(), 0);
    }

    #[test]
    fn auto_off_during_lockout_drops_silently() {
        let fixture = fixture();
        fixture.command(4, r#"{"value":1,"duration_sec":0.1,"reason":""}"#);

        // arm the lockout before the timer fires
        fixture.gate.handle_gpio_event(&GpioEvent { di_pin: 7, line: 11, value: 1, timestamp: Instant::now() });
        let after_emergency = fixture.probes.writes_to(REG_OLAT);

        thread::sleep(Duration::from_millis(400));

        // the fired timer produced no further write; ch4 stays on
        assert_eq!(fixture.probes.writes_to(REG_OLAT), after_emergency);
        assert_eq!(fixture.probes.read_register(REG_OLAT) & 0x10, 0x10);
    }

    #[test]
    fn locked_gate_still_republishes_state() {
        let fixture = fixture();
        fixture.gate.handle_gpio_event(&GpioEvent { di_pin: 7, line: 11, value: 1, timestamp: Instant::now() });
        fixture.command(4, r#"{"value":1,"duration_sec":0,"reason":""}"#);
        // no commanded write, but the state topic still reflects reality
        assert_eq!(fixture.probes.writes_to(REG_OLAT), vec![0x80]);
        assert_eq!(fixture.publisher.on_topic("agriha/h01/relay/state").len(), 1);
    }
}

//! Safety interlock between command sources and the relay driver.
//!
//! A physical switch closing on DI07-DI14 drives its relay channel
//! directly, announces the override on the broker, and starts a lockout.
//! While the lockout runs, every commanded write offered to [`CommandGate::gate`]
//! is dropped. The emergency path itself bypasses the gate it arms: a
//! symmetric design would make the switch self-ineffective.
//!
//! DI pin -> relay channel (UniPi 1.1 wiring):
//!   DI07 -> ch1, DI08 -> ch2, DI09 -> ch3, DI10 -> ch4,
//!   DI11 -> ch5, DI12 -> ch6, DI13 -> ch7, DI14 -> ch8

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::errors::Result;
use super::gpio::GpioEvent;
use super::mqtt::Publisher;
use super::relay::RelayDriver;
use super::unix_time;

pub const LOCKOUT_SECONDS: u64 = 300;

pub fn di_relay_channel(di_pin: u8) -> Option<u8> {
    match di_pin {
        7 => Some(1),
        8 => Some(2),
        9 => Some(3),
        10 => Some(4),
        11 => Some(5),
        12 => Some(6),
        13 => Some(7),
        14 => Some(8),
        _ => None,
    }
}

pub struct CommandGate {
    relay: Arc<Mutex<RelayDriver>>,
    publisher: Option<Arc<dyn Publisher>>,
    house_id: String,
    lockout: Duration,
    epoch: Instant,
    /// Lockout deadline in milliseconds past `epoch`; 0 means unlocked.
    /// Advanced with `fetch_max`, so close events never shorten it.
    locked_until_ms: AtomicU64,
}

impl CommandGate {
    pub fn new(
        relay: Arc<Mutex<RelayDriver>>,
        publisher: Option<Arc<dyn Publisher>>,
        house_id: &str,
    ) -> CommandGate {
        Self::with_lockout(relay, publisher, house_id, Duration::from_secs(LOCKOUT_SECONDS))
    }

    pub fn with_lockout(
        relay: Arc<Mutex<RelayDriver>>,
        publisher: Option<Arc<dyn Publisher>>,
        house_id: &str,
        lockout: Duration,
    ) -> CommandGate {
        CommandGate {
            relay,
            publisher,
            house_id: house_id.to_string(),
            lockout,
            epoch: Instant::now(),
            locked_until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn is_locked_out(&self) -> bool {
        self.now_ms() < self.locked_until_ms.load(Ordering::SeqCst)
    }

    /// Remaining lockout; zero when unlocked.
    pub fn remaining_lockout(&self) -> Duration {
        let until = self.locked_until_ms.load(Ordering::SeqCst);
        let now = self.now_ms();
        if until > now {
            Duration::from_millis(until - now)
        } else {
            Duration::ZERO
        }
    }

    /// Force-unlocks. The only operation allowed to shorten the deadline.
    pub fn clear_lockout(&self) {
        self.locked_until_ms.store(0, Ordering::SeqCst);
        tracing::info!("emergency lockout cleared manually");
    }

    /// Offers a commanded relay write. Dropped (returns `Ok(false)`) while
    /// the lockout runs; otherwise the driver is written exactly once.
    pub fn gate(&self, channel: u8, on: bool) -> Result<bool> {
        if self.is_locked_out() {
            tracing::warn!(
                "command rejected by gate (lockout {:.0}s remaining)",
                self.remaining_lockout().as_secs_f64()
            );
            return Ok(false);
        }
        self.relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_channel(channel, on)?;
        Ok(true)
    }

    /// Sole entry point for emergency-switch reactions. Nothing in this
    /// path may propagate an error.
    pub fn handle_gpio_event(&self, event: &GpioEvent) {
        let relay_channel = match di_relay_channel(event.di_pin) {
            Some(channel) => channel,
            None => {
                tracing::debug!("DI{:02} has no relay mapping, ignoring", event.di_pin);
                return;
            }
        };

        let state = event.value != 0;
        tracing::info!(
            "[emergency] DI{:02} -> relay ch{} {}",
            event.di_pin,
            relay_channel,
            if state { "ON" } else { "OFF" }
        );

        // direct write: the lockout armed below must not block the switch
        if let Err(err) = self
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_channel(relay_channel, state)
        {
            tracing::error!("emergency relay control failed: {}", err);
        }

        self.publish_override(event, relay_channel, state);

        if state {
            let until = self.now_ms() + self.lockout.as_millis() as u64;
            self.locked_until_ms.fetch_max(until, Ordering::SeqCst);
            tracing::warn!(
                "command lockout started: {}s (DI{:02} triggered)",
                self.lockout.as_secs(),
                event.di_pin
            );
        }
    }

    fn publish_override(&self, event: &GpioEvent, relay_channel: u8, state: bool) {
        let publisher = match self.publisher {
            Some(ref publisher) => publisher,
            None => return,
        };
        let topic = format!("agriha/{}/emergency/override", self.house_id);
        let payload = serde_json::json!({
            "di_pin": event.di_pin,
            "relay_ch": relay_channel,
            "state": state,
            "timestamp": unix_time(),
            "lockout_sec": if state { self.lockout.as_secs() } else { 0 },
        })
        .to_string();
        match publisher.publish(&topic, payload, 1, true) {
            Ok(()) => tracing::debug!("published: {}", topic),
            Err(err) => tracing::error!("emergency publish failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agriha::relay::{RelayDriver, REG_OLAT};
    use crate::agriha::testing::{CapturePublisher, MockBus, MockBusProbes};
    use std::thread;
    use std::time::Instant;

    fn fixture(lockout: Duration) -> (CommandGate, MockBusProbes, Arc<CapturePublisher>) {
        let bus = MockBus::new();
        let probes = bus.probes();
        let relay = Arc::new(Mutex::new(RelayDriver::with_bus(Box::new(bus)).unwrap()));
        let publisher = CapturePublisher::new();
        let gate = CommandGate::with_lockout(
            relay,
            Some(publisher.clone() as Arc<dyn Publisher>),
            "h01",
            lockout,
        );
        (gate, probes, publisher)
    }

    fn close_event(di_pin: u8) -> GpioEvent {
        GpioEvent { di_pin, line: 0, value: 1, timestamp: Instant::now() }
    }

    fn open_event(di_pin: u8) -> GpioEvent {
        GpioEvent { di_pin, line: 0, value: 0, timestamp: Instant::now() }
    }

    #[test]
    fn unlocked_gate_passes_commands() {
        let (gate, probes, _publisher) = fixture(Duration::from_secs(300));
        assert!(!gate.is_locked_out());
        assert_eq!(gate.remaining_lockout(), Duration::ZERO);
        assert!(gate.gate(3, true).unwrap());
        assert_eq!(probes.writes_to(REG_OLAT), vec![0x20]);
    }

    #[test]
    fn locked_gate_drops_commands_without_driver_write() {
        let (gate, probes, _publisher) = fixture(Duration::from_secs(300));
        gate.handle_gpio_event(&close_event(7));
        let writes_after_emergency = probes.writes_to(REG_OLAT).len();

        assert!(!gate.gate(3, true).unwrap());
        assert_eq!(probes.writes_to(REG_OLAT).len(), writes_after_emergency);
    }

    #[test]
    fn emergency_override_bypasses_lockout() {
        let (gate, probes, publisher) = fixture(Duration::from_secs(300));

        gate.handle_gpio_event(&close_event(9));

        // DI09 -> ch3 -> bit 0x20, written directly
        assert_eq!(probes.writes_to(REG_OLAT), vec![0x20]);

        let messages = publisher.on_topic("agriha/h01/emergency/override");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].qos, 1);
        assert!(messages[0].retained);
        let payload: serde_json::Value = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(payload["di_pin"], serde_json::json!(9));
        assert_eq!(payload["relay_ch"], serde_json::json!(3));
        assert_eq!(payload["state"], serde_json::json!(true));
        assert_eq!(payload["lockout_sec"], serde_json::json!(300));

        assert!(gate.is_locked_out());
        let remaining = gate.remaining_lockout().as_secs_f64();
        assert!(remaining > 299.0 && remaining <= 300.0, "remaining = {}", remaining);

        // a second close on another pin still writes despite the lockout
        gate.handle_gpio_event(&close_event(14));
        assert_eq!(probes.writes_to(REG_OLAT), vec![0x20, 0x21]);
    }

    #[test]
    fn switch_open_never_arms_or_shortens_lockout() {
        let (gate, probes, publisher) = fixture(Duration::from_secs(300));

        gate.handle_gpio_event(&open_event(9));
        assert!(!gate.is_locked_out());
        // the open still drove the relay off and was announced
        assert_eq!(probes.writes_to(REG_OLAT), vec![0x00]);
        let payload: serde_json::Value =
            serde_json::from_str(&publisher.on_topic("agriha/h01/emergency/override")[0].payload).unwrap();
        assert_eq!(payload["state"], serde_json::json!(false));
        assert_eq!(payload["lockout_sec"], serde_json::json!(0));

        gate.handle_gpio_event(&close_event(9));
        let before = gate.remaining_lockout();
        gate.handle_gpio_event(&open_event(9));
        let after = gate.remaining_lockout();
        assert!(after <= before && after.as_secs_f64() > 298.0);
    }

    #[test]
    fn repeated_closures_reinforce_the_deadline() {
        let (gate, _probes, _publisher) = fixture(Duration::from_secs(300));
        gate.handle_gpio_event(&close_event(7));
        thread::sleep(Duration::from_millis(50));
        gate.handle_gpio_event(&close_event(8));
        let remaining = gate.remaining_lockout().as_secs_f64();
        assert!(remaining > 299.0 && remaining <= 300.0);
    }

    #[test]
    fn lockout_expires() {
        let (gate, _probes, _publisher) = fixture(Duration::from_millis(50));
        gate.handle_gpio_event(&close_event(7));
        assert!(gate.is_locked_out());
        thread::sleep(Duration::from_millis(120));
        assert!(!gate.is_locked_out());
        assert!(gate.gate(2, true).unwrap());
    }

    #[test]
    fn clear_lockout_reports_and_unlocks() {
        let (gate, _probes, _publisher) = fixture(Duration::from_secs(300));
        gate.handle_gpio_event(&close_event(7));
        assert!(gate.is_locked_out());
        gate.clear_lockout();
        assert!(!gate.is_locked_out());
        assert_eq!(gate.remaining_lockout(), Duration::ZERO);
    }

    #[test]
    fn unmapped_di_pin_is_ignored() {
        let (gate, probes, publisher) = fixture(Duration::from_secs(300));
        gate.handle_gpio_event(&close_event(5));
        assert!(probes.writes_to(REG_OLAT).is_empty());
        assert!(publisher.messages().is_empty());
        assert!(!gate.is_locked_out());
    }

    #[test]
    fn emergency_path_swallows_driver_and_publish_failures() {
        let (gate, probes, publisher) = fixture(Duration::from_secs(300));
        probes.set_fail(true);
        publisher.set_fail(true);
        gate.handle_gpio_event(&close_event(7));
        // the lockout must still arm even when the hardware write failed
        assert!(gate.is_locked_out());
    }

    #[test]
    fn di_relay_map() {
        for (di_pin, channel) in [(7, 1), (8, 2), (9, 3), (10, 4), (11, 5), (12, 6), (13, 7), (14, 8)] {
            assert_eq!(di_relay_channel(di_pin), Some(channel));
        }
        assert_eq!(di_relay_channel(6), None);
        assert_eq!(di_relay_channel(15), None);
    }
}

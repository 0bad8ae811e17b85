pub mod bridge;
pub mod ccm;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod gate;
pub mod gpio;
pub mod mqtt;
pub mod onewire;
pub mod relay;
pub mod sensor;
pub mod weather;

/// Seconds since the UNIX epoch as a float; the timestamp format carried by
/// every broker payload.
pub fn unix_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::errors::{Error, Result};
    use super::mqtt::Publisher;
    use super::relay::RegisterBus;

    /// In-memory register file standing in for the MCP23008.
    pub(crate) struct MockBus {
        registers: Arc<Mutex<HashMap<u8, u8>>>,
        writes: Arc<Mutex<Vec<(u8, u8)>>>,
        fail: Arc<AtomicBool>,
    }

    /// Inspection handles that outlive the boxed-away bus.
    #[derive(Clone)]
    pub(crate) struct MockBusProbes {
        registers: Arc<Mutex<HashMap<u8, u8>>>,
        writes: Arc<Mutex<Vec<(u8, u8)>>>,
        fail: Arc<AtomicBool>,
    }

    impl MockBus {
        pub fn new() -> MockBus {
            MockBus {
                registers: Arc::new(Mutex::new(HashMap::new())),
                writes: Arc::new(Mutex::new(Vec::new())),
                fail: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn probes(&self) -> MockBusProbes {
            MockBusProbes {
                registers: Arc::clone(&self.registers),
                writes: Arc::clone(&self.writes),
                fail: Arc::clone(&self.fail),
            }
        }
    }

    impl MockBusProbes {
        pub fn writes(&self) -> Vec<(u8, u8)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn writes_to(&self, register: u8) -> Vec<u8> {
            self.writes().into_iter().filter(|&(r, _)| r == register).map(|(_, v)| v).collect()
        }

        pub fn read_register(&self, register: u8) -> u8 {
            *self.registers.lock().unwrap().get(&register).unwrap_or(&0)
        }

        pub fn poke_register(&self, register: u8, value: u8) {
            self.registers.lock().unwrap().insert(register, value);
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl RegisterBus for MockBus {
        fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "mock bus fault")));
            }
            self.registers.lock().unwrap().insert(register, value);
            self.writes.lock().unwrap().push((register, value));
            Ok(())
        }

        fn read_register(&mut self, register: u8) -> Result<u8> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "mock bus fault")));
            }
            Ok(*self.registers.lock().unwrap().get(&register).unwrap_or(&0))
        }
    }

    /// Broker publisher that records every message instead of sending it.
    #[derive(Default)]
    pub(crate) struct CapturePublisher {
        messages: Mutex<Vec<CapturedMessage>>,
        fail: AtomicBool,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct CapturedMessage {
        pub topic: String,
        pub payload: String,
        pub qos: i32,
        pub retained: bool,
    }

    impl CapturePublisher {
        pub fn new() -> Arc<CapturePublisher> {
            Arc::new(CapturePublisher::default())
        }

        pub fn messages(&self) -> Vec<CapturedMessage> {
            self.messages.lock().unwrap().clone()
        }

        pub fn on_topic(&self, topic: &str) -> Vec<CapturedMessage> {
            self.messages().into_iter().filter(|m| m.topic == topic).collect()
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl Publisher for CapturePublisher {
        fn publish(&self, topic: &str, payload: String, qos: i32, retained: bool) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "mock broker down")));
            }
            self.messages.lock().unwrap().push(CapturedMessage {
                topic: topic.to_string(),
                payload,
                qos,
                retained,
            });
            Ok(())
        }
    }
}

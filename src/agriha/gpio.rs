//! Edge watcher for the DI emergency switches.
//!
//! UniPi 1.1 DI -> BCM line offsets:
//!   DI07 -> GPIO11, DI08 -> GPIO7, DI09 -> GPIO8, DI10 -> GPIO9,
//!   DI11 -> GPIO25, DI12 -> GPIO10, DI13 -> GPIO31, DI14 -> GPIO30
//!
//! Inputs are pulled up: a falling edge means the switch closed and is
//! reported as logical value 1, a rising edge as 0.

use std::sync::Arc;
use std::time::Instant;

use rppal::gpio::{Gpio, InputPin, Level, Trigger};

use super::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpioEvent {
    /// DI pin number (7-14).
    pub di_pin: u8,
    /// Underlying BCM line offset.
    pub line: u8,
    /// 1 = switch closed (falling edge), 0 = switch open (rising edge).
    pub value: u8,
    pub timestamp: Instant,
}

pub fn di_line_offset(di_pin: u8) -> Option<u8> {
    match di_pin {
        7 => Some(11),
        8 => Some(7),
        9 => Some(8),
        10 => Some(9),
        11 => Some(25),
        12 => Some(10),
        13 => Some(31),
        14 => Some(30),
        _ => None,
    }
}

pub fn line_di_pin(line: u8) -> Option<u8> {
    match line {
        11 => Some(7),
        7 => Some(8),
        8 => Some(9),
        9 => Some(10),
        25 => Some(11),
        10 => Some(12),
        31 => Some(13),
        30 => Some(14),
        _ => None,
    }
}

/// Holds the requested input lines; dropping (or `close`) releases them.
///
/// Events are delivered per line in kernel order. There is no debouncing:
/// the callback treats repeated closures as reinforcing, not toggling.
pub struct GpioWatcher {
    pins: Vec<InputPin>,
}

impl GpioWatcher {
    /// Requests each configured DI line with pull-up bias and both-edge
    /// interrupts, invoking `callback` for every edge.
    ///
    /// A line the kernel does not expose is logged and skipped; the watcher
    /// starts as long as at least one line could be requested.
    pub fn start<C>(chip: &str, di_pins: &[u8], callback: C) -> Result<GpioWatcher>
    where
        C: Fn(GpioEvent) + Send + Sync + 'static,
    {
        let gpio = Gpio::new()?;
        let callback = Arc::new(callback);
        let mut pins = Vec::new();

        for &di_pin in di_pins {
            let line = match di_line_offset(di_pin) {
                Some(line) => line,
                None => {
                    tracing::warn!("unknown DI pin: DI{:02}, skipping", di_pin);
                    continue;
                }
            };
            let mut pin = match gpio.get(line) {
                Ok(pin) => pin.into_input_pullup(),
                Err(err) => {
                    tracing::error!("DI{:02} (GPIO{}) unavailable: {}", di_pin, line, err);
                    continue;
                }
            };
            let handler = Arc::clone(&callback);
            let result = pin.set_async_interrupt(Trigger::Both, move |level| {
                let value = match level {
                    Level::Low => 1,
                    Level::High => 0,
                };
                handler(GpioEvent { di_pin, line, value, timestamp: Instant::now() });
            });
            if let Err(err) = result {
                tracing::error!("DI{:02} (GPIO{}) interrupt request failed: {}", di_pin, line, err);
                continue;
            }
            pins.push(pin);
        }

        if pins.is_empty() {
            return Err(Error::InvalidArgument(String::from("no valid DI pins to watch")));
        }

        tracing::info!("GPIO watch open: {} ({} lines)", chip, pins.len());
        Ok(GpioWatcher { pins })
    }

    /// Current logical level of a watched DI pin (1 = switch closed).
    pub fn get_value(&self, di_pin: u8) -> Result<u8> {
        let line = di_line_offset(di_pin)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown DI pin: {}", di_pin)))?;
        for pin in &self.pins {
            if pin.pin() == line {
                return Ok(match pin.read() {
                    Level::Low => 1,
                    Level::High => 0,
                });
            }
        }
        Err(Error::InvalidArgument(format!("DI{:02} is not watched", di_pin)))
    }

    pub fn close(mut self) {
        for pin in &mut self.pins {
            let _ = pin.clear_async_interrupt();
        }
        tracing::info!("GPIO watch closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn di_to_line_map() {
        assert_eq!(di_line_offset(7), Some(11));
        assert_eq!(di_line_offset(8), Some(7));
        assert_eq!(di_line_offset(9), Some(8));
        assert_eq!(di_line_offset(10), Some(9));
        assert_eq!(di_line_offset(11), Some(25));
        assert_eq!(di_line_offset(12), Some(10));
        assert_eq!(di_line_offset(13), Some(31));
        assert_eq!(di_line_offset(14), Some(30));
        assert_eq!(di_line_offset(6), None);
        assert_eq!(di_line_offset(15), None);
    }

    #[test]
    fn line_map_is_inverse() {
        for di_pin in 7..=14u8 {
            let line = di_line_offset(di_pin).unwrap();
            assert_eq!(line_di_pin(line), Some(di_pin));
        }
        assert_eq!(line_di_pin(0), None);
    }
}

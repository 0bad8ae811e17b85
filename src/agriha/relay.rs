//! MCP23008 8-channel relay driver.
//!
//! Registers:
//!   IODIR (0x00): I/O direction (0 = output)
//!   GPIO  (0x09): port read
//!   OLAT  (0x0A): output latch write
//!
//! The board is wired in reverse: ch1 = GP7 (0x80), ch2 = GP6 (0x40), ...
//! ch8 = GP0 (0x01).

use rppal::i2c::I2c;

use super::errors::{Error, Result};

/// I/O direction register (0 = output, 1 = input).
pub const REG_IODIR: u8 = 0x00;
/// GPIO port register (read).
pub const REG_GPIO: u8 = 0x09;
/// Output latch register (write).
pub const REG_OLAT: u8 = 0x0A;

/// Register-level access to the expander. Production is one I²C transaction
/// per call; tests substitute an in-memory register file.
pub trait RegisterBus: Send {
    fn write_register(&mut self, register: u8, value: u8) -> Result<()>;
    fn read_register(&mut self, register: u8) -> Result<u8>;
}

pub struct I2cBus {
    i2c: I2c,
}

impl I2cBus {
    pub fn open(bus: u8, addr: u16) -> Result<I2cBus> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(addr)?;
        Ok(I2cBus { i2c })
    }
}

impl RegisterBus for I2cBus {
    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c.smbus_write_byte(register, value)?;
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        Ok(self.i2c.smbus_read_byte(register)?)
    }
}

/// Owns the output latch of the expander. Not thread-safe on its own:
/// callers serialize through a mutex, and every commanded write goes
/// through the command gate.
pub struct RelayDriver {
    bus: Box<dyn RegisterBus>,
    /// Shadow of the last value written to OLAT.
    olat: u8,
}

impl RelayDriver {
    pub fn open(bus: u8, addr: u16) -> Result<RelayDriver> {
        let driver = Self::with_bus(Box::new(I2cBus::open(bus, addr)?))?;
        tracing::debug!("MCP23008 initialized at bus={} addr=0x{:02X}", bus, addr);
        Ok(driver)
    }

    /// Puts all 8 pins in output mode and zeroes the shadow.
    pub fn with_bus(mut bus: Box<dyn RegisterBus>) -> Result<RelayDriver> {
        bus.write_register(REG_IODIR, 0x00)?;
        Ok(RelayDriver { bus, olat: 0x00 })
    }

    /// Maps a channel number (1-8) to its bit mask.
    ///
    /// Reverse wiring: ch1 = 0x80, ch2 = 0x40, ..., ch8 = 0x01.
    pub fn channel_bit(channel: u8) -> Result<u8> {
        if !(1..=8).contains(&channel) {
            return Err(Error::InvalidArgument(format!("channel must be 1-8, got {}", channel)));
        }
        Ok(1 << (8 - channel))
    }

    pub fn set_channel(&mut self, channel: u8, on: bool) -> Result<()> {
        let bit = Self::channel_bit(channel)?;
        let next = if on { self.olat | bit } else { self.olat & !bit };
        self.bus.write_register(REG_OLAT, next)?;
        self.olat = next;
        tracing::debug!("relay ch{} {} (olat=0x{:02X})", channel, if on { "ON" } else { "OFF" }, self.olat);
        Ok(())
    }

    /// Reads all 8 channel states from the output latch register, not the
    /// shadow, so state changed behind the driver's back is observable.
    pub fn get_mask(&mut self) -> Result<u8> {
        self.bus.read_register(REG_OLAT)
    }

    pub fn get_channel(&mut self, channel: u8) -> Result<bool> {
        let bit = Self::channel_bit(channel)?;
        Ok(self.get_mask()? & bit != 0)
    }

    /// Writes all 8 channels at once. 0x80 = only ch1 on.
    pub fn set_mask(&mut self, mask: u8) -> Result<()> {
        self.bus.write_register(REG_OLAT, mask)?;
        self.olat = mask;
        tracing::debug!("relay set_mask(0x{:02X})", self.olat);
        Ok(())
    }

    pub fn all_off(&mut self) -> Result<()> {
        self.set_mask(0x00)
    }

    /// Releases the bus handle. Dropping the driver has the same effect.
    pub fn close(self) {}
}

//! Misol WH65LP weather station frame codec (RS485, 9600 8N1).
//!
//! Frames are pushed by the station about every 16 seconds: 17 bytes, or
//! 21 bytes when barometric pressure is fitted.
//!
//! Byte map:
//!   0      sync (0x24)
//!   1      sensor id
//!   2,3    wind direction deg = b2 | ((b3 & 0x80) << 1)
//!   3,4    temperature       = ((b4 | ((b3 & 0x07) << 8)) - 400) / 10 °C
//!   5      humidity %
//!   3,6    wind speed        = (b6 | ((b3 & 0x10) << 4)) / 8 * 1.12 m/s
//!   7      gust              = b7 * 1.12 m/s
//!   8,9    rainfall          = u16be * 0.3 mm (accumulating)
//!   10,11  UV                = u16be / 10 W/m²
//!   12-14  illuminance       = u24be / 10 lux
//!   3.3    battery-low flag
//!   16     checksum: sum(b0..b15) & 0xFF
//!   17-19  pressure          = u24be / 100 hPa (extended frame only)

use std::io::{self, Read};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::errors::{Error, Result};

pub const SYNC_BYTE: u8 = 0x24;
/// Basic frame, up to and including the checksum.
pub const FRAME_LEN_BASE: usize = 17;
/// Extended frame with pressure.
pub const FRAME_LEN_EXT: usize = 21;

pub const SENTINEL_WIND_DIR: u16 = 0x1FF;
pub const SENTINEL_TEMP: u16 = 0x7FF;
pub const SENTINEL_WIND: u16 = 0x1FF;
pub const SENTINEL_GUST: u8 = 0xFF;
pub const SENTINEL_UV: u16 = 0xFFFF;
pub const SENTINEL_LIGHT: u32 = 0xFF_FFFF;

/// How long to wait for the 4 extra pressure bytes after a verified frame.
const EXT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// A decoded frame. Sentinel-valued measurands ("measurement invalid")
/// decode to `None` and serialize as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub wind_dir_deg: Option<u16>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: u8,
    pub wind_speed_ms: Option<f64>,
    pub gust_speed_ms: Option<f64>,
    /// Monotonically accumulating counter, 0.3 mm per tick.
    pub rainfall_mm: f64,
    pub uv_wm2: Option<f64>,
    pub light_lux: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub battery_low: bool,
}

/// Low 8 bits of the sum of bytes 0..16.
pub fn checksum(data: &[u8]) -> u8 {
    data[..16].iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// True iff the frame is long enough and byte 16 matches the checksum.
pub fn verify(data: &[u8]) -> bool {
    data.len() >= FRAME_LEN_BASE && checksum(data) == data[16]
}

/// Decodes a verified 17- or 21-byte frame.
pub fn decode(data: &[u8]) -> Result<WeatherReading> {
    if data.len() < FRAME_LEN_BASE {
        return Err(Error::Decode(format!("frame too short: {} bytes (need {})", data.len(), FRAME_LEN_BASE)));
    }

    let b3 = data[3];

    let wind_dir_raw = u16::from(data[2]) | (u16::from(b3 & 0x80) << 1);
    let temp_raw = u16::from(data[4]) | (u16::from(b3 & 0x07) << 8);
    let wind_raw = u16::from(data[6]) | (u16::from(b3 & 0x10) << 4);
    let gust_raw = data[7];
    let rain_raw = BigEndian::read_u16(&data[8..10]);
    let uv_raw = BigEndian::read_u16(&data[10..12]);
    let light_raw = BigEndian::read_u24(&data[12..15]);

    let pressure_hpa = if data.len() >= FRAME_LEN_EXT {
        Some(f64::from(BigEndian::read_u24(&data[17..20])) / 100.0)
    } else {
        None
    };

    Ok(WeatherReading {
        wind_dir_deg: (wind_dir_raw != SENTINEL_WIND_DIR).then(|| wind_dir_raw),
        temperature_c: (temp_raw != SENTINEL_TEMP).then(|| (f64::from(temp_raw) - 400.0) / 10.0),
        humidity_pct: data[5],
        wind_speed_ms: (wind_raw != SENTINEL_WIND).then(|| f64::from(wind_raw) / 8.0 * 1.12),
        gust_speed_ms: (gust_raw != SENTINEL_GUST).then(|| f64::from(gust_raw) * 1.12),
        rainfall_mm: f64::from(rain_raw) * 0.3,
        uv_wm2: (uv_raw != SENTINEL_UV).then(|| f64::from(uv_raw) / 10.0),
        light_lux: (light_raw != SENTINEL_LIGHT).then(|| f64::from(light_raw) / 10.0),
        pressure_hpa,
        battery_low: b3 & 0x08 != 0,
    })
}

/// A byte stream whose per-read timeout can be adjusted: the frame reader
/// shortens it while probing for the extended-frame tail.
pub trait FrameStream: Read {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;
    fn read_timeout(&self) -> Duration;
}

impl FrameStream for Box<dyn serialport::SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)?;
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        serialport::SerialPort::timeout(self.as_ref())
    }
}

/// Reads one frame off the stream.
///
/// Discards bytes until the 0x24 sync byte appears (up to `sync_timeout`),
/// collects the 17-byte base frame, verifies the checksum, then probes
/// briefly for the 4-byte pressure extension.
pub fn read_frame<S: FrameStream + ?Sized>(stream: &mut S, sync_timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + sync_timeout;

    let mut byte = [0u8; 1];
    loop {
        if Instant::now() > deadline {
            tracing::warn!("timeout waiting for 0x{:02X} sync byte", SYNC_BYTE);
            return Err(Error::Timeout);
        }
        match stream.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) if byte[0] == SYNC_BYTE => break,
            Ok(_) => tracing::trace!("skip: 0x{:02X}", byte[0]),
            Err(ref err) if is_read_timeout(err) => continue,
            Err(err) => return Err(Error::Io(err)),
        }
    }

    let mut frame = vec![0u8; FRAME_LEN_BASE];
    frame[0] = SYNC_BYTE;
    read_exact(stream, &mut frame[1..])?;

    if !verify(&frame) {
        let calculated = checksum(&frame);
        tracing::warn!(
            "checksum mismatch: calculated=0x{:02X}, got=0x{:02X} | frame={:02x?}",
            calculated,
            frame[16],
            frame
        );
        return Err(Error::Checksum { calculated, expected: frame[16] });
    }

    // extended frame (pressure) if 4 more bytes arrive promptly
    let original_timeout = stream.read_timeout();
    stream.set_read_timeout(EXT_PROBE_TIMEOUT)?;
    let mut ext = [0u8; 4];
    let got = read_available(stream, &mut ext);
    stream.set_read_timeout(original_timeout)?;

    if got == ext.len() {
        tracing::debug!("extended frame ({} bytes)", FRAME_LEN_EXT);
        frame.extend_from_slice(&ext);
    } else {
        tracing::debug!("basic frame ({} bytes)", FRAME_LEN_BASE);
    }
    Ok(frame)
}

fn is_read_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Fills `buf` completely or fails with `Timeout` on a short read.
fn read_exact<S: FrameStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                tracing::warn!("short read: got {}/{} bytes", filled, buf.len());
                return Err(Error::Timeout);
            }
            Ok(n) => filled += n,
            Err(ref err) if is_read_timeout(err) => {
                tracing::warn!("short read: got {}/{} bytes", filled, buf.len());
                return Err(Error::Timeout);
            }
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(())
}

/// Reads as much of `buf` as arrives before the stream's timeout.
fn read_available<S: FrameStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => break,
        }
    }
    filled
}

use core::fmt;
use std::error;
use std::io;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Caller mistake: a channel or parameter outside its documented range.
    InvalidArgument(String),

    I2c(rppal::i2c::Error),

    Gpio(rppal::gpio::Error),

    Serial(serialport::Error),

    Io(io::Error),

    /// A bounded wait elapsed before the expected data arrived.
    Timeout,

    /// Weather frame rejected before decode.
    Checksum { calculated: u8, expected: u8 },

    /// Malformed JSON, XML, or field value.
    Decode(String),

    Mqtt(paho_mqtt::Error),

    /// The command gate refused a relay write.
    LockedOut,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::InvalidArgument(ref msg) => write!(f, "Invalid argument: {}", msg),
            Self::I2c(ref err) => write!(f, "I2C error: {}", err),
            Self::Gpio(ref err) => write!(f, "GPIO error: {}", err),
            Self::Serial(ref err) => write!(f, "Serial error: {}", err),
            Self::Io(ref err) => write!(f, "IO error: {}", err),
            Self::Timeout => write!(f, "Timed out"),
            Self::Checksum { calculated, expected } => write!(f, "Checksum mismatch: calculated=0x{:02X}, got=0x{:02X}", calculated, expected),
            Self::Decode(ref msg) => write!(f, "Decode error: {}", msg),
            Self::Mqtt(ref err) => write!(f, "MQTT error: {}", err),
            Self::LockedOut => write!(f, "Locked out by emergency override"),
        }
    }
}

impl error::Error for Error {}

impl From<rppal::i2c::Error> for Error {
    fn from(err: rppal::i2c::Error) -> Self {
        Self::I2c(err)
    }
}

impl From<rppal::gpio::Error> for Error {
    fn from(err: rppal::gpio::Error) -> Self {
        Self::Gpio(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Serial(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<paho_mqtt::Error> for Error {
    fn from(err: paho_mqtt::Error) -> Self {
        Self::Mqtt(err)
    }
}

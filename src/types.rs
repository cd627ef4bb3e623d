use serde::{Deserialize, Serialize};
use std::{fmt, ops::BitOr, time::Duration};

use crate::error::{BikeError, Result};

/// Session mode bitmask sent once with the START handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeFlags(u8);

impl ModeFlags {
    /// Plain pedalling; the firmware drives the motor from acceleration commands
    pub const NORMAL: Self = Self(0x00);
    /// The firmware also accepts virtual HID controller input
    pub const VIRTUAL_CONTROLLER: Self = Self(0x01);

    /// Build flags from the raw wire byte
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw wire byte
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ModeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ModeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NORMAL {
            return write!(f, "Normal");
        }
        if self.contains(Self::VIRTUAL_CONTROLLER) {
            write!(f, "Virtual Controller")?;
        }
        let unknown = self.0 & !Self::VIRTUAL_CONTROLLER.0;
        if unknown != 0 {
            if self.contains(Self::VIRTUAL_CONTROLLER) {
                write!(f, " | ")?;
            }
            write!(f, "0x{unknown:02X}")?;
        }
        Ok(())
    }
}

/// One-byte outcome code answered by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    /// Command accepted
    Success = 0x00,
    /// Firmware failed without a specific reason
    UnspecifiedError = 0x01,
    /// START sent while a session is already running
    ConnectionAlreadyEstablished = 0x02,
    /// START carried mode flags the firmware does not support
    BadModeFlags = 0x03,
    /// Command argument outside the accepted range
    InputOutOfRange = 0x04,
    /// No motor voltage lookup table stored on the device
    MotorVoltageLutMissing = 0x05,
    /// No servo degrees lookup table stored on the device
    ServoDegreesLutMissing = 0x06,
}

impl ResultCode {
    /// Check if this is [`ResultCode::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Check if this code reports a missing calibration table
    #[must_use]
    pub const fn is_lut_missing(self) -> bool {
        matches!(
            self,
            Self::MotorVoltageLutMissing | Self::ServoDegreesLutMissing
        )
    }

    /// Convert to `Ok(())` on success and [`BikeError::DeviceRejected`] otherwise
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceRejected`] carrying this code when it is not
    /// [`ResultCode::Success`].
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(BikeError::DeviceRejected(self))
        }
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = BikeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::UnspecifiedError),
            0x02 => Ok(Self::ConnectionAlreadyEstablished),
            0x03 => Ok(Self::BadModeFlags),
            0x04 => Ok(Self::InputOutOfRange),
            0x05 => Ok(Self::MotorVoltageLutMissing),
            0x06 => Ok(Self::ServoDegreesLutMissing),
            other => Err(BikeError::ProtocolCorruption(format!(
                "Unknown result code: {other:02X}"
            ))),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::UnspecifiedError => write!(f, "Unspecified Error"),
            Self::ConnectionAlreadyEstablished => write!(f, "Connection Already Established"),
            Self::BadModeFlags => write!(f, "Bad Mode Flags"),
            Self::InputOutOfRange => write!(f, "Input Out Of Range"),
            Self::MotorVoltageLutMissing => write!(f, "Motor Voltage LUT Missing"),
            Self::ServoDegreesLutMissing => write!(f, "Servo Degrees LUT Missing"),
        }
    }
}

/// Lifecycle of a driver session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, transport not yet in use
    Disconnected,
    /// START sent, waiting for the device's answer
    Handshaking,
    /// Handshake succeeded; commands accepted, heartbeat running
    Active,
    /// STOP in flight
    Closing,
    /// Transport released after STOP, a failed handshake or a fatal error
    Closed,
    /// Transport released after EMERGENCY_STOP
    EmergencyStopped,
}

impl SessionState {
    /// Check if no further traffic is permitted
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::EmergencyStopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Active => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::EmergencyStopped => write!(f, "Emergency Stopped"),
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BikeConfig {
    /// Serial device path
    pub serial_port: String,
    /// Serial bit rate
    pub baud_rate: u32,
    /// Mode flags sent with the START handshake
    pub mode_flags: ModeFlags,
    /// Delay between heartbeat exchanges in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Serial read poll granularity in milliseconds
    ///
    /// Only bounds how quickly a blocked read notices that the transport was
    /// closed. Reads themselves never time out.
    pub read_poll_interval_ms: u64,
}

impl BikeConfig {
    /// Create a configuration for the given mode with every other field defaulted
    #[must_use]
    pub fn with_mode(mode_flags: ModeFlags) -> Self {
        Self {
            mode_flags,
            ..Self::default()
        }
    }

    /// Heartbeat interval as a [`Duration`]
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Serial read poll granularity as a [`Duration`]
    #[must_use]
    pub const fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }
}

impl Default for BikeConfig {
    fn default() -> Self {
        Self {
            serial_port: crate::DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: crate::DEFAULT_BAUD_RATE,
            mode_flags: ModeFlags::NORMAL,
            heartbeat_interval_ms: 1_000,
            read_poll_interval_ms: 100,
        }
    }
}

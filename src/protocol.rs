use crate::{
    error::{BikeError, Result},
    types::{ModeFlags, ResultCode},
    STRING_SENTINEL,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of a result code reply in bytes
pub const RESULT_SIZE: usize = 1;

/// Size of an IEEE-754 single precision reply in bytes
pub const FLOAT_SIZE: usize = 4;

/// Command opcodes understood by the bike firmware
///
/// The numbering must match the firmware's decoder byte for byte. A mismatch
/// is not detectable from the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Open a session with mode flags
    Start = 0x01,
    /// Heartbeat
    KeepAlive = 0x02,
    /// Close the session
    Stop = 0x03,
    /// Read the flywheel velocity
    GetWheelVelocity = 0x04,
    /// Drive the motor at a raw voltage
    SetMotorVoltage = 0x05,
    /// Move the resistance servo to an angle
    SetServoDegrees = 0x06,
    /// Generate (and optionally persist) the motor voltage lookup table
    GetMotorVoltageLut = 0x07,
    /// Generate (and optionally persist) the servo degrees lookup table
    GetServoDegreesLut = 0x08,
    /// Apply a target acceleration through the lookup tables
    SetAcceleration = 0x09,
    /// Feed virtual HID controller axes
    SetHidController = 0x0A,
    /// Halt immediately; the firmware sends no reply
    EmergencyStop = 0x0C,
}

impl Opcode {
    /// Number of payload bytes following the opcode in a request
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Start => 1,
            Self::KeepAlive | Self::Stop | Self::GetWheelVelocity | Self::EmergencyStop => 0,
            Self::SetMotorVoltage
            | Self::SetServoDegrees
            | Self::SetAcceleration
            | Self::SetHidController => 4,
            Self::GetMotorVoltageLut => 5,
            Self::GetServoDegreesLut => 2,
        }
    }

    /// Shape of the reply the firmware sends for this opcode
    #[must_use]
    pub const fn reply_kind(self) -> ReplyKind {
        match self {
            Self::GetWheelVelocity => ReplyKind::Float,
            Self::GetMotorVoltageLut | Self::GetServoDegreesLut => ReplyKind::Text,
            Self::EmergencyStop => ReplyKind::Nothing,
            _ => ReplyKind::ResultCode,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = BikeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::KeepAlive),
            0x03 => Ok(Self::Stop),
            0x04 => Ok(Self::GetWheelVelocity),
            0x05 => Ok(Self::SetMotorVoltage),
            0x06 => Ok(Self::SetServoDegrees),
            0x07 => Ok(Self::GetMotorVoltageLut),
            0x08 => Ok(Self::GetServoDegreesLut),
            0x09 => Ok(Self::SetAcceleration),
            0x0A => Ok(Self::SetHidController),
            0x0C => Ok(Self::EmergencyStop),
            other => Err(BikeError::ProtocolCorruption(format!(
                "Unknown opcode: {other:02X}"
            ))),
        }
    }
}

/// How a reply is framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// One result code byte
    ResultCode,
    /// Four byte little-endian float
    Float,
    /// UTF-8 text terminated by [`STRING_SENTINEL`]
    Text,
    /// No reply at all
    Nothing,
}

impl ReplyKind {
    /// Exact reply length for fixed-size replies
    #[must_use]
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::ResultCode => Some(RESULT_SIZE),
            Self::Float => Some(FLOAT_SIZE),
            Self::Text | Self::Nothing => None,
        }
    }
}

/// A request to the firmware with its payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Session handshake
    Start(ModeFlags),
    /// Heartbeat
    KeepAlive,
    /// Session close
    Stop,
    /// Velocity query
    GetWheelVelocity,
    /// Raw motor voltage
    SetMotorVoltage(f32),
    /// Raw servo angle in degrees
    SetServoDegrees(f32),
    /// Motor voltage calibration table request
    GetMotorVoltageLut {
        /// Table resolution
        steps: u32,
        /// Store the generated table on the device
        persist: bool,
    },
    /// Servo degrees calibration table request
    GetServoDegreesLut {
        /// Table resolution
        steps: u8,
        /// Store the generated table on the device
        persist: bool,
    },
    /// Target acceleration in m/s²
    SetAcceleration(f32),
    /// Virtual controller axes
    SetHidController {
        /// Combined throttle (positive) and brake (negative) axis
        throttle_and_brake: i16,
        /// Steering axis
        steering: i16,
    },
    /// Fire-and-forget halt
    EmergencyStop,
}

impl Command {
    /// Opcode of this command
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Start(_) => Opcode::Start,
            Self::KeepAlive => Opcode::KeepAlive,
            Self::Stop => Opcode::Stop,
            Self::GetWheelVelocity => Opcode::GetWheelVelocity,
            Self::SetMotorVoltage(_) => Opcode::SetMotorVoltage,
            Self::SetServoDegrees(_) => Opcode::SetServoDegrees,
            Self::GetMotorVoltageLut { .. } => Opcode::GetMotorVoltageLut,
            Self::GetServoDegreesLut { .. } => Opcode::GetServoDegreesLut,
            Self::SetAcceleration(_) => Opcode::SetAcceleration,
            Self::SetHidController { .. } => Opcode::SetHidController,
            Self::EmergencyStop => Opcode::EmergencyStop,
        }
    }

    /// Shape of the reply this command expects
    #[must_use]
    pub const fn reply_kind(&self) -> ReplyKind {
        self.opcode().reply_kind()
    }

    /// Serialize to the exact request bytes: opcode followed by the packed payload
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let opcode = self.opcode();
        let mut buf = BytesMut::with_capacity(1 + opcode.payload_len());

        buf.put_u8(opcode as u8);

        match *self {
            Self::Start(flags) => buf.put_u8(flags.bits()),
            Self::SetMotorVoltage(value)
            | Self::SetServoDegrees(value)
            | Self::SetAcceleration(value) => buf.put_f32_le(value),
            Self::GetMotorVoltageLut { steps, persist } => {
                buf.put_u32_le(steps);
                buf.put_u8(u8::from(persist));
            }
            Self::GetServoDegreesLut { steps, persist } => {
                buf.put_u8(steps);
                buf.put_u8(u8::from(persist));
            }
            Self::SetHidController {
                throttle_and_brake,
                steering,
            } => {
                buf.put_i16_le(throttle_and_brake);
                buf.put_i16_le(steering);
            }
            Self::KeepAlive | Self::Stop | Self::GetWheelVelocity | Self::EmergencyStop => {}
        }

        buf.freeze()
    }

    /// Parse a complete request frame, as the firmware would
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] for an unknown opcode, a
    /// payload of the wrong length, or a boolean byte other than 0 or 1.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&first, payload)) = data.split_first() else {
            return Err(BikeError::ProtocolCorruption("Empty request frame".to_string()));
        };

        let opcode = Opcode::try_from(first)?;
        if payload.len() != opcode.payload_len() {
            return Err(BikeError::ProtocolCorruption(format!(
                "{opcode:?} payload is {} bytes, expected {}",
                payload.len(),
                opcode.payload_len()
            )));
        }

        let mut buf = payload;
        let command = match opcode {
            Opcode::Start => Self::Start(ModeFlags::from_bits(buf.get_u8())),
            Opcode::KeepAlive => Self::KeepAlive,
            Opcode::Stop => Self::Stop,
            Opcode::GetWheelVelocity => Self::GetWheelVelocity,
            Opcode::SetMotorVoltage => Self::SetMotorVoltage(buf.get_f32_le()),
            Opcode::SetServoDegrees => Self::SetServoDegrees(buf.get_f32_le()),
            Opcode::GetMotorVoltageLut => Self::GetMotorVoltageLut {
                steps: buf.get_u32_le(),
                persist: decode_bool(buf.get_u8())?,
            },
            Opcode::GetServoDegreesLut => Self::GetServoDegreesLut {
                steps: buf.get_u8(),
                persist: decode_bool(buf.get_u8())?,
            },
            Opcode::SetAcceleration => Self::SetAcceleration(buf.get_f32_le()),
            Opcode::SetHidController => Self::SetHidController {
                throttle_and_brake: buf.get_i16_le(),
                steering: buf.get_i16_le(),
            },
            Opcode::EmergencyStop => Self::EmergencyStop,
        };

        Ok(command)
    }
}

fn decode_bool(byte: u8) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(BikeError::ProtocolCorruption(format!(
            "Invalid boolean byte: {other:02X}"
        ))),
    }
}

/// A decoded reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Outcome of a command without a typed payload
    Result(ResultCode),
    /// Wheel velocity
    Velocity(f32),
    /// Lookup table text with the sentinel removed
    Text(String),
    /// Fire-and-forget command, nothing was read
    Nothing,
}

impl Reply {
    /// Take the result code out of this reply
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] if the reply carries something else.
    pub fn into_result_code(self) -> Result<ResultCode> {
        match self {
            Self::Result(code) => Ok(code),
            other => Err(unexpected_reply("result code", &other)),
        }
    }

    /// Take the velocity out of this reply
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] if the reply carries something else.
    pub fn into_velocity(self) -> Result<f32> {
        match self {
            Self::Velocity(velocity) => Ok(velocity),
            other => Err(unexpected_reply("velocity", &other)),
        }
    }

    /// Take the text out of this reply
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] if the reply carries something else.
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(unexpected_reply("text", &other)),
        }
    }
}

fn unexpected_reply(expected: &str, reply: &Reply) -> BikeError {
    BikeError::ProtocolCorruption(format!("Expected {expected} reply, got {reply:?}"))
}

/// Decode a one byte result code reply
///
/// # Errors
///
/// Returns [`BikeError::ProtocolCorruption`] if the reply is not exactly one
/// byte or the byte is not a known result code.
pub fn decode_result_code(data: &[u8]) -> Result<ResultCode> {
    match data {
        [byte] => ResultCode::try_from(*byte),
        _ => Err(BikeError::ProtocolCorruption(format!(
            "Result reply is {} bytes, expected {RESULT_SIZE}",
            data.len()
        ))),
    }
}

/// Decode a little-endian f32 velocity reply
///
/// # Errors
///
/// Returns [`BikeError::ProtocolCorruption`] if the reply is not exactly four bytes.
pub fn decode_velocity(data: &[u8]) -> Result<f32> {
    if data.len() != FLOAT_SIZE {
        return Err(BikeError::ProtocolCorruption(format!(
            "Velocity reply is {} bytes, expected {FLOAT_SIZE}",
            data.len()
        )));
    }

    let mut buf = data;
    Ok(buf.get_f32_le())
}

/// Decode a sentinel terminated lookup table reply
///
/// `data` is everything read up to and including the sentinel.
///
/// # Errors
///
/// Returns [`BikeError::ProtocolCorruption`] if the data does not end with
/// [`STRING_SENTINEL`] or is not valid UTF-8.
pub fn decode_lut(data: &[u8]) -> Result<String> {
    let Some((&last, text)) = data.split_last() else {
        return Err(BikeError::ProtocolCorruption(
            "Lookup table reply is empty, sentinel missing".to_string(),
        ));
    };

    if last != STRING_SENTINEL {
        return Err(BikeError::ProtocolCorruption(format!(
            "Lookup table reply ended after {} bytes without a sentinel",
            data.len()
        )));
    }

    String::from_utf8(text.to_vec()).map_err(|e| {
        BikeError::ProtocolCorruption(format!("Lookup table reply is not UTF-8: {e}"))
    })
}

use thiserror::Error;

use crate::types::{ResultCode, SessionState};

/// Errors that can occur while driving an exercise bike
#[derive(Error, Debug)]
pub enum BikeError {
    /// The byte stream failed to deliver or accept the requested bytes
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The serial device could not be opened
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A received byte sequence does not decode under the wire protocol
    #[error("Protocol corruption: {0}")]
    ProtocolCorruption(String),

    /// The START handshake was answered with a non-success result
    #[error("Handshake failed: device answered {0}")]
    HandshakeFailed(ResultCode),

    /// The device refused a command; the session stays active
    #[error("Device rejected command: {0}")]
    DeviceRejected(ResultCode),

    /// The session has been closed or emergency stopped
    #[error("Session is closed")]
    SessionClosed,

    /// The operation is not valid in the current session state
    #[error("Invalid session state: {state}")]
    InvalidState {
        /// State the session was in when the operation was attempted
        state: SessionState,
    },
}

/// Result type for exercise bike operations
pub type Result<T> = std::result::Result<T, BikeError>;

impl BikeError {
    /// Check if this error terminates the session it occurred on
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Serial(_) | Self::ProtocolCorruption(_)
        )
    }

    /// Check if this error is a command-level refusal from the device
    #[must_use]
    pub const fn is_device_rejection(&self) -> bool {
        matches!(self, Self::DeviceRejected(_))
    }

    /// Result code carried by this error, if the device produced one
    #[must_use]
    pub const fn result_code(&self) -> Option<ResultCode> {
        match self {
            Self::HandshakeFailed(code) | Self::DeviceRejected(code) => Some(*code),
            _ => None,
        }
    }
}

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Pedalers 🚴
//!
//! A Rust driver for a serial-controlled exercise bike.
//!
//! The bike's controller speaks a small binary request/response protocol over
//! USB serial: a one-byte opcode followed by a fixed little-endian payload,
//! answered by a result code, a float, a terminated text table, or nothing.
//! This crate owns that link for the length of a session.
//!
//! - **Session lifecycle**: START handshake with mode flags, STOP, and an
//!   emergency stop that never waits on the device
//! - **Heartbeat**: a background KEEP_ALIVE task that shares the link with
//!   foreground commands without ever interleaving bytes
//! - **Commands**: wheel velocity, motor voltage, servo angle, target
//!   acceleration, virtual HID controller axes
//! - **Calibration**: motor voltage and servo angle lookup tables returned as
//!   CSV text
//! - **Physics**: a rider model that turns road gradient into acceleration
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library drives a motor and a resistance servo on
//! physical exercise equipment. Keep [`ExerciseBike::emergency_stop`] within
//! reach of the rider and stop the session on any fatal error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pedalers::{BikeConfig, ExerciseBike, ModeFlags};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bike = ExerciseBike::new(BikeConfig::with_mode(ModeFlags::NORMAL));
//!     bike.start().await?;
//!
//!     // Gentle downhill
//!     bike.set_acceleration(0.3).await?.into_result()?;
//!     println!("{:.2} m/s", bike.get_wheel_velocity().await?);
//!
//!     bike.close().await?;
//!     Ok(())
//! }
//! ```

/// Main bike control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Rider physics and the offline wheel simulation
pub mod physics;
/// Wire opcodes, request encoding and reply decoding
pub mod protocol;
/// Byte stream transports to the bike firmware
pub mod transport;
/// Type definitions and configuration
pub mod types;

mod heartbeat;
mod link;

#[cfg(test)]
mod fake;

// Re-export the main types for convenient usage
pub use device::ExerciseBike;
pub use error::{BikeError, Result};
pub use physics::{RiderModel, SimulatedWheel};
pub use protocol::{Command, Opcode};
pub use transport::{SerialTransport, StreamTransport, Transport};
pub use types::{BikeConfig, ModeFlags, ResultCode, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serial device the bike's controller enumerates as on Linux
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";

/// Line rate of the controller's USB serial interface
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Terminator of text replies such as the lookup tables
pub const STRING_SENTINEL: u8 = 0x00;

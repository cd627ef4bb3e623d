use crate::{
    error::{BikeError, Result},
    heartbeat::Heartbeat,
    link::Link,
    protocol::{Command, Reply},
    transport::{SerialTransport, Transport},
    types::{BikeConfig, ModeFlags, ResultCode, SessionState},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Host-side driver for a serial-controlled exercise bike
///
/// `ExerciseBike` owns the transport to the bike's controller for the length
/// of one session. It encodes commands, decodes replies, and keeps the
/// firmware convinced the host is alive with a background heartbeat that
/// shares the transport with foreground calls.
///
/// # Session lifecycle
///
/// ```text
/// Disconnected -> Handshaking -> Active -> Closing -> Closed
///                      |            |
///                      |            +--> EmergencyStopped
///                      +--> Closed (handshake refused or I/O failure)
/// ```
///
/// Every request and its reply form one exchange performed under a single
/// lock, so heartbeat bytes never land in the middle of a foreground command.
/// Device-level refusals come back as [`ResultCode`] values and leave the
/// session active. Transport and protocol failures close the session.
///
/// # Examples
///
/// ```no_run
/// use pedalers::{BikeConfig, ExerciseBike, ModeFlags, ResultCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bike = ExerciseBike::new(BikeConfig::with_mode(ModeFlags::NORMAL));
///     bike.start().await?;
///
///     let velocity = bike.get_wheel_velocity().await?;
///     println!("Wheel velocity: {velocity:.2} m/s");
///
///     if bike.set_acceleration(-0.4).await? != ResultCode::Success {
///         println!("Device refused the acceleration");
///     }
///
///     bike.close().await?;
///     Ok(())
/// }
/// ```
pub struct ExerciseBike {
    config: BikeConfig,
    link: Arc<Mutex<Link>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl ExerciseBike {
    /// Create a driver that opens the serial device named in `config` on [`start`]
    ///
    /// [`start`]: ExerciseBike::start
    #[must_use]
    pub fn new(config: BikeConfig) -> Self {
        Self::from_link(config, Link::new(None))
    }

    /// Create a driver over an already connected transport
    ///
    /// The transport is used from [`start`] onwards and closed when the
    /// session ends.
    ///
    /// [`start`]: ExerciseBike::start
    pub fn with_transport<T>(config: BikeConfig, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::from_link(config, Link::new(Some(Box::new(transport))))
    }

    fn from_link(config: BikeConfig, link: Link) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(link)),
            heartbeat: Mutex::new(None),
        }
    }

    /// Driver configuration
    #[must_use]
    pub const fn config(&self) -> &BikeConfig {
        &self.config
    }

    /// Mode flags this session starts with
    #[must_use]
    pub const fn mode_flags(&self) -> ModeFlags {
        self.config.mode_flags
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        self.link.lock().await.state()
    }

    /// Check if the session accepts commands
    pub async fn is_active(&self) -> bool {
        self.state().await == SessionState::Active
    }

    /// Perform the START handshake and begin sending heartbeats
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::HandshakeFailed`] if the device answers with
    /// anything other than [`ResultCode::Success`]; the session is then
    /// closed. Returns [`BikeError::Serial`] if the serial device cannot be
    /// opened, a transport or protocol error if the exchange fails,
    /// [`BikeError::SessionClosed`] if this driver's session already ended,
    /// and [`BikeError::InvalidState`] if it was already started.
    pub async fn start(&self) -> Result<()> {
        let mut heartbeat = self.heartbeat.lock().await;
        let mut link = self.link.lock().await;

        match link.state() {
            SessionState::Disconnected => {}
            SessionState::Closed | SessionState::EmergencyStopped => {
                return Err(BikeError::SessionClosed)
            }
            state => return Err(BikeError::InvalidState { state }),
        }

        info!("Starting session ({})", self.config.mode_flags);
        link.set_state(SessionState::Handshaking);

        if !link.has_transport() {
            match SerialTransport::open(&self.config) {
                Ok(transport) => link.attach(Box::new(transport)),
                Err(e) => {
                    error!("Failed to open {}: {}", self.config.serial_port, e);
                    link.set_state(SessionState::Closed);
                    return Err(e);
                }
            }
        }

        let code = link
            .exchange(&Command::Start(self.config.mode_flags))
            .await
            .and_then(Reply::into_result_code);

        match code {
            Ok(ResultCode::Success) => {
                link.set_state(SessionState::Active);
                drop(link);

                *heartbeat = Some(Heartbeat::spawn(
                    Arc::clone(&self.link),
                    self.config.heartbeat_interval(),
                ));
                info!("Connected to bike");
                Ok(())
            }
            Ok(code) => {
                error!("Handshake refused by device: {}", code);
                link.set_state(SessionState::Closed);
                link.release().await;
                Err(BikeError::HandshakeFailed(code))
            }
            Err(e) => {
                error!("Handshake failed: {}", e);
                link.set_state(SessionState::Closed);
                link.release().await;
                Err(e)
            }
        }
    }

    /// Stop the heartbeat, send STOP, and release the transport
    ///
    /// The transport is closed whatever the device answers.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] if the session already ended,
    /// [`BikeError::InvalidState`] if it was never started, or a transport or
    /// protocol error if the STOP exchange fails.
    pub async fn close(&self) -> Result<ResultCode> {
        let mut heartbeat = self.heartbeat.lock().await;
        self.link.lock().await.ensure_active()?;

        info!("Closing session");
        if let Some(heartbeat) = heartbeat.take() {
            heartbeat.stop().await;
        }

        let mut link = self.link.lock().await;
        link.ensure_active()?;
        link.set_state(SessionState::Closing);

        let code = link
            .exchange(&Command::Stop)
            .await
            .and_then(Reply::into_result_code);

        link.set_state(SessionState::Closed);
        link.release().await;

        match &code {
            Ok(ResultCode::Success) => info!("Session closed"),
            Ok(code) => warn!("Session closed, device answered STOP with {}", code),
            Err(e) => warn!("Session closed after failed STOP: {}", e),
        }
        code
    }

    /// Halt the bike immediately
    ///
    /// The heartbeat is aborted without letting a pending exchange finish,
    /// EMERGENCY_STOP is written without waiting for a reply, and the
    /// transport is released. This never fails: write errors are logged and
    /// swallowed. Calling it on a session that is not active does nothing.
    ///
    /// Only the heartbeat is preempted. A foreground exchange already in
    /// flight on another task, such as a lookup table sweep, runs to
    /// completion before EMERGENCY_STOP is written.
    pub async fn emergency_stop(&self) {
        warn!("Emergency stop requested");

        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(heartbeat) = heartbeat.take() {
            heartbeat.abort().await;
        }

        let mut link = self.link.lock().await;
        if link.state() != SessionState::Active {
            debug!("Emergency stop ignored, session is {}", link.state());
            return;
        }

        if let Err(e) = link.exchange(&Command::EmergencyStop).await {
            error!("Failed to send emergency stop: {}", e);
        }

        link.set_state(SessionState::EmergencyStopped);
        link.release().await;
        warn!("Emergency stop sent, session ended");
    }

    /// Read the flywheel velocity
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] or [`BikeError::InvalidState`]
    /// outside an active session, or a transport or protocol error.
    pub async fn get_wheel_velocity(&self) -> Result<f32> {
        self.request(Command::GetWheelVelocity)
            .await?
            .into_velocity()
    }

    /// Drive the motor at a raw voltage, bypassing the lookup tables
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] or [`BikeError::InvalidState`]
    /// outside an active session, or a transport or protocol error.
    pub async fn set_motor_voltage(&self, voltage: f32) -> Result<ResultCode> {
        self.command(Command::SetMotorVoltage(voltage)).await
    }

    /// Move the resistance servo to an angle in degrees
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] or [`BikeError::InvalidState`]
    /// outside an active session, or a transport or protocol error.
    pub async fn set_servo_degrees(&self, degrees: f32) -> Result<ResultCode> {
        self.command(Command::SetServoDegrees(degrees)).await
    }

    /// Apply a target acceleration in m/s² through the calibration tables
    ///
    /// The device answers [`ResultCode::MotorVoltageLutMissing`] or
    /// [`ResultCode::ServoDegreesLutMissing`] until both tables have been
    /// generated with `persist` set.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] or [`BikeError::InvalidState`]
    /// outside an active session, or a transport or protocol error.
    pub async fn set_acceleration(&self, acceleration: f32) -> Result<ResultCode> {
        self.command(Command::SetAcceleration(acceleration)).await
    }

    /// Feed virtual HID controller axes
    ///
    /// Only meaningful when the session was started with
    /// [`ModeFlags::VIRTUAL_CONTROLLER`].
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::SessionClosed`] or [`BikeError::InvalidState`]
    /// outside an active session, or a transport or protocol error.
    pub async fn set_hid_controller(
        &self,
        throttle_and_brake: i16,
        steering: i16,
    ) -> Result<ResultCode> {
        if !self.config.mode_flags.contains(ModeFlags::VIRTUAL_CONTROLLER) {
            warn!("HID controller input sent outside virtual controller mode");
        }

        self.command(Command::SetHidController {
            throttle_and_brake,
            steering,
        })
        .await
    }

    /// Generate the motor voltage lookup table and return it as CSV text
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] if the reply never reaches
    /// its terminator or is not UTF-8, plus the errors of any other command.
    pub async fn get_motor_voltage_lut(&self, steps: u32, persist: bool) -> Result<String> {
        info!("Requesting motor voltage LUT ({} steps, persist: {})", steps, persist);
        self.request(Command::GetMotorVoltageLut { steps, persist })
            .await?
            .into_text()
    }

    /// Generate the servo degrees lookup table and return it as CSV text
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ProtocolCorruption`] if the reply never reaches
    /// its terminator or is not UTF-8, plus the errors of any other command.
    pub async fn get_servo_degrees_lut(&self, steps: u8, persist: bool) -> Result<String> {
        info!("Requesting servo degrees LUT ({} steps, persist: {})", steps, persist);
        self.request(Command::GetServoDegreesLut { steps, persist })
            .await?
            .into_text()
    }

    /// Send a command that answers with a result code
    async fn command(&self, command: Command) -> Result<ResultCode> {
        let code = self.request(command).await?.into_result_code()?;
        if !code.is_success() {
            warn!("Device rejected {:?}: {}", command.opcode(), code);
        }
        Ok(code)
    }

    /// One exchange on an active session
    async fn request(&self, command: Command) -> Result<Reply> {
        let mut link = self.link.lock().await;
        link.ensure_active()?;
        link.exchange(&command).await
    }
}

impl Drop for ExerciseBike {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.cancel_now();
        }
    }
}

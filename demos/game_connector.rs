use pedalers::{
    BikeConfig, ExerciseBike, ModeFlags, Result, ResultCode, RiderModel, SimulatedWheel,
};
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

const LISTEN_ADDR: &str = "0.0.0.0:33356";
const SIMULATED_START_VELOCITY: f32 = 5.0;

/// Where wheel velocity comes from
enum Wheel {
    Bike(ExerciseBike),
    Simulated {
        wheel: SimulatedWheel,
        last_update: Instant,
    },
}

impl Wheel {
    async fn velocity(&self) -> Result<f32> {
        match self {
            Self::Bike(bike) => bike.get_wheel_velocity().await,
            Self::Simulated { wheel, .. } => Ok(wheel.velocity()),
        }
    }

    async fn apply(&mut self, acceleration: f32) -> Result<f32> {
        match self {
            Self::Bike(bike) => {
                let code = bike.set_acceleration(acceleration).await?;
                if !code.is_success() {
                    warn!("⚠️  Failed to set acceleration: {}", code);
                    if code.is_lut_missing() {
                        warn!("📋 LUT is missing! Run `cargo run --example generate_luts` first");
                    }
                }
                bike.get_wheel_velocity().await
            }
            Self::Simulated { wheel, last_update } => {
                let elapsed = last_update.elapsed();
                *last_update = Instant::now();
                Ok(wheel.advance(acceleration, elapsed))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Pedalers Game Connector");
    let simulate = std::env::args().any(|arg| arg == "--simulate");

    let socket = UdpSocket::bind(LISTEN_ADDR).await?;
    info!("📡 Listening for slope angles on {}", LISTEN_ADDR);

    let mut wheel = if simulate {
        info!("🧪 Simulating the wheel, no bike attached");
        Wheel::Simulated {
            wheel: SimulatedWheel::new(SIMULATED_START_VELOCITY),
            last_update: Instant::now(),
        }
    } else {
        let bike = ExerciseBike::new(BikeConfig::with_mode(ModeFlags::NORMAL));
        if let Err(e) = bike.start().await {
            error!("❌ Failed to connect to bike: {}", e);
            return Err(e);
        }
        info!("✅ Connected to bike");
        Wheel::Bike(bike)
    };

    let model = RiderModel::default();
    let mut velocity = wheel.velocity().await?;
    let mut buf = [0u8; 1024];

    let outcome = loop {
        let (len, peer) = tokio::select! {
            received = socket.recv_from(&mut buf) => received?,
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutting down");
                break Ok(());
            }
        };

        let Ok(angle) = <[u8; 4]>::try_from(&buf[..len]).map(f32::from_le_bytes) else {
            warn!("Ignoring {}-byte datagram from {}", len, peer);
            continue;
        };

        let acceleration = model.acceleration(angle, velocity);
        velocity = match wheel.apply(acceleration).await {
            Ok(velocity) => velocity,
            Err(e) => {
                error!("❌ Bike link failed: {}", e);
                break Err(e);
            }
        };

        debug!(
            "Angle {:.2}° -> acceleration {:.3} m/s² -> velocity {:.2} m/s",
            angle, acceleration, velocity
        );
        socket.send_to(&velocity.to_le_bytes(), peer).await?;
    };

    if let Wheel::Bike(bike) = &wheel {
        if bike.is_active().await {
            match bike.close().await {
                Ok(ResultCode::Success) => info!("👋 Disconnected from bike"),
                Ok(code) => warn!("⚠️  Bike answered STOP with {}", code),
                Err(e) => error!("❌ Failed to close session: {}", e),
            }
        }
    }

    outcome
}

use pedalers::{BikeConfig, ExerciseBike, ModeFlags, Result};
use tracing::{error, info};

const MOTOR_LUT_STEPS: u32 = 50;
const SERVO_LUT_STEPS: u8 = 60;
const MOTOR_LUT_FILE: &str = "motor_lut.csv";
const SERVO_LUT_FILE: &str = "servo_lut.csv";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Pedalers Lookup Table Generator");
    info!("⚠️  Keep the pedals clear: the motor and servo will sweep their full range");

    let bike = ExerciseBike::new(BikeConfig::with_mode(ModeFlags::NORMAL));
    if let Err(e) = bike.start().await {
        error!("❌ Failed to connect to bike: {}", e);
        return Err(e);
    }
    info!("✅ Connected to bike");

    info!("⚙️  Generating motor voltage LUT ({} steps)...", MOTOR_LUT_STEPS);
    let motor_lut = match bike.get_motor_voltage_lut(MOTOR_LUT_STEPS, true).await {
        Ok(lut) => lut,
        Err(e) => {
            error!("❌ Failed to generate motor voltage LUT: {}", e);
            bike.emergency_stop().await;
            return Err(e);
        }
    };
    info!("✅ Motor voltage LUT: {} rows", motor_lut.lines().count());

    info!("⚙️  Generating servo degrees LUT ({} steps)...", SERVO_LUT_STEPS);
    let servo_lut = match bike.get_servo_degrees_lut(SERVO_LUT_STEPS, true).await {
        Ok(lut) => lut,
        Err(e) => {
            error!("❌ Failed to generate servo degrees LUT: {}", e);
            bike.emergency_stop().await;
            return Err(e);
        }
    };
    info!("✅ Servo degrees LUT: {} rows", servo_lut.lines().count());

    bike.close().await?;
    info!("👋 Disconnected from bike");

    tokio::fs::write(MOTOR_LUT_FILE, &motor_lut).await?;
    tokio::fs::write(SERVO_LUT_FILE, &servo_lut).await?;
    info!("💾 Wrote {} and {}", MOTOR_LUT_FILE, SERVO_LUT_FILE);

    Ok(())
}

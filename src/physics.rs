use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Standard gravity in m/s²
pub const GRAVITY: f32 = 9.81;

/// Point-mass model of a bike and rider on a slope
///
/// Converts a road gradient and the current speed into the deceleration the
/// rider would feel, which is what [`ExerciseBike::set_acceleration`] expects.
///
/// [`ExerciseBike::set_acceleration`]: crate::ExerciseBike::set_acceleration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiderModel {
    /// Combined bike and rider mass in kg
    pub mass: f32,
    /// Rolling resistance coefficient
    pub rolling_resistance: f32,
    /// Air density in kg/m³
    pub air_density: f32,
    /// Frontal area in m²
    pub frontal_area: f32,
    /// Aerodynamic drag coefficient
    pub drag_coefficient: f32,
}

impl Default for RiderModel {
    fn default() -> Self {
        Self {
            mass: 75.0,
            rolling_resistance: 0.01,
            air_density: 1.225,
            frontal_area: 0.5,
            drag_coefficient: 1.0,
        }
    }
}

impl RiderModel {
    /// Total force opposing forward motion in newtons
    ///
    /// `slope_degrees` is positive uphill. Downhill slopes give a negative
    /// gravity term, so the total can be negative.
    #[must_use]
    pub fn resistive_force(&self, slope_degrees: f32, velocity: f32) -> f32 {
        let slope = slope_degrees.to_radians();

        let gravity = GRAVITY * slope.sin() * self.mass;
        let rolling = self.rolling_resistance * GRAVITY * self.mass * slope.cos();
        let dynamic_pressure = 0.5 * self.air_density * velocity * velocity;
        let drag = dynamic_pressure * self.drag_coefficient * self.frontal_area;

        gravity + rolling + drag
    }

    /// Acceleration in m/s² for a slope and speed
    #[must_use]
    pub fn acceleration(&self, slope_degrees: f32, velocity: f32) -> f32 {
        -self.resistive_force(slope_degrees, velocity) / self.mass
    }
}

/// Software stand-in for the flywheel, used when no bike is attached
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedWheel {
    velocity: f32,
}

impl SimulatedWheel {
    /// Start spinning at `velocity` m/s
    #[must_use]
    pub const fn new(velocity: f32) -> Self {
        Self { velocity }
    }

    /// Current velocity in m/s
    #[must_use]
    pub const fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Apply `acceleration` for `elapsed` and return the new velocity
    ///
    /// The wheel never spins backwards.
    pub fn advance(&mut self, acceleration: f32, elapsed: Duration) -> f32 {
        self.velocity = acceleration
            .mul_add(elapsed.as_secs_f32(), self.velocity)
            .max(0.0);
        self.velocity
    }
}

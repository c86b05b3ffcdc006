//! Parameter definitions for planar robot simulation and filter tuning.

/// Parameter specification with bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Human-readable label.
    pub label: &'static str,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
}

impl ParamSpec {
    /// Create a new parameter specification.
    pub const fn new(label: &'static str, min: f64, max: f64) -> Self {
        Self { label, min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Robot motion parameters.
pub mod robot {
    use super::ParamSpec;
    use core::f64::consts::PI;

    pub const DURATION: ParamSpec = ParamSpec::new("Duration (s)", 1.0, 600.0);
    pub const FORWARD_SPEED: ParamSpec = ParamSpec::new("Forward Speed (m/s)", 0.0, 5.0);
    pub const SPEED_AMPLITUDE: ParamSpec = ParamSpec::new("Speed Ripple (m/s)", 0.0, 2.0);
    pub const YAW_RATE_AMP: ParamSpec = ParamSpec::new("Yaw Rate Amp. (rad/s)", 0.0, 2.0);
    pub const YAW_RATE_PERIOD: ParamSpec = ParamSpec::new("Yaw Period (s)", 1.0, 120.0);
    pub const CLIMB_RATE: ParamSpec = ParamSpec::new("Climb Rate (m/s)", -1.0, 1.0);
    pub const INITIAL_YAW: ParamSpec = ParamSpec::new("Initial Yaw (rad)", -PI, PI);
}

/// Sensor rate parameters.
pub mod sensor_rates {
    use super::ParamSpec;

    pub const POSITION_HZ: ParamSpec = ParamSpec::new("Position Hz", 1.0, 200.0);
    pub const ATTITUDE_HZ: ParamSpec = ParamSpec::new("Attitude Hz", 1.0, 500.0);
    pub const VELOCITY_HZ: ParamSpec = ParamSpec::new("Velocity Hz", 1.0, 1000.0);
}

/// EKF tuning parameters (variances).
pub mod ekf {
    use super::ParamSpec;

    pub const Q_VEL_LIN_XY: ParamSpec = ParamSpec::new("Q Vel XY ((m/s)²)", 1e-6, 10.0);
    pub const Q_VEL_LIN_Z: ParamSpec = ParamSpec::new("Q Vel Z ((m/s)²)", 1e-6, 10.0);
    pub const Q_VEL_ANG: ParamSpec = ParamSpec::new("Q Yaw Rate ((rad/s)²)", 1e-6, 10.0);
    pub const R_POSI: ParamSpec = ParamSpec::new("R Position (m²)", 1e-6, 10.0);
    pub const R_ATTI: ParamSpec = ParamSpec::new("R Yaw (rad²)", 1e-7, 1.0);
    pub const R_VELO_LIN: ParamSpec = ParamSpec::new("R Lin. Vel. ((m/s)²)", 1e-6, 10.0);
    pub const R_VELO_ANG: ParamSpec = ParamSpec::new("R Yaw Rate ((rad/s)²)", 1e-7, 1.0);
}

/// Default EKF tuning, matching the reference estimator configuration.
pub const EKF_TUNING_DEFAULTS: [(&str, f64); 7] = [
    ("q_vel_lin_xy", 0.01),
    ("q_vel_lin_z", 0.001),
    ("q_vel_ang", 0.01),
    ("r_posi", 0.01),
    ("r_atti", 0.001),
    ("r_velo_lin", 0.01),
    ("r_velo_ang", 0.001),
];

/// Get default tuning value for a parameter.
pub fn ekf_tuning_default(param: &str) -> Option<f64> {
    EKF_TUNING_DEFAULTS
        .iter()
        .find(|(name, _)| *name == param)
        .map(|(_, v)| *v)
}

/// Bounds for a tuning parameter by name.
pub fn ekf_tuning_spec(param: &str) -> Option<ParamSpec> {
    Some(match param {
        "q_vel_lin_xy" => ekf::Q_VEL_LIN_XY,
        "q_vel_lin_z" => ekf::Q_VEL_LIN_Z,
        "q_vel_ang" => ekf::Q_VEL_ANG,
        "r_posi" => ekf::R_POSI,
        "r_atti" => ekf::R_ATTI,
        "r_velo_lin" => ekf::R_VELO_LIN,
        "r_velo_ang" => ekf::R_VELO_ANG,
        _ => return None,
    })
}

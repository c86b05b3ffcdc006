use crate::sim::{SimResult, DT};
use msf_core::{BodyVelocity, QuatSimp};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};

pub struct SensorConfig {
    pub noise_scale: f64,
    pub pos_noise_std: f64,     // m
    pub atti_noise_std: f64,    // rad
    pub vel_lin_noise_std: f64, // m/s, body frame
    pub vel_ang_noise_std: f64, // rad/s

    pub position_hz: f64,
    pub attitude_hz: f64,
    pub velocity_hz: f64,

    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            noise_scale: 1.0,
            pos_noise_std: 0.05,
            atti_noise_std: 0.02,
            vel_lin_noise_std: 0.05,
            vel_ang_noise_std: 0.01,
            position_hz: 10.0,
            attitude_hz: 50.0,
            velocity_hz: 100.0,
            seed: 42,
        }
    }
}

/// A measurement and the truth time it was taken at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample<T> {
    pub time: f64,
    pub value: T,
}

#[derive(Debug, Clone, Default)]
pub struct SensorData {
    pub position: Vec<SensorSample<Vector3<f64>>>,
    pub attitude: Vec<SensorSample<QuatSimp>>,
    pub velocity: Vec<SensorSample<BodyVelocity>>,
}

/// Truth-sample stride for a sensor running at `rate_hz`. `None` disables
/// the channel.
fn stride(rate_hz: f64) -> Option<usize> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Some(((1.0 / (rate_hz * DT)).round() as usize).max(1))
}

/// Generate the position, attitude and velocity streams for `sim`.
///
/// Fails if any scaled noise sigma is negative or not finite.
pub fn generate_sensor_data(
    sim: &SimResult,
    cfg: &SensorConfig,
) -> Result<SensorData, NormalError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut data = SensorData::default();

    let d_pos = Normal::new(0.0, cfg.noise_scale * cfg.pos_noise_std)?;
    let d_atti = Normal::new(0.0, cfg.noise_scale * cfg.atti_noise_std)?;
    let d_vel_lin = Normal::new(0.0, cfg.noise_scale * cfg.vel_lin_noise_std)?;
    let d_vel_ang = Normal::new(0.0, cfg.noise_scale * cfg.vel_ang_noise_std)?;

    let pos_stride = stride(cfg.position_hz);
    let atti_stride = stride(cfg.attitude_hz);
    let vel_stride = stride(cfg.velocity_hz);
    let due = |s: Option<usize>, i: usize| s.is_some_and(|s| i % s == 0);

    for i in 0..sim.len() {
        let time = sim.time[i];

        // 1. Position (world frame, e.g. mocap)
        if due(pos_stride, i) {
            let p = sim.pos[i];
            let value = Vector3::new(
                p.x + d_pos.sample(&mut rng),
                p.y + d_pos.sample(&mut rng),
                p.z + d_pos.sample(&mut rng),
            );
            data.position.push(SensorSample { time, value });
        }

        // 2. Attitude (world yaw as a unit simplified quaternion)
        if due(atti_stride, i) {
            let yaw = sim.yaw[i] + d_atti.sample(&mut rng);
            data.attitude.push(SensorSample {
                time,
                value: QuatSimp::from_angle(yaw),
            });
        }

        // 3. Velocity (body frame, e.g. wheel odometry + gyro)
        if due(vel_stride, i) {
            let vb = sim.vel_body(i);
            let linear = Vector3::new(
                vb.x + d_vel_lin.sample(&mut rng),
                vb.y + d_vel_lin.sample(&mut rng),
                vb.z + d_vel_lin.sample(&mut rng),
            );
            let angular = sim.yaw_rate[i] + d_vel_ang.sample(&mut rng);
            data.velocity.push(SensorSample {
                time,
                value: BodyVelocity::new(linear, angular),
            });
        }
    }

    Ok(data)
}

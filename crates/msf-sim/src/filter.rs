use crate::sensor::{SensorData, SensorSample};
use crate::sim::SimResult;
use msf_core::quat_simp::wrap_angle;
use msf_core::{ConfigError, EstimatorConfig, MsfStateEstimator, UpdateStatus};
use nalgebra::Vector3;
use serde::Serialize;

/// Replay clock starts here so no cycle lands on the "uninitialized"
/// timestamp.
pub const TIME_ORIGIN_US: u64 = 1_000_000;

/// Struct to hold the output of the filter replay.
#[derive(Clone, Debug, Default)]
pub struct FilterResult {
    pub time: Vec<f64>,
    pub position: Vec<Vector3<f64>>,
    pub yaw: Vec<f64>,
    pub vel_lin_world: Vec<Vector3<f64>>,
    pub vel_ang_world: Vec<f64>,
    /// 1σ of x, y, z.
    pub pos_sigma: Vec<Vector3<f64>>,
    pub yaw_sigma: Vec<f64>,
    pub cov_trace: Vec<f64>,
    pub counters: CycleCounters,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounters {
    pub cycles: u64,
    pub corrections: u64,
    pub predict_failures: u64,
    pub update_failures: u64,
}

/// Filter configuration for a replay run.
#[derive(Clone, Debug, Default)]
pub struct FilterConfig {
    pub estimator: EstimatorConfig,
}

impl FilterConfig {
    pub fn new(estimator: EstimatorConfig) -> Self {
        Self { estimator }
    }

    pub fn get_param(&self, param_name: &str) -> Option<f64> {
        let ekf = &self.estimator.ekf;
        let meas = &ekf.measurements;
        Some(match param_name {
            "q_vel_lin_xy" => ekf.process_model.cov_diag[0],
            "q_vel_lin_z" => ekf.process_model.cov_diag[2],
            "q_vel_ang" => ekf.process_model.cov_diag[3],
            "r_posi" => meas.meas_position.cov_diag[0],
            "r_atti" => meas.meas_attitude.cov_diag[0],
            "r_velo_lin" => meas.meas_velo_lin.cov_diag[0],
            "r_velo_ang" => meas.meas_velo_ang.cov_diag[0],
            _ => return None,
        })
    }

    /// Set a tuning variance by name. Vector-valued noises are set
    /// isotropically. Returns `false` for an unknown name.
    pub fn set_param(&mut self, param_name: &str, value: f64) -> bool {
        let ekf = &mut self.estimator.ekf;
        let meas = &mut ekf.measurements;
        match param_name {
            "q_vel_lin_xy" => ekf.process_model.cov_diag[..2].fill(value),
            "q_vel_lin_z" => ekf.process_model.cov_diag[2] = value,
            "q_vel_ang" => ekf.process_model.cov_diag[3] = value,
            "r_posi" => meas.meas_position.cov_diag.fill(value),
            "r_atti" => meas.meas_attitude.cov_diag[0] = value,
            "r_velo_lin" => meas.meas_velo_lin.cov_diag.fill(value),
            "r_velo_ang" => meas.meas_velo_ang.cov_diag[0] = value,
            _ => return false,
        }
        true
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.estimator).unwrap_or(serde_json::Value::Null)
    }
}

fn to_us(t: f64) -> u64 {
    TIME_ORIGIN_US + (t * 1e6).round() as u64
}

/// Stage every sample of `stream` taken at or before `t`.
fn stage_due<T: Copy>(
    stream: &[SensorSample<T>],
    cursor: &mut usize,
    t: f64,
    mut stage: impl FnMut(u64, T),
) {
    while let Some(s) = stream.get(*cursor) {
        if s.time > t + 1e-9 {
            break;
        }
        stage(to_us(s.time), s.value);
        *cursor += 1;
    }
}

/// Replay the sensor streams through the estimator at its configured loop
/// rate: stage everything that has arrived, predict, update, record.
///
/// Fails only if the estimator configuration does not validate.
pub fn run_filter(
    sim: &SimResult,
    sensor_data: &SensorData,
    config: &FilterConfig,
) -> Result<FilterResult, ConfigError> {
    let estimator = MsfStateEstimator::from_config(&config.estimator)?;
    let period = 1.0 / config.estimator.state_estim_loop_freq;
    let cycles = (sim.duration() / period + 1e-6).floor() as usize + 1;

    let mut res = FilterResult::default();
    let (mut i_pos, mut i_atti, mut i_vel) = (0, 0, 0);

    for k in 0..cycles {
        let t = k as f64 * period;

        // -------------------------------------------------------------------
        // STAGE
        // -------------------------------------------------------------------
        stage_due(&sensor_data.position, &mut i_pos, t, |ts, p| {
            estimator.stage_position(ts, p)
        });
        stage_due(&sensor_data.attitude, &mut i_atti, t, |ts, q| {
            estimator.stage_attitude_quat(ts, q)
        });
        stage_due(&sensor_data.velocity, &mut i_vel, t, |ts, v| {
            estimator.stage_velocity(ts, v)
        });

        // -------------------------------------------------------------------
        // PREDICT / UPDATE
        // -------------------------------------------------------------------
        res.counters.cycles += 1;
        match estimator.predict(to_us(t)) {
            Err(_) => res.counters.predict_failures += 1,
            Ok(_) => match estimator.update() {
                Ok(UpdateStatus::Corrected { .. }) => res.counters.corrections += 1,
                Ok(UpdateStatus::NoMeasurements) => {}
                Err(_) => res.counters.update_failures += 1,
            },
        }

        // -------------------------------------------------------------------
        // RECORD STATE
        // -------------------------------------------------------------------
        let f = estimator.snapshot();
        let p = &f.covariance;
        res.time.push(t);
        res.position.push(f.state.position);
        res.yaw.push(f.state.yaw());
        res.vel_lin_world.push(f.state.vel_lin_world);
        res.vel_ang_world.push(f.state.vel_ang_world);
        res.pos_sigma.push(Vector3::new(
            p[(0, 0)].max(0.0).sqrt(),
            p[(1, 1)].max(0.0).sqrt(),
            p[(2, 2)].max(0.0).sqrt(),
        ));
        res.yaw_sigma.push(p[(3, 3)].max(0.0).sqrt());
        res.cov_trace.push(p.trace());
    }

    tracing::debug!(
        cycles = res.counters.cycles,
        corrections = res.counters.corrections,
        "replay finished"
    );
    Ok(res)
}

/// Replay with the reference estimator configuration.
pub fn run_filter_default(
    sim_result: &SimResult,
    sensor_data: &SensorData,
) -> Result<FilterResult, ConfigError> {
    run_filter(sim_result, sensor_data, &FilterConfig::default())
}

/// Estimate error against truth over a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FilterMetrics {
    pub pos_rmse: f64,
    pub yaw_rmse: f64,
    pub vel_rmse: f64,
    pub final_pos_error: f64,
    /// Fraction of cycles whose position error is inside 3σ on every axis.
    pub pos_within_3sigma: f64,
}

/// RMS errors of `filter` against `sim`, skipping the first
/// `settle_time` seconds.
pub fn compute_metrics(sim: &SimResult, filter: &FilterResult, settle_time: f64) -> FilterMetrics {
    let mut n = 0usize;
    let (mut pos_sq, mut yaw_sq, mut vel_sq) = (0.0, 0.0, 0.0);
    let mut inside = 0usize;

    for (k, &t) in filter.time.iter().enumerate() {
        if t < settle_time {
            continue;
        }
        let i = sim.index_at(t);
        let dp = filter.position[k] - sim.pos[i];
        pos_sq += dp.norm_squared();
        yaw_sq += wrap_angle(filter.yaw[k] - sim.yaw[i]).powi(2);
        vel_sq += (filter.vel_lin_world[k] - sim.vel_world[i]).norm_squared();
        let sigma = filter.pos_sigma[k];
        if (0..3).all(|a| dp[a].abs() <= 3.0 * sigma[a]) {
            inside += 1;
        }
        n += 1;
    }

    if n == 0 {
        return FilterMetrics::default();
    }
    let nf = n as f64;
    let final_pos_error = match (filter.position.last(), filter.time.last()) {
        (Some(p), Some(&t)) => (p - sim.pos[sim.index_at(t)]).norm(),
        _ => 0.0,
    };
    FilterMetrics {
        pos_rmse: (pos_sq / nf).sqrt(),
        yaw_rmse: (yaw_sq / nf).sqrt(),
        vel_rmse: (vel_sq / nf).sqrt(),
        final_pos_error,
        pos_within_3sigma: inside as f64 / nf,
    }
}

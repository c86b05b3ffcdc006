//! Estimator facade tying staging, state store, predictor and updater
//! together.
//!
//! Sensor threads call the `stage_*` methods concurrently. A single cycle
//! driver calls [`MsfStateEstimator::predict`] then
//! [`MsfStateEstimator::update`]. The measurement lock is always released
//! before the state lock is taken, so the two can never deadlock.

use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::config::EstimatorConfig;
use crate::error::{ConfigError, FilterError};
use crate::measurement::{BodyVelocity, Measurement};
use crate::output::EstimateOutput;
use crate::predict;
use crate::quat_simp::QuatSimp;
use crate::staging::MeasurementStaging;
use crate::state::{EstimatedState, FilterState, Scalar, StateCovariance};
use crate::store::StateStore;
use crate::tuning::EkfTuning;
use crate::update::{self, UpdateStatus};

#[derive(Debug)]
pub struct MsfStateEstimator {
    staging: MeasurementStaging,
    store: StateStore,
    tuning: EkfTuning,
    world_frame: String,
    robot_frame: String,
}

impl MsfStateEstimator {
    pub fn new(initial: EstimatedState, covariance: StateCovariance, tuning: EkfTuning) -> Self {
        Self {
            staging: MeasurementStaging::new(),
            store: StateStore::new(initial, covariance),
            tuning,
            world_frame: "world".into(),
            robot_frame: "robot_estim_base_link".into(),
        }
    }

    /// Validate `config` and build from it.
    pub fn from_config(config: &EstimatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            world_frame: config.world_frame.clone(),
            robot_frame: config.robot_frame.clone(),
            ..Self::new(
                config.initial_state(),
                config.initial_covariance(),
                config.tuning(),
            )
        })
    }

    pub fn tuning(&self) -> &EkfTuning {
        &self.tuning
    }

    pub fn stage(&self, timestamp_us: u64, meas: Measurement) {
        self.staging.stage(timestamp_us, meas);
    }

    pub fn stage_position(&self, timestamp_us: u64, position: Vector3<Scalar>) {
        self.staging
            .stage(timestamp_us, Measurement::Position(position));
    }

    /// Stage a raw `(w, z)` attitude. Off-unit samples are dropped and
    /// reported as [`FilterError::InvalidMeasurement`].
    pub fn stage_attitude(&self, timestamp_us: u64, w: Scalar, z: Scalar) -> Result<(), FilterError> {
        self.staging
            .stage_attitude_raw(timestamp_us, w, z, self.tuning.attitude_norm_tolerance)
    }

    pub fn stage_attitude_quat(&self, timestamp_us: u64, attitude: QuatSimp) {
        self.staging
            .stage(timestamp_us, Measurement::Attitude(attitude));
    }

    pub fn stage_velocity(&self, timestamp_us: u64, velocity: BodyVelocity) {
        self.staging
            .stage(timestamp_us, Measurement::Velocity(velocity));
    }

    /// Propagate to `time_us`. Returns the `dt` used, in seconds.
    pub fn predict(&self, time_us: u64) -> Result<Scalar, FilterError> {
        let mut filter = self.store.lock();
        predict::predict(&mut filter, &self.tuning.cov_proc, time_us)
    }

    /// Drain pending measurements and correct the state.
    ///
    /// Measurements drained by a failed update are consumed.
    pub fn update(&self) -> Result<UpdateStatus, FilterError> {
        // Staging lock is released at the end of this statement.
        let pending = self.staging.drain_all();
        if pending.is_empty() {
            return Ok(UpdateStatus::NoMeasurements);
        }

        let mut filter = self.store.lock();
        match update::update(&mut filter, &self.tuning, &pending) {
            Ok(status) => {
                debug!(
                    ?status,
                    position = pending.position.is_some(),
                    attitude = pending.attitude.is_some(),
                    velocity = pending.velocity.is_some(),
                    "update applied"
                );
                Ok(status)
            }
            Err(err) => {
                warn!("update rejected: {err}");
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> FilterState {
        self.store.snapshot()
    }

    pub fn output(&self) -> EstimateOutput {
        let filter = self.store.snapshot();
        EstimateOutput::from_filter(&filter, &self.world_frame, &self.robot_frame)
    }
}

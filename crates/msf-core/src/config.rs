//! Estimator configuration.
//!
//! The JSON layout follows the parameter files used by the robot stack:
//!
//! ```json
//! {
//!   "robot_frame": "robot_estim_base_link",
//!   "world_frame": "world",
//!   "state_estim_loop_freq": 50.0,
//!   "ekf": {
//!     "estimated_state_init": {
//!       "state": {
//!         "robot_position": [0.0, 0.0, 0.0],
//!         "robot_atti_quat_simp": [1.0, 0.0],
//!         "robot_vel_lin_world": [0.0, 0.0, 0.0],
//!         "robot_vel_ang_world": [0.0]
//!       },
//!       "cov_diag": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
//!     },
//!     "process_model": { "cov_diag": [0.01, 0.01, 0.001, 0.01] },
//!     "measurements": {
//!       "meas_position": { "cov_diag": [0.01, 0.01, 0.01] },
//!       "meas_attitude": { "cov_diag": [0.001] },
//!       "meas_velo_lin": { "cov_diag": [0.01, 0.01, 0.01] },
//!       "meas_velo_ang": { "cov_diag": [0.001] }
//!     }
//!   }
//! }
//! ```
//!
//! Configuration is read once at construction and never reloaded.

use std::path::Path;
use std::time::Duration;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::quat_simp::{QuatSimp, DEFAULT_NORM_TOLERANCE};
use crate::state::{EstimatedState, Scalar, StateCovariance, StateVector, STATE_DIM};
use crate::tuning::EkfTuning;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub robot_frame: String,
    pub world_frame: String,
    /// Cycle rate in Hz.
    pub state_estim_loop_freq: Scalar,
    pub ekf: EkfConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EkfConfig {
    pub estimated_state_init: StateInitConfig,
    pub process_model: CovDiag<4>,
    pub measurements: MeasurementsConfig,
    #[serde(default = "default_max_condition_number")]
    pub max_condition_number: Scalar,
    #[serde(default = "default_attitude_norm_tolerance")]
    pub attitude_norm_tolerance: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateInitConfig {
    pub state: InitialStateConfig,
    pub cov_diag: [Scalar; STATE_DIM],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialStateConfig {
    pub robot_position: [Scalar; 3],
    /// `(w, z)`
    pub robot_atti_quat_simp: [Scalar; 2],
    pub robot_vel_lin_world: [Scalar; 3],
    pub robot_vel_ang_world: [Scalar; 1],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementsConfig {
    pub meas_position: CovDiag<3>,
    pub meas_attitude: CovDiag<1>,
    pub meas_velo_lin: CovDiag<3>,
    pub meas_velo_ang: CovDiag<1>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovDiag<const N: usize> {
    #[serde(with = "serde_arrays")]
    pub cov_diag: [Scalar; N],
}

// serde only derives fixed arrays for concrete lengths; route the
// const-generic field through a Vec.
mod serde_arrays {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        arr: &[f64; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        arr.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[f64; N], D::Error> {
        let v = Vec::<f64>::deserialize(d)?;
        let len = v.len();
        v.try_into()
            .map_err(|_| D::Error::invalid_length(len, &format!("{N} elements").as_str()))
    }
}

fn default_max_condition_number() -> Scalar {
    1e12
}

fn default_attitude_norm_tolerance() -> Scalar {
    DEFAULT_NORM_TOLERANCE
}

impl EstimatorConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded estimator config");
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let freq = self.state_estim_loop_freq;
        // The period must be representable too, which rules out subnormals.
        if !(freq.is_finite() && freq > 0.0 && (1.0 / freq).is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "state_estim_loop_freq must be positive, got {}",
                self.state_estim_loop_freq
            )));
        }

        let ekf = &self.ekf;
        check_variances("estimated_state_init.cov_diag", &ekf.estimated_state_init.cov_diag)?;
        check_variances("process_model.cov_diag", &ekf.process_model.cov_diag)?;
        let meas = &ekf.measurements;
        check_variances("meas_position.cov_diag", &meas.meas_position.cov_diag)?;
        check_variances("meas_attitude.cov_diag", &meas.meas_attitude.cov_diag)?;
        check_variances("meas_velo_lin.cov_diag", &meas.meas_velo_lin.cov_diag)?;
        check_variances("meas_velo_ang.cov_diag", &meas.meas_velo_ang.cov_diag)?;

        if !(ekf.max_condition_number.is_finite() && ekf.max_condition_number > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_condition_number must be positive, got {}",
                ekf.max_condition_number
            )));
        }
        if !(ekf.attitude_norm_tolerance.is_finite() && ekf.attitude_norm_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "attitude_norm_tolerance must be non-negative, got {}",
                ekf.attitude_norm_tolerance
            )));
        }

        let [w, z] = ekf.estimated_state_init.state.robot_atti_quat_simp;
        QuatSimp::try_new(w, z, ekf.attitude_norm_tolerance)
            .map_err(|e| ConfigError::Invalid(format!("robot_atti_quat_simp: {e}")))?;

        let s = &ekf.estimated_state_init.state;
        let finite = s
            .robot_position
            .iter()
            .chain(&s.robot_vel_lin_world)
            .chain(&s.robot_vel_ang_world)
            .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::Invalid(
                "initial state contains non-finite values".into(),
            ));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.state_estim_loop_freq)
    }

    pub fn tuning(&self) -> EkfTuning {
        let ekf = &self.ekf;
        let meas = &ekf.measurements;
        EkfTuning {
            max_condition_number: ekf.max_condition_number,
            attitude_norm_tolerance: ekf.attitude_norm_tolerance,
            ..EkfTuning::from_diagonals(
                ekf.process_model.cov_diag,
                meas.meas_position.cov_diag,
                meas.meas_attitude.cov_diag[0],
                meas.meas_velo_lin.cov_diag,
                meas.meas_velo_ang.cov_diag[0],
            )
        }
    }

    /// Initial estimate. Call on a validated config only: the attitude is
    /// renormalized on the assumption it passed the tolerance check in
    /// [`validate`](Self::validate).
    pub fn initial_state(&self) -> EstimatedState {
        let s = &self.ekf.estimated_state_init.state;
        let [w, z] = s.robot_atti_quat_simp;
        EstimatedState {
            position: Vector3::from(s.robot_position),
            attitude: QuatSimp::new_normalize(w, z).unwrap_or_default(),
            vel_lin_world: Vector3::from(s.robot_vel_lin_world),
            vel_ang_world: s.robot_vel_ang_world[0],
        }
    }

    pub fn initial_covariance(&self) -> StateCovariance {
        StateCovariance::from_diagonal(&StateVector::from(
            self.ekf.estimated_state_init.cov_diag,
        ))
    }
}

fn check_variances(name: &str, diag: &[Scalar]) -> Result<(), ConfigError> {
    match diag.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
        Some(bad) => Err(ConfigError::Invalid(format!(
            "{name} entries must be finite and non-negative, got {bad}"
        ))),
        None => Ok(()),
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            robot_frame: "robot_estim_base_link".into(),
            world_frame: "world".into(),
            state_estim_loop_freq: 50.0,
            ekf: EkfConfig {
                estimated_state_init: StateInitConfig {
                    state: InitialStateConfig {
                        robot_position: [0.0; 3],
                        robot_atti_quat_simp: [1.0, 0.0],
                        robot_vel_lin_world: [0.0; 3],
                        robot_vel_ang_world: [0.0],
                    },
                    cov_diag: [1.0; STATE_DIM],
                },
                process_model: CovDiag {
                    cov_diag: [0.01, 0.01, 0.001, 0.01],
                },
                measurements: MeasurementsConfig {
                    meas_position: CovDiag {
                        cov_diag: [0.01; 3],
                    },
                    meas_attitude: CovDiag { cov_diag: [0.001] },
                    meas_velo_lin: CovDiag {
                        cov_diag: [0.01; 3],
                    },
                    meas_velo_ang: CovDiag { cov_diag: [0.001] },
                },
                max_condition_number: default_max_condition_number(),
                attitude_norm_tolerance: default_attitude_norm_tolerance(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_default_is_valid_and_matches_tuning_default() {
        let config = EstimatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tuning(), EkfTuning::default());
        assert_relative_eq!(config.period().as_secs_f64(), 0.02, epsilon = 1e-12);
        assert_eq!(config.initial_covariance(), StateCovariance::identity());
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = EstimatorConfig::default();
        config.state_estim_loop_freq = 100.0;
        config.ekf.estimated_state_init.state.robot_position = [1.0, 2.0, 0.5];
        let (s, c) = 0.25_f64.sin_cos();
        config.ekf.estimated_state_init.state.robot_atti_quat_simp = [c, s];

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json_string().unwrap().as_bytes())
            .unwrap();

        let loaded = EstimatorConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
        let init = loaded.initial_state();
        assert_eq!(init.position, Vector3::new(1.0, 2.0, 0.5));
        assert_relative_eq!(init.yaw(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_optional_fields_default() {
        let mut value = serde_json::to_value(EstimatorConfig::default()).unwrap();
        let ekf = value["ekf"].as_object_mut().unwrap();
        ekf.remove("max_condition_number");
        ekf.remove("attitude_norm_tolerance");

        let config = EstimatorConfig::from_json_str(&value.to_string()).unwrap();
        assert_eq!(config.ekf.max_condition_number, 1e12);
        assert_eq!(config.ekf.attitude_norm_tolerance, DEFAULT_NORM_TOLERANCE);
    }

    #[test]
    fn test_wrong_array_length_is_parse_error() {
        let mut value = serde_json::to_value(EstimatorConfig::default()).unwrap();
        value["ekf"]["measurements"]["meas_position"]["cov_diag"] = serde_json::json!([0.1, 0.1]);
        let err = EstimatorConfig::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EstimatorConfig::default();
        config.state_estim_loop_freq = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EstimatorConfig::default();
        config.ekf.process_model.cov_diag[2] = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EstimatorConfig::default();
        config.ekf.estimated_state_init.state.robot_atti_quat_simp = [0.5, 0.5];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EstimatorConfig::default();
        config.ekf.max_condition_number = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_subnormal_loop_freq_rejected() {
        let mut config = EstimatorConfig::default();
        config.state_estim_loop_freq = 1e-310;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut value = serde_json::to_value(EstimatorConfig::default()).unwrap();
        value["state_estim_loop_freq"] = serde_json::json!(1e-310);
        let err = EstimatorConfig::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EstimatorConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

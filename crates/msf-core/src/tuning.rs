use nalgebra::{Matrix1, Matrix3, Matrix4, SMatrix, Vector3, Vector4};

use crate::quat_simp::DEFAULT_NORM_TOLERANCE;
use crate::state::{Scalar, NOISE_DIM};

pub type ProcessCovariance = SMatrix<Scalar, NOISE_DIM, NOISE_DIM>;

const DEFAULT_MAX_CONDITION: Scalar = 1e12;

/// Process and measurement noise for the filter.
///
/// The reference configuration only ever fills diagonals, but every block
/// is held as a full SPD matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EkfTuning {
    /// `Q` over `[n_vel_lin_x, n_vel_lin_y, n_vel_lin_z, n_vel_ang_z]`,
    /// injected once per prediction.
    pub cov_proc: ProcessCovariance,
    pub cov_meas_posi: Matrix3<Scalar>,
    pub cov_meas_atti: Matrix1<Scalar>,
    /// Linear (3) then angular (1) body velocity.
    pub cov_meas_velo: Matrix4<Scalar>,
    /// Upper bound on the Frobenius condition estimate of `S`.
    pub max_condition_number: Scalar,
    /// Allowed `|w² + z² − 1|` on staged attitude samples.
    pub attitude_norm_tolerance: Scalar,
}

impl EkfTuning {
    pub fn from_diagonals(
        proc_diag: [Scalar; 4],
        meas_posi_diag: [Scalar; 3],
        meas_atti_var: Scalar,
        meas_velo_lin_diag: [Scalar; 3],
        meas_velo_ang_var: Scalar,
    ) -> Self {
        let velo = Vector4::new(
            meas_velo_lin_diag[0],
            meas_velo_lin_diag[1],
            meas_velo_lin_diag[2],
            meas_velo_ang_var,
        );
        Self {
            cov_proc: Matrix4::from_diagonal(&Vector4::from(proc_diag)),
            cov_meas_posi: Matrix3::from_diagonal(&Vector3::from(meas_posi_diag)),
            cov_meas_atti: Matrix1::new(meas_atti_var),
            cov_meas_velo: Matrix4::from_diagonal(&velo),
            max_condition_number: DEFAULT_MAX_CONDITION,
            attitude_norm_tolerance: DEFAULT_NORM_TOLERANCE,
        }
    }
}

impl Default for EkfTuning {
    fn default() -> Self {
        Self::from_diagonals(
            [0.01, 0.01, 0.001, 0.01],
            [0.01, 0.01, 0.01],
            0.001,
            [0.01, 0.01, 0.01],
            0.001,
        )
    }
}

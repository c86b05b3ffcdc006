//! Estimated state, covariance and the filter bookkeeping around them.
//!
//! State vector layout (world frame):
//!
//! | index | quantity     |
//! |-------|--------------|
//! | 0..3  | position     |
//! | 3     | yaw          |
//! | 4..7  | linear vel.  |
//! | 7     | yaw rate     |
//!
//! Yaw is carried as a [`QuatSimp`] in storage and only expanded to an
//! angle where a Jacobian needs it.

use nalgebra::{SMatrix, SVector, Vector3};
use serde::Serialize;

use crate::quat_simp::QuatSimp;

pub type Scalar = f64;

pub const STATE_DIM: usize = 8;
pub const NOISE_DIM: usize = 4;

pub const IDX_POSI: usize = 0;
pub const IDX_ATTI: usize = 3;
pub const IDX_VEL_LIN: usize = 4;
pub const IDX_VEL_ANG: usize = 7;

/// Value of `last_predict_us` before the first prediction.
pub const UNINITIALIZED_TIMESTAMP: u64 = 0;

pub type StateCovariance = SMatrix<Scalar, STATE_DIM, STATE_DIM>;
pub type StateVector = SVector<Scalar, STATE_DIM>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EstimatedState {
    pub position: Vector3<Scalar>,
    pub attitude: QuatSimp,
    pub vel_lin_world: Vector3<Scalar>,
    pub vel_ang_world: Scalar,
}

impl EstimatedState {
    pub fn new() -> Self {
        Self {
            position: Vector3::zeros(),
            attitude: QuatSimp::identity(),
            vel_lin_world: Vector3::zeros(),
            vel_ang_world: 0.0,
        }
    }

    /// Flatten to the 8-element angle form.
    pub fn to_vector(&self) -> StateVector {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<3>(IDX_POSI).copy_from(&self.position);
        x[IDX_ATTI] = self.attitude.angle();
        x.fixed_rows_mut::<3>(IDX_VEL_LIN)
            .copy_from(&self.vel_lin_world);
        x[IDX_VEL_ANG] = self.vel_ang_world;
        x
    }

    pub fn yaw(&self) -> Scalar {
        self.attitude.angle()
    }
}

impl Default for EstimatedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything guarded by the state lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub state: EstimatedState,
    pub covariance: StateCovariance,
    /// Time of the last successful prediction, or [`UNINITIALIZED_TIMESTAMP`].
    pub last_predict_us: u64,
}

impl FilterState {
    pub fn new(state: EstimatedState, covariance: StateCovariance) -> Self {
        Self {
            state,
            covariance,
            last_predict_us: UNINITIALIZED_TIMESTAMP,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.last_predict_us != UNINITIALIZED_TIMESTAMP
    }
}

/// `(P + Pᵗ) / 2`
pub fn symmetrize(p: &StateCovariance) -> StateCovariance {
    (p + p.transpose()) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_to_vector_layout() {
        let s = EstimatedState {
            position: Vector3::new(1.0, 2.0, 3.0),
            attitude: QuatSimp::from_angle(0.5),
            vel_lin_world: Vector3::new(4.0, 5.0, 6.0),
            vel_ang_world: 7.0,
        };
        let x = s.to_vector();
        assert_eq!(x[0], 1.0);
        assert_eq!(x[2], 3.0);
        assert_abs_diff_eq!(x[IDX_ATTI], 0.5, epsilon = 1e-12);
        assert_eq!(x[IDX_VEL_LIN], 4.0);
        assert_eq!(x[IDX_VEL_ANG], 7.0);
    }

    #[test]
    fn test_new_filter_is_uninitialized() {
        let f = FilterState::new(EstimatedState::new(), StateCovariance::identity());
        assert!(!f.is_initialized());
        assert_eq!(f.last_predict_us, UNINITIALIZED_TIMESTAMP);
    }
}

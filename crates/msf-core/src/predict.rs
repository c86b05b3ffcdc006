//! Predictor: constant-velocity motion model over the world frame.

use nalgebra::{Matrix3, SMatrix};

use crate::error::FilterError;
use crate::quat_simp::QuatSimp;
use crate::state::{
    symmetrize, FilterState, Scalar, StateCovariance, IDX_ATTI, IDX_POSI, IDX_VEL_ANG,
    IDX_VEL_LIN, NOISE_DIM, STATE_DIM,
};
use crate::tuning::ProcessCovariance;

pub type NoiseJacobian = SMatrix<Scalar, STATE_DIM, NOISE_DIM>;

/// `dt` in seconds for a prediction at `time_us`.
///
/// The very first prediction has `dt = 0`. Going back in time is an error
/// and leaves the caller free to keep the current state.
pub fn delta_time(filter: &FilterState, time_us: u64) -> Result<Scalar, FilterError> {
    if !filter.is_initialized() {
        return Ok(0.0);
    }
    if time_us < filter.last_predict_us {
        return Err(FilterError::InvalidTimestamp {
            last_us: filter.last_predict_us,
            requested_us: time_us,
        });
    }
    Ok((time_us - filter.last_predict_us) as Scalar * 1e-6)
}

/// `∂x'/∂x`
pub fn jacobian_fx(dt: Scalar) -> StateCovariance {
    let mut fx = StateCovariance::identity();
    fx.fixed_view_mut::<3, 3>(IDX_POSI, IDX_VEL_LIN)
        .copy_from(&(Matrix3::identity() * dt));
    fx[(IDX_ATTI, IDX_VEL_ANG)] = dt;
    fx
}

/// `∂x'/∂n`; additive noise on the velocities only.
pub fn jacobian_fn() -> NoiseJacobian {
    let mut fn_ = NoiseJacobian::zeros();
    fn_.fixed_view_mut::<3, 3>(IDX_VEL_LIN, 0)
        .fill_diagonal(1.0);
    fn_[(IDX_VEL_ANG, 3)] = 1.0;
    fn_
}

/// Advance `filter` to `time_us`. Returns the `dt` used.
///
/// On error nothing in `filter` is touched.
pub fn predict(
    filter: &mut FilterState,
    cov_proc: &ProcessCovariance,
    time_us: u64,
) -> Result<Scalar, FilterError> {
    let dt = delta_time(filter, time_us)?;

    let s = &mut filter.state;
    s.position += s.vel_lin_world * dt;
    let delta_atti = QuatSimp::from_angle(dt * s.vel_ang_world);
    s.attitude = s.attitude.compose(&delta_atti);
    // Velocities are random walks: mean unchanged.

    let fx = jacobian_fx(dt);
    let fn_ = jacobian_fn();
    let p = fx * filter.covariance * fx.transpose() + fn_ * cov_proc * fn_.transpose();
    filter.covariance = symmetrize(&p);

    filter.last_predict_us = time_us;
    Ok(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EstimatedState, UNINITIALIZED_TIMESTAMP};
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix4, Vector3, Vector4};

    fn q() -> ProcessCovariance {
        Matrix4::from_diagonal(&Vector4::new(0.1, 0.2, 0.3, 0.4))
    }

    fn moving_filter() -> FilterState {
        let state = EstimatedState {
            vel_lin_world: Vector3::new(1.0, -2.0, 0.5),
            vel_ang_world: 0.5,
            ..EstimatedState::new()
        };
        FilterState::new(state, StateCovariance::identity())
    }

    #[test]
    fn test_first_predict_has_zero_dt() {
        let mut f = moving_filter();
        let before = f.state;
        let dt = predict(&mut f, &q(), 1_000_000).unwrap();
        assert_eq!(dt, 0.0);
        assert_eq!(f.state, before);
        assert_eq!(f.last_predict_us, 1_000_000);
    }

    #[test]
    fn test_zero_dt_only_injects_process_noise() {
        let mut f = moving_filter();
        f.covariance[(0, 4)] = 0.3;
        f.covariance[(4, 0)] = 0.3;
        let p0 = f.covariance;
        predict(&mut f, &q(), 500).unwrap();

        let fn_ = jacobian_fn();
        let expected = p0 + fn_ * q() * fn_.transpose();
        assert_abs_diff_eq!((f.covariance - expected).norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_constant_velocity_motion() {
        let mut f = moving_filter();
        predict(&mut f, &q(), 1_000_000).unwrap();
        predict(&mut f, &q(), 3_000_000).unwrap();

        assert_abs_diff_eq!(f.state.position.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.state.position.y, -4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.state.position.z, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.state.yaw(), 1.0, epsilon = 1e-12);
        assert_eq!(f.state.vel_lin_world, Vector3::new(1.0, -2.0, 0.5));
    }

    #[test]
    fn test_attitude_wraps_through_pi() {
        let mut f = moving_filter();
        f.state.attitude = QuatSimp::from_angle(3.0);
        f.state.vel_ang_world = 1.0;
        predict(&mut f, &q(), 1).unwrap();
        predict(&mut f, &q(), 500_001).unwrap();
        // 3.0 + 0.5 wraps to 3.5 − 2π.
        assert_abs_diff_eq!(
            f.state.yaw(),
            3.5 - std::f64::consts::TAU,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut f = moving_filter();
        predict(&mut f, &q(), 2_000_000).unwrap();
        predict(&mut f, &q(), 3_000_000).unwrap();
        let snapshot = f;

        let err = predict(&mut f, &q(), 2_000_000).unwrap_err();
        assert_eq!(
            err,
            FilterError::InvalidTimestamp {
                last_us: 3_000_000,
                requested_us: 2_000_000
            }
        );
        assert_eq!(f, snapshot);
    }

    #[test]
    fn test_covariance_symmetric_and_psd() {
        let mut f = moving_filter();
        f.covariance[(3, 7)] = 0.2;
        f.covariance[(7, 3)] = 0.2;
        for k in 0..200 {
            predict(&mut f, &q(), 1 + k * 20_000).unwrap();
            let p = f.covariance;
            assert_eq!(p, p.transpose());
            let eig = p.symmetric_eigenvalues();
            assert!(eig.iter().all(|&e| e >= -1e-9), "eigenvalues {eig}");
        }
    }

    #[test]
    fn test_jacobian_structure() {
        let fx = jacobian_fx(0.1);
        assert_eq!(fx[(0, 4)], 0.1);
        assert_eq!(fx[(2, 6)], 0.1);
        assert_eq!(fx[(0, 5)], 0.0);
        assert_eq!(fx[(3, 7)], 0.1);
        assert_eq!(fx[(3, 3)], 1.0);

        let fn_ = jacobian_fn();
        assert_eq!(fn_.fixed_view::<3, 3>(4, 0).into_owned(), Matrix3::identity());
        assert_eq!(fn_[(7, 3)], 1.0);
        assert_eq!(fn_.fixed_view::<4, 4>(0, 0).norm(), 0.0);
        assert_eq!(UNINITIALIZED_TIMESTAMP, 0);
    }
}

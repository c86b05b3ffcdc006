//! Updater: stacked EKF correction from whatever channels were pending.
//!
//! Channels are stacked in a fixed order (position, attitude, velocity)
//! into 8-row buffers, then the correction runs on fixed-size matrices of
//! the actual stacked dimension.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::error::FilterError;
use crate::measurement::{BodyVelocity, MeasurementSnapshot};
use crate::quat_simp::QuatSimp;
use crate::state::{
    symmetrize, EstimatedState, FilterState, Scalar, StateCovariance, StateVector, IDX_ATTI,
    IDX_POSI, IDX_VEL_ANG, IDX_VEL_LIN, STATE_DIM,
};
use crate::tuning::EkfTuning;

/// Largest stacked measurement: 3 + 1 + 4.
pub const MAX_MEAS_DIM: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Nothing was pending; state and covariance untouched.
    NoMeasurements,
    /// Correction applied with a stacked measurement of `dim` rows.
    Corrected { dim: usize },
}

/// Stacked innovation `y`, Jacobian `H` and block-diagonal noise `R`.
/// Only the first `dim` rows are meaningful.
#[derive(Debug, Clone)]
struct StackedSystem {
    innovation: SVector<Scalar, MAX_MEAS_DIM>,
    jacobian: SMatrix<Scalar, MAX_MEAS_DIM, STATE_DIM>,
    noise: SMatrix<Scalar, MAX_MEAS_DIM, MAX_MEAS_DIM>,
    dim: usize,
}

impl StackedSystem {
    fn new() -> Self {
        Self {
            innovation: SVector::zeros(),
            jacobian: SMatrix::zeros(),
            noise: SMatrix::zeros(),
            dim: 0,
        }
    }

    fn push<const D: usize>(
        &mut self,
        innovation: &SVector<Scalar, D>,
        jacobian: &SMatrix<Scalar, D, STATE_DIM>,
        noise: &SMatrix<Scalar, D, D>,
    ) {
        let row = self.dim;
        self.innovation
            .fixed_rows_mut::<D>(row)
            .copy_from(innovation);
        self.jacobian
            .fixed_view_mut::<D, STATE_DIM>(row, 0)
            .copy_from(jacobian);
        self.noise
            .fixed_view_mut::<D, D>(row, row)
            .copy_from(noise);
        self.dim += D;
    }

    fn build(state: &EstimatedState, meas: &MeasurementSnapshot, tuning: &EkfTuning) -> Self {
        let mut stacked = Self::new();

        if let Some(posi) = &meas.position {
            let (innovation, h) = position_model(state, &posi.value);
            stacked.push(&innovation, &h, &tuning.cov_meas_posi);
        }

        if let Some(atti) = &meas.attitude {
            let (innovation, h) = attitude_model(state, &atti.value);
            stacked.push(&innovation, &h, &tuning.cov_meas_atti);
        }

        if let Some(velo) = &meas.velocity {
            let (predicted, h) = velocity_model(state);
            let measured = SVector::<Scalar, 4>::new(
                velo.value.linear.x,
                velo.value.linear.y,
                velo.value.linear.z,
                velo.value.angular,
            );
            stacked.push(&(measured - predicted), &h, &tuning.cov_meas_velo);
        }

        stacked
    }

    fn innovation<const D: usize>(&self) -> SVector<Scalar, D> {
        SVector::from_fn(|i, _| self.innovation[i])
    }

    fn jacobian<const D: usize>(&self) -> SMatrix<Scalar, D, STATE_DIM> {
        SMatrix::from_fn(|i, j| self.jacobian[(i, j)])
    }

    fn noise<const D: usize>(&self) -> SMatrix<Scalar, D, D> {
        SMatrix::from_fn(|i, j| self.noise[(i, j)])
    }
}

/// Position is observed directly.
fn position_model(
    state: &EstimatedState,
    measured: &Vector3<Scalar>,
) -> (SVector<Scalar, 3>, SMatrix<Scalar, 3, STATE_DIM>) {
    let mut h = SMatrix::<Scalar, 3, STATE_DIM>::zeros();
    h.fixed_view_mut::<3, 3>(0, IDX_POSI).fill_diagonal(1.0);
    (measured - state.position, h)
}

/// Yaw innovation is the wrapped shortest-path angle from estimate to
/// measurement.
fn attitude_model(
    state: &EstimatedState,
    measured: &QuatSimp,
) -> (SVector<Scalar, 1>, SMatrix<Scalar, 1, STATE_DIM>) {
    let mut h = SMatrix::<Scalar, 1, STATE_DIM>::zeros();
    h[(0, IDX_ATTI)] = 1.0;
    let innovation = state.attitude.angle_to(measured);
    (SVector::<Scalar, 1>::new(innovation), h)
}

/// Predicted body-frame velocity and its Jacobian.
///
/// `v_robot = Rᵗ(θ)·v_world`, `ω_robot = ω_world`.
pub(crate) fn velocity_model(
    state: &EstimatedState,
) -> (SVector<Scalar, 4>, SMatrix<Scalar, 4, STATE_DIM>) {
    let rot_t: Matrix3<Scalar> = state.attitude.rotation_matrix().transpose();
    let d_rot_t = state.attitude.rotation_matrix_derivative().transpose();

    let lin = rot_t * state.vel_lin_world;
    let predicted = SVector::<Scalar, 4>::new(lin.x, lin.y, lin.z, state.vel_ang_world);

    let mut h = SMatrix::<Scalar, 4, STATE_DIM>::zeros();
    h.fixed_view_mut::<3, 1>(0, IDX_ATTI)
        .copy_from(&(d_rot_t * state.vel_lin_world));
    h.fixed_view_mut::<3, 3>(0, IDX_VEL_LIN).copy_from(&rot_t);
    h[(3, IDX_VEL_ANG)] = 1.0;
    (predicted, h)
}

/// Inject a correction: additive on linear quantities, composed on yaw.
fn apply_correction(state: &mut EstimatedState, dx: &StateVector) {
    state.position += dx.fixed_rows::<3>(IDX_POSI);
    state.attitude = state
        .attitude
        .compose(&QuatSimp::from_angle(dx[IDX_ATTI]));
    state.vel_lin_world += dx.fixed_rows::<3>(IDX_VEL_LIN);
    state.vel_ang_world += dx[IDX_VEL_ANG];
}

fn correct<const D: usize>(
    filter: &mut FilterState,
    stacked: &StackedSystem,
    max_condition: Scalar,
) -> Result<UpdateStatus, FilterError> {
    let h = stacked.jacobian::<D>();
    let y = stacked.innovation::<D>();
    let r = stacked.noise::<D>();
    let p = filter.covariance;

    let s = h * p * h.transpose() + r;
    let s_inv = s
        .try_inverse()
        .ok_or(FilterError::SingularCovariance {
            condition: Scalar::INFINITY,
        })?;
    let condition = s.norm() * s_inv.norm();
    if !condition.is_finite() || condition > max_condition {
        return Err(FilterError::SingularCovariance { condition });
    }

    let k_gain = p * h.transpose() * s_inv;
    let dx = k_gain * y;
    apply_correction(&mut filter.state, &dx);

    // Joseph form keeps P symmetric PSD under repeated corrections.
    let i_minus_kh = StateCovariance::identity() - k_gain * h;
    let p_new = i_minus_kh * p * i_minus_kh.transpose() + k_gain * r * k_gain.transpose();
    filter.covariance = symmetrize(&p_new);

    Ok(UpdateStatus::Corrected { dim: D })
}

/// Correct `filter` with every channel present in `meas`.
///
/// An empty snapshot is a strict no-op. On error nothing in `filter` is
/// touched.
pub fn update(
    filter: &mut FilterState,
    tuning: &EkfTuning,
    meas: &MeasurementSnapshot,
) -> Result<UpdateStatus, FilterError> {
    if meas.is_empty() {
        return Ok(UpdateStatus::NoMeasurements);
    }

    let stacked = StackedSystem::build(&filter.state, meas, tuning);
    let max_cond = tuning.max_condition_number;
    debug_assert_eq!(stacked.dim, meas.dim());

    match stacked.dim {
        1 => correct::<1>(filter, &stacked, max_cond),
        2 => correct::<2>(filter, &stacked, max_cond),
        3 => correct::<3>(filter, &stacked, max_cond),
        4 => correct::<4>(filter, &stacked, max_cond),
        5 => correct::<5>(filter, &stacked, max_cond),
        6 => correct::<6>(filter, &stacked, max_cond),
        7 => correct::<7>(filter, &stacked, max_cond),
        _ => correct::<MAX_MEAS_DIM>(filter, &stacked, max_cond),
    }
}

/// Predicted body-frame twist for the current estimate.
pub fn predicted_body_velocity(state: &EstimatedState) -> BodyVelocity {
    let (z, _) = velocity_model(state);
    BodyVelocity::new(Vector3::new(z[0], z[1], z[2]), z[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Stamped;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn stamped<T>(value: T) -> Option<Stamped<T>> {
        Some(Stamped {
            timestamp_us: 1_000_000,
            value,
        })
    }

    fn unit_filter() -> FilterState {
        let mut f = FilterState::new(EstimatedState::new(), StateCovariance::identity());
        f.last_predict_us = 1_000_000;
        f
    }

    fn tuning() -> EkfTuning {
        EkfTuning::from_diagonals(
            [0.01; 4],
            [0.01, 0.01, 0.01],
            0.01,
            [0.01, 0.01, 0.01],
            0.01,
        )
    }

    fn assert_symmetric_psd(p: &StateCovariance) {
        assert_eq!(*p, p.transpose());
        let eig = p.symmetric_eigenvalues();
        assert!(eig.iter().all(|&e| e >= -1e-12), "eigenvalues {eig}");
    }

    #[test]
    fn test_empty_snapshot_is_strict_noop() {
        let mut f = unit_filter();
        f.state.vel_lin_world = Vector3::new(0.3, 0.1, 0.0);
        f.covariance[(1, 5)] = 0.01;
        f.covariance[(5, 1)] = 0.01;
        let before = f;

        let status = update(&mut f, &tuning(), &MeasurementSnapshot::default()).unwrap();
        assert_eq!(status, UpdateStatus::NoMeasurements);
        assert_eq!(f, before);
    }

    #[test]
    fn test_position_update_pulls_estimate() {
        let mut f = unit_filter();
        let meas = MeasurementSnapshot {
            position: stamped(Vector3::new(1.0, 0.0, 0.0)),
            ..Default::default()
        };
        let prior_block = f.covariance.fixed_view::<3, 3>(0, 0).into_owned();

        let status = update(&mut f, &tuning(), &meas).unwrap();
        assert_eq!(status, UpdateStatus::Corrected { dim: 3 });

        // K = 1 / 1.01 on each axis.
        assert_abs_diff_eq!(f.state.position.x, 1.0 / 1.01, epsilon = 1e-12);
        assert_abs_diff_eq!(f.state.position.y, 0.0, epsilon = 1e-12);
        let post_block = f.covariance.fixed_view::<3, 3>(0, 0).into_owned();
        for i in 0..3 {
            assert!(post_block[(i, i)] < prior_block[(i, i)]);
            assert_abs_diff_eq!(post_block[(i, i)], 0.01 / 1.01, epsilon = 1e-12);
        }
        assert_symmetric_psd(&f.covariance);
    }

    #[test]
    fn test_velocity_only_update_leaves_pose() {
        let mut f = unit_filter();
        f.state.attitude = QuatSimp::from_angle(0.4);
        let tuning = EkfTuning {
            cov_meas_velo: nalgebra::Matrix4::identity() * 1e-4,
            ..tuning()
        };
        let meas = MeasurementSnapshot {
            velocity: stamped(BodyVelocity::new(Vector3::new(0.5, 0.0, 0.0), 0.2)),
            ..Default::default()
        };
        let prior = f;

        update(&mut f, &tuning, &meas).unwrap();

        assert_eq!(f.state.position, prior.state.position);
        assert_abs_diff_eq!(f.state.yaw(), 0.4, epsilon = 1e-12);
        for i in 4..8 {
            assert!(f.covariance[(i, i)] < prior.covariance[(i, i)]);
        }
        for i in 0..4 {
            assert_abs_diff_eq!(f.covariance[(i, i)], 1.0, epsilon = 1e-12);
        }
        // Measured body velocity rotated to world.
        let v_world = f.state.attitude.robot_to_world(&Vector3::new(0.5, 0.0, 0.0));
        assert_abs_diff_eq!((f.state.vel_lin_world - v_world).norm(), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(f.state.vel_ang_world, 0.2, epsilon = 1e-3);
    }

    #[test]
    fn test_attitude_update_across_pi() {
        let mut f = unit_filter();
        f.state.attitude = QuatSimp::from_angle(PI - 0.05);
        let measured = QuatSimp::from_angle(-PI + 0.05);
        let meas = MeasurementSnapshot {
            attitude: stamped(measured),
            ..Default::default()
        };
        let tuning = EkfTuning {
            cov_meas_atti: nalgebra::Matrix1::new(1e-6),
            ..tuning()
        };

        update(&mut f, &tuning, &meas).unwrap();

        // Moves forward by ~0.1 through π instead of backwards by ~2π.
        assert!(f.state.attitude.angle_to(&measured).abs() < 1e-4);
        assert!(f.covariance[(3, 3)] < 1e-5);
    }

    #[test]
    fn test_full_stack_shrinks_covariance() {
        let mut f = unit_filter();
        f.state.vel_lin_world = Vector3::new(1.0, 0.5, 0.0);
        f.state.attitude = QuatSimp::from_angle(1.0);
        let meas = MeasurementSnapshot {
            position: stamped(Vector3::new(0.1, 0.2, 0.0)),
            attitude: stamped(QuatSimp::from_angle(1.1)),
            velocity: stamped(BodyVelocity::new(Vector3::new(1.0, 0.0, 0.0), 0.0)),
        };
        let trace_before = f.covariance.trace();

        let status = update(&mut f, &tuning(), &meas).unwrap();
        assert_eq!(status, UpdateStatus::Corrected { dim: 8 });
        assert!(f.covariance.trace() < trace_before);
        assert_symmetric_psd(&f.covariance);
    }

    #[test]
    fn test_repeated_updates_stay_psd() {
        let mut f = unit_filter();
        f.state.vel_lin_world = Vector3::new(0.7, -0.2, 0.1);
        for k in 0..100 {
            let meas = MeasurementSnapshot {
                position: stamped(Vector3::new(k as f64 * 0.01, 0.0, 0.0)),
                attitude: if k % 3 == 0 {
                    stamped(QuatSimp::from_angle(0.01 * k as f64))
                } else {
                    None
                },
                velocity: if k % 2 == 0 {
                    stamped(BodyVelocity::new(Vector3::new(0.7, 0.0, 0.0), 0.0))
                } else {
                    None
                },
            };
            crate::predict::predict(&mut f, &tuning().cov_proc, 1_000_000 + k * 20_000).unwrap();
            update(&mut f, &tuning(), &meas).unwrap();
            assert_symmetric_psd(&f.covariance);
        }
    }

    #[test]
    fn test_singular_innovation_covariance_is_rejected() {
        let mut f = unit_filter();
        f.covariance = StateCovariance::zeros();
        let tuning = EkfTuning {
            cov_meas_posi: Matrix3::zeros(),
            ..tuning()
        };
        let meas = MeasurementSnapshot {
            position: stamped(Vector3::new(1.0, 2.0, 3.0)),
            ..Default::default()
        };
        let before = f;

        let err = update(&mut f, &tuning, &meas).unwrap_err();
        assert!(matches!(err, FilterError::SingularCovariance { .. }));
        assert_eq!(f, before);
    }

    #[test]
    fn test_ill_conditioned_innovation_covariance_is_rejected() {
        let mut f = unit_filter();
        f.covariance = StateCovariance::zeros();
        let tuning = EkfTuning {
            cov_meas_posi: Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 1e-14)),
            ..tuning()
        };
        let meas = MeasurementSnapshot {
            position: stamped(Vector3::new(1.0, 2.0, 3.0)),
            ..Default::default()
        };
        let before = f;

        match update(&mut f, &tuning, &meas) {
            Err(FilterError::SingularCovariance { condition }) => assert!(condition > 1e12),
            other => panic!("expected SingularCovariance, got {other:?}"),
        }
        assert_eq!(f, before);
    }

    #[test]
    fn test_velocity_jacobian_matches_finite_difference() {
        let state = EstimatedState {
            attitude: QuatSimp::from_angle(0.9),
            vel_lin_world: Vector3::new(1.5, -0.5, 0.2),
            vel_ang_world: 0.3,
            ..EstimatedState::new()
        };
        let (_, h) = velocity_model(&state);
        let eps = 1e-6;

        let perturb = |idx: usize, delta: f64| {
            let mut s = state;
            match idx {
                IDX_ATTI => s.attitude = s.attitude.compose(&QuatSimp::from_angle(delta)),
                4..=6 => s.vel_lin_world[idx - IDX_VEL_LIN] += delta,
                IDX_VEL_ANG => s.vel_ang_world += delta,
                _ => s.position[idx] += delta,
            }
            velocity_model(&s).0
        };

        for idx in 0..STATE_DIM {
            let numeric = (perturb(idx, eps) - perturb(idx, -eps)) / (2.0 * eps);
            for row in 0..4 {
                assert_abs_diff_eq!(h[(row, idx)], numeric[row], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_predicted_body_velocity() {
        let state = EstimatedState {
            attitude: QuatSimp::from_angle(PI / 2.0),
            vel_lin_world: Vector3::new(0.0, 1.0, 0.0),
            vel_ang_world: 0.1,
            ..EstimatedState::new()
        };
        let v = predicted_body_velocity(&state);
        assert_abs_diff_eq!(v.linear.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.linear.y, 0.0, epsilon = 1e-12);
        assert_eq!(v.angular, 0.1);
    }
}

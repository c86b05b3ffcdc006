//! Simplified quaternion for planar (yaw-only) attitude.
//!
//! A rotation about the world z axis by `θ` is the unit quaternion
//! `(cos θ/2, 0, 0, sin θ/2)`. Only the `w` and `z` components carry
//! information, so the filter stores just those two and keeps them on the
//! unit circle. Composition is then a 2-component product with no
//! trigonometry, which avoids angle unwrapping across ±π.

use core::f64::consts::{PI, TAU};

use nalgebra::{Matrix3, Vector3};
use serde::Serialize;

use crate::error::FilterError;

type Scalar = f64;

/// Default tolerance on `|w² + z² − 1|` for externally supplied attitudes.
pub const DEFAULT_NORM_TOLERANCE: Scalar = 1e-3;

/// Planar rotation encoded as `(w, z)` with `w² + z² = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuatSimp {
    w: Scalar,
    z: Scalar,
}

impl QuatSimp {
    pub const fn identity() -> Self {
        Self { w: 1.0, z: 0.0 }
    }

    /// Rotation by `angle` radians about +z.
    pub fn from_angle(angle: Scalar) -> Self {
        let (s, c) = (0.5 * angle).sin_cos();
        Self { w: c, z: s }
    }

    /// Validate an externally produced `(w, z)` pair.
    ///
    /// Samples that are off the unit circle by more than `tolerance` are
    /// rejected rather than renormalized so that upstream faults stay
    /// visible. Samples within tolerance are renormalized exactly.
    pub fn try_new(w: Scalar, z: Scalar, tolerance: Scalar) -> Result<Self, FilterError> {
        let norm_sq = w * w + z * z;
        if !norm_sq.is_finite() || (norm_sq - 1.0).abs() > tolerance {
            return Err(FilterError::InvalidMeasurement {
                norm: norm_sq.sqrt(),
            });
        }
        let norm = norm_sq.sqrt();
        Ok(Self {
            w: w / norm,
            z: z / norm,
        })
    }

    /// Project an arbitrary non-zero `(w, z)` onto the unit circle.
    ///
    /// Returns `None` for a zero or non-finite input.
    pub fn new_normalize(w: Scalar, z: Scalar) -> Option<Self> {
        let norm = (w * w + z * z).sqrt();
        if !norm.is_finite() || norm < 1e-12 {
            return None;
        }
        Some(Self {
            w: w / norm,
            z: z / norm,
        })
    }

    /// Extract the yaw part of a full `(w, x, y, z)` quaternion.
    ///
    /// Roll and pitch are discarded; the result is the rotation about z
    /// with the same heading.
    pub fn from_full_quaternion(w: Scalar, x: Scalar, y: Scalar, z: Scalar) -> Option<Self> {
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        if !yaw.is_finite() {
            return None;
        }
        Some(Self::from_angle(yaw))
    }

    #[inline]
    pub fn w(&self) -> Scalar {
        self.w
    }

    #[inline]
    pub fn z(&self) -> Scalar {
        self.z
    }

    /// Hamilton product restricted to z rotations: `self ⊗ rhs`.
    pub fn compose(&self, rhs: &Self) -> Self {
        let w = self.w * rhs.w - self.z * rhs.z;
        let z = self.w * rhs.z + self.z * rhs.w;
        // Re-project to absorb rounding drift over many compositions.
        Self::new_normalize(w, z).unwrap_or_else(Self::identity)
    }

    pub fn inverse(&self) -> Self {
        Self {
            w: self.w,
            z: -self.z,
        }
    }

    /// Rotation taking `self` to `other`: `self⁻¹ ⊗ other`.
    pub fn diff(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Yaw angle in `(−π, π]`.
    pub fn angle(&self) -> Scalar {
        wrap_angle(2.0 * self.z.atan2(self.w))
    }

    /// Signed shortest-path angle from `self` to `other`, in `(−π, π]`.
    pub fn angle_to(&self, other: &Self) -> Scalar {
        self.diff(other).angle()
    }

    /// Body→world rotation matrix.
    pub fn rotation_matrix(&self) -> Matrix3<Scalar> {
        let (c, s) = self.cos_sin();
        Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
    }

    /// `∂R/∂θ` evaluated at this attitude.
    pub fn rotation_matrix_derivative(&self) -> Matrix3<Scalar> {
        let (c, s) = self.cos_sin();
        Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
    }

    /// Rotate a world-frame vector into the body frame (`Rᵗ·v`).
    pub fn world_to_robot(&self, v_world: &Vector3<Scalar>) -> Vector3<Scalar> {
        self.rotation_matrix().transpose() * v_world
    }

    /// Rotate a body-frame vector into the world frame (`R·v`).
    pub fn robot_to_world(&self, v_robot: &Vector3<Scalar>) -> Vector3<Scalar> {
        self.rotation_matrix() * v_robot
    }

    // cos θ = w² − z², sin θ = 2wz (double-angle identities on θ/2).
    fn cos_sin(&self) -> (Scalar, Scalar) {
        (
            self.w * self.w - self.z * self.z,
            2.0 * self.w * self.z,
        )
    }
}

impl Default for QuatSimp {
    fn default() -> Self {
        Self::identity()
    }
}

/// Wrap an angle into `(−π, π]`.
pub fn wrap_angle(angle: Scalar) -> Scalar {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use core::f64::consts::FRAC_PI_2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_quat(rng: &mut StdRng) -> QuatSimp {
        QuatSimp::from_angle(rng.random_range(-PI..PI))
    }

    #[test]
    fn test_from_angle_round_trip() {
        for &a in &[0.0, 0.3, -1.2, FRAC_PI_2, PI, -3.0] {
            let q = QuatSimp::from_angle(a);
            assert_relative_eq!(q.w() * q.w() + q.z() * q.z(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(q.angle(), wrap_angle(a), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_compose_is_associative() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let (a, b, c) = (
                random_quat(&mut rng),
                random_quat(&mut rng),
                random_quat(&mut rng),
            );
            let left = a.compose(&b).compose(&c);
            let right = a.compose(&b.compose(&c));
            assert_abs_diff_eq!(left.w(), right.w(), epsilon = 1e-12);
            assert_abs_diff_eq!(left.z(), right.z(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inverse_compose_is_identity() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let q = random_quat(&mut rng);
            let id = q.inverse().compose(&q);
            assert_abs_diff_eq!(id.w(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(id.z(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(id.angle(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_angle_to_stays_in_half_open_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let a = rng.random_range(-10.0..10.0);
            let b = rng.random_range(-10.0..10.0);
            let d = QuatSimp::from_angle(a).angle_to(&QuatSimp::from_angle(b));
            assert!(d > -PI && d <= PI, "difference {d} out of range");
            assert_abs_diff_eq!(d, wrap_angle(b - a), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_angle_to_across_pi_boundary() {
        let d = QuatSimp::from_angle(PI).angle_to(&QuatSimp::from_angle(-PI));
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-9);

        let d = QuatSimp::from_angle(PI - 0.1).angle_to(&QuatSimp::from_angle(-PI + 0.1));
        assert_abs_diff_eq!(d, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_try_new_rejects_non_unit() {
        assert!(QuatSimp::try_new(1.0, 0.0, DEFAULT_NORM_TOLERANCE).is_ok());
        let err = QuatSimp::try_new(0.5, 0.5, DEFAULT_NORM_TOLERANCE).unwrap_err();
        assert!(matches!(err, FilterError::InvalidMeasurement { .. }));
        assert!(QuatSimp::try_new(f64::NAN, 0.0, DEFAULT_NORM_TOLERANCE).is_err());
    }

    #[test]
    fn test_velocity_frame_round_trip() {
        let q = QuatSimp::from_angle(FRAC_PI_2);
        let v_world = Vector3::new(1.0, 2.0, 0.5);
        let v_robot = q.world_to_robot(&v_world);
        // Facing +y: world +y is body +x, world +x is body −y.
        assert_abs_diff_eq!(v_robot.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_robot.y, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_robot.z, 0.5, epsilon = 1e-12);

        let back = q.robot_to_world(&v_robot);
        assert_abs_diff_eq!((back - v_world).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_derivative_matches_finite_difference() {
        let theta = 0.7;
        let h = 1e-6;
        let analytic = QuatSimp::from_angle(theta).rotation_matrix_derivative();
        let numeric = (QuatSimp::from_angle(theta + h).rotation_matrix()
            - QuatSimp::from_angle(theta - h).rotation_matrix())
            / (2.0 * h);
        assert_abs_diff_eq!((analytic - numeric).norm(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_from_full_quaternion_keeps_yaw() {
        let q = QuatSimp::from_full_quaternion(
            (0.4_f64).cos(),
            0.0,
            0.0,
            (0.4_f64).sin(),
        )
        .unwrap();
        assert_abs_diff_eq!(q.angle(), 0.8, epsilon = 1e-12);
    }
}

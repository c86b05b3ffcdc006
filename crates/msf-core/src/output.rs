//! Output boundary: what the cycle driver hands to publishers.

use crossbeam_channel::{Receiver, Sender};
use nalgebra::{Matrix3, Matrix4, Matrix6, Vector3};
use serde::Serialize;
use tracing::{debug, info};

use crate::quat_simp::QuatSimp;
use crate::state::{FilterState, Scalar, StateCovariance, IDX_ATTI, IDX_POSI, IDX_VEL_LIN};

/// Row/column of yaw and yaw rate in the 6-dof (x, y, z, roll, pitch, yaw)
/// layouts.
const IDX_6DOF_YAW: usize = 5;

/// One published estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateOutput {
    /// Time of the last successful prediction.
    pub timestamp_us: u64,
    pub world_frame: String,
    pub robot_frame: String,
    pub position: Vector3<Scalar>,
    pub attitude: QuatSimp,
    pub yaw: Scalar,
    pub vel_lin_world: Vector3<Scalar>,
    pub vel_ang_world: Scalar,
    pub covariance: StateCovariance,
}

impl EstimateOutput {
    pub fn from_filter(filter: &FilterState, world_frame: &str, robot_frame: &str) -> Self {
        let s = &filter.state;
        Self {
            timestamp_us: filter.last_predict_us,
            world_frame: world_frame.to_owned(),
            robot_frame: robot_frame.to_owned(),
            position: s.position,
            attitude: s.attitude,
            yaw: s.attitude.angle(),
            vel_lin_world: s.vel_lin_world,
            vel_ang_world: s.vel_ang_world,
            covariance: filter.covariance,
        }
    }

    /// Pose covariance in (x, y, z, roll, pitch, yaw) order. Roll and pitch
    /// are not estimated and stay zero.
    pub fn pose_covariance(&self) -> Matrix6<Scalar> {
        let p = &self.covariance;
        let mut out = Matrix6::zeros();
        out.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&p.fixed_view::<3, 3>(IDX_POSI, IDX_POSI));
        out.fixed_view_mut::<3, 1>(0, IDX_6DOF_YAW)
            .copy_from(&p.fixed_view::<3, 1>(IDX_POSI, IDX_ATTI));
        out.fixed_view_mut::<1, 3>(IDX_6DOF_YAW, 0)
            .copy_from(&p.fixed_view::<1, 3>(IDX_ATTI, IDX_POSI));
        out[(IDX_6DOF_YAW, IDX_6DOF_YAW)] = p[(IDX_ATTI, IDX_ATTI)];
        out
    }

    /// World-frame twist covariance in (vx, vy, vz, wx, wy, wz) order.
    pub fn velocity_world_covariance(&self) -> Matrix6<Scalar> {
        embed_twist(&self.velocity_block())
    }

    pub fn vel_lin_robot(&self) -> Vector3<Scalar> {
        self.attitude.world_to_robot(&self.vel_lin_world)
    }

    /// Yaw rate is frame-invariant for planar motion.
    pub fn vel_ang_robot(&self) -> Scalar {
        self.vel_ang_world
    }

    /// Body-frame twist covariance, `J·Σ·Jᵗ` with `J = diag(Rᵗ, 1)`.
    pub fn velocity_robot_covariance(&self) -> Matrix6<Scalar> {
        let rot_t: Matrix3<Scalar> = self.attitude.rotation_matrix().transpose();
        let mut jac = Matrix4::identity();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot_t);
        embed_twist(&(jac * self.velocity_block() * jac.transpose()))
    }

    fn velocity_block(&self) -> Matrix4<Scalar> {
        self.covariance
            .fixed_view::<4, 4>(IDX_VEL_LIN, IDX_VEL_LIN)
            .into_owned()
    }
}

// (vx, vy, vz, wz) -> (vx, vy, vz, wx, wy, wz)
fn embed_twist(block: &Matrix4<Scalar>) -> Matrix6<Scalar> {
    const MAP: [usize; 4] = [0, 1, 2, IDX_6DOF_YAW];
    let mut out = Matrix6::zeros();
    for (i, &oi) in MAP.iter().enumerate() {
        for (j, &oj) in MAP.iter().enumerate() {
            out[(oi, oj)] = block[(i, j)];
        }
    }
    out
}

/// Consumer of per-cycle estimates.
pub trait EstimatePublisher: Send {
    fn publish(&mut self, output: &EstimateOutput);
}

impl<P: EstimatePublisher + ?Sized> EstimatePublisher for Box<P> {
    fn publish(&mut self, output: &EstimateOutput) {
        (**self).publish(output)
    }
}

/// Fan out to two publishers.
impl<A: EstimatePublisher, B: EstimatePublisher> EstimatePublisher for (A, B) {
    fn publish(&mut self, output: &EstimateOutput) {
        self.0.publish(output);
        self.1.publish(output);
    }
}

/// Forwards every estimate over a crossbeam channel.
pub struct ChannelPublisher {
    tx: Sender<EstimateOutput>,
    disconnected: bool,
}

impl ChannelPublisher {
    pub fn new(tx: Sender<EstimateOutput>) -> Self {
        Self {
            tx,
            disconnected: false,
        }
    }

    /// Publisher plus the receiving end of a fresh unbounded channel.
    pub fn unbounded() -> (Self, Receiver<EstimateOutput>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl EstimatePublisher for ChannelPublisher {
    fn publish(&mut self, output: &EstimateOutput) {
        if self.tx.send(output.clone()).is_err() && !self.disconnected {
            debug!("estimate receiver dropped; discarding further output");
            self.disconnected = true;
        }
    }
}

/// Logs each estimate through `tracing`.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: u64,
    /// Emit at `info` every this many estimates; everything else at `debug`.
    pub info_every: u64,
}

impl LogPublisher {
    pub fn new(info_every: u64) -> Self {
        Self {
            published: 0,
            info_every,
        }
    }
}

impl EstimatePublisher for LogPublisher {
    fn publish(&mut self, output: &EstimateOutput) {
        self.published += 1;
        let p = &output.position;
        if self.info_every > 0 && self.published % self.info_every == 0 {
            info!(
                t_us = output.timestamp_us,
                x = p.x,
                y = p.y,
                z = p.z,
                yaw = output.yaw,
                "estimate"
            );
        } else {
            debug!(
                t_us = output.timestamp_us,
                x = p.x,
                y = p.y,
                z = p.z,
                yaw = output.yaw,
                "estimate"
            );
        }
    }
}

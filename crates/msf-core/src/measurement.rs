//! Measurement records as handed from sensor collaborators to the updater.

use nalgebra::Vector3;
use serde::Serialize;

use crate::quat_simp::QuatSimp;
use crate::state::Scalar;

/// Sensor channels in the order the updater stacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    Position,
    Attitude,
    Velocity,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Position, Channel::Attitude, Channel::Velocity];

    /// Rows this channel contributes to the stacked measurement.
    pub const fn dim(self) -> usize {
        match self {
            Self::Position => 3,
            Self::Attitude => 1,
            Self::Velocity => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Attitude => "attitude",
            Self::Velocity => "velocity",
        }
    }
}

/// Body-frame twist: linear 3 + yaw rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BodyVelocity {
    pub linear: Vector3<Scalar>,
    pub angular: Scalar,
}

impl BodyVelocity {
    pub fn new(linear: Vector3<Scalar>, angular: Scalar) -> Self {
        Self { linear, angular }
    }
}

/// One sensor sample, already in filter units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// World-frame position.
    Position(Vector3<Scalar>),
    /// World-frame yaw.
    Attitude(QuatSimp),
    /// Body-frame velocity.
    Velocity(BodyVelocity),
}

impl Measurement {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Position(_) => Channel::Position,
            Self::Attitude(_) => Channel::Attitude,
            Self::Velocity(_) => Channel::Velocity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped<T> {
    pub timestamp_us: u64,
    pub value: T,
}

/// Pending samples taken out of staging in one atomic drain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementSnapshot {
    pub position: Option<Stamped<Vector3<Scalar>>>,
    pub attitude: Option<Stamped<QuatSimp>>,
    pub velocity: Option<Stamped<BodyVelocity>>,
}

impl MeasurementSnapshot {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.attitude.is_none() && self.velocity.is_none()
    }

    pub fn has(&self, channel: Channel) -> bool {
        match channel {
            Channel::Position => self.position.is_some(),
            Channel::Attitude => self.attitude.is_some(),
            Channel::Velocity => self.velocity.is_some(),
        }
    }

    /// Total stacked measurement dimension.
    pub fn dim(&self) -> usize {
        Channel::ALL
            .iter()
            .filter(|c| self.has(**c))
            .map(|c| c.dim())
            .sum()
    }
}

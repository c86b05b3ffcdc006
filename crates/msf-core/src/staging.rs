//! Measurement staging shared between sensor threads and the cycle driver.
//!
//! One record per channel, overwritten in place. Producers only ever hold
//! the lock for a copy; the cycle driver drains every channel in a single
//! critical section.

use nalgebra::Vector3;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::FilterError;
use crate::measurement::{BodyVelocity, Channel, Measurement, MeasurementSnapshot, Stamped};
use crate::quat_simp::QuatSimp;
use crate::state::Scalar;

#[derive(Debug, Clone, Copy)]
struct Record<T> {
    timestamp_us: u64,
    value: T,
    dirty: bool,
}

impl<T: Copy> Record<T> {
    fn new(value: T) -> Self {
        Self {
            timestamp_us: 0,
            value,
            dirty: false,
        }
    }

    fn write(&mut self, timestamp_us: u64, value: T) -> bool {
        let overwrote = self.dirty;
        self.timestamp_us = timestamp_us;
        self.value = value;
        self.dirty = true;
        overwrote
    }

    fn take(&mut self) -> Option<Stamped<T>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(Stamped {
            timestamp_us: self.timestamp_us,
            value: self.value,
        })
    }
}

#[derive(Debug)]
struct Records {
    position: Record<Vector3<Scalar>>,
    attitude: Record<QuatSimp>,
    velocity: Record<BodyVelocity>,
}

/// Latest pending sample per channel with a "has new data" flag.
#[derive(Debug)]
pub struct MeasurementStaging {
    records: Mutex<Records>,
}

impl MeasurementStaging {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Records {
                position: Record::new(Vector3::zeros()),
                attitude: Record::new(QuatSimp::identity()),
                velocity: Record::new(BodyVelocity::default()),
            }),
        }
    }

    /// Overwrite the record for the sample's channel and mark it dirty.
    ///
    /// A still-pending sample on the same channel is replaced; only the
    /// latest one is ever applied.
    pub fn stage(&self, timestamp_us: u64, meas: Measurement) {
        let overwrote = {
            let mut rec = self.records.lock();
            match meas {
                Measurement::Position(p) => rec.position.write(timestamp_us, p),
                Measurement::Attitude(q) => rec.attitude.write(timestamp_us, q),
                Measurement::Velocity(v) => rec.velocity.write(timestamp_us, v),
            }
        };
        if overwrote {
            tracing::trace!(
                channel = meas.channel().label(),
                timestamp_us,
                "replaced pending measurement"
            );
        }
    }

    /// Validate a raw `(w, z)` attitude sample and stage it.
    ///
    /// Off-unit samples are dropped: the record (and its flag) is left as
    /// it was.
    pub fn stage_attitude_raw(
        &self,
        timestamp_us: u64,
        w: Scalar,
        z: Scalar,
        tolerance: Scalar,
    ) -> Result<(), FilterError> {
        match QuatSimp::try_new(w, z, tolerance) {
            Ok(q) => {
                self.stage(timestamp_us, Measurement::Attitude(q));
                Ok(())
            }
            Err(err) => {
                warn!(timestamp_us, w, z, "rejected attitude measurement: {err}");
                Err(err)
            }
        }
    }

    /// Take every dirty channel and clear the flags in the same critical
    /// section.
    pub fn drain_all(&self) -> MeasurementSnapshot {
        let mut rec = self.records.lock();
        MeasurementSnapshot {
            position: rec.position.take(),
            attitude: rec.attitude.take(),
            velocity: rec.velocity.take(),
        }
    }

    /// Whether `channel` has a sample waiting. Diagnostic only; the answer
    /// can be stale by the time it is read.
    pub fn is_pending(&self, channel: Channel) -> bool {
        let rec = self.records.lock();
        match channel {
            Channel::Position => rec.position.dirty,
            Channel::Attitude => rec.attitude.dirty,
            Channel::Velocity => rec.velocity.dirty,
        }
    }
}

impl Default for MeasurementStaging {
    fn default() -> Self {
        Self::new()
    }
}

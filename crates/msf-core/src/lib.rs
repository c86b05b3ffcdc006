//! # MSF Core
//!
//! Multi-sensor fusion state estimator for planar ground robots.
//! This crate contains the estimator itself:
//! - Simplified-quaternion yaw representation
//! - Constant-velocity EKF predictor and stacked-measurement updater
//! - Thread-safe measurement staging and state store
//! - Fixed-rate cycle driver and output boundary
//!
//! State is `[x, y, z, yaw, vx, vy, vz, yaw_rate]` in the world frame.
//! Sensors feed position (world), attitude (world) and body-frame velocity.

pub mod config;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod measurement;
pub mod output;
pub mod predict;
pub mod quat_simp;
pub mod staging;
pub mod state;
pub mod store;
pub mod tuning;
pub mod update;

// Re-export core types
pub use config::EstimatorConfig;
pub use driver::{Clock, CycleDriver, CycleReport, CycleStats, ManualClock, MonotonicClock};
pub use error::{ConfigError, FilterError};
pub use estimator::MsfStateEstimator;
pub use measurement::{BodyVelocity, Channel, Measurement, MeasurementSnapshot};
pub use output::{ChannelPublisher, EstimateOutput, EstimatePublisher, LogPublisher};
pub use quat_simp::QuatSimp;
pub use state::{EstimatedState, FilterState, StateCovariance};
pub use tuning::EkfTuning;
pub use update::UpdateStatus;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

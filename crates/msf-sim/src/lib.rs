//! MSF Simulation Library
//!
//! Provides planar robot truth simulation, sensor modeling and offline
//! replay of the estimator.

pub mod filter;
pub mod params;
pub mod sensor;
pub mod sim;

// Re-export main types
pub use filter::{
    compute_metrics, run_filter, run_filter_default, CycleCounters, FilterConfig, FilterMetrics,
    FilterResult,
};
pub use params::*;
pub use sensor::{generate_sensor_data, SensorConfig, SensorData, SensorSample};
pub use sim::{simulate_planar, RobotParams, SimResult};

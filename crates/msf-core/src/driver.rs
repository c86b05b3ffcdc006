//! Fixed-rate cycle driver.
//!
//! Runs on its own thread and is the only caller of predict/update. Each
//! tick predicts to "now", corrects with whatever is staged, and publishes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::FilterError;
use crate::estimator::MsfStateEstimator;
use crate::output::EstimatePublisher;
use crate::update::UpdateStatus;

/// Microsecond time source shared by the driver and the sensor producers.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall-clock microseconds since construction, plus `origin_us`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
    origin_us: u64,
}

impl MonotonicClock {
    /// Starts at 1 µs so that no timestamp equals the "uninitialized"
    /// sentinel.
    pub fn new() -> Self {
        Self::with_origin(1)
    }

    pub fn with_origin(origin_us: u64) -> Self {
        Self {
            start: Instant::now(),
            origin_us,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin_us + self.start.elapsed().as_micros() as u64
    }
}

/// Externally advanced clock for tests and offline replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(now_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(now_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Outcome of one predict/update cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub time_us: u64,
    pub predicted: bool,
    /// `None` when the update was skipped or failed.
    pub update: Option<UpdateStatus>,
    pub error: Option<FilterError>,
}

/// Counters accumulated over the life of the driver thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub corrections: u64,
    pub predict_failures: u64,
    pub update_failures: u64,
    pub missed_deadlines: u64,
}

impl CycleStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        if !report.predicted {
            self.predict_failures += 1;
        } else if report.error.is_some() {
            self.update_failures += 1;
        }
        if matches!(report.update, Some(UpdateStatus::Corrected { .. })) {
            self.corrections += 1;
        }
    }
}

/// One tick: predict to `time_us`, then update unless the prediction
/// failed. Failures are logged and reported, never propagated.
pub fn run_cycle(estimator: &MsfStateEstimator, time_us: u64) -> CycleReport {
    if let Err(err) = estimator.predict(time_us) {
        // Staged measurements stay pending for the next good cycle.
        warn!("predict failed, skipping update: {err}");
        return CycleReport {
            time_us,
            predicted: false,
            update: None,
            error: Some(err),
        };
    }

    match estimator.update() {
        Ok(status) => CycleReport {
            time_us,
            predicted: true,
            update: Some(status),
            error: None,
        },
        Err(err) => CycleReport {
            time_us,
            predicted: true,
            update: None,
            error: Some(err),
        },
    }
}

/// Handle to the cycle thread.
pub struct CycleDriver {
    handle: JoinHandle<CycleStats>,
}

impl CycleDriver {
    /// Spawn the `msf-cycle` thread. It ticks every `period` until
    /// `running` is cleared.
    pub fn spawn<C, P>(
        estimator: Arc<MsfStateEstimator>,
        period: Duration,
        clock: Arc<C>,
        mut publisher: P,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self>
    where
        C: Clock + ?Sized + 'static,
        P: EstimatePublisher + 'static,
    {
        let handle = thread::Builder::new()
            .name("msf-cycle".into())
            .spawn(move || {
                info!(period_ms = period.as_secs_f64() * 1e3, "cycle driver starting");
                let mut stats = CycleStats::default();
                let mut deadline = Instant::now();

                while running.load(Ordering::Relaxed) {
                    let report = run_cycle(&estimator, clock.now_us());
                    stats.record(&report);
                    debug!(?report, "cycle");
                    publisher.publish(&estimator.output());

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Overran: start a fresh schedule instead of bursting.
                        stats.missed_deadlines += 1;
                        deadline = now;
                    }
                }

                info!(
                    cycles = stats.cycles,
                    corrections = stats.corrections,
                    predict_failures = stats.predict_failures,
                    update_failures = stats.update_failures,
                    "cycle driver stopped"
                );
                stats
            })?;

        Ok(Self { handle })
    }

    /// Wait for the thread to finish and return its counters.
    pub fn join(self) -> thread::Result<CycleStats> {
        self.handle.join()
    }
}

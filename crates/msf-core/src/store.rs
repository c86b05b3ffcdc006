use parking_lot::{Mutex, MutexGuard};

use crate::state::{EstimatedState, FilterState, StateCovariance};

/// Estimated state and covariance behind the state lock.
///
/// Only the predictor and updater mutate it, always through [`lock`].
///
/// [`lock`]: StateStore::lock
#[derive(Debug)]
pub struct StateStore {
    inner: Mutex<FilterState>,
}

impl StateStore {
    pub fn new(initial: EstimatedState, covariance: StateCovariance) -> Self {
        Self {
            inner: Mutex::new(FilterState::new(initial, covariance)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, FilterState> {
        self.inner.lock()
    }

    /// Consistent copy of state, covariance and last prediction time.
    pub fn snapshot(&self) -> FilterState {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_snapshot_reflects_writes() {
        let store = StateStore::new(EstimatedState::new(), StateCovariance::identity());
        {
            let mut f = store.lock();
            f.state.position = Vector3::new(1.0, 0.0, 0.0);
            f.last_predict_us = 42;
        }
        let snap = store.snapshot();
        assert_eq!(snap.state.position.x, 1.0);
        assert_eq!(snap.last_predict_us, 42);
        assert_eq!(snap.covariance, StateCovariance::identity());
    }
}

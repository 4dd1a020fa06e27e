//! Clock drift estimation between the local and remote streams
//!
//! Keeps a circular window of per-drain imbalances (remote minus local sample
//! count) with a running sum and sum of squares, so mean and deviation cost
//! O(1) per observation. Output is suppressed until the window has been
//! completely refilled after construction or `reset()`.

/// Rolling estimator of the sample imbalance between two streams
#[derive(Debug, Clone)]
pub struct DriftEstimator {
    deltas: Vec<i64>,
    index: usize,
    sum: i64,
    sum2: i64,
    precision: i64,
    /// Observations left before estimates are trusted
    suppress: usize,
}

impl DriftEstimator {
    /// Create an estimator over `window` observations. Imbalances up to
    /// `precision` samples are treated as jitter.
    pub fn new(window: usize, precision: i64) -> Self {
        let window = window.max(1);
        Self {
            deltas: vec![0; window],
            index: 0,
            sum: 0,
            sum2: 0,
            precision,
            suppress: window,
        }
    }

    /// Record one observation of remote minus local sample count
    pub fn add(&mut self, delta: i64) {
        let old = self.deltas[self.index];
        self.sum += delta - old;
        self.sum2 += delta * delta - old * old;
        self.deltas[self.index] = delta;

        self.index += 1;
        if self.index >= self.deltas.len() {
            self.index = 0;
        }

        self.suppress = self.suppress.saturating_sub(1);
    }

    /// Correction in samples to apply, or 0 when there is no steady drift
    pub fn estimate(&self) -> i64 {
        if self.suppress > 0 {
            return 0;
        }

        let n = self.deltas.len() as f64;
        let sum = self.sum as f64;
        let mean = sum / n;
        let variance = ((self.sum2 as f64 - sum * sum / n) / n).max(0.0);
        let deviation = variance.sqrt();
        let precision = self.precision as f64;

        if mean.abs() > precision && deviation < precision {
            mean.round() as i64
        } else {
            0
        }
    }

    /// Re-arm suppression for a full window, typically after a correction
    pub fn reset(&mut self) {
        self.suppress = self.deltas.len();
    }

    /// Whether estimates are currently suppressed
    pub fn is_settling(&self) -> bool {
        self.suppress > 0
    }

    pub fn window(&self) -> usize {
        self.deltas.len()
    }

    pub fn precision(&self) -> i64 {
        self.precision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: usize = 50;
    const PRECISION: i64 = 320;

    #[test]
    fn test_suppressed_until_window_filled() {
        let mut sync = DriftEstimator::new(WINDOW, PRECISION);
        for _ in 0..WINDOW - 1 {
            sync.add(1000);
            assert_eq!(sync.estimate(), 0);
        }
        sync.add(1000);
        assert!(!sync.is_settling());
        assert_eq!(sync.estimate(), 1000);
    }

    #[test]
    fn test_reset_rearms_suppression() {
        let mut sync = DriftEstimator::new(WINDOW, PRECISION);
        for _ in 0..WINDOW {
            sync.add(-800);
        }
        assert_eq!(sync.estimate(), -800);

        sync.reset();
        assert!(sync.is_settling());
        for _ in 0..WINDOW - 1 {
            sync.add(-800);
            assert_eq!(sync.estimate(), 0);
        }
    }

    #[test]
    fn test_noisy_drift_is_ignored() {
        let mut sync = DriftEstimator::new(WINDOW, PRECISION);
        // mean 1000, deviation 1000
        for i in 0..WINDOW {
            sync.add(if i % 2 == 0 { 0 } else { 2000 });
        }
        assert_eq!(sync.estimate(), 0);
    }

    #[test]
    fn test_small_drift_is_ignored() {
        let mut sync = DriftEstimator::new(WINDOW, PRECISION);
        for _ in 0..WINDOW * 2 {
            sync.add(PRECISION);
        }
        assert_eq!(sync.estimate(), 0);
    }

    proptest! {
        #[test]
        fn prop_constant_drift_converges(k in prop_oneof![-5000i64..-321, 321i64..5000], extra in 0usize..100) {
            let mut sync = DriftEstimator::new(WINDOW, PRECISION);
            for _ in 0..WINDOW + extra {
                sync.add(k);
            }
            prop_assert_eq!(sync.estimate(), k);
        }

        #[test]
        fn prop_jitter_is_never_corrected(m in 0i64..=320, extra in 0usize..100) {
            let mut sync = DriftEstimator::new(WINDOW, PRECISION);
            for i in 0..WINDOW + extra {
                sync.add(if i % 2 == 0 { m } else { -m });
                prop_assert_eq!(sync.estimate(), 0);
            }
        }

        #[test]
        fn prop_reset_suppresses_any_values(values in proptest::collection::vec(-20000i64..20000, WINDOW - 1)) {
            let mut sync = DriftEstimator::new(WINDOW, PRECISION);
            for _ in 0..WINDOW {
                sync.add(5000);
            }
            sync.reset();
            for v in values {
                sync.add(v);
                prop_assert_eq!(sync.estimate(), 0);
            }
        }
    }
}

//! Round-trip-time estimation and retransmission-timeout derivation.
//!
//! MEAN = 7/8 * MEAN + 1/8 * sample
//! DEV  = 3/4 * DEV  + 1/4 * |MEAN - sample|
//! RTO  = MEAN + 2 * DEV, clamped to [100ms, 60s]
//!
//! Timeout-driven backoff doubles the RTO outside that clamp, saturating at
//! `Duration::MAX` rather than overflowing. All arithmetic is on
//! `std::time::Duration` (96-bit seconds + nanos internally), so the
//! smoothing terms themselves cannot overflow for any realistic sample.

use std::time::Duration;

/// Floor for a sample-derived RTO.
const MIN_RTO: Duration = Duration::from_millis(100);
/// Ceiling for a sample-derived RTO. Backoff may exceed this.
const MAX_RTO: Duration = Duration::from_secs(60);

/// Smoothed RTT estimator seeded from a caller-supplied initial estimate.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed mean RTT.
    mean: Duration,
    /// Smoothed mean deviation.
    deviation: Duration,
    /// Current retransmission timeout.
    rto: Duration,
    /// Whether a real sample has been folded in yet.
    has_sample: bool,
}

impl RttEstimator {
    /// Create an estimator seeded with `initial_rtt`. The seed stands in for
    /// the mean until the first measurement arrives; the deviation starts at
    /// half the seed.
    pub fn new(initial_rtt: Duration) -> Self {
        let mut est = Self {
            mean: initial_rtt,
            deviation: initial_rtt / 2,
            rto: Duration::ZERO,
            has_sample: false,
        };
        est.recompute_rto();
        est
    }

    /// Fold in a measured RTT sample.
    ///
    /// While `startup` is set and no real sample has been seen, the sample
    /// replaces the configured seed outright instead of being smoothed into
    /// it — the seed is a guess, not history.
    pub fn update(&mut self, sample: Duration, startup: bool) {
        if startup && !self.has_sample {
            self.mean = sample;
            self.deviation = sample / 2;
        } else {
            let diff = if sample >= self.mean {
                sample - self.mean
            } else {
                self.mean - sample
            };

            // DEV moves 1/4 of the way toward |error|.
            self.deviation = if diff >= self.deviation {
                self.deviation + (diff - self.deviation) / 4
            } else {
                self.deviation - (self.deviation - diff) / 4
            };

            // MEAN moves 1/8 of the way toward the sample.
            self.mean = if sample >= self.mean {
                self.mean + (sample - self.mean) / 8
            } else {
                self.mean - (self.mean - sample) / 8
            };
        }

        self.has_sample = true;
        self.recompute_rto();
    }

    /// Double the RTO after an unacknowledged retransmission timeout.
    ///
    /// Saturates at `Duration::MAX`; a later successful sample recomputes
    /// the RTO from the estimators and undoes the backoff.
    pub fn backoff(&mut self) {
        self.rto = self.rto.saturating_mul(2);
    }

    fn recompute_rto(&mut self) {
        self.rto = (self.mean + self.deviation.saturating_mul(2)).clamp(MIN_RTO, MAX_RTO);
    }

    /// Current smoothed mean RTT.
    pub fn mean(&self) -> Duration {
        self.mean
    }

    /// Current smoothed deviation.
    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }
}

//! Bulk delay tracking between the reference and the microphone.
//!
//! Recomputes a full cross-correlation against the reference history each
//! block and smooths the winning lag with an EMA. Cheap and robust for the
//! single-path acoustic echo this canceller models; a production system may
//! substitute GCC-PHAT behind the same contract.

use duplex_delay_line::DelayLine;

use crate::common::SILENCE_SUM_SQUARES;

/// Tracks the far-end → near-end bulk delay in samples.
#[derive(Debug, Clone)]
pub(crate) struct DelayEstimator {
    max_delay: usize,
    smoothing: f32,
    smoothed_lag: f32,
}

impl DelayEstimator {
    pub(crate) fn new(max_delay: usize, smoothing: f32) -> Self {
        Self {
            max_delay,
            smoothing,
            smoothed_lag: 0.0,
        }
    }

    /// Current smoothed estimate, rounded to whole samples.
    pub(crate) fn estimate(&self) -> usize {
        self.smoothed_lag.round() as usize
    }

    pub(crate) fn reset(&mut self) {
        self.smoothed_lag = 0.0;
    }

    /// Updates the estimate from one microphone block against the reference
    /// history, which must already contain the matching reference block.
    ///
    /// Near-silent input holds the previous estimate. O(N · max_delay).
    pub(crate) fn update(&mut self, mic: &[f32], history: &DelayLine) -> usize {
        let block = mic.len();
        debug_assert!(self.max_delay + block <= history.capacity());

        let mic_energy: f32 = mic.iter().map(|&s| s * s).sum();
        let mut ref_energy = 0.0f32;
        for age in 0..block {
            let s = history.read(age);
            ref_energy += s * s;
        }
        if mic_energy < SILENCE_SUM_SQUARES && ref_energy < SILENCE_SUM_SQUARES {
            return self.estimate();
        }

        // For lag k, mic[n] pairs with the reference sample written
        // k + (block - 1 - n) samples ago.
        let mut best_lag = 0usize;
        let mut best_score = 0.0f32;
        for lag in 0..=self.max_delay {
            let mut corr = 0.0f32;
            for (n, &m) in mic.iter().enumerate() {
                corr += m * history.read(lag + block - 1 - n);
            }
            let score = corr.abs() / block as f32;
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        // A flat correlation (reference history all zeros) carries no delay
        // information; hold the estimate.
        if best_score == 0.0 {
            return self.estimate();
        }

        self.smoothed_lag =
            (1.0 - self.smoothing) * self.smoothed_lag + self.smoothing * best_lag as f32;
        self.estimate()
    }
}

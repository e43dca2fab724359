//! Per-block and aggregated canceller metrics.

use crate::common::{ERLE_MAX_DB, ERLE_POWER_FLOOR};
use crate::double_talk_detector::DtState;

/// Metrics describing a single processed block.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMetrics {
    /// Echo return loss enhancement in dB, clamped to [0, 60].
    pub erle_db: f32,
    /// Whether the filter adapted during this block.
    pub adaptation_enabled: bool,
    /// Bulk delay estimate in samples.
    pub estimated_delay: usize,
    /// RMS of the microphone input (linear full scale).
    pub input_rms: f32,
    /// RMS of the cleaned output (linear full scale).
    pub output_rms: f32,
    /// Wall-clock cost of the block in microseconds. Always zero as
    /// returned by the canceller, which reads no clocks to stay
    /// deterministic; the stream layer stamps it around each call.
    pub processing_latency_us: u64,
    /// The mic/reference lengths disagreed with the configured block size;
    /// the output is silence.
    pub block_size_mismatch: bool,
    /// A NaN or infinity reached the canceller this block.
    pub non_finite_input: bool,
    /// The microphone was near full scale this block.
    pub saturated_input: bool,
}

/// Aggregated view of a session, cheap to copy into a metrics report.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Samples processed since construction or the last reset.
    pub processed_samples: u64,
    /// Mean ERLE across processed blocks, in dB.
    pub average_erle_db: f32,
    /// Current bulk delay estimate in samples.
    pub estimated_delay: usize,
    /// Current double-talk detector state.
    pub dt_state: DtState,
    /// Count of rate-limited non-finite input warnings.
    pub non_finite_warnings: u64,
    /// Count of blocks rejected for a size mismatch.
    pub size_mismatch_blocks: u64,
}

/// Accumulates per-block metrics into the session snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MetricsAggregator {
    processed_samples: u64,
    processed_blocks: u64,
    erle_sum: f64,
    non_finite_warnings: u64,
    size_mismatch_blocks: u64,
}

impl MetricsAggregator {
    pub(crate) fn record(&mut self, metrics: &BlockMetrics, block_size: usize, warned: bool) {
        if metrics.block_size_mismatch {
            self.size_mismatch_blocks += 1;
            return;
        }
        self.processed_samples += block_size as u64;
        self.processed_blocks += 1;
        self.erle_sum += f64::from(metrics.erle_db);
        if warned {
            self.non_finite_warnings += 1;
        }
    }

    pub(crate) fn processed_samples(&self) -> u64 {
        self.processed_samples
    }

    pub(crate) fn snapshot(&self, estimated_delay: usize, dt_state: DtState) -> MetricsSnapshot {
        let average_erle_db = if self.processed_blocks > 0 {
            (self.erle_sum / self.processed_blocks as f64) as f32
        } else {
            0.0
        };
        MetricsSnapshot {
            processed_samples: self.processed_samples,
            average_erle_db,
            estimated_delay,
            dt_state,
            non_finite_warnings: self.non_finite_warnings,
            size_mismatch_blocks: self.size_mismatch_blocks,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// ERLE in dB from input and residual mean powers, clamped to [0, 60].
pub(crate) fn erle_db(input_power: f32, output_power: f32) -> f32 {
    let ratio = input_power / output_power.max(ERLE_POWER_FLOOR);
    if ratio <= 1.0 {
        return 0.0;
    }
    (10.0 * ratio.log10()).clamp(0.0, ERLE_MAX_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erle_is_clamped() {
        assert_eq!(erle_db(0.0, 0.0), 0.0);
        assert_eq!(erle_db(1.0, 1.0), 0.0);
        // Residual below the floor pins at the clamp.
        assert_eq!(erle_db(1.0, 0.0), 60.0);
        // Residual louder than the input clamps at zero, not negative.
        assert_eq!(erle_db(0.5, 1.0), 0.0);
    }

    #[test]
    fn erle_of_20_db_attenuation() {
        let erle = erle_db(1.0, 0.01);
        assert!((erle - 20.0).abs() < 1e-4);
    }

    #[test]
    fn aggregator_averages_erle() {
        let mut agg = MetricsAggregator::default();
        let mut metrics = BlockMetrics::default();

        metrics.erle_db = 10.0;
        agg.record(&metrics, 128, false);
        metrics.erle_db = 30.0;
        agg.record(&metrics, 128, false);

        let snap = agg.snapshot(0, DtState::Idle);
        assert_eq!(snap.processed_samples, 256);
        assert!((snap.average_erle_db - 20.0).abs() < 1e-4);
    }

    #[test]
    fn mismatched_blocks_counted_separately() {
        let mut agg = MetricsAggregator::default();
        let metrics = BlockMetrics {
            block_size_mismatch: true,
            ..BlockMetrics::default()
        };
        agg.record(&metrics, 128, false);

        let snap = agg.snapshot(0, DtState::Idle);
        assert_eq!(snap.processed_samples, 0);
        assert_eq!(snap.size_mismatch_blocks, 1);
    }
}

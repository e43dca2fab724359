//! Block-level orchestration of the cancellation pipeline.
//!
//! Owns the reference history, delay estimator, adaptive filter, double-talk
//! detector and residual suppressor, and drives them in a fixed order for
//! each block. The processing path never aborts a block: recoverable faults
//! degrade to silence for the affected samples and are surfaced through the
//! block metrics.

use std::num::NonZero;

use derive_more::Debug;
use duplex_delay_line::DelayLine;

use crate::common::{SATURATION_AMPLITUDE, mean_power, rms};
use crate::config::{AecConfig, ConfigError, ConfigUpdate};
use crate::delay_estimator::DelayEstimator;
use crate::double_talk_detector::{DoubleTalkDetector, DtState};
use crate::metrics::{BlockMetrics, MetricsAggregator, MetricsSnapshot, erle_db};
use crate::nlms_filter::NlmsFilter;
use crate::residual_suppressor::ResidualSuppressor;

/// Streaming acoustic echo canceller for one capture session.
///
/// All buffers are allocated at construction; `process_block` is
/// allocation-free and runs to completion synchronously.
#[derive(Debug)]
pub struct EchoCanceller {
    config: AecConfig,
    delay_line: DelayLine,
    delay_estimator: DelayEstimator,
    filter: NlmsFilter,
    detector: DoubleTalkDetector,
    suppressor: ResidualSuppressor,

    /// Reference window aligned to the microphone, forward time order.
    #[debug(skip)]
    aligned_ref: Vec<f32>,
    #[debug(skip)]
    mic_scratch: Vec<f32>,
    #[debug(skip)]
    ref_scratch: Vec<f32>,

    aggregator: MetricsAggregator,
    last_warning_sample: Option<u64>,
}

impl EchoCanceller {
    /// Builds a canceller session from a validated configuration.
    pub fn new(config: AecConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let capacity = NonZero::new(config.delay_line_capacity())
            .expect("validated config implies a non-zero history capacity");

        Ok(Self {
            delay_line: DelayLine::new(capacity),
            delay_estimator: DelayEstimator::new(
                config.delay.max_delay_samples,
                config.delay.smoothing,
            ),
            filter: NlmsFilter::new(
                config.filter.length,
                config.filter.step_size,
                config.filter.leakage,
                config.filter.regularization,
            ),
            detector: DoubleTalkDetector::new(
                config.double_talk.window_size,
                config.double_talk.power_ratio_threshold,
                config.double_talk.correlation_threshold,
                config.double_talk.hangover_samples,
            ),
            suppressor: ResidualSuppressor::new(
                config.suppressor.gate_threshold,
                config.suppressor.attenuation,
            ),
            aligned_ref: vec![0.0; config.block_size],
            mic_scratch: vec![0.0; config.block_size],
            ref_scratch: vec![0.0; config.block_size],
            aggregator: MetricsAggregator::default(),
            last_warning_sample: None,
            config,
        })
    }

    pub fn config(&self) -> &AecConfig {
        &self.config
    }

    pub fn dt_state(&self) -> DtState {
        self.detector.state()
    }

    /// Current bulk delay estimate in samples.
    pub fn estimated_delay(&self) -> usize {
        self.delay_estimator.estimate()
    }

    /// Current filter taps, newest reference sample first.
    pub fn filter_taps(&self) -> &[f32] {
        self.filter.taps()
    }

    /// Processes one block: `clean = mic − estimated echo`, attenuated by
    /// the residual suppressor. Returns the metrics for this block.
    ///
    /// Length mismatches produce silence and a flagged metric rather than an
    /// error; non-finite input samples are zeroed in the output and disable
    /// adaptation for the block.
    pub fn process_block(
        &mut self,
        mic: &[f32],
        reference: &[f32],
        clean: &mut [f32],
    ) -> BlockMetrics {
        let block = self.config.block_size;

        if mic.len() != block || reference.len() != block || clean.len() != block {
            clean.fill(0.0);
            let metrics = BlockMetrics {
                block_size_mismatch: true,
                estimated_delay: self.delay_estimator.estimate(),
                ..BlockMetrics::default()
            };
            self.aggregator.record(&metrics, block, false);
            return metrics;
        }

        // Replace non-finite samples before they can reach the filter state.
        let mut non_finite = false;
        for ((&m, &r), (ms, rs)) in mic
            .iter()
            .zip(reference)
            .zip(self.mic_scratch.iter_mut().zip(self.ref_scratch.iter_mut()))
        {
            *ms = if m.is_finite() { m } else { 0.0 };
            *rs = if r.is_finite() { r } else { 0.0 };
            non_finite |= !m.is_finite() || !r.is_finite();
        }

        let saturated = self
            .mic_scratch
            .iter()
            .any(|&s| s.abs() >= SATURATION_AMPLITUDE);

        self.delay_line.write_block(&self.ref_scratch);
        let delay = self
            .delay_estimator
            .update(&self.mic_scratch, &self.delay_line);

        for (n, out) in self.aligned_ref.iter_mut().enumerate() {
            *out = self.delay_line.read(delay + block - 1 - n);
        }

        let detector_allows = self.detector.process(&self.mic_scratch, &self.aligned_ref);
        // A corrupted error signal would poison the update. Saturation is
        // handled per sample inside the filter, not by freezing the block.
        let adapt = detector_allows && !non_finite;

        self.filter
            .process_block(&self.mic_scratch, &self.delay_line, delay, adapt, clean);
        self.suppressor.process(clean, &self.aligned_ref);

        if non_finite {
            for ((&m, &r), out) in mic.iter().zip(reference).zip(clean.iter_mut()) {
                if !m.is_finite() || !r.is_finite() {
                    *out = 0.0;
                }
            }
        }

        let warned = non_finite && self.should_warn();

        let metrics = BlockMetrics {
            erle_db: erle_db(mean_power(&self.mic_scratch), mean_power(clean)),
            adaptation_enabled: adapt,
            estimated_delay: delay,
            input_rms: rms(&self.mic_scratch),
            output_rms: rms(clean),
            processing_latency_us: 0,
            block_size_mismatch: false,
            non_finite_input: non_finite,
            saturated_input: saturated,
        };
        self.aggregator.record(&metrics, block, warned);
        metrics
    }

    /// Clears all adaptive state; the next block starts from scratch.
    pub fn reset(&mut self) {
        self.delay_line.clear();
        self.delay_estimator.reset();
        self.filter.reset();
        self.detector.reset();
        self.aggregator.reset();
        self.last_warning_sample = None;
    }

    /// Applies a live configuration update. Returns `true` when every value
    /// was accepted as-is, `false` when something was clamped.
    pub fn apply_config(&mut self, update: &ConfigUpdate) -> bool {
        let ok = update.apply_to(&mut self.config);
        self.filter.set_params(
            self.config.filter.step_size,
            self.config.filter.leakage,
            self.config.filter.regularization,
        );
        self.detector.set_params(
            self.config.double_talk.power_ratio_threshold,
            self.config.double_talk.correlation_threshold,
            self.config.double_talk.hangover_samples,
        );
        ok
    }

    /// Aggregated metrics since construction or the last reset.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.aggregator
            .snapshot(self.delay_estimator.estimate(), self.detector.state())
    }

    /// Rate-limits non-finite input warnings to one per second.
    fn should_warn(&mut self) -> bool {
        let now = self.aggregator.processed_samples();
        let interval = self.config.sample_rate_hz as u64;
        match self.last_warning_sample {
            Some(last) if now.saturating_sub(last) < interval => false,
            _ => {
                self.last_warning_sample = Some(now);
                true
            }
        }
    }
}

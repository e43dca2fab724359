//! Canceller configuration.

use crate::common::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE, valid_block_size, valid_sample_rate};

/// Errors detected when validating an [`AecConfig`] at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The sample rate is not one of the supported discrete rates.
    UnsupportedSampleRate(usize),
    /// The block size is not one of 64, 128, 256 or 512 samples.
    UnsupportedBlockSize(usize),
    /// The adaptive filter must have at least one tap.
    ZeroFilterLength,
    /// The correlation window must hold at least one block.
    WindowTooShort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedSampleRate(rate) => write!(f, "unsupported sample rate {rate} Hz"),
            Self::UnsupportedBlockSize(size) => write!(f, "unsupported block size {size}"),
            Self::ZeroFilterLength => write!(f, "filter length must be non-zero"),
            Self::WindowTooShort => {
                write!(f, "correlation window must be at least one block long")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Adaptive filter parameters.
#[derive(Debug, Clone, Copy)]
pub struct Filter {
    /// Tap count; fixed for the lifetime of a session.
    pub length: usize,
    /// NLMS step size μ.
    pub step_size: f32,
    /// Denominator floor δ for the normalized step.
    pub regularization: f32,
    /// Per-update tap decay λ.
    pub leakage: f32,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            length: 512,
            step_size: 0.1,
            regularization: 1e-6,
            leakage: 0.999_99,
        }
    }
}

/// Double-talk detector parameters.
#[derive(Debug, Clone, Copy)]
pub struct DoubleTalk {
    /// Near/far power ratio that declares near-end activity (≈ 3 dB).
    pub power_ratio_threshold: f32,
    /// Correlation magnitude below which the streams count as decoupled.
    pub correlation_threshold: f32,
    /// Hold-off after double-talk clears, in samples.
    pub hangover_samples: usize,
    /// Correlation window length in samples.
    pub window_size: usize,
}

impl Default for DoubleTalk {
    fn default() -> Self {
        Self {
            power_ratio_threshold: 2.0,
            correlation_threshold: 0.6,
            hangover_samples: 2400,
            window_size: 512,
        }
    }
}

/// Delay estimator parameters.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    /// Upper bound on the tracked bulk delay, in samples.
    pub max_delay_samples: usize,
    /// EMA coefficient applied to new lag candidates.
    pub smoothing: f32,
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            max_delay_samples: 480,
            smoothing: 0.1,
        }
    }
}

/// Residual suppressor parameters.
#[derive(Debug, Clone, Copy)]
pub struct Suppressor {
    /// Reference amplitude above which the gain engages.
    pub gate_threshold: f32,
    /// Fraction of the sample removed while the gain is engaged.
    pub attenuation: f32,
}

impl Default for Suppressor {
    fn default() -> Self {
        Self {
            gate_threshold: 1e-3,
            attenuation: 0.1,
        }
    }
}

/// Full configuration for an echo canceller session.
///
/// `sample_rate_hz`, `block_size` and `filter.length` are immutable once a
/// session is constructed; the remaining scalars can be retuned live through
/// [`ConfigUpdate`].
#[derive(Debug, Clone, Copy)]
pub struct AecConfig {
    /// Operating sample rate; all time-valued defaults assume 48 kHz.
    pub sample_rate_hz: usize,
    /// Samples per processing block.
    pub block_size: usize,
    /// Cadence of pushed metric reports, in samples.
    pub metrics_interval_samples: usize,
    pub filter: Filter,
    pub double_talk: DoubleTalk,
    pub delay: Delay,
    pub suppressor: Suppressor,
}

impl Default for AecConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            metrics_interval_samples: 4800,
            filter: Filter::default(),
            double_talk: DoubleTalk::default(),
            delay: Delay::default(),
            suppressor: Suppressor::default(),
        }
    }
}

impl AecConfig {
    /// Validates the construction-time invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !valid_sample_rate(self.sample_rate_hz) {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate_hz));
        }
        if !valid_block_size(self.block_size) {
            return Err(ConfigError::UnsupportedBlockSize(self.block_size));
        }
        if self.filter.length == 0 {
            return Err(ConfigError::ZeroFilterLength);
        }
        if self.double_talk.window_size < self.block_size {
            return Err(ConfigError::WindowTooShort);
        }
        Ok(())
    }

    /// Minimum delay-line capacity for this configuration.
    ///
    /// The filter reads reference samples at ages up to
    /// `max_delay + (block_size - 1) + (filter_length - 1)`, so the history
    /// must retain the full sum (the delay line rounds this up to a power of
    /// two).
    pub fn delay_line_capacity(&self) -> usize {
        self.delay.max_delay_samples + self.block_size + self.filter.length
    }
}

fn limit_f32(value: &mut f32, min: f32, max: f32) -> bool {
    let clamped = value.clamp(min, max);
    let ok = clamped == *value;
    *value = clamped;
    ok
}

fn limit_usize(value: &mut usize, min: usize, max: usize) -> bool {
    let clamped = (*value).clamp(min, max);
    let ok = clamped == *value;
    *value = clamped;
    ok
}

/// Live-updatable subset of [`AecConfig`].
///
/// Fields left as `None` keep their current value. Applied values are
/// clamped to their legal ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigUpdate {
    pub step_size: Option<f32>,
    pub leakage: Option<f32>,
    pub regularization: Option<f32>,
    pub power_ratio_threshold: Option<f32>,
    pub correlation_threshold: Option<f32>,
    pub hangover_samples: Option<usize>,
}

impl ConfigUpdate {
    /// Applies the update to `config`, clamping each value to its legal
    /// range. Returns `true` if no clamping was needed.
    pub fn apply_to(&self, config: &mut AecConfig) -> bool {
        let mut ok = true;

        if let Some(mut step_size) = self.step_size {
            ok &= limit_f32(&mut step_size, 0.001, 1.0);
            config.filter.step_size = step_size;
        }
        if let Some(mut leakage) = self.leakage {
            ok &= limit_f32(&mut leakage, 0.9, 1.0);
            config.filter.leakage = leakage;
        }
        if let Some(mut regularization) = self.regularization {
            ok &= limit_f32(&mut regularization, 1e-12, 1.0);
            config.filter.regularization = regularization;
        }
        if let Some(mut power_ratio_threshold) = self.power_ratio_threshold {
            ok &= limit_f32(&mut power_ratio_threshold, 1.0, 100.0);
            config.double_talk.power_ratio_threshold = power_ratio_threshold;
        }
        if let Some(mut correlation_threshold) = self.correlation_threshold {
            ok &= limit_f32(&mut correlation_threshold, 0.0, 1.0);
            config.double_talk.correlation_threshold = correlation_threshold;
        }
        if let Some(mut hangover_samples) = self.hangover_samples {
            ok &= limit_usize(&mut hangover_samples, 0, 10 * config.sample_rate_hz);
            config.double_talk.hangover_samples = hangover_samples;
        }

        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AecConfig::default().validate().unwrap();
    }

    #[test]
    fn defaults_match_operating_point() {
        let config = AecConfig::default();
        assert_eq!(config.sample_rate_hz, 48_000);
        assert_eq!(config.block_size, 128);
        assert_eq!(config.metrics_interval_samples, 4800);
        assert_eq!(config.filter.length, 512);
        assert_eq!(config.filter.step_size, 0.1);
        assert_eq!(config.filter.regularization, 1e-6);
        assert_eq!(config.filter.leakage, 0.999_99);
        assert_eq!(config.double_talk.power_ratio_threshold, 2.0);
        assert_eq!(config.double_talk.correlation_threshold, 0.6);
        assert_eq!(config.double_talk.hangover_samples, 2400);
        assert_eq!(config.double_talk.window_size, 512);
        assert_eq!(config.delay.max_delay_samples, 480);
    }

    #[test]
    fn rejects_bad_rate_and_block_size() {
        let mut config = AecConfig::default();
        config.sample_rate_hz = 22_050;
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedSampleRate(22_050))
        );

        let mut config = AecConfig::default();
        config.block_size = 100;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedBlockSize(100)));
    }

    #[test]
    fn rejects_zero_filter_length() {
        let mut config = AecConfig::default();
        config.filter.length = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroFilterLength));
    }

    #[test]
    fn capacity_covers_worst_case_read() {
        let config = AecConfig::default();
        assert_eq!(config.delay_line_capacity(), 480 + 128 + 512);
    }

    #[test]
    fn update_applies_and_clamps() {
        let mut config = AecConfig::default();
        let update = ConfigUpdate {
            step_size: Some(0.2),
            correlation_threshold: Some(0.5),
            ..ConfigUpdate::default()
        };
        assert!(update.apply_to(&mut config));
        assert_eq!(config.filter.step_size, 0.2);
        assert_eq!(config.double_talk.correlation_threshold, 0.5);

        let update = ConfigUpdate {
            step_size: Some(5.0),
            ..ConfigUpdate::default()
        };
        assert!(!update.apply_to(&mut config));
        assert_eq!(config.filter.step_size, 1.0);
    }

    #[test]
    fn empty_update_is_identity() {
        let mut config = AecConfig::default();
        let before = config;
        assert!(ConfigUpdate::default().apply_to(&mut config));
        assert_eq!(config.filter.step_size, before.filter.step_size);
        assert_eq!(config.filter.leakage, before.filter.leakage);
    }
}

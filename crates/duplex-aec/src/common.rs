//! Shared constants and small helpers.

/// Default operating sample rate.
pub const DEFAULT_SAMPLE_RATE: usize = 48_000;

/// Default samples per processing block.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Far-end power above which the detector considers the reference active.
pub(crate) const FAR_ACTIVE_POWER: f32 = 1e-6;

/// Far-end power below which the detector considers the reference idle.
pub(crate) const FAR_IDLE_POWER: f32 = 1e-7;

/// Instantaneous reference power below which the filter update is gated off.
pub(crate) const ADAPTATION_POWER_GATE: f32 = 1e-6;

/// Sum-of-squares below which a block counts as silent for delay tracking.
pub(crate) const SILENCE_SUM_SQUARES: f32 = 1e-12;

/// Microphone amplitude treated as saturated (near full scale).
pub(crate) const SATURATION_AMPLITUDE: f32 = 0.998;

/// Denominator floor for the reported ERLE.
pub(crate) const ERLE_POWER_FLOOR: f32 = 1e-10;

/// Upper clamp for the reported ERLE in dB.
pub(crate) const ERLE_MAX_DB: f32 = 60.0;

/// Returns whether the given sample rate is supported.
pub const fn valid_sample_rate(sample_rate_hz: usize) -> bool {
    matches!(
        sample_rate_hz,
        8000 | 16000 | 24000 | 32000 | 44100 | 48000
    )
}

/// Returns whether the given block size is supported.
pub const fn valid_block_size(block_size: usize) -> bool {
    matches!(block_size, 64 | 128 | 256 | 512)
}

/// Mean power (mean of squares) of a block.
pub(crate) fn mean_power(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    block.iter().map(|&s| s * s).sum::<f32>() / block.len() as f32
}

/// Root-mean-square level of a block.
pub(crate) fn rms(block: &[f32]) -> f32 {
    mean_power(block).sqrt()
}

//! Leaky NLMS adaptive FIR identifier of the echo path.
//!
//! The filter does not own a reference buffer; it walks the shared delay
//! line directly in its inner loop, one tap per history read. Updates are
//! gated on the caller's adaptation decision and on instantaneous reference
//! activity, so a frozen filter keeps its taps bit-exact.

use derive_more::Debug;
use duplex_delay_line::DelayLine;

use crate::common::{ADAPTATION_POWER_GATE, SATURATION_AMPLITUDE};

/// Smoothing constant for the running reference power estimate.
const POWER_SMOOTHING: f32 = 0.05;

/// Initial (and post-reset) reference power seed.
const INITIAL_POWER: f32 = 1e-6;

/// Time-domain adaptive FIR filter with a leaky, power-normalized update.
#[derive(Debug, Clone)]
pub(crate) struct NlmsFilter {
    #[debug(skip)]
    taps: Vec<f32>,
    /// Smoothed instantaneous reference power.
    power: f32,
    step_size: f32,
    leakage: f32,
    regularization: f32,
}

impl NlmsFilter {
    pub(crate) fn new(length: usize, step_size: f32, leakage: f32, regularization: f32) -> Self {
        debug_assert!(length > 0);
        Self {
            taps: vec![0.0; length],
            power: INITIAL_POWER,
            step_size,
            leakage,
            regularization,
        }
    }

    pub(crate) fn taps(&self) -> &[f32] {
        &self.taps
    }

    /// Retunes the update scalars; tap count is fixed for the session.
    pub(crate) fn set_params(&mut self, step_size: f32, leakage: f32, regularization: f32) {
        self.step_size = step_size;
        self.leakage = leakage;
        self.regularization = regularization;
    }

    /// Zeroes the taps and reseeds the power estimate.
    pub(crate) fn reset(&mut self) {
        self.taps.fill(0.0);
        self.power = INITIAL_POWER;
    }

    /// Processes one block, writing the error signal e = mic − ŷ to `out`.
    ///
    /// `alignment` is the bulk delay in samples; for the sample at block
    /// index `n`, tap `i` reads the reference written
    /// `alignment + (N − 1 − n) + i` samples ago. The caller guarantees the
    /// history retains that span.
    ///
    /// When `adapt` is set and the newest aligned reference sample carries
    /// power, the taps take a leaky normalized update from the error. A
    /// microphone sample at full scale skips its own update (a clipped
    /// error would poison the taps) without holding back the rest of the
    /// block.
    pub(crate) fn process_block(
        &mut self,
        mic: &[f32],
        history: &DelayLine,
        alignment: usize,
        adapt: bool,
        out: &mut [f32],
    ) {
        debug_assert_eq!(mic.len(), out.len());
        let block = mic.len();
        let taps = self.taps.len();
        debug_assert!(alignment + block - 1 + taps - 1 < history.capacity());

        for n in 0..block {
            let base = alignment + (block - 1 - n);

            let mut estimate = 0.0f32;
            for (i, &w) in self.taps.iter().enumerate() {
                estimate += w * history.read(base + i);
            }

            let error = mic[n] - estimate;
            out[n] = error;

            let saturation = mic[n] >= SATURATION_AMPLITUDE || mic[n] <= -SATURATION_AMPLITUDE;
            let newest = history.read(base);
            let newest_power = newest * newest;
            if adapt && !saturation && newest_power > ADAPTATION_POWER_GATE {
                self.power = (1.0 - POWER_SMOOTHING) * self.power + POWER_SMOOTHING * newest_power;
                let reference_power = self.power * taps as f32 + self.regularization;
                let normalized_step = self.step_size / reference_power;
                for (i, w) in self.taps.iter_mut().enumerate() {
                    *w = self.leakage * *w + normalized_step * error * history.read(base + i);
                }
            }
        }
    }
}

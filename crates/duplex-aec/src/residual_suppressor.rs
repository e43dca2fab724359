//! Residual attenuation after linear cancellation.
//!
//! A deterministic per-sample gain: while the aligned reference is active,
//! the residual is scaled down by a fixed fraction. No lookahead and no
//! spectral processing, so no added latency; a heavier suppressor can be
//! substituted behind the same (samples, reference) interface.

/// Applies a constant attenuation while the reference carries signal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResidualSuppressor {
    gate_threshold: f32,
    attenuation: f32,
}

impl ResidualSuppressor {
    pub(crate) fn new(gate_threshold: f32, attenuation: f32) -> Self {
        Self {
            gate_threshold,
            attenuation,
        }
    }

    /// Attenuates `samples` in place wherever `aligned_ref` is active.
    pub(crate) fn process(&self, samples: &mut [f32], aligned_ref: &[f32]) {
        debug_assert_eq!(samples.len(), aligned_ref.len());
        let gain = 1.0 - self.attenuation;
        for (sample, &reference) in samples.iter_mut().zip(aligned_ref) {
            if reference.abs() > self.gate_threshold {
                *sample *= gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attenuates_only_while_reference_is_active() {
        let suppressor = ResidualSuppressor::new(1e-3, 0.1);
        let mut samples = [1.0f32, 1.0, 1.0, 1.0];
        let reference = [0.5f32, 0.0, -0.5, 1e-4];

        suppressor.process(&mut samples, &reference);
        assert_eq!(samples, [0.9, 1.0, 0.9, 1.0]);
    }

    #[test]
    fn silence_passes_through_unchanged() {
        let suppressor = ResidualSuppressor::new(1e-3, 0.1);
        let mut samples = [0.3f32, -0.7, 0.2];
        let original = samples;
        suppressor.process(&mut samples, &[0.0; 3]);
        assert_eq!(samples, original);
    }
}

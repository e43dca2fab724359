//! Double-talk detection gating the filter adaptation.
//!
//! Fuses a Geigel-style power ratio with a windowed Pearson correlation
//! between the microphone and the aligned reference, then runs a four-state
//! machine with a hangover so the filter stays frozen while near-end speech
//! tails off. The fusion errs on the side of freezing: a frozen filter
//! recovers faster than a diverged one.

use derive_more::Debug;

use crate::common::{FAR_ACTIVE_POWER, FAR_IDLE_POWER, mean_power};

/// Smoothing constant for the tracked powers.
const POWER_SMOOTHING: f32 = 0.95;

/// Denominator floor for the power ratio.
const EPSILON: f32 = 1e-10;

/// Per-sample window variance below which the correlation is undefined.
const WINDOW_VARIANCE_FLOOR: f32 = 1e-8;

/// Detector state, evaluated once per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DtState {
    /// No far-end activity.
    #[default]
    Idle,
    /// Far end active, near end quiet; adaptation allowed.
    SingleTalk,
    /// Both ends active; adaptation frozen.
    DoubleTalk,
    /// Double talk recently cleared; frozen until the hangover elapses.
    Hold,
}

/// Gates NLMS adaptation from per-block power and correlation statistics.
#[derive(Debug, Clone)]
pub(crate) struct DoubleTalkDetector {
    state: DtState,
    near_power: f32,
    far_power: f32,
    hangover: usize,

    power_ratio_threshold: f32,
    correlation_threshold: f32,
    hangover_samples: usize,

    #[debug(skip)]
    near_window: Vec<f32>,
    #[debug(skip)]
    far_window: Vec<f32>,
    window_pos: usize,
    window_filled: usize,
}

impl DoubleTalkDetector {
    pub(crate) fn new(
        window_size: usize,
        power_ratio_threshold: f32,
        correlation_threshold: f32,
        hangover_samples: usize,
    ) -> Self {
        debug_assert!(window_size > 0);
        Self {
            state: DtState::Idle,
            near_power: 0.0,
            far_power: 0.0,
            hangover: 0,
            power_ratio_threshold,
            correlation_threshold,
            hangover_samples,
            near_window: vec![0.0; window_size],
            far_window: vec![0.0; window_size],
            window_pos: 0,
            window_filled: 0,
        }
    }

    pub(crate) fn state(&self) -> DtState {
        self.state
    }

    /// Retunes the thresholds; window size is fixed for the session.
    pub(crate) fn set_params(
        &mut self,
        power_ratio_threshold: f32,
        correlation_threshold: f32,
        hangover_samples: usize,
    ) {
        self.power_ratio_threshold = power_ratio_threshold;
        self.correlation_threshold = correlation_threshold;
        self.hangover_samples = hangover_samples;
    }

    pub(crate) fn reset(&mut self) {
        self.state = DtState::Idle;
        self.near_power = 0.0;
        self.far_power = 0.0;
        self.hangover = 0;
        self.near_window.fill(0.0);
        self.far_window.fill(0.0);
        self.window_pos = 0;
        self.window_filled = 0;
    }

    /// Consumes one block and returns whether adaptation is allowed.
    pub(crate) fn process(&mut self, mic: &[f32], aligned_ref: &[f32]) -> bool {
        debug_assert_eq!(mic.len(), aligned_ref.len());

        self.push_window(mic, aligned_ref);

        let a = POWER_SMOOTHING;
        self.near_power = a * self.near_power + (1.0 - a) * mean_power(mic);
        self.far_power = a * self.far_power + (1.0 - a) * mean_power(aligned_ref);

        let power_test = self.near_power / (self.far_power + EPSILON) > self.power_ratio_threshold;
        // The correlation carries no information without far-end energy;
        // left unguarded it would read digital silence as decoupled streams.
        let correlation_test = self.far_power > FAR_ACTIVE_POWER
            && self
                .window_correlation()
                .is_some_and(|c| c.abs() < self.correlation_threshold);
        let dt = power_test || correlation_test;

        self.step_state(dt, mic.len());
        !matches!(self.state, DtState::DoubleTalk | DtState::Hold)
    }

    fn step_state(&mut self, dt: bool, block_size: usize) {
        match self.state {
            DtState::Idle => {
                if self.far_power > FAR_ACTIVE_POWER {
                    if dt {
                        self.state = DtState::DoubleTalk;
                        self.hangover = self.hangover_samples;
                    } else {
                        self.state = DtState::SingleTalk;
                    }
                }
            }
            DtState::SingleTalk => {
                if self.far_power < FAR_IDLE_POWER {
                    self.state = DtState::Idle;
                } else if dt {
                    self.state = DtState::DoubleTalk;
                    self.hangover = self.hangover_samples;
                }
            }
            DtState::DoubleTalk => {
                if !dt {
                    self.state = DtState::Hold;
                    self.hangover = self.hangover_samples;
                }
            }
            DtState::Hold => {
                if dt {
                    self.state = DtState::DoubleTalk;
                    self.hangover = self.hangover_samples;
                } else {
                    self.hangover = self.hangover.saturating_sub(block_size);
                    if self.hangover == 0 {
                        self.state = if self.far_power > FAR_IDLE_POWER {
                            DtState::SingleTalk
                        } else {
                            DtState::Idle
                        };
                    }
                }
            }
        }
    }

    fn push_window(&mut self, mic: &[f32], aligned_ref: &[f32]) {
        let len = self.near_window.len();
        for (&m, &r) in mic.iter().zip(aligned_ref) {
            self.near_window[self.window_pos] = m;
            self.far_window[self.window_pos] = r;
            self.window_pos = (self.window_pos + 1) % len;
        }
        self.window_filled = (self.window_filled + mic.len()).min(len);
    }

    /// Zero-mean normalized cross-correlation over the windowed history.
    ///
    /// Returns `None` while either window is too quiet to carry a
    /// meaningful correlation (empty, or variance under the floor).
    fn window_correlation(&self) -> Option<f32> {
        let count = self.window_filled;
        if count == 0 {
            return None;
        }
        let near = &self.near_window[..count];
        let far = &self.far_window[..count];

        let near_mean = near.iter().sum::<f32>() / count as f32;
        let far_mean = far.iter().sum::<f32>() / count as f32;

        let mut cross = 0.0f32;
        let mut near_var = 0.0f32;
        let mut far_var = 0.0f32;
        for (&m, &r) in near.iter().zip(far) {
            let dm = m - near_mean;
            let dr = r - far_mean;
            cross += dm * dr;
            near_var += dm * dm;
            far_var += dr * dr;
        }

        let floor = WINDOW_VARIANCE_FLOOR * count as f32;
        if near_var < floor || far_var < floor {
            return None;
        }
        Some(cross / (near_var.sqrt() * far_var.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 128;
    const HANGOVER: usize = 2400;

    fn detector() -> DoubleTalkDetector {
        DoubleTalkDetector::new(512, 2.0, 0.6, HANGOVER)
    }

    struct Noise(u64);

    impl Noise {
        fn next(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
        }

        fn block(&mut self) -> Vec<f32> {
            (0..BLOCK).map(|_| self.next()).collect()
        }
    }

    /// Runs blocks where the microphone is a scaled copy of the reference
    /// (echo only, fully correlated).
    fn run_echo_only(dtd: &mut DoubleTalkDetector, noise: &mut Noise, blocks: usize) -> bool {
        let mut adapt = false;
        for _ in 0..blocks {
            let reference = noise.block();
            let mic: Vec<f32> = reference.iter().map(|&r| 0.5 * r).collect();
            adapt = dtd.process(&mic, &reference);
        }
        adapt
    }

    #[test]
    fn starts_idle_and_stays_idle_in_silence() {
        let mut dtd = detector();
        let zeros = [0.0f32; BLOCK];
        for _ in 0..50 {
            assert!(dtd.process(&zeros, &zeros));
            assert_eq!(dtd.state(), DtState::Idle);
        }
    }

    #[test]
    fn pure_near_end_stays_idle() {
        let mut dtd = detector();
        let mut noise = Noise(1);
        let zeros = [0.0f32; BLOCK];
        for _ in 0..50 {
            let mic = noise.block();
            let adapt = dtd.process(&mic, &zeros);
            assert_eq!(dtd.state(), DtState::Idle);
            assert!(adapt);
        }
    }

    #[test]
    fn echo_only_reaches_single_talk() {
        let mut dtd = detector();
        let mut noise = Noise(2);
        let adapt = run_echo_only(&mut dtd, &mut noise, 50);
        assert_eq!(dtd.state(), DtState::SingleTalk);
        assert!(adapt);
    }

    #[test]
    fn loud_near_end_freezes_adaptation() {
        let mut dtd = detector();
        let mut noise = Noise(3);
        run_echo_only(&mut dtd, &mut noise, 50);

        // The smoothed powers and the correlation window need a few blocks
        // to catch up with the burst; require a freeze from block 4 on.
        let mut near = Noise(4);
        for block in 0..20 {
            let reference = noise.block();
            let mic: Vec<f32> = reference
                .iter()
                .map(|&r| 0.5 * r + 2.0 * near.next())
                .collect();
            let adapt = dtd.process(&mic, &reference);
            if block >= 4 {
                assert!(!adapt, "adaptation still allowed at block {block}");
            }
        }
        assert_eq!(dtd.state(), DtState::DoubleTalk);
    }

    #[test]
    fn hangover_spans_the_configured_samples() {
        let mut dtd = detector();
        let mut noise = Noise(5);
        run_echo_only(&mut dtd, &mut noise, 50);

        // Enter double talk.
        let mut near = Noise(6);
        for _ in 0..20 {
            let reference = noise.block();
            let mic: Vec<f32> = reference
                .iter()
                .map(|&r| 0.5 * r + 2.0 * near.next())
                .collect();
            dtd.process(&mic, &reference);
        }
        assert_eq!(dtd.state(), DtState::DoubleTalk);

        // Near end stops; the detector holds for the hangover, then
        // releases. The correlation window still carries near-end samples
        // for a few blocks, so allow those as continued double talk.
        let mut hold_blocks = 0usize;
        let mut state = dtd.state();
        for _ in 0..100 {
            let reference = noise.block();
            let mic: Vec<f32> = reference.iter().map(|&r| 0.5 * r).collect();
            dtd.process(&mic, &reference);
            state = dtd.state();
            match state {
                DtState::Hold => hold_blocks += 1,
                DtState::SingleTalk => break,
                _ => {}
            }
        }
        assert_eq!(state, DtState::SingleTalk);

        let expected = HANGOVER.div_ceil(BLOCK);
        assert!(
            hold_blocks.abs_diff(expected) <= 1,
            "held for {hold_blocks} blocks, expected ≈{expected}"
        );
    }

    #[test]
    fn far_end_fade_returns_to_idle() {
        let mut dtd = detector();
        let mut noise = Noise(7);
        run_echo_only(&mut dtd, &mut noise, 50);
        assert_eq!(dtd.state(), DtState::SingleTalk);

        // The smoothed far power decays by 0.95 per block and must cross
        // the idle threshold; give it ample time.
        let zeros = [0.0f32; BLOCK];
        for _ in 0..400 {
            dtd.process(&zeros, &zeros);
        }
        assert_eq!(dtd.state(), DtState::Idle);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut dtd = detector();
        let mut noise = Noise(8);
        run_echo_only(&mut dtd, &mut noise, 50);
        dtd.reset();
        assert_eq!(dtd.state(), DtState::Idle);
    }
}

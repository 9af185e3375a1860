//! Trigger-driven gain-reduction envelope
//!
//! Converts discrete note-on triggers into a continuous ducking curve:
//! optional pre-delay, shaped attack up to full depth, hold, shaped release.
//! The per-sample target is smoothed by a one-pole lowpass and mapped to a
//! gain multiplier in [0, 1].

/// Envelope smoothing coefficient ceiling, keeps the one-pole moving
const MAX_SMOOTHING: f32 = 0.995;
const MIN_CURVE_SHAPE: f32 = 0.1;
const MAX_CURVE_SHAPE: f32 = 10.0;

/// Envelope settings in user units (dB / ms)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParams {
    /// Positive attenuation amount in dB
    pub depth_db: f32,
    pub delay_ms: f32,
    pub attack_ms: f32,
    pub hold_ms: f32,
    pub release_ms: f32,
    /// Exponent applied to the attack/release progress, 0.1 - 10.0
    pub curve_shape: f32,
    /// One-pole coefficient, 0 = no smoothing
    pub smoothing: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            depth_db: 12.0,
            delay_ms: 0.0,
            attack_ms: 20.0,
            hold_ms: 30.0,
            release_ms: 180.0,
            curve_shape: 1.0,
            smoothing: 0.2,
        }
    }
}

impl EnvelopeParams {
    /// Clamp every field into its documented range
    pub fn clamped(self) -> Self {
        Self {
            depth_db: clamp_finite(self.depth_db, 0.0, 60.0),
            delay_ms: clamp_finite(self.delay_ms, 0.0, 200.0),
            attack_ms: clamp_finite(self.attack_ms, 0.0, 2000.0),
            hold_ms: clamp_finite(self.hold_ms, 0.0, 2000.0),
            release_ms: clamp_finite(self.release_ms, 1.0, 5000.0),
            curve_shape: clamp_finite(self.curve_shape, MIN_CURVE_SHAPE, MAX_CURVE_SHAPE),
            smoothing: clamp_finite(self.smoothing, 0.0, 1.0),
        }
    }
}

/// NaN falls to the lower bound
fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Delay,
    Attack,
    Hold,
    Release,
}

/// Per-band envelope state machine
///
/// `process_sample()` must be called exactly once per sample.
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    sample_rate: f64,
    params: EnvelopeParams,

    delay_samples: usize,
    attack_samples: usize,
    hold_samples: usize,
    release_samples: usize,

    depth_gain: f32,
    smoothing_coefficient: f32,

    stage: Stage,
    stage_position: usize,

    attack_start: f32,
    release_start: f32,

    target: f32,
    smoothed: f32,
}

impl Default for EnvelopeFollower {
    fn default() -> Self {
        let mut envelope = Self {
            sample_rate: 44100.0,
            params: EnvelopeParams::default(),
            delay_samples: 0,
            attack_samples: 1,
            hold_samples: 0,
            release_samples: 1,
            depth_gain: 1.0,
            smoothing_coefficient: 0.2,
            stage: Stage::Idle,
            stage_position: 0,
            attack_start: 0.0,
            release_start: 1.0,
            target: 0.0,
            smoothed: 0.0,
        };
        envelope.set_parameters(EnvelopeParams::default());
        envelope
    }
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f64) -> Self {
        let mut envelope = Self::default();
        envelope.prepare(sample_rate);
        envelope
    }

    /// Set the sample rate, recompute stage lengths and reset the state
    pub fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate.max(1.0);
        self.set_parameters(self.params);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.stage_position = 0;
        self.attack_start = 0.0;
        self.release_start = 1.0;
        self.target = 0.0;
        self.smoothed = 0.0;
    }

    /// Clamp and apply new parameters
    ///
    /// Takes effect immediately, including for a stage already in progress.
    pub fn set_parameters(&mut self, params: EnvelopeParams) {
        let params = params.clamped();
        self.params = params;

        self.delay_samples = self.ms_to_samples(params.delay_ms);
        self.attack_samples = self.ms_to_samples(params.attack_ms).max(1);
        self.hold_samples = self.ms_to_samples(params.hold_ms);
        self.release_samples = self.ms_to_samples(params.release_ms).max(1);

        self.depth_gain = 10.0_f32.powf(-params.depth_db / 20.0);
        self.smoothing_coefficient = params.smoothing.min(MAX_SMOOTHING);
    }

    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Smoothed envelope value, 0 = no reduction, 1 = full depth
    pub fn envelope(&self) -> f32 {
        self.smoothed
    }

    /// Linear gain at full depth
    pub fn depth_gain(&self) -> f32 {
        self.depth_gain
    }

    /// Restart the envelope from the current smoothed value
    pub fn note_triggered(&mut self) {
        self.attack_start = self.smoothed;
        self.stage_position = 0;
        self.stage = if self.delay_samples > 0 {
            Stage::Delay
        } else {
            Stage::Attack
        };
    }

    /// Advance one sample and return the gain multiplier
    ///
    /// # Real-time Safety
    /// No allocations, O(1).
    #[inline]
    pub fn process_sample(&mut self, trigger_now: bool) -> f32 {
        if trigger_now {
            self.note_triggered();
        }

        self.target = self.next_target();
        self.smoothed += (self.target - self.smoothed) * (1.0 - self.smoothing_coefficient);

        (1.0 - self.smoothed * (1.0 - self.depth_gain)).clamp(0.0, 1.0)
    }

    fn ms_to_samples(&self, ms: f32) -> usize {
        (f64::from(ms) * 0.001 * self.sample_rate).round() as usize
    }

    /// Target for the current sample; stage changes apply from the next one
    fn next_target(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => 0.0,

            Stage::Delay => {
                let value = self.attack_start;
                self.stage_position += 1;
                if self.stage_position >= self.delay_samples {
                    self.enter(Stage::Attack);
                }
                value
            }

            Stage::Attack => {
                let span = self.attack_samples.saturating_sub(1).max(1) as f32;
                let progress = if self.attack_samples <= 1 {
                    1.0
                } else {
                    (self.stage_position as f32 / span).clamp(0.0, 1.0)
                };
                let shaped = progress.powf(self.params.curve_shape);
                let value = self.attack_start + (1.0 - self.attack_start) * shaped;

                self.stage_position += 1;
                if self.stage_position >= self.attack_samples {
                    self.enter_hold();
                    return 1.0;
                }
                value
            }

            Stage::Hold => {
                self.stage_position += 1;
                if self.stage_position >= self.hold_samples {
                    self.enter_release(1.0);
                }
                1.0
            }

            Stage::Release => {
                let span = self.release_samples.saturating_sub(1).max(1) as f32;
                let progress = (self.stage_position as f32 / span).clamp(0.0, 1.0);
                let value = self.release_start * (1.0 - progress).powf(self.params.curve_shape);

                self.stage_position += 1;
                if self.stage_position >= self.release_samples {
                    self.enter(Stage::Idle);
                }
                value
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.stage_position = 0;
    }

    fn enter_hold(&mut self) {
        if self.hold_samples == 0 {
            self.enter_release(1.0);
        } else {
            self.enter(Stage::Hold);
        }
    }

    fn enter_release(&mut self, from: f32) {
        self.release_start = from.clamp(0.0, 1.0);
        if self.release_samples <= 1 {
            self.enter(Stage::Idle);
        } else {
            self.enter(Stage::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_with(sample_rate: f64, params: EnvelopeParams) -> EnvelopeFollower {
        let mut env = EnvelopeFollower::new(sample_rate);
        env.set_parameters(params);
        env
    }

    fn db_to_gain(db: f32) -> f32 {
        10.0_f32.powf(db / 20.0)
    }

    #[test]
    fn test_idle_is_unity() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 24.0,
            ..Default::default()
        });
        for _ in 0..1000 {
            assert_eq!(env.process_sample(false), 1.0);
        }
        assert_eq!(env.stage(), Stage::Idle);
    }

    #[test]
    fn test_parameters_clamped() {
        let env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 100.0,
            delay_ms: -5.0,
            attack_ms: 9000.0,
            hold_ms: f32::NAN,
            release_ms: 0.0,
            curve_shape: 50.0,
            smoothing: 2.0,
        });
        let p = env.params();
        assert_eq!(p.depth_db, 60.0);
        assert_eq!(p.delay_ms, 0.0);
        assert_eq!(p.attack_ms, 2000.0);
        assert_eq!(p.hold_ms, 0.0);
        assert_eq!(p.release_ms, 1.0);
        assert_eq!(p.curve_shape, 10.0);
        assert_eq!(p.smoothing, 1.0);
    }

    #[test]
    fn test_minimal_envelope_is_one_sample_duck() {
        // 1 kHz makes the 1 ms release floor a single sample
        let depth_db = 12.0;
        let mut env = envelope_with(1000.0, EnvelopeParams {
            depth_db,
            delay_ms: 0.0,
            attack_ms: 0.0,
            hold_ms: 0.0,
            release_ms: 0.0,
            curve_shape: 1.0,
            smoothing: 0.0,
        });

        let gain = env.process_sample(true);
        assert!((gain - db_to_gain(-depth_db)).abs() < 1e-6, "gain was {gain}");

        let gain = env.process_sample(false);
        assert_eq!(gain, 1.0);
        assert_eq!(env.stage(), Stage::Idle);
    }

    #[test]
    fn test_zero_depth_never_ducks() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 0.0,
            attack_ms: 5.0,
            hold_ms: 5.0,
            release_ms: 5.0,
            ..Default::default()
        });

        for i in 0..2000 {
            let gain = env.process_sample(i % 300 == 0);
            assert_eq!(gain, 1.0);
        }
    }

    #[test]
    fn test_stage_sequence() {
        // 1 kHz: every millisecond is one sample
        let mut env = envelope_with(1000.0, EnvelopeParams {
            depth_db: 20.0,
            delay_ms: 2.0,
            attack_ms: 3.0,
            hold_ms: 2.0,
            release_ms: 4.0,
            curve_shape: 1.0,
            smoothing: 0.0,
        });

        let mut stages = Vec::new();
        let mut targets = Vec::new();
        for i in 0..12 {
            env.process_sample(i == 0);
            stages.push(env.stage());
            targets.push(env.envelope());
        }

        // Values: delay holds 0, attack 0 -> 0.5 -> 1, hold 1, 1, release 1 -> 0
        let expected = [0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0, 2.0 / 3.0, 1.0 / 3.0, 0.0, 0.0];
        for (got, want) in targets.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-5, "targets {targets:?}");
        }
        assert_eq!(stages[0], Stage::Delay);
        assert_eq!(stages[1], Stage::Attack);
        assert_eq!(*stages.last().unwrap(), Stage::Idle);
    }

    #[test]
    fn test_full_depth_reached_during_hold() {
        let depth_db = 18.0;
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db,
            attack_ms: 1.0,
            hold_ms: 50.0,
            release_ms: 50.0,
            smoothing: 0.0,
            ..Default::default()
        });

        env.process_sample(true);
        let mut gain = 1.0;
        for _ in 0..(48 * 10) {
            gain = env.process_sample(false);
        }
        assert_eq!(env.stage(), Stage::Hold);
        assert!((gain - db_to_gain(-depth_db)).abs() < 1e-5);
    }

    #[test]
    fn test_gain_stays_in_unit_range() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 60.0,
            attack_ms: 2.0,
            hold_ms: 1.0,
            release_ms: 20.0,
            curve_shape: 0.1,
            smoothing: 0.9,
            ..Default::default()
        });

        for i in 0..10_000 {
            let gain = env.process_sample(i % 777 == 0);
            assert!((0.0..=1.0).contains(&gain), "gain out of range: {gain}");
        }
    }

    #[test]
    fn test_retrigger_in_release_is_continuous() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 24.0,
            attack_ms: 10.0,
            hold_ms: 5.0,
            release_ms: 100.0,
            curve_shape: 2.0,
            smoothing: 0.5,
            ..Default::default()
        });

        env.process_sample(true);
        // attack + hold + part of release
        for _ in 0..(48 * 40) {
            env.process_sample(false);
        }
        assert_eq!(env.stage(), Stage::Release);

        let mut previous = env.envelope();
        for i in 0..(48 * 20) {
            env.process_sample(i == 0);
            let current = env.envelope();
            // attack over 480 samples moves the target by at most ~1/479 per sample
            assert!(
                (current - previous).abs() < 0.01,
                "jump from {previous} to {current} at sample {i}"
            );
            previous = current;
        }
    }

    #[test]
    fn test_retrigger_carries_smoothed_value() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 24.0,
            attack_ms: 1.0,
            hold_ms: 0.0,
            release_ms: 200.0,
            smoothing: 0.0,
            ..Default::default()
        });

        env.process_sample(true);
        for _ in 0..(48 * 50) {
            env.process_sample(false);
        }
        let before = env.envelope();
        assert!(before > 0.1 && before < 1.0);

        env.note_triggered();
        assert_eq!(env.stage(), Stage::Attack);
        env.process_sample(false);
        // first attack sample starts exactly where the release left off
        assert!((env.envelope() - before).abs() < 1e-6);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut env = envelope_with(48000.0, EnvelopeParams {
            depth_db: 12.0,
            ..Default::default()
        });
        env.process_sample(true);
        for _ in 0..100 {
            env.process_sample(false);
        }
        env.reset();
        assert_eq!(env.stage(), Stage::Idle);
        assert_eq!(env.envelope(), 0.0);
        assert_eq!(env.process_sample(false), 1.0);
    }
}

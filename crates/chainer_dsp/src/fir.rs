//! Linear-phase FIR lowpass and matching delay line
//!
//! Filters are symmetric windowed-sinc designs, so every band produced from
//! them is delayed by the same `(taps - 1) / 2` samples. The delay
//! compensator applies that same delay to the dry signal.

use std::f64::consts::PI;

use crate::buffer::ChannelBuffer;

pub const MIN_TAP_COUNT: usize = 63;
pub const DEFAULT_TAP_COUNT: usize = 1025;

/// Lowest cutoff the designer will produce
pub const MIN_CUTOFF_HZ: f32 = 20.0;

/// Round a requested tap count up to an odd value of at least 63
pub fn valid_tap_count(requested: usize) -> usize {
    let taps = requested.max(MIN_TAP_COUNT);
    if taps % 2 == 0 {
        taps + 1
    } else {
        taps
    }
}

/// Design a DC-normalised windowed-sinc lowpass into `taps`
///
/// The cutoff is clamped to [20 Hz, 0.49 * sample_rate]. Uses a 4-term
/// Blackman-Harris window. Computed in f64.
pub fn design_windowed_sinc_lowpass(taps: &mut [f32], cutoff_hz: f32, sample_rate: f64) {
    if taps.is_empty() {
        return;
    }
    if taps.len() == 1 {
        taps[0] = 1.0;
        return;
    }

    let m = (taps.len() - 1) as f64;
    let nyquist_limited = (sample_rate * 0.49) as f32;
    let cutoff = if cutoff_hz.is_nan() {
        MIN_CUTOFF_HZ
    } else {
        cutoff_hz.clamp(MIN_CUTOFF_HZ, nyquist_limited.max(MIN_CUTOFF_HZ))
    };
    let fc = f64::from(cutoff) / sample_rate;

    let mut sum = 0.0_f64;
    for (n, tap) in taps.iter_mut().enumerate() {
        let centered = n as f64 - m * 0.5;
        let x = 2.0 * fc * centered;
        let sinc = if x.abs() > 1.0e-12 {
            (PI * x).sin() / (PI * x)
        } else {
            1.0
        };
        let ideal = 2.0 * fc * sinc;

        let phase = 2.0 * PI * n as f64 / m;
        let window = 0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
            - 0.01168 * (3.0 * phase).cos();

        let value = ideal * window;
        *tap = value as f32;
        sum += value;
    }

    if sum == 0.0 {
        return;
    }

    let scale = (1.0 / sum) as f32;
    for tap in taps.iter_mut() {
        *tap *= scale;
    }
}

/// Symmetric FIR filter with per-channel circular history
#[derive(Debug, Clone, Default)]
pub struct FirLowpass {
    tap_count: usize,
    half_tap_count: usize,
    history: ChannelBuffer,
    write_indices: Vec<usize>,
    coefficients: Vec<f32>,
}

impl FirLowpass {
    /// Allocate history for `num_channels` and load a pure-delay impulse
    ///
    /// Note: This allocates. Only call during setup, not in audio callback.
    pub fn prepare(&mut self, num_channels: usize, tap_count: usize) {
        let num_channels = num_channels.max(1);
        self.tap_count = tap_count.max(1);
        self.half_tap_count = (self.tap_count - 1) / 2;

        self.history.set_size(num_channels, self.tap_count);
        self.write_indices = vec![0; num_channels];
        self.coefficients = vec![0.0; self.tap_count];
        self.coefficients[self.half_tap_count] = 1.0;
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.write_indices.fill(0);
    }

    pub fn tap_count(&self) -> usize {
        self.tap_count
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// Copy new taps in place; a slice of the wrong length is ignored
    #[inline]
    pub fn set_coefficients(&mut self, coefficients: &[f32]) {
        if coefficients.len() == self.tap_count {
            self.coefficients.copy_from_slice(coefficients);
        }
    }

    /// Filter `num_samples` of every channel from `input` into `output`
    ///
    /// Channels beyond what this filter or `input` holds are zeroed in
    /// `output`.
    ///
    /// # Real-time Safety
    /// No allocations. O(n * taps / 2).
    pub fn process(&mut self, input: &ChannelBuffer, output: &mut ChannelBuffer, num_samples: usize) {
        let tap_count = self.tap_count;
        let half = self.half_tap_count;
        let channels = self
            .write_indices
            .len()
            .min(input.num_channels())
            .min(output.num_channels());

        let coefficients = &self.coefficients;

        for channel in 0..channels {
            let input = &input.channel(channel)[..num_samples];
            let output = &mut output.channel_mut(channel)[..num_samples];
            let history = self.history.channel_mut(channel);
            let mut write_index = self.write_indices[channel];

            for (out, &sample) in output.iter_mut().zip(input) {
                history[write_index] = sample;

                let centre = if write_index >= half {
                    write_index - half
                } else {
                    write_index + tap_count - half
                };
                let mut acc = coefficients[half] * history[centre];

                // tap k pairs the sample k steps back with the one k steps
                // from the oldest end; both indices wrap by compare, not modulo
                let mut newer = write_index;
                let mut older = if write_index + 1 == tap_count { 0 } else { write_index + 1 };
                for &coefficient in &coefficients[..half] {
                    acc += coefficient * (history[newer] + history[older]);

                    newer = if newer == 0 { tap_count - 1 } else { newer - 1 };
                    older += 1;
                    if older == tap_count {
                        older = 0;
                    }
                }

                *out = acc;

                write_index += 1;
                if write_index >= tap_count {
                    write_index = 0;
                }
            }

            self.write_indices[channel] = write_index;
        }

        for channel in channels..output.num_channels() {
            output.clear_channel(channel, num_samples);
        }
    }
}

/// Integer-sample delay line aligning the dry path with the FIR group delay
#[derive(Debug, Clone, Default)]
pub struct DelayCompensator {
    delay_samples: usize,
    buffer_len: usize,
    buffer: ChannelBuffer,
    write_indices: Vec<usize>,
}

impl DelayCompensator {
    /// Note: This allocates. Only call during setup, not in audio callback.
    pub fn prepare(&mut self, num_channels: usize, delay_samples: usize, max_block_size: usize) {
        let num_channels = num_channels.max(1);
        self.delay_samples = delay_samples;
        self.buffer_len = (delay_samples + max_block_size + 1).max(delay_samples + 2);

        self.buffer.set_size(num_channels, self.buffer_len);
        self.write_indices = vec![0; num_channels];
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.write_indices.fill(0);
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// Delay `num_samples` of each channel from `input` into `output`
    ///
    /// Channels missing from `input` are fed silence.
    ///
    /// # Real-time Safety
    /// No allocations. O(n).
    pub fn process(&mut self, input: &ChannelBuffer, output: &mut ChannelBuffer, num_samples: usize) {
        let buffer_len = self.buffer_len;
        let channels = self.write_indices.len().min(output.num_channels());

        for channel in 0..channels {
            let source = (channel < input.num_channels()).then(|| input.channel(channel));
            let output = &mut output.channel_mut(channel)[..num_samples];
            let line = self.buffer.channel_mut(channel);
            let mut write_index = self.write_indices[channel];

            for (i, out) in output.iter_mut().enumerate() {
                line[write_index] = source.map_or(0.0, |s| s[i]);

                let read_index = if write_index >= self.delay_samples {
                    write_index - self.delay_samples
                } else {
                    write_index + buffer_len - self.delay_samples
                };
                *out = line[read_index];

                write_index += 1;
                if write_index >= buffer_len {
                    write_index = 0;
                }
            }

            self.write_indices[channel] = write_index;
        }

        for channel in channels..output.num_channels() {
            output.clear_channel(channel, num_samples);
        }
    }
}

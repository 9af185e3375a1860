//! Linear-Phase 3-Band Crossover
//!
//! Splits the input into low / mid / high with two linear-phase FIR lowpass
//! filters:
//!
//! ```text
//! low  = LP(f1)
//! mid  = LP(f2) - LP(f1)
//! high = delayed input - LP(f2)
//! ```
//!
//! Because both filters share the same group delay, the three bands always
//! sum back to the input delayed by `(taps - 1) / 2` samples, whatever the
//! crossover frequencies are. Redesigns happen on a background thread (see
//! `designer`) and are picked up between blocks.

use std::sync::Arc;

use tracing::info;

use crate::buffer::ChannelBuffer;
use crate::designer::{DesignerShared, DesignerWorker};
use crate::error::DspError;
use crate::fir::{valid_tap_count, DelayCompensator, FirLowpass, DEFAULT_TAP_COUNT, MIN_CUTOFF_HZ};
use crate::processor::{AudioProcessor, ProcessContext};

pub const DEFAULT_LOW_MID_HZ: f32 = 200.0;
pub const DEFAULT_MID_HIGH_HZ: f32 = 2500.0;

const MAX_CROSSOVER_HZ: f32 = 20000.0;
/// Smallest gap kept between the two crossover points
const MIN_SPACING_HZ: f32 = 20.0;
/// Requested changes at or below this are not worth a redesign
const REDESIGN_THRESHOLD_HZ: f32 = 0.5;

const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

/// Clamp a requested crossover pair to something designable at `sample_rate`
///
/// Returns `(low_mid, mid_high)` with
/// `20 <= low_mid <= mid_high - 20` and `mid_high <= min(20 kHz, 0.49 * fs)`.
pub fn sanitize_crossovers(low_mid_hz: f32, mid_high_hz: f32, sample_rate: f64) -> (f32, f32) {
    let upper = ((sample_rate * 0.49) as f32)
        .min(MAX_CROSSOVER_HZ)
        .max(MIN_CUTOFF_HZ + MIN_SPACING_HZ);

    let low_mid_hz = if low_mid_hz.is_nan() { MIN_CUTOFF_HZ } else { low_mid_hz };
    let mid_high_hz = if mid_high_hz.is_nan() { upper } else { mid_high_hz };

    let low_mid = low_mid_hz.clamp(MIN_CUTOFF_HZ, upper - MIN_SPACING_HZ);
    let mut mid_high = mid_high_hz.clamp(low_mid + MIN_SPACING_HZ, upper);
    if mid_high <= low_mid {
        mid_high = upper.min(low_mid + MIN_SPACING_HZ);
    }

    (low_mid, mid_high)
}

/// 3-band linear-phase crossover with background coefficient redesign
pub struct LinearPhaseCrossover {
    tap_count: usize,
    sample_rate: f64,
    max_block_size: usize,
    num_channels: usize,
    prepared: bool,

    low_mid_filter: FirLowpass,
    mid_high_filter: FirLowpass,
    delay: DelayCompensator,

    input: ChannelBuffer,
    delayed: ChannelBuffer,
    /// LP(f2) output, kept separate so the high band never reads a mutated mid
    mid_high_lowpass: ChannelBuffer,
    low: ChannelBuffer,
    mid: ChannelBuffer,
    high: ChannelBuffer,

    applied: (f32, f32),

    shared: Arc<DesignerShared>,
    worker: DesignerWorker,
}

impl LinearPhaseCrossover {
    /// Create a crossover and start its designer thread
    ///
    /// The tap count is raised to at least 63 and made odd.
    pub fn new(tap_count: usize) -> Result<Self, DspError> {
        let tap_count = valid_tap_count(tap_count);
        let initial = sanitize_crossovers(DEFAULT_LOW_MID_HZ, DEFAULT_MID_HIGH_HZ, DEFAULT_SAMPLE_RATE);

        let shared = Arc::new(DesignerShared::new(tap_count, initial, DEFAULT_SAMPLE_RATE));
        let worker = DesignerWorker::spawn(Arc::clone(&shared), tap_count)?;

        Ok(Self {
            tap_count,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_block_size: 0,
            num_channels: 0,
            prepared: false,
            low_mid_filter: FirLowpass::default(),
            mid_high_filter: FirLowpass::default(),
            delay: DelayCompensator::default(),
            input: ChannelBuffer::default(),
            delayed: ChannelBuffer::default(),
            mid_high_lowpass: ChannelBuffer::default(),
            low: ChannelBuffer::default(),
            mid: ChannelBuffer::default(),
            high: ChannelBuffer::default(),
            applied: initial,
            shared,
            worker,
        })
    }

    /// Create a crossover with the default 1025 taps
    pub fn with_default_taps() -> Result<Self, DspError> {
        Self::new(DEFAULT_TAP_COUNT)
    }

    /// Allocate buffers and synchronously design the current crossover pair
    ///
    /// Note: This allocates and blocks on the coefficient lock. Only call
    /// during setup, not in audio callback.
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize, num_channels: usize) {
        self.shared.set_prepared(false);
        self.prepared = false;

        let context = ProcessContext::new(sample_rate, num_channels, max_block_size).sanitized();
        self.sample_rate = context.sample_rate;
        self.max_block_size = context.max_block_size;
        self.num_channels = context.channels;

        let channels = self.num_channels;
        let block = self.max_block_size;

        self.low_mid_filter.prepare(channels, self.tap_count);
        self.mid_high_filter.prepare(channels, self.tap_count);
        self.delay.prepare(channels, self.latency_samples(), block);

        for buffer in [
            &mut self.input,
            &mut self.delayed,
            &mut self.mid_high_lowpass,
            &mut self.low,
            &mut self.mid,
            &mut self.high,
        ] {
            buffer.set_size(channels, block);
        }

        let slot = self.shared.design_initial(self.sample_rate);
        self.low_mid_filter.set_coefficients(&slot.low_mid);
        self.mid_high_filter.set_coefficients(&slot.mid_high);
        self.applied = slot.frequencies;

        self.reset();

        self.prepared = true;
        self.shared.set_prepared(true);

        info!(
            "Crossover prepared: {} Hz, {} ch, {} frames, {} taps, latency {} samples ({:.1} / {:.1} Hz)",
            self.sample_rate,
            channels,
            block,
            self.tap_count,
            self.latency_samples(),
            self.applied.0,
            self.applied.1
        );
    }

    /// Clear filter histories, the delay line and the band buffers
    pub fn reset(&mut self) {
        self.low_mid_filter.reset();
        self.mid_high_filter.reset();
        self.delay.reset();

        self.input.clear();
        self.delayed.clear();
        self.mid_high_lowpass.clear();
        self.low.clear();
        self.mid.clear();
        self.high.clear();
    }

    /// Request new crossover frequencies
    ///
    /// The pair is sanitised and stored; if either point moved by more than
    /// 0.5 Hz the designer is woken. The new filters take effect at the start
    /// of a later `process()` call.
    ///
    /// # Real-time Safety
    /// Safe to call from the audio thread: atomics and a non-blocking send.
    pub fn set_target_frequencies(&self, low_mid_hz: f32, mid_high_hz: f32) {
        let requested = sanitize_crossovers(low_mid_hz, mid_high_hz, self.shared.sample_rate());
        let previous = self.shared.exchange_requested(requested);

        let moved = (requested.0 - previous.0).abs() > REDESIGN_THRESHOLD_HZ
            || (requested.1 - previous.1).abs() > REDESIGN_THRESHOLD_HZ;

        if moved {
            self.shared.request_redesign();
            self.worker.wake();
        }
    }

    /// Split `num_samples` of `input` into the three band buffers
    ///
    /// `input` holds one slice per channel; missing channels are treated as
    /// silence. Blocks longer than the prepared maximum are truncated to it.
    /// Does nothing before `prepare()`.
    ///
    /// # Real-time Safety
    /// No allocations. The only lock is a `try_lock` when swapping in newly
    /// designed coefficients, skipped on contention.
    pub fn process<C: AsRef<[f32]>>(&mut self, input: &[C], num_samples: usize) {
        if !self.prepared {
            return;
        }

        let n = num_samples.min(self.max_block_size);
        if n == 0 {
            return;
        }

        self.apply_pending_coefficients();

        self.input.copy_from(input, n);

        self.low_mid_filter.process(&self.input, &mut self.low, n);
        self.mid_high_filter
            .process(&self.input, &mut self.mid_high_lowpass, n);
        self.delay.process(&self.input, &mut self.delayed, n);

        for channel in 0..self.num_channels {
            let low = &self.low.channel(channel)[..n];
            let lowpass = &self.mid_high_lowpass.channel(channel)[..n];
            let delayed = &self.delayed.channel(channel)[..n];

            for ((mid, &lp), &lo) in self.mid.channel_mut(channel)[..n]
                .iter_mut()
                .zip(lowpass)
                .zip(low)
            {
                *mid = lp - lo;
            }

            for ((high, &dry), &lp) in self.high.channel_mut(channel)[..n]
                .iter_mut()
                .zip(delayed)
                .zip(lowpass)
            {
                *high = dry - lp;
            }
        }
    }

    fn apply_pending_coefficients(&mut self) {
        let low_mid_filter = &mut self.low_mid_filter;
        let mid_high_filter = &mut self.mid_high_filter;
        let applied = &mut self.applied;

        self.shared.apply_pending(|slot| {
            low_mid_filter.set_coefficients(&slot.low_mid);
            mid_high_filter.set_coefficients(&slot.mid_high);
            *applied = slot.frequencies;
        });
    }

    pub fn low_band(&self) -> &ChannelBuffer {
        &self.low
    }

    pub fn mid_band(&self) -> &ChannelBuffer {
        &self.mid
    }

    pub fn high_band(&self) -> &ChannelBuffer {
        &self.high
    }

    /// Mutable access to (low, mid, high) for in-place gain stages
    pub fn bands_mut(&mut self) -> (&mut ChannelBuffer, &mut ChannelBuffer, &mut ChannelBuffer) {
        (&mut self.low, &mut self.mid, &mut self.high)
    }

    /// Group delay of every band in samples; independent of the frequencies
    pub fn latency_samples(&self) -> usize {
        (self.tap_count - 1) / 2
    }

    pub fn tap_count(&self) -> usize {
        self.tap_count
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Low/mid frequency of the coefficients currently in use
    pub fn applied_low_mid_hz(&self) -> f32 {
        self.applied.0
    }

    /// Mid/high frequency of the coefficients currently in use
    pub fn applied_mid_high_hz(&self) -> f32 {
        self.applied.1
    }

    /// The sanitised pair most recently requested
    pub fn requested_frequencies(&self) -> (f32, f32) {
        self.shared.requested()
    }
}

impl Drop for LinearPhaseCrossover {
    fn drop(&mut self) {
        // stops the designer from picking up work while the worker shuts down
        self.shared.set_prepared(false);
    }
}

impl AudioProcessor for LinearPhaseCrossover {
    fn prepare(&mut self, context: &ProcessContext) {
        LinearPhaseCrossover::prepare(self, context.sample_rate, context.max_block_size, context.channels);
    }

    fn reset(&mut self) {
        LinearPhaseCrossover::reset(self);
    }

    fn name(&self) -> &'static str {
        "Linear-Phase Crossover"
    }
}

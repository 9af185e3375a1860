//! FFT Spectrum Analyzer
//!
//! Collects a mono downmix of the output into consecutive 2048-sample
//! windows. Each full window is Hann-windowed, transformed, converted to dB
//! and pushed into a bounded frame queue that an observer thread drains.
//!
//! # Architecture
//!
//! The FFT plan, the complex work buffer and the FFT scratch are all created
//! up front, so `push_block()` never allocates. Frames go through a
//! lock-free `ArrayQueue`; when the observer falls behind the oldest frames
//! are evicted.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::processor::{AudioProcessor, ProcessContext, MAX_CHANNELS};

/// FFT size (must be power of 2)
/// 2048 samples at 48kHz = ~42ms window, ~23Hz resolution
pub const FFT_SIZE: usize = 2048;

/// Bins per frame, DC up to (but excluding) Nyquist
pub const NUM_BINS: usize = FFT_SIZE / 2;

/// Frames buffered between audio and observer
pub const FRAME_QUEUE_CAPACITY: usize = 32;

/// Level reported for silent bins
pub const MIN_DB: f32 = -120.0;

/// One spectrum frame: magnitude per bin in dB
pub type SpectrumFrame = [f32; NUM_BINS];

/// Pre-computed Hann window, scaled so its mean is 1
struct HannWindow {
    coeffs: Vec<f32>,
}

impl HannWindow {
    fn new() -> Self {
        let span = (FFT_SIZE - 1) as f64;
        let raw: Vec<f64> = (0..FFT_SIZE)
            .map(|n| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * n as f64 / span).cos()))
            .collect();

        let mean = raw.iter().sum::<f64>() / FFT_SIZE as f64;
        let coeffs = raw.iter().map(|w| (w / mean) as f32).collect();
        Self { coeffs }
    }

    #[inline]
    fn apply(&self, sample: f32, index: usize) -> f32 {
        sample * self.coeffs[index]
    }
}

/// Magnitude to dB with a -120 dB floor
#[inline]
fn gain_to_db(magnitude: f32) -> f32 {
    if magnitude > 0.0 {
        (20.0 * magnitude.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}

/// Non-real-time handle for draining spectrum frames
#[derive(Clone)]
pub struct SpectrumReader {
    frames: Arc<ArrayQueue<SpectrumFrame>>,
}

impl SpectrumReader {
    /// Drain every queued frame and return the newest one
    pub fn pop_latest_frame(&self) -> Option<SpectrumFrame> {
        let mut latest = None;
        while let Some(frame) = self.frames.pop() {
            latest = Some(frame);
        }
        latest
    }

    pub fn frames_ready(&self) -> usize {
        self.frames.len()
    }
}

/// Block-fed spectrum analyzer
pub struct SpectrumAnalyzer {
    window: HannWindow,
    fifo: Vec<f32>,
    fifo_index: usize,
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    frame: SpectrumFrame,
    frames: Arc<ArrayQueue<SpectrumFrame>>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            window: HannWindow::new(),
            fifo: vec![0.0; FFT_SIZE],
            fifo_index: 0,
            fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            frame: [MIN_DB; NUM_BINS],
            frames: Arc::new(ArrayQueue::new(FRAME_QUEUE_CAPACITY)),
        }
    }

    /// Handle for popping frames from another thread
    pub fn reader(&self) -> SpectrumReader {
        SpectrumReader {
            frames: Arc::clone(&self.frames),
        }
    }

    /// Feed `num_samples` of up to two channels (averaged to mono)
    ///
    /// # Real-time Safety
    /// No allocations, no locks. Runs one FFT per completed window.
    pub fn push_block<C: AsRef<[f32]>>(&mut self, channels: &[C], num_samples: usize) {
        let channels = &channels[..channels.len().min(MAX_CHANNELS)];
        if channels.is_empty() {
            return;
        }

        let num_samples = channels
            .iter()
            .map(|c| c.as_ref().len())
            .fold(num_samples, usize::min);
        let scale = 1.0 / channels.len() as f32;

        for i in 0..num_samples {
            let mono = channels.iter().map(|c| c.as_ref()[i]).sum::<f32>() * scale;
            self.push_sample(mono);
        }
    }

    #[inline]
    fn push_sample(&mut self, sample: f32) {
        self.fifo[self.fifo_index] = sample;
        self.fifo_index += 1;

        if self.fifo_index == FFT_SIZE {
            self.compute_frame();
            self.fifo_index = 0;
        }
    }

    fn compute_frame(&mut self) {
        for (i, (slot, &sample)) in self.fft_buffer.iter_mut().zip(&self.fifo).enumerate() {
            *slot = Complex::new(self.window.apply(sample, i), 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);

        let norm = 1.0 / FFT_SIZE as f32;
        for (db, bin) in self.frame.iter_mut().zip(&self.fft_buffer) {
            *db = gain_to_db(bin.norm() * norm);
        }

        // oldest frame is evicted when the observer falls behind
        let _ = self.frames.force_push(self.frame);
    }

    /// Drain every queued frame and return the newest one
    pub fn pop_latest_frame(&self) -> Option<SpectrumFrame> {
        self.reader().pop_latest_frame()
    }

    /// Clear the sample window and drop queued frames
    pub fn reset(&mut self) {
        self.fifo.fill(0.0);
        self.fifo_index = 0;
        self.frame = [MIN_DB; NUM_BINS];
        while self.frames.pop().is_some() {}
    }
}

impl AudioProcessor for SpectrumAnalyzer {
    fn prepare(&mut self, _context: &ProcessContext) {
        SpectrumAnalyzer::reset(self);
    }

    fn reset(&mut self) {
        SpectrumAnalyzer::reset(self);
    }

    fn name(&self) -> &'static str {
        "Spectrum Analyzer"
    }
}

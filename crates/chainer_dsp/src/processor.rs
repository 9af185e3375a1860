//! Audio Processor Lifecycle
//!
//! Shared prepare/reset contract for the stages of the processing chain
//! (crossover -> ducker -> analyzer). Each stage has its own block-level
//! `process` signature because their inputs differ; this trait only covers
//! the lifecycle the host drives.

/// Maximum channel count the chain supports (stereo)
pub const MAX_CHANNELS: usize = 2;

/// Context passed to processors containing stream metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f64,
    pub channels: usize,
    pub max_block_size: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f64, channels: usize, max_block_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            max_block_size,
        }
    }

    /// Clamp every field into the range the DSP code can work with
    ///
    /// Sample rate at least 1 Hz, block size at least 1 frame, 1-2 channels.
    pub fn sanitized(self) -> Self {
        Self {
            sample_rate: if self.sample_rate.is_finite() {
                self.sample_rate.max(1.0)
            } else {
                1.0
            },
            channels: self.channels.clamp(1, MAX_CHANNELS),
            max_block_size: self.max_block_size.max(1),
        }
    }
}

/// Trait for stages in the processing chain
///
/// # Real-time Safety Contract
///
/// `prepare()` may allocate and is never called from the audio callback.
/// `reset()` and every block-level process method MUST follow these rules:
/// - NO heap allocations (no Vec::push, no Box::new, no String)
/// - NO blocking locks (a `try_lock` that skips work on contention is fine)
/// - NO unbounded loops
pub trait AudioProcessor: Send {
    /// (Re)allocate buffers for the given stream shape
    fn prepare(&mut self, context: &ProcessContext);

    /// Reset internal state (delay lines, envelopes, etc.) without reallocating
    fn reset(&mut self);

    /// Human-readable name for debugging/logging
    fn name(&self) -> &'static str;
}

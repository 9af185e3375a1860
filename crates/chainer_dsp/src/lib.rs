//! Chainer DSP - Digital Signal Processing Module
//!
//! This crate provides the audio processing blocks of MultiChainer:
//! - 3-band linear-phase FIR crossover with background coefficient redesign
//! - MIDI note-on triggers driving per-band ducking envelopes
//! - FFT spectrum analyzer feeding a lock-free frame queue
//!
//! # Architecture
//!
//! The DSP chain follows a strict "no allocation in audio callback" rule.
//! Buffers are sized in `prepare()`. New crossover coefficients are designed
//! on a worker thread and swapped in between blocks without ever blocking
//! the audio thread.

mod buffer;
mod crossover;
mod designer;
mod ducker;
mod envelope;
mod error;
mod fft;
mod fir;
mod midi;
mod processor;

pub use buffer::ChannelBuffer;
pub use crossover::{
    sanitize_crossovers, LinearPhaseCrossover, DEFAULT_LOW_MID_HZ, DEFAULT_MID_HIGH_HZ,
};
pub use ducker::{BandParameters, MultibandDucker, MAX_TRIGGERS_PER_BLOCK, NUM_BANDS};
pub use envelope::{EnvelopeFollower, EnvelopeParams, Stage};
pub use error::DspError;
pub use fft::{
    SpectrumAnalyzer, SpectrumFrame, SpectrumReader, FFT_SIZE, FRAME_QUEUE_CAPACITY, MIN_DB,
    NUM_BINS,
};
pub use fir::{
    design_windowed_sinc_lowpass, valid_tap_count, DelayCompensator, FirLowpass,
    DEFAULT_TAP_COUNT, MIN_TAP_COUNT,
};
pub use midi::{MidiEvent, MidiMessage, MidiTrigger, MidiTriggerConfig};
pub use processor::{AudioProcessor, ProcessContext, MAX_CHANNELS};

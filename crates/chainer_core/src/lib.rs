//! Chainer Core - Processing Unit
//!
//! This crate wires the DSP blocks of `chainer_dsp` into one real-time
//! processing unit, including:
//! - Block processing: crossover, MIDI-triggered ducking, band mix, analysis
//! - Lock-free control from a non-real-time thread
//! - Observer snapshots and spectrum frames for a UI
//! - JSON configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Controller Thread                       │
//! │   ChainerController ──commands──▶   ◀──snapshot / spectrum  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ rtrb / atomics / ArrayQueue
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Audio Thread                           │
//! │   MultiChainer::process: crossover ─▶ ducker ─▶ mix ─▶ FFT  │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ try_lock coefficient swap
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 FIR Designer Thread                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod message;
mod processor;
mod state;

pub use config::{ChainerConfig, StreamConfig};
pub use error::{EngineError, EngineResult};
pub use message::Command;
pub use processor::{ChainerController, MultiChainer};
pub use state::{channel_bit, SharedState, Snapshot, MIDI_CHANNELS};

// Re-export DSP types for convenience
pub use chainer_dsp::{
    BandParameters, MidiEvent, MidiMessage, SpectrumFrame, FFT_SIZE, NUM_BANDS, NUM_BINS,
};

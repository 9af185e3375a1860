//! Shared State and Observer Snapshot
//!
//! The audio thread publishes a handful of scalars after every block; an
//! observer (UI, logger, test) reads them at its own pace. Every field has
//! exactly one writer, the audio thread.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use chainer_dsp::NUM_BANDS;

/// Number of MIDI channels tracked in the activity mask
pub const MIDI_CHANNELS: u8 = 16;

/// Shared state between audio callback and observer threads
pub struct SharedState {
    /// Applied crossover frequencies (f32 bits)
    /// Rust pattern: AtomicF32 doesn't exist, so we use bit-casting
    low_mid_bits: AtomicU32,
    mid_high_bits: AtomicU32,

    latency_samples: AtomicUsize,

    /// Blocks in which at least one MIDI message arrived
    midi_activity: AtomicU64,

    /// Bit n set = MIDI channel n + 1 seen since creation
    midi_channel_mask: AtomicU16,

    band_envelope_bits: [AtomicU32; NUM_BANDS],

    blocks_processed: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            low_mid_bits: AtomicU32::new(0.0_f32.to_bits()),
            mid_high_bits: AtomicU32::new(0.0_f32.to_bits()),
            latency_samples: AtomicUsize::new(0),
            midi_activity: AtomicU64::new(0),
            midi_channel_mask: AtomicU16::new(0),
            band_envelope_bits: std::array::from_fn(|_| AtomicU32::new(0.0_f32.to_bits())),
            blocks_processed: AtomicU64::new(0),
        }
    }

    pub fn set_applied_crossover(&self, low_mid_hz: f32, mid_high_hz: f32) {
        self.low_mid_bits
            .store(low_mid_hz.to_bits(), Ordering::Release);
        self.mid_high_bits
            .store(mid_high_hz.to_bits(), Ordering::Release);
    }

    pub fn applied_crossover(&self) -> (f32, f32) {
        (
            f32::from_bits(self.low_mid_bits.load(Ordering::Acquire)),
            f32::from_bits(self.mid_high_bits.load(Ordering::Acquire)),
        )
    }

    pub fn set_latency_samples(&self, latency: usize) {
        self.latency_samples.store(latency, Ordering::Release);
    }

    pub fn latency_samples(&self) -> usize {
        self.latency_samples.load(Ordering::Acquire)
    }

    /// Fold one block's channel mask in; counts the block only if non-empty
    pub fn record_midi_block(&self, channel_mask: u16) {
        if channel_mask == 0 {
            return;
        }
        // Rust pattern: Relaxed is enough for independent counters
        self.midi_channel_mask
            .fetch_or(channel_mask, Ordering::Relaxed);
        self.midi_activity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn midi_activity(&self) -> u64 {
        self.midi_activity.load(Ordering::Relaxed)
    }

    pub fn midi_channel_mask(&self) -> u16 {
        self.midi_channel_mask.load(Ordering::Relaxed)
    }

    pub fn set_band_envelope(&self, band: usize, envelope: f32) {
        if let Some(slot) = self.band_envelope_bits.get(band) {
            slot.store(envelope.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn band_envelopes(&self) -> [f32; NUM_BANDS] {
        std::array::from_fn(|band| {
            f32::from_bits(self.band_envelope_bits[band].load(Ordering::Relaxed))
        })
    }

    pub fn increment_blocks(&self) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Read everything into a plain value
    pub fn snapshot(&self) -> Snapshot {
        let (low_mid_hz, mid_high_hz) = self.applied_crossover();
        Snapshot {
            applied_low_mid_hz: low_mid_hz,
            applied_mid_high_hz: mid_high_hz,
            latency_samples: self.latency_samples(),
            midi_activity: self.midi_activity(),
            midi_channel_mask: self.midi_channel_mask(),
            band_envelopes: self.band_envelopes(),
            blocks_processed: self.blocks_processed(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the processing unit for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub applied_low_mid_hz: f32,
    pub applied_mid_high_hz: f32,
    pub latency_samples: usize,
    pub midi_activity: u64,
    pub midi_channel_mask: u16,
    /// 0 = no ducking, 1 = full depth; low, mid, high
    pub band_envelopes: [f32; NUM_BANDS],
    pub blocks_processed: u64,
}

impl Snapshot {
    /// Channels worth offering in a channel picker
    ///
    /// The channels seen so far, or all 16 while nothing has been seen.
    pub fn midi_channels(&self) -> Vec<u8> {
        (1..=MIDI_CHANNELS)
            .filter(|&channel| {
                self.midi_channel_mask == 0 || self.midi_channel_mask & channel_bit(channel) != 0
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Mask bit for a 1-based MIDI channel; 0 for anything outside 1-16
#[inline]
pub fn channel_bit(channel: u8) -> u16 {
    if (1..=MIDI_CHANNELS).contains(&channel) {
        1 << (channel - 1)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_state_defaults() {
        let state = SharedState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.latency_samples, 0);
        assert_eq!(snapshot.midi_activity, 0);
        assert_eq!(snapshot.midi_channel_mask, 0);
        assert_eq!(snapshot.band_envelopes, [0.0; NUM_BANDS]);
    }

    #[test]
    fn test_crossover_roundtrip() {
        let state = SharedState::new();
        state.set_applied_crossover(210.0, 2500.0);
        assert_eq!(state.applied_crossover(), (210.0, 2500.0));
    }

    #[test]
    fn test_midi_activity() {
        let state = SharedState::new();
        state.record_midi_block(0);
        assert_eq!(state.midi_activity(), 0);

        state.record_midi_block(channel_bit(3));
        state.record_midi_block(channel_bit(10));
        assert_eq!(state.midi_activity(), 2);
        assert_eq!(state.midi_channel_mask(), 0b10_0000_0100);
    }

    #[test]
    fn test_channel_bit() {
        assert_eq!(channel_bit(1), 1);
        assert_eq!(channel_bit(16), 0x8000);
        assert_eq!(channel_bit(0), 0);
        assert_eq!(channel_bit(17), 0);
    }

    #[test]
    fn test_band_envelope_out_of_range_ignored() {
        let state = SharedState::new();
        state.set_band_envelope(1, 0.5);
        state.set_band_envelope(9, 1.0);
        assert_eq!(state.band_envelopes(), [0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_snapshot_channels() {
        let state = SharedState::new();
        assert_eq!(state.snapshot().midi_channels().len(), 16);

        state.record_midi_block(channel_bit(2) | channel_bit(5));
        assert_eq!(state.snapshot().midi_channels(), vec![2, 5]);
    }

    #[test]
    fn test_snapshot_json() {
        let state = SharedState::new();
        state.set_latency_samples(512);
        let json = state.snapshot().to_json().unwrap();
        assert!(json.contains("\"latency_samples\":512"));

        let decoded: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state.snapshot());
    }
}

//! MIDI-triggered 3-band ducker
//!
//! Each band owns a note-on matcher and an envelope follower. MIDI events
//! for the block are recorded as sample offsets per band, then
//! `process_bands()` walks the block sample by sample, fires the envelope at
//! each offset and scales every channel of that band by the resulting gain.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::ChannelBuffer;
use crate::envelope::{EnvelopeFollower, EnvelopeParams};
use crate::error::DspError;
use crate::midi::{MidiMessage, MidiTrigger, MidiTriggerConfig};
use crate::processor::{AudioProcessor, ProcessContext};

/// Number of bands the ducker drives (low, mid, high)
pub const NUM_BANDS: usize = 3;

/// Trigger offsets kept per band per block; further note-ons are dropped
pub const MAX_TRIGGERS_PER_BLOCK: usize = 512;

/// User-facing settings of one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandParameters {
    /// 0 = any channel, 1-16 = that channel only
    pub midi_channel: u8,
    pub note_min: u8,
    pub note_max: u8,
    /// Attenuation at full envelope, in dB (positive)
    pub depth_db: f32,
    pub delay_ms: f32,
    pub attack_ms: f32,
    pub hold_ms: f32,
    pub release_ms: f32,
    pub curve_shape: f32,
    pub smoothing: f32,
}

impl Default for BandParameters {
    fn default() -> Self {
        let trigger = MidiTriggerConfig::default();
        let envelope = EnvelopeParams::default();
        Self {
            midi_channel: trigger.midi_channel,
            note_min: trigger.note_min,
            note_max: trigger.note_max,
            depth_db: envelope.depth_db,
            delay_ms: envelope.delay_ms,
            attack_ms: envelope.attack_ms,
            hold_ms: envelope.hold_ms,
            release_ms: envelope.release_ms,
            curve_shape: envelope.curve_shape,
            smoothing: envelope.smoothing,
        }
    }
}

impl BandParameters {
    pub fn trigger_config(&self) -> MidiTriggerConfig {
        MidiTriggerConfig {
            midi_channel: self.midi_channel,
            note_min: self.note_min,
            note_max: self.note_max,
        }
    }

    pub fn envelope_params(&self) -> EnvelopeParams {
        EnvelopeParams {
            depth_db: self.depth_db,
            delay_ms: self.delay_ms,
            attack_ms: self.attack_ms,
            hold_ms: self.hold_ms,
            release_ms: self.release_ms,
            curve_shape: self.curve_shape,
            smoothing: self.smoothing,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BandState {
    trigger: MidiTrigger,
    envelope: EnvelopeFollower,
    triggers: ArrayVec<usize, MAX_TRIGGERS_PER_BLOCK>,
}

impl BandState {
    fn process(&mut self, audio: &mut ChannelBuffer, num_samples: usize) {
        let num_samples = num_samples.min(audio.len());
        self.triggers.sort_unstable();

        let mut next = 0;
        for i in 0..num_samples {
            // simultaneous triggers collapse into one
            let mut trigger_now = false;
            while next < self.triggers.len() && self.triggers[next] == i {
                trigger_now = true;
                next += 1;
            }

            let gain = self.envelope.process_sample(trigger_now);
            for channel in audio.channels_mut() {
                channel[i] *= gain;
            }
        }
    }
}

/// Three independently triggered envelopes applied to three band buffers
#[derive(Debug, Clone)]
pub struct MultibandDucker {
    sample_rate: f64,
    max_block_size: usize,
    num_channels: usize,
    bands: [BandState; NUM_BANDS],
}

impl Default for MultibandDucker {
    fn default() -> Self {
        let mut ducker = Self {
            sample_rate: 44100.0,
            max_block_size: 512,
            num_channels: 2,
            bands: Default::default(),
        };
        for index in 0..NUM_BANDS {
            ducker.apply_band_parameters(index, BandParameters::default());
        }
        ducker
    }
}

impl MultibandDucker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize, num_channels: usize) {
        let context = ProcessContext::new(sample_rate, num_channels, max_block_size).sanitized();
        self.sample_rate = context.sample_rate;
        self.max_block_size = context.max_block_size;
        self.num_channels = context.channels;

        for band in &mut self.bands {
            band.envelope.prepare(self.sample_rate);
        }
        self.clear_block_triggers();

        debug!(
            "Ducker prepared: {} Hz, {} ch, {} frames",
            self.sample_rate, self.num_channels, self.max_block_size
        );
    }

    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.envelope.reset();
        }
        self.clear_block_triggers();
    }

    /// Update the trigger filter and envelope of one band
    ///
    /// # Errors
    /// `DspError::InvalidBandIndex` if `index >= 3`.
    pub fn set_band_parameters(&mut self, index: usize, params: BandParameters) -> Result<(), DspError> {
        if index >= NUM_BANDS {
            return Err(DspError::InvalidBandIndex(index));
        }
        self.apply_band_parameters(index, params);
        Ok(())
    }

    fn apply_band_parameters(&mut self, index: usize, params: BandParameters) {
        let band = &mut self.bands[index];
        band.trigger.set_config(params.trigger_config());
        band.envelope.set_parameters(params.envelope_params());
    }

    pub fn clear_block_triggers(&mut self) {
        for band in &mut self.bands {
            band.triggers.clear();
        }
    }

    /// Record a note-on at `sample_offset` for every band it matches
    ///
    /// Anything but a note-on is ignored. The offset is clamped into the
    /// block; an empty block records nothing.
    ///
    /// # Real-time Safety
    /// No allocations; overflow beyond 512 triggers per band is dropped.
    pub fn push_midi_event(&mut self, message: &MidiMessage, sample_offset: i64, block_len: usize) {
        if !message.is_note_on() || block_len == 0 {
            return;
        }

        let last = (block_len - 1) as i64;
        let offset = sample_offset.clamp(0, last) as usize;

        for band in &mut self.bands {
            if band.trigger.matches_note_on(message) {
                let _ = band.triggers.try_push(offset);
            }
        }
    }

    /// Apply each band's envelope to its buffer in place, then clear the
    /// block triggers
    ///
    /// # Real-time Safety
    /// No allocations. O(n * channels) per band plus a sort of the offsets.
    pub fn process_bands(
        &mut self,
        low: &mut ChannelBuffer,
        mid: &mut ChannelBuffer,
        high: &mut ChannelBuffer,
        num_samples: usize,
    ) {
        let [low_band, mid_band, high_band] = &mut self.bands;
        low_band.process(low, num_samples);
        mid_band.process(mid, num_samples);
        high_band.process(high, num_samples);

        self.clear_block_triggers();
    }

    /// Smoothed envelope of one band (0 = no ducking, 1 = full depth)
    pub fn band_envelope(&self, index: usize) -> Option<f32> {
        self.bands.get(index).map(|band| band.envelope.envelope())
    }

    /// Triggers recorded for one band in the current block
    pub fn pending_triggers(&self, index: usize) -> &[usize] {
        self.bands
            .get(index)
            .map_or(&[][..], |band| band.triggers.as_slice())
    }
}

impl AudioProcessor for MultibandDucker {
    fn prepare(&mut self, context: &ProcessContext) {
        MultibandDucker::prepare(self, context.sample_rate, context.max_block_size, context.channels);
    }

    fn reset(&mut self) {
        MultibandDucker::reset(self);
    }

    fn name(&self) -> &'static str {
        "Multiband Ducker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(channels: usize, len: usize) -> ChannelBuffer {
        let mut buffer = ChannelBuffer::new(channels, len);
        for channel in buffer.channels_mut() {
            channel.fill(1.0);
        }
        buffer
    }

    fn fast_band(midi_channel: u8) -> BandParameters {
        BandParameters {
            midi_channel,
            depth_db: 20.0,
            attack_ms: 0.0,
            hold_ms: 50.0,
            release_ms: 50.0,
            smoothing: 0.0,
            ..Default::default()
        }
    }

    fn prepared() -> MultibandDucker {
        let mut ducker = MultibandDucker::new();
        ducker.prepare(48000.0, 256, 2);
        ducker
    }

    #[test]
    fn test_no_trigger_is_unity() {
        let mut ducker = prepared();
        let (mut low, mut mid, mut high) = (ones(2, 256), ones(2, 256), ones(2, 256));
        ducker.process_bands(&mut low, &mut mid, &mut high, 256);

        for band in [&low, &mid, &high] {
            assert!(band.channels().all(|c| c.iter().all(|&s| s == 1.0)));
        }
    }

    #[test]
    fn test_channel_filter_selects_band() {
        let mut ducker = prepared();
        ducker.set_band_parameters(0, fast_band(3)).unwrap();
        ducker.set_band_parameters(1, fast_band(5)).unwrap();
        ducker.set_band_parameters(2, fast_band(5)).unwrap();

        ducker.clear_block_triggers();
        ducker.push_midi_event(&MidiMessage::note_on(3, 36, 100), 10, 256);

        let (mut low, mut mid, mut high) = (ones(2, 256), ones(2, 256), ones(2, 256));
        ducker.process_bands(&mut low, &mut mid, &mut high, 256);

        // before the trigger nothing moves
        assert_eq!(low.channel(0)[9], 1.0);
        // band 0 ducks to -20 dB from the trigger sample on
        assert!((low.channel(0)[10] - 0.1).abs() < 1e-4);
        assert!((low.channel(1)[100] - 0.1).abs() < 1e-4);

        assert!(mid.channels().all(|c| c.iter().all(|&s| s == 1.0)));
        assert!(high.channels().all(|c| c.iter().all(|&s| s == 1.0)));
    }

    #[test]
    fn test_omni_band_reacts_to_any_channel() {
        let mut ducker = prepared();
        ducker.set_band_parameters(2, fast_band(0)).unwrap();
        ducker.push_midi_event(&MidiMessage::note_on(11, 60, 1), 0, 256);
        assert_eq!(ducker.pending_triggers(2), &[0]);
    }

    #[test]
    fn test_note_range_filter() {
        let mut ducker = prepared();
        let params = BandParameters {
            note_min: 36,
            note_max: 36,
            ..fast_band(0)
        };
        ducker.set_band_parameters(0, params).unwrap();

        ducker.push_midi_event(&MidiMessage::note_on(1, 38, 100), 0, 256);
        assert!(ducker.pending_triggers(0).is_empty());
        ducker.push_midi_event(&MidiMessage::note_on(1, 36, 100), 0, 256);
        assert_eq!(ducker.pending_triggers(0), &[0]);
    }

    #[test]
    fn test_offsets_clamped_into_block() {
        let mut ducker = prepared();
        let on = MidiMessage::note_on(1, 60, 100);
        ducker.push_midi_event(&on, -5, 128);
        ducker.push_midi_event(&on, 1000, 128);

        assert_eq!(ducker.pending_triggers(0), &[0, 127]);
    }

    #[test]
    fn test_non_note_on_ignored() {
        let mut ducker = prepared();
        let off = MidiMessage::NoteOff {
            channel: 1,
            note: 60,
            velocity: 0,
        };
        ducker.push_midi_event(&off, 0, 128);
        ducker.push_midi_event(&MidiMessage::note_on(1, 60, 0), 0, 128);
        ducker.push_midi_event(&MidiMessage::note_on(1, 60, 100), 0, 0);

        for band in 0..NUM_BANDS {
            assert!(ducker.pending_triggers(band).is_empty());
        }
    }

    #[test]
    fn test_trigger_overflow_dropped() {
        let mut ducker = prepared();
        let on = MidiMessage::note_on(1, 60, 100);
        for offset in 0..600 {
            ducker.push_midi_event(&on, offset, 1024);
        }
        assert_eq!(ducker.pending_triggers(0).len(), MAX_TRIGGERS_PER_BLOCK);
        assert_eq!(ducker.pending_triggers(0)[511], 511);
    }

    #[test]
    fn test_simultaneous_triggers_collapse() {
        let mut single = prepared();
        let mut doubled = prepared();
        let params = BandParameters {
            attack_ms: 1.0,
            ..fast_band(0)
        };
        for ducker in [&mut single, &mut doubled] {
            ducker.set_band_parameters(0, params).unwrap();
        }

        let on = MidiMessage::note_on(1, 60, 100);
        single.push_midi_event(&on, 20, 256);
        doubled.push_midi_event(&on, 20, 256);
        doubled.push_midi_event(&on, 20, 256);

        let mut a = (ones(1, 256), ones(1, 256), ones(1, 256));
        let mut b = (ones(1, 256), ones(1, 256), ones(1, 256));
        single.process_bands(&mut a.0, &mut a.1, &mut a.2, 256);
        doubled.process_bands(&mut b.0, &mut b.1, &mut b.2, 256);

        assert_eq!(a.0.channel(0), b.0.channel(0));
    }

    #[test]
    fn test_unsorted_offsets_are_honoured() {
        let mut ducker = prepared();
        ducker.set_band_parameters(0, fast_band(0)).unwrap();

        let on = MidiMessage::note_on(1, 60, 100);
        ducker.push_midi_event(&on, 200, 256);
        ducker.push_midi_event(&on, 50, 256);

        let (mut low, mut mid, mut high) = (ones(1, 256), ones(1, 256), ones(1, 256));
        ducker.process_bands(&mut low, &mut mid, &mut high, 256);

        assert_eq!(low.channel(0)[49], 1.0);
        assert!(low.channel(0)[50] < 0.2);
    }

    #[test]
    fn test_triggers_cleared_after_block() {
        let mut ducker = prepared();
        ducker.push_midi_event(&MidiMessage::note_on(1, 60, 100), 3, 64);

        let (mut low, mut mid, mut high) = (ones(1, 64), ones(1, 64), ones(1, 64));
        ducker.process_bands(&mut low, &mut mid, &mut high, 64);

        for band in 0..NUM_BANDS {
            assert!(ducker.pending_triggers(band).is_empty());
        }
        assert!(ducker.band_envelope(0).unwrap() > 0.0);
    }

    #[test]
    fn test_invalid_band_index() {
        let mut ducker = prepared();
        let err = ducker.set_band_parameters(3, BandParameters::default()).unwrap_err();
        assert!(matches!(err, DspError::InvalidBandIndex(3)));
        assert_eq!(ducker.band_envelope(3), None);
        assert!(ducker.pending_triggers(7).is_empty());
    }

    #[test]
    fn test_reset_returns_to_unity() {
        let mut ducker = prepared();
        ducker.set_band_parameters(0, fast_band(0)).unwrap();
        ducker.push_midi_event(&MidiMessage::note_on(1, 60, 100), 0, 64);
        let (mut low, mut mid, mut high) = (ones(1, 64), ones(1, 64), ones(1, 64));
        ducker.process_bands(&mut low, &mut mid, &mut high, 64);

        ducker.reset();
        let (mut low, mut mid, mut high) = (ones(1, 64), ones(1, 64), ones(1, 64));
        ducker.process_bands(&mut low, &mut mid, &mut high, 64);
        assert!(low.channel(0).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_band_parameters_serde_defaults() {
        let params: BandParameters = serde_json::from_str(r#"{"midi_channel": 4}"#).unwrap();
        assert_eq!(params.midi_channel, 4);
        assert_eq!(params.release_ms, 180.0);
        assert_eq!(params.note_max, 127);
    }

    #[test]
    fn test_band_defaults_match_envelope_and_trigger_defaults() {
        let params = BandParameters::default();
        assert_eq!(params.envelope_params(), EnvelopeParams::default());
        assert_eq!(params.trigger_config(), MidiTriggerConfig::default());
        assert_eq!(params.depth_db, 12.0);
        assert_eq!(params.release_ms, 180.0);
    }
}

//! MIDI messages and the per-band note-on trigger
//!
//! Only what the ducker needs: note-on/off with channel and velocity.
//! Everything else is kept as an opaque channel-voice or system message so
//! activity can still be counted per channel.

/// A parsed short MIDI message. Channels are 1-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Any other channel-voice message (CC, pitch bend, aftertouch, ...)
    ChannelVoice { channel: u8, status: u8 },
    /// System common / realtime / sysex
    System,
}

impl MidiMessage {
    /// Parse raw MIDI bytes (status byte first)
    ///
    /// Returns `None` for an empty slice, a missing status byte, or a note
    /// message without its two data bytes. A note-on with velocity 0 is
    /// reported as a note-off.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status & 0x80 == 0 {
            return None;
        }
        if status >= 0xF0 {
            return Some(Self::System);
        }

        let channel = (status & 0x0F) + 1;
        match status & 0xF0 {
            0x90 | 0x80 => {
                let note = *bytes.get(1)? & 0x7F;
                let velocity = *bytes.get(2)? & 0x7F;
                if status & 0xF0 == 0x90 && velocity > 0 {
                    Some(Self::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                } else {
                    Some(Self::NoteOff {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            kind => Some(Self::ChannelVoice {
                channel,
                status: kind,
            }),
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::NoteOn {
            channel,
            note,
            velocity,
        }
    }

    /// True for a note-on with non-zero velocity
    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self, Self::NoteOn { velocity, .. } if *velocity > 0)
    }

    /// MIDI channel 1-16, or `None` for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ChannelVoice { channel, .. } => Some(channel),
            Self::System => None,
        }
    }

    pub fn note(&self) -> Option<u8> {
        match *self {
            Self::NoteOn { note, .. } | Self::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }
}

/// A MIDI message with its sample position inside the current block
///
/// The offset is signed and unchecked; consumers clamp it into the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub message: MidiMessage,
    pub sample_offset: i64,
}

impl MidiEvent {
    pub fn new(message: MidiMessage, sample_offset: i64) -> Self {
        Self {
            message,
            sample_offset,
        }
    }
}

/// Channel / note-range filter for one band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiTriggerConfig {
    /// 0 = omni, 1-16 = channel
    pub midi_channel: u8,
    pub note_min: u8,
    pub note_max: u8,
}

impl Default for MidiTriggerConfig {
    fn default() -> Self {
        Self {
            midi_channel: 0,
            note_min: 0,
            note_max: 127,
        }
    }
}

/// Stateless note-on matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct MidiTrigger {
    config: MidiTriggerConfig,
}

impl MidiTrigger {
    /// Store a sanitized copy of `config`
    ///
    /// Channel is clamped to 0-16, the note range to 0-127 and swapped if
    /// given in reverse.
    pub fn set_config(&mut self, config: MidiTriggerConfig) {
        let low = config.note_min.min(127);
        let high = config.note_max.min(127);

        self.config = MidiTriggerConfig {
            midi_channel: config.midi_channel.min(16),
            note_min: low.min(high),
            note_max: low.max(high),
        };
    }

    pub fn config(&self) -> &MidiTriggerConfig {
        &self.config
    }

    pub fn matches_note_on(&self, message: &MidiMessage) -> bool {
        let MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        } = *message
        else {
            return false;
        };

        if velocity == 0 {
            return false;
        }

        if self.config.midi_channel != 0 && channel != self.config.midi_channel {
            return false;
        }

        (self.config.note_min..=self.config.note_max).contains(&note)
    }
}

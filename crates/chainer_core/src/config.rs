//! Processing Unit and Stream Configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use chainer_dsp::{BandParameters, DEFAULT_LOW_MID_HZ, DEFAULT_MID_HIGH_HZ, DEFAULT_TAP_COUNT, NUM_BANDS};

/// Audio stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Largest block the host will pass to `process()`, in frames
    pub max_block_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            max_block_size: 512,
        }
    }
}

impl StreamConfig {
    /// Block duration in milliseconds
    pub fn block_ms(&self) -> f32 {
        (self.max_block_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.max_block_size < 16 || self.max_block_size > 8192 {
            return Err(format!("Invalid block size: {}", self.max_block_size));
        }
        Ok(())
    }
}

/// Overall processing unit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainerConfig {
    /// Stream configuration
    pub stream: StreamConfig,

    /// FIR length of both crossover filters (raised to odd, >= 63)
    pub tap_count: usize,

    pub low_mid_hz: f32,
    pub mid_high_hz: f32,

    /// Low, mid, high
    pub bands: [BandParameters; NUM_BANDS],

    /// Control commands buffered between controller and audio thread
    pub command_queue_capacity: usize,
}

impl Default for ChainerConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            tap_count: DEFAULT_TAP_COUNT,
            low_mid_hz: DEFAULT_LOW_MID_HZ,
            mid_high_hz: DEFAULT_MID_HIGH_HZ,
            bands: [BandParameters::default(); NUM_BANDS],
            command_queue_capacity: 64,
        }
    }
}

impl ChainerConfig {
    /// Create config optimized for low latency (~2.6ms crossover delay at 48kHz)
    pub fn low_latency() -> Self {
        Self {
            stream: StreamConfig {
                sample_rate: 48000,
                channels: 2,
                max_block_size: 128,
            },
            tap_count: 255,
            ..Default::default()
        }
    }

    /// Crossover latency this configuration will report, in samples
    pub fn latency_samples(&self) -> usize {
        (chainer_dsp::valid_tap_count(self.tap_count) - 1) / 2
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.stream.validate().map_err(EngineError::ConfigError)?;

        if self.command_queue_capacity == 0 {
            return Err(EngineError::ConfigError(
                "Command queue capacity must be at least 1".into(),
            ));
        }
        if !self.low_mid_hz.is_finite() || !self.mid_high_hz.is_finite() {
            return Err(EngineError::ConfigError(format!(
                "Invalid crossover frequencies: {} / {}",
                self.low_mid_hz, self.mid_high_hz
            )));
        }
        for (index, band) in self.bands.iter().enumerate() {
            if band.midi_channel > 16 {
                return Err(EngineError::ConfigError(format!(
                    "Band {} MIDI channel out of range: {}",
                    index, band.midi_channel
                )));
            }
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| EngineError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChainerConfig::default();
        assert_eq!(config.stream.sample_rate, 48000);
        assert_eq!(config.stream.channels, 2);
        assert_eq!(config.tap_count, 1025);
        assert_eq!(config.latency_samples(), 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_duration() {
        let config = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            max_block_size: 480, // Exactly 10ms at 48kHz
        };
        assert!((config.block_ms() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_validation() {
        let invalid_rate = StreamConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_channels = StreamConfig {
            channels: 3,
            ..Default::default()
        };
        assert!(invalid_channels.validate().is_err());

        let invalid_block = StreamConfig {
            max_block_size: 10,
            ..Default::default()
        };
        assert!(invalid_block.validate().is_err());

        let mut config = ChainerConfig::default();
        config.command_queue_capacity = 0;
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));

        let mut config = ChainerConfig::default();
        config.bands[1].midi_channel = 17;
        assert!(config.validate().is_err());

        let mut config = ChainerConfig::default();
        config.low_mid_hz = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_low_latency_preset() {
        let low_latency = ChainerConfig::low_latency();
        let default = ChainerConfig::default();

        assert!(low_latency.latency_samples() < default.latency_samples());
        assert_eq!(low_latency.latency_samples(), 127);
        assert!(low_latency.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ChainerConfig::low_latency();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ChainerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ChainerConfig::from_json_str(r#"{"tap_count": 511, "low_mid_hz": 150.0}"#).unwrap();
        assert_eq!(config.tap_count, 511);
        assert_eq!(config.low_mid_hz, 150.0);
        assert_eq!(config.mid_high_hz, DEFAULT_MID_HIGH_HZ);
        assert_eq!(config.stream, StreamConfig::default());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            ChainerConfig::from_json_str("{ not json"),
            Err(EngineError::ConfigError(_))
        ));
        assert!(matches!(
            ChainerConfig::from_json_str(r#"{"stream": {"sample_rate": 1000, "channels": 2, "max_block_size": 64}}"#),
            Err(EngineError::ConfigError(_))
        ));
        assert!(ChainerConfig::from_json_file("/definitely/not/here.json").is_err());
    }
}

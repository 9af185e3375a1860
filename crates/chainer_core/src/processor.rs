//! MultiChainer Processing Unit
//!
//! Owns the crossover, the ducker and the spectrum analyzer and runs them in
//! order for every block:
//!
//! ```text
//!  commands ──▶ crossover targets / band parameters
//!  MIDI     ──▶ activity + per-band triggers
//!  input ──▶ crossover ──▶ ducker ──▶ low + mid + high ──▶ output
//!                                                      └──▶ analyzer
//!  snapshot atomics ◀── applied Hz, envelopes, latency
//! ```
//!
//! Everything in `process()` is allocation-free. Control from other threads
//! goes through a `ChainerController`.

use std::sync::Arc;

use rtrb::{Consumer, Producer};
use tracing::{debug, info, warn};

use crate::config::ChainerConfig;
use crate::error::{EngineError, EngineResult};
use crate::message::{command_queue, Command};
use crate::state::{channel_bit, SharedState, Snapshot};
use chainer_dsp::{
    AudioProcessor, BandParameters, DspError, LinearPhaseCrossover, MidiEvent, MultibandDucker,
    ProcessContext, SpectrumAnalyzer, SpectrumFrame, SpectrumReader, MAX_CHANNELS, NUM_BANDS,
};

/// The real-time processing unit
pub struct MultiChainer {
    config: ChainerConfig,
    crossover: LinearPhaseCrossover,
    ducker: MultibandDucker,
    analyzer: SpectrumAnalyzer,

    crossover_target: (f32, f32),
    band_parameters: [BandParameters; NUM_BANDS],
    /// Bands whose parameters changed since the last block
    dirty_bands: [bool; NUM_BANDS],

    commands: Consumer<Command>,
    controller: Option<ChainerController>,
    shared: Arc<SharedState>,

    context: ProcessContext,
    prepared: bool,
}

impl MultiChainer {
    /// Build the processing unit from a validated configuration
    pub fn new(config: ChainerConfig) -> EngineResult<Self> {
        config.validate()?;

        let crossover = LinearPhaseCrossover::new(config.tap_count)?;
        let mut ducker = MultibandDucker::new();
        for (band, params) in config.bands.iter().enumerate() {
            ducker.set_band_parameters(band, *params)?;
        }

        crossover.set_target_frequencies(config.low_mid_hz, config.mid_high_hz);

        let analyzer = SpectrumAnalyzer::new();
        let shared = Arc::new(SharedState::new());
        shared.set_latency_samples(crossover.latency_samples());

        let (producer, consumer) = command_queue(config.command_queue_capacity);
        let controller = ChainerController {
            commands: producer,
            spectrum: analyzer.reader(),
            shared: Arc::clone(&shared),
        };

        let stream = &config.stream;
        let context = ProcessContext::new(
            f64::from(stream.sample_rate),
            usize::from(stream.channels),
            stream.max_block_size as usize,
        );

        info!(
            "MultiChainer created: {} taps, crossover {} / {} Hz",
            crossover.tap_count(),
            config.low_mid_hz,
            config.mid_high_hz
        );

        Ok(Self {
            crossover_target: (config.low_mid_hz, config.mid_high_hz),
            band_parameters: config.bands,
            dirty_bands: [false; NUM_BANDS],
            config,
            crossover,
            ducker,
            analyzer,
            commands: consumer,
            controller: Some(controller),
            shared,
            context,
            prepared: false,
        })
    }

    /// Hand out the controller; only the first call succeeds
    pub fn controller(&mut self) -> EngineResult<ChainerController> {
        self.controller.take().ok_or(EngineError::ControllerTaken)
    }

    /// Allocate for the given stream shape
    ///
    /// Note: This allocates and designs filters synchronously. Only call
    /// during setup, not in audio callback.
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize, num_channels: usize) {
        self.context = ProcessContext::new(sample_rate, num_channels, max_block_size).sanitized();
        let ctx = self.context;

        self.crossover
            .set_target_frequencies(self.crossover_target.0, self.crossover_target.1);
        for stage in self.stages_mut() {
            stage.prepare(&ctx);
            debug!("Prepared {}", stage.name());
        }

        self.shared
            .set_latency_samples(self.crossover.latency_samples());
        self.publish_crossover();
        self.prepared = true;

        info!(
            "MultiChainer prepared: {} Hz, {} ch, {} frames, latency {} samples",
            ctx.sample_rate,
            ctx.channels,
            ctx.max_block_size,
            self.latency_samples()
        );
    }

    /// Prepare with the stream settings from the configuration
    pub fn prepare_from_config(&mut self) {
        let stream = self.config.stream.clone();
        self.prepare(
            f64::from(stream.sample_rate),
            stream.max_block_size as usize,
            usize::from(stream.channels),
        );
    }

    /// Clear every stage without reallocating
    pub fn reset(&mut self) {
        for stage in self.stages_mut() {
            stage.reset();
        }
    }

    /// The chain in processing order
    fn stages_mut(&mut self) -> [&mut dyn AudioProcessor; 3] {
        [&mut self.crossover, &mut self.ducker, &mut self.analyzer]
    }

    /// Process `num_samples` of `buffer` in place
    ///
    /// `buffer` holds one slice per channel. MIDI offsets are relative to
    /// the start of the buffer and clamped into it. Blocks longer than the
    /// prepared maximum are split internally. Channels beyond stereo are
    /// zeroed. Before `prepare()` the buffer is left untouched.
    ///
    /// # Real-time Safety
    /// No allocations, no blocking locks.
    pub fn process(&mut self, buffer: &mut [&mut [f32]], midi: &[MidiEvent], num_samples: usize) {
        if !self.prepared {
            return;
        }

        let num_samples = buffer
            .iter()
            .map(|channel| channel.len())
            .fold(num_samples, usize::min);

        self.drain_commands();
        self.crossover
            .set_target_frequencies(self.crossover_target.0, self.crossover_target.1);
        self.apply_dirty_bands();

        self.record_midi_activity(midi);

        if num_samples > 0 {
            let chunk_size = self.context.max_block_size;
            let mut start = 0;
            while start < num_samples {
                let len = chunk_size.min(num_samples - start);
                self.process_chunk(buffer, midi, start, len, num_samples);
                start += len;
            }
        }

        for channel in buffer.iter_mut().skip(MAX_CHANNELS) {
            channel[..num_samples].fill(0.0);
        }

        self.publish_crossover();
        for band in 0..NUM_BANDS {
            if let Some(envelope) = self.ducker.band_envelope(band) {
                self.shared.set_band_envelope(band, envelope);
            }
        }
        self.shared.increment_blocks();
    }

    fn process_chunk(
        &mut self,
        buffer: &mut [&mut [f32]],
        midi: &[MidiEvent],
        start: usize,
        len: usize,
        block_len: usize,
    ) {
        let end = start + len;
        let channels = buffer.len().min(MAX_CHANNELS);

        self.ducker.clear_block_triggers();
        let last = block_len as i64 - 1;
        for event in midi {
            let offset = event.sample_offset.clamp(0, last) as usize;
            if (start..end).contains(&offset) {
                self.ducker
                    .push_midi_event(&event.message, (offset - start) as i64, len);
            }
        }

        let mut views: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
        for (view, channel) in views.iter_mut().zip(buffer.iter()) {
            *view = &channel[start..end];
        }
        self.crossover.process(&views[..channels], len);

        let (low, mid, high) = self.crossover.bands_mut();
        self.ducker.process_bands(low, mid, high, len);

        let bands = channels.min(self.crossover.num_channels());
        for (index, channel) in buffer.iter_mut().take(MAX_CHANNELS).enumerate() {
            let output = &mut channel[start..end];
            if index >= bands {
                output.fill(0.0);
                continue;
            }

            let low = &self.crossover.low_band().channel(index)[..len];
            let mid = &self.crossover.mid_band().channel(index)[..len];
            let high = &self.crossover.high_band().channel(index)[..len];
            for (i, out) in output.iter_mut().enumerate() {
                *out = low[i] + mid[i] + high[i];
            }
        }

        let mixed: [&[f32]; MAX_CHANNELS] = match &*buffer {
            [left, right, ..] => [&left[start..end], &right[start..end]],
            [mono] => [&mono[start..end], &[]],
            [] => [&[], &[]],
        };
        self.analyzer.push_block(&mixed[..channels], len);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                Command::SetCrossover {
                    low_mid_hz,
                    mid_high_hz,
                } => self.crossover_target = (low_mid_hz, mid_high_hz),
                Command::SetBandParameters { band, params } => {
                    if band < NUM_BANDS {
                        self.band_parameters[band] = params;
                        self.dirty_bands[band] = true;
                    }
                }
                Command::Reset => self.reset(),
            }
        }
    }

    fn apply_dirty_bands(&mut self) {
        for band in 0..NUM_BANDS {
            if std::mem::take(&mut self.dirty_bands[band]) {
                // index is always in range here
                let _ = self
                    .ducker
                    .set_band_parameters(band, self.band_parameters[band]);
            }
        }
    }

    fn record_midi_activity(&self, midi: &[MidiEvent]) {
        let mask = midi
            .iter()
            .filter_map(|event| event.message.channel())
            .fold(0_u16, |mask, channel| mask | channel_bit(channel));
        self.shared.record_midi_block(mask);
    }

    fn publish_crossover(&self) {
        self.shared.set_applied_crossover(
            self.crossover.applied_low_mid_hz(),
            self.crossover.applied_mid_high_hz(),
        );
    }

    /// Request new crossover frequencies; picked up at the next block
    pub fn set_crossover_frequencies(&mut self, low_mid_hz: f32, mid_high_hz: f32) {
        self.crossover_target = (low_mid_hz, mid_high_hz);
        self.crossover.set_target_frequencies(low_mid_hz, mid_high_hz);
    }

    /// Replace the settings of one band
    ///
    /// # Errors
    /// `EngineError::DspError` wrapping `InvalidBandIndex` for `band >= 3`.
    pub fn set_band_parameters(&mut self, band: usize, params: BandParameters) -> EngineResult<()> {
        if band >= NUM_BANDS {
            return Err(DspError::InvalidBandIndex(band).into());
        }
        self.band_parameters[band] = params;
        self.dirty_bands[band] = true;
        Ok(())
    }

    pub fn band_parameters(&self, band: usize) -> Option<&BandParameters> {
        self.band_parameters.get(band)
    }

    /// Constant crossover delay in samples
    pub fn latency_samples(&self) -> usize {
        self.crossover.latency_samples()
    }

    pub fn applied_crossover(&self) -> (f32, f32) {
        (
            self.crossover.applied_low_mid_hz(),
            self.crossover.applied_mid_high_hz(),
        )
    }

    pub fn pop_spectrum_frame(&self) -> Option<SpectrumFrame> {
        self.analyzer.pop_latest_frame()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot()
    }

    pub fn config(&self) -> &ChainerConfig {
        &self.config
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

impl Drop for MultiChainer {
    fn drop(&mut self) {
        debug!(
            "MultiChainer dropped after {} blocks",
            self.shared.blocks_processed()
        );
    }
}

/// Non-real-time handle to a running `MultiChainer`
///
/// Commands are queued and applied at the start of the next block.
pub struct ChainerController {
    commands: Producer<Command>,
    spectrum: SpectrumReader,
    shared: Arc<SharedState>,
}

impl ChainerController {
    pub fn set_crossover_frequencies(&mut self, low_mid_hz: f32, mid_high_hz: f32) -> EngineResult<()> {
        self.send(Command::SetCrossover {
            low_mid_hz,
            mid_high_hz,
        })
    }

    pub fn set_band_parameters(&mut self, band: usize, params: BandParameters) -> EngineResult<()> {
        if band >= NUM_BANDS {
            return Err(DspError::InvalidBandIndex(band).into());
        }
        self.send(Command::SetBandParameters { band, params })
    }

    pub fn reset(&mut self) -> EngineResult<()> {
        self.send(Command::Reset)
    }

    /// Send command to audio thread
    pub fn send(&mut self, command: Command) -> EngineResult<()> {
        self.commands.push(command).map_err(|_| {
            warn!("Command queue full, dropping {:?}", command);
            EngineError::CommandQueueFull
        })
    }

    /// Newest spectrum frame since the last call, if any
    pub fn pop_spectrum_frame(&self) -> Option<SpectrumFrame> {
        self.spectrum.pop_latest_frame()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot()
    }
}

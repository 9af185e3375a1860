//! Offline render of a synthetic signal through MultiChainer
//!
//! Usage: `chainer_render [config.json] [seconds]`
//!
//! Feeds a three-tone test signal with a kick note-on every half second,
//! then logs the observer snapshot and the loudest bin of the last spectrum
//! frame. Set `RUST_LOG` to override the default `chainer=debug` filter.

use std::f32::consts::PI;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainer_core::{ChainerConfig, MidiEvent, MidiMessage, MultiChainer, FFT_SIZE};

const TONES_HZ: [f32; 3] = [80.0, 1000.0, 8000.0];
const NOTE_INTERVAL_SECONDS: f32 = 0.5;
const DEFAULT_SECONDS: f32 = 4.0;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chainer=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ChainerConfig::from_json_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => ChainerConfig::default(),
    };
    let seconds = match args.next() {
        Some(value) => value
            .parse::<f32>()
            .with_context(|| format!("invalid duration: {}", value))?,
        None => DEFAULT_SECONDS,
    };

    render(config, seconds)
}

fn render(config: ChainerConfig, seconds: f32) -> Result<()> {
    let sample_rate = config.stream.sample_rate as f32;
    let block = config.stream.max_block_size as usize;
    let channels = usize::from(config.stream.channels);

    let mut chainer = MultiChainer::new(config).context("building processing unit")?;
    chainer.prepare_from_config();
    let controller = chainer.controller()?;

    info!(
        "Rendering {:.1} s at {} Hz, {} frames per block, latency {} samples",
        seconds,
        sample_rate,
        block,
        chainer.latency_samples()
    );

    let total = (seconds.max(0.0) * sample_rate) as usize;
    let note_interval = ((NOTE_INTERVAL_SECONDS * sample_rate) as usize).max(1);
    let mut storage = vec![vec![0.0_f32; block]; channels];
    let mut last_frame = None;
    let mut position = 0;

    while position < total {
        let len = block.min(total - position);

        for channel in storage.iter_mut() {
            for (i, sample) in channel[..len].iter_mut().enumerate() {
                let t = (position + i) as f32 / sample_rate;
                *sample = TONES_HZ.iter().map(|hz| (2.0 * PI * hz * t).sin()).sum::<f32>() / 3.0;
            }
        }

        // note-on at every multiple of the interval inside this block
        let first_note = (position + note_interval - 1) / note_interval * note_interval;
        let events: Vec<MidiEvent> = (first_note..position + len)
            .step_by(note_interval)
            .map(|at| MidiEvent::new(MidiMessage::note_on(1, 36, 110), (at - position) as i64))
            .collect();

        let mut buffer: Vec<&mut [f32]> = storage.iter_mut().map(|c| &mut c[..len]).collect();
        chainer.process(&mut buffer, &events, len);

        if let Some(frame) = controller.pop_spectrum_frame() {
            last_frame = Some(frame);
        }
        position += len;
    }

    let snapshot = controller.snapshot();
    info!("Snapshot: {}", snapshot.to_json()?);

    match last_frame {
        Some(frame) => {
            let (bin, db) = frame
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, db)| if db > best.1 { (i, db) } else { best });
            let hz = bin as f32 * sample_rate / FFT_SIZE as f32;
            info!("Spectrum peak: bin {} ({:.0} Hz) at {:.1} dB", bin, hz, db);
        }
        None => info!("Render too short for a spectrum frame ({} samples)", FFT_SIZE),
    }

    Ok(())
}

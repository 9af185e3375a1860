//! DSP Error Types
//!
//! Nothing on the audio path returns these. They cover setup and control
//! calls made from non-real-time threads.

use thiserror::Error;

/// Errors that can occur during DSP setup or control
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Invalid band index: {0} (must be 0-2)")]
    InvalidBandIndex(usize),

    #[error("Failed to spawn coefficient designer thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

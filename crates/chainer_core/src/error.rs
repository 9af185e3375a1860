//! Engine Error Types

use thiserror::Error;

/// Errors that can occur while building or controlling the processing unit
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("DSP error: {0}")]
    DspError(#[from] chainer_dsp::DspError),

    #[error("Command queue full - audio thread is not draining commands")]
    CommandQueueFull,

    #[error("Controller already taken")]
    ControllerTaken,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

//! Message Types for Thread Communication
//!
//! Commands flow from the controller thread -> audio thread over a
//! wait-free `rtrb` ring buffer. The audio thread drains it at the start of
//! every block.

use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use chainer_dsp::BandParameters;

/// Commands sent from a controller to the processing unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    /// Move the crossover points; applied once the new filters are designed
    SetCrossover { low_mid_hz: f32, mid_high_hz: f32 },

    /// Replace the settings of one band (index already validated)
    SetBandParameters { band: usize, params: BandParameters },

    /// Clear filter histories, envelopes and the analyzer window
    Reset,
}

/// Create the SPSC command queue
pub(crate) fn command_queue(capacity: usize) -> (Producer<Command>, Consumer<Command>) {
    RingBuffer::new(capacity.max(1))
}

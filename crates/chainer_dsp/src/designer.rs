//! Background FIR coefficient designer
//!
//! The audio thread never designs filters. It records the requested crossover
//! pair and wakes this worker, which designs both lowpass filters into the
//! inactive half of a double-buffered coefficient bank and publishes it as
//! pending. The audio thread picks the pending slot up at the start of a
//! later block with `try_lock`, so it never waits on the worker.
//!
//! ```text
//!  audio thread                      designer thread
//!  ────────────                      ───────────────
//!  set_target_frequencies()
//!    requested pair (atomics) ─────▶ wake ─▶ design into scratch
//!    redesign flag, wake                     lock ─ copy into inactive slot
//!                                            pending = slot ─ unlock
//!  process()
//!    try_lock ─ pending? ─ copy taps into filters, active = slot
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::crossover::sanitize_crossovers;
use crate::error::DspError;
use crate::fir::design_windowed_sinc_lowpass;

/// How long the worker sleeps between checks when nobody wakes it
const WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on how long dropping the crossover waits for the worker
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1000);

const NO_PENDING: usize = usize::MAX;

/// One half of the double buffer
#[derive(Debug, Clone)]
pub(crate) struct CoefficientSlot {
    pub(crate) low_mid: Vec<f32>,
    pub(crate) mid_high: Vec<f32>,
    /// (low/mid Hz, mid/high Hz) the taps were designed for
    pub(crate) frequencies: (f32, f32),
}

impl CoefficientSlot {
    fn new(tap_count: usize, frequencies: (f32, f32)) -> Self {
        Self {
            low_mid: vec![0.0; tap_count],
            mid_high: vec![0.0; tap_count],
            frequencies,
        }
    }

    fn design(&mut self, frequencies: (f32, f32), sample_rate: f64) {
        design_windowed_sinc_lowpass(&mut self.low_mid, frequencies.0, sample_rate);
        design_windowed_sinc_lowpass(&mut self.mid_high, frequencies.1, sample_rate);
        self.frequencies = frequencies;
    }
}

/// State shared between the crossover (audio thread) and the worker
///
/// Scalars are atomics with one writer each. f32/f64 values are stored as
/// their bit patterns. The coefficient vectors are only touched under
/// `slots`, which the audio thread only ever `try_lock`s.
pub(crate) struct DesignerShared {
    prepared: AtomicBool,
    redesign_requested: AtomicBool,
    exit: AtomicBool,
    requested_low_mid_bits: AtomicU32,
    requested_mid_high_bits: AtomicU32,
    sample_rate_bits: AtomicU64,
    active_slot: AtomicUsize,
    pending_slot: AtomicUsize,
    /// Bumped by every synchronous design; a worker result from an older
    /// generation is discarded
    generation: AtomicU64,
    slots: Mutex<[CoefficientSlot; 2]>,
}

impl DesignerShared {
    pub(crate) fn new(tap_count: usize, initial: (f32, f32), sample_rate: f64) -> Self {
        Self {
            prepared: AtomicBool::new(false),
            redesign_requested: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            requested_low_mid_bits: AtomicU32::new(initial.0.to_bits()),
            requested_mid_high_bits: AtomicU32::new(initial.1.to_bits()),
            sample_rate_bits: AtomicU64::new(sample_rate.to_bits()),
            active_slot: AtomicUsize::new(0),
            pending_slot: AtomicUsize::new(NO_PENDING),
            generation: AtomicU64::new(0),
            slots: Mutex::new([
                CoefficientSlot::new(tap_count, initial),
                CoefficientSlot::new(tap_count, initial),
            ]),
        }
    }

    pub(crate) fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub(crate) fn set_prepared(&self, prepared: bool) {
        self.prepared.store(prepared, Ordering::Release);
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate_bits.load(Ordering::Acquire))
    }

    pub(crate) fn requested(&self) -> (f32, f32) {
        (
            f32::from_bits(self.requested_low_mid_bits.load(Ordering::Acquire)),
            f32::from_bits(self.requested_mid_high_bits.load(Ordering::Acquire)),
        )
    }

    /// Store a new requested pair and return the previous one
    pub(crate) fn exchange_requested(&self, pair: (f32, f32)) -> (f32, f32) {
        let low = self
            .requested_low_mid_bits
            .swap(pair.0.to_bits(), Ordering::AcqRel);
        let high = self
            .requested_mid_high_bits
            .swap(pair.1.to_bits(), Ordering::AcqRel);
        (f32::from_bits(low), f32::from_bits(high))
    }

    pub(crate) fn request_redesign(&self) {
        self.redesign_requested.store(true, Ordering::Release);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn active_slot(&self) -> usize {
        self.active_slot.load(Ordering::Acquire)
    }

    /// Synchronously design slot 0 for the current requested pair and make
    /// it active, dropping any pending slot and any design in flight
    ///
    /// Blocks on the slot lock. Only for `prepare()`.
    pub(crate) fn design_initial(&self, sample_rate: f64) -> CoefficientSlot {
        self.sample_rate_bits
            .store(sample_rate.to_bits(), Ordering::Release);

        let (low, high) = self.requested();
        let frequencies = sanitize_crossovers(low, high, sample_rate);

        let mut slots = self.slots.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        slots[0].design(frequencies, sample_rate);
        slots[1].frequencies = frequencies;
        self.active_slot.store(0, Ordering::Release);
        self.pending_slot.store(NO_PENDING, Ordering::Release);
        self.redesign_requested.store(false, Ordering::Release);

        slots[0].clone()
    }

    /// Copy freshly designed taps into the inactive slot and mark it pending
    ///
    /// Returns `None` and leaves the slots alone if a synchronous design ran
    /// since `generation` was read.
    fn publish(
        &self,
        generation: u64,
        low_mid: &[f32],
        mid_high: &[f32],
        frequencies: (f32, f32),
    ) -> Option<usize> {
        let mut slots = self.slots.lock();
        if self.generation() != generation {
            return None;
        }
        let write_slot = 1 - self.active_slot.load(Ordering::Acquire);

        let slot = &mut slots[write_slot];
        slot.low_mid.copy_from_slice(low_mid);
        slot.mid_high.copy_from_slice(mid_high);
        slot.frequencies = frequencies;

        self.pending_slot.store(write_slot, Ordering::Release);
        Some(write_slot)
    }

    /// Hand a pending slot to `apply` and make it active
    ///
    /// Returns false without waiting if the worker holds the lock or nothing
    /// is pending.
    ///
    /// # Real-time Safety
    /// Never blocks, never allocates.
    #[inline]
    pub(crate) fn apply_pending(&self, apply: impl FnOnce(&CoefficientSlot)) -> bool {
        let Some(slots) = self.slots.try_lock() else {
            return false;
        };

        let pending = self.pending_slot.swap(NO_PENDING, Ordering::AcqRel);
        if pending == NO_PENDING {
            return false;
        }

        apply(&slots[pending]);
        self.active_slot.store(pending, Ordering::Release);
        true
    }
}

/// Owns the designer thread and its wake/finish signals
pub(crate) struct DesignerWorker {
    shared: Arc<DesignerShared>,
    wake: Sender<()>,
    finished: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DesignerWorker {
    pub(crate) fn spawn(shared: Arc<DesignerShared>, tap_count: usize) -> Result<Self, DspError> {
        // Capacity 1: repeated wakes before the worker runs collapse into one
        let (wake, wake_rx) = bounded::<()>(1);
        let (finished_tx, finished) = bounded::<()>(0);

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("chainer-fir-designer".into())
            .spawn(move || {
                designer_thread_main(thread_shared, wake_rx, tap_count);
                drop(finished_tx);
            })?;

        Ok(Self {
            shared,
            wake,
            finished,
            handle: Some(handle),
        })
    }

    /// Wake the worker; never blocks
    #[inline]
    pub(crate) fn wake(&self) {
        // Full means a wake is already pending
        let _ = self.wake.try_send(());
    }

    /// Signal exit, wake, wait up to `timeout` for the thread to finish, join
    ///
    /// A thread that does not finish in time is detached.
    pub(crate) fn stop(&mut self, timeout: Duration) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.shared.exit.store(true, Ordering::Release);
        self.wake();

        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Coefficient designer did not stop within {:?}, detaching",
                    timeout
                );
            }
            // The sender is only ever dropped, so disconnection means done
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("Coefficient designer thread panicked");
                }
            }
        }
    }
}

impl Drop for DesignerWorker {
    fn drop(&mut self) {
        self.stop(SHUTDOWN_TIMEOUT);
    }
}

fn designer_thread_main(shared: Arc<DesignerShared>, wake: Receiver<()>, tap_count: usize) {
    debug!("Coefficient designer started ({} taps)", tap_count);

    let mut low_mid = vec![0.0_f32; tap_count];
    let mut mid_high = vec![0.0_f32; tap_count];

    loop {
        if let Err(RecvTimeoutError::Disconnected) = wake.recv_timeout(WAIT_INTERVAL) {
            break;
        }

        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        if !shared.is_prepared() {
            continue;
        }

        if !shared.redesign_requested.swap(false, Ordering::AcqRel) {
            continue;
        }

        let generation = shared.generation();
        let (low, high) = shared.requested();
        let sample_rate = shared.sample_rate();
        let frequencies = sanitize_crossovers(low, high, sample_rate);

        // Design outside the lock; only the copy happens under it
        design_windowed_sinc_lowpass(&mut low_mid, frequencies.0, sample_rate);
        design_windowed_sinc_lowpass(&mut mid_high, frequencies.1, sample_rate);

        match shared.publish(generation, &low_mid, &mid_high, frequencies) {
            Some(slot) => debug!(
                "Designed crossover {:.1} Hz / {:.1} Hz into slot {}",
                frequencies.0, frequencies.1, slot
            ),
            None => debug!(
                "Discarded crossover {:.1} Hz / {:.1} Hz, re-prepared during design",
                frequencies.0, frequencies.1
            ),
        }
    }

    debug!("Coefficient designer stopped");
}

//! Per-object sync watchdog.
//!
//! Each sync thread owns one [`WatchSlot`]. Before running an object's
//! callbacks the thread arms its slot with the object id and a
//! monotonic start time; the returned [`WatchGuard`] disarms it again.
//! A background thread scans the slots every poll interval and hands
//! any slot armed for longer than the timeout to the expiry handler.
//!
//! The default handler logs the offending object and aborts the
//! process: a callback that hangs while holding an object lock cannot
//! be recovered from safely.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use gridsync_core::ObjectId;
use tracing::{debug, error};

const DISARMED: u64 = u64::MAX;
const REPORTED: u64 = u64::MAX - 1;

/// Monotonic nanoseconds since the first call in this process.
///
/// Relative comparisons only; not wall-clock time.
pub(crate) fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(*epoch).as_nanos() as u64
}

/// One sync thread's arm state. Cache-line padded to avoid false
/// sharing between workers.
#[repr(align(128))]
#[derive(Debug)]
pub struct WatchSlot {
    armed_at_ns: AtomicU64,
    object: AtomicU32,
}

impl WatchSlot {
    fn new() -> Self {
        Self {
            armed_at_ns: AtomicU64::new(DISARMED),
            object: AtomicU32::new(0),
        }
    }

    fn arm(&self, object: ObjectId) {
        self.object.store(object.0, Ordering::Relaxed);
        self.armed_at_ns.store(monotonic_nanos(), Ordering::Release);
    }

    fn disarm(&self) {
        self.armed_at_ns.store(DISARMED, Ordering::Release);
    }

    /// Whether an object is currently running under this slot.
    pub fn is_armed(&self) -> bool {
        self.armed_at_ns.load(Ordering::Acquire) < REPORTED
    }
}

/// A sync that ran past the watchdog timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry {
    /// Slot index: 0 is the coordinating thread, workers follow.
    pub slot: usize,
    /// The object whose sync was running.
    pub object: ObjectId,
    /// How long it had been running when detected.
    pub elapsed: Duration,
}

/// Reaction to an [`Expiry`]. Runs on the watchdog thread.
pub type ExpiryHandler = Arc<dyn Fn(&Expiry) + Send + Sync>;

/// Handler that logs the object and aborts the process.
pub fn abort_on_expiry() -> ExpiryHandler {
    Arc::new(|expiry: &Expiry| {
        error!(
            object = %expiry.object,
            slot = expiry.slot,
            elapsed_ms = expiry.elapsed.as_millis() as u64,
            "object sync exceeded the watchdog timeout, aborting"
        );
        std::process::abort();
    })
}

/// Disarms its slot when dropped.
#[must_use = "the slot is disarmed as soon as the guard is dropped"]
pub struct WatchGuard<'a> {
    slot: Option<&'a WatchSlot>,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot {
            slot.disarm();
        }
    }
}

/// Slot table plus the optional scanning thread.
pub struct Watchdog {
    slots: Arc<[WatchSlot]>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// A slot table with no scanning thread. Arming is a no-op.
    pub fn disabled(slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| WatchSlot::new()).collect(),
            stop_tx: None,
            handle: None,
        }
    }

    /// Start the scanning thread.
    ///
    /// The poll interval is a quarter of `timeout`, at least 1 ms.
    pub fn start(
        slots: usize,
        timeout: Duration,
        handler: ExpiryHandler,
    ) -> std::io::Result<Self> {
        let slots: Arc<[WatchSlot]> = (0..slots).map(|_| WatchSlot::new()).collect();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let poll = (timeout / 4).max(Duration::from_millis(1));
        let timeout_ns = timeout.as_nanos() as u64;
        let scanned = Arc::clone(&slots);
        let handle = std::thread::Builder::new()
            .name("gridsync-watchdog".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(poll) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        check_expired(&scanned, timeout_ns, &handler);
                    }
                }
            })?;
        debug!(slots = slots.len(), timeout_ms = timeout.as_millis() as u64, "watchdog started");
        Ok(Self {
            slots,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Whether a scanning thread is running.
    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Arm `slot` for `object` until the guard drops.
    pub fn arm(&self, slot: usize, object: ObjectId) -> WatchGuard<'_> {
        if !self.is_enabled() {
            return WatchGuard { slot: None };
        }
        let slot = self.slots.get(slot);
        if let Some(s) = slot {
            s.arm(object);
        }
        WatchGuard { slot }
    }
}

/// Report every slot armed for longer than `timeout_ns`, once per arm.
fn check_expired(slots: &[WatchSlot], timeout_ns: u64, handler: &ExpiryHandler) {
    let now_ns = monotonic_nanos();
    for (idx, slot) in slots.iter().enumerate() {
        let armed_at = slot.armed_at_ns.load(Ordering::Acquire);
        if armed_at >= REPORTED {
            continue;
        }
        let held = now_ns.saturating_sub(armed_at);
        if held <= timeout_ns {
            continue;
        }
        let object = ObjectId(slot.object.load(Ordering::Relaxed));
        // Losing the exchange means the slot was disarmed or re-armed.
        if slot
            .armed_at_ns
            .compare_exchange(armed_at, REPORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            handler(&Expiry {
                slot: idx,
                object,
                elapsed: Duration::from_nanos(held),
            });
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("slots", &self.slots.len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

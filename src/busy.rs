use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Progress of the render currently holding the gate.
///
/// `ticket` changes on every acquire and release, so a reporter that
/// captured the ticket of an earlier render can never write into a later one.
#[derive(Debug, Default)]
struct ProgressSlot {
    ticket: u64,
    value: Option<f32>,
}

/// Process-wide single-flight gate for render submissions.
///
/// Acquiring is a compare-and-set on an atomic flag: at most one
/// [`BusyGuard`] exists at any time. Losers get `None` and are expected to
/// drop the attempt rather than wait.
#[derive(Debug, Default)]
pub struct BusyGate {
    busy: AtomicBool,
    progress: Mutex<ProgressSlot>,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, ProgressSlot> {
        // The slot holds plain data, a poisoned lock is still consistent.
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to take the gate. Returns `None` when a render is in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let ticket = {
            let mut slot = self.slot();
            slot.ticket += 1;
            slot.value = None;
            slot.ticket
        };
        Some(BusyGuard {
            gate: Arc::clone(self),
            ticket,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Last reported progress fraction, `None` when idle or unknown.
    pub fn progress(&self) -> Option<f32> {
        self.slot().value
    }

    /// Ticket of the current (or last) holder.
    pub fn ticket(&self) -> u64 {
        self.slot().ticket
    }

    /// Whether `ticket` still identifies the render holding the gate.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.is_busy() && self.slot().ticket == ticket
    }

    /// Record a progress fraction for the render identified by `ticket`.
    /// Stale tickets are ignored; returns whether the value was stored.
    pub fn report_progress(&self, ticket: u64, value: f32) -> bool {
        let mut slot = self.slot();
        if slot.ticket != ticket || !self.is_busy() {
            return false;
        }
        slot.value = Some(value.clamp(0.0, 1.0));
        true
    }

    /// Sleep in `tick` steps until no render is in flight.
    pub async fn wait_idle(&self, tick: Duration) {
        while self.is_busy() {
            tokio::time::sleep(tick).await;
        }
    }
}

/// RAII holder of the [`BusyGate`]. Dropping it clears the progress value
/// and then releases the gate, whatever the render outcome was.
#[derive(Debug)]
pub struct BusyGuard {
    gate: Arc<BusyGate>,
    ticket: u64,
}

impl BusyGuard {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn gate(&self) -> &Arc<BusyGate> {
        &self.gate
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        {
            let mut slot = self.gate.slot();
            slot.value = None;
            slot.ticket += 1;
        }
        self.gate.busy.store(false, Ordering::Release);
    }
}

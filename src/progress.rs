use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::busy::BusyGate;
use crate::events::{EventSink, PaintEvent};
use crate::Backend;

/// Poll the backend's progress while the render identified by `ticket`
/// holds the gate.
///
/// The loop checks the gate at the top of every iteration and exits once the
/// render has released it; it is never cancelled from outside. Values are
/// stored through the ticket, so a response that lands after the release is
/// dropped instead of resurrecting a stale fraction.
pub async fn run_progress_reporter<B: Backend>(
    backend: Arc<B>,
    gate: Arc<BusyGate>,
    ticket: u64,
    interval: Duration,
    events: EventSink,
) {
    loop {
        if !gate.is_current(ticket) {
            break;
        }

        let resp = backend.progress().await;
        if resp.status != 200 {
            if gate.is_current(ticket) {
                events.notice(format!("Error code returned: HTTP {}", resp.status));
            }
        } else if let Some(fraction) = resp.progress {
            if gate.report_progress(ticket, fraction) {
                events.emit(PaintEvent::Progress(fraction.clamp(0.0, 1.0)));
            }
        }

        tokio::time::sleep(interval).await;
    }
    debug!(ticket, "Progress reporter stopped");
}

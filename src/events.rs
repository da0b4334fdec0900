use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::types::RenderMode;

/// Notifications from the scheduler to whatever front end is listening.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintEvent {
    /// Transient one-line message (the on-screen text of a GUI).
    Notice(String),
    /// Window caption after a successful render.
    Caption(String),
    /// A submission left the busy gate and went out.
    RenderStarted { mode: RenderMode },
    /// The response was applied (or rejected); the gate is released.
    RenderFinished { status: u16 },
    /// Progress fraction of the render in flight.
    Progress(f32),
    /// The canvas bitmap changed and should be redrawn.
    CanvasUpdated,
}

/// Cloneable sending half for [`PaintEvent`]s.
///
/// Emitting never fails: a dropped receiver (or a sink built with
/// [`EventSink::disabled`]) silently discards events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<PaintEvent>>,
}

impl EventSink {
    /// Create a sink and its receiving end.
    pub fn channel() -> (Self, UnboundedReceiver<PaintEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PaintEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(PaintEvent::Notice(text.into()));
    }
}

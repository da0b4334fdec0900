//! # sd-paint
//!
//! Sketch-to-image front end for ControlNet-capable Stable Diffusion servers.
//!
//! ## Features
//!
//! - Debounced rendering: bursts of strokes coalesce into one request
//! - Single-flight submissions behind an atomic busy gate
//! - Progress polling while a render is in flight
//! - Batch renders tiled into a grid, with "pick seed from batch"
//! - img2img mode that re-renders a watched file whenever it changes
//! - `-dist` config files, presets and autosave rotation
//!
//! ## Quick Start
//!
//! 1. Load a [`PaintConfig`] and the per-mode template with [`load_config`]
//! 2. Build a [`Session`] and an [`SdClient`] (or any [`Backend`])
//! 3. Create a [`RenderScheduler`] and call [`RenderScheduler::trigger()`]
//!    after strokes, or [`RenderScheduler::render_now()`] for instant renders
//! 4. Listen to [`PaintEvent`]s for notices, captions and canvas updates

pub mod busy;
pub mod canvas;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod output;
pub mod payload;
pub mod preset;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod types;

pub use busy::{BusyGate, BusyGuard};
pub use canvas::{BatchImage, Canvas, Rect};
pub use client::SdClient;
pub use config::{load_config, update_config, PaintConfig, SchedulerConfig, SchedulerConfigBuilder};
pub use error::{PaintError, Result};
pub use events::{EventSink, PaintEvent};
pub use preset::{PresetKind, PresetStore};
pub use scheduler::{RenderOutcome, RenderScheduler, SchedulerState, SkipReason};
pub use session::Session;
pub use types::{
    ApiResponse, Catalog, ClipSkipKey, DetectRequest, DetectResponse, ProgressResponse,
    RenderImages, RenderInfo, RenderMode, ServerOptions,
};

use serde_json::Value;
use std::future::Future;

/// The generation server as seen by the scheduler.
///
/// [`SdClient`] is the HTTP implementation. Every method reports failures
/// through a status code instead of an error, so an implementation must
/// turn transport problems into a status (503 for "unreachable").
///
/// # Example
///
/// ```ignore
/// use sd_paint::*;
///
/// struct Offline;
///
/// impl Backend for Offline {
///     async fn submit(&self, _mode: RenderMode, _payload: serde_json::Value) -> ApiResponse {
///         ApiResponse::unavailable()
///     }
///     async fn progress(&self) -> ProgressResponse {
///         ProgressResponse::default()
///     }
///     async fn detect(&self, _request: DetectRequest) -> DetectResponse {
///         DetectResponse::default()
///     }
///     async fn interrupt(&self) -> u16 { 503 }
///     async fn skip(&self) -> u16 { 503 }
/// }
/// ```
pub trait Backend: Send + Sync + 'static {
    /// Submit a render payload for `mode`.
    fn submit(
        &self,
        mode: RenderMode,
        payload: Value,
    ) -> impl Future<Output = ApiResponse> + Send;

    /// Poll generation progress.
    fn progress(&self) -> impl Future<Output = ProgressResponse> + Send;

    /// Run a ControlNet detector.
    fn detect(&self, request: DetectRequest) -> impl Future<Output = DetectResponse> + Send;

    /// Interrupt the current generation. Returns the HTTP status.
    fn interrupt(&self) -> impl Future<Output = u16> + Send;

    /// Skip the current image. Returns the HTTP status.
    fn skip(&self) -> impl Future<Output = u16> + Send;
}

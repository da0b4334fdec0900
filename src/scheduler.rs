use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::busy::{BusyGate, BusyGuard};
use crate::canvas::{decode_b64, decode_image, Canvas};
use crate::config::{load_config, SchedulerConfig};
use crate::error::{PaintError, Result};
use crate::events::{EventSink, PaintEvent};
use crate::output::{save_render, Autosave};
use crate::payload::{build_img2img_payload, build_txt2img_payload, classify_images};
use crate::preset::{PresetKind, PresetStore};
use crate::progress::run_progress_reporter;
use crate::session::Session;
use crate::types::*;
use crate::Backend;

/// Where the scheduler is in its render cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    /// Waiting for the drawing to go quiet.
    Debouncing = 1,
    /// Holding the busy gate, assembling the payload.
    Submitting = 2,
    /// Request sent, waiting for the server.
    AwaitingResult = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Debouncing,
            2 => SchedulerState::Submitting,
            3 => SchedulerState::AwaitingResult,
            _ => SchedulerState::Idle,
        }
    }
}

/// Why a render attempt made no request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another render holds the busy gate.
    Busy,
    /// The img2img source has not changed since the last render.
    Unchanged,
    /// img2img mode without a source file.
    NoSource,
}

/// Result of one render attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Skipped(SkipReason),
    /// Images were applied to the canvas.
    Rendered {
        seed: i64,
        prompt: String,
        images: usize,
    },
    /// The server answered with a non-success status (503 when unreachable).
    Failed { status: u16 },
    /// A local resource error stopped the attempt.
    Aborted(String),
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| PaintError::Other(e.to_string()))
}

/// Next debounce window in the `0 -> 0.5 -> ... -> 2.0 -> 0` cycle.
pub fn next_render_wait(current: Duration) -> Duration {
    if current >= Duration::from_secs(2) {
        Duration::ZERO
    } else {
        let steps = (current.as_millis() / 500) as u64 + 1;
        Duration::from_millis(steps * 500)
    }
}

/// Decides when to render, keeps at most one render in flight, and applies
/// results to the shared canvas.
///
/// Strokes call [`note_draw`](Self::note_draw) and, when a stroke ends,
/// [`trigger`](Self::trigger). Commands that should render immediately go
/// through [`render_now`](Self::render_now). Each render runs on its own
/// task alongside a progress reporter; neither blocks the caller.
pub struct RenderScheduler<B: Backend> {
    backend: Arc<B>,
    config: SchedulerConfig,
    session: Mutex<Session>,
    canvas: Mutex<Canvas>,
    presets: Option<Mutex<PresetStore>>,
    gate: Arc<BusyGate>,
    events: EventSink,
    state: AtomicU8,
    last_draw: Mutex<Instant>,
    render_wait: Mutex<Duration>,
    instant_render: AtomicBool,
    debounce_pending: AtomicBool,
    running: AtomicBool,
    source: Option<PathBuf>,
    source_mtime: Mutex<Option<SystemTime>>,
}

impl<B: Backend> RenderScheduler<B> {
    pub fn new(backend: Arc<B>, session: Session, config: SchedulerConfig, events: EventSink) -> Self {
        let canvas = Canvas::new(session.width, session.height, config.mode);
        let render_wait = config.render_wait;
        Self {
            backend,
            config,
            session: Mutex::new(session),
            canvas: Mutex::new(canvas),
            presets: None,
            gate: Arc::new(BusyGate::new()),
            events,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            last_draw: Mutex::new(Instant::now()),
            render_wait: Mutex::new(render_wait),
            instant_render: AtomicBool::new(false),
            debounce_pending: AtomicBool::new(false),
            running: AtomicBool::new(true),
            source: None,
            source_mtime: Mutex::new(None),
        }
    }

    /// Attach a preset store for the preset commands.
    pub fn with_presets(mut self, presets: PresetStore) -> Self {
        self.presets = Some(Mutex::new(presets));
        self
    }

    /// Watched source file for img2img mode.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Back to `Debouncing` if a trigger arrived mid-render, else `Idle`.
    fn settle_state(&self) {
        if self.debounce_pending.load(Ordering::Acquire) {
            self.set_state(SchedulerState::Debouncing);
        } else {
            self.set_state(SchedulerState::Idle);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Progress of the render in flight; `None` when idle or unknown.
    pub fn progress(&self) -> Option<f32> {
        self.gate.progress()
    }

    pub fn gate(&self) -> &Arc<BusyGate> {
        &self.gate
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Snapshot of the session.
    pub fn session(&self) -> Result<Session> {
        Ok(lock(&self.session)?.clone())
    }

    /// Snapshot of the canvas.
    pub fn canvas(&self) -> Result<Canvas> {
        Ok(lock(&self.canvas)?.clone())
    }

    /// Run `f` against the live canvas, e.g. to paint strokes.
    pub fn with_canvas<R>(&self, f: impl FnOnce(&mut Canvas) -> R) -> Result<R> {
        Ok(f(&mut *lock(&self.canvas)?))
    }

    pub fn render_wait(&self) -> Duration {
        lock(&self.render_wait)
            .map(|w| *w)
            .unwrap_or(self.config.render_wait)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the img2img watch loop at its next iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    // ── Triggering ──────────────────────────────────────────────────

    /// Record drawing activity; restarts the debounce window.
    pub fn note_draw(&self) {
        if let Ok(mut last) = lock(&self.last_draw) {
            *last = Instant::now();
        }
    }

    /// Make the next debounce check pass immediately.
    pub fn request_instant_render(&self) {
        self.instant_render.store(true, Ordering::Release);
    }

    /// Schedule a render once drawing has been quiet for the render wait.
    ///
    /// At most one debounce task is pending; extra triggers while it waits
    /// are absorbed by it.
    pub fn trigger(self: &Arc<Self>) {
        if self
            .debounce_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _ = self.state.compare_exchange(
            SchedulerState::Idle as u8,
            SchedulerState::Debouncing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.wait_quiet().await;
            scheduler.debounce_pending.store(false, Ordering::Release);
            let outcome = scheduler.render().await;
            if matches!(outcome, RenderOutcome::Skipped(_))
                && !scheduler.debounce_pending.load(Ordering::Acquire)
            {
                // a skipped render never settles the state itself
                let _ = scheduler.state.compare_exchange(
                    SchedulerState::Debouncing as u8,
                    SchedulerState::Idle as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            debug!(?outcome, "Debounced render finished");
        });
    }

    /// A stroke ended: note it and schedule a render.
    pub fn stroke_finished(self: &Arc<Self>) {
        self.note_draw();
        self.trigger();
    }

    /// Render on the next scheduler tick, skipping the debounce window.
    pub fn render_now(self: &Arc<Self>) {
        self.request_instant_render();
        self.trigger();
    }

    async fn wait_quiet(&self) {
        loop {
            if self.instant_render.swap(false, Ordering::AcqRel) {
                return;
            }
            let since = lock(&self.last_draw)
                .map(|last| last.elapsed())
                .unwrap_or(Duration::MAX);
            if since >= self.render_wait() {
                return;
            }
            tokio::time::sleep(self.config.debounce_tick).await;
        }
    }

    // ── Rendering ───────────────────────────────────────────────────

    /// One render attempt in the configured mode. Returns without a request
    /// when another render holds the busy gate.
    pub async fn render(&self) -> RenderOutcome {
        match self.config.mode {
            RenderMode::Txt2Img => self.render_sketch().await,
            RenderMode::Img2Img => self.render_source(true).await,
        }
    }

    async fn render_sketch(&self) -> RenderOutcome {
        let Some(guard) = self.gate.try_acquire() else {
            debug!("Render in flight, dropping attempt");
            return RenderOutcome::Skipped(SkipReason::Busy);
        };
        self.set_state(SchedulerState::Submitting);
        // this render serves any pending instant request
        self.instant_render.store(false, Ordering::Release);

        let prepared = self.prepare_sketch_payload();
        let (payload, hr_scale) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return self.abort(guard, e),
        };
        self.submit(guard, RenderMode::Txt2Img, payload, hr_scale).await
    }

    fn prepare_sketch_payload(&self) -> Result<(Value, f64)> {
        let template = load_config(&self.config.template_path())?;
        let session = lock(&self.session)?;
        let sketch = lock(&self.canvas)?.encode_sketch(!session.use_invert_module)?;
        let payload = build_txt2img_payload(template, &session, sketch, self.config.hr_steps_floor);
        Ok((payload, session.hr_scale))
    }

    /// Render the img2img source if it changed since the last render (or
    /// unconditionally with `force`).
    pub async fn render_source(&self, force: bool) -> RenderOutcome {
        let Some(path) = self.source.clone() else {
            return RenderOutcome::Skipped(SkipReason::NoSource);
        };
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                let e = PaintError::io(format!("Cannot read {}", path.display()), e);
                self.events.notice(e.to_string());
                return RenderOutcome::Aborted(e.to_string());
            }
        };
        if !force {
            match lock(&self.source_mtime) {
                Ok(last) if *last == Some(modified) => {
                    return RenderOutcome::Skipped(SkipReason::Unchanged)
                }
                _ => {}
            }
        }

        let Some(guard) = self.gate.try_acquire() else {
            // mtime stays unrecorded so the next watch tick retries
            return RenderOutcome::Skipped(SkipReason::Busy);
        };
        self.set_state(SchedulerState::Submitting);
        if let Ok(mut last) = lock(&self.source_mtime) {
            *last = Some(modified);
        }

        match self.prepare_source_payload(&path) {
            Ok(payload) => self.submit(guard, RenderMode::Img2Img, payload, 1.0).await,
            Err(e) => self.abort(guard, e),
        }
    }

    fn prepare_source_payload(&self, path: &Path) -> Result<Value> {
        let bytes = std::fs::read(path)
            .map_err(|e| PaintError::io(format!("Cannot read {}", path.display()), e))?;
        let (width, height) = decode_image(&bytes)?.dimensions();
        let template = load_config(&self.config.template_path())?;

        let mut session = lock(&self.session)?;
        if (session.init_width, session.init_height) != (width as f64, height as f64) {
            session.set_source_size(width, height);
            let mut canvas = lock(&self.canvas)?;
            *canvas = Canvas::new(session.width, session.height, self.config.mode);
            self.events.emit(PaintEvent::CanvasUpdated);
        }
        let encoded = BASE64.encode(&bytes);
        Ok(build_img2img_payload(template, &session, encoded, (width, height)))
    }

    /// Watch the img2img source, rendering whenever it changes, until
    /// [`shutdown`](Self::shutdown).
    pub async fn watch_source(self: Arc<Self>) {
        info!(
            "Watching {}",
            self.source
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
        while self.is_running() {
            let outcome = self.render_source(false).await;
            if !matches!(outcome, RenderOutcome::Skipped(SkipReason::Unchanged)) {
                debug!(?outcome, "Watch tick");
            }
            tokio::time::sleep(self.config.watch_interval).await;
        }
    }

    fn abort(&self, guard: BusyGuard, error: PaintError) -> RenderOutcome {
        warn!("Render aborted: {}", error);
        self.events.notice(error.to_string());
        drop(guard);
        self.settle_state();
        RenderOutcome::Aborted(error.to_string())
    }

    async fn submit(&self, guard: BusyGuard, mode: RenderMode, payload: Value, hr_scale: f64) -> RenderOutcome {
        self.events.emit(PaintEvent::RenderStarted { mode });
        tokio::spawn(run_progress_reporter(
            Arc::clone(&self.backend),
            Arc::clone(&self.gate),
            guard.ticket(),
            self.config.progress_interval,
            self.events.clone(),
        ));

        self.set_state(SchedulerState::AwaitingResult);
        let resp = self.backend.submit(mode, payload).await;
        let status = resp.status;
        let outcome = match self.apply_response(resp, mode, hr_scale) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to apply render: {}", e);
                self.events.notice(e.to_string());
                RenderOutcome::Aborted(e.to_string())
            }
        };

        drop(guard);
        self.settle_state();
        self.events.emit(PaintEvent::RenderFinished { status });
        outcome
    }

    fn apply_response(&self, resp: ApiResponse, mode: RenderMode, hr_scale: f64) -> Result<RenderOutcome> {
        if resp.legacy_clip_skip {
            lock(&self.session)?.clip_skip_key = ClipSkipKey::Legacy;
        }
        if !resp.is_success() {
            self.events
                .notice(format!("Error code returned: HTTP {}", resp.status));
            return Ok(RenderOutcome::Failed {
                status: resp.status,
            });
        }

        let info = resp.info.as_deref().and_then(RenderInfo::parse);
        let Some(images) = classify_images(resp.images, hr_scale, mode) else {
            return Err(PaintError::InvalidResponse(
                "Server returned no images".to_string(),
            ));
        };

        let (session_seed, session_prompt, autosave) = {
            let session = lock(&self.session)?;
            let autosave = session
                .autosave
                .images
                .then(|| Autosave::new(&self.config.output_dir, session.autosave.images_max));
            (session.seed, session.prompt.clone(), autosave)
        };
        let (seed, prompt) = match &info {
            Some(info) => (info.seed, info.prompt.clone()),
            None => (session_seed, session_prompt),
        };

        let count = images.len();
        let batch = matches!(images, RenderImages::Batch(_));
        let decoded = match images {
            RenderImages::Single(data) => vec![decode_b64(&data)?],
            RenderImages::Batch(list) => list
                .iter()
                .map(|data| decode_b64(data))
                .collect::<Result<Vec<_>>>()?,
        };
        let sketch = {
            let mut canvas = lock(&self.canvas)?;
            if batch {
                canvas.apply_batch(decoded.clone(), seed)?;
            } else {
                canvas.apply_single(decoded[0].clone())?;
            }
            canvas.sketch_image()
        };
        self.events.emit(PaintEvent::CanvasUpdated);
        if let Some(info) = &info {
            self.events.emit(PaintEvent::Caption(info.caption()));
        }

        // The render is already applied; a failed autosave is only reported.
        if let Some(autosave) = &autosave {
            let saved = if batch {
                autosave.save_batch(&decoded, &sketch).map(|_| ())
            } else {
                autosave.save_single(&decoded[0], &sketch).map(|_| ())
            };
            if let Err(e) = saved {
                warn!("Autosave failed: {}", e);
                self.events.notice(format!("Autosave failed: {}", e));
            }
        }

        Ok(RenderOutcome::Rendered {
            seed,
            prompt,
            images: count,
        })
    }

    // ── Canvas operations ───────────────────────────────────────────

    /// Recompute sizes (optionally at a different HR scale) and recreate the
    /// canvas, waiting for any render in flight to finish first.
    pub async fn resize(&self, hr_scale: Option<f64>) -> Result<()> {
        let guard = loop {
            self.gate.wait_idle(self.config.debounce_tick).await;
            if let Some(guard) = self.gate.try_acquire() {
                break guard;
            }
        };

        let result = self.resize_locked(hr_scale);
        drop(guard);
        result
    }

    fn resize_locked(&self, hr_scale: Option<f64>) -> Result<()> {
        let (width, height) = {
            let mut session = lock(&self.session)?;
            session.update_size(hr_scale);
            (session.width, session.height)
        };
        let mut canvas = lock(&self.canvas)?;
        if (canvas.region_width(), canvas.height()) != (width, height) {
            let sketch = canvas.sketch_image();
            let mut resized = Canvas::new(width, height, self.config.mode);
            if self.config.mode == RenderMode::Txt2Img {
                resized.set_sketch(sketch);
            }
            *canvas = resized;
            debug!(width, height, "Canvas resized");
            self.events.emit(PaintEvent::CanvasUpdated);
        }
        Ok(())
    }

    /// Load an image file into the sketch region and render it.
    pub fn load_sketch(self: &Arc<Self>, path: &Path) -> Result<()> {
        lock(&self.canvas)?.load_sketch(path)?;
        self.events.emit(PaintEvent::CanvasUpdated);
        self.render_now();
        Ok(())
    }

    /// Wipe the sketch region and render the blank sketch.
    pub fn clear_sketch(self: &Arc<Self>) -> Result<()> {
        lock(&self.canvas)?.clear_sketch();
        self.events.emit(PaintEvent::CanvasUpdated);
        self.render_now();
        Ok(())
    }

    /// Save the last render to `path` with its sketch sidecar.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let canvas = lock(&self.canvas)?;
        let bytes = canvas
            .last_render()
            .ok_or_else(|| PaintError::Other("Nothing rendered yet".to_string()))?;
        let sidecar = save_render(path, bytes, &canvas.sketch_image())?;
        info!("Saved {} and {}", path.display(), sidecar.display());
        Ok(sidecar)
    }

    /// Promote the batch image under `(x, y)`: its seed becomes the session
    /// seed and batch mode is switched off.
    pub async fn select_batch_at(self: &Arc<Self>, x: u32, y: u32) -> Result<Option<i64>> {
        let selected = lock(&self.canvas)?.select_batch_at(x, y)?;
        let Some(seed) = selected else {
            return Ok(None);
        };
        {
            let mut session = lock(&self.session)?;
            session.seed = seed;
            session.toggle_batch();
        }
        self.events.notice(format!("Select batch image seed {}", seed));
        self.events.emit(PaintEvent::CanvasUpdated);
        self.resize(None).await?;
        self.note_draw();
        self.trigger();
        Ok(Some(seed))
    }

    /// Run the session's detector on the output region and replace the
    /// sketch with the result.
    pub async fn detect(&self) -> Result<bool> {
        let detector = lock(&self.session)?.detector.clone();
        self.events
            .notice(format!("Detect {}", detector.replace('_', " ")));
        let (image, width, height) = lock(&self.canvas)?.detect_input()?;

        let resp = self
            .backend
            .detect(DetectRequest::new(detector, image, width, height))
            .await;
        match resp.image {
            Some(image) if resp.status == 200 => {
                lock(&self.canvas)?.apply_detect_result(&image)?;
                self.events.emit(PaintEvent::CanvasUpdated);
                Ok(true)
            }
            _ => {
                self.events
                    .notice(format!("Error code returned: HTTP {}", resp.status));
                Ok(false)
            }
        }
    }

    // ── Server commands ─────────────────────────────────────────────

    pub async fn interrupt(&self) -> u16 {
        let status = self.backend.interrupt().await;
        if status == 200 {
            self.events.notice("Interrupted rendering");
        }
        status
    }

    pub async fn skip(&self) -> u16 {
        let status = self.backend.skip().await;
        if status == 200 {
            self.events.notice("Skipped rendering");
        }
        status
    }

    // ── Session commands ────────────────────────────────────────────

    fn session_command<F>(&self, f: F) -> Result<String>
    where
        F: FnOnce(&mut Session) -> Result<String>,
    {
        let text = f(&mut *lock(&self.session)?)?;
        self.events.notice(text.clone());
        Ok(text)
    }

    /// Apply a command and render right away.
    fn instant_command<F>(self: &Arc<Self>, f: F) -> Result<String>
    where
        F: FnOnce(&mut Session) -> Result<String>,
    {
        let text = self.session_command(f)?;
        self.render_now();
        Ok(text)
    }

    /// Apply a command and render once input has settled.
    fn debounced_command<F>(self: &Arc<Self>, f: F) -> Result<String>
    where
        F: FnOnce(&mut Session) -> String,
    {
        let text = self.session_command(|s| Ok(f(s)))?;
        self.note_draw();
        self.trigger();
        Ok(text)
    }

    /// Apply a command that changes the HR scale, resize, then render.
    async fn sizing_command<F>(self: &Arc<Self>, f: F, instant: bool) -> Result<String>
    where
        F: FnOnce(&mut Session) -> String,
    {
        let text = self.session_command(|s| Ok(f(s)))?;
        self.resize(None).await?;
        if instant {
            self.render_now();
        } else {
            self.note_draw();
            self.trigger();
        }
        Ok(text)
    }

    pub fn seed_up(self: &Arc<Self>) -> Result<String> {
        self.instant_command(Session::seed_up)
    }

    pub fn seed_down(self: &Arc<Self>) -> Result<String> {
        self.instant_command(Session::seed_down)
    }

    pub fn random_seed(self: &Arc<Self>) -> Result<String> {
        self.instant_command(Session::random_seed)
    }

    pub fn set_seed(self: &Arc<Self>, seed: i64) -> Result<String> {
        self.instant_command(|s| s.set_seed(seed))
    }

    pub fn set_prompt(self: &Arc<Self>, prompt: &str) -> Result<String> {
        self.instant_command(|s| s.set_prompt(prompt))
    }

    pub fn set_negative_prompt(self: &Arc<Self>, prompt: &str) -> Result<String> {
        self.instant_command(|s| s.set_negative_prompt(prompt))
    }

    pub fn cycle_sampler(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_sampler)
    }

    pub fn cycle_hr_upscaler(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_hr_upscaler)
    }

    pub fn cycle_controlnet_model(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_controlnet_model)
    }

    pub fn cycle_controlnet_weight(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_controlnet_weight)
    }

    pub fn cycle_guidance_end(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_guidance_end)
    }

    pub fn cycle_denoising_strength(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::cycle_denoising_strength)
    }

    pub fn toggle_clip_skip(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::toggle_clip_skip)
    }

    pub fn toggle_pixel_perfect(self: &Arc<Self>) -> Result<String> {
        self.debounced_command(Session::toggle_pixel_perfect)
    }

    /// Select the next detector. Does not render.
    pub fn cycle_detector(&self) -> Result<String> {
        self.session_command(|s| Ok(s.cycle_detector()))
    }

    /// Flip image autosaving. Does not render.
    pub fn toggle_autosave_images(&self) -> Result<String> {
        self.session_command(|s| Ok(s.toggle_autosave_images()))
    }

    pub async fn toggle_hr(self: &Arc<Self>) -> Result<String> {
        self.sizing_command(Session::toggle_hr, false).await
    }

    pub async fn cycle_hr_scale(self: &Arc<Self>) -> Result<String> {
        self.sizing_command(Session::cycle_hr_scale, false).await
    }

    pub async fn toggle_quick(self: &Arc<Self>) -> Result<String> {
        self.sizing_command(Session::toggle_quick, true).await
    }

    pub async fn toggle_batch(self: &Arc<Self>) -> Result<String> {
        self.sizing_command(Session::toggle_batch, false).await
    }

    pub async fn cycle_batch_size(self: &Arc<Self>) -> Result<String> {
        self.sizing_command(Session::cycle_batch_size, false).await
    }

    /// Step the debounce window through `0, 0.5, 1.0, 1.5, 2.0`.
    pub fn cycle_render_wait(&self) -> Result<String> {
        let next = {
            let mut wait = lock(&self.render_wait)?;
            *wait = next_render_wait(*wait);
            *wait
        };
        let text = if next.is_zero() {
            "Render wait: off".to_string()
        } else {
            format!("Render wait: {:.1}s", next.as_secs_f64())
        };
        self.events.notice(text.clone());
        Ok(text)
    }

    /// Settings as `(label, value)` pairs.
    pub fn config_dump(&self) -> Result<Vec<(String, String)>> {
        Ok(lock(&self.session)?.config_dump())
    }

    // ── Presets ─────────────────────────────────────────────────────

    fn preset_store(&self) -> Result<&Mutex<PresetStore>> {
        self.presets
            .as_ref()
            .ok_or_else(|| PaintError::Preset("No preset store loaded".to_string()))
    }

    /// Save the current values into preset slot `index` (1-9).
    pub fn save_preset(&self, kind: PresetKind, index: u8) -> Result<String> {
        let session = lock(&self.session)?.clone();
        let text = lock(self.preset_store()?)?.save(kind, index, &session)?;
        self.events.notice(text.clone());
        Ok(text)
    }

    /// Load preset slot `index` (`0` loads both default snapshots), resize
    /// and render. A missing slot is reported and changes nothing.
    pub async fn load_preset(self: &Arc<Self>, kind: PresetKind, index: u8) -> Result<String> {
        let loaded = {
            let store = lock(self.preset_store()?)?;
            let mut session = lock(&self.session)?;
            if index == 0 {
                store.apply_defaults(&mut session)
            } else {
                store.apply(kind, index, &mut session)
            }
        };
        let text = match loaded {
            Ok(text) => text,
            Err(e) => {
                self.events.notice(e.to_string());
                return Err(e);
            }
        };
        self.events.notice(text.clone());
        self.resize(None).await?;
        self.render_now();
        Ok(text)
    }
}

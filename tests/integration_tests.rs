
use std::sync::Arc;
use std::time::Duration;

use sd_paint::*;
use serde_json::json;
use test_helpers::*;
use tokio::time::Instant;

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PaintEvent>) -> Vec<PaintEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_while_busy() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 7)).held());
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.render().await }
    });
    wait_until(|| backend.submit_count() == 1).await;
    assert!(scheduler.is_busy());
    assert_eq!(scheduler.state(), SchedulerState::AwaitingResult);

    for _ in 0..5 {
        assert_eq!(
            scheduler.render().await,
            RenderOutcome::Skipped(SkipReason::Busy)
        );
    }
    assert_eq!(backend.submit_count(), 1);

    backend.release(1);
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, RenderOutcome::Rendered { seed: 7, images: 1, .. }));
    assert!(!scheduler.is_busy());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_triggers_coalesce_into_one_render() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler_with(backend.clone(), EventSink::disabled(), Duration::from_millis(500));

    for _ in 0..10 {
        scheduler.stroke_finished();
    }
    assert_eq!(scheduler.state(), SchedulerState::Debouncing);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.submit_count(), 0);

    wait_until(|| backend.submit_count() == 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.submit_count(), 1);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_drawing_restarts_debounce_window() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler_with(backend.clone(), EventSink::disabled(), Duration::from_millis(500));

    scheduler.stroke_finished();
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.note_draw();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.submit_count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_instant_render_skips_debounce() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler_with(backend.clone(), EventSink::disabled(), Duration::from_secs(2));

    let start = Instant::now();
    scheduler.note_draw();
    scheduler.render_now();
    wait_until(|| backend.submit_count() == 1).await;
    assert!(start.elapsed() < Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_progress_cleared_after_render() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)).held());
    backend.set_progress(ProgressResponse {
        status: 200,
        progress: Some(0.5),
    });
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend.clone(), events);

    let render = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.render().await }
    });
    wait_until(|| scheduler.progress() == Some(0.5)).await;

    backend.release(1);
    render.await.unwrap();
    assert_eq!(scheduler.progress(), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let polls = backend
        .progress_calls
        .load(std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        backend
            .progress_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        polls
    );
    assert_eq!(scheduler.progress(), None);

    let events = drain(&mut rx);
    assert!(events.contains(&PaintEvent::Progress(0.5)));
    assert!(events.contains(&PaintEvent::RenderFinished { status: 200 }));
}

#[tokio::test]
async fn test_failed_render_reports_status() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(ApiResponse::unavailable()));
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend.clone(), events);

    assert_eq!(
        scheduler.render().await,
        RenderOutcome::Failed { status: 503 }
    );
    assert!(!scheduler.is_busy());
    assert!(scheduler.canvas().unwrap().last_render().is_none());

    let events = drain(&mut rx);
    assert!(events.contains(&PaintEvent::Notice(
        "Error code returned: HTTP 503".to_string()
    )));
    assert!(events.contains(&PaintEvent::RenderFinished { status: 503 }));
}

#[tokio::test]
async fn test_render_updates_canvas_and_caption() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 42)));
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend.clone(), events);

    scheduler.render().await;

    let canvas = scheduler.canvas().unwrap();
    assert_eq!(canvas.output_image().get_pixel(10, 10).0, [0, 0, 0, 255]);
    assert_eq!(canvas.sketch_image().get_pixel(10, 10).0, [255, 255, 255, 255]);

    let payload = backend.last_payload().unwrap();
    assert_eq!(payload["seed"], json!(fx.session.seed));
    assert!(payload["controlnet_units"][0]["input_image"].is_string());

    let events = drain(&mut rx);
    assert!(events.contains(&PaintEvent::RenderStarted {
        mode: RenderMode::Txt2Img
    }));
    assert!(events.contains(&PaintEvent::Caption(
        "Sd Paint | Seed: 42 | Prompt: a cat".to_string()
    )));
}

#[tokio::test]
async fn test_batch_render_tiles_and_selects() {
    let mut fx = Fixture::new(RenderMode::Txt2Img);
    fx.session.batch_size = 4;
    let backend = Arc::new(MockBackend::new(render_response(4, 64, 100)));
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());

    let outcome = scheduler.render().await;
    assert!(matches!(outcome, RenderOutcome::Rendered { seed: 100, images: 4, .. }));
    assert_eq!(backend.last_payload().unwrap()["batch_size"], json!(4));

    let canvas = scheduler.canvas().unwrap();
    let seeds: Vec<i64> = canvas.batch_images().iter().map(|b| b.seed).collect();
    assert_eq!(seeds, vec![100, 101, 102, 103]);

    let picked = scheduler.select_batch_at(40, 40).await.unwrap();
    assert_eq!(picked, Some(103));
    let session = scheduler.session().unwrap();
    assert_eq!(session.seed, 103);
    assert_eq!(session.batch_size, 1);
    assert!(scheduler.canvas().unwrap().batch_images().is_empty());
}

#[tokio::test]
async fn test_select_outside_batch_is_noop() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 5)));
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());
    scheduler.render().await;

    assert_eq!(scheduler.select_batch_at(10, 10).await.unwrap(), None);
    assert_eq!(scheduler.session().unwrap().seed, fx.session.seed);
}

#[tokio::test]
async fn test_legacy_clip_skip_key_sticks() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let mut legacy = render_response(1, 64, 1);
    legacy.legacy_clip_skip = true;
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    backend.push_response(legacy);
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());

    scheduler.render().await;
    assert_eq!(
        scheduler.session().unwrap().clip_skip_key,
        ClipSkipKey::Legacy
    );

    scheduler.render().await;
    let payload = backend.last_payload().unwrap();
    assert!(payload["override_settings"]
        .get("CLIP_stop_at_last_layers")
        .is_some());
}

#[tokio::test]
async fn test_save_writes_render_and_sidecar() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let response = render_response(1, 64, 9);
    let expected = sd_paint::canvas::decode_b64(&response.images[0]).unwrap();
    let backend = Arc::new(MockBackend::new(response));
    let scheduler = fx.scheduler(backend, EventSink::disabled());

    let out = fx.path().join("shots").join("cat.png");
    assert!(scheduler.save(&out).is_err());

    scheduler.render().await;
    let sidecar = scheduler.save(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), expected);
    assert_eq!(sidecar, fx.path().join("shots").join("cat-sketch.png"));

    let sketch = image::open(&sidecar).unwrap().to_rgba8();
    assert_eq!(sketch.dimensions(), (64, 64));
}

#[tokio::test]
async fn test_autosave_rotates_renders() {
    let mut fx = Fixture::new(RenderMode::Txt2Img);
    fx.session.autosave.images = true;
    fx.session.autosave.images_max = 2;
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler(backend, EventSink::disabled());

    for _ in 0..4 {
        scheduler.render().await;
    }
    let outputs = fx.path().join("outputs");
    assert!(outputs.join("image.png").exists());
    assert!(outputs.join("autosave").join("01-image.png").exists());
    assert!(outputs.join("autosave").join("02-image.png").exists());
    assert!(!outputs.join("autosave").join("03-image.png").exists());
}

#[tokio::test]
async fn test_img2img_skips_unchanged_source() {
    let fx = Fixture::with_template(RenderMode::Img2Img, json!({"steps": 10}));
    let source = fx.path().join("source.png");
    let png = sd_paint::canvas::decode_b64(&solid_b64(32, 48, [9, 9, 9, 255])).unwrap();
    std::fs::write(&source, png).unwrap();

    let backend = Arc::new(MockBackend::new(render_response(1, 32, 3)));
    let scheduler = Arc::new(
        RenderScheduler::new(
            backend.clone(),
            fx.session.clone(),
            fx.config.clone(),
            EventSink::disabled(),
        )
        .with_source(&source),
    );

    assert!(matches!(
        scheduler.render_source(false).await,
        RenderOutcome::Rendered { .. }
    ));
    assert_eq!(
        scheduler.render_source(false).await,
        RenderOutcome::Skipped(SkipReason::Unchanged)
    );
    assert!(matches!(
        scheduler.render().await,
        RenderOutcome::Rendered { .. }
    ));
    assert_eq!(backend.submit_count(), 2);

    let (mode, payload) = backend.submits.lock().unwrap()[0].clone();
    assert_eq!(mode, RenderMode::Img2Img);
    assert_eq!(payload["width"], json!(32));
    assert_eq!(payload["height"], json!(48));
    assert!(payload["init_images"][0].is_string());

    let session = scheduler.session().unwrap();
    assert_eq!((session.init_width, session.init_height), (32.0, 48.0));
}

#[tokio::test]
async fn test_img2img_without_source() {
    let fx = Fixture::new(RenderMode::Img2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 32, 3)));
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());
    assert_eq!(
        scheduler.render().await,
        RenderOutcome::Skipped(SkipReason::NoSource)
    );
    assert_eq!(backend.submit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_stops_on_shutdown() {
    let fx = Fixture::new(RenderMode::Img2Img);
    let source = fx.path().join("source.png");
    let png = sd_paint::canvas::decode_b64(&solid_b64(16, 16, [0, 0, 0, 255])).unwrap();
    std::fs::write(&source, png).unwrap();

    let backend = Arc::new(MockBackend::new(render_response(1, 16, 3)));
    let scheduler = Arc::new(
        RenderScheduler::new(
            backend.clone(),
            fx.session.clone(),
            fx.config.clone(),
            EventSink::disabled(),
        )
        .with_source(&source),
    );

    let watcher = tokio::spawn(scheduler.clone().watch_source());
    wait_until(|| backend.submit_count() == 1).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(backend.submit_count(), 1);

    scheduler.shutdown();
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_detect_replaces_sketch() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    backend.set_detect_response(DetectResponse {
        status: 200,
        image: Some(solid_b64(64, 64, [255, 255, 255, 255])),
    });
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());

    assert!(scheduler.detect().await.unwrap());
    let sketch = scheduler.canvas().unwrap().sketch_image();
    assert_eq!(sketch.get_pixel(5, 5).0, [0, 0, 0, 255]);

    let requests = backend.detect_requests.lock().unwrap();
    assert_eq!(requests[0].module, fx.session.detector);
    assert_eq!(requests[0].processor_res, 64);
}

#[tokio::test]
async fn test_detect_failure_keeps_sketch() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    backend.set_detect_response(DetectResponse {
        status: 503,
        image: None,
    });
    let scheduler = fx.scheduler(backend, EventSink::disabled());

    assert!(!scheduler.detect().await.unwrap());
    let sketch = scheduler.canvas().unwrap().sketch_image();
    assert_eq!(sketch.get_pixel(5, 5).0, [255, 255, 255, 255]);
}

#[tokio::test(start_paused = true)]
async fn test_resize_waits_for_render() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)).held());
    let scheduler = fx.scheduler(backend.clone(), EventSink::disabled());

    let render = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.render().await }
    });
    wait_until(|| backend.submit_count() == 1).await;

    let resize = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.resize(Some(2.0)).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!resize.is_finished());

    backend.release(1);
    render.await.unwrap();
    resize.await.unwrap().unwrap();
    assert_eq!(scheduler.session().unwrap().render_size, (128, 128));
    assert!(!scheduler.is_busy());
}

#[tokio::test]
async fn test_render_wait_cycle_notices() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler(backend, EventSink::disabled());

    let texts: Vec<String> = (0..4)
        .map(|_| scheduler.cycle_render_wait().unwrap())
        .collect();
    assert_eq!(
        texts,
        vec![
            "Render wait: 1.0s",
            "Render wait: 1.5s",
            "Render wait: 2.0s",
            "Render wait: off"
        ]
    );
    assert_eq!(scheduler.render_wait(), Duration::ZERO);
}

#[tokio::test]
async fn test_interrupt_notice() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend.clone(), events);

    assert_eq!(scheduler.interrupt().await, 200);
    assert_eq!(
        drain(&mut rx),
        vec![PaintEvent::Notice("Interrupted rendering".to_string())]
    );
}

#[tokio::test]
async fn test_missing_preset_leaves_session() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let presets = PresetStore::load(&fx.path().join("presets.json")).unwrap();
    let (events, mut rx) = EventSink::channel();
    let scheduler = Arc::new(
        RenderScheduler::new(backend, fx.session.clone(), fx.config.clone(), events)
            .with_presets(presets),
    );

    assert!(scheduler.load_preset(PresetKind::Render, 4).await.is_err());
    assert_eq!(scheduler.session().unwrap().hr_scale, fx.session.hr_scale);
    assert!(drain(&mut rx).contains(&PaintEvent::Notice("No render preset 4".to_string())));
}

#[tokio::test]
async fn test_saved_preset_round_trip() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let presets = PresetStore::load(&fx.path().join("presets.json")).unwrap();
    let scheduler = Arc::new(
        RenderScheduler::new(
            backend,
            fx.session.clone(),
            fx.config.clone(),
            EventSink::disabled(),
        )
        .with_presets(presets),
    );

    scheduler.cycle_hr_upscaler().unwrap();
    let upscaler = scheduler.session().unwrap().hr_upscaler;
    assert_eq!(
        scheduler.save_preset(PresetKind::Render, 1).unwrap(),
        "Save render preset 1"
    );
    let text = scheduler.load_preset(PresetKind::Render, 1).await.unwrap();
    assert!(text.starts_with("Load render preset 1:"));
    assert_eq!(scheduler.session().unwrap().hr_upscaler, upscaler);
}

#[tokio::test]
async fn test_autosave_failure_still_applies_render() {
    let mut fx = Fixture::new(RenderMode::Txt2Img);
    fx.session.autosave.images = true;
    std::fs::write(fx.path().join("outputs"), b"not a directory").unwrap();
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 12)));
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend, events);

    let outcome = scheduler.render().await;
    assert!(matches!(outcome, RenderOutcome::Rendered { seed: 12, images: 1, .. }));
    assert!(scheduler.canvas().unwrap().last_render().is_some());
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let events = drain(&mut rx);
    assert!(events.contains(&PaintEvent::CanvasUpdated));
    assert!(events.contains(&PaintEvent::Caption(
        "Sd Paint | Seed: 12 | Prompt: a cat".to_string()
    )));
    assert!(events.iter().any(
        |e| matches!(e, PaintEvent::Notice(text) if text.starts_with("Autosave failed"))
    ));
    assert!(events.contains(&PaintEvent::RenderFinished { status: 200 }));
}

#[tokio::test]
async fn test_saved_sidecar_reloads_sketch() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 2)));
    let scheduler = fx.scheduler(backend, EventSink::disabled());

    scheduler
        .with_canvas(|canvas| {
            let rect = canvas.sketch_rect();
            for dx in 10..30 {
                for dy in 20..24 {
                    canvas
                        .image_mut()
                        .put_pixel(rect.x + dx, rect.y + dy, image::Rgba([0, 0, 0, 255]));
                }
            }
        })
        .unwrap();
    scheduler.render().await;
    let drawn = scheduler.canvas().unwrap().sketch_image();

    let out = fx.path().join("cat.png");
    let sidecar = scheduler.save(&out).unwrap();

    scheduler.clear_sketch().unwrap();
    assert_ne!(scheduler.canvas().unwrap().sketch_image(), drawn);

    scheduler.load_sketch(&sidecar).unwrap();
    assert_eq!(scheduler.canvas().unwrap().sketch_image(), drawn);
}

#[tokio::test(start_paused = true)]
async fn test_progress_error_notice_keeps_polling() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)).held());
    backend.set_progress(ProgressResponse {
        status: 500,
        progress: None,
    });
    let (events, mut rx) = EventSink::channel();
    let scheduler = fx.scheduler(backend.clone(), events);

    let render = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.render().await }
    });
    wait_until(|| {
        backend
            .progress_calls
            .load(std::sync::atomic::Ordering::SeqCst)
            >= 3
    })
    .await;
    assert_eq!(scheduler.progress(), None);

    backend.release(1);
    assert!(matches!(
        render.await.unwrap(),
        RenderOutcome::Rendered { .. }
    ));

    let events = drain(&mut rx);
    assert!(events.contains(&PaintEvent::Notice(
        "Error code returned: HTTP 500".to_string()
    )));
    assert!(!events.iter().any(|e| matches!(e, PaintEvent::Progress(_))));
}

#[tokio::test(start_paused = true)]
async fn test_watch_rerenders_changed_source() {
    let fx = Fixture::with_template(RenderMode::Img2Img, json!({"steps": 10}));
    let source = fx.path().join("source.png");
    let png = sd_paint::canvas::decode_b64(&solid_b64(16, 16, [0, 0, 0, 255])).unwrap();
    std::fs::write(&source, png).unwrap();

    let backend = Arc::new(MockBackend::new(render_response(1, 16, 3)));
    let scheduler = Arc::new(
        RenderScheduler::new(
            backend.clone(),
            fx.session.clone(),
            fx.config.clone(),
            EventSink::disabled(),
        )
        .with_source(&source),
    );

    let watcher = tokio::spawn(scheduler.clone().watch_source());
    wait_until(|| backend.submit_count() == 1).await;

    let png = sd_paint::canvas::decode_b64(&solid_b64(24, 16, [9, 9, 9, 255])).unwrap();
    std::fs::write(&source, png).unwrap();
    std::fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(std::time::SystemTime::now() + Duration::from_secs(10))
        .unwrap();

    wait_until(|| backend.submit_count() == 2).await;
    assert_eq!(backend.last_payload().unwrap()["width"], json!(24));

    scheduler.shutdown();
    watcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_busy_debounce_settles_to_idle() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler_with(backend.clone(), EventSink::disabled(), Duration::from_millis(500));

    let guard = scheduler.gate().try_acquire().unwrap();
    scheduler.stroke_finished();
    assert_eq!(scheduler.state(), SchedulerState::Debouncing);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.submit_count(), 0);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    drop(guard);
}

#[tokio::test(start_paused = true)]
async fn test_direct_render_consumes_instant_request() {
    let fx = Fixture::new(RenderMode::Txt2Img);
    let backend = Arc::new(MockBackend::new(render_response(1, 64, 1)));
    let scheduler = fx.scheduler_with(backend.clone(), EventSink::disabled(), Duration::from_secs(2));

    scheduler.request_instant_render();
    scheduler.render().await;
    assert_eq!(backend.submit_count(), 1);

    scheduler.stroke_finished();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.submit_count(), 1);

    wait_until(|| backend.submit_count() == 2).await;
}

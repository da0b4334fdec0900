use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::{json, Map};
use tracing::{debug, info};

use sd_paint::{
    load_config, logging, update_config, EventSink, PaintConfig, PaintEvent, PresetStore,
    RenderMode, RenderOutcome, RenderScheduler, SchedulerConfig, SdClient, Session,
};

/// Headless sd-paint driver.
///
/// Renders a sketch once through the ControlNet template, or watches an
/// image file and re-renders it through img2img whenever it changes.
#[derive(Parser, Debug)]
#[command(name = "sd-paint", version, about = "Sketch-to-image renderer for Stable Diffusion servers")]
struct Args {
    /// Directory holding config.json, controlnet.json, img2img.json and presets.json.
    #[arg(long, default_value = "configs", value_name = "DIR")]
    config_dir: PathBuf,

    /// Watch FILE and render it through img2img on every change.
    #[arg(long, value_name = "FILE", conflicts_with = "sketch")]
    img2img: Option<PathBuf>,

    /// Sketch to render (blank canvas when omitted).
    #[arg(short, long, value_name = "FILE")]
    sketch: Option<PathBuf>,

    /// Save the render (and its -sketch sidecar) here.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Seed for this run; not written back to the template.
    #[arg(long)]
    seed: Option<i64>,

    /// Prompt for this run; not written back to the template.
    #[arg(short, long)]
    prompt: Option<String>,

    /// Verbose logging; honours RUST_LOG.
    #[arg(long)]
    debug: bool,
}

fn spawn_event_logger(mut rx: tokio::sync::mpsc::UnboundedReceiver<PaintEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PaintEvent::Notice(text) => info!("{}", text),
                PaintEvent::Caption(caption) => info!("{}", caption),
                PaintEvent::Progress(fraction) => info!("Progress {:.0}%", fraction * 100.0),
                other => debug!(?other, "Event"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.debug);

    let config = PaintConfig::load(&args.config_dir)
        .with_context(|| format!("Failed to load config from {}", args.config_dir.display()))?;
    let mode = if args.img2img.is_some() {
        RenderMode::Img2Img
    } else {
        RenderMode::Txt2Img
    };
    let scheduler_config = SchedulerConfig::from_paint_config(&config, mode, args.config_dir.clone())
        .context("Invalid render_wait")?;
    let template_path = scheduler_config.template_path();
    let template = load_config(&template_path)
        .with_context(|| format!("Failed to load template {}", template_path.display()))?;

    let client = Arc::new(SdClient::new(&config.url).with_retries(config.retries));
    let catalog = client.fetch_catalog(&config).await;
    if let Some(models) = catalog.controlnet_models.as_ref().filter(|m| !m.is_empty()) {
        if *models != config.controlnet_models {
            let mut values = Map::new();
            values.insert("controlnet_models".to_string(), json!(models));
            update_config(&args.config_dir.join("config.json"), true, &values)
                .context("Failed to store ControlNet models")?;
        }
    }

    let mut session = Session::new(&config, &template, &template_path, mode);
    session.apply_catalog(&catalog);
    if let Some(seed) = args.seed {
        session.seed = seed;
    }
    if let Some(prompt) = args.prompt {
        session.prompt = prompt;
    }

    let mut presets = PresetStore::load(&args.config_dir.join("presets.json"))
        .context("Failed to load presets")?;
    presets
        .snapshot_defaults(&config, &template)
        .context("Failed to store default presets")?;

    let (events, rx) = EventSink::channel();
    spawn_event_logger(rx);
    let scheduler = RenderScheduler::new(client, session, scheduler_config, events).with_presets(presets);

    if let Some(source) = args.img2img {
        let scheduler = Arc::new(scheduler.with_source(source));
        let watcher = tokio::spawn(Arc::clone(&scheduler).watch_source());
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Stopping");
        scheduler.shutdown();
        watcher.await.context("Watch task failed")?;
        return Ok(());
    }

    if let Some(sketch) = &args.sketch {
        scheduler
            .with_canvas(|canvas| canvas.load_sketch(sketch))?
            .with_context(|| format!("Failed to load sketch {}", sketch.display()))?;
    }

    match scheduler.render().await {
        RenderOutcome::Rendered { seed, images, .. } => {
            info!("Rendered {} image(s), seed {}", images, seed);
            if let Some(output) = &args.output {
                scheduler
                    .save(output)
                    .with_context(|| format!("Failed to save {}", output.display()))?;
            }
            Ok(())
        }
        RenderOutcome::Failed { status } => bail!("Render failed: HTTP {}", status),
        RenderOutcome::Aborted(reason) => bail!("Render aborted: {}", reason),
        RenderOutcome::Skipped(reason) => bail!("Render skipped: {:?}", reason),
    }
}

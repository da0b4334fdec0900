use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which generation endpoint a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Sketch canvas conditioned through ControlNet on `sdapi/v1/txt2img`.
    Txt2Img,
    /// Watched source file sent to `sdapi/v1/img2img`.
    Img2Img,
}

impl RenderMode {
    pub fn endpoint(&self) -> &'static str {
        match self {
            RenderMode::Txt2Img => "sdapi/v1/txt2img",
            RenderMode::Img2Img => "sdapi/v1/img2img",
        }
    }

    /// Template file name for this mode inside the config directory.
    pub fn template_file(&self) -> &'static str {
        match self {
            RenderMode::Txt2Img => "controlnet.json",
            RenderMode::Img2Img => "img2img.json",
        }
    }
}

/// Name of the CLIP skip field inside `override_settings`.
///
/// Newer servers accept `clip_skip`; older ones only know
/// `CLIP_stop_at_last_layers` and answer HTTP 500 for the new name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipSkipKey {
    #[default]
    ClipSkip,
    Legacy,
}

impl ClipSkipKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipSkipKey::ClipSkip => "clip_skip",
            ClipSkipKey::Legacy => "CLIP_stop_at_last_layers",
        }
    }
}

/// Normalized answer from a render submission.
///
/// `status` is the HTTP status, or a synthetic 503 when the server could
/// not be reached at all.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub images: Vec<String>,
    pub info: Option<String>,
    /// Set when the client fell back to [`ClipSkipKey::Legacy`] to get this
    /// response; later payloads should use the legacy name directly.
    pub legacy_clip_skip: bool,
}

impl ApiResponse {
    /// Synthetic status used for connection failures.
    pub const UNAVAILABLE: u16 = 503;

    pub fn unavailable() -> Self {
        Self {
            status: Self::UNAVAILABLE,
            ..Default::default()
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Images of a successful render after the trailing sketch images have
/// been dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderImages {
    Single(String),
    Batch(Vec<String>),
}

impl RenderImages {
    pub fn len(&self) -> usize {
        match self {
            RenderImages::Single(_) => 1,
            RenderImages::Batch(images) => images.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Seed and prompt echoed back in a response's `info` string.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInfo {
    pub seed: i64,
    pub prompt: String,
}

impl RenderInfo {
    /// Parse the JSON-encoded `info` string returned by `*2img` endpoints.
    pub fn parse(info: &str) -> Option<Self> {
        let json: Value = serde_json::from_str(info).ok()?;
        let seed = json.get("seed").and_then(|v| v.as_i64())?;
        let prompt = json
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some(Self { seed, prompt })
    }

    /// Window caption shown after a render.
    pub fn caption(&self) -> String {
        format!("Sd Paint | Seed: {} | Prompt: {}", self.seed, self.prompt)
    }
}

/// Answer from `sdapi/v1/progress`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressResponse {
    pub status: u16,
    pub progress: Option<f32>,
}

/// Body for `controlnet/detect`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectRequest {
    #[serde(rename = "controlnet_module")]
    pub module: String,
    #[serde(rename = "controlnet_input_images")]
    pub images: Vec<String>,
    #[serde(rename = "controlnet_processor_res")]
    pub processor_res: u32,
    #[serde(rename = "controlnet_threshold_a")]
    pub threshold_a: f64,
    #[serde(rename = "controlnet_threshold_b")]
    pub threshold_b: f64,
}

impl DetectRequest {
    /// Build a detect request with the detector's default thresholds.
    pub fn new(module: impl Into<String>, image_b64: String, width: u32, height: u32) -> Self {
        let module = module.into();
        let (threshold_a, threshold_b) = Self::default_thresholds(&module);
        Self {
            module,
            images: vec![image_b64],
            processor_res: width.min(height),
            threshold_a,
            threshold_b,
        }
    }

    /// Override the thresholds.
    pub fn thresholds(mut self, a: f64, b: f64) -> Self {
        self.threshold_a = a;
        self.threshold_b = b;
        self
    }

    pub fn default_thresholds(module: &str) -> (f64, f64) {
        match module {
            "scribble_xdog" => (32.0, 32.0),
            "mlsd" => (0.1, 0.1),
            _ => (64.0, 64.0),
        }
    }
}

/// Answer from `controlnet/detect`.
#[derive(Debug, Clone, Default)]
pub struct DetectResponse {
    pub status: u16,
    pub image: Option<String>,
}

/// Model/VAE currently loaded on the server, from `sdapi/v1/options`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerOptions {
    pub checkpoint: Option<String>,
    pub vae: Option<String>,
}

/// Server-side choices fetched at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    /// Sampler names in preference order.
    pub samplers: Vec<String>,
    /// Upscaler names, sorted.
    pub upscalers: Vec<String>,
    /// Sketch-capable ControlNet models, `None` when not fetched.
    pub controlnet_models: Option<Vec<String>>,
    pub options: ServerOptions,
}

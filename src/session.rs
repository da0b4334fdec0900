use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::{json, Map, Value};

use crate::config::{update_config, PaintConfig};
use crate::error::Result;
use crate::payload::QuickProfile;
use crate::types::{Catalog, ClipSkipKey, RenderMode};

/// Seed used when the template does not carry one.
pub const DEFAULT_SEED: i64 = 3_456_456_767;

/// Which autosave flags are active.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutosaveFlags {
    pub seed: bool,
    pub prompt: bool,
    pub negative_prompt: bool,
    pub images: bool,
    pub images_max: u32,
}

/// Mutable render session: prompt, seed, model choices, scale factors and
/// the value cycles the commands step through.
///
/// A `Session` is owned by the scheduler behind a mutex. Command methods
/// mutate it and return the one-line notice to show the user.
#[derive(Debug, Clone)]
pub struct Session {
    pub mode: RenderMode,
    pub template_path: PathBuf,

    pub seed: i64,
    pub prompt: String,
    pub negative_prompt: String,

    pub steps: u32,
    pub cfg_scale: f64,
    pub quick: Option<QuickProfile>,
    pub quick_mode: bool,

    pub sampler: String,
    pub samplers: Vec<String>,

    pub hr_scale: f64,
    pub hr_scale_prev: f64,
    pub hr_scales: Vec<f64>,
    pub hr_upscaler: String,
    pub hr_upscalers: Vec<String>,
    pub denoising_strength: f64,
    pub denoising_strengths: Vec<f64>,

    pub batch_size: u32,
    pub batch_size_prev: u32,
    pub batch_hr_scale_prev: f64,
    pub batch_sizes: Vec<u32>,

    pub clip_skip: u32,
    pub clip_skip_key: ClipSkipKey,
    pub pixel_perfect: bool,
    pub use_invert_module: bool,

    pub controlnet_model: Option<String>,
    pub controlnet_models: Vec<String>,
    pub controlnet_weight: f64,
    pub controlnet_weights: Vec<f64>,
    pub controlnet_guidance_end: f64,
    pub controlnet_guidance_ends: Vec<f64>,

    pub detector: String,
    pub detectors: Vec<String>,

    pub init_width: f64,
    pub init_height: f64,
    pub interface_width: Option<f64>,
    pub interface_height: Option<f64>,
    /// Display width of one canvas region.
    pub width: u32,
    pub height: u32,
    /// Size the server renders at (`init * hr_scale`).
    pub render_size: (u32, u32),
    pub soft_upscale: f64,

    pub checkpoint: Option<String>,
    pub vae: Option<String>,

    pub autosave: AutosaveFlags,
    pub preset_fields: Vec<String>,
    pub cn_preset_fields: Vec<String>,
}

fn template_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn first_or<T: Clone>(list: &[T], fallback: T) -> T {
    list.first().cloned().unwrap_or(fallback)
}

/// Next value after `current` in `list`, wrapping around. An unknown
/// current value restarts the cycle.
pub fn cycle_next<T: PartialEq + Clone>(list: &[T], current: &T) -> Option<T> {
    if list.is_empty() {
        return None;
    }
    let next = match list.iter().position(|v| v == current) {
        Some(i) => (i + 1) % list.len(),
        None => 0,
    };
    Some(list[next].clone())
}

impl Session {
    /// Build a session from the global config and the per-mode template.
    pub fn new(config: &PaintConfig, template: &Value, template_path: &Path, mode: RenderMode) -> Self {
        let config = config.clone().normalized();
        let units0 = template
            .get("controlnet_units")
            .and_then(|u| u.get(0))
            .cloned()
            .unwrap_or(Value::Null);

        let hr_scales = config.hr_scales.clone();
        let base_hr = first_or(&hr_scales, 1.0);
        let enabled_hr = hr_scales.get(1).copied().unwrap_or(base_hr);
        let hr_scale = if template_flag(template.get("enable_hr")) {
            enabled_hr
        } else {
            base_hr
        };

        let override_settings = template.get("override_settings");
        let clip_skip = override_settings
            .and_then(|o| {
                o.get(ClipSkipKey::Legacy.as_str())
                    .or_else(|| o.get(ClipSkipKey::ClipSkip.as_str()))
            })
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;

        let controlnet_model = units0
            .get("model")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| config.controlnet_models.first().cloned());

        let init_width = template.get("width").and_then(|v| v.as_f64()).unwrap_or(512.0);
        let init_height = template.get("height").and_then(|v| v.as_f64()).unwrap_or(512.0);

        let mut session = Self {
            mode,
            template_path: template_path.to_path_buf(),
            seed: template.get("seed").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_SEED),
            prompt: template
                .get("prompt")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            negative_prompt: template
                .get("negative_prompt")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            steps: template.get("steps").and_then(|v| v.as_u64()).unwrap_or(16) as u32,
            cfg_scale: template.get("cfg_scale").and_then(|v| v.as_f64()).unwrap_or(7.0),
            quick: QuickProfile::from_template(template),
            quick_mode: false,
            sampler: first_or(&config.samplers, "DDIM".to_string()),
            samplers: config.samplers.clone(),
            hr_scale,
            hr_scale_prev: enabled_hr,
            hr_scales,
            hr_upscaler: first_or(&config.hr_upscalers, "Latent (bicubic)".to_string()),
            hr_upscalers: config.hr_upscalers.clone(),
            denoising_strength: first_or(&config.denoising_strengths, 0.6),
            denoising_strengths: config.denoising_strengths.clone(),
            batch_size: 1,
            batch_size_prev: config.batch_sizes.get(1).copied().unwrap_or(4),
            batch_hr_scale_prev: hr_scale,
            batch_sizes: config.batch_sizes.clone(),
            clip_skip,
            clip_skip_key: ClipSkipKey::default(),
            pixel_perfect: template_flag(units0.get("pixel_perfect")),
            use_invert_module: config.use_invert_module,
            controlnet_model,
            controlnet_models: config.controlnet_models.clone(),
            controlnet_weight: first_or(&config.controlnet_weights, 1.0),
            controlnet_weights: config.controlnet_weights.clone(),
            controlnet_guidance_end: first_or(&config.controlnet_guidance_ends, 1.0),
            controlnet_guidance_ends: config.controlnet_guidance_ends.clone(),
            detector: first_or(&config.detectors, "lineart".to_string()),
            detectors: config.detectors.clone(),
            init_width,
            init_height,
            interface_width: config.interface_width,
            interface_height: config.interface_height,
            width: init_width as u32,
            height: init_height as u32,
            render_size: (init_width as u32, init_height as u32),
            soft_upscale: 1.0,
            checkpoint: None,
            vae: None,
            autosave: AutosaveFlags {
                seed: config.autosave_seed,
                prompt: config.autosave_prompt,
                negative_prompt: config.autosave_negative_prompt,
                images: config.autosave_images,
                images_max: config.autosave_images_max,
            },
            preset_fields: config.preset_fields.clone(),
            cn_preset_fields: config.cn_preset_fields.clone(),
        };
        session.update_size(None);
        session
    }

    /// Whether this session renders from a watched file.
    pub fn is_img2img(&self) -> bool {
        self.mode == RenderMode::Img2Img
    }

    /// Set the base size from an img2img source image.
    pub fn set_source_size(&mut self, width: u32, height: u32) {
        self.init_width = width as f64;
        self.init_height = height as f64;
        self.update_size(None);
    }

    /// Recompute render and display sizes from the base size, the interface
    /// size and the HR scale (the current one unless overridden).
    pub fn update_size(&mut self, hr_scale: Option<f64>) {
        let hr = hr_scale.unwrap_or(self.hr_scale).max(f64::EPSILON);
        let regions = if self.is_img2img() { 1.0 } else { 2.0 };
        let full_width = self.init_width * regions;
        let init_height = self.init_height.max(1.0);

        let mut iw = self.interface_width.unwrap_or(full_width);
        let mut ih = self.interface_height.unwrap_or(init_height);

        let ratio = full_width / init_height;
        if ih > 0.0 && (iw / ih * 100.0).round() != (ratio * 100.0).round() {
            if ratio < 1.0 {
                iw = (ih * ratio).floor();
            } else {
                ih = (iw / ratio).floor();
            }
        }

        let base_soft = if iw != full_width || ih != init_height {
            (iw / full_width).min(ih / init_height)
        } else {
            1.0
        };

        self.soft_upscale = base_soft / hr;
        let render_w = (self.init_width * hr).floor() as u32;
        let render_h = (self.init_height * hr).floor() as u32;
        self.render_size = (render_w, render_h);
        self.width = ((render_w as f64) * base_soft / hr).round().max(1.0) as u32;
        self.height = ((render_h as f64) * base_soft / hr).round().max(1.0) as u32;
    }

    // ── Seed and prompt ─────────────────────────────────────────────

    pub fn seed_up(&mut self) -> Result<String> {
        self.set_seed(self.seed + self.batch_size as i64)
    }

    pub fn seed_down(&mut self) -> Result<String> {
        self.set_seed(self.seed - self.batch_size as i64)
    }

    /// Pick a fresh seed in `0..=2^32-1`.
    pub fn random_seed(&mut self) -> Result<String> {
        let seed = rand::rng().random_range(0..=u32::MAX as i64);
        self.set_seed(seed)
    }

    pub fn set_seed(&mut self, seed: i64) -> Result<String> {
        self.seed = seed;
        self.persist("seed", json!(seed), self.autosave.seed)?;
        Ok(format!("Seed: {}", seed))
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) -> Result<String> {
        self.prompt = prompt.into();
        self.persist("prompt", json!(self.prompt), self.autosave.prompt)?;
        Ok(format!("New prompt: {}", self.prompt))
    }

    pub fn set_negative_prompt(&mut self, prompt: impl Into<String>) -> Result<String> {
        self.negative_prompt = prompt.into();
        self.persist(
            "negative_prompt",
            json!(self.negative_prompt),
            self.autosave.negative_prompt,
        )?;
        Ok(format!("New negative prompt: {}", self.negative_prompt))
    }

    fn persist(&self, key: &str, value: Value, enabled: bool) -> Result<()> {
        if !enabled {
            return Ok(());
        }
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        update_config(&self.template_path, true, &values)?;
        Ok(())
    }

    /// Adopt the lists fetched from the server. Current selections survive
    /// when the new list still contains them.
    pub fn apply_catalog(&mut self, catalog: &Catalog) {
        fn adopt(list: &mut Vec<String>, current: &mut String, fetched: &[String]) {
            if fetched.is_empty() {
                return;
            }
            *list = fetched.to_vec();
            if !list.contains(current) {
                *current = list[0].clone();
            }
        }

        adopt(&mut self.samplers, &mut self.sampler, &catalog.samplers);
        adopt(&mut self.hr_upscalers, &mut self.hr_upscaler, &catalog.upscalers);

        if let Some(models) = catalog.controlnet_models.as_ref().filter(|m| !m.is_empty()) {
            self.controlnet_models = models.clone();
            let known = self
                .controlnet_model
                .as_ref()
                .is_some_and(|m| models.contains(m));
            if !known {
                self.controlnet_model = models.first().cloned();
            }
        }

        self.checkpoint = catalog.options.checkpoint.clone();
        self.vae = catalog.options.vae.clone();
    }

    // ── Parameter cycles ────────────────────────────────────────────

    pub fn cycle_sampler(&mut self) -> String {
        if let Some(next) = cycle_next(&self.samplers, &self.sampler) {
            self.sampler = next;
        }
        format!("Sampler: {}", self.sampler)
    }

    pub fn cycle_hr_upscaler(&mut self) -> String {
        if let Some(next) = cycle_next(&self.hr_upscalers, &self.hr_upscaler) {
            self.hr_upscaler = next;
        }
        format!("HR upscaler: {}", self.hr_upscaler)
    }

    pub fn cycle_hr_scale(&mut self) -> String {
        if let Some(next) = cycle_next(&self.hr_scales, &self.hr_scale) {
            self.hr_scale = next;
        }
        self.hr_notice()
    }

    pub fn cycle_controlnet_model(&mut self) -> String {
        let current = self.controlnet_model.clone().unwrap_or_default();
        if let Some(next) = cycle_next(&self.controlnet_models, &current) {
            self.controlnet_model = Some(next);
        }
        format!(
            "ControlNet model: {}",
            self.controlnet_model.as_deref().unwrap_or("none")
        )
    }

    pub fn cycle_controlnet_weight(&mut self) -> String {
        if let Some(next) = cycle_next(&self.controlnet_weights, &self.controlnet_weight) {
            self.controlnet_weight = next;
        }
        format!("ControlNet weight: {}", self.controlnet_weight)
    }

    pub fn cycle_guidance_end(&mut self) -> String {
        if let Some(next) = cycle_next(&self.controlnet_guidance_ends, &self.controlnet_guidance_end) {
            self.controlnet_guidance_end = next;
        }
        format!("ControlNet guidance end: {}", self.controlnet_guidance_end)
    }

    pub fn cycle_denoising_strength(&mut self) -> String {
        if let Some(next) = cycle_next(&self.denoising_strengths, &self.denoising_strength) {
            self.denoising_strength = next;
        }
        if self.is_img2img() {
            format!("Denoising: {}", self.denoising_strength)
        } else {
            format!("HR denoising: {}", self.denoising_strength)
        }
    }

    pub fn cycle_detector(&mut self) -> String {
        if let Some(next) = cycle_next(&self.detectors, &self.detector) {
            self.detector = next;
        }
        format!("ControlNet detector: {}", self.detector.replace('_', " "))
    }

    /// Toggle CLIP skip between 1 and 2.
    pub fn toggle_clip_skip(&mut self) -> String {
        self.clip_skip = if self.clip_skip == 1 { 2 } else { 1 };
        format!("CLIP skip: {}", self.clip_skip)
    }

    pub fn toggle_pixel_perfect(&mut self) -> String {
        self.pixel_perfect = !self.pixel_perfect;
        format!(
            "ControlNet pixel perfect mode: {}",
            if self.pixel_perfect { "on" } else { "off" }
        )
    }

    pub fn toggle_autosave_images(&mut self) -> String {
        self.autosave.images = !self.autosave.images;
        format!(
            "Autosave images: {}",
            if self.autosave.images { "on" } else { "off" }
        )
    }

    // ── Mode toggles ────────────────────────────────────────────────

    /// Switch HR fix off, or back on at the previously used scale.
    pub fn toggle_hr(&mut self) -> String {
        if self.hr_scale != 1.0 {
            self.hr_scale_prev = self.hr_scale;
            self.hr_scale = 1.0;
        } else {
            self.hr_scale = self.hr_scale_prev;
        }
        self.hr_notice()
    }

    fn hr_notice(&self) -> String {
        if self.hr_scale == 1.0 {
            "HR scale: off".to_string()
        } else {
            format!("HR scale: {}", self.hr_scale)
        }
    }

    /// Quick mode renders with the template's `quick` profile and no HR pass.
    pub fn toggle_quick(&mut self) -> String {
        self.quick_mode = !self.quick_mode;
        if self.quick_mode {
            self.hr_scale_prev = self.hr_scale;
            self.hr_scale = 1.0;
            "Quick render: on".to_string()
        } else {
            self.hr_scale = self.hr_scale_prev;
            "Quick render: off".to_string()
        }
    }

    /// Switch batch rendering on (at the last batch size) or off.
    pub fn toggle_batch(&mut self) -> String {
        let was_single = self.batch_size == 1;
        if was_single {
            self.batch_size = self.batch_size_prev.max(2);
        } else {
            self.batch_size_prev = self.batch_size;
            self.batch_size = 1;
        }
        self.apply_batch_hr(was_single)
    }

    /// Step to the next batch size in the cycle.
    pub fn cycle_batch_size(&mut self) -> String {
        let was_single = self.batch_size == 1;
        if let Some(next) = cycle_next(&self.batch_sizes, &self.batch_size) {
            self.batch_size = next;
        }
        self.apply_batch_hr(was_single)
    }

    fn apply_batch_hr(&mut self, was_single: bool) -> String {
        if self.batch_size == 1 {
            if !was_single {
                self.hr_scale = self.batch_hr_scale_prev;
            }
            "Batch rendering: off".to_string()
        } else {
            if was_single {
                self.batch_hr_scale_prev = self.hr_scale;
            }
            self.hr_scale = 1.0;
            format!("Batch rendering size: {}", self.batch_size)
        }
    }

    // ── Presets ─────────────────────────────────────────────────────

    /// Current value of a preset field, if the field is known.
    pub fn preset_value(&self, field: &str) -> Option<Value> {
        let value = match field {
            "clip_skip" => json!(self.clip_skip),
            "hr_scale" => json!(self.hr_scale),
            "hr_upscaler" => json!(self.hr_upscaler),
            "denoising_strength" => json!(self.denoising_strength),
            "sampler" => json!(self.sampler),
            "controlnet_model" => json!(self.controlnet_model),
            "controlnet_weight" => json!(self.controlnet_weight),
            "controlnet_guidance_end" => json!(self.controlnet_guidance_end),
            _ => return None,
        };
        Some(value)
    }

    /// Apply one preset field. Returns `false` for unknown fields or values
    /// of the wrong type.
    pub fn apply_preset_value(&mut self, field: &str, value: &Value) -> bool {
        match field {
            "clip_skip" => value.as_u64().map(|v| self.clip_skip = v as u32).is_some(),
            "hr_scale" => value.as_f64().map(|v| self.hr_scale = v).is_some(),
            "hr_upscaler" => value
                .as_str()
                .map(|v| self.hr_upscaler = v.to_string())
                .is_some(),
            "denoising_strength" => value.as_f64().map(|v| self.denoising_strength = v).is_some(),
            "sampler" => value.as_str().map(|v| self.sampler = v.to_string()).is_some(),
            "controlnet_model" => value
                .as_str()
                .map(|v| self.controlnet_model = Some(v.to_string()))
                .is_some(),
            "controlnet_weight" => value.as_f64().map(|v| self.controlnet_weight = v).is_some(),
            "controlnet_guidance_end" => value
                .as_f64()
                .map(|v| self.controlnet_guidance_end = v)
                .is_some(),
            _ => false,
        }
    }

    // ── Configuration dump ──────────────────────────────────────────

    /// Settings as `(label, value)` pairs for display. Section headers have
    /// an empty value. Quick-mode overrides are shown with a `-quick-` tag.
    pub fn config_dump(&self) -> Vec<(String, String)> {
        let quick = self.quick.as_ref().filter(|_| self.quick_mode);
        let tag = |v: String| format!("{} -quick-", v);

        let prompt = match quick {
            Some(q) => format!("{}{}", self.prompt, q.lora_suffix()),
            None => self.prompt.clone(),
        };
        let sampler = match quick.and_then(|q| q.sampler.clone()) {
            Some(s) => tag(s),
            None => self.sampler.clone(),
        };
        let steps = match quick {
            Some(q) => tag(q.steps_for(self.steps).to_string()),
            None => self.steps.to_string(),
        };
        let cfg_scale = match quick.and_then(|q| q.cfg_scale) {
            Some(c) => tag(c.to_string()),
            None => self.cfg_scale.to_string(),
        };

        let mut rows: Vec<(&str, String)> = vec![
            ("Prompt", String::new()),
            ("prompt", prompt),
            ("negative prompt", self.negative_prompt.clone()),
            ("seed", self.seed.to_string()),
            ("Render", String::new()),
        ];
        if let Some(checkpoint) = &self.checkpoint {
            rows.push(("checkpoint", checkpoint.clone()));
        }
        rows.push(("sampler", sampler));
        if let Some(vae) = &self.vae {
            rows.push(("vae", vae.clone()));
        }
        rows.extend([
            (
                "render size",
                format!("{}x{}", self.render_size.0, self.render_size.1),
            ),
            ("steps", steps),
            ("cfg scale", cfg_scale),
            ("hr scale", self.hr_scale.to_string()),
            ("hr upscaler", self.hr_upscaler.clone()),
            ("denoising strength", self.denoising_strength.to_string()),
            ("clip skip", self.clip_skip.to_string()),
        ]);
        if !self.is_img2img() {
            rows.extend([
                ("ControlNet", String::new()),
                (
                    "controlnet model",
                    self.controlnet_model.clone().unwrap_or_default(),
                ),
                ("controlnet weight", self.controlnet_weight.to_string()),
                (
                    "controlnet guidance end",
                    self.controlnet_guidance_end.to_string(),
                ),
                ("pixel perfect", self.pixel_perfect.to_string()),
                ("detector", self.detector.clone()),
            ]);
        }

        rows.into_iter()
            .map(|(label, value)| (label.to_string(), value))
            .collect()
    }
}

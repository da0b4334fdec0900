use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{PaintError, Result};
use crate::types::RenderMode;

/// Path of the distribution default for a config file (`<file>-dist`).
pub fn dist_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-dist");
    PathBuf::from(name)
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PaintError::io(format!("Failed to read {}", path.display()), e))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)
        .map_err(|e| PaintError::io(format!("Failed to write {}", path.display()), e))
}

fn ensure_local_copy(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let dist = dist_path(path);
    std::fs::copy(&dist, path).map_err(|e| {
        PaintError::io(
            format!("Failed to seed {} from {}", path.display(), dist.display()),
            e,
        )
    })?;
    Ok(())
}

/// Load a JSON config file.
///
/// A missing file is seeded from `<file>-dist`. When the local object has a
/// different key set than the distribution file, missing keys are back-filled
/// from the distribution and the merged document is written back.
pub fn load_config(path: &Path) -> Result<Value> {
    ensure_local_copy(path)?;
    let local = read_json(path)?;

    let dist = dist_path(path);
    if !dist.exists() {
        return Ok(local);
    }
    let dist_content = read_json(&dist)?;

    match (local, dist_content) {
        (Value::Object(local), Value::Object(mut merged)) => {
            let same_keys =
                local.len() == merged.len() && local.keys().all(|k| merged.contains_key(k));
            if same_keys {
                return Ok(Value::Object(local));
            }
            for (k, v) in local {
                merged.insert(k, v);
            }
            let merged = Value::Object(merged);
            write_json(path, &merged)?;
            info!("Updated {} with new settings", path.display());
            Ok(merged)
        }
        (local, _) => Ok(local),
    }
}

/// Overlay `values` onto a config file's content, optionally writing the
/// result back to disk. Returns the merged content.
pub fn update_config(path: &Path, write: bool, values: &Map<String, Value>) -> Result<Value> {
    ensure_local_copy(path)?;
    let mut content = read_json(path)?;
    if let Some(obj) = content.as_object_mut() {
        for (k, v) in values {
            obj.insert(k.clone(), v.clone());
        }
    }
    if write {
        write_json(path, &content)?;
    }
    Ok(content)
}

/// Accept both JSON booleans and the legacy `"true"` / `"false"` strings.
pub(crate) fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// Global settings from `config.json`.
///
/// The value lists (`hr_scales`, `batch_sizes`, ...) are the cycles the
/// session steps through when the user presses the matching command.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaintConfig {
    /// Generation server base URL.
    pub url: String,
    pub interface_width: Option<f64>,
    pub interface_height: Option<f64>,
    pub hr_scales: Vec<f64>,
    pub hr_upscalers: Vec<String>,
    #[serde(deserialize_with = "flag")]
    pub override_hr_upscalers: bool,
    pub denoising_strengths: Vec<f64>,
    pub samplers: Vec<String>,
    #[serde(deserialize_with = "flag")]
    pub override_samplers: bool,
    pub detectors: Vec<String>,
    pub controlnet_models: Vec<String>,
    pub controlnet_weights: Vec<f64>,
    pub controlnet_guidance_ends: Vec<f64>,
    pub batch_sizes: Vec<u32>,
    #[serde(deserialize_with = "flag")]
    pub autosave_seed: bool,
    #[serde(deserialize_with = "flag")]
    pub autosave_prompt: bool,
    #[serde(deserialize_with = "flag")]
    pub autosave_negative_prompt: bool,
    #[serde(deserialize_with = "flag")]
    pub autosave_images: bool,
    pub autosave_images_max: u32,
    pub preset_fields: Vec<String>,
    pub cn_preset_fields: Vec<String>,
    /// Send the sketch through the server's `invert` module instead of
    /// inverting it locally.
    #[serde(deserialize_with = "flag")]
    pub use_invert_module: bool,
    /// Debounce window in seconds. `None` = 0.5 (0 in img2img mode).
    pub render_wait: Option<f64>,
    /// Minimum HR second-pass step count.
    pub hr_steps_floor: u32,
    /// Transport-level attempts per request.
    pub retries: u32,
}

impl Default for PaintConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:7860".to_string(),
            interface_width: None,
            interface_height: None,
            hr_scales: vec![1.0, 1.25, 1.5, 2.0],
            hr_upscalers: vec!["Latent (bicubic)".to_string()],
            override_hr_upscalers: false,
            denoising_strengths: vec![0.6],
            samplers: vec!["DDIM".to_string()],
            override_samplers: false,
            detectors: vec!["lineart".to_string()],
            controlnet_models: Vec::new(),
            controlnet_weights: vec![0.6, 1.0, 1.6],
            controlnet_guidance_ends: vec![1.0, 0.2, 0.3],
            batch_sizes: vec![1, 4, 9, 16],
            autosave_seed: false,
            autosave_prompt: false,
            autosave_negative_prompt: false,
            autosave_images: false,
            autosave_images_max: 5,
            preset_fields: vec![
                "hr_scale".to_string(),
                "hr_upscaler".to_string(),
                "denoising_strength".to_string(),
            ],
            cn_preset_fields: vec![
                "controlnet_model".to_string(),
                "controlnet_weight".to_string(),
                "controlnet_guidance_end".to_string(),
            ],
            use_invert_module: true,
            render_wait: None,
            hr_steps_floor: 4,
            retries: 5,
        }
    }
}

impl PaintConfig {
    /// Load `config.json` from `dir`, back-filling from `config.json-dist`.
    pub fn load(dir: &Path) -> Result<Self> {
        let value = load_config(&dir.join("config.json"))?;
        Self::from_value(value)
    }

    /// Build from an already loaded JSON document.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: PaintConfig = serde_json::from_value(value)
            .map_err(|e| PaintError::Config(format!("config.json: {}", e)))?;
        Ok(config.normalized())
    }

    /// Guarantee the invariants the session relies on: `1.0` heads the HR
    /// scale cycle, `1` heads the batch size cycle, and no cycle is empty.
    pub fn normalized(mut self) -> Self {
        if !self.hr_scales.contains(&1.0) {
            self.hr_scales.insert(0, 1.0);
        }
        if self.hr_scales.len() < 2 {
            self.hr_scales.push(1.25);
        }
        if !self.batch_sizes.contains(&1) {
            self.batch_sizes.insert(0, 1);
        }
        if self.batch_sizes.len() < 2 {
            self.batch_sizes.push(4);
        }
        let defaults = PaintConfig::default();
        if self.hr_upscalers.is_empty() {
            self.hr_upscalers = defaults.hr_upscalers;
        }
        if self.denoising_strengths.is_empty() {
            self.denoising_strengths = defaults.denoising_strengths;
        }
        if self.samplers.is_empty() {
            self.samplers = defaults.samplers;
        }
        if self.detectors.is_empty() {
            self.detectors = defaults.detectors;
        }
        if self.controlnet_weights.is_empty() {
            self.controlnet_weights = defaults.controlnet_weights;
        }
        if self.controlnet_guidance_ends.is_empty() {
            self.controlnet_guidance_ends = defaults.controlnet_guidance_ends;
        }
        self
    }
}

/// Timing and mode settings for the [`RenderScheduler`](crate::RenderScheduler).
///
/// Use [`SchedulerConfig::builder()`] for ergonomic construction, or
/// [`SchedulerConfig::default()`] for the interactive sketch defaults.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after the last stroke before a render fires.
    pub render_wait: Duration,

    /// Re-check interval while debouncing.
    pub debounce_tick: Duration,

    /// Progress polling cadence while a render is in flight.
    pub progress_interval: Duration,

    /// Re-check interval of the img2img source file watch.
    pub watch_interval: Duration,

    /// Minimum HR second-pass step count.
    pub hr_steps_floor: u32,

    /// Sketch (txt2img + ControlNet) or watched-file (img2img) rendering.
    pub mode: RenderMode,

    /// Directory holding `controlnet.json` / `img2img.json` templates.
    pub config_dir: PathBuf,

    /// Directory receiving autosaved renders.
    pub output_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            render_wait: Duration::from_millis(500),
            debounce_tick: Duration::from_millis(250),
            progress_interval: Duration::from_millis(250),
            watch_interval: Duration::from_secs(1),
            hr_steps_floor: 4,
            mode: RenderMode::Txt2Img,
            config_dir: PathBuf::from("configs"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl SchedulerConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Derive scheduler settings from the global config for `mode`.
    pub fn from_paint_config(config: &PaintConfig, mode: RenderMode, config_dir: PathBuf) -> Result<Self> {
        let default_wait = match mode {
            RenderMode::Txt2Img => 0.5,
            RenderMode::Img2Img => 0.0,
        };
        let wait = config.render_wait.unwrap_or(default_wait).max(0.0);
        let render_wait = Duration::try_from_secs_f64(wait)
            .map_err(|e| PaintError::Config(format!("render_wait {}: {}", wait, e)))?;
        Ok(Self::builder()
            .with_render_wait(render_wait)
            .with_hr_steps_floor(config.hr_steps_floor)
            .with_mode(mode)
            .with_config_dir(config_dir)
            .build())
    }

    /// Full path of the template for the configured mode.
    pub fn template_path(&self) -> PathBuf {
        self.config_dir.join(self.mode.template_file())
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Set the debounce window.
    pub fn with_render_wait(mut self, wait: Duration) -> Self {
        self.config.render_wait = wait;
        self
    }

    /// Set the debounce re-check interval.
    pub fn with_debounce_tick(mut self, tick: Duration) -> Self {
        self.config.debounce_tick = tick;
        self
    }

    /// Set the progress polling interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Set the img2img watch interval.
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.config.watch_interval = interval;
        self
    }

    /// Set the minimum HR second-pass step count.
    pub fn with_hr_steps_floor(mut self, floor: u32) -> Self {
        self.config.hr_steps_floor = floor;
        self
    }

    /// Set the render mode.
    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the template directory.
    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config.config_dir = dir;
        self
    }

    /// Set the autosave output directory.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output_dir = dir;
        self
    }

    /// Build the final [`SchedulerConfig`].
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_seeds_from_dist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(dist_path(&path), r#"{"url": "http://host:7860"}"#).unwrap();

        let value = load_config(&path).unwrap();
        assert_eq!(value["url"], "http://host:7860");
        assert!(path.exists());
    }

    #[test]
    fn test_load_config_backfills_missing_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(dist_path(&path), r#"{"url": "http://dist", "steps": 16}"#).unwrap();
        std::fs::write(&path, r#"{"url": "http://local"}"#).unwrap();

        let value = load_config(&path).unwrap();
        assert_eq!(value["url"], "http://local");
        assert_eq!(value["steps"], 16);

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["steps"], 16);
    }

    #[test]
    fn test_load_config_missing_everything_fails() {
        let dir = tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn test_update_config_write_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("controlnet.json");
        std::fs::write(&path, r#"{"seed": 1, "prompt": "a"}"#).unwrap();

        let mut values = Map::new();
        values.insert("seed".into(), json!(42));

        let merged = update_config(&path, false, &values).unwrap();
        assert_eq!(merged["seed"], 42);
        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["seed"], 1);

        update_config(&path, true, &values).unwrap();
        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["seed"], 42);
        assert_eq!(on_disk["prompt"], "a");
    }

    #[test]
    fn test_paint_config_legacy_flags() {
        let config = PaintConfig::from_value(json!({
            "autosave_seed": "true",
            "autosave_prompt": false,
            "override_samplers": "false",
            "autosave_images": true
        }))
        .unwrap();
        assert!(config.autosave_seed);
        assert!(!config.autosave_prompt);
        assert!(!config.override_samplers);
        assert!(config.autosave_images);
    }

    #[test]
    fn test_paint_config_normalizes_cycles() {
        let config = PaintConfig::from_value(json!({
            "hr_scales": [1.5, 2.0],
            "batch_sizes": [4, 9]
        }))
        .unwrap();
        assert_eq!(config.hr_scales, vec![1.0, 1.5, 2.0]);
        assert_eq!(config.batch_sizes, vec![1, 4, 9]);
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::builder()
            .with_render_wait(Duration::from_secs(1))
            .with_hr_steps_floor(8)
            .with_mode(RenderMode::Img2Img)
            .with_config_dir(PathBuf::from("cfg"))
            .build();
        assert_eq!(config.render_wait, Duration::from_secs(1));
        assert_eq!(config.debounce_tick, Duration::from_millis(250));
        assert_eq!(config.hr_steps_floor, 8);
        assert_eq!(config.template_path(), PathBuf::from("cfg").join("img2img.json"));
    }

    #[test]
    fn test_img2img_has_no_default_wait() {
        let config = SchedulerConfig::from_paint_config(
            &PaintConfig::default(),
            RenderMode::Img2Img,
            PathBuf::from("configs"),
        )
        .unwrap();
        assert_eq!(config.render_wait, Duration::ZERO);

        let config = SchedulerConfig::from_paint_config(
            &PaintConfig::default(),
            RenderMode::Txt2Img,
            PathBuf::from("configs"),
        )
        .unwrap();
        assert_eq!(config.render_wait, Duration::from_millis(500));
    }

    #[test]
    fn test_out_of_range_render_wait_is_config_error() {
        let config = PaintConfig {
            render_wait: Some(1e300),
            ..PaintConfig::default()
        };
        let err = SchedulerConfig::from_paint_config(&config, RenderMode::Txt2Img, PathBuf::from("configs"))
            .unwrap_err();
        assert!(matches!(err, PaintError::Config(_)));
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::{dist_path, load_config, PaintConfig};
use crate::error::{PaintError, Result};
use crate::session::Session;
use crate::types::ClipSkipKey;

/// The two preset families, stored under their own key in `presets.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetKind {
    Render,
    ControlNet,
}

impl PresetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetKind::Render => "render",
            PresetKind::ControlNet => "controlnet",
        }
    }

    /// Session fields a preset of this kind stores.
    fn stored_fields(&self) -> &'static [&'static str] {
        match self {
            PresetKind::Render => &[
                "clip_skip",
                "hr_scale",
                "hr_upscaler",
                "denoising_strength",
                "sampler",
            ],
            PresetKind::ControlNet => &[
                "controlnet_weight",
                "controlnet_guidance_end",
                "controlnet_model",
            ],
        }
    }
}

impl std::fmt::Display for PresetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Presets keyed by digit `0`-`9`, persisted in `presets.json`.
///
/// Slot `0` of each kind is a snapshot of the configured defaults, rewritten
/// at every start; slots `1`-`9` are user saves.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    presets: BTreeMap<String, Slots>,
}

type Slots = BTreeMap<String, Map<String, Value>>;

impl PresetStore {
    /// Load the store, seeding from `presets.json-dist` when present. A
    /// missing file starts an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let presets = if path.exists() || dist_path(path).exists() {
            serde_json::from_value(load_config(path)?)
                .map_err(|e| PaintError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            presets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slots(&mut self, kind: PresetKind) -> &mut Slots {
        self.presets.entry(kind.as_str().to_string()).or_default()
    }

    pub fn get(&self, kind: PresetKind, index: u8) -> Option<&Map<String, Value>> {
        self.presets.get(kind.as_str())?.get(&index.to_string())
    }

    fn persist(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.presets)?;
        std::fs::write(&self.path, text)
            .map_err(|e| PaintError::io(format!("Failed to write {}", self.path.display()), e))
    }

    /// Record the configured defaults as slot `0` of both kinds.
    pub fn snapshot_defaults(&mut self, config: &PaintConfig, template: &Value) -> Result<()> {
        let overrides = template.get("override_settings");
        let clip_skip = overrides
            .and_then(|o| {
                o.get(ClipSkipKey::Legacy.as_str())
                    .or_else(|| o.get(ClipSkipKey::ClipSkip.as_str()))
            })
            .cloned()
            .unwrap_or(json!(1));
        let enable_hr = match template.get("enable_hr") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let hr_scale = if enable_hr {
            config.hr_scales.get(1).copied().unwrap_or(1.0)
        } else {
            1.0
        };

        let render = object(json!({
            "clip_skip": clip_skip,
            "hr_scale": hr_scale,
            "hr_upscaler": config.hr_upscalers.first(),
            "denoising_strength": config.denoising_strengths.first(),
            "sampler": config.samplers.first(),
        }));
        let controlnet = object(json!({
            "controlnet_weight": config.controlnet_weights.first(),
            "controlnet_guidance_end": config.controlnet_guidance_ends.first(),
            "controlnet_model": config.controlnet_models.first(),
        }));
        self.slots(PresetKind::Render).insert("0".into(), render);
        self.slots(PresetKind::ControlNet).insert("0".into(), controlnet);
        self.persist()
    }

    /// Save the session's current values into slot `index` (1-9).
    pub fn save(&mut self, kind: PresetKind, index: u8, session: &Session) -> Result<String> {
        if !(1..=9).contains(&index) {
            return Err(PaintError::Preset(format!(
                "Cannot save {} preset {}: slots are 1-9",
                kind, index
            )));
        }
        let values: Map<String, Value> = kind
            .stored_fields()
            .iter()
            .filter_map(|field| session.preset_value(field).map(|v| (field.to_string(), v)))
            .collect();
        self.slots(kind).insert(index.to_string(), values);
        self.persist()?;
        debug!("Saved {} preset {}", kind, index);
        Ok(format!("Save {} preset {}", kind, index))
    }

    /// Apply slot `index` to the session, limited to the configured preset
    /// fields. Returns a multi-line summary of what changed.
    pub fn apply(&self, kind: PresetKind, index: u8, session: &mut Session) -> Result<String> {
        let preset = self
            .get(kind, index)
            .ok_or_else(|| PaintError::Preset(format!("No {} preset {}", kind, index)))?;

        let mut text = if index == 0 {
            match kind {
                PresetKind::Render => "Load default settings:".to_string(),
                PresetKind::ControlNet => String::new(),
            }
        } else {
            format!("Load {} preset {}:", kind, index)
        };

        let fields = match kind {
            PresetKind::Render => session.preset_fields.clone(),
            PresetKind::ControlNet => session.cn_preset_fields.clone(),
        };
        for field in &fields {
            let Some(value) = preset.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            if session.apply_preset_value(field, value) {
                text.push_str(&format!("\n  {}: {}", label(field), display_value(value)));
            }
        }
        Ok(text.trim_start_matches('\n').to_string())
    }

    /// Apply both default snapshots (render then controlnet).
    pub fn apply_defaults(&self, session: &mut Session) -> Result<String> {
        let render = self.apply(PresetKind::Render, 0, session)?;
        let controlnet = self.apply(PresetKind::ControlNet, 0, session)?;
        if controlnet.is_empty() {
            Ok(render)
        } else {
            Ok(format!("{}\n{}", render, controlnet))
        }
    }
}

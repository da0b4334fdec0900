//! Request payload assembly.
//!
//! Payloads start from the per-mode template JSON and get the session state
//! overlaid on top, so any field the template sets and the session does not
//! own (scheduler, restore faces, extra scripts...) passes through untouched.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::session::Session;
use crate::types::{RenderImages, RenderMode};

/// Optional fast-render overrides stored under the template's `quick` key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuickProfile {
    pub steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub sampler: Option<String>,
    pub lora: Option<String>,
    pub lora_weight: Option<f64>,
}

impl QuickProfile {
    pub fn from_template(template: &Value) -> Option<Self> {
        let quick = template.get("quick")?;
        serde_json::from_value(quick.clone()).ok()
    }

    /// Step count in quick mode: the explicit value, or half the base steps.
    pub fn steps_for(&self, steps: u32) -> u32 {
        self.steps.unwrap_or(steps / 2)
    }

    /// ` <lora:name:weight>` prompt suffix, empty when no LoRA is set.
    pub fn lora_suffix(&self) -> String {
        match &self.lora {
            Some(lora) if !lora.is_empty() => {
                format!(" <lora:{}:{}>", lora, self.lora_weight.unwrap_or(1.0))
            }
            _ => String::new(),
        }
    }
}

/// Step count of the HR second pass, never below `floor`.
pub fn hr_second_pass_steps(steps: u32, denoising_strength: f64, floor: u32) -> u32 {
    let scaled = (steps as f64 * denoising_strength).floor().max(0.0) as u32;
    scaled.max(floor)
}

/// Number of trailing non-render images (control maps) in a response.
pub fn ignored_image_count(hr_scale: f64) -> usize {
    if hr_scale != 1.0 {
        2
    } else {
        1
    }
}

/// Split returned images into a single render or a batch.
///
/// The server appends its control maps after the renders: one, plus one more
/// when the HR pass ran. Exactly `1 + ignore` images means a single render;
/// anything else is a batch of `returned - ignore`. img2img responses carry
/// no control maps and always use the first image.
pub fn classify_images(images: Vec<String>, hr_scale: f64, mode: RenderMode) -> Option<RenderImages> {
    let mut images = images;
    if images.is_empty() {
        return None;
    }
    if mode == RenderMode::Img2Img {
        return Some(RenderImages::Single(images.swap_remove(0)));
    }

    let ignore = ignored_image_count(hr_scale);
    if images.len() == 1 + ignore {
        return Some(RenderImages::Single(images.swap_remove(0)));
    }
    let keep = images.len().saturating_sub(ignore);
    if keep == 0 {
        return Some(RenderImages::Single(images.swap_remove(0)));
    }
    images.truncate(keep);
    Some(RenderImages::Batch(images))
}

fn object_entry<'a>(payload: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = payload
        .as_object_mut()?
        .entry(key.to_string())
        .or_insert_with(|| json!({}));
    if !entry.is_object() {
        *entry = json!({});
    }
    entry.as_object_mut()
}

/// Quick profile to apply, if quick mode is on and the template has one.
fn active_quick(template: &Value, session: &Session) -> Option<QuickProfile> {
    if session.quick_mode {
        QuickProfile::from_template(template)
    } else {
        None
    }
}

fn apply_quick_steps(payload: &mut Value, quick: &QuickProfile) {
    let steps = payload.get("steps").and_then(|v| v.as_u64()).unwrap_or(16) as u32;
    payload["steps"] = json!(quick.steps_for(steps));
    if let Some(cfg) = quick.cfg_scale {
        payload["cfg_scale"] = json!(cfg);
    }
}

/// Overlay the generation fields shared by both modes.
fn apply_generation(payload: &mut Value, session: &Session, quick: Option<&QuickProfile>) {
    let mut prompt = session.prompt.clone();
    if let Some(q) = quick {
        prompt.push_str(&q.lora_suffix());
    }
    payload["seed"] = json!(session.seed);
    payload["prompt"] = json!(prompt);
    payload["negative_prompt"] = json!(session.negative_prompt);
    payload["denoising_strength"] = json!(session.denoising_strength);

    let sampler = quick
        .and_then(|q| q.sampler.clone())
        .unwrap_or_else(|| session.sampler.clone());
    payload["sampler_name"] = json!(sampler);

    if let Some(overrides) = object_entry(payload, "override_settings") {
        overrides.insert(
            session.clip_skip_key.as_str().to_string(),
            json!(session.clip_skip),
        );
    }
}

/// Build the txt2img payload for a sketch submission.
///
/// `sketch_b64` is the encoded sketch region; it becomes the input image of
/// the first ControlNet unit.
pub fn build_txt2img_payload(
    template: Value,
    session: &Session,
    sketch_b64: String,
    hr_steps_floor: u32,
) -> Value {
    let mut payload = template;
    if !payload.is_object() {
        payload = json!({});
    }
    let quick = active_quick(&payload, session);
    if let Some(q) = &quick {
        apply_quick_steps(&mut payload, q);
    }

    let units = payload
        .as_object_mut()
        .map(|m| m.entry("controlnet_units").or_insert_with(|| json!([{}])));
    if let Some(units) = units {
        if !units.is_array() {
            *units = json!([{}]);
        }
        if let Some(list) = units.as_array_mut() {
            if list.is_empty() {
                list.push(json!({}));
            }
            if !list[0].is_object() {
                list[0] = json!({});
            }
            let unit = &mut list[0];
            unit["input_image"] = json!(sketch_b64);
            unit["model"] = json!(session.controlnet_model);
            unit["weight"] = json!(session.controlnet_weight);
            if unit.get("guidance_start").map_or(true, Value::is_null) {
                unit["guidance_start"] = json!(0.0);
            }
            unit["guidance_end"] = json!(session.controlnet_guidance_end);
            unit["pixel_perfect"] = json!(session.pixel_perfect);
            if session.use_invert_module {
                unit["module"] = json!("invert");
            }
            if !session.pixel_perfect {
                unit["processor_res"] = json!(session.width.min(session.height));
            }
        }
    }

    let steps = payload.get("steps").and_then(|v| v.as_u64()).unwrap_or(16) as u32;
    payload["hr_second_pass_steps"] = json!(hr_second_pass_steps(
        steps,
        session.denoising_strength,
        hr_steps_floor
    ));
    payload["enable_hr"] = json!(session.hr_scale > 1.0);
    payload["batch_size"] = json!(session.batch_size);
    payload["hr_scale"] = json!(session.hr_scale);
    payload["hr_upscaler"] = json!(session.hr_upscaler);

    apply_generation(&mut payload, session, quick.as_ref());
    payload
}

/// Build the img2img payload for a watched source image.
pub fn build_img2img_payload(
    template: Value,
    session: &Session,
    source_b64: String,
    source_size: (u32, u32),
) -> Value {
    let mut payload = template;
    if !payload.is_object() {
        payload = json!({});
    }
    let quick = active_quick(&payload, session);

    payload["width"] = json!(source_size.0);
    payload["height"] = json!(source_size.1);
    payload["init_images"] = json!([source_b64]);
    apply_generation(&mut payload, session, quick.as_ref());

    if let Some(q) = &quick {
        apply_quick_steps(&mut payload, q);
    }
    payload
}

/// Move legacy `controlnet_units` into `alwayson_scripts.controlnet.args`,
/// the form `sdapi/v1/*2img` expects. The input is left untouched.
pub fn controlnet_to_sdapi(payload: &Value) -> Value {
    let mut out = payload.clone();
    let Some(map) = out.as_object_mut() else {
        return out;
    };

    let has_args = map
        .get("alwayson_scripts")
        .and_then(|s| s.get("controlnet"))
        .and_then(|c| c.get("args"))
        .and_then(|a| a.as_array())
        .is_some_and(|a| !a.is_empty());

    let units = map
        .get("controlnet_units")
        .and_then(|u| u.as_array())
        .filter(|u| !u.is_empty())
        .cloned();

    let scripts = map
        .entry("alwayson_scripts".to_string())
        .or_insert_with(|| json!({}));
    if !scripts.is_object() {
        *scripts = json!({});
    }

    match (units, has_args) {
        (Some(units), false) => {
            scripts["controlnet"] = json!({ "args": units });
            map.remove("controlnet_units");
        }
        (_, true) => {}
        (None, false) => {
            let controlnet = scripts.get("controlnet");
            if controlnet.map_or(true, |c| c.as_object().map_or(true, |o| o.is_empty())) {
                scripts["controlnet"] = json!({ "args": [] });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaintConfig;
    use std::path::Path;

    fn session() -> Session {
        Session::new(
            &PaintConfig::default(),
            &json!({"seed": 7, "prompt": "a house", "negative_prompt": "ugly"}),
            Path::new("controlnet.json"),
            RenderMode::Txt2Img,
        )
    }

    #[test]
    fn test_hr_steps_floor() {
        assert_eq!(hr_second_pass_steps(10, 0.1, 8), 8);
        assert_eq!(hr_second_pass_steps(40, 0.5, 4), 20);
        assert_eq!(hr_second_pass_steps(16, 0.6, 4), 9);
    }

    #[test]
    fn test_classify_batch_of_four() {
        let images: Vec<String> = (0..5).map(|i| format!("img{}", i)).collect();
        let result = classify_images(images, 1.0, RenderMode::Txt2Img).unwrap();
        assert_eq!(
            result,
            RenderImages::Batch(vec!["img0".into(), "img1".into(), "img2".into(), "img3".into()])
        );
    }

    #[test]
    fn test_classify_single() {
        let images = vec!["render".to_string(), "map".to_string()];
        assert_eq!(
            classify_images(images, 1.0, RenderMode::Txt2Img),
            Some(RenderImages::Single("render".into()))
        );

        let images = vec!["render".to_string(), "map".to_string(), "map2".to_string()];
        assert_eq!(
            classify_images(images, 1.5, RenderMode::Txt2Img),
            Some(RenderImages::Single("render".into()))
        );
    }

    #[test]
    fn test_classify_img2img_takes_first() {
        let images = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            classify_images(images, 1.0, RenderMode::Img2Img),
            Some(RenderImages::Single("a".into()))
        );
        assert_eq!(classify_images(Vec::new(), 1.0, RenderMode::Img2Img), None);
    }

    #[test]
    fn test_txt2img_payload_fields() {
        let mut s = session();
        s.controlnet_model = Some("control_scribble".into());
        s.hr_scale = 1.5;
        s.batch_size = 1;
        let template = json!({"steps": 20, "cfg_scale": 7, "scheduler": "karras"});
        let payload = build_txt2img_payload(template, &s, "SKETCH".into(), 4);

        let unit = &payload["controlnet_units"][0];
        assert_eq!(unit["input_image"], "SKETCH");
        assert_eq!(unit["model"], "control_scribble");
        assert_eq!(unit["guidance_start"], 0.0);
        assert_eq!(unit["module"], "invert");
        assert_eq!(unit["processor_res"], 512);
        assert_eq!(payload["enable_hr"], true);
        assert_eq!(payload["hr_second_pass_steps"], 12);
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["prompt"], "a house");
        assert_eq!(payload["negative_prompt"], "ugly");
        assert_eq!(payload["override_settings"]["clip_skip"], 1);
        assert_eq!(payload["scheduler"], "karras");
    }

    #[test]
    fn test_txt2img_keeps_guidance_start_and_pixel_perfect() {
        let mut s = session();
        s.pixel_perfect = true;
        s.use_invert_module = false;
        let template = json!({"steps": 20, "controlnet_units": [{"guidance_start": 0.2}]});
        let payload = build_txt2img_payload(template, &s, "X".into(), 4);

        let unit = &payload["controlnet_units"][0];
        assert_eq!(unit["guidance_start"], 0.2);
        assert_eq!(unit["pixel_perfect"], true);
        assert!(unit.get("processor_res").is_none());
        assert!(unit.get("module").is_none());
        assert_eq!(payload["enable_hr"], false);
    }

    #[test]
    fn test_quick_profile_applies() {
        let mut s = session();
        s.toggle_quick();
        let template = json!({
            "steps": 20,
            "cfg_scale": 7,
            "quick": {"cfg_scale": 1.5, "sampler": "LCM", "lora": "lcm", "lora_weight": 0.7}
        });
        let payload = build_txt2img_payload(template, &s, "X".into(), 4);
        assert_eq!(payload["steps"], 10);
        assert_eq!(payload["cfg_scale"], 1.5);
        assert_eq!(payload["sampler_name"], "LCM");
        assert_eq!(payload["prompt"], "a house <lora:lcm:0.7>");
        assert_eq!(payload["hr_second_pass_steps"], 6);
    }

    #[test]
    fn test_quick_mode_without_profile_is_noop() {
        let mut s = session();
        s.toggle_quick();
        let payload = build_txt2img_payload(json!({"steps": 20}), &s, "X".into(), 4);
        assert_eq!(payload["steps"], 20);
        assert_eq!(payload["prompt"], "a house");
    }

    #[test]
    fn test_img2img_payload() {
        let mut s = session();
        s.clip_skip_key = crate::types::ClipSkipKey::Legacy;
        let payload = build_img2img_payload(json!({"steps": 30}), &s, "SRC".into(), (640, 480));
        assert_eq!(payload["init_images"][0], "SRC");
        assert_eq!(payload["width"], 640);
        assert_eq!(payload["height"], 480);
        assert_eq!(payload["override_settings"]["CLIP_stop_at_last_layers"], 1);
        assert!(payload.get("controlnet_units").is_none());
    }

    #[test]
    fn test_controlnet_to_sdapi_moves_units() {
        let payload = json!({"prompt": "x", "controlnet_units": [{"model": "m"}]});
        let converted = controlnet_to_sdapi(&payload);
        assert!(converted.get("controlnet_units").is_none());
        assert_eq!(converted["alwayson_scripts"]["controlnet"]["args"][0]["model"], "m");
        assert!(payload.get("controlnet_units").is_some());
    }

    #[test]
    fn test_controlnet_to_sdapi_keeps_existing_args() {
        let payload = json!({
            "controlnet_units": [{"model": "legacy"}],
            "alwayson_scripts": {"controlnet": {"args": [{"model": "new"}]}}
        });
        let converted = controlnet_to_sdapi(&payload);
        assert_eq!(converted["alwayson_scripts"]["controlnet"]["args"][0]["model"], "new");
        assert!(converted.get("controlnet_units").is_some());
    }

    #[test]
    fn test_controlnet_to_sdapi_empty() {
        let converted = controlnet_to_sdapi(&json!({"prompt": "x"}));
        assert_eq!(converted["alwayson_scripts"]["controlnet"]["args"], json!([]));
    }
}

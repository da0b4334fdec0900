use std::cmp::Reverse;
use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PaintConfig;
use crate::error::{PaintError, Result};
use crate::payload::controlnet_to_sdapi;
use crate::types::*;
use crate::Backend;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Async client for an AUTOMATIC1111-style generation server with the
/// ControlNet extension.
///
/// Unlike a typical API client, the render-facing methods never return an
/// error: transport failures (after `retries` attempts) come back as a
/// synthetic HTTP 503 so the caller applies a single status check.
///
/// # Example
/// ```no_run
/// use sd_paint::SdClient;
///
/// # async fn example() {
/// let client = SdClient::new("http://127.0.0.1:7860");
/// let progress = client.progress().await;
/// println!("{:?}", progress.progress);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SdClient {
    http: Client,
    endpoint: String,
    retries: u32,
}

impl SdClient {
    /// Create a new client pointing at the given server URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            retries: 5,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, timeouts, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the number of transport-level attempts per request.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Send a request, retrying transport failures.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = format!("{}/{}", self.endpoint, path);
        let mut attempt = 1;
        loop {
            let mut req = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                req = req.json(body);
            }
            if let Some(timeout) = timeout {
                req = req.timeout(timeout);
            }
            match req.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < self.retries => {
                    debug!(attempt, "Request to {} failed, retrying: {}", url, e);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PaintError::Network {
                        context: format!(
                            "Cannot connect to generation server at {}, is it running?",
                            self.endpoint
                        ),
                        source: e,
                    })
                }
            }
        }
    }

    /// GET a JSON document. `None` on transport failure, non-200 or bad JSON.
    async fn get_json(&self, path: &str) -> Option<Value> {
        let resp = match self
            .request(Method::GET, path, None, Some(Duration::from_secs(10)))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!("GET {}: {}", path, PaintError::Http { status, body });
            return None;
        }
        match resp.json::<Value>().await {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to parse {} response: {}", path, e);
                None
            }
        }
    }

    // ── Render ──────────────────────────────────────────────────────

    /// POST a render payload to the mode's endpoint.
    ///
    /// txt2img payloads are converted to the `alwayson_scripts` form first.
    /// When an older server rejects the `clip_skip` override, the request is
    /// repeated once with `CLIP_stop_at_last_layers` and the response is
    /// flagged with `legacy_clip_skip`.
    pub async fn submit(&self, mode: RenderMode, payload: Value) -> ApiResponse {
        let mut body = match mode {
            RenderMode::Txt2Img => controlnet_to_sdapi(&payload),
            RenderMode::Img2Img => payload,
        };

        let (resp, error_body) = self.post_render(mode, &body).await;
        if !is_clip_skip_rejection(resp.status, &error_body) || !rename_clip_skip(&mut body) {
            return resp;
        }

        warn!("Server rejected clip_skip, retrying with CLIP_stop_at_last_layers");
        let (mut resp, _) = self.post_render(mode, &body).await;
        resp.legacy_clip_skip = true;
        resp
    }

    /// One render POST. Returns the normalized response and, on failure, the
    /// raw error body.
    async fn post_render(&self, mode: RenderMode, body: &Value) -> (ApiResponse, String) {
        let resp = match self.request(Method::POST, mode.endpoint(), Some(body), None).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("{}", e);
                return (ApiResponse::unavailable(), String::new());
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            debug!(status, "{} failed: {}", mode.endpoint(), text);
            return (ApiResponse::with_status(status), text);
        }

        match resp.json::<Value>().await {
            Ok(json) => (parse_render_response(&json), String::new()),
            Err(e) => {
                warn!("Failed to parse {} response: {}", mode.endpoint(), e);
                (ApiResponse::with_status(status), String::new())
            }
        }
    }

    // ── Progress and control ────────────────────────────────────────

    /// Poll `sdapi/v1/progress`.
    pub async fn progress(&self) -> ProgressResponse {
        let resp = match self
            .request(Method::GET, "sdapi/v1/progress", None, Some(Duration::from_secs(10)))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!("{}", e);
                return ProgressResponse {
                    status: ApiResponse::UNAVAILABLE,
                    progress: None,
                };
            }
        };
        let status = resp.status().as_u16();
        if status != 200 {
            return ProgressResponse {
                status,
                progress: None,
            };
        }
        let progress = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|json| json.get("progress").and_then(|v| v.as_f64()))
            .map(|p| p as f32);
        ProgressResponse { status, progress }
    }

    /// Run a ControlNet preprocessor on an image.
    pub async fn detect(&self, request: &DetectRequest) -> DetectResponse {
        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode detect request: {}", e);
                return DetectResponse {
                    status: 400,
                    image: None,
                };
            }
        };
        let resp = match self
            .request(Method::POST, "controlnet/detect", Some(&body), None)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("{}", e);
                return DetectResponse {
                    status: ApiResponse::UNAVAILABLE,
                    image: None,
                };
            }
        };
        let status = resp.status().as_u16();
        if status != 200 {
            return DetectResponse {
                status,
                image: None,
            };
        }
        let image = resp.json::<Value>().await.ok().and_then(|json| {
            json.pointer("/images/0")
                .and_then(|v| v.as_str())
                .map(String::from)
        });
        DetectResponse { status, image }
    }

    /// Ask the server to stop the current generation.
    pub async fn interrupt(&self) -> u16 {
        self.post_command("sdapi/v1/interrupt").await
    }

    /// Ask the server to skip the current image of a batch.
    pub async fn skip(&self) -> u16 {
        self.post_command("sdapi/v1/skip").await
    }

    async fn post_command(&self, path: &str) -> u16 {
        match self
            .request(Method::POST, path, None, Some(Duration::from_secs(5)))
            .await
        {
            Ok(resp) => resp.status().as_u16(),
            Err(e) => {
                warn!("{}", e);
                ApiResponse::UNAVAILABLE
            }
        }
    }

    // ── Catalog ─────────────────────────────────────────────────────

    /// Sampler names offered by the server, unsorted. Empty on failure.
    pub async fn samplers(&self) -> Vec<String> {
        self.get_json("sdapi/v1/samplers")
            .await
            .map(|json| names(&json))
            .unwrap_or_default()
    }

    /// Upscaler names offered by the server, unsorted. Empty on failure.
    pub async fn upscalers(&self) -> Vec<String> {
        self.get_json("sdapi/v1/upscalers")
            .await
            .map(|json| names(&json))
            .unwrap_or_default()
    }

    /// Raw ControlNet model list, `None` on failure.
    pub async fn controlnet_models(&self) -> Option<Vec<String>> {
        let json = self.get_json("controlnet/model_list").await?;
        Some(
            json.get("model_list")
                .and_then(|v| v.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        )
    }

    /// Loaded checkpoint and VAE from `sdapi/v1/options`.
    pub async fn options(&self) -> ServerOptions {
        let Some(json) = self.get_json("sdapi/v1/options").await else {
            return ServerOptions::default();
        };
        ServerOptions {
            checkpoint: json
                .get("sd_model_checkpoint")
                .and_then(|v| v.as_str())
                .map(String::from),
            vae: json.get("sd_vae").and_then(|v| v.as_str()).map(String::from),
        }
    }

    /// Fetch everything the session offers as choices, honouring the config
    /// overrides and falling back to the configured lists.
    pub async fn fetch_catalog(&self, config: &PaintConfig) -> Catalog {
        let samplers = if config.override_samplers && !config.samplers.is_empty() {
            config.samplers.clone()
        } else {
            let fetched = self.samplers().await;
            if fetched.is_empty() {
                sort_samplers(config.samplers.clone())
            } else {
                sort_samplers(fetched)
            }
        };

        let upscalers = if config.override_hr_upscalers && !config.hr_upscalers.is_empty() {
            config.hr_upscalers.clone()
        } else {
            let mut fetched = self.upscalers().await;
            if fetched.is_empty() {
                fetched = config.hr_upscalers.clone();
            }
            fetched.sort();
            fetched
        };

        let controlnet_models = if config.controlnet_models.is_empty() {
            self.controlnet_models()
                .await
                .map(|models| filter_controlnet_models(models, true))
        } else {
            None
        };

        Catalog {
            samplers,
            upscalers,
            controlnet_models,
            options: self.options().await,
        }
    }
}

impl Backend for SdClient {
    async fn submit(&self, mode: RenderMode, payload: Value) -> ApiResponse {
        SdClient::submit(self, mode, payload).await
    }

    async fn progress(&self) -> ProgressResponse {
        SdClient::progress(self).await
    }

    async fn detect(&self, request: DetectRequest) -> DetectResponse {
        SdClient::detect(self, &request).await
    }

    async fn interrupt(&self) -> u16 {
        SdClient::interrupt(self).await
    }

    async fn skip(&self) -> u16 {
        SdClient::skip(self).await
    }
}

/// Successful `*2img` body into an [`ApiResponse`].
fn parse_render_response(json: &Value) -> ApiResponse {
    let images = json
        .get("images")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let info = match json.get("info") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    ApiResponse {
        status: 200,
        images,
        info,
        legacy_clip_skip: false,
    }
}

/// `[{"name": ..}, ..]` into a list of names.
fn names(json: &Value) -> Vec<String> {
    json.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.get("name").and_then(|n| n.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn is_clip_skip_rejection(status: u16, body: &str) -> bool {
    status == 500 && body.contains("clip_skip")
}

/// Move `override_settings.clip_skip` to the legacy key. Returns whether a
/// rename happened.
fn rename_clip_skip(payload: &mut Value) -> bool {
    let Some(overrides) = payload
        .get_mut("override_settings")
        .and_then(|o| o.as_object_mut())
    else {
        return false;
    };
    match overrides.remove(ClipSkipKey::ClipSkip.as_str()) {
        Some(value) => {
            overrides.insert(ClipSkipKey::Legacy.as_str().to_string(), value);
            true
        }
        None => false,
    }
}

/// Preference score of a sampler name; higher sorts first.
pub fn sampler_priority(name: &str) -> i32 {
    const WEIGHTS: [(&str, i32); 10] = [
        ("Euler", -2),
        ("PLMS", -2),
        ("Heun", -1),
        ("LMS", -1),
        ("DPM", 1),
        ("DPM2", 3),
        ("Karras", 3),
        ("UniPC", 3),
        ("++", 4),
        ("DDIM", 4),
    ];
    let mut priority: i32 = WEIGHTS
        .iter()
        .filter(|(key, _)| name.contains(key))
        .map(|(_, w)| w)
        .sum();
    // ancestral samplers are less stable between renders
    if name.contains(" a ") || name.ends_with(" a") {
        priority -= 2;
    }
    priority
}

/// Sort samplers by [`sampler_priority`], best first, keeping server order
/// among equals.
pub fn sort_samplers(mut samplers: Vec<String>) -> Vec<String> {
    samplers.sort_by_key(|s| Reverse(sampler_priority(s)));
    samplers
}

/// Keep sketch-capable ControlNet models (scribble / lineart), strip the
/// ` [hash]` suffix and list scribble models first.
pub fn filter_controlnet_models(models: Vec<String>, safe_only: bool) -> Vec<String> {
    let mut filtered: Vec<String> = models
        .into_iter()
        .filter(|m| !safe_only || m.contains("scribble") || m.contains("lineart"))
        .map(|m| match m.rfind(" [") {
            Some(idx) => m[..idx].to_string(),
            None => m,
        })
        .collect();
    filtered.sort_by(|a, b| {
        (!a.contains("scribble"))
            .cmp(&!b.contains("scribble"))
            .then_with(|| a.cmp(b))
    });
    filtered
}

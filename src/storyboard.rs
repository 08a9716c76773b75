//! Script and shot-list generation from free text or recorded audio.
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{with_deadline, PipelineError, PipelineResult};
use crate::model::{RenderSettings, Shot, StoryboardResult};
use crate::settings::{ConfigProvider, ConfigSnapshot};

pub const MIN_GENERATED_SHOTS: usize = 3;

/// Chat + transcription capability of the language-model provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Ask for a single JSON object. `None` means the model produced no content.
    async fn complete_json(&self, cfg: &ConfigSnapshot, prompt: &str)
        -> PipelineResult<Option<String>>;

    async fn transcribe(&self, cfg: &ConfigSnapshot, audio: &Path) -> PipelineResult<String>;
}

/// Generation hints. Same shape as [`RenderSettings`].
pub type GenerateOptions = RenderSettings;

/// Build options from loosely-typed form fields: strings are trimmed and
/// dropped when empty. The duration is the leading run of digits ("45s" is
/// 45, "12.5" is 12) and must be positive.
pub fn options_from_fields(
    video_type: Option<&str>,
    style: Option<&str>,
    duration: Option<&str>,
    aspect_ratio: Option<&str>,
) -> GenerateOptions {
    fn text(v: Option<&str>) -> Option<String> {
        v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
    }
    GenerateOptions {
        video_type: text(video_type),
        style: text(style),
        duration_seconds: duration.and_then(leading_int).filter(|d| *d > 0),
        aspect_ratio: text(aspect_ratio),
    }
}

#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateInput {
    pub text: Option<String>,
    pub audio: Option<AudioUpload>,
    pub options: GenerateOptions,
}

fn leading_int(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let end = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

pub fn build_prompt(input: &str, options: &GenerateOptions) -> String {
    let mut context = Vec::new();
    if let Some(video_type) = &options.video_type {
        context.push(format!(
            "Video type: {video_type}. Structure the script appropriately for this format."
        ));
    }
    if let Some(style) = &options.style {
        context.push(format!(
            "Style: {style}. Match the tone, pacing, and language to this style."
        ));
    }
    if let Some(secs) = options.duration_seconds {
        context.push(format!(
            "Target duration: about {secs} seconds total. Keep the number of shots and length of each line appropriate for this duration."
        ));
    }
    if let Some(ratio) = &options.aspect_ratio {
        context.push(format!(
            "Target aspect ratio: {ratio}. Prefer visuals that work well for this format (for example, vertical framing for 9:16)."
        ));
    }

    let mut lines: Vec<String> = [
        "You are generating a short 20-45 second video script.",
        "Create 5-8 storyboard shots based on the user's idea.",
        "",
        "RULES:",
        "- ALWAYS respond in English. Ignore input language.",
        "- Keep script simple and natural.",
        "- Each shot requires:",
        "   - shot (number)",
        "   - voiceover (max 1 sentence)",
        "   - visual_prompt (clear description)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if !context.is_empty() {
        lines.push(String::new());
        lines.push("CONTEXT:".to_string());
        lines.extend(context);
    }

    lines.extend(
        [
            "",
            "Return ONLY JSON in this shape:",
            "{",
            "  \"script\": \"string\",",
            "  \"storyboard\": [",
            "    { \"shot\": 1, \"voiceover\": \"string\", \"visual_prompt\": \"string\" }",
            "  ]",
            "}",
            "",
            "USER INPUT:",
            input,
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    lines.join("\n")
}

fn non_empty_str(v: Option<&Value>) -> bool {
    v.and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty())
}

/// Check a model payload against the storyboard shape, collecting every
/// violation.
pub fn validate_storyboard(payload: &Value, min_shots: usize) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let Some(obj) = payload.as_object() else {
        return Err(vec!["response must be an object".to_string()]);
    };

    if !non_empty_str(obj.get("script")) {
        errors.push("script must be a non-empty string".to_string());
    }

    match obj.get("storyboard").and_then(Value::as_array) {
        None => errors.push("storyboard must be an array".to_string()),
        Some(shots) => {
            if shots.len() < min_shots {
                errors.push(format!("storyboard must contain at least {min_shots} shots"));
            }
            for (i, shot) in shots.iter().enumerate() {
                let Some(shot) = shot.as_object() else {
                    errors.push(format!("shot[{i}] must be an object"));
                    continue;
                };
                if !shot.get("shot").is_some_and(Value::is_number) {
                    errors.push(format!("shot[{i}].shot must be a number"));
                }
                if !non_empty_str(shot.get("voiceover")) {
                    errors.push(format!("shot[{i}].voiceover must be a non-empty string"));
                }
                if !non_empty_str(shot.get("visual_prompt")) {
                    errors.push(format!("shot[{i}].visual_prompt must be a non-empty string"));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Convert a payload that already passed [`validate_storyboard`].
fn into_result(payload: &Value) -> StoryboardResult {
    let text = |v: &Value, key: &str| v[key].as_str().unwrap_or_default().to_string();
    let storyboard = payload["storyboard"]
        .as_array()
        .map(|shots| {
            shots
                .iter()
                .map(|s| Shot {
                    shot: s["shot"]
                        .as_i64()
                        .or_else(|| s["shot"].as_f64().map(|f| f as i64))
                        .unwrap_or_default(),
                    voiceover: text(s, "voiceover"),
                    visual_prompt: text(s, "visual_prompt"),
                })
                .collect()
        })
        .unwrap_or_default();
    StoryboardResult {
        script: text(payload, "script"),
        storyboard,
        transcript: None,
    }
}

fn require_key(cfg: &ConfigSnapshot) -> PipelineResult<()> {
    if cfg.openai_api_key.is_none() {
        return Err(PipelineError::Configuration(
            "OPENAI_API_KEY missing: set it in the environment, config.yaml or admin settings"
                .to_string(),
        ));
    }
    Ok(())
}

fn snapshot(config: &dyn ConfigProvider) -> PipelineResult<ConfigSnapshot> {
    config
        .snapshot()
        .map_err(|err| PipelineError::Configuration(err.to_string()))
}

pub struct StoryboardGenerator {
    config: Arc<dyn ConfigProvider>,
    model: Arc<dyn LanguageModel>,
}

impl StoryboardGenerator {
    pub fn new(config: Arc<dyn ConfigProvider>, model: Arc<dyn LanguageModel>) -> Self {
        Self { config, model }
    }

    pub async fn generate(
        &self,
        input: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<StoryboardResult> {
        let cfg = snapshot(self.config.as_ref())?;
        self.generate_with(&cfg, input, options, cancel).await
    }

    #[instrument(skip_all, fields(input_len = input.len()))]
    async fn generate_with(
        &self,
        cfg: &ConfigSnapshot,
        input: &str,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<StoryboardResult> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PipelineError::validation("Text or audio input required"));
        }
        require_key(cfg)?;

        let prompt = build_prompt(input, options);
        let content = with_deadline(
            self.model.complete_json(cfg, &prompt),
            cfg.generate_timeout,
            "Script and storyboard generation",
            cancel,
        )
        .await?;

        let content = content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Upstream("Empty response from language model".into()))?;
        let payload: Value = serde_json::from_str(&content)
            .map_err(|_| PipelineError::Upstream("Language model returned invalid JSON".into()))?;

        if let Err(errors) = validate_storyboard(&payload, MIN_GENERATED_SHOTS) {
            warn!(?errors, "storyboard failed validation");
            return Err(PipelineError::Validation(errors));
        }

        let result = into_result(&payload);
        info!(shots = result.storyboard.len(), "storyboard generated");
        Ok(result)
    }

    /// Transcribe an uploaded recording. The audio is staged in a temporary
    /// file that is removed on every exit path.
    pub async fn transcribe(
        &self,
        upload: &AudioUpload,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        let cfg = snapshot(self.config.as_ref())?;
        self.transcribe_with(&cfg, upload, cancel).await
    }

    #[instrument(skip_all, fields(file = %upload.file_name, bytes = upload.bytes.len()))]
    async fn transcribe_with(
        &self,
        cfg: &ConfigSnapshot,
        upload: &AudioUpload,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        if upload.bytes.len() as u64 > cfg.max_upload_bytes {
            return Err(PipelineError::validation(format!(
                "audio upload exceeds {} bytes",
                cfg.max_upload_bytes
            )));
        }
        require_key(cfg)?;

        let suffix = Path::new(&upload.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".webm".to_string());
        let mut staged = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|err| PipelineError::Upstream(format!("failed to stage audio: {err}")))?;
        staged
            .write_all(&upload.bytes)
            .and_then(|_| staged.flush())
            .map_err(|err| PipelineError::Upstream(format!("failed to stage audio: {err}")))?;

        // `staged` is dropped (and deleted) when this function returns.
        let text = with_deadline(
            self.model.transcribe(cfg, staged.path()),
            cfg.transcribe_timeout,
            "Audio transcription",
            cancel,
        )
        .await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Upstream(
                "Transcription returned empty text".into(),
            ));
        }
        Ok(text.to_string())
    }

    /// Transcript takes precedence over typed text when both are present.
    pub async fn generate_from_input(
        &self,
        input: &GenerateInput,
        cancel: &CancellationToken,
    ) -> PipelineResult<StoryboardResult> {
        let cfg = snapshot(self.config.as_ref())?;
        self.generate_from_input_with(&cfg, input, cancel).await
    }

    /// Same as [`Self::generate_from_input`] against an already resolved
    /// snapshot.
    pub async fn generate_from_input_with(
        &self,
        cfg: &ConfigSnapshot,
        input: &GenerateInput,
        cancel: &CancellationToken,
    ) -> PipelineResult<StoryboardResult> {
        let transcript = match &input.audio {
            Some(upload) => Some(self.transcribe_with(cfg, upload, cancel).await?),
            None => None,
        };
        let text = transcript
            .as_deref()
            .or(input.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::validation("Text or audio input required"))?;

        let mut result = self.generate_with(cfg, text, &input.options, cancel).await?;
        result.transcript = transcript;
        Ok(result)
    }
}

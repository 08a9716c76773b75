use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::settings::ConfigSnapshot;
use crate::storyboard::LanguageModel;

const TEMPERATURE: f64 = 0.2;
const TRANSCRIPTION_LANGUAGE: &str = "en";

/// OpenAI-compatible chat completion and transcription client.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient").finish_non_exhaustive()
    }
}

fn upstream(what: &str, err: impl fmt::Display) -> PipelineError {
    PipelineError::Upstream(format!("{what}: {err}"))
}

fn api_key(cfg: &ConfigSnapshot) -> PipelineResult<&str> {
    cfg.openai_api_key
        .as_deref()
        .ok_or_else(|| PipelineError::Configuration("OPENAI_API_KEY missing".into()))
}

impl OpenAiClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub fn build_chat_request(
        &self,
        cfg: &ConfigSnapshot,
        prompt: &str,
    ) -> PipelineResult<reqwest::Request> {
        let endpoint = cfg
            .openai_base_url
            .join("v1/chat/completions")
            .map_err(|err| upstream("invalid language model base URL", err))?;
        let body = json!({
            "model": cfg.openai_model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" },
        });
        self.http
            .post(endpoint)
            .bearer_auth(api_key(cfg)?)
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .map_err(|err| upstream("failed to build chat request", err))
    }

    async fn check(res: reqwest::Response, what: &str) -> PipelineResult<reqwest::Response> {
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by language model: {}", body);
            return Err(PipelineError::Upstream(format!("{what}: received 429: {body}")));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "language model error: {}", body);
            return Err(PipelineError::Upstream(format!("{what} error {status}: {body}")));
        }
        Ok(res)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %cfg.openai_model))]
    async fn complete_json(
        &self,
        cfg: &ConfigSnapshot,
        prompt: &str,
    ) -> PipelineResult<Option<String>> {
        let request = self.build_chat_request(cfg, prompt)?;
        debug!(url=%request.url(), "sending chat completion");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| upstream("failed to reach language model", err))?;
        let res = Self::check(res, "chat completion").await?;
        let payload: ChatResponse = res
            .json()
            .await
            .map_err(|err| upstream("invalid chat completion response", err))?;
        Ok(payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }

    #[instrument(skip_all, fields(model = %cfg.transcription_model))]
    async fn transcribe(&self, cfg: &ConfigSnapshot, audio: &Path) -> PipelineResult<String> {
        let endpoint = cfg
            .openai_base_url
            .join("v1/audio/transcriptions")
            .map_err(|err| upstream("invalid language model base URL", err))?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.webm")
            .to_string();
        let bytes = fs::read(audio)
            .await
            .map_err(|err| upstream("failed to read staged audio", err))?;

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(file_name))
            .text("model", cfg.transcription_model.clone())
            .text("language", TRANSCRIPTION_LANGUAGE);

        let res = self
            .http
            .post(endpoint)
            .bearer_auth(api_key(cfg)?)
            .multipart(form)
            .send()
            .await
            .map_err(|err| upstream("failed to reach transcription service", err))?;
        let res = Self::check(res, "transcription").await?;
        let payload: TranscriptionResponse = res
            .json()
            .await
            .map_err(|err| upstream("invalid transcription response", err))?;
        Ok(payload.text)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

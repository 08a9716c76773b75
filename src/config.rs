//! Deployment configuration: YAML loader, validator and environment overrides.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::ProviderKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub openai: OpenAi,
    pub render: Render,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub generate_timeout_secs: u64,
    pub transcribe_timeout_secs: u64,
    pub render_timeout_secs: u64,
}

/// Language model (chat + transcription) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAi {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub transcription_model: String,
}

/// Render provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Render {
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub alternate_api_key: Option<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.generate_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.generate_timeout_secs must be > 0"));
    }
    if cfg.app.transcribe_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.transcribe_timeout_secs must be > 0"));
    }
    if cfg.app.render_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.render_timeout_secs must be > 0"));
    }

    if Url::parse(&cfg.openai.base_url).is_err() {
        return Err(ConfigError::Invalid("openai.base_url must be a valid URL"));
    }
    if cfg.openai.model.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.model must be non-empty"));
    }
    if cfg.openai.transcription_model.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.transcription_model must be non-empty"));
    }

    if Url::parse(&cfg.render.endpoint).is_err() {
        return Err(ConfigError::Invalid("render.endpoint must be a valid URL"));
    }
    if cfg.render.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("render.poll_interval_ms must be > 0"));
    }
    if cfg.render.max_attempts == 0 {
        return Err(ConfigError::Invalid("render.max_attempts must be > 0"));
    }

    Ok(())
}

/// Environment variables that override the YAML file. Captured once so a
/// resolved snapshot never changes underneath a running operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

pub const ENV_KEYS: &[&str] = &[
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "VIDEO_API_KEY",
    "VIDEO_API_URL",
    "VIDEO_RENDER_PROVIDER",
    "RUNWAY_API_KEY",
    "VIDEO_POLL_INTERVAL_MS",
    "VIDEO_MAX_POLL_ATTEMPTS",
];

impl EnvOverrides {
    pub fn from_process() -> Self {
        let vars = ENV_KEYS
            .iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Trimmed, non-empty value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn get_positive<T: std::str::FromStr + PartialOrd + Default>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| v.parse::<T>().ok())
            .filter(|v| *v > T::default())
    }
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  generate_timeout_secs: 90
  transcribe_timeout_secs: 60
  render_timeout_secs: 120

openai:
  api_key: "YOUR_OPENAI_API_KEY"
  base_url: "https://api.openai.com/"
  model: "gpt-4.1"
  transcription_model: "whisper-1"

render:
  provider: "json2video"
  api_key: "YOUR_JSON2VIDEO_API_KEY"
  endpoint: "https://api.json2video.com/v2/movies"
  poll_interval_ms: 5000
  max_attempts: 20
"#
}

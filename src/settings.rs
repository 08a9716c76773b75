//! Runtime settings: the persisted admin record layered over environment and
//! YAML defaults, exposed to components as immutable snapshots.
//!
//! Precedence for credentials and limits is admin record, then environment,
//! then YAML. Writes replace the whole record file; concurrent writers are
//! last-writer-wins.
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, EnvOverrides};
use crate::model::ProviderKind;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;
pub const DEFAULT_MAX_RECORDING_SECONDS: u64 = 90;
pub const ADMIN_FILE_NAME: &str = "app-config.json";

/// Operator-editable record persisted as JSON under the data dir.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_api_key: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_provider",
        skip_serializing_if = "Option::is_none"
    )]
    pub render_provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_poll_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_recording_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An unknown provider name drops only that field, not the whole record.
fn lenient_provider<'de, D>(deserializer: D) -> Result<Option<ProviderKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|name| match name.parse::<ProviderKind>() {
        Ok(kind) => Some(kind),
        Err(err) => {
            warn!(%err, "ignoring renderProvider in admin settings");
            None
        }
    }))
}

fn stored_key(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Partial update. Blank strings and non-positive numbers are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminPatch {
    pub openai_api_key: Option<String>,
    pub video_api_key: Option<String>,
    pub render_provider: Option<ProviderKind>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
    pub max_upload_bytes: Option<u64>,
    pub max_recording_seconds: Option<u64>,
}

impl AdminSettings {
    pub fn merge(mut self, patch: AdminPatch) -> Self {
        fn key(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        if let Some(k) = key(patch.openai_api_key) {
            self.openai_api_key = Some(k);
        }
        if let Some(k) = key(patch.video_api_key) {
            self.video_api_key = Some(k);
        }
        if let Some(p) = patch.render_provider {
            self.render_provider = Some(p);
        }
        if let Some(v) = patch.poll_interval_ms.filter(|v| *v > 0) {
            self.poll_interval_ms = Some(v);
        }
        if let Some(v) = patch.max_poll_attempts.filter(|v| *v > 0) {
            self.max_poll_attempts = Some(v);
        }
        if let Some(v) = patch.max_upload_bytes.filter(|v| *v > 0) {
            self.max_upload_bytes = Some(v);
        }
        if let Some(v) = patch.max_recording_seconds.filter(|v| *v > 0) {
            self.max_recording_seconds = Some(v);
        }
        self
    }
}

/// What an operator may see: credentials are reduced to presence flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminView {
    pub has_openai_api_key: bool,
    pub has_video_api_key: bool,
    pub render_provider: ProviderKind,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_upload_bytes: u64,
    pub max_recording_seconds: u64,
}

/// Fully resolved, read-only configuration for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub data_dir: PathBuf,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Url,
    pub openai_model: String,
    pub transcription_model: String,
    pub render_provider: ProviderKind,
    pub video_api_key: Option<String>,
    pub render_endpoint: Url,
    pub alternate_api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub generate_timeout: Duration,
    pub transcribe_timeout: Duration,
    pub render_timeout: Duration,
    pub max_upload_bytes: u64,
    pub max_recording_seconds: u64,
}

impl ConfigSnapshot {
    pub fn resolve(
        cfg: &Config,
        env: &EnvOverrides,
        admin: &AdminSettings,
    ) -> Result<Self, ConfigError> {
        let openai_base_url = Url::parse(&cfg.openai.base_url)
            .map_err(|_| ConfigError::Invalid("openai.base_url must be a valid URL"))?;
        let endpoint = env
            .get("VIDEO_API_URL")
            .unwrap_or_else(|| cfg.render.endpoint.clone());
        let render_endpoint = Url::parse(&endpoint)
            .map_err(|_| ConfigError::Invalid("render endpoint must be a valid URL"))?;

        let render_provider = admin
            .render_provider
            .or_else(|| {
                env.get("VIDEO_RENDER_PROVIDER")
                    .and_then(|raw| match raw.parse::<ProviderKind>() {
                        Ok(p) => Some(p),
                        Err(err) => {
                            warn!(%err, "ignoring VIDEO_RENDER_PROVIDER");
                            None
                        }
                    })
            })
            .unwrap_or(cfg.render.provider);

        let poll_interval_ms = admin
            .poll_interval_ms
            .filter(|v| *v > 0)
            .or_else(|| env.get_positive("VIDEO_POLL_INTERVAL_MS"))
            .unwrap_or(cfg.render.poll_interval_ms);
        let max_poll_attempts = admin
            .max_poll_attempts
            .filter(|v| *v > 0)
            .or_else(|| env.get_positive("VIDEO_MAX_POLL_ATTEMPTS"))
            .unwrap_or(cfg.render.max_attempts);

        Ok(Self {
            data_dir: PathBuf::from(&cfg.app.data_dir),
            openai_api_key: stored_key(&admin.openai_api_key)
                .or_else(|| env.get("OPENAI_API_KEY"))
                .or_else(|| stored_key(&cfg.openai.api_key)),
            openai_base_url,
            openai_model: env
                .get("OPENAI_MODEL")
                .unwrap_or_else(|| cfg.openai.model.clone()),
            transcription_model: cfg.openai.transcription_model.clone(),
            render_provider,
            video_api_key: stored_key(&admin.video_api_key)
                .or_else(|| env.get("VIDEO_API_KEY"))
                .or_else(|| stored_key(&cfg.render.api_key)),
            render_endpoint,
            alternate_api_key: env
                .get("RUNWAY_API_KEY")
                .or_else(|| stored_key(&cfg.render.alternate_api_key)),
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_attempts,
            generate_timeout: Duration::from_secs(cfg.app.generate_timeout_secs),
            transcribe_timeout: Duration::from_secs(cfg.app.transcribe_timeout_secs),
            render_timeout: Duration::from_secs(cfg.app.render_timeout_secs),
            max_upload_bytes: admin
                .max_upload_bytes
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_recording_seconds: admin
                .max_recording_seconds
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_RECORDING_SECONDS),
        })
    }

    pub fn admin_view(&self) -> AdminView {
        AdminView {
            has_openai_api_key: self.openai_api_key.is_some(),
            has_video_api_key: self.video_api_key.is_some(),
            render_provider: self.render_provider,
            poll_interval_ms: self.poll_interval.as_millis() as u64,
            max_poll_attempts: self.max_poll_attempts,
            max_upload_bytes: self.max_upload_bytes,
            max_recording_seconds: self.max_recording_seconds,
        }
    }
}

/// Source of configuration injected into every pipeline component.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError>;

    fn update_admin(&self, patch: AdminPatch) -> Result<AdminView, ConfigError>;
}

/// YAML + environment + admin record file.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    config: Config,
    env: EnvOverrides,
    admin_path: PathBuf,
}

impl LayeredConfig {
    pub fn new(config: Config, env: EnvOverrides) -> Self {
        let admin_path = Path::new(&config.app.data_dir).join(ADMIN_FILE_NAME);
        Self {
            config,
            env,
            admin_path,
        }
    }

    pub fn admin_path(&self) -> &Path {
        &self.admin_path
    }

    /// A missing, unreadable or corrupt record reads as empty.
    pub fn read_admin(&self) -> AdminSettings {
        let raw = match fs::read_to_string(&self.admin_path) {
            Ok(raw) => raw,
            Err(_) => return AdminSettings::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(?err, path=%self.admin_path.display(), "ignoring unreadable admin settings");
                AdminSettings::default()
            }
        }
    }

    fn write_admin(&self, settings: &AdminSettings) -> Result<(), ConfigError> {
        if let Some(dir) = self.admin_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let body = serde_json::to_string_pretty(settings)?;
        fs::write(&self.admin_path, body)?;
        Ok(())
    }
}

impl ConfigProvider for LayeredConfig {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        ConfigSnapshot::resolve(&self.config, &self.env, &self.read_admin())
    }

    fn update_admin(&self, patch: AdminPatch) -> Result<AdminView, ConfigError> {
        let mut merged = self.read_admin().merge(patch);
        merged.updated_at = Some(Utc::now());
        self.write_admin(&merged)?;
        info!(path=%self.admin_path.display(), "admin settings updated");
        Ok(ConfigSnapshot::resolve(&self.config, &self.env, &merged)?.admin_view())
    }
}

/// Fixed snapshot; updates are rejected. Useful for one-shot tools and tests.
#[derive(Debug, Clone)]
pub struct StaticConfig(pub ConfigSnapshot);

impl ConfigProvider for StaticConfig {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        Ok(self.0.clone())
    }

    fn update_admin(&self, _patch: AdminPatch) -> Result<AdminView, ConfigError> {
        Err(ConfigError::Invalid("static configuration cannot be updated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use tempfile::tempdir;

    fn layered(dir: &Path, env: EnvOverrides) -> LayeredConfig {
        let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        cfg.app.data_dir = dir.to_string_lossy().to_string();
        LayeredConfig::new(cfg, env)
    }

    #[test]
    fn yaml_values_apply_without_overrides() {
        let td = tempdir().unwrap();
        let snap = layered(td.path(), EnvOverrides::default()).snapshot().unwrap();
        assert_eq!(snap.render_provider, ProviderKind::Primary);
        assert_eq!(snap.poll_interval, Duration::from_millis(5000));
        assert_eq!(snap.max_poll_attempts, 20);
        assert_eq!(snap.video_api_key.as_deref(), Some("YOUR_JSON2VIDEO_API_KEY"));
        assert_eq!(snap.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn env_beats_yaml_and_admin_beats_env() {
        let td = tempdir().unwrap();
        let env = EnvOverrides::from_pairs([
            ("VIDEO_RENDER_PROVIDER", "runway"),
            ("VIDEO_API_KEY", "env-key"),
            ("VIDEO_MAX_POLL_ATTEMPTS", "5"),
        ]);
        let store = layered(td.path(), env);
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.render_provider, ProviderKind::Alternate);
        assert_eq!(snap.video_api_key.as_deref(), Some("env-key"));
        assert_eq!(snap.max_poll_attempts, 5);

        store
            .update_admin(AdminPatch {
                render_provider: Some(ProviderKind::Mock),
                video_api_key: Some(" admin-key ".into()),
                max_poll_attempts: Some(3),
                ..Default::default()
            })
            .unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.render_provider, ProviderKind::Mock);
        assert_eq!(snap.video_api_key.as_deref(), Some("admin-key"));
        assert_eq!(snap.max_poll_attempts, 3);
    }

    #[test]
    fn patch_ignores_blank_keys_and_zero_limits() {
        let base = AdminSettings {
            openai_api_key: Some("kept".into()),
            max_upload_bytes: Some(10),
            ..Default::default()
        };
        let merged = base.merge(AdminPatch {
            openai_api_key: Some("   ".into()),
            max_upload_bytes: Some(0),
            max_recording_seconds: Some(30),
            ..Default::default()
        });
        assert_eq!(merged.openai_api_key.as_deref(), Some("kept"));
        assert_eq!(merged.max_upload_bytes, Some(10));
        assert_eq!(merged.max_recording_seconds, Some(30));
    }

    #[test]
    fn update_persists_and_redacts_keys() {
        let td = tempdir().unwrap();
        let store = layered(td.path(), EnvOverrides::default());
        let view = store
            .update_admin(AdminPatch {
                openai_api_key: Some("sk-secret".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(view.has_openai_api_key);
        let rendered = serde_json::to_string(&view).unwrap();
        assert!(!rendered.contains("sk-secret"));

        let on_disk = fs::read_to_string(store.admin_path()).unwrap();
        let record: AdminSettings = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(record.openai_api_key.as_deref(), Some("sk-secret"));
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn corrupt_admin_file_reads_as_empty() {
        let td = tempdir().unwrap();
        let store = layered(td.path(), EnvOverrides::default());
        fs::write(store.admin_path(), "{not json").unwrap();
        assert_eq!(store.read_admin(), AdminSettings::default());
        assert!(store.snapshot().is_ok());
    }

    #[test]
    fn zeroed_limits_in_record_fall_through() {
        let td = tempdir().unwrap();
        let env = EnvOverrides::from_pairs([("VIDEO_MAX_POLL_ATTEMPTS", "7")]);
        let store = layered(td.path(), env);
        fs::write(
            store.admin_path(),
            r#"{"maxPollAttempts":0,"pollIntervalMs":0,"maxUploadBytes":0,"maxRecordingSeconds":0,"videoApiKey":"  "}"#,
        )
        .unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.max_poll_attempts, 7);
        assert_eq!(snap.poll_interval, Duration::from_millis(5000));
        assert_eq!(snap.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(snap.max_recording_seconds, DEFAULT_MAX_RECORDING_SECONDS);
        assert_eq!(snap.video_api_key.as_deref(), Some("YOUR_JSON2VIDEO_API_KEY"));
    }

    #[test]
    fn unknown_provider_in_record_keeps_other_fields() {
        let td = tempdir().unwrap();
        let store = layered(td.path(), EnvOverrides::default());
        fs::write(
            store.admin_path(),
            r#"{"openAiApiKey":"sk-admin","renderProvider":"ffmpeg","maxPollAttempts":4}"#,
        )
        .unwrap();

        let record = store.read_admin();
        assert_eq!(record.render_provider, None);
        assert_eq!(record.openai_api_key.as_deref(), Some("sk-admin"));

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.openai_api_key.as_deref(), Some("sk-admin"));
        assert_eq!(snap.render_provider, ProviderKind::Primary);
        assert_eq!(snap.max_poll_attempts, 4);
    }

    #[test]
    fn stored_provider_round_trips_through_the_record() {
        let td = tempdir().unwrap();
        let store = layered(td.path(), EnvOverrides::default());
        store
            .update_admin(AdminPatch {
                render_provider: Some(ProviderKind::Alternate),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.read_admin().render_provider, Some(ProviderKind::Alternate));
    }

    #[test]
    fn static_config_rejects_updates() {
        let td = tempdir().unwrap();
        let snap = layered(td.path(), EnvOverrides::default()).snapshot().unwrap();
        let fixed = StaticConfig(snap.clone());
        assert_eq!(fixed.snapshot().unwrap(), snap);
        assert!(fixed.update_admin(AdminPatch::default()).is_err());
    }
}

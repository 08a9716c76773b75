//! Render orchestration: provider selection, deadline, and the provider
//! implementations behind a common [`VideoRenderer`] trait.
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{with_deadline, PipelineError, PipelineResult};
use crate::model::{ProviderKind, RenderOutput, RenderRequest};
use crate::settings::{ConfigProvider, ConfigSnapshot};

pub mod download;
pub mod json2video;
pub mod placeholder;

pub use json2video::{Json2VideoClient, MovieStatus, PollPolicy, PrimaryRenderer, RenderAccess, RenderApi};
pub use placeholder::{AlternateRenderer, MockRenderer};

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// `cfg` is the snapshot taken once for the whole render call.
    async fn render(
        &self,
        input: &RenderRequest,
        cfg: &ConfigSnapshot,
        cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput>;
}

/// One renderer per [`ProviderKind`]. Lookup is by enum so every variant is
/// handled in exactly one place.
pub struct Registry {
    primary: Arc<dyn VideoRenderer>,
    mock: Arc<dyn VideoRenderer>,
    alternate: Arc<dyn VideoRenderer>,
}

impl Registry {
    pub fn new(
        primary: Arc<dyn VideoRenderer>,
        mock: Arc<dyn VideoRenderer>,
        alternate: Arc<dyn VideoRenderer>,
    ) -> Self {
        Self {
            primary,
            mock,
            alternate,
        }
    }

    /// Production registry: the json2video renderer plus the placeholders.
    pub fn standard(api: Arc<dyn RenderApi>) -> Self {
        Self::new(
            Arc::new(PrimaryRenderer::new(api)),
            Arc::new(MockRenderer),
            Arc::new(AlternateRenderer),
        )
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn VideoRenderer> {
        match kind {
            ProviderKind::Primary => self.primary.clone(),
            ProviderKind::Mock => self.mock.clone(),
            ProviderKind::Alternate => self.alternate.clone(),
        }
    }
}

/// Checks for a storyboard submitted directly for rendering. Collects every
/// violation.
pub fn validate_render_request(req: &RenderRequest) -> PipelineResult<()> {
    let mut errors = Vec::new();
    if req.script.trim().is_empty() {
        errors.push("script must be a non-empty string".to_string());
    }
    if req.storyboard.is_empty() {
        errors.push("storyboard must contain at least 1 shot".to_string());
    }
    for (i, shot) in req.storyboard.iter().enumerate() {
        if shot.voiceover.trim().is_empty() {
            errors.push(format!("shot[{i}].voiceover must be a non-empty string"));
        }
        if shot.visual_prompt.trim().is_empty() {
            errors.push(format!("shot[{i}].visual_prompt must be a non-empty string"));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Validation(errors))
    }
}

fn choose_provider(provider_override: Option<ProviderKind>, cfg: &ConfigSnapshot) -> ProviderKind {
    provider_override.unwrap_or(cfg.render_provider)
}

pub struct Orchestrator {
    config: Arc<dyn ConfigProvider>,
    registry: Registry,
}

impl Orchestrator {
    pub fn new(config: Arc<dyn ConfigProvider>, registry: Registry) -> Self {
        Self { config, registry }
    }

    fn snapshot(&self) -> PipelineResult<ConfigSnapshot> {
        self.config
            .snapshot()
            .map_err(|err| PipelineError::Configuration(err.to_string()))
    }

    /// Explicit override, else whatever the configuration snapshot resolved
    /// (admin record, environment, YAML, then json2video).
    pub fn select_provider(&self, provider_override: Option<ProviderKind>) -> PipelineResult<ProviderKind> {
        Ok(choose_provider(provider_override, &self.snapshot()?))
    }

    pub async fn render(
        &self,
        request: &RenderRequest,
        provider_override: Option<ProviderKind>,
        cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput> {
        let cfg = self.snapshot()?;
        self.render_with(&cfg, request, provider_override, cancel).await
    }

    /// Render against an already resolved snapshot.
    #[instrument(skip_all, fields(shots = request.storyboard.len()))]
    pub async fn render_with(
        &self,
        cfg: &ConfigSnapshot,
        request: &RenderRequest,
        provider_override: Option<ProviderKind>,
        cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput> {
        validate_render_request(request)?;
        let kind = choose_provider(provider_override, cfg);
        let renderer = self.registry.get(kind);
        info!(provider = %kind, "rendering video");

        let result = with_deadline(
            renderer.render(request, cfg, cancel),
            cfg.render_timeout,
            "Video rendering",
            cancel,
        )
        .await;
        match &result {
            Ok(out) => info!(provider = %out.provider, url = %out.video_url, "render finished"),
            Err(err) => warn!(provider = %kind, %err, "render failed"),
        }
        result
    }
}

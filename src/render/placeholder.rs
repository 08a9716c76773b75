//! Providers that are selectable but cannot render yet. They fail straight
//! away rather than handing the job to another provider.
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::VideoRenderer;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{ProviderKind, RenderOutput, RenderRequest};
use crate::settings::ConfigSnapshot;

#[derive(Debug, Default, Clone, Copy)]
pub struct MockRenderer;

#[async_trait]
impl VideoRenderer for MockRenderer {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn render(
        &self,
        _input: &RenderRequest,
        _cfg: &ConfigSnapshot,
        _cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput> {
        Err(PipelineError::Configuration(
            "Mock renderer is not implemented yet. Switch to json2video in admin settings.".into(),
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlternateRenderer;

#[async_trait]
impl VideoRenderer for AlternateRenderer {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Alternate
    }

    async fn render(
        &self,
        _input: &RenderRequest,
        cfg: &ConfigSnapshot,
        _cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput> {
        if cfg.alternate_api_key.is_none() {
            return Err(PipelineError::Configuration(
                "Runway renderer is not configured. Set RUNWAY_API_KEY to enable it.".into(),
            ));
        }
        Err(PipelineError::Configuration(
            "Runway renderer is not implemented yet.".into(),
        ))
    }
}

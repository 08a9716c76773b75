//! Wiring of the generator and the orchestrator into one text/audio → video
//! flow.
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{ProviderKind, RenderOutput, RenderRequest, StoryboardResult};
use crate::openai::OpenAiClient;
use crate::render::{Json2VideoClient, Orchestrator, Registry, RenderApi};
use crate::settings::ConfigProvider;
use crate::storyboard::{GenerateInput, LanguageModel, StoryboardGenerator};

pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("storyreel/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    #[serde(flatten)]
    pub storyboard: StoryboardResult,
    pub video_url: String,
    pub source_url: String,
    pub provider: ProviderKind,
}

pub struct Pipeline {
    config: Arc<dyn ConfigProvider>,
    pub generator: StoryboardGenerator,
    pub orchestrator: Orchestrator,
}

impl Pipeline {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        model: Arc<dyn LanguageModel>,
        render_api: Arc<dyn RenderApi>,
    ) -> Self {
        let registry = Registry::standard(render_api);
        Self {
            generator: StoryboardGenerator::new(config.clone(), model),
            orchestrator: Orchestrator::new(config.clone(), registry),
            config,
        }
    }

    /// Production wiring over real HTTP clients.
    pub fn with_http(config: Arc<dyn ConfigProvider>, http: Client) -> Self {
        Self::new(
            config,
            Arc::new(OpenAiClient::new(http.clone())),
            Arc::new(Json2VideoClient::new(http)),
        )
    }

    /// Generate then render, both against one configuration snapshot.
    pub async fn run(
        &self,
        input: &GenerateInput,
        provider_override: Option<ProviderKind>,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutput> {
        let cfg = self
            .config
            .snapshot()
            .map_err(|err| PipelineError::Configuration(err.to_string()))?;
        let storyboard = self
            .generator
            .generate_from_input_with(&cfg, input, cancel)
            .await?;
        let request = RenderRequest {
            script: storyboard.script.clone(),
            storyboard: storyboard.storyboard.clone(),
            settings: input.options.clone(),
        };
        let RenderOutput {
            video_url,
            source_url,
            provider,
        } = self
            .orchestrator
            .render_with(&cfg, &request, provider_override, cancel)
            .await?;
        info!(%provider, "pipeline finished");
        Ok(PipelineOutput {
            storyboard,
            video_url,
            source_url,
            provider,
        })
    }
}

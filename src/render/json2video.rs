use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::VideoRenderer;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{JobState, ProviderKind, RenderJob, RenderOutput, RenderRequest};
use crate::scene::{build_movie, MovieRequest};
use crate::settings::ConfigSnapshot;

/// Credentials and endpoint for one render call.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderAccess {
    pub api_key: String,
    pub endpoint: Url,
}

impl fmt::Debug for RenderAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderAccess")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MovieStatus {
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Wire operations of the json2video movies API.
#[async_trait]
pub trait RenderApi: Send + Sync {
    /// Submit a movie and return the provider's project id.
    async fn submit(&self, access: &RenderAccess, movie: &MovieRequest) -> PipelineResult<String>;

    async fn status(&self, access: &RenderAccess, project: &str) -> PipelineResult<MovieStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_attempts: 20,
        }
    }
}

impl PollPolicy {
    pub fn from_snapshot(cfg: &ConfigSnapshot) -> Self {
        Self {
            interval: cfg.poll_interval,
            max_attempts: cfg.max_poll_attempts,
        }
    }
}

#[derive(Clone)]
pub struct Json2VideoClient {
    http: Client,
}

impl fmt::Debug for Json2VideoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Json2VideoClient").finish_non_exhaustive()
    }
}

impl Json2VideoClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub fn build_submit_request(
        &self,
        access: &RenderAccess,
        movie: &MovieRequest,
    ) -> PipelineResult<reqwest::Request> {
        self.http
            .post(access.endpoint.clone())
            .header("x-api-key", &access.api_key)
            .header("Content-Type", "application/json")
            .json(movie)
            .build()
            .map_err(|err| PipelineError::Upstream(format!("failed to build render request: {err}")))
    }

    pub fn build_status_request(
        &self,
        access: &RenderAccess,
        project: &str,
    ) -> PipelineResult<reqwest::Request> {
        let mut url = access.endpoint.clone();
        url.query_pairs_mut().append_pair("project", project);
        self.http
            .get(url)
            .header("x-api-key", &access.api_key)
            .build()
            .map_err(|err| PipelineError::Upstream(format!("failed to build status request: {err}")))
    }

    async fn execute(&self, request: reqwest::Request, what: &str) -> PipelineResult<reqwest::Response> {
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| PipelineError::Upstream(format!("failed to reach render provider: {err}")))?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by render provider: {}", body);
            return Err(PipelineError::Upstream(format!("{what}: received 429: {body}")));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "render provider error: {}", body);
            return Err(PipelineError::Upstream(format!("{what} failed {status}: {body}")));
        }
        Ok(res)
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    project: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    movie: MovieStatus,
}

/// Project id from a submission body. Anything short of `success: true` with
/// a non-blank `project` is rejected.
fn project_id(body: &[u8]) -> PipelineResult<String> {
    let payload: SubmitResponse = serde_json::from_slice(body).map_err(|err| {
        PipelineError::Upstream(format!("invalid render submission response: {err}"))
    })?;
    match payload.project.filter(|p| !p.trim().is_empty()) {
        Some(project) if payload.success => Ok(project),
        _ => Err(PipelineError::Upstream(
            "render provider did not return a project id".into(),
        )),
    }
}

fn movie_status(body: &[u8]) -> PipelineResult<MovieStatus> {
    let payload: StatusResponse = serde_json::from_slice(body)
        .map_err(|err| PipelineError::Upstream(format!("invalid render status response: {err}")))?;
    Ok(payload.movie)
}

async fn read_body(res: reqwest::Response, what: &str) -> PipelineResult<Vec<u8>> {
    res.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|err| PipelineError::Upstream(format!("failed to read {what} response: {err}")))
}

#[async_trait]
impl RenderApi for Json2VideoClient {
    async fn submit(&self, access: &RenderAccess, movie: &MovieRequest) -> PipelineResult<String> {
        let request = self.build_submit_request(access, movie)?;
        debug!(url=%request.url(), scenes = movie.scenes.len(), "submitting movie");
        let res = self.execute(request, "render submission").await?;
        project_id(&read_body(res, "render submission").await?)
    }

    async fn status(&self, access: &RenderAccess, project: &str) -> PipelineResult<MovieStatus> {
        let request = self.build_status_request(access, project)?;
        let res = self.execute(request, "render status").await?;
        movie_status(&read_body(res, "render status").await?)
    }
}

/// Poll until the job reaches a terminal state or the attempt budget runs
/// out. Each attempt waits one interval and then makes exactly one status
/// call; a `done` with a URL returns immediately.
#[instrument(skip_all, fields(project = %job.project_id))]
pub async fn wait_for_movie(
    api: &dyn RenderApi,
    access: &RenderAccess,
    job: &mut RenderJob,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> PipelineResult<String> {
    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PipelineError::Timeout("render polling was cancelled".into()));
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }

        let status = api.status(access, &job.project_id).await?;
        job.state = JobState::from_wire(&status.status);
        match (job.state, status.url) {
            (JobState::Done, Some(url)) if !url.trim().is_empty() => {
                info!(attempt, "render done");
                return Ok(url);
            }
            (JobState::Error, _) => {
                let message = status
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Render failed".to_string());
                warn!(attempt, %message, "render reported an error");
                return Err(PipelineError::Upstream(message));
            }
            _ => {
                job.state = JobState::Pending;
                debug!(attempt, status = %status.status, "render still pending");
            }
        }
    }

    Err(PipelineError::Timeout(format!(
        "Render did not finish after {} status checks",
        policy.max_attempts
    )))
}

/// The production renderer backed by json2video.
pub struct PrimaryRenderer {
    api: Arc<dyn RenderApi>,
}

impl PrimaryRenderer {
    pub fn new(api: Arc<dyn RenderApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl VideoRenderer for PrimaryRenderer {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Primary
    }

    async fn render(
        &self,
        input: &RenderRequest,
        cfg: &ConfigSnapshot,
        cancel: &CancellationToken,
    ) -> PipelineResult<RenderOutput> {
        let api_key = cfg.video_api_key.clone().ok_or_else(|| {
            PipelineError::Configuration(
                "VIDEO_API_KEY missing: set it in the environment, config.yaml or admin settings"
                    .into(),
            )
        })?;
        let access = RenderAccess {
            api_key,
            endpoint: cfg.render_endpoint.clone(),
        };

        let movie = build_movie(&input.storyboard, &input.settings)?;
        let project = self.api.submit(&access, &movie).await?;
        info!(%project, "movie submitted");

        let mut job = RenderJob::submitted(ProviderKind::Primary, project);
        let video_url = wait_for_movie(
            self.api.as_ref(),
            &access,
            &mut job,
            PollPolicy::from_snapshot(cfg),
            cancel,
        )
        .await?;

        Ok(RenderOutput {
            source_url: video_url.clone(),
            video_url,
            provider: ProviderKind::Primary,
        })
    }
}

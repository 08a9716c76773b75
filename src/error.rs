//! Error taxonomy shared by the generator, the scene mapper and the render
//! orchestrator.
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed caller input or malformed model/mapper output. Carries every
    /// violation found, not just the first.
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    /// Missing credential or a provider that cannot serve requests.
    #[error("{0}")]
    Configuration(String),
    /// A third-party call failed or returned an unusable payload.
    #[error("{0}")]
    Upstream(String),
    /// A bounded wait ran out before reaching a terminal state.
    #[error("{0}")]
    Timeout(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(vec![msg.into()])
    }

    pub fn violations(&self) -> &[String] {
        match self {
            PipelineError::Validation(list) => list,
            _ => &[],
        }
    }

    /// Message suitable for end users. Timeouts are rephrased; everything else
    /// is surfaced as-is.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Timeout(_) => {
                "This is taking too long. Please try again with a shorter input.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Run `fut` under both a deadline and a cancellation token. Whichever fires
/// first drops `fut`, which aborts any in-flight HTTP request it owns.
pub async fn with_deadline<T, F>(
    fut: F,
    limit: Duration,
    label: &str,
    cancel: &CancellationToken,
) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Timeout(format!("{label} was cancelled"))),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::Timeout(format!(
                "{label} timed out after {}ms",
                limit.as_millis()
            ))),
        },
    }
}

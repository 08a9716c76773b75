use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// Download a rendered video into `{data_dir}/videos/video-<uuid>.mp4`.
#[instrument(skip(http))]
pub async fn save_video(http: &Client, remote_url: &str, data_dir: &Path) -> Result<PathBuf> {
    let mut res = http
        .get(remote_url)
        .send()
        .await
        .with_context(|| format!("failed to fetch rendered video {remote_url}"))?;
    if !res.status().is_success() {
        return Err(anyhow!(
            "failed to download rendered video: {}",
            res.status()
        ));
    }

    let dir = data_dir.join("videos");
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create videos dir: {}", dir.display()))?;

    // The staged file is removed on drop unless persisted.
    let staged = tempfile::Builder::new()
        .prefix("video-")
        .suffix(".part")
        .tempfile_in(&dir)
        .with_context(|| format!("failed to stage video in {}", dir.display()))?;
    let mut dst = tokio::fs::File::from_std(staged.reopen().context("failed to open staged video")?);
    while let Some(chunk) = res.chunk().await.context("failed to read video body")? {
        dst.write_all(&chunk)
            .await
            .context("failed to write staged video")?;
    }
    dst.flush().await?;
    drop(dst);

    let path = dir.join(format!("video-{}.mp4", uuid::Uuid::new_v4()));
    staged
        .persist(&path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to save {}", path.display()))?;

    info!(path=%path.display(), "saved rendered video");
    Ok(path)
}

/// Keep a local copy when possible; otherwise fall back to the remote URL.
pub async fn localize(http: &Client, remote_url: &str, data_dir: &Path) -> String {
    match save_video(http, remote_url, data_dir).await {
        Ok(path) => path.to_string_lossy().to_string(),
        Err(err) => {
            warn!(?err, "keeping remote video URL");
            remote_url.to_string()
        }
    }
}

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storyreel::config::{self, EnvOverrides};
use storyreel::model::{ProviderKind, RenderRequest};
use storyreel::pipeline::{http_client, Pipeline};
use storyreel::render::download;
use storyreel::settings::{AdminPatch, ConfigProvider, LayeredConfig};
use storyreel::storyboard::{options_from_fields, AudioUpload, GenerateInput};
use storyreel::PipelineError;

#[derive(Debug, Parser)]
#[command(author, version, about = "Turn an idea or a recording into a short generated video")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a script and storyboard, print it as JSON
    Generate(InputArgs),
    /// Render a storyboard JSON file ({script, storyboard, settings})
    Render {
        /// Storyboard JSON file
        storyboard: PathBuf,
        #[arg(long)]
        provider: Option<ProviderKind>,
        /// Download the finished video into the data dir
        #[arg(long)]
        save: bool,
    },
    /// Generate then render in one go
    Run {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        save: bool,
    },
    /// Inspect or change the persisted admin settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, ClapArgs)]
struct InputArgs {
    /// Idea or script text
    #[arg(long)]
    text: Option<String>,
    /// Audio recording to transcribe; takes precedence over --text
    #[arg(long)]
    audio: Option<PathBuf>,
    #[arg(long)]
    video_type: Option<String>,
    #[arg(long)]
    style: Option<String>,
    /// Target duration in seconds
    #[arg(long)]
    duration: Option<String>,
    /// 16:9, 9:16 or 1:1
    #[arg(long)]
    aspect_ratio: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective admin view (credentials redacted)
    Show,
    /// Print an example config.yaml
    Example,
    /// Merge values into the admin record
    Set {
        #[arg(long)]
        openai_api_key: Option<String>,
        #[arg(long)]
        video_api_key: Option<String>,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        #[arg(long)]
        max_poll_attempts: Option<u32>,
        #[arg(long)]
        max_upload_bytes: Option<u64>,
        #[arg(long)]
        max_recording_seconds: Option<u64>,
    },
}

impl InputArgs {
    async fn into_input(self) -> Result<GenerateInput> {
        let audio = match self.audio {
            Some(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read audio file {}", path.display()))?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("recording.webm")
                    .to_string();
                Some(AudioUpload { file_name, bytes })
            }
            None => None,
        };
        Ok(GenerateInput {
            text: self.text,
            audio,
            options: options_from_fields(
                self.video_type.as_deref(),
                self.style.as_deref(),
                self.duration.as_deref(),
                self.aspect_ratio.as_deref(),
            ),
        })
    }
}

fn surface(err: PipelineError) -> anyhow::Error {
    warn!(%err, "pipeline failed");
    anyhow!(err.user_message())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::Config(ConfigCommand::Example) = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;
    let settings = Arc::new(LayeredConfig::new(cfg, EnvOverrides::from_process()));
    let provider: Arc<dyn ConfigProvider> = settings.clone();

    let http = http_client()?;
    let pipeline = Pipeline::with_http(provider.clone(), http.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match args.command {
        Command::Generate(input) => {
            let input = input.into_input().await?;
            let result = pipeline
                .generator
                .generate_from_input(&input, &cancel)
                .await
                .map_err(surface)?;
            print_json(&result)?;
        }
        Command::Render {
            storyboard,
            provider: provider_override,
            save,
        } => {
            let raw = tokio::fs::read_to_string(&storyboard)
                .await
                .with_context(|| format!("failed to read {}", storyboard.display()))?;
            let request: RenderRequest =
                serde_json::from_str(&raw).context("storyboard file is not valid JSON")?;
            let mut out = pipeline
                .orchestrator
                .render(&request, provider_override, &cancel)
                .await
                .map_err(surface)?;
            if save {
                let snap = provider.snapshot()?;
                out.video_url = download::localize(&http, &out.source_url, &snap.data_dir).await;
            }
            print_json(&out)?;
        }
        Command::Run {
            input,
            provider: provider_override,
            save,
        } => {
            let input = input.into_input().await?;
            let mut out = pipeline
                .run(&input, provider_override, &cancel)
                .await
                .map_err(surface)?;
            if save {
                let snap = provider.snapshot()?;
                out.video_url = download::localize(&http, &out.source_url, &snap.data_dir).await;
            }
            print_json(&out)?;
        }
        Command::Config(ConfigCommand::Show) => {
            print_json(&provider.snapshot()?.admin_view())?;
        }
        Command::Config(ConfigCommand::Set {
            openai_api_key,
            video_api_key,
            provider: render_provider,
            poll_interval_ms,
            max_poll_attempts,
            max_upload_bytes,
            max_recording_seconds,
        }) => {
            let view = provider.update_admin(AdminPatch {
                openai_api_key,
                video_api_key,
                render_provider,
                poll_interval_ms,
                max_poll_attempts,
                max_upload_bytes,
                max_recording_seconds,
            })?;
            info!(path=%settings.admin_path().display(), "admin settings saved");
            print_json(&view)?;
        }
        Command::Config(ConfigCommand::Example) => print!("{}", config::example()),
    }

    Ok(())
}

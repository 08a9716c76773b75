use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use storyreel::config::{self, Config, EnvOverrides};
use storyreel::model::RenderSettings;
use storyreel::settings::{AdminSettings, ConfigProvider, ConfigSnapshot, StaticConfig};
use storyreel::storyboard::{AudioUpload, GenerateInput, LanguageModel, StoryboardGenerator};
use storyreel::{PipelineError, PipelineResult};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn snapshot() -> ConfigSnapshot {
    let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    ConfigSnapshot::resolve(&cfg, &EnvOverrides::default(), &AdminSettings::default()).unwrap()
}

fn storyboard_json(shots: usize) -> String {
    let shots: Vec<_> = (1..=shots)
        .map(|i| json!({ "shot": i, "voiceover": format!("line {i}"), "visual_prompt": format!("scene {i}") }))
        .collect();
    json!({ "script": "A fox learns to code.", "storyboard": shots }).to_string()
}

#[derive(Default)]
struct RecordingModel {
    completions: Mutex<VecDeque<PipelineResult<Option<String>>>>,
    transcripts: Mutex<VecDeque<PipelineResult<String>>>,
    prompts: Mutex<Vec<String>>,
    /// (path, existed during the call, bytes read)
    audio_seen: Mutex<Vec<(PathBuf, bool, Vec<u8>)>>,
    delay: Option<Duration>,
}

impl RecordingModel {
    fn completing(responses: Vec<PipelineResult<Option<String>>>) -> Self {
        Self {
            completions: Mutex::new(VecDeque::from(responses)),
            ..Default::default()
        }
    }

    fn transcribing(responses: Vec<PipelineResult<String>>) -> Self {
        Self {
            transcripts: Mutex::new(VecDeque::from(responses)),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for RecordingModel {
    async fn complete_json(
        &self,
        _cfg: &ConfigSnapshot,
        prompt: &str,
    ) -> PipelineResult<Option<String>> {
        self.prompts.lock().await.push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completions
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Some(storyboard_json(5))))
    }

    async fn transcribe(&self, _cfg: &ConfigSnapshot, audio: &Path) -> PipelineResult<String> {
        let bytes = std::fs::read(audio).unwrap_or_default();
        self.audio_seen
            .lock()
            .await
            .push((audio.to_path_buf(), audio.exists(), bytes));
        self.transcripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("hello".into()))
    }
}

fn generator(snap: ConfigSnapshot, model: Arc<RecordingModel>) -> StoryboardGenerator {
    let config: Arc<dyn ConfigProvider> = Arc::new(StaticConfig(snap));
    StoryboardGenerator::new(config, model)
}

fn upload() -> AudioUpload {
    AudioUpload {
        file_name: "memo.webm".into(),
        bytes: vec![1, 2, 3, 4],
    }
}

#[tokio::test]
async fn generates_storyboard_from_valid_model_output() {
    let model = Arc::new(RecordingModel::completing(vec![Ok(Some(storyboard_json(4)))]));
    let gen = generator(snapshot(), model.clone());
    let options = RenderSettings {
        style: Some("playful".into()),
        ..Default::default()
    };

    let result = gen
        .generate("  a fox learns to code  ", &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.script, "A fox learns to code.");
    assert_eq!(result.storyboard.len(), 4);
    assert_eq!(result.storyboard[3].voiceover, "line 4");
    assert!(result.transcript.is_none());

    let prompts = model.prompts.lock().await;
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Style: playful."));
    assert!(prompts[0].ends_with("USER INPUT:\na fox learns to code"));
}

#[tokio::test]
async fn too_few_shots_fail_with_the_specific_violation() {
    let model = Arc::new(RecordingModel::completing(vec![Ok(Some(storyboard_json(2)))]));
    let gen = generator(snapshot(), model);
    let err = gen
        .generate("idea", &RenderSettings::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.violations(),
        ["storyboard must contain at least 3 shots".to_string()]
    );
}

#[tokio::test]
async fn empty_and_unparsable_content_are_upstream_errors() {
    let model = Arc::new(RecordingModel::completing(vec![
        Ok(None),
        Ok(Some("   ".into())),
        Ok(Some("not json".into())),
    ]));
    let gen = generator(snapshot(), model);
    let cancel = CancellationToken::new();
    let opts = RenderSettings::default();

    for expected in ["Empty response", "Empty response", "invalid JSON"] {
        let err = gen.generate("idea", &opts, &cancel).await.unwrap_err();
        match err {
            PipelineError::Upstream(msg) => assert!(msg.contains(expected), "{msg}"),
            other => panic!("wrong error: {other:?}"),
        }
    }
}

#[tokio::test]
async fn missing_credential_fails_before_calling_the_model() {
    let model = Arc::new(RecordingModel::default());
    let mut snap = snapshot();
    snap.openai_api_key = None;
    let gen = generator(snap, model.clone());

    let err = gen
        .generate("idea", &RenderSettings::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(model.prompts.lock().await.is_empty());
}

#[tokio::test]
async fn blank_input_is_rejected() {
    let model = Arc::new(RecordingModel::default());
    let gen = generator(snapshot(), model.clone());
    let err = gen
        .generate("   ", &RenderSettings::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.violations(), ["Text or audio input required".to_string()]);
    assert!(model.prompts.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_model_hits_the_generation_deadline() {
    let model = Arc::new(RecordingModel {
        delay: Some(Duration::from_secs(600)),
        ..Default::default()
    });
    let gen = generator(snapshot(), model);
    let err = gen
        .generate("idea", &RenderSettings::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        PipelineError::Timeout(msg) => assert!(msg.starts_with("Script and storyboard generation timed out")),
        other => panic!("wrong error: {other:?}"),
    }
    assert!(err.user_message().contains("shorter input"));
}

#[tokio::test]
async fn transcription_stages_audio_and_always_cleans_up() {
    let model = Arc::new(RecordingModel::transcribing(vec![
        Ok("  spoken idea  ".into()),
        Ok("   ".into()),
        Err(PipelineError::Upstream("whisper unavailable".into())),
    ]));
    let gen = generator(snapshot(), model.clone());
    let cancel = CancellationToken::new();

    let text = gen.transcribe(&upload(), &cancel).await.unwrap();
    assert_eq!(text, "spoken idea");

    let err = gen.transcribe(&upload(), &cancel).await.unwrap_err();
    assert!(matches!(err, PipelineError::Upstream(ref m) if m.contains("empty")));

    let err = gen.transcribe(&upload(), &cancel).await.unwrap_err();
    assert_eq!(err.to_string(), "whisper unavailable");

    let seen = model.audio_seen.lock().await;
    assert_eq!(seen.len(), 3);
    for (path, existed, bytes) in seen.iter() {
        assert!(*existed, "audio should exist while transcribing");
        assert_eq!(bytes, &vec![1, 2, 3, 4]);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("webm"));
        assert!(!path.exists(), "staged audio left behind at {}", path.display());
    }
}

#[tokio::test]
async fn oversized_audio_is_rejected_without_staging() {
    let model = Arc::new(RecordingModel::default());
    let mut snap = snapshot();
    snap.max_upload_bytes = 2;
    let gen = generator(snap, model.clone());
    let err = gen
        .transcribe(&upload(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(model.audio_seen.lock().await.is_empty());
}

#[tokio::test]
async fn transcript_takes_precedence_over_text() {
    let model = Arc::new(RecordingModel::transcribing(vec![Ok("from audio".into())]));
    let gen = generator(snapshot(), model.clone());
    let input = GenerateInput {
        text: Some("from text".into()),
        audio: Some(upload()),
        options: RenderSettings::default(),
    };

    let result = gen
        .generate_from_input(&input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.transcript.as_deref(), Some("from audio"));
    let prompts = model.prompts.lock().await;
    assert!(prompts[0].ends_with("USER INPUT:\nfrom audio"));
}

#[tokio::test]
async fn no_text_and_no_audio_is_a_validation_error() {
    let gen = generator(snapshot(), Arc::new(RecordingModel::default()));
    let err = gen
        .generate_from_input(&GenerateInput::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.violations(), ["Text or audio input required".to_string()]);
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One beat of the generated script: a line of narration plus a visual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shot {
    pub shot: i64,
    pub voiceover: String,
    pub visual_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryboardResult {
    pub script: String,
    pub storyboard: Vec<Shot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

impl RenderSettings {
    pub fn aspect(&self) -> AspectRatio {
        AspectRatio::parse(self.aspect_ratio.as_deref())
    }
}

/// Output framing. Unknown ratios fall back to landscape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Landscape,
    Portrait,
    Square,
}

impl AspectRatio {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("9:16") => AspectRatio::Portrait,
            Some("1:1") => AspectRatio::Square,
            _ => AspectRatio::Landscape,
        }
    }

    /// (width, height) in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (1920, 1080),
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
        }
    }

    pub fn image_mode(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "horizontal",
            AspectRatio::Portrait => "vertical",
            AspectRatio::Square => "squared",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    #[serde(rename = "json2video", alias = "primary")]
    Primary,
    #[serde(rename = "mock")]
    Mock,
    #[serde(rename = "runway", alias = "alternate")]
    Alternate,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "json2video",
            ProviderKind::Mock => "mock",
            ProviderKind::Alternate => "runway",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown render provider '{}' (expected json2video, mock or runway)",
            self.0
        )
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json2video" | "primary" => Ok(ProviderKind::Primary),
            "mock" => Ok(ProviderKind::Mock),
            "runway" | "alternate" => Ok(ProviderKind::Alternate),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Done,
    Error,
}

impl JobState {
    /// Map a provider status string. Anything that is not terminal counts as
    /// pending.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "done" => JobState::Done,
            "error" => JobState::Error,
            _ => JobState::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

/// A submitted render, tracked only while polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub provider: ProviderKind,
    pub project_id: String,
    pub state: JobState,
}

impl RenderJob {
    pub fn submitted(provider: ProviderKind, project_id: String) -> Self {
        Self {
            provider,
            project_id,
            state: JobState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub script: String,
    pub storyboard: Vec<Shot>,
    #[serde(default)]
    pub settings: RenderSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    /// Where to fetch the video; a local path once a copy has been saved.
    pub video_url: String,
    /// The provider's URL, kept even when `video_url` is localized.
    pub source_url: String,
    pub provider: ProviderKind,
}

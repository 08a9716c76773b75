//! Shot list → render-provider scene graph.
//!
//! Each shot becomes one scene holding an image, a narration voice and a
//! caption, in that order. The result is validated before it leaves this
//! module so malformed graphs fail here with a precise message instead of
//! at the provider.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{RenderSettings, Shot};

pub const DEFAULT_TOTAL_SECONDS: u32 = 30;
pub const MIN_SCENE_SECONDS: u32 = 3;
pub const NARRATION_VOICE: &str = "en-US-JennyNeural";
pub const CAPTION_FONT_SIZE: &str = "40px";
pub const ZOOM_RANGE: std::ops::RangeInclusive<i32> = -10..=10;

static FONT_SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+px$").expect("valid font-size regex"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieRequest {
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub duration: u32,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Image {
        prompt: String,
        #[serde(rename = "aspect-ratio")]
        aspect_mode: String,
        resize: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        zoom: Option<i32>,
    },
    Voice {
        text: String,
        voice: String,
    },
    Text {
        text: String,
        style: String,
        position: String,
        width: u32,
        settings: TextSettings,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSettings {
    #[serde(rename = "font-size")]
    pub font_size: String,
    #[serde(rename = "font-color")]
    pub font_color: String,
    #[serde(rename = "background-color")]
    pub background_color: String,
    #[serde(rename = "text-align")]
    pub text_align: String,
}

/// Seconds per scene: the total split evenly, rounded down, never below
/// [`MIN_SCENE_SECONDS`].
pub fn scene_duration(total_seconds: Option<u32>, shot_count: usize) -> u32 {
    let total = total_seconds.filter(|s| *s > 0).unwrap_or(DEFAULT_TOTAL_SECONDS);
    let count = u32::try_from(shot_count.max(1)).unwrap_or(u32::MAX);
    (total / count).max(MIN_SCENE_SECONDS)
}

pub fn map_scenes(shots: &[Shot], settings: &RenderSettings) -> PipelineResult<Vec<Scene>> {
    if shots.is_empty() {
        return Err(PipelineError::validation(
            "storyboard must contain at least 1 shot",
        ));
    }

    let aspect = settings.aspect();
    let (width, _) = aspect.dimensions();
    let duration = scene_duration(settings.duration_seconds, shots.len());

    let scenes: Vec<Scene> = shots
        .iter()
        .enumerate()
        .map(|(index, shot)| Scene {
            duration,
            elements: vec![
                Element::Image {
                    prompt: shot.visual_prompt.clone(),
                    aspect_mode: aspect.image_mode().to_string(),
                    resize: "fill".to_string(),
                    // Alternate a slow push-in on every other shot.
                    zoom: (index % 2 == 0).then_some(1),
                },
                Element::Voice {
                    text: shot.voiceover.clone(),
                    voice: NARRATION_VOICE.to_string(),
                },
                Element::Text {
                    text: shot.voiceover.clone(),
                    style: "001".to_string(),
                    position: "center-center".to_string(),
                    width,
                    settings: TextSettings {
                        font_size: CAPTION_FONT_SIZE.to_string(),
                        font_color: "#FFFFFF".to_string(),
                        background_color: "rgba(0,0,0,0.5)".to_string(),
                        text_align: "center".to_string(),
                    },
                },
            ],
        })
        .collect();

    validate_scenes(&scenes).map_err(PipelineError::Validation)?;
    Ok(scenes)
}

pub fn build_movie(shots: &[Shot], settings: &RenderSettings) -> PipelineResult<MovieRequest> {
    let (width, height) = settings.aspect().dimensions();
    Ok(MovieRequest {
        resolution: "custom".to_string(),
        width,
        height,
        scenes: map_scenes(shots, settings)?,
    })
}

/// Check every scene and collect all violations.
pub fn validate_scenes(scenes: &[Scene]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    for (si, scene) in scenes.iter().enumerate() {
        if scene.duration < 1 {
            errors.push(format!("scene[{si}]: duration must be at least 1 second"));
        }
        for (ei, element) in scene.elements.iter().enumerate() {
            match element {
                Element::Text { settings, .. } if !FONT_SIZE.is_match(&settings.font_size) => {
                    errors.push(format!(
                        "scene[{si}].element[{ei}]: text font-size must look like \"40px\", got {:?}",
                        settings.font_size
                    ));
                }
                Element::Image { zoom: Some(z), .. } if !ZOOM_RANGE.contains(z) => {
                    errors.push(format!(
                        "scene[{si}].element[{ei}]: image zoom must be within [-10, 10], got {z}"
                    ));
                }
                _ => {}
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shots(n: usize) -> Vec<Shot> {
        (0..n)
            .map(|i| Shot {
                shot: i as i64 + 1,
                voiceover: format!("line {i}"),
                visual_prompt: format!("picture {i}"),
            })
            .collect()
    }

    fn settings(duration: Option<u32>, ratio: Option<&str>) -> RenderSettings {
        RenderSettings {
            duration_seconds: duration,
            aspect_ratio: ratio.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn one_scene_per_shot_with_floor_duration() {
        for (n, total, expected) in [(4, 30, 7), (3, 30, 10), (7, 45, 6), (20, 30, 3), (1, 2, 3)] {
            let scenes = map_scenes(&shots(n), &settings(Some(total), None)).unwrap();
            assert_eq!(scenes.len(), n);
            assert!(scenes.iter().all(|s| s.duration == expected), "n={n} total={total}");
        }
    }

    #[test]
    fn duration_defaults_to_thirty_seconds() {
        let scenes = map_scenes(&shots(5), &RenderSettings::default()).unwrap();
        assert!(scenes.iter().all(|s| s.duration == 6));
    }

    #[test]
    fn zoom_alternates_by_shot_index() {
        let scenes = map_scenes(&shots(5), &RenderSettings::default()).unwrap();
        for (i, scene) in scenes.iter().enumerate() {
            match &scene.elements[0] {
                Element::Image { zoom, .. } => {
                    if i % 2 == 0 {
                        assert_eq!(*zoom, Some(1));
                    } else {
                        assert_eq!(*zoom, None);
                    }
                }
                other => panic!("first element should be an image, got {other:?}"),
            }
        }
    }

    #[test]
    fn dimensions_follow_aspect_ratio() {
        let cases = [
            (Some("9:16"), 1080, 1920, "vertical"),
            (Some("1:1"), 1080, 1080, "squared"),
            (Some("16:9"), 1920, 1080, "horizontal"),
            (Some("21:9"), 1920, 1080, "horizontal"),
            (None, 1920, 1080, "horizontal"),
        ];
        for (ratio, w, h, mode) in cases {
            let movie = build_movie(&shots(3), &settings(None, ratio)).unwrap();
            assert_eq!((movie.width, movie.height), (w, h));
            assert_eq!(movie.resolution, "custom");
            let scene = &movie.scenes[0];
            assert!(matches!(&scene.elements[0], Element::Image { aspect_mode, .. } if aspect_mode == mode));
            assert!(matches!(&scene.elements[2], Element::Text { width, .. } if *width == w));
        }
    }

    #[test]
    fn elements_are_image_voice_text_in_order() {
        let movie = build_movie(&shots(3), &RenderSettings::default()).unwrap();
        let body = serde_json::to_value(&movie).unwrap();
        let elements = &body["scenes"][1]["elements"];
        assert_eq!(elements[0]["type"], "image");
        assert_eq!(elements[0]["prompt"], "picture 1");
        assert_eq!(elements[0]["resize"], "fill");
        assert!(elements[0].get("zoom").is_none());
        assert_eq!(elements[1]["type"], "voice");
        assert_eq!(elements[1]["text"], "line 1");
        assert_eq!(elements[1]["voice"], NARRATION_VOICE);
        assert_eq!(elements[2]["type"], "text");
        assert_eq!(elements[2]["settings"]["font-size"], "40px");
        assert_eq!(elements[2]["position"], "center-center");
    }

    #[test]
    fn empty_storyboard_is_rejected() {
        let err = map_scenes(&[], &RenderSettings::default()).unwrap_err();
        assert_eq!(
            err.violations(),
            ["storyboard must contain at least 1 shot".to_string()]
        );
    }

    #[test]
    fn validation_collects_every_violation() {
        let mut scenes = map_scenes(&shots(2), &RenderSettings::default()).unwrap();
        scenes[0].duration = 0;
        if let Element::Image { zoom, .. } = &mut scenes[0].elements[0] {
            *zoom = Some(11);
        }
        if let Element::Text { settings, .. } = &mut scenes[1].elements[2] {
            settings.font_size = "40".into();
        }
        let errors = validate_scenes(&scenes).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("scene[0]: duration"));
        assert!(errors[1].starts_with("scene[0].element[0]: image zoom"));
        assert!(errors[2].starts_with("scene[1].element[2]: text font-size"));
    }

    #[test]
    fn zoom_bounds_are_inclusive() {
        let mut scenes = map_scenes(&shots(2), &RenderSettings::default()).unwrap();
        if let Element::Image { zoom, .. } = &mut scenes[0].elements[0] {
            *zoom = Some(-10);
        }
        if let Element::Image { zoom, .. } = &mut scenes[1].elements[0] {
            *zoom = Some(10);
        }
        assert!(validate_scenes(&scenes).is_ok());
    }
}

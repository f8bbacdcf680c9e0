use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indexmap::IndexSet;
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::models::ModelSpec;
use restyle_contracts::results::Scene;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::gemini::{first_candidate_text, GeminiTransport};

pub const SCENE_IDEA_COUNT: usize = 10;

/// Expands one scene idea into titled, ready-to-render scene prompts.
pub trait SceneIdeaSource: Send + Sync {
    fn name(&self) -> &str;
    fn scene_ideas(&self, images: &[EncodedImage], idea: &str) -> Result<Vec<Scene>>;
}

pub fn scene_ideas_instruction(idea: &str) -> String {
    format!(
        "Carefully analyze the person/people in the provided images. The user has provided a core scene idea: \"{idea}\". Your task is to act as a creative director and expand this single idea into {SCENE_IDEA_COUNT} detailed, distinct, and high-quality scene prompts. Each generated prompt should be a direct and coherent elaboration of the user's original idea, not a completely different concept. For each, provide a short, catchy title (2-4 words) and a detailed prompt (2-3 sentences) that is ready for an image generation model. The prompts must be rich with descriptive language, specifying details about the environment, lighting, mood, and composition to create a visually stunning and specific result. The person/people from the images must be the central subject of each scene. Return ONLY a JSON array of objects with \"title\" and \"prompt\" keys."
    )
}

pub struct GeminiSceneIdeas {
    transport: GeminiTransport,
    model: String,
}

impl GeminiSceneIdeas {
    pub fn new(transport: GeminiTransport, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_payload(images: &[EncodedImage], idea: &str) -> Value {
        let mut parts: Vec<Value> = images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": image.base64_payload(),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": scene_ideas_instruction(idea) }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "title": {
                                "type": "STRING",
                                "description": "A short, catchy title for the scene.",
                            },
                            "prompt": {
                                "type": "STRING",
                                "description": "A detailed prompt describing a scene.",
                            },
                        },
                        "required": ["title", "prompt"],
                    },
                },
            },
        })
    }
}

impl SceneIdeaSource for GeminiSceneIdeas {
    fn name(&self) -> &str {
        &self.model
    }

    fn scene_ideas(&self, images: &[EncodedImage], idea: &str) -> Result<Vec<Scene>> {
        let payload = Self::build_payload(images, idea);
        let response = self.transport.generate_content(&self.model, &payload)?;
        let text = first_candidate_text(&response).unwrap_or_else(|| "[]".to_string());
        parse_scenes(&text)
    }
}

pub fn build_idea_source(
    spec: &ModelSpec,
    config: &GenerationConfig,
) -> Result<Arc<dyn SceneIdeaSource>> {
    match spec.provider.as_str() {
        "dryrun" => Ok(Arc::new(DryrunSceneIdeas)),
        "gemini" => {
            let transport = GeminiTransport::from_config(config)?;
            Ok(Arc::new(GeminiSceneIdeas::new(transport, spec.name.clone())))
        }
        other => bail!("unsupported scene idea provider '{other}' for model '{}'", spec.name),
    }
}

pub(crate) fn parse_scenes(text: &str) -> Result<Vec<Scene>> {
    let scenes: Vec<Scene> =
        serde_json::from_str(text.trim()).context("scene ideas response is not a JSON scene list")?;
    Ok(scenes
        .into_iter()
        .map(|scene| Scene {
            title: scene.title.trim().to_string(),
            prompt: scene.prompt.trim().to_string(),
        })
        .filter(|scene| !scene.title.is_empty() && !scene.prompt.is_empty())
        .collect())
}

const DRYRUN_SETTINGS: [(&str, &str); SCENE_IDEA_COUNT] = [
    ("Golden Hour", "bathed in warm golden-hour light with long soft shadows"),
    ("Midnight Glow", "at midnight under cool moonlight and scattered neon reflections"),
    ("Rainy Afternoon", "on a rainy afternoon with glistening surfaces and muted colours"),
    ("Misty Dawn", "at dawn wrapped in low mist and pale pastel skies"),
    ("Winter Frost", "in deep winter with frost, falling snow and crisp blue light"),
    ("Autumn Drift", "among drifting autumn leaves in amber and rust tones"),
    ("Desert Heat", "under harsh desert sun with shimmering heat haze"),
    ("Storm Front", "as a dramatic storm rolls in with heavy clouds and wind"),
    ("Candlelit Night", "lit only by flickering candlelight in an intimate setting"),
    ("Blue Hour", "during blue hour as city lights start to glow"),
];

/// Offline source: pairs the idea with fixed lighting setups.
#[derive(Debug, Clone, Default)]
pub struct DryrunSceneIdeas;

impl SceneIdeaSource for DryrunSceneIdeas {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn scene_ideas(&self, images: &[EncodedImage], idea: &str) -> Result<Vec<Scene>> {
        let idea = idea.trim();
        if idea.is_empty() {
            bail!("scene idea is empty");
        }
        let subject = if images.len() > 1 { "the people" } else { "the person" };
        Ok(DRYRUN_SETTINGS
            .iter()
            .map(|(title, setting)| Scene {
                title: (*title).to_string(),
                prompt: format!(
                    "{idea}, {setting}, with {subject} from the images at the centre of the frame and a shallow depth of field."
                ),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaState {
    #[default]
    Idle,
    Generating,
    Results,
}

/// Proposed scenes plus the user's selection, keyed by scene prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SceneBoard {
    pub idea: String,
    pub state: IdeaState,
    pub scenes: Vec<Scene>,
    pub selected: IndexSet<String>,
}

impl SceneBoard {
    /// Clears the previous proposals and selection before a new request.
    pub fn begin(&mut self, idea: &str) {
        self.idea = idea.trim().to_string();
        self.state = IdeaState::Generating;
        self.scenes.clear();
        self.selected.clear();
    }

    pub fn finish(&mut self, scenes: Vec<Scene>) {
        self.scenes = scenes;
        self.state = IdeaState::Results;
    }

    pub fn fail(&mut self) {
        self.state = IdeaState::Idle;
    }

    /// Returns whether the prompt is selected afterwards.
    pub fn toggle(&mut self, prompt: &str) -> bool {
        if self.selected.shift_remove(prompt) {
            return false;
        }
        self.selected.insert(prompt.to_string());
        true
    }

    /// Selected proposals in proposal order.
    pub fn selected_scenes(&self) -> Vec<Scene> {
        self.scenes
            .iter()
            .filter(|scene| self.selected.contains(&scene.prompt))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use super::prompts::PromptPair;

const BUNDLED_THEMES_JSON: &str = include_str!("../../resources/themes.json");
const CATEGORY_PLACEHOLDER: &str = "{category}";

pub const DEFAULT_CAMERA_ANGLE: &str = "Default Angle";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Theme {
    pub key: String,
    pub title: String,
    pub categories: Vec<String>,
    /// Display name to prompt wording, e.g. `B&W` → `Classic Black and White`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    pub prompt: String,
    pub fallback: String,
    /// Hand-written primary prompts that replace the template.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl Theme {
    pub fn prompt(&self, category: &str) -> String {
        if let Some(text) = self.overrides.get(category) {
            return text.clone();
        }
        self.prompt
            .replace(CATEGORY_PLACEHOLDER, self.wording(category))
    }

    pub fn fallback_prompt(&self, category: &str) -> String {
        self.fallback
            .replace(CATEGORY_PLACEHOLDER, self.wording(category))
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|item| item == category)
    }

    fn wording<'a>(&'a self, category: &'a str) -> &'a str {
        self.aliases
            .get(category)
            .map(String::as_str)
            .unwrap_or(category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CameraAngle {
    pub key: String,
    pub modifier: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    themes: Vec<Theme>,
    camera_angles: Vec<CameraAngle>,
}

/// Static mapping from theme categories to their prompt pairs.
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    themes: IndexMap<String, Theme>,
    camera_angles: IndexMap<String, CameraAngle>,
}

impl ThemeCatalog {
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_THEMES_JSON).context("bundled theme catalog is invalid")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: CatalogFile =
            serde_json::from_str(raw).context("theme catalog is not valid JSON")?;
        let mut themes = IndexMap::new();
        for theme in parsed.themes {
            if theme.categories.is_empty() {
                bail!("theme '{}' has no categories", theme.key);
            }
            if themes.contains_key(&theme.key) {
                bail!("duplicate theme '{}'", theme.key);
            }
            themes.insert(theme.key.clone(), theme);
        }
        let camera_angles = parsed
            .camera_angles
            .into_iter()
            .map(|angle| (angle.key.clone(), angle))
            .collect();
        Ok(Self {
            themes,
            camera_angles,
        })
    }

    pub fn theme(&self, key: &str) -> Option<&Theme> {
        self.themes.get(key)
    }

    pub fn themes(&self) -> impl Iterator<Item = &Theme> {
        self.themes.values()
    }

    pub fn camera_angle(&self, key: &str) -> Option<&CameraAngle> {
        self.camera_angles.get(key)
    }

    pub fn camera_angles(&self) -> impl Iterator<Item = &CameraAngle> {
        self.camera_angles.values()
    }

    /// Prompt pair for one batch category, camera-angle modifier applied to
    /// both prompts.
    pub fn batch_prompts(&self, theme_key: &str, category: &str, angle_key: &str) -> Result<PromptPair> {
        let theme = self
            .theme(theme_key)
            .with_context(|| format!("unknown theme '{theme_key}'"))?;
        let angle = self
            .camera_angle(angle_key)
            .with_context(|| format!("unknown camera angle '{angle_key}'"))?;
        Ok(PromptPair::new(theme.prompt(category), theme.fallback_prompt(category))
            .with_modifier(&angle.modifier))
    }
}

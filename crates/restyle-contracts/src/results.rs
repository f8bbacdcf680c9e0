use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_url::EncodedImage;

/// State of one addressable generation slot.
///
/// The image is present only when `Done` and the error message only when
/// `Error`; a new attempt resets the slot to `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Pending,
    Done { image_url: EncodedImage },
    Error { error: String },
}

impl ItemResult {
    pub fn done(image_url: EncodedImage) -> Self {
        Self::Done { image_url }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Pending => ItemStatus::Pending,
            Self::Done { .. } => ItemStatus::Done,
            Self::Error { .. } => ItemStatus::Error,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn image_url(&self) -> Option<&EncodedImage> {
        match self {
            Self::Done { image_url } => Some(image_url),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Done,
    Error,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Error => "error",
        })
    }
}

/// Which addressing scheme a slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    Batch,
    Scene,
    Custom,
}

impl Scheme {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "batch" | "theme" | "category" => Some(Self::Batch),
            "scene" | "scenes" => Some(Self::Scene),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Address of one slot: a batch category, a scene title or a custom index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "key", rename_all = "snake_case")]
pub enum SlotKey {
    Batch(String),
    Scene(String),
    Custom(usize),
}

impl SlotKey {
    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Batch(_) => Scheme::Batch,
            Self::Scene(_) => Scheme::Scene,
            Self::Custom(_) => Scheme::Custom,
        }
    }

    /// The caption a presentation layer shows for this slot. Custom slots
    /// use the `custom-<index>` form that `edit_image` resolves back.
    pub fn caption(&self) -> String {
        match self {
            Self::Batch(category) => category.clone(),
            Self::Scene(title) => title.clone(),
            Self::Custom(index) => format!("custom-{index}"),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch(category) => write!(f, "batch:{category}"),
            Self::Scene(title) => write!(f, "scene:{title}"),
            Self::Custom(index) => write!(f, "custom:{index}"),
        }
    }
}

/// Which of a unit's two prompts a manual regeneration sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    Original,
    Fallback,
}

impl PromptVariant {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "original" | "primary" => Some(Self::Original),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }

    pub fn select<'a>(&self, primary: &'a str, fallback: &'a str) -> &'a str {
        match self {
            Self::Original => primary,
            Self::Fallback => fallback,
        }
    }
}

/// A proposed scene from the idea-expansion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub title: String,
    pub prompt: String,
}

use std::env;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_CUSTOM_IMAGES: usize = 4;

/// Knobs for one session. `Default` carries the production values;
/// `from_env` layers environment overrides on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub image_model: String,
    pub text_model: String,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub pacing_ms: u64,
    pub request_timeout_s: f64,
    pub max_images: usize,
    pub max_custom_images: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            pacing_ms: 1000,
            request_timeout_s: 90.0,
            max_images: 4,
            max_custom_images: DEFAULT_MAX_CUSTOM_IMAGES,
        }
    }
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .or_else(|| non_empty_env("API_KEY"));
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(pacing) = non_empty_env("RESTYLE_PACING_MS").and_then(|raw| raw.parse().ok()) {
            config.pacing_ms = pacing;
        }
        if let Some(timeout) = non_empty_env("RESTYLE_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
        {
            config.request_timeout_s = timeout;
        }
        config
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

use std::sync::Arc;
use std::time::Duration;

use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::events::{payload, EventWriter};
use restyle_contracts::results::PromptVariant;
use serde_json::json;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::model::{ImageModel, ModelReply, ModelRequest};
use crate::sleeper::{Sleeper, ThreadSleeper};

/// Everything needed to produce one image. Source images stay in their
/// transportable string form until the client validates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUnit {
    pub source_images: Vec<String>,
    pub primary_prompt: String,
    pub fallback_prompt: Option<String>,
}

impl GenerationUnit {
    pub fn new(source_images: &[EncodedImage], primary_prompt: impl Into<String>) -> Self {
        Self {
            source_images: source_images.iter().map(ToString::to_string).collect(),
            primary_prompt: primary_prompt.into(),
            fallback_prompt: None,
        }
    }

    pub fn with_fallback(mut self, fallback_prompt: impl Into<String>) -> Self {
        self.fallback_prompt = Some(fallback_prompt.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): initial, 2x, 4x, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }
}

/// Turns a unit into one image: retry on transient server faults, then
/// a single fallback pass when the model answers without an image.
///
/// Holds no per-call state; clones share the model and sleeper.
#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<dyn ImageModel>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    events: Option<EventWriter>,
}

impl GenerationClient {
    pub fn new(model: Arc<dyn ImageModel>) -> Self {
        Self {
            model,
            sleeper: Arc::new(ThreadSleeper),
            retry: RetryPolicy::default(),
            events: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn generate(&self, unit: &GenerationUnit) -> Result<EncodedImage, GenerationError> {
        let images = validate_sources(&unit.source_images)?;
        let primary = self.attempt(&images, &unit.primary_prompt, PromptVariant::Original);
        match (primary, unit.fallback_prompt.as_deref()) {
            (Err(err @ GenerationError::NoImageProduced { .. }), Some(fallback)) => {
                self.emit(
                    "generation_fallback",
                    json!({
                        "model": self.model.name(),
                        "reason": err.to_string(),
                    }),
                );
                self.attempt(&images, fallback, PromptVariant::Fallback)
                    .map_err(|last| GenerationError::FallbackExhausted {
                        last: Box::new(last),
                    })
            }
            (outcome, _) => outcome,
        }
    }

    fn attempt(
        &self,
        images: &[EncodedImage],
        prompt: &str,
        variant: PromptVariant,
    ) -> Result<EncodedImage, GenerationError> {
        let request = ModelRequest::image_and_text(images.to_vec(), prompt);
        let reply = self.call_with_retries(&request, variant)?;
        match reply.first_image() {
            Some(image) => Ok(image.clone()),
            None => Err(GenerationError::NoImageProduced {
                text: reply.joined_text(),
            }),
        }
    }

    fn call_with_retries(
        &self,
        request: &ModelRequest,
        variant: PromptVariant,
    ) -> Result<ModelReply, GenerationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.model.generate_content(request) {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(GenerationError::NetworkOrUnknown(err.to_string()));
            }
            if attempt >= max_attempts {
                return Err(GenerationError::TransientServer {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }
            let delay = self.retry.delay_after(attempt);
            self.emit(
                "generation_retry",
                json!({
                    "model": self.model.name(),
                    "variant": variant,
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "delay_ms": delay.as_millis() as u64,
                    "error": err.to_string(),
                }),
            );
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

fn validate_sources(sources: &[String]) -> Result<Vec<EncodedImage>, GenerationError> {
    if sources.is_empty() {
        return Err(GenerationError::InvalidInput(
            "At least one source image is required.".to_string(),
        ));
    }
    sources
        .iter()
        .map(|raw| {
            EncodedImage::parse(raw).map_err(|err| GenerationError::InvalidInput(err.to_string()))
        })
        .collect()
}

//! Scripted doubles shared by the engine's unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use restyle_contracts::data_url::EncodedImage;

use crate::error::ModelCallError;
use crate::model::{ImageModel, ModelReply, ModelRequest};
use crate::sleeper::Sleeper;

type Responder = dyn Fn(&ModelRequest) -> Result<ModelReply, ModelCallError> + Send + Sync;

/// Answers each call through a closure and records every request.
#[derive(Clone)]
pub(crate) struct ScriptedModel {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelReply, ModelCallError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every prompt gets an image derived from the prompt text.
    pub(crate) fn always_image() -> Self {
        Self::new(|request| Ok(ModelReply::image(image_for(&request.text))))
    }

    pub(crate) fn calls(&self) -> Vec<ModelRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.text).collect()
    }
}

impl ImageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_content(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        (self.responder)(request)
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|waits| waits.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// A tiny distinct image per label.
pub(crate) fn image_for(label: &str) -> EncodedImage {
    EncodedImage::from_bytes("image/png", label.as_bytes()).unwrap()
}

pub(crate) fn upload() -> EncodedImage {
    EncodedImage::parse("data:image/jpeg;base64,/9j/4AAQ").unwrap()
}

pub(crate) fn server_error() -> ModelCallError {
    ModelCallError::Status {
        provider: "Gemini".to_string(),
        status: 500,
        body: r#"{"error":{"code":500,"status":"INTERNAL"}}"#.to_string(),
    }
}

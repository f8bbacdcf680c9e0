use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use restyle_contracts::data_url::EncodedImage;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::error::ModelCallError;
use crate::model::{ImageModel, ModelReply, ModelRequest, ReplyPart};

const PROVIDER: &str = "Gemini";

/// Shared `generateContent` plumbing for the image and text models.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiTransport {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn generate_content(&self, model: &str, payload: &Value) -> Result<Value, ModelCallError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ModelCallError::Configuration(
                "GEMINI_API_KEY (or GOOGLE_API_KEY / API_KEY) is not set".to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .map_err(|err| {
                ModelCallError::Transport(format!(
                    "{PROVIDER} request failed ({model}): {}",
                    err.without_url()
                ))
            })?;
        response_json_or_error(response)
    }
}

pub struct GeminiImageModel {
    transport: GeminiTransport,
    model: String,
}

impl GeminiImageModel {
    pub fn new(transport: GeminiTransport, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }
}

impl ImageModel for GeminiImageModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate_content(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
        let payload = build_payload(request);
        let response = self.transport.generate_content(&self.model, &payload)?;
        parse_reply(&response)
    }
}

pub(crate) fn build_payload(request: &ModelRequest) -> Value {
    let mut parts: Vec<Value> = request
        .images
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
    parts.push(json!({ "text": request.text }));
    let modalities: Vec<&str> = request
        .response_modalities
        .iter()
        .map(|modality| modality.as_str())
        .collect();
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseModalities": modalities },
    })
}

pub(crate) fn parse_reply(payload: &Value) -> Result<ModelReply, ModelCallError> {
    let mut reply = ModelReply::default();
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in &candidates {
        let parts = candidate_parts(candidate);
        for part in &parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                reply.parts.push(ReplyPart::Text(text.to_string()));
                continue;
            }
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object);
            let Some(inline) = inline else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let image = EncodedImage::from_base64(mime_type, data).map_err(|err| {
                ModelCallError::Decode(format!("{PROVIDER} image payload rejected: {err}"))
            })?;
            reply.parts.push(ReplyPart::Image(image));
        }
        if parts.is_empty() {
            if let Some(reason) = candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .filter(|reason| *reason != "STOP")
            {
                reply
                    .parts
                    .push(ReplyPart::Text(format!("Generation stopped: {reason}")));
            }
        }
    }

    if candidates.is_empty() {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            reply
                .parts
                .push(ReplyPart::Text(format!("Request blocked: {reason}")));
        }
    }
    Ok(reply)
}

/// Concatenated text parts of the first candidate.
pub(crate) fn first_candidate_text(payload: &Value) -> Option<String> {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|items| items.first())?;
    let text: String = candidate_parts(candidate)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn candidate_parts(candidate: &Value) -> Vec<Value> {
    candidate
        .get("content")
        .and_then(Value::as_object)
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, ModelCallError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        ModelCallError::Transport(format!("{PROVIDER} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(ModelCallError::Status {
            provider: PROVIDER.to_string(),
            status: code,
            body: truncate_text(&body, 512),
        });
    }
    let parsed: Value = serde_json::from_str(&body).map_err(|err| {
        ModelCallError::Decode(format!("{PROVIDER} returned invalid JSON payload: {err}"))
    })?;
    if let Some(error) = parsed.get("error") {
        let status = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|value| u16::try_from(value).ok())
            .unwrap_or(code);
        return Err(ModelCallError::Status {
            provider: PROVIDER.to_string(),
            status,
            body: truncate_text(&error.to_string(), 512),
        });
    }
    Ok(parsed)
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use restyle_contracts::data_url::EncodedImage;
    use serde_json::json;

    use super::*;

    fn transport(api_key: Option<&str>) -> anyhow::Result<GeminiTransport> {
        let config = GenerationConfig {
            api_base: "http://127.0.0.1:9/v1beta/".to_string(),
            api_key: api_key.map(str::to_string),
            ..GenerationConfig::default()
        };
        GeminiTransport::from_config(&config)
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() -> anyhow::Result<()> {
        let transport = transport(None)?;
        assert_eq!(
            transport.endpoint_for_model("gemini-2.5-flash-image-preview"),
            "http://127.0.0.1:9/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        assert_eq!(
            transport.endpoint_for_model("models/gemini-3-pro-preview"),
            "http://127.0.0.1:9/v1beta/models/gemini-3-pro-preview:generateContent"
        );
        Ok(())
    }

    #[test]
    fn missing_api_key_fails_before_any_request() -> anyhow::Result<()> {
        let transport = transport(None)?;
        let err = transport
            .generate_content("gemini-2.5-flash-image-preview", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ModelCallError::Configuration(_)));
        assert!(!err.is_transient());
        Ok(())
    }

    #[test]
    fn payload_lists_images_before_prompt() {
        let images = vec![
            EncodedImage::parse("data:image/png;base64,AQID").unwrap(),
            EncodedImage::parse("data:image/jpeg;base64,BAUG").unwrap(),
        ];
        let payload = build_payload(&ModelRequest::image_and_text(images, "Make it noir"));
        assert_eq!(
            payload,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "BAUG"}},
                        {"text": "Make it noir"},
                    ]
                }],
                "generationConfig": {"responseModalities": ["IMAGE", "TEXT"]},
            })
        );
    }

    #[test]
    fn parse_reply_collects_images_and_text() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inline_data": {"mime_type": "image/webp", "data": "AQID"}},
                ]}
            }]
        });
        let reply = parse_reply(&payload)?;
        assert_eq!(reply.joined_text().as_deref(), Some("Here you go"));
        let image = reply.first_image().unwrap();
        assert_eq!(image.to_string(), "data:image/webp;base64,AQID");
        Ok(())
    }

    #[test]
    fn parse_reply_surfaces_block_and_finish_reasons() -> anyhow::Result<()> {
        let blocked = parse_reply(&json!({"promptFeedback": {"blockReason": "SAFETY"}}))?;
        assert_eq!(blocked.joined_text().as_deref(), Some("Request blocked: SAFETY"));

        let stopped = parse_reply(&json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "IMAGE_SAFETY"}]
        }))?;
        assert_eq!(
            stopped.joined_text().as_deref(),
            Some("Generation stopped: IMAGE_SAFETY")
        );
        assert!(stopped.first_image().is_none());
        Ok(())
    }

    #[test]
    fn parse_reply_rejects_corrupt_image_data() {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "@@@"}}
            ]}}]
        });
        assert!(matches!(parse_reply(&payload), Err(ModelCallError::Decode(_))));
    }

    #[test]
    fn first_candidate_text_concatenates_parts() {
        let payload = json!({
            "candidates": [{"content": {"parts": [{"text": "[{\"title\""}, {"text": ": \"A\"}]"}]}}]
        });
        assert_eq!(
            first_candidate_text(&payload).as_deref(),
            Some("[{\"title\": \"A\"}]")
        );
        assert_eq!(first_candidate_text(&json!({})), None);
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{bail, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::models::ModelSpec;
use sha2::{Digest, Sha256};

use crate::config::GenerationConfig;
use crate::error::ModelCallError;
use crate::gemini::{GeminiImageModel, GeminiTransport};

const DRYRUN_EDGE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Image,
    Text,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Text => "TEXT",
        }
    }
}

/// One multimodal call: every image as inline data, then the text prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub images: Vec<EncodedImage>,
    pub text: String,
    pub response_modalities: Vec<ResponseModality>,
}

impl ModelRequest {
    pub fn image_and_text(images: Vec<EncodedImage>, text: impl Into<String>) -> Self {
        Self {
            images,
            text: text.into(),
            response_modalities: vec![ResponseModality::Image, ResponseModality::Text],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPart {
    Text(String),
    Image(EncodedImage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub parts: Vec<ReplyPart>,
}

impl ModelReply {
    pub fn image(image: EncodedImage) -> Self {
        Self {
            parts: vec![ReplyPart::Image(image)],
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ReplyPart::Text(text.into())],
        }
    }

    pub fn first_image(&self) -> Option<&EncodedImage> {
        self.parts.iter().find_map(|part| match part {
            ReplyPart::Image(image) => Some(image),
            ReplyPart::Text(_) => None,
        })
    }

    /// All text parts joined, or `None` when the reply carried no text.
    pub fn joined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ReplyPart::Text(text) if !text.trim().is_empty() => Some(text.trim()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// The remote image-capable model behind the generation client.
pub trait ImageModel: Send + Sync {
    fn name(&self) -> &str;
    fn generate_content(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError>;
}

/// Offline model: answers every request with a solid swatch whose colour
/// is derived from the prompt, so runs are reproducible without a key.
#[derive(Debug, Clone, Default)]
pub struct DryrunImageModel;

impl ImageModel for DryrunImageModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_content(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
        let (r, g, b) = color_from_prompt(&request.text, request.images.len() as u64);
        let swatch = RgbImage::from_pixel(DRYRUN_EDGE, DRYRUN_EDGE, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(swatch)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| ModelCallError::Decode(format!("dryrun encode failed: {err}")))?;
        let image = EncodedImage::from_bytes("image/png", &bytes)
            .map_err(|err| ModelCallError::Decode(err.to_string()))?;
        Ok(ModelReply::image(image))
    }
}

pub fn build_image_model(spec: &ModelSpec, config: &GenerationConfig) -> Result<Arc<dyn ImageModel>> {
    match spec.provider.as_str() {
        "dryrun" => Ok(Arc::new(DryrunImageModel)),
        "gemini" => {
            let transport = GeminiTransport::from_config(config)?;
            Ok(Arc::new(GeminiImageModel::new(transport, spec.name.clone())))
        }
        other => bail!("unsupported image provider '{other}' for model '{}'", spec.name),
    }
}

pub(crate) fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

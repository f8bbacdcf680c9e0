const NO_TEXT_RESPONSE: &str = "No text response received.";

/// Terminal outcome of one generation unit. The `Display` text is what
/// lands in the slot's `Error { error }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("The AI model kept failing with a server error after {attempts} attempts: {message}")]
    TransientServer { attempts: u32, message: String },
    #[error(
        "The AI model responded with text instead of an image: \"{}\"",
        .text.as_deref().unwrap_or(NO_TEXT_RESPONSE)
    )]
    NoImageProduced { text: Option<String> },
    #[error("The AI model failed with both original and fallback prompts. Last error: {last}")]
    FallbackExhausted { last: Box<GenerationError> },
    #[error("The AI model failed to generate an image. Details: {0}")]
    NetworkOrUnknown(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::TransientServer { .. } => "transient_server",
            Self::NoImageProduced { .. } => "no_image_produced",
            Self::FallbackExhausted { .. } => "fallback_exhausted",
            Self::NetworkOrUnknown(_) => "network_or_unknown",
        }
    }
}

/// Raw failure of one remote model call, before retry classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelCallError {
    #[error("{provider} request failed ({status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    Configuration(String),
}

impl ModelCallError {
    /// Server-side faults worth another attempt: any 5xx, or a body the
    /// service tagged as an internal error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, body, .. } => {
                (500..=599).contains(status) || body_signals_internal(body)
            }
            _ => false,
        }
    }
}

fn body_signals_internal(body: &str) -> bool {
    body.contains("INTERNAL") || body.replace(' ', "").contains("\"code\":500")
}

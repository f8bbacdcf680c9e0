use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUrlError {
    #[error("Invalid image data URL format. Expected 'data:image/...;base64,...'")]
    Malformed,
    #[error("Unsupported MIME type '{0}'; expected an image/* type")]
    NotAnImage(String),
    #[error("Image payload is not valid base64: {0}")]
    Payload(String),
}

/// An image in its transportable form, `data:<mimeType>;base64,<payload>`.
///
/// This is the only image currency between the upload boundary, the
/// generation client and the status store. Construction always validates,
/// so holding an `EncodedImage` means the value already decodes to a
/// well-formed `(mime_type, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedImage {
    mime_type: String,
    data: String,
}

impl EncodedImage {
    pub fn parse(raw: &str) -> Result<Self, DataUrlError> {
        let rest = raw.strip_prefix(DATA_PREFIX).ok_or(DataUrlError::Malformed)?;
        let (mime_type, data) = rest.split_once(BASE64_MARKER).ok_or(DataUrlError::Malformed)?;
        if !is_image_mime(mime_type) {
            if mime_type.is_empty() || mime_type.contains(';') {
                return Err(DataUrlError::Malformed);
            }
            return Err(DataUrlError::NotAnImage(mime_type.to_string()));
        }
        BASE64
            .decode(data.as_bytes())
            .map_err(|err| DataUrlError::Payload(err.to_string()))?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Result<Self, DataUrlError> {
        if !is_image_mime(mime_type) {
            return Err(DataUrlError::NotAnImage(mime_type.to_string()));
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        })
    }

    /// Rebuilds a value from a `(mime_type, base64)` pair as returned by a
    /// remote model's inline-data part.
    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, DataUrlError> {
        Self::parse(&format!("{DATA_PREFIX}{mime_type}{BASE64_MARKER}{data}"))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn base64_payload(&self) -> &str {
        &self.data
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, DataUrlError> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|err| DataUrlError::Payload(err.to_string()))
    }

    pub fn extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        if lowered.contains("gif") {
            return "gif";
        }
        "png"
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DATA_PREFIX}{}{BASE64_MARKER}{}", self.mime_type, self.data)
    }
}

impl FromStr for EncodedImage {
    type Err = DataUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = DataUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EncodedImage> for String {
    fn from(value: EncodedImage) -> Self {
        value.to_string()
    }
}

/// `image/<subtype>` where the subtype is word characters only.
fn is_image_mime(mime_type: &str) -> bool {
    let Some(subtype) = mime_type.strip_prefix("image/") else {
        return false;
    };
    !subtype.is_empty()
        && subtype
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::{DataUrlError, EncodedImage};

    #[test]
    fn parse_splits_mime_and_payload() {
        let image = EncodedImage::parse("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.base64_payload(), "aGVsbG8=");
        assert_eq!(image.decode_bytes().unwrap(), b"hello".to_vec());
    }

    #[test]
    fn display_reproduces_the_original_string() {
        for raw in [
            "data:image/png;base64,aGVsbG8=",
            "data:image/jpeg;base64,/9j/4AAQ",
            "data:image/webp;base64,",
        ] {
            let image = EncodedImage::parse(raw).unwrap();
            assert_eq!(image.to_string(), raw);
            let reparsed: EncodedImage = image.to_string().parse().unwrap();
            assert_eq!(reparsed, image);
        }
    }

    #[test]
    fn from_bytes_encodes_payload() {
        let image = EncodedImage::from_bytes("image/gif", &[1, 2, 3]).unwrap();
        assert_eq!(image.to_string(), "data:image/gif;base64,AQID");
        assert_eq!(image.extension(), "gif");
    }

    #[test]
    fn rejects_values_that_are_not_data_urls() {
        assert_eq!(
            EncodedImage::parse("https://example.com/a.png"),
            Err(DataUrlError::Malformed)
        );
        assert_eq!(
            EncodedImage::parse("data:image/png,aGVsbG8="),
            Err(DataUrlError::Malformed)
        );
    }

    #[test]
    fn rejects_non_image_mime_types() {
        assert_eq!(
            EncodedImage::parse("data:text/plain;base64,aGVsbG8="),
            Err(DataUrlError::NotAnImage("text/plain".to_string()))
        );
        assert!(EncodedImage::from_bytes("application/pdf", b"x").is_err());
    }

    #[test]
    fn rejects_payload_that_is_not_base64() {
        assert!(matches!(
            EncodedImage::parse("data:image/png;base64,@@not base64@@"),
            Err(DataUrlError::Payload(_))
        ));
    }

    #[test]
    fn serde_uses_the_string_form() {
        let image = EncodedImage::parse("data:image/png;base64,aGVsbG8=").unwrap();
        let encoded = serde_json::to_string(&image).unwrap();
        assert_eq!(encoded, "\"data:image/png;base64,aGVsbG8=\"");
        let decoded: EncodedImage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, image);
        assert!(serde_json::from_str::<EncodedImage>("\"nope\"").is_err());
    }
}

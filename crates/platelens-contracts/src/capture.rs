use std::fs;
use std::path::Path;

use crate::error::ScanError;

/// A raw photo handed over by the capture surface. Lives only for the
/// duration of one scan; both encodings are derived from it and the raw
/// bytes are dropped afterwards.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl CapturedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Single-shot read of an image file, MIME guessed from the extension.
    pub fn from_path(path: &Path) -> Result<Self, ScanError> {
        let bytes = fs::read(path)
            .map_err(|err| ScanError::ReadFailure(format!("{}: {err}", path.display())))?;
        Ok(Self::new(bytes, guess_image_mime(path)))
    }
}

/// Bare base64 payload plus MIME type, shaped for the analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEncoding {
    pub data: String,
    pub mime_type: String,
}

/// Full `data:<mime>;base64,<payload>` string, usable directly as an image
/// source and safe to embed in persisted JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEncoding(String);

impl StorageEncoding {
    pub fn new(data_uri: impl Into<String>) -> Self {
        Self(data_uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The base64 payload after the data-URI prefix.
    pub fn payload(&self) -> &str {
        self.0
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or(&self.0)
    }
}

pub fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

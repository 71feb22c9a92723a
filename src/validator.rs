//! Upload acceptance checks. Pure: no I/O, no side effects, same input same
//! answer.
//!
//! Rules run in order and the first failure wins:
//! 1. a file must be selected
//! 2. size must not exceed the configured limit
//! 3. the declared media type must be in the allow-list

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ValidationLimits;
use crate::models::MediaType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("File exceeds size limit: {size_bytes} bytes is over the {max_bytes} byte maximum")]
    ExceedsSizeLimit { size_bytes: u64, max_bytes: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
}

/// A file the user picked, before it is accepted for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub file_name: String,
    pub size_bytes: u64,
    /// MIME string or extension reported by the picker, if any.
    pub declared_type: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl CandidateFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, declared_type: Option<&str>) -> Self {
        Self {
            file_name: file_name.into(),
            size_bytes: bytes.len() as u64,
            declared_type: declared_type.map(str::to_string),
            bytes,
        }
    }

    /// Load a file from disk. The declared type is guessed from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let declared = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        tracing::debug!(
            file = %path.display(),
            size = bytes.len(),
            declared = declared.as_deref().unwrap_or("unknown"),
            "Candidate file loaded"
        );

        Ok(Self {
            file_name,
            size_bytes: bytes.len() as u64,
            declared_type: declared,
            bytes,
        })
    }

    /// The declared type narrowed to a supported media type. Falls back to
    /// guessing from the file name when nothing was declared.
    pub fn media_type(&self) -> Option<MediaType> {
        match self.declared_type.as_deref().map(str::trim) {
            Some(declared) if !declared.is_empty() => MediaType::from_declared(declared),
            _ => mime_guess::from_path(&self.file_name)
                .first()
                .and_then(|mime| MediaType::from_declared(mime.essence_str())),
        }
    }

    fn declared_label(&self) -> String {
        match self.declared_type.as_deref().map(str::trim) {
            Some(declared) if !declared.is_empty() => declared.to_string(),
            _ => Path::new(&self.file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".into()),
        }
    }
}

/// Decide whether a candidate file may be uploaded.
pub fn validate(
    file: Option<&CandidateFile>,
    limits: &ValidationLimits,
) -> Result<MediaType, ValidationError> {
    let file = match file {
        Some(f) if !f.file_name.trim().is_empty() => f,
        _ => return Err(ValidationError::NoFileSelected),
    };

    if file.size_bytes > limits.max_file_size {
        return Err(ValidationError::ExceedsSizeLimit {
            size_bytes: file.size_bytes,
            max_bytes: limits.max_file_size,
        });
    }

    match file.media_type() {
        Some(media) if limits.allowed_types.contains(&media) => Ok(media),
        _ => Err(ValidationError::UnsupportedType(file.declared_label())),
    }
}

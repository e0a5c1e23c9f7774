use std::path::PathBuf;

use thiserror::Error;

use aimg_contracts::models::SelectionError;
use aimg_contracts::request::{MAX_IMAGE_COUNT, MIN_PROMPT_CHARS};

const ERROR_TEXT_MAX_CHARS: usize = 512;

/// Why an input image was refused for a variation request.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cannot read input image {}: {reason}", path.display())]
    FileUnreadable { path: PathBuf, reason: String },

    #[error("input image {} is unacceptable: {reason}", path.display())]
    ConstraintViolation { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("select at least one output destination (browser or file)")]
    NoSinkSelected,

    #[error("image count must be between 1 and {max}, got {0}", max = MAX_IMAGE_COUNT)]
    InvalidImageCount(u8),

    #[error(
        "text prompt must be at least {min} characters, got {chars}",
        min = MIN_PROMPT_CHARS
    )]
    InvalidPrompt { chars: usize },

    #[error("cannot read input image {}: {reason}", path.display())]
    FileUnreadable { path: PathBuf, reason: String },

    #[error("input image {} is unacceptable: {reason}", path.display())]
    ConstraintViolation { path: PathBuf, reason: String },

    #[error("API key unavailable: {0}")]
    AuthenticationUnavailable(String),

    /// No registered model can serve the request. Raised before any remote call.
    #[error(transparent)]
    ModelUnavailable(#[from] SelectionError),

    #[error("image request failed: {0}")]
    RemoteCallFailed(String),

    #[error("download of image {index} from {url} failed: {reason}")]
    DownloadFailed {
        index: usize,
        url: String,
        reason: String,
    },

    #[error("writing image {index} to {} failed: {reason}", path.display())]
    WriteFailed {
        index: usize,
        path: PathBuf,
        reason: String,
    },
}

impl DispatchError {
    pub(crate) fn remote(err: &anyhow::Error) -> Self {
        DispatchError::RemoteCallFailed(error_chain_text(err, ERROR_TEXT_MAX_CHARS))
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileUnreadable { path, reason } => {
                DispatchError::FileUnreadable { path, reason }
            }
            ValidationError::ConstraintViolation { path, reason } => {
                DispatchError::ConstraintViolation { path, reason }
            }
        }
    }
}

/// Flattens an error chain into `outer | caused by: inner`, skipping repeats.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn chain_text(err: &anyhow::Error) -> String {
    error_chain_text(err, ERROR_TEXT_MAX_CHARS)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

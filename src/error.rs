use std::path::PathBuf;
use thiserror::Error;

/// The main error type for hfxfer operations.
///
/// This is a closed set: every transport, filesystem and validation failure
/// is mapped into one of these variants before it leaves the transfer client.
#[derive(Debug, Error)]
pub enum HfxferError {
    #[error("Authentication failed for '{repo_id}': {message}")]
    Authentication { repo_id: String, message: String },

    #[error("Network error for '{repo_id}': {message}")]
    Network { repo_id: String, message: String },

    #[error("File not found: {path}: {message}")]
    FileNotFound { path: String, message: String },

    #[error("Permission error at {path}: {message}")]
    Permission { path: PathBuf, message: String },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Rate limited by the hub for '{repo_id}': {message}")]
    RateLimit { repo_id: String, message: String },

    #[error("Pattern '{pattern}' matches more than {max_files} files")]
    PatternTooBroad { pattern: String, max_files: usize },

    #[error("Failed to resolve pattern '{pattern}': {message}")]
    ResolutionFailed { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HfxferError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        HfxferError::Validation {
            message: message.into(),
        }
    }

    /// Short category name, stable across releases.
    pub fn category(&self) -> &'static str {
        match self {
            HfxferError::Authentication { .. } => "authentication",
            HfxferError::Network { .. } => "network",
            HfxferError::FileNotFound { .. } => "file-not-found",
            HfxferError::Permission { .. } | HfxferError::Io(_) => "permission",
            HfxferError::Validation { .. } => "validation",
            HfxferError::RateLimit { .. } => "rate-limit",
            HfxferError::PatternTooBroad { .. } => "pattern-too-broad",
            HfxferError::ResolutionFailed { .. } => "resolution",
        }
    }
}

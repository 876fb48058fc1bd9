//! Hugging Face Hub remote capability.
//!
//! This module owns everything that talks about the remote side: repository
//! references, the [`HubRpc`] trait the transfer engine drives, transport
//! errors and their classification into [`HfxferError`], and token sourcing.
//! The transfer engine itself lives in `crate::transfer`.

pub mod auth;
pub mod http;
pub mod resolve;

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::error::HfxferError;
use crate::transfer::stream::{UploadEntry, UploadSource};

pub use auth::{HfTokenStore, StaticToken, TokenSource};
pub use http::HttpHub;
pub use resolve::parse_repo_input;

/// Default hub endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Default branch used when no revision is given.
pub const DEFAULT_REVISION: &str = "main";

/// Kind of hub repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum RepoType {
    #[default]
    Model,
    Dataset,
    Space,
}

impl RepoType {
    /// Collection name used by the REST API (`/api/{kind}/...`).
    pub fn api_kind(self) -> &'static str {
        match self {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
            RepoType::Space => "spaces",
        }
    }

    /// Prefix used by the web and `resolve` URLs.
    pub fn url_prefix(self) -> &'static str {
        match self {
            RepoType::Model => "",
            RepoType::Dataset => "datasets/",
            RepoType::Space => "spaces/",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RepoType::Model => "model",
            RepoType::Dataset => "dataset",
            RepoType::Space => "space",
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RepoType {
    type Err = HfxferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(RepoType::Model),
            "dataset" => Ok(RepoType::Dataset),
            "space" => Ok(RepoType::Space),
            other => Err(HfxferError::validation(format!(
                "invalid repo type '{other}' (expected model, dataset or space)"
            ))),
        }
    }
}

/// Canonical reference to a hub repository at a revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoRef {
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: String,
}

impl RepoRef {
    pub fn new(repo_id: impl Into<String>, repo_type: RepoType) -> Self {
        Self {
            repo_id: repo_id.into(),
            repo_type,
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.repo_type.url_prefix(), self.repo_id)
    }
}

/// Commit metadata returned by an upload call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    #[serde(default)]
    pub commit_oid: Option<String>,
    #[serde(default)]
    pub commit_url: Option<String>,
}

/// One entry of a repository tree listing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RepoEntry {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// The remote operations the transfer engine needs from the hub.
///
/// Implementations must be shareable across the bounded-concurrency batch
/// workers, hence `Send + Sync`.
pub trait HubRpc: Send + Sync {
    /// Commit a single file. The source is positioned at byte 0.
    fn upload_one(
        &self,
        repo: &RepoRef,
        file: &mut UploadSource,
        commit_title: &str,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError>;

    /// Commit several files in one commit. Each entry is opened only while
    /// its bytes are being sent.
    fn upload_many(
        &self,
        repo: &RepoRef,
        files: &[UploadEntry],
        commit_title: &str,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError>;

    /// Open a byte stream over one remote file.
    fn download_one(
        &self,
        repo: &RepoRef,
        path: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn Read>, RemoteError>;

    /// List entries at the repository root.
    fn list_files(&self, repo: &RepoRef, token: Option<&str>)
        -> Result<Vec<RepoEntry>, RemoteError>;

    /// Return the account name the token belongs to.
    fn whoami(&self, token: &str) -> Result<String, RemoteError>;
}

/// What went wrong on the transport, as precisely as the transport knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The hub answered with a non-success HTTP status.
    Status(u16),
    Timeout,
    /// Connection-level failure (DNS, TLS, reset, ...).
    Transport,
    /// Local I/O while producing or consuming a request body.
    Io(io::ErrorKind),
    /// The hub answered but the payload could not be decoded.
    Decode,
}

/// A failed remote call.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Status(code), message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    /// HTTP status of the failure, inferred from the message when the
    /// transport did not report one.
    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            RemoteErrorKind::Status(code) => Some(code),
            RemoteErrorKind::Transport | RemoteErrorKind::Decode => {
                status_from_message(&self.message)
            }
            RemoteErrorKind::Timeout | RemoteErrorKind::Io(_) => None,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Authentication, validation and not-found failures are terminal; so is a
    /// local file that vanished or became unreadable. Everything else
    /// (5xx, 429, timeouts, connection failures) is retried.
    pub fn is_retryable(&self) -> bool {
        if let RemoteErrorKind::Io(kind) = self.kind {
            return !matches!(
                kind,
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            );
        }
        !matches!(self.status_code(), Some(400 | 401 | 403 | 404 | 422))
    }
}

impl From<io::Error> for RemoteError {
    fn from(e: io::Error) -> Self {
        RemoteError::new(RemoteErrorKind::Io(e.kind()), e.to_string())
    }
}

/// Last-resort status inference for transports that only give us text.
fn status_from_message(message: &str) -> Option<u16> {
    let lower = message.to_ascii_lowercase();

    for code in [401u16, 403, 404, 429, 400, 422] {
        let needle = code.to_string();
        let found = lower.match_indices(&needle).any(|(idx, _)| {
            let before = lower[..idx].chars().next_back();
            let after = lower[idx + needle.len()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_digit())
                && !after.is_some_and(|c| c.is_ascii_digit())
        });
        if found {
            return Some(code);
        }
    }

    if lower.contains("authentication") || lower.contains("unauthorized") {
        Some(401)
    } else if lower.contains("forbidden") {
        Some(403)
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        Some(429)
    } else if lower.contains("not found") {
        Some(404)
    } else {
        None
    }
}

/// Where a failure happened, for building actionable messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorContext<'a> {
    pub repo_id: &'a str,
    pub path: Option<&'a str>,
}

/// Map a transport failure into the closed error taxonomy.
///
/// This is the only place that turns remote failures into [`HfxferError`].
pub fn classify(error: RemoteError, ctx: ErrorContext<'_>) -> HfxferError {
    let repo_id = ctx.repo_id.to_string();

    if let RemoteErrorKind::Io(kind) = error.kind {
        if matches!(
            kind,
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ) {
            return HfxferError::Permission {
                path: PathBuf::from(ctx.path.unwrap_or(ctx.repo_id)),
                message: error.message,
            };
        }
        return HfxferError::Network {
            repo_id,
            message: error.message,
        };
    }

    match error.status_code() {
        Some(401 | 403) => HfxferError::Authentication {
            repo_id,
            message: error.message,
        },
        Some(404) => HfxferError::FileNotFound {
            path: ctx
                .path
                .map(|p| format!("{}:{}", ctx.repo_id, p))
                .unwrap_or(repo_id),
            message: error.message,
        },
        Some(429) => HfxferError::RateLimit {
            repo_id,
            message: error.message,
        },
        _ => HfxferError::Network {
            repo_id,
            message: error.message,
        },
    }
}

/// Map a local filesystem failure into the taxonomy. Every kind lands in
/// [`HfxferError::Permission`]; the raw `Io` variant is for the command layer.
pub fn classify_io(error: io::Error, path: impl Into<PathBuf>) -> HfxferError {
    HfxferError::Permission {
        path: path.into(),
        message: error.to_string(),
    }
}

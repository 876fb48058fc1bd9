use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HfxferError;
use crate::hub::resolve::validate_repo_id;
use crate::hub::{
    classify, classify_io, parse_repo_input, ErrorContext, HubRpc, RepoRef, RepoType,
    TokenSource, DEFAULT_ENDPOINT,
};
use crate::pattern::ResolvedFile;

use super::batch::{BatchOptions, BatchUploader, MultiUploadReport};
use super::retry::{with_retry, RetryConfig};
use super::stream::{open_upload_source, write_response_to_file, StreamError};

/// Commit id reported when the hub's response does not include one.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Options for a single-file upload.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// `owner/name` or a hub URL.
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: Option<String>,
    pub file_path: PathBuf,
    /// Destination inside the repo; defaults to the file's basename.
    pub path_in_repo: Option<String>,
    pub token: Option<String>,
    pub message: Option<String>,
}

/// Options for a multi-file upload.
#[derive(Clone, Debug, Default)]
pub struct MultiUploadOptions {
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: Option<String>,
    pub files: Vec<ResolvedFile>,
    pub token: Option<String>,
    pub message: Option<String>,
}

/// Options for a single-file download.
#[derive(Clone, Debug, Default)]
pub struct DownloadOptions {
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: Option<String>,
    /// Path of the file inside the repo.
    pub file_path: String,
    pub token: Option<String>,
    /// Destination directory; defaults to the current directory.
    pub local_dir: Option<PathBuf>,
}

/// A completed single-file upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_url: String,
    /// Remote commit id, or [`UNKNOWN_COMMIT`].
    pub commit_sha: String,
    pub path_in_repo: String,
    pub size: u64,
}

/// A completed download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub local_path: PathBuf,
    /// Bytes actually written to disk.
    pub file_size: u64,
}

/// Uploads and downloads files against a hub, retrying transient failures.
pub struct TransferClient<H: HubRpc> {
    hub: H,
    tokens: Box<dyn TokenSource>,
    endpoint: String,
    retry: RetryConfig,
    batch: BatchOptions,
}

impl<H: HubRpc> TransferClient<H> {
    pub fn new(hub: H, tokens: impl TokenSource + 'static) -> Self {
        Self {
            hub,
            tokens: Box::new(tokens),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry: RetryConfig::default(),
            batch: BatchOptions::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    /// Base URL used for the `file_url` of uploads.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn hub(&self) -> &H {
        &self.hub
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Web URL of `path` in `repo`.
    pub fn file_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/{}{}/blob/{}/{}",
            self.endpoint,
            repo.repo_type.url_prefix(),
            repo.repo_id,
            repo.revision,
            path
        )
    }

    /// Upload one local file as its own commit.
    pub fn upload_file(&self, options: &UploadOptions) -> Result<UploadReceipt, HfxferError> {
        let repo = parse_repo_input(
            &options.repo_id,
            options.repo_type,
            options.revision.as_deref(),
            &self.endpoint,
        )?;
        let path = &options.file_path;
        if path.as_os_str().is_empty() {
            return Err(HfxferError::validation("file path must not be empty"));
        }

        let path_in_repo = match options.path_in_repo.as_deref() {
            Some(p) => validate_repo_path(p)?,
            None => basename(path)?,
        };
        let mut source = open_upload_source(path, path_in_repo.as_str())?;
        let size = source.size();
        let token = self.effective_token(options.token.as_deref());
        let title = options
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Upload {path_in_repo}"));

        tracing::debug!(repo = %repo, path = %path.display(), size, "uploading file");
        let info = with_retry(&self.retry, || {
            source.rewind()?;
            self.hub
                .upload_one(&repo, &mut source, &title, token.as_deref())
        })
        .map_err(|err| {
            classify(
                err,
                ErrorContext {
                    repo_id: &repo.repo_id,
                    path: Some(path_in_repo.as_str()),
                },
            )
        })?;

        let commit_sha = match info.commit_oid.filter(|oid| !oid.is_empty()) {
            Some(oid) => oid,
            None => {
                // Reported as success; a missing commit id may hide a hub-side problem.
                tracing::warn!(
                    repo = %repo,
                    path = %path_in_repo,
                    "hub response carried no commit id"
                );
                UNKNOWN_COMMIT.to_string()
            }
        };

        tracing::info!(repo = %repo, path = %path_in_repo, commit = %commit_sha, "uploaded file");
        Ok(UploadReceipt {
            file_url: self.file_url(&repo, &path_in_repo),
            commit_sha,
            path_in_repo,
            size,
        })
    }

    /// Upload many files in batches. Partial failures are reported in the
    /// returned report rather than as an error.
    pub fn upload_files(
        &self,
        options: &MultiUploadOptions,
    ) -> Result<MultiUploadReport, HfxferError> {
        let repo = parse_repo_input(
            &options.repo_id,
            options.repo_type,
            options.revision.as_deref(),
            &self.endpoint,
        )?;
        if options.files.is_empty() {
            return Err(HfxferError::validation("no files to upload"));
        }
        for file in &options.files {
            if file.path.as_os_str().is_empty() {
                return Err(HfxferError::validation("file path must not be empty"));
            }
            validate_repo_path(&file.relative_path)?;
        }

        let token = self.effective_token(options.token.as_deref());
        let uploader = BatchUploader {
            hub: &self.hub,
            repo: &repo,
            token: token.as_deref(),
            message: options.message.as_deref(),
            retry: &self.retry,
            options: &self.batch,
        };
        Ok(uploader.upload(&options.files))
    }

    /// Download one remote file into `local_dir/basename(file_path)`.
    pub fn download_file(
        &self,
        options: &DownloadOptions,
    ) -> Result<DownloadReceipt, HfxferError> {
        let repo = parse_repo_input(
            &options.repo_id,
            options.repo_type,
            options.revision.as_deref(),
            &self.endpoint,
        )?;
        let remote_path = validate_repo_path(&options.file_path)?;
        let file_name = basename(Path::new(&remote_path))?;

        let token = self.effective_token(options.token.as_deref());
        let ctx = ErrorContext {
            repo_id: &repo.repo_id,
            path: Some(remote_path.as_str()),
        };

        let stream = with_retry(&self.retry, || {
            self.hub.download_one(&repo, &remote_path, token.as_deref())
        })
        .map_err(|err| classify(err, ctx))?;

        // Created only once the hub has agreed to send the file.
        let local_dir = match &options.local_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| classify_io(e, "."))?,
        };
        fs::create_dir_all(&local_dir).map_err(|e| classify_io(e, &local_dir))?;
        let destination = local_dir.join(&file_name);

        let file_size = write_response_to_file(stream, &destination).map_err(|err| match err {
            StreamError::Read(e) => HfxferError::Network {
                repo_id: repo.repo_id.clone(),
                message: format!("download of '{remote_path}' interrupted: {e}"),
            },
            StreamError::Write(e) => classify_io(e, &destination),
        })?;

        tracing::info!(
            repo = %repo,
            path = %remote_path,
            bytes = file_size,
            dest = %destination.display(),
            "downloaded file"
        );
        Ok(DownloadReceipt {
            local_path: destination,
            file_size,
        })
    }

    /// Whether the repository exists and is accessible with the token.
    ///
    /// A malformed `repo_id` is `false` without any remote call. Every remote
    /// failure (missing, forbidden, network) also collapses to `false`; use
    /// [`check_repository`](Self::check_repository) to learn why.
    pub fn validate_repository(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        token: Option<&str>,
    ) -> bool {
        parse_repo_input(repo_id, repo_type, None, &self.endpoint)
            .and_then(|repo| self.check_repository(&repo, token))
            .is_ok()
    }

    /// Check the repository by listing its root. A listing that succeeds
    /// counts as existing, even if it is empty.
    pub fn check_repository(
        &self,
        repo: &RepoRef,
        token: Option<&str>,
    ) -> Result<(), HfxferError> {
        validate_repo_id(&repo.repo_id)?;
        let token = self.effective_token(token);
        let entries = with_retry(&self.retry, || self.hub.list_files(repo, token.as_deref()))
            .map_err(|err| {
                classify(
                    err,
                    ErrorContext {
                        repo_id: &repo.repo_id,
                        path: None,
                    },
                )
            })?;
        tracing::debug!(
            repo = %repo,
            first = ?entries.first().map(|e| &e.path),
            "repository reachable"
        );
        Ok(())
    }

    /// Account name behind `token`.
    pub fn whoami(&self, token: &str) -> Result<String, HfxferError> {
        with_retry(&self.retry, || self.hub.whoami(token)).map_err(|err| {
            classify(
                err,
                ErrorContext {
                    repo_id: "",
                    path: None,
                },
            )
        })
    }

    pub fn validate_token(&self, token: &str) -> bool {
        !token.trim().is_empty() && self.whoami(token).is_ok()
    }

    fn effective_token(&self, per_call: Option<&str>) -> Option<String> {
        per_call
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.tokens.token())
    }
}

fn basename(path: &Path) -> Result<String, HfxferError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            HfxferError::validation(format!("'{}' does not name a file", path.display()))
        })
}

/// Normalise a path inside a repo and reject traversal.
fn validate_repo_path(path: &str) -> Result<String, HfxferError> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(HfxferError::validation("repository file path must not be empty"));
    }
    if trimmed.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(HfxferError::validation(format!(
            "invalid repository file path '{path}'"
        )));
    }
    Ok(trimmed.to_string())
}

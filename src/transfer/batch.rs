//! Multi-file upload in API-sized batches.
//!
//! The hub accepts at most [`MAX_BATCH_SIZE`] files per commit. Files are
//! partitioned into consecutive batches, each committed separately. A failed
//! batch marks its files as failed and processing moves on.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::error::HfxferError;
use crate::hub::{classify, CommitInfo, ErrorContext, HubRpc, RemoteError, RepoRef};
use crate::pattern::ResolvedFile;

use super::retry::{with_retry, RetryConfig};
use super::stream::UploadEntry;

/// Hard ceiling on files per remote multi-file call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Configuration for batched uploads.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Files per batch; clamped to `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Batches in flight at once. 1 means strictly sequential.
    pub concurrency: usize,
    /// Pause between concurrency windows.
    pub window_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            concurrency: 1,
            window_delay: Duration::ZERO,
        }
    }
}

impl BatchOptions {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Outcome of a multi-file upload.
#[derive(Debug, Default)]
pub struct MultiUploadReport {
    pub files_uploaded: usize,
    pub total_files: usize,
    /// Commit of the last batch that succeeded.
    pub commit_sha: Option<String>,
    pub failed_files: Vec<PathBuf>,
    /// Classified error of the last batch that failed.
    pub last_error: Option<HfxferError>,
}

impl MultiUploadReport {
    /// At least one file made it to the hub.
    pub fn success(&self) -> bool {
        self.files_uploaded > 0
    }

    pub fn is_partial(&self) -> bool {
        self.success() && !self.failed_files.is_empty()
    }
}

/// Split `files` into consecutive batches of at most `batch_size` files.
pub fn partition(files: &[ResolvedFile], batch_size: usize) -> Vec<&[ResolvedFile]> {
    files.chunks(batch_size.clamp(1, MAX_BATCH_SIZE)).collect()
}

struct BatchOutcome {
    index: usize,
    uploaded: usize,
    failed: Vec<PathBuf>,
    result: Option<Result<CommitInfo, RemoteError>>,
}

/// Drives batched commits for one multi-file upload.
pub(crate) struct BatchUploader<'a, H: HubRpc + ?Sized> {
    pub hub: &'a H,
    pub repo: &'a RepoRef,
    pub token: Option<&'a str>,
    pub message: Option<&'a str>,
    pub retry: &'a RetryConfig,
    pub options: &'a BatchOptions,
}

impl<H: HubRpc + ?Sized> BatchUploader<'_, H> {
    pub fn upload(&self, files: &[ResolvedFile]) -> MultiUploadReport {
        let batches = partition(files, self.options.effective_batch_size());
        let total_batches = batches.len();
        let concurrency = self.options.effective_concurrency();

        let mut report = MultiUploadReport {
            total_files: files.len(),
            ..MultiUploadReport::default()
        };

        for (window_index, window) in batches.chunks(concurrency).enumerate() {
            if window_index > 0 && !self.options.window_delay.is_zero() {
                thread::sleep(self.options.window_delay);
            }

            let first = window_index * concurrency;
            let outcomes: Vec<BatchOutcome> = if window.len() == 1 {
                vec![self.run_batch(first, total_batches, window[0])]
            } else {
                thread::scope(|scope| {
                    let handles: Vec<_> = window
                        .iter()
                        .enumerate()
                        .map(|(offset, batch)| {
                            scope.spawn(move || {
                                self.run_batch(first + offset, total_batches, batch)
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| {
                            handle
                                .join()
                                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                        })
                        .collect()
                })
            };

            // The whole window is accounted before the next one starts.
            for outcome in outcomes {
                self.absorb(&mut report, outcome);
            }
        }

        tracing::info!(
            repo = %self.repo,
            uploaded = report.files_uploaded,
            failed = report.failed_files.len(),
            total = report.total_files,
            "multi-file upload finished"
        );
        report
    }

    fn absorb(&self, report: &mut MultiUploadReport, outcome: BatchOutcome) {
        report.files_uploaded += outcome.uploaded;
        report.failed_files.extend(outcome.failed);
        match outcome.result {
            Some(Ok(info)) => {
                if let Some(oid) = info.commit_oid.filter(|oid| !oid.is_empty()) {
                    report.commit_sha = Some(oid);
                }
            }
            Some(Err(err)) => {
                tracing::warn!(
                    repo = %self.repo,
                    batch = outcome.index + 1,
                    error = %err,
                    "batch failed after retries"
                );
                report.last_error = Some(classify(
                    err,
                    ErrorContext {
                        repo_id: &self.repo.repo_id,
                        path: None,
                    },
                ));
            }
            None => {}
        }
    }

    fn run_batch(&self, index: usize, total: usize, batch: &[ResolvedFile]) -> BatchOutcome {
        let mut entries = Vec::with_capacity(batch.len());
        let mut failed = Vec::new();

        for file in batch {
            let entry = UploadEntry::new(&file.path, file.relative_path.as_str());
            // Opened only to check readability; the commit reopens it.
            match entry.open() {
                Ok(_) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        error = %err,
                        "excluding unreadable file from batch"
                    );
                    failed.push(file.path.clone());
                }
            }
        }

        if entries.is_empty() {
            tracing::debug!(batch = index + 1, "no readable files, skipping remote call");
            return BatchOutcome {
                index,
                uploaded: 0,
                failed,
                result: None,
            };
        }

        let title = commit_title(self.message, entries.len(), index, total);
        tracing::debug!(batch = index + 1, of = total, files = entries.len(), "uploading batch");

        let result = with_retry(self.retry, || {
            self.hub.upload_many(self.repo, &entries, &title, self.token)
        });

        let uploaded = match &result {
            Ok(_) => entries.len(),
            Err(_) => {
                failed.extend(entries.into_iter().map(|entry| entry.path));
                0
            }
        };

        BatchOutcome {
            index,
            uploaded,
            failed,
            result: Some(result),
        }
    }
}

fn commit_title(message: Option<&str>, files: usize, index: usize, total: usize) -> String {
    let base = match message {
        Some(message) if !message.trim().is_empty() => message.trim().to_string(),
        _ => format!("Upload {files} files"),
    };
    if total > 1 {
        format!("{base} (batch {}/{total})", index + 1)
    } else {
        base
    }
}

//! The resilient transfer engine.
//!
//! - [`retry`] - bounded exponential backoff around remote calls
//! - [`stream`] - incremental upload sources and atomic download placement
//! - [`batch`] - API-sized batching for multi-file uploads
//! - [`client`] - the [`TransferClient`] façade tying them together

pub mod batch;
pub mod client;
pub mod retry;
pub mod stream;

pub use batch::{partition, BatchOptions, MultiUploadReport, MAX_BATCH_SIZE};
pub use client::{
    DownloadOptions, DownloadReceipt, MultiUploadOptions, TransferClient, UploadOptions,
    UploadReceipt, UNKNOWN_COMMIT,
};
pub use retry::{with_retry, RetryConfig, Retryable};
pub use stream::{
    open_upload_source, write_response_to_file, UploadEntry, UploadSource, DEFAULT_CHUNK_SIZE,
};

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use hfxfer::hub::{CommitInfo, RemoteError, RepoEntry, StaticToken};
use hfxfer::transfer::{BatchOptions, RetryConfig, UploadEntry, UploadSource};
use hfxfer::{HubRpc, RepoRef, ResolvedFile, TransferClient};

/// One recorded remote call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    UploadOne {
        path_in_repo: String,
        title: String,
        content: Vec<u8>,
        token: Option<String>,
    },
    UploadMany {
        paths: Vec<String>,
        title: String,
    },
    Download {
        path: String,
    },
    List {
        repo_id: String,
    },
    Whoami,
}

/// In-memory hub with scripted failures.
///
/// Transient failures are consumed one per call, in order, before any call
/// succeeds. Title failures apply to every upload whose commit title contains
/// the needle, so they stay deterministic under concurrent batches.
#[derive(Default)]
pub struct MockHub {
    calls: Mutex<Vec<Call>>,
    transient: Mutex<VecDeque<RemoteError>>,
    title_failures: Vec<(String, RemoteError)>,
    list_error: Option<RemoteError>,
    commit_oid: Option<String>,
    files: HashMap<String, Vec<u8>>,
    break_download_after: Option<usize>,
    account: String,
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            commit_oid: Some("abc123".to_string()),
            account: "tester".to_string(),
            ..Self::default()
        }
    }

    pub fn with_commit_oid(mut self, oid: Option<&str>) -> Self {
        self.commit_oid = oid.map(str::to_string);
        self
    }

    pub fn fail_next(self, errors: impl IntoIterator<Item = RemoteError>) -> Self {
        self.transient
            .lock()
            .expect("transient lock")
            .extend(errors);
        self
    }

    pub fn fail_titles_containing(mut self, needle: &str, error: RemoteError) -> Self {
        self.title_failures.push((needle.to_string(), error));
        self
    }

    pub fn with_list_error(mut self, error: RemoteError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }

    /// Downloads yield this many bytes, then fail with a connection reset.
    pub fn break_downloads_after(mut self, bytes: usize) -> Self {
        self.break_download_after = Some(bytes);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn upload_many_calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadMany { paths, title } => Some((paths, title)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn take_transient(&self) -> Option<RemoteError> {
        self.transient.lock().expect("transient lock").pop_front()
    }

    fn commit(&self, title: &str) -> Result<CommitInfo, RemoteError> {
        if let Some(err) = self.take_transient() {
            return Err(err);
        }
        if let Some((_, err)) = self
            .title_failures
            .iter()
            .find(|(needle, _)| title.contains(needle.as_str()))
        {
            return Err(err.clone());
        }
        Ok(CommitInfo {
            commit_oid: self.commit_oid.clone(),
            commit_url: None,
        })
    }
}

impl HubRpc for MockHub {
    fn upload_one(
        &self,
        _repo: &RepoRef,
        file: &mut UploadSource,
        commit_title: &str,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError> {
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        self.record(Call::UploadOne {
            path_in_repo: file.path_in_repo().to_string(),
            title: commit_title.to_string(),
            content,
            token: token.map(str::to_string),
        });
        self.commit(commit_title)
    }

    fn upload_many(
        &self,
        _repo: &RepoRef,
        files: &[UploadEntry],
        commit_title: &str,
        _token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError> {
        self.record(Call::UploadMany {
            paths: files.iter().map(|f| f.path_in_repo.clone()).collect(),
            title: commit_title.to_string(),
        });
        // Read every file in turn, one open at a time, as a commit body does.
        for entry in files {
            let mut content = Vec::new();
            entry.open()?.read_to_end(&mut content)?;
        }
        self.commit(commit_title)
    }

    fn download_one(
        &self,
        _repo: &RepoRef,
        path: &str,
        _token: Option<&str>,
    ) -> Result<Box<dyn Read>, RemoteError> {
        self.record(Call::Download {
            path: path.to_string(),
        });
        if let Some(err) = self.take_transient() {
            return Err(err);
        }
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::status(404, format!("{path} not found")))?;
        Ok(Box::new(BreakingReader {
            data,
            pos: 0,
            break_at: self.break_download_after,
        }))
    }

    fn list_files(
        &self,
        repo: &RepoRef,
        _token: Option<&str>,
    ) -> Result<Vec<RepoEntry>, RemoteError> {
        self.record(Call::List {
            repo_id: repo.repo_id.clone(),
        });
        if let Some(err) = self.take_transient() {
            return Err(err);
        }
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self
            .files
            .iter()
            .map(|(path, data)| RepoEntry {
                path: path.clone(),
                kind: "file".to_string(),
                size: Some(data.len() as u64),
            })
            .collect())
    }

    fn whoami(&self, token: &str) -> Result<String, RemoteError> {
        self.record(Call::Whoami);
        if token == "hf_valid" {
            Ok(self.account.clone())
        } else {
            Err(RemoteError::status(401, "Invalid credentials in Authorization header"))
        }
    }
}

struct BreakingReader {
    data: Vec<u8>,
    pos: usize,
    break_at: Option<usize>,
}

impl Read for BreakingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.break_at.unwrap_or(self.data.len()).min(self.data.len());
        if self.pos >= limit {
            if self.break_at.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            }
            return Ok(0);
        }
        let n = buf.len().min(limit - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Retry settings that keep tests fast.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(
        max_retries,
        Duration::from_millis(1),
        Duration::from_millis(4),
    )
    .expect("retry config")
    .with_jitter(Duration::ZERO)
}

pub fn client(hub: MockHub) -> TransferClient<MockHub> {
    TransferClient::new(hub, StaticToken(Some("hf_default".to_string())))
        .with_retry_config(fast_retry(3))
}

pub fn client_with_batches(hub: MockHub, batch: BatchOptions) -> TransferClient<MockHub> {
    client(hub).with_batch_options(batch)
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, content).expect("write file");
}

/// `ResolvedFile` entries for paths that need not exist on disk.
pub fn phantom_files(dir: &Path, count: usize) -> Vec<ResolvedFile> {
    (0..count)
        .map(|i| {
            let name = format!("f{i:05}.bin");
            ResolvedFile {
                path: dir.join(&name),
                size: 1,
                file_name: name.clone(),
                relative_path: name,
            }
        })
        .collect()
}

/// Create `count` one-byte files under `dir` and return them resolved.
pub fn real_files(dir: &Path, count: usize) -> Vec<ResolvedFile> {
    let files = phantom_files(dir, count);
    for file in &files {
        write_file(&file.path, b"x");
    }
    files
}

pub fn paths(files: &[ResolvedFile]) -> Vec<PathBuf> {
    files.iter().map(|f| f.path.clone()).collect()
}

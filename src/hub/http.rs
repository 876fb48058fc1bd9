//! ureq-backed implementation of [`HubRpc`].

use std::io::{self, Read};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use ureq::http::Response;
use ureq::{Body, RequestBuilder, SendBody};
use url::Url;

use crate::error::HfxferError;
use crate::transfer::stream::{UploadEntry, UploadSource};

use super::{CommitInfo, HubRpc, RemoteError, RemoteErrorKind, RepoEntry, RepoRef};

const ERROR_DETAIL_LIMIT: usize = 500;
const USER_AGENT: &str = concat!("hfxfer/", env!("CARGO_PKG_VERSION"));

/// Talks to a Hugging Face compatible hub over HTTPS.
///
/// Small API calls run under a whole-call deadline. Commits and downloads
/// move arbitrarily large bodies, so their agent only bounds connecting and
/// waiting for response headers; ureq's body timeouts cover the entire body.
#[derive(Clone, Debug)]
pub struct HttpHub {
    api: ureq::Agent,
    transfer: ureq::Agent,
    endpoint: Url,
}

impl HttpHub {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, HfxferError> {
        let endpoint = Url::parse(endpoint).map_err(|source| {
            HfxferError::validation(format!("invalid hub endpoint '{endpoint}': {source}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(HfxferError::validation(format!(
                "hub endpoint '{endpoint}' cannot be used as a base URL"
            )));
        }

        let api = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let transfer = ureq::Agent::config_builder()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .http_status_as_error(false)
            .build();

        Ok(Self {
            api: api.into(),
            transfer: transfer.into(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    fn url<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn api_url(&self, repo: &RepoRef, action: &str) -> Url {
        let (owner, name) = split_repo_id(&repo.repo_id);
        self.url([
            "api",
            repo.repo_type.api_kind(),
            owner,
            name,
            action,
            repo.revision.as_str(),
        ])
    }

    fn commit(
        &self,
        repo: &RepoRef,
        mut body: CommitBody<'_>,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError> {
        let url = self.api_url(repo, "commit");
        tracing::debug!(%url, files = body.files.len(), "posting commit");

        let request = authorize(self.transfer.post(url.as_str()), token)
            .header("Content-Type", "application/x-ndjson");
        let mut response = request
            .send(SendBody::from_reader(&mut body))
            .map_err(map_transport_error)?;
        check_status(&mut response)?;

        match response.body_mut().read_json::<CommitInfo>() {
            Ok(info) => Ok(info),
            Err(err) => {
                tracing::warn!(error = %err, "could not decode commit response");
                Ok(CommitInfo::default())
            }
        }
    }
}

impl HubRpc for HttpHub {
    fn upload_one(
        &self,
        repo: &RepoRef,
        file: &mut UploadSource,
        commit_title: &str,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError> {
        self.commit(repo, CommitBody::single(commit_title, file), token)
    }

    fn upload_many(
        &self,
        repo: &RepoRef,
        files: &[UploadEntry],
        commit_title: &str,
        token: Option<&str>,
    ) -> Result<CommitInfo, RemoteError> {
        self.commit(repo, CommitBody::queued(commit_title, files), token)
    }

    fn download_one(
        &self,
        repo: &RepoRef,
        path: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn Read>, RemoteError> {
        let (owner, name) = split_repo_id(&repo.repo_id);
        let prefix = repo.repo_type.url_prefix().trim_end_matches('/');
        let url = self.url(
            [prefix, owner, name, "resolve", repo.revision.as_str()]
                .into_iter()
                .filter(|seg| !seg.is_empty())
                .chain(path.split('/')),
        );
        tracing::debug!(%url, "downloading");

        let mut response = authorize(self.transfer.get(url.as_str()), token)
            .call()
            .map_err(map_transport_error)?;
        check_status(&mut response)?;
        Ok(Box::new(response.into_body().into_reader()))
    }

    fn list_files(
        &self,
        repo: &RepoRef,
        token: Option<&str>,
    ) -> Result<Vec<RepoEntry>, RemoteError> {
        let url = self.api_url(repo, "tree");
        let mut response = authorize(self.api.get(url.as_str()), token)
            .call()
            .map_err(map_transport_error)?;
        check_status(&mut response)?;
        response
            .body_mut()
            .read_json::<Vec<RepoEntry>>()
            .map_err(|e| RemoteError::new(RemoteErrorKind::Decode, e.to_string()))
    }

    fn whoami(&self, token: &str) -> Result<String, RemoteError> {
        #[derive(Deserialize)]
        struct WhoAmI {
            name: String,
        }

        let url = self.url(["api", "whoami-v2"]);
        let mut response = authorize(self.api.get(url.as_str()), Some(token))
            .call()
            .map_err(map_transport_error)?;
        check_status(&mut response)?;
        response
            .body_mut()
            .read_json::<WhoAmI>()
            .map(|who| who.name)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Decode, e.to_string()))
    }
}

fn split_repo_id(repo_id: &str) -> (&str, &str) {
    repo_id.split_once('/').unwrap_or(("", repo_id))
}

fn authorize<B>(request: RequestBuilder<B>, token: Option<&str>) -> RequestBuilder<B> {
    let request = request.header("User-Agent", USER_AGENT);
    match token {
        Some(token) => request.header("Authorization", &format!("Bearer {token}")),
        None => request,
    }
}

fn map_transport_error(err: ureq::Error) -> RemoteError {
    let message = err.to_string();
    match err {
        ureq::Error::StatusCode(code) => RemoteError::status(code, format!("HTTP {code}")),
        ureq::Error::Timeout(_) => RemoteError::new(RemoteErrorKind::Timeout, message),
        ureq::Error::Io(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            io_err.into()
        }
        _ => RemoteError::transport(message),
    }
}

fn check_status(response: &mut Response<Body>) -> Result<(), RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let code = status.as_u16();
    let detail = response
        .body_mut()
        .read_to_string()
        .ok()
        .map(|text| error_detail(&text))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(RemoteError::status(code, format!("HTTP {code}: {detail}")))
}

/// Prefer the hub's `{"error": "..."}` message; fall back to the raw text.
fn error_detail(text: &str) -> String {
    let detail = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| text.trim().to_string());
    detail.chars().take(ERROR_DETAIL_LIMIT).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyState {
    Header,
    FileStart(usize),
    FileContent(usize),
    FileEnd(usize),
    Done,
}

/// Files of one commit body.
enum BodyFiles<'a> {
    /// A single source the caller already opened.
    Single(&'a mut UploadSource),
    /// Entries opened one at a time; `current` is the one being sent.
    Queued {
        entries: &'a [UploadEntry],
        current: Option<UploadSource>,
    },
}

impl BodyFiles<'_> {
    fn len(&self) -> usize {
        match self {
            BodyFiles::Single(_) => 1,
            BodyFiles::Queued { entries, .. } => entries.len(),
        }
    }

    /// Make file `i` readable and return its path in the repo.
    fn start(&mut self, i: usize) -> io::Result<String> {
        match self {
            BodyFiles::Single(source) => Ok(source.path_in_repo().to_string()),
            BodyFiles::Queued { entries, current } => {
                let source = entries[i].open()?;
                let path = source.path_in_repo().to_string();
                *current = Some(source);
                Ok(path)
            }
        }
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self {
            BodyFiles::Single(source) => source.next_chunk(),
            BodyFiles::Queued { current, .. } => match current {
                Some(source) => source.next_chunk(),
                None => Ok(None),
            },
        }
    }

    /// Close the file just sent.
    fn finish(&mut self) {
        if let BodyFiles::Queued { current, .. } = self {
            *current = None;
        }
    }
}

/// Streams an NDJSON commit payload: one header line, then one line per file
/// with its content base64-encoded chunk by chunk.
struct CommitBody<'a> {
    summary: String,
    files: BodyFiles<'a>,
    state: BodyState,
    pending: Vec<u8>,
    pos: usize,
    // Raw bytes not yet encoded; base64 works in 3-byte groups.
    carry: Vec<u8>,
}

impl<'a> CommitBody<'a> {
    fn single(summary: &str, file: &'a mut UploadSource) -> Self {
        Self::new(summary, BodyFiles::Single(file))
    }

    fn queued(summary: &str, entries: &'a [UploadEntry]) -> Self {
        Self::new(
            summary,
            BodyFiles::Queued {
                entries,
                current: None,
            },
        )
    }

    fn new(summary: &str, files: BodyFiles<'a>) -> Self {
        Self {
            summary: summary.to_string(),
            files,
            state: BodyState::Header,
            pending: Vec::new(),
            pos: 0,
            carry: Vec::new(),
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;

        while self.pending.is_empty() {
            match self.state {
                BodyState::Header => {
                    let line = json!({
                        "key": "header",
                        "value": {"summary": self.summary, "description": ""}
                    });
                    self.pending = format!("{line}\n").into_bytes();
                    self.state = BodyState::FileStart(0);
                }
                BodyState::FileStart(i) if i >= self.files.len() => {
                    self.state = BodyState::Done;
                }
                BodyState::FileStart(i) => {
                    let path = Value::String(self.files.start(i)?);
                    self.pending = format!(
                        "{{\"key\":\"file\",\"value\":{{\"path\":{path},\
                         \"encoding\":\"base64\",\"content\":\""
                    )
                    .into_bytes();
                    self.state = BodyState::FileContent(i);
                }
                BodyState::FileContent(i) => match self.files.next_chunk()? {
                    Some(chunk) => {
                        self.carry.extend_from_slice(&chunk);
                        let usable = self.carry.len() / 3 * 3;
                        self.pending = STANDARD.encode(&self.carry[..usable]).into_bytes();
                        self.carry.drain(..usable);
                    }
                    None => {
                        self.pending = STANDARD.encode(&self.carry).into_bytes();
                        self.carry.clear();
                        self.files.finish();
                        self.state = BodyState::FileEnd(i);
                    }
                },
                BodyState::FileEnd(i) => {
                    self.pending = b"\"}}\n".to_vec();
                    self.state = BodyState::FileStart(i + 1);
                }
                BodyState::Done => return Ok(()),
            }
        }
        Ok(())
    }
}

impl Read for CommitBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.pending.len() {
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

//! Incremental file I/O for uploads and downloads.
//!
//! Upload sources are pull-based: callers read fixed-size chunks (or use the
//! [`Read`] impl) and never hold more than one chunk in memory. Downloads are
//! written to a temporary file next to the destination and renamed into place
//! only once the stream has been fully consumed.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::HfxferError;

/// Default upload chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A local file opened for streaming upload.
#[derive(Debug)]
pub struct UploadSource {
    file: File,
    path: PathBuf,
    path_in_repo: String,
    size: u64,
    offset: u64,
    chunk_size: usize,
}

impl UploadSource {
    /// Open `path` for upload as `path_in_repo`. The size comes from the
    /// file's metadata; nothing is read yet.
    pub fn open(path: &Path, path_in_repo: impl Into<String>) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            path_in_repo: path_in_repo.into(),
            size: meta.len(),
            offset: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_in_repo(&self) -> &str {
        &self.path_in_repo
    }

    /// Size hint taken when the source was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Seek back to byte 0 so the file can be sent again.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        Ok(())
    }

    /// Read the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::with_capacity(self.chunk_size.min(self.size as usize).max(1));
        let n = (&mut self.file)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += n as u64;
        Ok(Some(buf))
    }
}

/// A file queued for a multi-file commit.
///
/// Holds no descriptor: the file is opened when the commit body reaches it
/// and closed once its bytes are sent, so a batch of any size keeps at most
/// one file open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadEntry {
    pub path: PathBuf,
    pub path_in_repo: String,
}

impl UploadEntry {
    pub fn new(path: impl Into<PathBuf>, path_in_repo: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            path_in_repo: path_in_repo.into(),
        }
    }

    /// Open the file for streaming, positioned at byte 0.
    pub fn open(&self) -> io::Result<UploadSource> {
        UploadSource::open(&self.path, self.path_in_repo.as_str())
    }
}

impl Iterator for UploadSource {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl Read for UploadSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Open a local file for upload, mapping failures into the error taxonomy.
pub fn open_upload_source(
    path: &Path,
    path_in_repo: impl Into<String>,
) -> Result<UploadSource, HfxferError> {
    UploadSource::open(path, path_in_repo).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => HfxferError::FileNotFound {
            path: path.display().to_string(),
            message: err.to_string(),
        },
        io::ErrorKind::InvalidInput => HfxferError::validation(err.to_string()),
        _ => crate::hub::classify_io(err, path),
    })
}

/// Which side of a download copy failed.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reading from the remote stream.
    #[error("stream interrupted: {0}")]
    Read(#[source] io::Error),
    /// Creating, writing or placing the local file.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Copy `stream` to `destination` incrementally and return the bytes written.
///
/// The bytes land in a temporary file in the destination directory which is
/// renamed over `destination` only after the whole stream was written. On any
/// error the temporary file is removed and `destination` is left as it was.
pub fn write_response_to_file<R: Read>(
    mut stream: R,
    destination: &Path,
) -> Result<u64, StreamError> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::Builder::new()
        .prefix(".hfxfer-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(StreamError::Write)?;

    let mut written = 0u64;
    {
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, temp.as_file_mut());
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Read(e)),
            };
            writer.write_all(&buf[..n]).map_err(StreamError::Write)?;
            written += n as u64;
        }
        writer.flush().map_err(StreamError::Write)?;
    }
    temp.as_file().sync_all().map_err(StreamError::Write)?;
    temp.persist(destination)
        .map_err(|e| StreamError::Write(e.error))?;

    Ok(written)
}

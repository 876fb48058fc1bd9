//! Glob pattern resolution.
//!
//! Turns a glob pattern or a literal path into a concrete, size-annotated list
//! of regular files. Symbolic links are never followed during traversal and
//! dot-files are skipped unless the pattern names them literally.

use std::fs;
use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use walkdir::{DirEntry, WalkDir};

use crate::error::HfxferError;

/// Default ceiling on the number of files one pattern may resolve to.
pub const DEFAULT_MAX_FILES: usize = 10_000;

/// One matched file. `size` is taken at resolution time and not re-checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    pub size: u64,
    pub file_name: String,
    /// Path relative to the resolution directory, `/`-separated. Equal to
    /// `file_name` when the file lives outside that directory.
    pub relative_path: String,
}

/// Aggregate result of a resolve call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternResolution {
    pub total_files: usize,
    pub total_size: u64,
    pub files: Vec<ResolvedFile>,
}

impl PatternResolution {
    fn from_files(files: Vec<ResolvedFile>) -> Self {
        Self {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            files,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

const DENIED_PATTERNS: &[&str] = &[
    "/", "/*", "/**", "/**/*", "~", "~/*", "~/**", "~/**/*", "c:", "c:/*", "c:/**", "c:/**/*",
];

const SYSTEM_PREFIXES: &[&str] = &[
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib64",
    "/proc",
    "/root",
    "/sbin",
    "/sys",
    "/usr",
    "/var",
    "c:/windows",
    "c:/program files",
];

/// Reject empty patterns and patterns rooted at obviously dangerous places
/// (filesystem root, system directories, the whole home directory).
///
/// This is a heuristic guard against accidental mass uploads, not a security
/// boundary: anything it lets through is still subject to the `max_files`
/// ceiling in [`resolve`], and a determined caller can always name sensitive
/// files some other way.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return false;
    }

    let normalized = normalize_separators(trimmed).to_ascii_lowercase();
    let normalized = if normalized.len() > 1 {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    };

    if DENIED_PATTERNS.contains(&normalized.as_str()) {
        return false;
    }

    let under =
        |prefix: &str| normalized == prefix || normalized.starts_with(&format!("{prefix}/"));
    if SYSTEM_PREFIXES.iter().any(|prefix| under(prefix)) {
        return false;
    }

    let home = std::env::var("HOME")
        .ok()
        .map(|h| normalize_separators(&h).trim_end_matches('/').to_ascii_lowercase())
        .filter(|h| !h.is_empty());
    for home in home.iter().map(String::as_str).chain(["$home", "${home}"]) {
        if [
            home.to_string(),
            format!("{home}/*"),
            format!("{home}/**"),
            format!("{home}/**/*"),
        ]
        .contains(&normalized)
        {
            return false;
        }
    }

    true
}

/// Whether `pattern` contains glob metacharacters.
pub fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Resolve `pattern` against `cwd` into the files it matches.
///
/// Zero matches is not an error. More than `max_files` matches fails with
/// [`HfxferError::PatternTooBroad`] before any file is stat'ed. Files that
/// disappear or become unreadable between matching and stat are skipped with
/// a warning.
pub fn resolve(
    pattern: &str,
    cwd: &Path,
    max_files: usize,
) -> Result<PatternResolution, HfxferError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(HfxferError::validation("pattern must not be empty"));
    }

    let (base, rest) = split_pattern(trimmed, cwd);

    let matched = if rest.is_empty() {
        literal_match(&base)
    } else {
        walk_matches(trimmed, &base, &rest, max_files)?
    };

    let mut files = Vec::with_capacity(matched.len());
    for path in matched {
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => files.push(resolved_file(path, meta.len(), cwd)),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping file that could not be stat'ed"
                );
            }
        }
    }

    tracing::debug!(pattern, files = files.len(), "resolved pattern");
    Ok(PatternResolution::from_files(files))
}

fn literal_match(path: &Path) -> Vec<PathBuf> {
    // A literal path is taken as named, symlink or not.
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => vec![path.to_path_buf()],
        _ => Vec::new(),
    }
}

fn walk_matches(
    original: &str,
    base: &Path,
    rest: &[String],
    max_files: usize,
) -> Result<Vec<PathBuf>, HfxferError> {
    let resolution_failed = |message: String| HfxferError::ResolutionFailed {
        pattern: original.to_string(),
        message,
    };

    // Only the part below `base` is a glob; the base itself is matched as
    // a path, so metacharacters in directory names above it are harmless.
    let matcher = GlobBuilder::new(&rest.join("/"))
        .literal_separator(true)
        .build()
        .map_err(|e| HfxferError::validation(format!("invalid pattern '{original}': {e}")))?
        .compile_matcher();

    let mut walker = WalkDir::new(base)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();
    if !rest.iter().any(|component| component.contains("**")) {
        walker = walker.max_depth(rest.len());
    }

    let mut matches = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err)
                if err.depth() == 0
                    && err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::NotFound) =>
            {
                return Ok(Vec::new());
            }
            Err(err) => return Err(resolution_failed(err.to_string())),
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        if !matcher.is_match(relative) {
            continue;
        }

        matches.push(entry.into_path());
        if matches.len() > max_files {
            return Err(HfxferError::PatternTooBroad {
                pattern: original.to_string(),
                max_files,
            });
        }
    }

    Ok(matches)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Split `pattern` into a literal base directory, anchored at `cwd` unless
/// the pattern is absolute, and the components from the first one holding
/// glob metacharacters onwards. The component list is empty for a literal
/// path, in which case the base is the file itself.
fn split_pattern(pattern: &str, cwd: &Path) -> (PathBuf, Vec<String>) {
    let pattern = normalize_separators(pattern);
    let rooted = pattern.starts_with('/');
    let absolute = rooted || Path::new(&pattern).is_absolute();

    let components: Vec<String> = pattern
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect();
    let first_glob = components
        .iter()
        .position(|c| has_glob_meta(c))
        .unwrap_or(components.len());

    let literal = components[..first_glob].join("/");
    let base = if rooted {
        PathBuf::from(format!("/{literal}"))
    } else if absolute {
        PathBuf::from(literal)
    } else if literal.is_empty() {
        cwd.to_path_buf()
    } else {
        cwd.join(literal)
    };
    (base, components[first_glob..].to_vec())
}

fn normalize_separators(path: &str) -> String {
    if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}

fn resolved_file(path: PathBuf, size: u64, cwd: &Path) -> ResolvedFile {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let relative_path = path
        .strip_prefix(cwd)
        .ok()
        .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| file_name.clone());

    ResolvedFile {
        path,
        size,
        file_name,
        relative_path,
    }
}

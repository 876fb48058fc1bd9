use crate::error::HfxferError;

use super::{RepoRef, RepoType};

/// Parse a user-supplied repository reference (repo ID or hub URL).
///
/// A URL must point at the host of `endpoint`. It determines the repo type
/// from its path (`/datasets/...`, `/spaces/...`, otherwise model) and may
/// carry a `/tree/<revision>` suffix. A bare ID uses `repo_type`.
pub fn parse_repo_input(
    input: &str,
    repo_type: RepoType,
    revision: Option<&str>,
    endpoint: &str,
) -> Result<RepoRef, HfxferError> {
    let (repo_id, parsed_type, revision_from_url) =
        if input.starts_with("http://") || input.starts_with("https://") {
            parse_repo_url(input, endpoint)?
        } else {
            (validate_repo_id(input)?, repo_type, None)
        };

    let merged_revision = match (revision, revision_from_url) {
        (Some(arg), Some(url_rev)) if arg != url_rev => {
            return Err(HfxferError::validation(format!(
                "conflicting revisions: --revision='{}' but URL encodes revision='{}'",
                arg, url_rev
            )));
        }
        (Some(arg), _) => Some(arg.to_string()),
        (None, Some(url_rev)) => Some(url_rev),
        (None, None) => None,
    };

    let repo = RepoRef::new(repo_id, parsed_type);
    Ok(match merged_revision {
        Some(rev) => repo.with_revision(rev),
        None => repo,
    })
}

fn parse_repo_url(
    input: &str,
    endpoint: &str,
) -> Result<(String, RepoType, Option<String>), HfxferError> {
    let url = url::Url::parse(input)
        .map_err(|source| HfxferError::validation(format!("invalid URL '{input}': {source}")))?;

    let Some(host) = url.host_str().map(normalize_host) else {
        return Err(HfxferError::validation(format!(
            "URL '{input}' is missing a host"
        )));
    };
    let expected = url::Url::parse(endpoint)
        .ok()
        .and_then(|endpoint| endpoint.host_str().map(normalize_host))
        .ok_or_else(|| HfxferError::validation(format!("invalid hub endpoint '{endpoint}'")))?;
    if host != expected {
        return Err(HfxferError::validation(format!(
            "expected host '{expected}', found '{host}' in '{input}'"
        )));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|iter| iter.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let (repo_type, rest) = match segments.first() {
        Some(&"datasets") => (RepoType::Dataset, &segments[1..]),
        Some(&"spaces") => (RepoType::Space, &segments[1..]),
        _ => (RepoType::Model, &segments[..]),
    };

    if rest.len() < 2 {
        return Err(HfxferError::validation(format!(
            "expected repository URL like \
             https://{expected}/[datasets/|spaces/]<owner>/<name>, got '{input}'"
        )));
    }

    let repo_id = validate_repo_id(&format!("{}/{}", rest[0], rest[1]))?;
    let revision = if rest.get(2) == Some(&"tree") {
        rest.get(3).map(|value| (*value).to_string())
    } else {
        None
    };

    Ok((repo_id, repo_type, revision))
}

fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(bare) => bare.to_string(),
        None => host,
    }
}

/// Check that `repo_id` has the `owner/name` shape.
pub fn validate_repo_id(repo_id: &str) -> Result<String, HfxferError> {
    let trimmed = repo_id.trim();
    let mut parts = trimmed.split('/');
    let owner = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();
    let extra = parts.next();

    if owner.is_empty() || name.is_empty() || extra.is_some() {
        return Err(HfxferError::validation(format!(
            "expected repo id in '<owner>/<name>' form, got '{repo_id}'"
        )));
    }

    let valid_chars = |s: &str| {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid_chars(owner) || !valid_chars(name) || name.starts_with('.') {
        return Err(HfxferError::validation(format!(
            "repo id '{repo_id}' contains characters outside [A-Za-z0-9._-]"
        )));
    }

    Ok(trimmed.to_string())
}

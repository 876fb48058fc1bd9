//! Bearer token sourcing.

use std::fs;
use std::path::PathBuf;

use hf_hub::Cache;

use crate::error::HfxferError;

/// Supplies the client-level default token.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Token from `HF_TOKEN`, falling back to the token file of the local
/// Hugging Face cache (`$HF_HOME/token`).
#[derive(Clone, Debug)]
pub struct HfTokenStore {
    cache: Cache,
    read_env: bool,
}

impl HfTokenStore {
    pub fn from_env() -> Self {
        Self {
            cache: Cache::from_env(),
            read_env: true,
        }
    }

    /// Store rooted at an explicit cache directory; ignores `HF_TOKEN`.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: Cache::new(dir.into()),
            read_env: false,
        }
    }

    pub fn token_path(&self) -> PathBuf {
        self.cache.token_path()
    }

    /// Persist `token` so later invocations pick it up.
    pub fn set_token(&self, token: &str) -> Result<(), HfxferError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(HfxferError::validation("token must not be empty"));
        }

        let path = self.token_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| super::classify_io(e, parent))?;
        }
        fs::write(&path, token).map_err(|e| super::classify_io(e, &path))?;
        tracing::debug!(path = %path.display(), "stored token");
        Ok(())
    }
}

impl TokenSource for HfTokenStore {
    fn token(&self) -> Option<String> {
        let from_env = self
            .read_env
            .then(|| std::env::var("HF_TOKEN").ok())
            .flatten()
            .filter(|t| !t.trim().is_empty());
        from_env.or_else(|| {
            self.cache
                .token()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
    }
}

/// A fixed token, or none.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

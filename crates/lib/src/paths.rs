//! On-disk cache layout.

use std::path::PathBuf;

use thiserror::Error;

use crate::consts::{APP_NAME, ENV_CACHE_DIR};

#[derive(Debug, Error)]
pub enum PathError {
  #[error("could not determine a cache directory; set {ENV_CACHE_DIR}")]
  NoCacheDir,
}

/// Cache directories used across a run. All of them live under a single
/// root so a stale cache can be cleared with one `rm -rf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
  pub root: PathBuf,
  /// Verified source archives, one file per upstream URL.
  pub downloads: PathBuf,
  /// Scratch space for unpacking and compiling, one subtree per target.
  pub work: PathBuf,
  /// Cargo registry and git caches mounted into builder containers.
  pub cargo: PathBuf,
}

impl CachePaths {
  pub fn current() -> Result<Self, PathError> {
    let root = cache_root()?;
    Ok(Self {
      downloads: root.join("downloads"),
      work: root.join("work"),
      cargo: root.join("cargo"),
      root,
    })
  }
}

/// Root of the on-disk cache. `FORGERON_CACHE_DIR` overrides the platform
/// default (`~/.cache/forgeron` on Linux).
pub fn cache_root() -> Result<PathBuf, PathError> {
  if let Ok(path) = std::env::var(ENV_CACHE_DIR) {
    if !path.is_empty() {
      return Ok(PathBuf::from(path));
    }
  }

  dirs::cache_dir().map(|dir| dir.join(APP_NAME)).ok_or(PathError::NoCacheDir)
}

//! Source archive downloads with SHA256 verification.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to fetch {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Download `url` into `downloads_dir`, verifying against `expected_sha256`
/// when a pin is present, and return the path to the archive.
///
/// A cached file that matches its pin is reused without touching the
/// network. An unpinned download has its digest recorded in a `.sha256`
/// sidecar next to the archive, and later fetches verify against that
/// recording: a tampered cache is re-downloaded, an artifact that changed
/// under the same URL is rejected. An unpinned file that predates the
/// sidecar is trusted as found.
pub async fn fetch_source(
  url: &str,
  expected_sha256: Option<&str>,
  downloads_dir: &Path,
) -> Result<PathBuf, FetchError> {
  fs::create_dir_all(downloads_dir).await?;

  let filename = url_to_filename(url);
  let dest_path = downloads_dir.join(&filename);
  let sidecar = recorded_digest_path(&dest_path);

  // A pin supersedes any recorded digest.
  let recorded = match expected_sha256 {
    Some(_) => None,
    None => read_recorded_digest(&sidecar).await,
  };
  let check = expected_sha256.or(recorded.as_deref());

  if dest_path.exists() {
    debug!(path = ?dest_path, "checking cached archive");
    match check {
      Some(expected) => {
        if let Ok(actual) = hash_file(&dest_path).await {
          if actual == expected {
            info!(path = ?dest_path, "using cached archive");
            return Ok(dest_path);
          }
          debug!(expected = %expected, actual = %actual, "cached archive hash mismatch, re-downloading");
        }
      }
      None => {
        info!(path = ?dest_path, "using cached archive (no pin to verify)");
        return Ok(dest_path);
      }
    }
  }

  info!(url = %url, "fetching source archive");

  let response = reqwest::get(url).await.map_err(|e| FetchError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if !response.status().is_success() {
    return Err(FetchError::FetchFailed {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let bytes = response.bytes().await.map_err(|e| FetchError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  let actual = sha256_hex(&bytes);

  match check {
    Some(expected) if actual != expected => {
      return Err(FetchError::HashMismatch {
        url: url.to_string(),
        expected: expected.to_string(),
        actual,
      });
    }
    Some(_) => {}
    None => {
      warn!(url = %url, sha256 = %actual, "archive has no pinned digest, recording what was downloaded");
    }
  }

  let mut file = fs::File::create(&dest_path).await?;
  file.write_all(&bytes).await?;
  file.flush().await?;

  if expected_sha256.is_none() && recorded.is_none() {
    fs::write(&sidecar, format!("{actual}\n")).await?;
  }

  info!(path = ?dest_path, size = bytes.len(), "download complete");

  Ok(dest_path)
}

/// Sidecar holding the first-fetch digest of an unpinned archive.
fn recorded_digest_path(archive: &Path) -> PathBuf {
  let mut os = archive.as_os_str().to_owned();
  os.push(".sha256");
  PathBuf::from(os)
}

/// Read a recorded digest, ignoring sidecars that don't hold one.
async fn read_recorded_digest(path: &Path) -> Option<String> {
  let contents = fs::read_to_string(path).await.ok()?;
  let digest = contents.trim();
  if digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
    Some(digest.to_ascii_lowercase())
  } else {
    None
  }
}

fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
  Ok(sha256_hex(&fs::read(path).await?))
}

/// Derive the cached filename for a URL.
///
/// Release tarballs keep their basename (`zlib-1.3.1.tar.gz`); a URL with no
/// usable basename falls back to a digest of the URL itself.
fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("source_{}", &sha256_hex(url.as_bytes())[..16])
}

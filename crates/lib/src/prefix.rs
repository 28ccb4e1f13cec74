//! Installation prefix management.
//!
//! Dependencies never install straight into the prefix. Each install goes to
//! a staging directory via `DESTDIR` and is promoted afterwards, so a failed
//! install cannot leave half-written files in the real prefix. A completion
//! marker is written only after every dependency is promoted and verified;
//! a prefix without the marker is treated as partial and rebuilt.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::PREFIX_MARKER;

#[derive(Debug, Error)]
pub enum PrefixError {
  #[error("failed to create prefix {}: {source}", path.display())]
  CreatePrefix {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to promote {} into {}: {source}", from.display(), to.display())]
  Promote {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("staged install left no files under {}", .0.display())]
  EmptyStage(PathBuf),

  #[error("shared library {} found in a static-only prefix", .0.display())]
  SharedLibraryFound(PathBuf),

  #[error("static archive {name} missing under {}", searched.display())]
  MissingArtifact { name: String, searched: PathBuf },

  #[error("failed to write completion marker: {message}")]
  WriteMarker { message: String },

  #[error("failed to read completion marker: {message}")]
  ReadMarker { message: String },

  #[error("failed to parse completion marker: {message}")]
  ParseMarker { message: String },

  #[error(transparent)]
  Io(#[from] io::Error),
}

/// Marker file content structure.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefixMarker {
  /// Marker format version.
  pub version: u32,
  /// Always "complete" for a finished prefix.
  pub status: String,
  /// Target architecture the prefix was built for.
  pub arch: String,
  /// Installed libraries, name to version.
  pub installed: BTreeMap<String, String>,
}

/// Create the prefix directory tree if it does not exist yet.
///
/// The default prefix root lives under `/opt`, so this is the first place a
/// run fails when it lacks the permissions the pipeline needs.
pub fn ensure_prefix(prefix: &Path) -> Result<(), PrefixError> {
  std::fs::create_dir_all(prefix).map_err(|source| PrefixError::CreatePrefix {
    path: prefix.to_path_buf(),
    source,
  })
}

/// Remove a prefix entirely, marker included. Used for forced rebuilds.
pub fn reset_prefix(prefix: &Path) -> Result<(), PrefixError> {
  if prefix.exists() {
    std::fs::remove_dir_all(prefix)?;
  }
  Ok(())
}

/// Location inside a `DESTDIR` staging root where the prefix subtree lands.
///
/// `make install DESTDIR=/stage` reproduces the absolute prefix under
/// `/stage`, so the staged files sit at `/stage/<prefix-without-root>`.
pub fn staged_subtree(stage_root: &Path, prefix: &Path) -> PathBuf {
  let relative = prefix.strip_prefix("/").unwrap_or(prefix);
  stage_root.join(relative)
}

/// Move a finished staged install into the real prefix.
///
/// Directories are merged with what earlier dependencies installed, files
/// are moved with a copy fallback when the stage and the prefix live on
/// different filesystems. The staging root is deleted afterwards.
pub fn promote(staged: &Path, prefix: &Path) -> Result<(), PrefixError> {
  if !staged.is_dir() {
    return Err(PrefixError::EmptyStage(staged.to_path_buf()));
  }

  let mut moved = 0usize;
  for entry in WalkDir::new(staged).min_depth(1) {
    let entry = entry.map_err(|e| PrefixError::Promote {
      from: staged.to_path_buf(),
      to: prefix.to_path_buf(),
      source: io::Error::other(e),
    })?;

    let relative = entry
      .path()
      .strip_prefix(staged)
      .map_err(|e| PrefixError::Promote {
        from: entry.path().to_path_buf(),
        to: prefix.to_path_buf(),
        source: io::Error::other(e),
      })?;
    let dest = prefix.join(relative);

    let result = if entry.file_type().is_dir() {
      std::fs::create_dir_all(&dest)
    } else {
      move_entry(entry.path(), &dest)
    };
    result.map_err(|source| PrefixError::Promote {
      from: entry.path().to_path_buf(),
      to: dest.clone(),
      source,
    })?;

    if !entry.file_type().is_dir() {
      moved += 1;
    }
  }

  if moved == 0 {
    return Err(PrefixError::EmptyStage(staged.to_path_buf()));
  }

  std::fs::remove_dir_all(staged)?;
  debug!(files = moved, prefix = %prefix.display(), "promoted staged install");
  Ok(())
}

fn move_entry(from: &Path, to: &Path) -> io::Result<()> {
  if let Some(parent) = to.parent() {
    std::fs::create_dir_all(parent)?;
  }

  #[cfg(unix)]
  if from.is_symlink() {
    let target = std::fs::read_link(from)?;
    if to.exists() || to.is_symlink() {
      std::fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(target, to)?;
    return std::fs::remove_file(from);
  }

  match std::fs::rename(from, to) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
      std::fs::copy(from, to)?;
      std::fs::remove_file(from)
    }
    Err(e) => Err(e),
  }
}

/// Verify the prefix holds every expected static archive and no shared
/// libraries. Archives are searched recursively under `lib` because OpenCV
/// nests its bundled 3rdparty archives.
pub fn verify_static_artifacts(prefix: &Path, expected: &[&str]) -> Result<(), PrefixError> {
  let lib_dir = prefix.join("lib");
  let mut found: Vec<String> = Vec::new();

  for entry in WalkDir::new(&lib_dir).into_iter().filter_map(Result::ok) {
    let name = entry.file_name().to_string_lossy().into_owned();
    if !entry.file_type().is_file() {
      continue;
    }
    if name.contains(".so") || name.ends_with(".dylib") {
      return Err(PrefixError::SharedLibraryFound(entry.path().to_path_buf()));
    }
    if name.ends_with(".a") {
      found.push(name);
    }
  }

  for name in expected {
    if !found.iter().any(|f| f == name) {
      return Err(PrefixError::MissingArtifact {
        name: name.to_string(),
        searched: lib_dir.clone(),
      });
    }
  }

  Ok(())
}

/// Write the completion marker. Called only after every dependency has been
/// promoted and verified.
pub async fn write_marker(
  prefix: &Path,
  arch: &str,
  installed: BTreeMap<String, String>,
) -> Result<(), PrefixError> {
  let marker = PrefixMarker {
    version: 1,
    status: "complete".to_string(),
    arch: arch.to_string(),
    installed,
  };
  let content =
    serde_json::to_string(&marker).map_err(|e| PrefixError::WriteMarker { message: e.to_string() })?;
  tokio::fs::write(prefix.join(PREFIX_MARKER), format!("{content}\n"))
    .await
    .map_err(|e| PrefixError::WriteMarker { message: e.to_string() })
}

/// Read the completion marker.
///
/// Returns `None` if the marker doesn't exist.
pub fn read_marker(prefix: &Path) -> Result<Option<PrefixMarker>, PrefixError> {
  let marker_path = prefix.join(PREFIX_MARKER);

  if !marker_path.exists() {
    return Ok(None);
  }

  let content = std::fs::read_to_string(&marker_path)
    .map_err(|e| PrefixError::ReadMarker { message: e.to_string() })?;
  let marker: PrefixMarker =
    serde_json::from_str(&content).map_err(|e| PrefixError::ParseMarker { message: e.to_string() })?;
  Ok(Some(marker))
}

/// Check whether a prefix finished a full pipeline run.
pub fn is_complete(prefix: &Path) -> bool {
  match read_marker(prefix) {
    Ok(marker) => marker.is_some(),
    Err(e) => {
      warn!(prefix = %prefix.display(), error = %e, "unreadable completion marker, treating prefix as partial");
      false
    }
  }
}

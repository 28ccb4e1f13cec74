//! File-based cache locking for mutual exclusion.
//!
//! Two concurrent runs sharing a cache would race on downloads, work trees
//! and prefix promotion, so mutating commands take an exclusive lock on the
//! cache root and read-only commands take a shared one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{PathError, cache_root};

const LOCK_FILENAME: &str = ".lock";
const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub cache: PathBuf,
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error(
    "cache is locked by another process: {command} (PID {pid}, started {started_at})\n\
     if you're sure no forgeron process is running, remove the lock file:\n  {}",
    lock_path.display()
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "cache is locked (could not read lock metadata)\n\
     if you're sure no forgeron process is running, remove the lock file:\n  {}",
    lock_path.display()
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error(transparent)]
  Path(#[from] PathError),

  #[error("failed to create cache directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Held lock on the cache root. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
  _file: File,
  lock_path: PathBuf,
}

impl CacheLock {
  pub fn acquire(mode: LockMode, command: &str) -> Result<Self, CacheLockError> {
    let cache = cache_root()?;
    let lock_path = cache.join(LOCK_FILENAME);
    std::fs::create_dir_all(&cache).map_err(CacheLockError::CreateDir)?;

    let file = open_lock_file(&lock_path)?;
    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(CacheLockError::LockFailed(err));
    }

    // Shared holders leave the previous holder's metadata in place; only an
    // exclusive holder may rewrite the file it now owns.
    if mode == LockMode::Exclusive {
      Self::write_metadata(&file, command, &cache)?;
    }

    Ok(CacheLock { _file: file, lock_path })
  }

  /// Reads the lock metadata from the held file handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self._file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(file: &File, command: &str, cache: &Path) -> Result<(), CacheLockError> {
    let metadata = LockMetadata {
      version: METADATA_VERSION,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      cache: cache.to_path_buf(),
    };

    let body = serde_json::to_vec_pretty(&metadata)
      .map_err(|e| CacheLockError::WriteMetadata(io::Error::other(e)))?;
    file.set_len(0).map_err(CacheLockError::WriteMetadata)?;
    let mut handle = file;
    handle.write_all(&body).map_err(CacheLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> CacheLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started_at = chrono::DateTime::from_timestamp(metadata.started_at_unix as i64, 0)
          .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
          .unwrap_or_else(|| format!("unix timestamp {}", metadata.started_at_unix));

        return CacheLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    CacheLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CacheLockError> {
  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(lock_path)
    .map_err(CacheLockError::OpenFile)
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let op = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file.as_fd(), op).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn try_lock(_file: &File, _mode: LockMode) -> io::Result<()> {
  Err(io::Error::new(io::ErrorKind::Unsupported, "cache locking requires a Unix host"))
}

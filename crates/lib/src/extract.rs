//! Source archive extraction.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("unsupported archive format: {0}")]
  UnsupportedArchive(String),

  #[error("archive entry {entry:?} escapes the extraction directory")]
  PathEscape { entry: PathBuf },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Unpack an archive into `dest`, stripping the wrapper directory upstream
/// tarballs carry (e.g. `zlib-1.3.1/`), so `dest` itself becomes the source
/// root. Supports `.tar.gz`/`.tgz` and plain `.tar`.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
  let name = archive_path.to_string_lossy();

  fs::create_dir_all(dest)?;

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(archive_path)?;
    unpack_entries(Archive::new(GzDecoder::new(BufReader::new(file))), dest)?;
  } else if name.ends_with(".tar") {
    let file = File::open(archive_path)?;
    unpack_entries(Archive::new(BufReader::new(file)), dest)?;
  } else {
    return Err(ExtractError::UnsupportedArchive(name.into_owned()));
  }

  info!(dest = %dest.display(), "unpacked source archive");
  Ok(())
}

fn unpack_entries<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<(), ExtractError> {
  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?;

    // Strip the first component (the release's wrapper directory).
    let stripped: PathBuf = path.components().skip(1).collect();

    if stripped.as_os_str().is_empty() {
      continue;
    }

    if stripped.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir)) {
      return Err(ExtractError::PathEscape { entry: path.into_owned() });
    }

    let dest_path = dest.join(&stripped);

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }

    entry.unpack(&dest_path)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::TempDir;

  fn archive_with_entries(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in entries {
      let mut header = tar::Header::new_gnu();
      // Write the name bytes directly: `set_path` (used by `append_data`)
      // refuses the `..` components the escape test needs.
      header.as_old_mut().name[..path.len()].copy_from_slice(path.as_bytes());
      header.set_size(contents.len() as u64);
      header.set_mode(0o644);
      header.set_cksum();
      builder.append(&header, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
  }

  #[test]
  fn unpack_strips_wrapper_directory() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("pkg-1.0.tar.gz");
    std::fs::write(
      &archive,
      archive_with_entries(&[
        ("pkg-1.0/configure", "#!/bin/sh\n"),
        ("pkg-1.0/src/lib.c", "int x;\n"),
      ]),
    )
    .unwrap();

    let dest = tmp.path().join("src");
    unpack_archive(&archive, &dest).unwrap();

    assert!(dest.join("configure").exists());
    assert!(dest.join("src/lib.c").exists());
    assert!(!dest.join("pkg-1.0").exists());
  }

  #[test]
  fn unpack_rejects_unknown_extension() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("pkg.rar");
    std::fs::write(&archive, "not really").unwrap();

    let err = unpack_archive(&archive, &tmp.path().join("out")).unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedArchive(_)));
  }

  #[test]
  fn unpack_rejects_entries_escaping_destination() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("evil.tar.gz");
    std::fs::write(&archive, archive_with_entries(&[("pkg/../../escape.txt", "boom")])).unwrap();

    let dest = tmp.path().join("out");
    let err = unpack_archive(&archive, &dest).unwrap_err();

    assert!(matches!(err, ExtractError::PathEscape { .. }));
    assert!(!tmp.path().join("escape.txt").exists());
  }
}

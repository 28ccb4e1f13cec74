//! Post-install fixups for libraries whose installs need correcting before
//! anything links against them.
//!
//! Fixups run on the staged install, before promotion, so a prefix never
//! holds an unfixed intermediate state.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FixupError {
  #[error("pkg-config file {} not found in staged install", .0.display())]
  MissingPcFile(PathBuf),

  #[error("pkg-config file {} has no Libs: line", .0.display())]
  MalformedPcFile(PathBuf),

  #[error("bundled archive directory {} not found in staged install", .0.display())]
  MissingArchiveDir(PathBuf),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Append `-lstdc++` to rlottie's pkg-config Libs: line.
///
/// rlottie is C++ built as a static archive, so consumers must link the C++
/// runtime themselves; its upstream .pc file doesn't say so. Idempotent:
/// returns whether the file was changed.
pub fn patch_rlottie_pc(root: &Path) -> Result<bool, FixupError> {
  let pc_path = root.join("lib/pkgconfig/rlottie.pc");
  if !pc_path.exists() {
    return Err(FixupError::MissingPcFile(pc_path));
  }

  let contents = std::fs::read_to_string(&pc_path)?;
  let mut changed = false;
  let mut seen_libs = false;

  let patched: Vec<String> = contents
    .lines()
    .map(|line| {
      if line.starts_with("Libs:") {
        seen_libs = true;
        if line.split_whitespace().any(|tok| tok == "-lstdc++") {
          line.to_string()
        } else {
          changed = true;
          format!("{line} -lstdc++")
        }
      } else {
        line.to_string()
      }
    })
    .collect();

  if !seen_libs {
    return Err(FixupError::MalformedPcFile(pc_path));
  }

  if changed {
    std::fs::write(&pc_path, format!("{}\n", patched.join("\n")))?;
    info!(path = %pc_path.display(), "appended -lstdc++ to rlottie pkg-config");
  } else {
    debug!(path = %pc_path.display(), "rlottie pkg-config already links libstdc++");
  }

  Ok(changed)
}

/// Rename OpenCV's bundled 3rdparty archives from `liblib*.a` to `lib*.a`.
///
/// OpenCV names its bundled targets `libwebp`, `libpng` and so on, which
/// yields archives like `liblibwebp.a`. The linker resolves `-lwebp` to
/// `libwebp.a`, so one `lib` is stripped. The build always bundles its
/// codecs, so a staged install without the 3rdparty directory is rejected
/// rather than promoted without them. Idempotent: a second pass finds
/// nothing left to rename. Returns the renames performed.
pub fn rename_opencv_archives(root: &Path) -> Result<Vec<(String, String)>, FixupError> {
  let third_party = root.join("lib/opencv4/3rdparty");
  if !third_party.is_dir() {
    return Err(FixupError::MissingArchiveDir(third_party));
  }

  let mut renamed = Vec::new();
  for entry in std::fs::read_dir(&third_party)? {
    let entry = entry?;
    let name = entry.file_name().to_string_lossy().into_owned();

    if let Some(rest) = name.strip_prefix("liblib") {
      if !name.ends_with(".a") {
        continue;
      }
      let fixed = format!("lib{rest}");
      std::fs::rename(entry.path(), third_party.join(&fixed))?;
      info!(from = %name, to = %fixed, "renamed bundled archive");
      renamed.push((name, fixed));
    }
  }

  renamed.sort_unstable();
  Ok(renamed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_pc(root: &Path, contents: &str) -> PathBuf {
    let pc_dir = root.join("lib/pkgconfig");
    std::fs::create_dir_all(&pc_dir).unwrap();
    let pc_path = pc_dir.join("rlottie.pc");
    std::fs::write(&pc_path, contents).unwrap();
    pc_path
  }

  #[test]
  fn patch_appends_stdcxx_once() {
    let tmp = TempDir::new().unwrap();
    let pc_path = write_pc(
      tmp.path(),
      "prefix=/opt/forgeron/x86_64-linux-musl\nLibs: -L${libdir} -lrlottie\nCflags: -I${includedir}\n",
    );

    assert!(patch_rlottie_pc(tmp.path()).unwrap());
    let contents = std::fs::read_to_string(&pc_path).unwrap();
    assert!(contents.contains("Libs: -L${libdir} -lrlottie -lstdc++\n"));

    // Second run must not duplicate the flag.
    assert!(!patch_rlottie_pc(tmp.path()).unwrap());
    let contents = std::fs::read_to_string(&pc_path).unwrap();
    assert_eq!(contents.matches("-lstdc++").count(), 1);
  }

  #[test]
  fn patch_preserves_other_lines() {
    let tmp = TempDir::new().unwrap();
    let pc_path = write_pc(tmp.path(), "Name: rlottie\nLibs: -lrlottie\nCflags: -I/x\n");

    patch_rlottie_pc(tmp.path()).unwrap();

    let contents = std::fs::read_to_string(&pc_path).unwrap();
    assert!(contents.contains("Name: rlottie\n"));
    assert!(contents.contains("Cflags: -I/x\n"));
  }

  #[test]
  fn patch_requires_the_pc_file() {
    let tmp = TempDir::new().unwrap();
    let err = patch_rlottie_pc(tmp.path()).unwrap_err();
    assert!(matches!(err, FixupError::MissingPcFile(_)));
  }

  #[test]
  fn patch_rejects_pc_without_libs_line() {
    let tmp = TempDir::new().unwrap();
    write_pc(tmp.path(), "Name: rlottie\nCflags: -I/x\n");

    let err = patch_rlottie_pc(tmp.path()).unwrap_err();
    assert!(matches!(err, FixupError::MalformedPcFile(_)));
  }

  #[test]
  fn rename_strips_doubled_lib_prefix() {
    let tmp = TempDir::new().unwrap();
    let third_party = tmp.path().join("lib/opencv4/3rdparty");
    std::fs::create_dir_all(&third_party).unwrap();
    std::fs::write(third_party.join("liblibwebp.a"), "").unwrap();
    std::fs::write(third_party.join("liblibpng.a"), "").unwrap();
    std::fs::write(third_party.join("libittnotify.a"), "").unwrap();

    let renamed = rename_opencv_archives(tmp.path()).unwrap();

    assert_eq!(
      renamed,
      vec![
        ("liblibpng.a".to_string(), "libpng.a".to_string()),
        ("liblibwebp.a".to_string(), "libwebp.a".to_string()),
      ]
    );
    assert!(third_party.join("libwebp.a").exists());
    assert!(third_party.join("libpng.a").exists());
    assert!(third_party.join("libittnotify.a").exists());
    assert!(!third_party.join("liblibwebp.a").exists());

    // Idempotent.
    assert!(rename_opencv_archives(tmp.path()).unwrap().is_empty());
  }

  #[test]
  fn rename_requires_the_bundled_directory() {
    let tmp = TempDir::new().unwrap();
    // Module archives alone don't make a usable install.
    let lib_dir = tmp.path().join("lib");
    std::fs::create_dir_all(&lib_dir).unwrap();
    for module in ["core", "imgproc", "imgcodecs", "objdetect"] {
      std::fs::write(lib_dir.join(format!("libopencv_{module}.a")), "").unwrap();
    }

    let err = rename_opencv_archives(tmp.path()).unwrap_err();
    assert!(matches!(err, FixupError::MissingArchiveDir(_)));
  }
}

//! Multi-platform manifest merge and the digest artifact protocol.
//!
//! Per-architecture builds and the final merge usually run on different
//! machines, so digests travel as files: an empty file named by the bare
//! 64-hex image digest, under `<digests>/<linux-amd64|linux-arm64>/`. The
//! merge reads one digest per supported platform and refuses to produce a
//! manifest list from anything less.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::arch::Arch;
use crate::process::{self, ProcessError};

#[derive(Debug, Error)]
pub enum MergeError {
  #[error("not a sha256 digest: {0:?}")]
  InvalidDigest(String),

  #[error("no digest directory for platform {platform} under {}", searched.display())]
  MissingPlatform { platform: String, searched: PathBuf },

  #[error("no digest file for platform {platform} in {}", dir.display())]
  MissingDigest { platform: String, dir: PathBuf },

  #[error("{count} digest files for platform {platform} in {}, expected exactly one", dir.display())]
  AmbiguousDigest {
    platform: String,
    dir: PathBuf,
    count: usize,
  },

  #[error("malformed digest file name {name:?} for platform {platform}")]
  MalformedDigest { platform: String, name: String },

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("could not parse manifest list: {message}")]
  ManifestParse { message: String },

  #[error("merged manifest list is missing platform {0}")]
  PlatformAbsent(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// One platform's image digest, ready to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchDigest {
  pub arch: Arch,
  /// Bare digest, 64 lowercase hex characters without the `sha256:` prefix.
  pub digest: String,
}

/// Outcome of a merge run.
#[derive(Debug, Clone)]
pub struct MergeReport {
  /// The dated manifest list tag, `<repo>:<YYYYMMDD>`.
  pub tag: String,
  /// The rolling tag, when requested.
  pub latest_tag: Option<String>,
  /// Platforms the pushed manifest list references, sorted.
  pub platforms: Vec<String>,
}

fn is_hex_digest(name: &str) -> bool {
  name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Record `digest` for `arch` under `digests_dir`, replacing any digest a
/// previous build left there. Accepts the digest with or without its
/// `sha256:` prefix and returns the path of the created file.
pub fn write_digest_artifact(digests_dir: &Path, arch: Arch, digest: &str) -> Result<PathBuf, MergeError> {
  let bare = digest.strip_prefix("sha256:").unwrap_or(digest);
  if !is_hex_digest(bare) {
    return Err(MergeError::InvalidDigest(digest.to_string()));
  }

  let dir = digests_dir.join(arch.artifact_dir());
  std::fs::create_dir_all(&dir)?;

  for entry in std::fs::read_dir(&dir)? {
    let entry = entry?;
    let name = entry.file_name().to_string_lossy().into_owned();
    if is_hex_digest(&name) && name != bare {
      debug!(stale = %name, "removing stale digest artifact");
      std::fs::remove_file(entry.path())?;
    }
  }

  let path = dir.join(bare);
  std::fs::File::create(&path)?;
  info!(platform = %arch.artifact_dir(), digest = %bare, "recorded image digest");
  Ok(path)
}

/// Read exactly one digest per supported platform from `digests_dir`.
///
/// Anything unexpected is fatal: a platform directory that is missing or
/// empty, more than one digest, or a file whose name is not a bare sha256
/// digest. A merge must never silently ship a partial manifest list.
pub fn read_digest_artifacts(digests_dir: &Path) -> Result<Vec<ArchDigest>, MergeError> {
  let mut digests = Vec::new();

  for arch in Arch::ALL {
    let platform = arch.artifact_dir().to_string();
    let dir = digests_dir.join(arch.artifact_dir());

    if !dir.is_dir() {
      return Err(MergeError::MissingPlatform {
        platform,
        searched: digests_dir.to_path_buf(),
      });
    }

    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
      let entry = entry?;
      names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort_unstable();

    if let Some(bad) = names.iter().find(|n| !is_hex_digest(n)) {
      return Err(MergeError::MalformedDigest {
        platform,
        name: bad.clone(),
      });
    }

    match names.len() {
      0 => return Err(MergeError::MissingDigest { platform, dir }),
      1 => digests.push(ArchDigest {
        arch,
        digest: names.remove(0),
      }),
      count => return Err(MergeError::AmbiguousDigest { platform, dir, count }),
    }
  }

  Ok(digests)
}

fn create_args(repo: &str, date: &str, latest: bool, digests: &[ArchDigest]) -> Vec<String> {
  let mut args = vec![
    "buildx".to_string(),
    "imagetools".to_string(),
    "create".to_string(),
    "-t".to_string(),
    format!("{repo}:{date}"),
  ];
  if latest {
    args.push("-t".to_string());
    args.push(format!("{repo}:latest"));
  }
  for entry in digests {
    args.push(format!("{repo}@sha256:{}", entry.digest));
  }
  args
}

/// Check that a raw manifest list document references every expected
/// platform. Returns the platforms found, sorted.
fn verify_manifest_list(raw: &str, expected: &[&str]) -> Result<Vec<String>, MergeError> {
  let value: serde_json::Value =
    serde_json::from_str(raw).map_err(|e| MergeError::ManifestParse { message: e.to_string() })?;

  let manifests = value
    .get("manifests")
    .and_then(|m| m.as_array())
    .ok_or_else(|| MergeError::ManifestParse {
      message: "document has no manifests array".to_string(),
    })?;

  let mut platforms: Vec<String> = manifests
    .iter()
    .filter_map(|m| {
      let platform = m.get("platform")?;
      let os = platform.get("os")?.as_str()?;
      let arch = platform.get("architecture")?.as_str()?;
      Some(format!("{os}/{arch}"))
    })
    .collect();
  platforms.sort_unstable();
  platforms.dedup();

  for want in expected {
    if !platforms.iter().any(|p| p == want) {
      return Err(MergeError::PlatformAbsent(want.to_string()));
    }
  }

  Ok(platforms)
}

/// Create and push the multi-platform manifest list `<repo>:<date>` from
/// per-architecture digests, then verify the pushed list references every
/// supported platform.
pub async fn merge_manifests(
  repo: &str,
  date: &str,
  latest: bool,
  digests: &[ArchDigest],
) -> Result<MergeReport, MergeError> {
  let tag = format!("{repo}:{date}");

  info!(tag = %tag, count = digests.len(), "creating manifest list");
  process::run_streaming("docker", create_args(repo, date, latest, digests)).await?;

  let raw =
    process::run_capture("docker", ["buildx", "imagetools", "inspect", "--raw", tag.as_str()]).await?;
  let expected: Vec<&str> = Arch::ALL.iter().map(|a| a.docker_platform()).collect();
  let platforms = verify_manifest_list(&raw, &expected)?;

  info!(tag = %tag, platforms = ?platforms, "manifest list pushed");
  Ok(MergeReport {
    tag,
    latest_tag: latest.then(|| format!("{repo}:latest")),
    platforms,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const DIGEST_A: &str = "6e2fc072711a4a87e1a8d943a70e4bda90c77e983c7ed41f746ab0582754ff55";
  const DIGEST_B: &str = "a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

  #[test]
  fn artifact_round_trip_covers_both_platforms() {
    let tmp = TempDir::new().unwrap();

    let path = write_digest_artifact(tmp.path(), Arch::X86_64, &format!("sha256:{DIGEST_A}")).unwrap();
    assert_eq!(path, tmp.path().join("linux-amd64").join(DIGEST_A));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

    write_digest_artifact(tmp.path(), Arch::Aarch64, DIGEST_B).unwrap();

    let digests = read_digest_artifacts(tmp.path()).unwrap();
    assert_eq!(
      digests,
      vec![
        ArchDigest {
          arch: Arch::X86_64,
          digest: DIGEST_A.to_string()
        },
        ArchDigest {
          arch: Arch::Aarch64,
          digest: DIGEST_B.to_string()
        },
      ]
    );
  }

  #[test]
  fn write_replaces_a_stale_digest() {
    let tmp = TempDir::new().unwrap();

    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_A).unwrap();
    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_B).unwrap();

    let dir = tmp.path().join("linux-amd64");
    let names: Vec<String> = std::fs::read_dir(&dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec![DIGEST_B.to_string()]);
  }

  #[test]
  fn write_rejects_non_digests() {
    let tmp = TempDir::new().unwrap();

    let upper = DIGEST_A.to_uppercase();
    for bad in ["deadbeef", "", "sha256:tooshort", upper.as_str()] {
      let err = write_digest_artifact(tmp.path(), Arch::X86_64, bad).unwrap_err();
      assert!(matches!(err, MergeError::InvalidDigest(_)), "accepted {bad:?}");
    }
  }

  #[test]
  fn read_requires_every_platform_directory() {
    let tmp = TempDir::new().unwrap();
    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_A).unwrap();

    let err = read_digest_artifacts(tmp.path()).unwrap_err();
    match err {
      MergeError::MissingPlatform { platform, .. } => assert_eq!(platform, "linux-arm64"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn read_rejects_an_empty_platform_directory() {
    let tmp = TempDir::new().unwrap();
    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_A).unwrap();
    std::fs::create_dir_all(tmp.path().join("linux-arm64")).unwrap();

    let err = read_digest_artifacts(tmp.path()).unwrap_err();
    assert!(matches!(err, MergeError::MissingDigest { .. }));
  }

  #[test]
  fn read_rejects_ambiguous_digests() {
    let tmp = TempDir::new().unwrap();
    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_A).unwrap();
    write_digest_artifact(tmp.path(), Arch::Aarch64, DIGEST_A).unwrap();
    // A second digest snuck in without going through the writer.
    std::fs::File::create(tmp.path().join("linux-amd64").join(DIGEST_B)).unwrap();

    let err = read_digest_artifacts(tmp.path()).unwrap_err();
    match err {
      MergeError::AmbiguousDigest { platform, count, .. } => {
        assert_eq!(platform, "linux-amd64");
        assert_eq!(count, 2);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn read_rejects_files_that_are_not_digests() {
    let tmp = TempDir::new().unwrap();
    write_digest_artifact(tmp.path(), Arch::X86_64, DIGEST_A).unwrap();
    write_digest_artifact(tmp.path(), Arch::Aarch64, DIGEST_B).unwrap();
    std::fs::write(tmp.path().join("linux-amd64").join("notes.txt"), "hi").unwrap();

    let err = read_digest_artifacts(tmp.path()).unwrap_err();
    match err {
      MergeError::MalformedDigest { name, .. } => assert_eq!(name, "notes.txt"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn create_args_reference_digests_not_tags() {
    let digests = vec![
      ArchDigest {
        arch: Arch::X86_64,
        digest: DIGEST_A.to_string(),
      },
      ArchDigest {
        arch: Arch::Aarch64,
        digest: DIGEST_B.to_string(),
      },
    ];

    let args = create_args("forgeron-builder", "20260824", false, &digests);
    assert_eq!(
      args,
      vec![
        "buildx".to_string(),
        "imagetools".to_string(),
        "create".to_string(),
        "-t".to_string(),
        "forgeron-builder:20260824".to_string(),
        format!("forgeron-builder@sha256:{DIGEST_A}"),
        format!("forgeron-builder@sha256:{DIGEST_B}"),
      ]
    );

    let with_latest = create_args("forgeron-builder", "20260824", true, &digests);
    assert!(with_latest.contains(&"forgeron-builder:latest".to_string()));
  }

  #[test]
  fn verify_accepts_a_complete_manifest_list() {
    let raw = format!(
      r#"{{"manifests":[
        {{"digest":"sha256:{DIGEST_A}","platform":{{"architecture":"amd64","os":"linux"}}}},
        {{"digest":"sha256:{DIGEST_B}","platform":{{"architecture":"arm64","os":"linux"}}}}
      ]}}"#
    );

    let platforms = verify_manifest_list(&raw, &["linux/amd64", "linux/arm64"]).unwrap();
    assert_eq!(platforms, vec!["linux/amd64", "linux/arm64"]);
  }

  #[test]
  fn verify_rejects_a_partial_manifest_list() {
    let raw = format!(
      r#"{{"manifests":[{{"digest":"sha256:{DIGEST_A}","platform":{{"architecture":"amd64","os":"linux"}}}}]}}"#
    );

    let err = verify_manifest_list(&raw, &["linux/amd64", "linux/arm64"]).unwrap_err();
    match err {
      MergeError::PlatformAbsent(platform) => assert_eq!(platform, "linux/arm64"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn verify_rejects_documents_without_manifests() {
    assert!(matches!(
      verify_manifest_list("{}", &["linux/amd64"]),
      Err(MergeError::ManifestParse { .. })
    ));
    assert!(matches!(
      verify_manifest_list("not json", &["linux/amd64"]),
      Err(MergeError::ManifestParse { .. })
    ));
  }
}

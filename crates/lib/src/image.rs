//! Builder image assembly.
//!
//! Packs a completed prefix into a per-architecture builder image: the
//! image carries the Rust toolchain from the base image plus the static
//! native libraries at the same absolute prefix path they were built for,
//! so pkg-config metadata resolves identically inside the container.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::arch::Arch;
use crate::consts::{BASE_IMAGE, CONTAINER_CARGO_HOME, CONTAINER_SRC_DIR};
use crate::prefix;
use crate::process::{self, ProcessError};
use crate::toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("prefix {} has no completion marker; run the dependency build first", .0.display())]
  PrefixIncomplete(PathBuf),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("could not parse buildx metadata: {message}")]
  Metadata { message: String },

  #[error("buildx metadata carries no image digest")]
  MissingDigest,

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Identity of one per-architecture builder image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderImage {
  pub repo: String,
  pub arch: Arch,
  /// Date component of the versioned tag, `YYYYMMDD` in UTC.
  pub date: String,
}

/// Date component used by versioned tags, `YYYYMMDD` in UTC. The merge
/// stage pairs per-architecture tags by this value, so every stage of one
/// release must agree on it.
pub fn build_date() -> String {
  chrono::Utc::now().format("%Y%m%d").to_string()
}

impl BuilderImage {
  pub fn new(repo: &str, arch: Arch) -> Self {
    Self::with_date(repo, arch, &build_date())
  }

  pub fn with_date(repo: &str, arch: Arch, date: &str) -> Self {
    Self {
      repo: repo.to_string(),
      arch,
      date: date.to_string(),
    }
  }

  /// `<repo>:<YYYYMMDD>-<arch>`, the tag a merge run later aggregates.
  pub fn versioned_tag(&self) -> String {
    format!("{}:{}-{}", self.repo, self.date, self.arch.short_name())
  }

  /// `<repo>:latest-<arch>`, moved on every successful build.
  pub fn rolling_tag(&self) -> String {
    format!("{}:latest-{}", self.repo, self.arch.short_name())
  }
}

/// Generated Dockerfile for a builder image.
///
/// The build context is the prefix directory itself, so `COPY .` places the
/// libraries back at their canonical absolute path.
pub fn dockerfile(tc: &Toolchain) -> String {
  let prefix = tc.prefix().display();
  let pkg_config = tc.pkg_config_path();

  let lines = [
    format!("FROM {BASE_IMAGE}"),
    "RUN apk add --no-cache build-base pkgconfig cmake".to_string(),
    format!("COPY . {prefix}/"),
    format!("ENV PKG_CONFIG_PATH={pkg_config}"),
    format!("ENV PKG_CONFIG_LIBDIR={pkg_config}"),
    "ENV PKG_CONFIG_ALL_STATIC=1".to_string(),
    format!("ENV OPENSSL_DIR={prefix}"),
    "ENV OPENSSL_STATIC=1".to_string(),
    format!("ENV CARGO_HOME={CONTAINER_CARGO_HOME}"),
    format!("WORKDIR {CONTAINER_SRC_DIR}"),
  ];
  let mut contents = lines.join("\n");
  contents.push('\n');
  contents
}

fn build_args(
  image: &BuilderImage,
  dockerfile_path: &str,
  metadata_path: &str,
  context: &str,
  push: bool,
) -> Vec<String> {
  let mut args = vec![
    "buildx".to_string(),
    "build".to_string(),
    "--platform".to_string(),
    image.arch.docker_platform().to_string(),
    "-f".to_string(),
    dockerfile_path.to_string(),
    "-t".to_string(),
    image.versioned_tag(),
    "-t".to_string(),
    image.rolling_tag(),
    "--metadata-file".to_string(),
    metadata_path.to_string(),
  ];
  args.push(if push { "--push" } else { "--load" }.to_string());
  args.push(context.to_string());
  args
}

/// Extract the image digest from a buildx `--metadata-file` document.
fn parse_metadata(contents: &str) -> Result<String, ImageError> {
  let value: serde_json::Value =
    serde_json::from_str(contents).map_err(|e| ImageError::Metadata { message: e.to_string() })?;

  value
    .get("containerimage.digest")
    .and_then(|d| d.as_str())
    .map(str::to_string)
    .ok_or(ImageError::MissingDigest)
}

/// Build the builder image from a completed prefix and return its digest
/// (`sha256:<hex>`). With `push` the tags go to the registry, otherwise the
/// image is loaded into the local daemon.
pub async fn assemble(image: &BuilderImage, tc: &Toolchain, push: bool) -> Result<String, ImageError> {
  if !prefix::is_complete(tc.prefix()) {
    return Err(ImageError::PrefixIncomplete(tc.prefix().to_path_buf()));
  }

  let scratch = tempfile::tempdir()?;
  let dockerfile_path = scratch.path().join("Dockerfile");
  let metadata_path = scratch.path().join("metadata.json");
  tokio::fs::write(&dockerfile_path, dockerfile(tc)).await?;

  let args = build_args(
    image,
    &dockerfile_path.display().to_string(),
    &metadata_path.display().to_string(),
    &tc.prefix().display().to_string(),
    push,
  );

  info!(tag = %image.versioned_tag(), platform = %image.arch.docker_platform(), "building builder image");
  process::run_streaming("docker", &args).await?;

  let metadata = tokio::fs::read_to_string(&metadata_path).await?;
  let digest = parse_metadata(&metadata)?;

  info!(tag = %image.versioned_tag(), digest = %digest, "builder image ready");
  Ok(digest)
}

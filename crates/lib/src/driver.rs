//! Per-architecture build driver.
//!
//! One [`run`] takes a target from bare metal to a release binary: native
//! libraries into the shared prefix, a builder image from that prefix, a
//! digest artifact for the merge stage, then the application build inside
//! the image. Each architecture's run is independent, so two of them can
//! execute on separate machines and meet again at the merge.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::arch::{Arch, UnsupportedArch};
use crate::consts::{CONTAINER_CARGO_HOME, CONTAINER_SRC_DIR};
use crate::deps;
use crate::image::{self, BuilderImage, ImageError};
use crate::merge::{self, MergeError};
use crate::paths::{CachePaths, PathError};
use crate::pipeline::{self, PipelineConfig, PipelineError};
use crate::process::{self, ProcessError};
use crate::toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum DriverError {
  #[error(transparent)]
  Arch(#[from] UnsupportedArch),

  #[error(transparent)]
  Path(#[from] PathError),

  #[error(transparent)]
  Pipeline(#[from] PipelineError),

  #[error(transparent)]
  Image(#[from] ImageError),

  #[error(transparent)]
  Digest(#[from] MergeError),

  #[error("source directory {} does not exist", .0.display())]
  MissingSource(PathBuf),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Pick the target architecture: an explicit name wins, otherwise the host
/// decides. Alias normalization lives in [`Arch::parse`], so `arm64` and
/// `aarch64` land on the same target here.
pub fn resolve_arch(requested: Option<&str>) -> Result<Arch, UnsupportedArch> {
  match requested {
    Some(name) => Arch::parse(name),
    None => Arch::current(),
  }
}

/// Inputs for one per-architecture release build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub arch: Arch,
  /// Builder image repository the run tags and consumes.
  pub repo: String,
  /// Application source tree, mounted read-write into the container.
  pub source_dir: PathBuf,
  /// Where the digest artifact for the merge stage lands.
  pub digests_dir: PathBuf,
  /// Push the builder image to the registry instead of loading it locally.
  pub push: bool,
  /// Rebuild native libraries even when the prefix carries a marker.
  pub force: bool,
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
  pub arch: Arch,
  pub image_tag: String,
  /// Content digest of the builder image, with its `sha256:` prefix.
  pub digest: String,
  /// Digest artifact for the merge stage. Only pushed images get one; a
  /// locally loaded image has no registry digest worth merging.
  pub digest_artifact: Option<PathBuf>,
  /// Where the release binary lands inside the source tree.
  pub release_dir: PathBuf,
}

fn run_args(
  image_tag: &str,
  arch: Arch,
  source_dir: &Path,
  cargo_cache: &Path,
  cflags: Option<&str>,
) -> Vec<String> {
  let mut args = vec![
    "run".to_string(),
    "--rm".to_string(),
    "--platform".to_string(),
    arch.docker_platform().to_string(),
    "-v".to_string(),
    format!("{}:{CONTAINER_SRC_DIR}", source_dir.display()),
    "-v".to_string(),
    format!("{}:{CONTAINER_CARGO_HOME}", cargo_cache.display()),
  ];
  if let Some(flags) = cflags {
    args.push("-e".to_string());
    args.push(format!("CFLAGS={flags}"));
  }
  args.push(image_tag.to_string());
  args.extend(
    ["cargo", "build", "--release", "--locked", "--target", arch.rust_triple()]
      .into_iter()
      .map(str::to_string),
  );
  args
}

/// Provision the builder image for `opts.arch` and build the application
/// inside it.
///
/// The native library pipeline is skipped when the shared prefix already
/// carries a completion marker, so repeated invocations pay only for the
/// application build. The cargo cache is mounted into every container, which
/// keeps registry downloads shared across runs.
pub async fn run(opts: &BuildOptions) -> Result<BuildReport, DriverError> {
  if !opts.source_dir.is_dir() {
    return Err(DriverError::MissingSource(opts.source_dir.clone()));
  }
  let source_dir = opts.source_dir.canonicalize()?;

  let tc = Toolchain::for_arch(opts.arch);
  let paths = CachePaths::current()?;

  let catalog = deps::catalog();
  let config = PipelineConfig {
    force: opts.force,
    ..PipelineConfig::default()
  };
  pipeline::run(&tc, &paths, &catalog, &config).await?;

  let image = BuilderImage::new(&opts.repo, opts.arch);
  let digest = image::assemble(&image, &tc, opts.push).await?;
  let digest_artifact = if opts.push {
    Some(merge::write_digest_artifact(&opts.digests_dir, opts.arch, &digest)?)
  } else {
    None
  };

  tokio::fs::create_dir_all(&paths.cargo).await?;
  let overlay = tc.extra_cflags().join(" ");
  let cflags = (!overlay.is_empty()).then_some(overlay.as_str());
  let tag = image.versioned_tag();

  info!(image = %tag, source = %source_dir.display(), "building release binary");
  process::run_streaming("docker", run_args(&tag, opts.arch, &source_dir, &paths.cargo, cflags)).await?;

  Ok(BuildReport {
    arch: opts.arch,
    image_tag: tag,
    digest,
    digest_artifact,
    release_dir: source_dir.join("target").join(opts.arch.rust_triple()).join("release"),
  })
}

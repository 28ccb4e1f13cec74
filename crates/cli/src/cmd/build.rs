//! Implementation of the `forgeron build` command.
//!
//! Runs the whole per-architecture flow: native libraries into the prefix,
//! builder image from the prefix, digest artifact for the merge stage, then
//! the release build inside the image.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use forgeron_lib::driver::{self, BuildOptions};
use forgeron_lib::lock::{CacheLock, LockMode};

use crate::output::{format_duration, print_stat, print_success, short_digest};

/// Execute the build command.
pub fn cmd_build(
  arch: Option<&str>,
  source: &Path,
  repo: &str,
  digests_dir: &Path,
  push: bool,
  force: bool,
) -> Result<()> {
  let arch = driver::resolve_arch(arch)?;
  let _lock = CacheLock::acquire(LockMode::Exclusive, &format!("build {arch}"))?;
  info!(arch = %arch, source = %source.display(), "starting release build");

  let opts = BuildOptions {
    arch,
    repo: repo.to_string(),
    source_dir: source.to_path_buf(),
    digests_dir: digests_dir.to_path_buf(),
    push,
    force,
  };

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(driver::run(&opts)).context("Build failed")?;

  println!();
  print_success(&format!("Release build complete for {}", report.arch));
  print_stat("Image", &report.image_tag);
  print_stat("Digest", short_digest(&report.digest));
  if let Some(artifact) = &report.digest_artifact {
    print_stat("Artifact", &artifact.display().to_string());
  }
  print_stat("Binaries", &report.release_dir.display().to_string());
  print_stat("Elapsed", &format_duration(started.elapsed()));

  Ok(())
}

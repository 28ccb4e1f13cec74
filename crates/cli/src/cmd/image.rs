//! Implementation of the `forgeron image` command.
//!
//! Assembles the builder image for one architecture from its completed
//! prefix. With `--push` it also records the digest artifact the merge
//! stage consumes.

use std::path::Path;

use anyhow::{Context, Result};

use forgeron_lib::driver::resolve_arch;
use forgeron_lib::image::{self, BuilderImage};
use forgeron_lib::lock::{CacheLock, LockMode};
use forgeron_lib::merge::write_digest_artifact;
use forgeron_lib::toolchain::Toolchain;

use crate::output::{print_info, print_stat, print_success, short_digest};

/// Execute the image command.
///
/// Assembly only reads the prefix, so a shared lock is enough; it still
/// keeps a concurrent deps run from resetting the prefix mid-copy.
pub fn cmd_image(arch: Option<&str>, repo: &str, push: bool, digests_dir: &Path) -> Result<()> {
  let arch = resolve_arch(arch)?;
  let _lock = CacheLock::acquire(LockMode::Shared, &format!("image {arch}"))?;

  let tc = Toolchain::for_arch(arch);
  let builder = BuilderImage::new(repo, arch);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let digest = rt
    .block_on(image::assemble(&builder, &tc, push))
    .context("Image assembly failed")?;

  println!();
  print_success(&format!("Assembled {}", builder.versioned_tag()));
  print_stat("Digest", short_digest(&digest));
  if push {
    let artifact = write_digest_artifact(digests_dir, arch, &digest)?;
    print_stat("Artifact", &artifact.display().to_string());
  } else {
    print_info("Image loaded locally; push it to produce a digest artifact for merge");
  }

  Ok(())
}

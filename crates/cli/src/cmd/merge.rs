//! Implementation of the `forgeron merge` command.
//!
//! Collects the per-architecture digest artifacts and publishes one
//! multi-platform manifest list referencing all of them. Fails before
//! touching the registry when any platform's digest is missing.

use std::path::Path;

use anyhow::{Context, Result};

use forgeron_lib::image::build_date;
use forgeron_lib::merge::{self, read_digest_artifacts};

use crate::output::{print_info, print_stat, print_success, short_digest};

/// Execute the merge command.
pub fn cmd_merge(repo: &str, digests_dir: &Path, date: Option<&str>, latest: bool) -> Result<()> {
  let digests = read_digest_artifacts(digests_dir).context("Could not collect digest artifacts")?;
  for entry in &digests {
    print_info(&format!("{}: {}", entry.arch.artifact_dir(), short_digest(&entry.digest)));
  }

  let date = match date {
    Some(date) => date.to_string(),
    None => build_date(),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(merge::merge_manifests(repo, &date, latest, &digests))
    .context("Manifest merge failed")?;

  println!();
  print_success(&format!("Published {}", report.tag));
  if let Some(tag) = &report.latest_tag {
    print_stat("Alias", tag);
  }
  print_stat("Platforms", &report.platforms.join(", "));

  Ok(())
}

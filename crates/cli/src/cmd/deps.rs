//! Implementation of the `forgeron deps` command.
//!
//! Builds every pinned native library for one target architecture into the
//! shared installation prefix. A prefix that already carries a completion
//! marker is left alone unless `--force` asks for a rebuild.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use forgeron_lib::deps;
use forgeron_lib::driver::resolve_arch;
use forgeron_lib::lock::{CacheLock, LockMode};
use forgeron_lib::paths::CachePaths;
use forgeron_lib::pipeline::{self, PipelineConfig};
use forgeron_lib::toolchain::Toolchain;

use crate::output::{format_duration, print_info, print_stat, print_success, symbols};

/// Execute the deps command.
///
/// Resolves the target, takes an exclusive cache lock and runs the library
/// pipeline. Prints what was built and where it went.
pub fn cmd_deps(arch: Option<&str>, force: bool, jobs: Option<usize>) -> Result<()> {
  let arch = resolve_arch(arch)?;
  let _lock = CacheLock::acquire(LockMode::Exclusive, &format!("deps {arch}"))?;
  info!(arch = %arch, force, "starting dependency build");

  let tc = Toolchain::for_arch(arch);
  let paths = CachePaths::current()?;
  let catalog = deps::catalog();

  let mut config = PipelineConfig {
    force,
    ..PipelineConfig::default()
  };
  if let Some(jobs) = jobs {
    config.jobs = jobs;
  }

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(pipeline::run(&tc, &paths, &catalog, &config))
    .context("Dependency build failed")?;

  println!();
  if report.skipped {
    print_info(&format!(
      "Prefix {} is already complete, nothing to do (use --force to rebuild)",
      report.prefix.display()
    ));
    return Ok(());
  }

  print_success(&format!("Built {} libraries for {}", report.built.len(), report.arch));
  for name in &report.built {
    println!("  {} {}", symbols::INFO, name);
  }
  println!();
  print_stat("Prefix", &report.prefix.display().to_string());
  print_stat("Elapsed", &format_duration(started.elapsed()));

  Ok(())
}

//! The dependency build pipeline.
//!
//! Runs the full fetch, unpack, configure, build, stage, fixup, promote
//! sequence for every library in the catalog, wave by wave: libraries whose
//! dependencies are all installed build concurrently, bounded by a
//! semaphore, and the next wave starts only when the current one finished.
//! The completion marker is written after the last wave, so an interrupted
//! run leaves a prefix that will be rebuilt, never trusted.

pub mod fixup;
pub mod step;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::arch::Arch;
use crate::deps::{DepError, DepGraph, DependencySpec};
use crate::extract::{self, ExtractError};
use crate::fetch::{self, FetchError};
use crate::paths::CachePaths;
use crate::prefix::{self, PrefixError};
use crate::toolchain::Toolchain;

use fixup::FixupError;
use step::StepError;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Dep(#[from] DepError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Extract(#[from] ExtractError),

  #[error(transparent)]
  Step(#[from] StepError),

  #[error(transparent)]
  Prefix(#[from] PrefixError),

  #[error(transparent)]
  Fixup(#[from] FixupError),

  #[error("build task for {dep} panicked")]
  TaskPanicked { dep: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Rebuild even when the prefix carries a completion marker.
  pub force: bool,
  /// How many libraries may build at once within a wave. Each library
  /// already parallelizes internally via `jobs`, so this stays small.
  pub build_concurrency: usize,
  /// `-j` passed to make and cmake within a single library build.
  pub jobs: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      force: false,
      build_concurrency: 2,
      jobs: step::default_jobs(),
    }
  }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
  pub arch: Arch,
  pub prefix: PathBuf,
  /// Library names in completion order. Empty when the run was skipped.
  pub built: Vec<String>,
  /// True when the prefix was already complete and left untouched.
  pub skipped: bool,
}

/// Build every library in `specs` into the toolchain's prefix.
pub async fn run(
  tc: &Toolchain,
  paths: &CachePaths,
  specs: &[DependencySpec],
  config: &PipelineConfig,
) -> Result<PipelineReport, PipelineError> {
  let prefix = tc.prefix().to_path_buf();

  if prefix::is_complete(&prefix) {
    if config.force {
      info!(prefix = %prefix.display(), "forcing rebuild of completed prefix");
      prefix::reset_prefix(&prefix)?;
    } else {
      info!(prefix = %prefix.display(), "prefix already complete, skipping build");
      return Ok(PipelineReport {
        arch: tc.arch(),
        prefix,
        built: Vec::new(),
        skipped: true,
      });
    }
  }

  prefix::ensure_prefix(&prefix)?;
  tokio::fs::create_dir_all(&paths.downloads).await?;
  let work_root = paths.work.join(tc.arch().as_str());
  tokio::fs::create_dir_all(&work_root).await?;

  let graph = DepGraph::new(specs)?;
  let waves = graph.waves()?;
  let by_name: HashMap<&str, DependencySpec> = specs.iter().map(|s| (s.name, s.clone())).collect();

  let semaphore = Arc::new(Semaphore::new(config.build_concurrency.max(1)));
  let mut installed: BTreeMap<String, String> = BTreeMap::new();
  let mut built: Vec<String> = Vec::new();

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, count = wave.len(), "starting build wave");

    let mut join_set: JoinSet<Result<(String, String), PipelineError>> = JoinSet::new();

    for name in wave {
      let spec = by_name[name].clone();
      let tc = tc.clone();
      let downloads = paths.downloads.clone();
      let work_root = work_root.clone();
      let jobs = config.jobs;
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.unwrap();

        let name = spec.name.to_string();
        let version = spec.version.to_string();
        build_dependency(spec, tc, downloads, work_root, jobs).await?;
        Ok((name, version))
      });
    }

    while let Some(join_result) = join_set.join_next().await {
      match join_result {
        Ok(Ok((name, version))) => {
          info!(dep = %name, version = %version, "dependency installed");
          built.push(name.clone());
          installed.insert(name, version);
        }
        Ok(Err(e)) => {
          error!(error = %e, "dependency build failed");
          return Err(e);
        }
        Err(e) => {
          error!(error = %e, "build task panicked");
          return Err(PipelineError::TaskPanicked {
            dep: "unknown".to_string(),
          });
        }
      }
    }
  }

  prefix::write_marker(&prefix, tc.arch().as_str(), installed).await?;
  info!(prefix = %prefix.display(), count = built.len(), "prefix complete");

  Ok(PipelineReport {
    arch: tc.arch(),
    prefix,
    built,
    skipped: false,
  })
}

/// Fetch, unpack, build, stage, fix up, promote and verify one library.
async fn build_dependency(
  spec: DependencySpec,
  tc: Toolchain,
  downloads: PathBuf,
  work_root: PathBuf,
  jobs: usize,
) -> Result<(), PipelineError> {
  let archive = fetch::fetch_source(&spec.url, spec.sha256, &downloads).await?;

  let dep_work = work_root.join(format!("{}-{}", spec.name, spec.version));
  let src = dep_work.join("src");
  let stage_root = dep_work.join("stage");
  let log = dep_work.join("build.log");

  // Always build from a freshly unpacked tree; stale configure state from a
  // previous run must not leak in.
  for dir in [&src, &stage_root] {
    if dir.exists() {
      tokio::fs::remove_dir_all(dir).await?;
    }
  }
  tokio::fs::create_dir_all(&dep_work).await?;
  if log.exists() {
    tokio::fs::remove_file(&log).await?;
  }

  let archive_path = archive.clone();
  let src_dir = src.clone();
  tokio::task::spawn_blocking(move || extract::unpack_archive(&archive_path, &src_dir))
    .await
    .map_err(|_| PipelineError::TaskPanicked {
      dep: spec.name.to_string(),
    })??;

  let step = step::plan_step(&spec, &tc, &stage_root, jobs)?;
  step::run_step(&step, &tc.env(), &src, &log).await?;

  let staged = prefix::staged_subtree(&stage_root, tc.prefix());
  match spec.name {
    "rlottie" => {
      fixup::patch_rlottie_pc(&staged)?;
    }
    "opencv" => {
      fixup::rename_opencv_archives(&staged)?;
    }
    _ => {}
  }

  prefix::promote(&staged, tc.prefix())?;
  tokio::fs::remove_dir_all(&stage_root).await?;

  prefix::verify_static_artifacts(tc.prefix(), step::expected_artifacts(spec.name))?;

  Ok(())
}

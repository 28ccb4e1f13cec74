//! Child process execution.
//!
//! Three run modes cover everything the pipeline does:
//! [`run_capture`] for short queries whose stdout is the result,
//! [`run_streaming`] for long Docker operations the user watches live, and
//! [`run_logged`] for compile steps whose output goes to a log file.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::SOURCE_DATE_EPOCH;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with status {code:?}")]
  CommandFailed { program: String, code: Option<i32> },

  #[error("{program} exited with status {code:?}, full output in {log:?}")]
  LoggedCommandFailed {
    program: String,
    code: Option<i32>,
    log: PathBuf,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Run a program and return its trimmed stdout.
///
/// The child inherits the parent environment, so tools like Docker keep
/// their configuration. stderr is captured and logged on failure.
pub async fn run_capture<I, S>(program: &str, args: I) -> Result<String, ProcessError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let output = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .output()
    .await
    .map_err(|source| ProcessError::Spawn { program: program.to_string(), source })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(program = %program, stderr = %stderr, "command stderr");
    }
    return Err(ProcessError::CommandFailed {
      program: program.to_string(),
      code: output.status.code(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a program with stdout/stderr attached to the parent's, so progress
/// is visible live. Used for Docker builds and in-container app builds.
pub async fn run_streaming<I, S>(program: &str, args: I) -> Result<(), ProcessError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let status = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .status()
    .await
    .map_err(|source| ProcessError::Spawn { program: program.to_string(), source })?;

  if !status.success() {
    return Err(ProcessError::CommandFailed {
      program: program.to_string(),
      code: status.code(),
    });
  }

  Ok(())
}

/// Run a build tool in a controlled environment, appending its combined
/// output to `log`.
///
/// The child environment is cleared and rebuilt from `env`, plus a minimal
/// locale and a fixed `SOURCE_DATE_EPOCH` so repeated builds differ only
/// where the sources do. `env` must therefore carry everything the tool
/// needs, including `PATH`.
pub async fn run_logged<I, S>(
  program: &str,
  args: I,
  cwd: &Path,
  env: &BTreeMap<String, String>,
  log: &Path,
) -> Result<(), ProcessError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
  // Full command line, so the log file shows exactly what ran (configure
  // flags included) without cross-referencing the recipe.
  let header = std::iter::once(program.to_string())
    .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
    .collect::<Vec<_>>()
    .join(" ");

  let mut command = Command::new(program);
  command
    .args(&args)
    .current_dir(cwd)
    .stdin(Stdio::null())
    .env_clear()
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);

  for (key, value) in env {
    command.env(key, value);
  }

  info!(command = %header, cwd = %cwd.display(), "running build step");

  let output = command
    .output()
    .await
    .map_err(|source| ProcessError::Spawn { program: program.to_string(), source })?;

  let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(log).await?;
  file.write_all(format!("$ {header}\n").as_bytes()).await?;
  file.write_all(&output.stdout).await?;
  file.write_all(&output.stderr).await?;
  file.flush().await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(program = %program, stderr = %stderr, "build step stderr");
    }
    return Err(ProcessError::LoggedCommandFailed {
      program: program.to_string(),
      code: output.status.code(),
      log: log.to_path_buf(),
    });
  }

  Ok(())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn capture_returns_trimmed_stdout() {
    let out = run_capture("/bin/sh", ["-c", "echo hello"]).await.unwrap();
    assert_eq!(out, "hello");
  }

  #[tokio::test]
  async fn capture_reports_exit_code() {
    let err = run_capture("/bin/sh", ["-c", "exit 3"]).await.unwrap_err();
    assert!(matches!(err, ProcessError::CommandFailed { code: Some(3), .. }));
  }

  #[tokio::test]
  async fn capture_reports_missing_program() {
    let err = run_capture("/no/such/program", ["x"]).await.unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
  }

  #[tokio::test]
  async fn streaming_propagates_failure() {
    let err = run_streaming("/bin/sh", ["-c", "exit 1"]).await.unwrap_err();
    assert!(matches!(err, ProcessError::CommandFailed { code: Some(1), .. }));
  }

  #[tokio::test]
  async fn logged_appends_output_to_log() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("build.log");
    let env = BTreeMap::new();

    run_logged("/bin/sh", ["-c", "echo first"], tmp.path(), &env, &log).await.unwrap();
    run_logged("/bin/sh", ["-c", "echo second"], tmp.path(), &env, &log).await.unwrap();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("$ /bin/sh -c"));
    assert!(contents.contains("first"));
    assert!(contents.contains("second"));
  }

  #[tokio::test]
  async fn logged_clears_ambient_environment() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("build.log");
    let env = BTreeMap::new();

    run_logged("/bin/sh", ["-c", "echo HOME=$HOME"], tmp.path(), &env, &log).await.unwrap();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("HOME=\n"));
  }

  #[tokio::test]
  async fn logged_sets_source_date_epoch() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("build.log");
    let env = BTreeMap::new();

    run_logged("/bin/sh", ["-c", "echo $SOURCE_DATE_EPOCH"], tmp.path(), &env, &log)
      .await
      .unwrap();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("315532800"));
  }

  #[tokio::test]
  async fn logged_env_overrides_baseline() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("build.log");
    let mut env = BTreeMap::new();
    env.insert("CC".to_string(), "x86_64-linux-musl-gcc".to_string());

    run_logged("/bin/sh", ["-c", "echo CC=$CC"], tmp.path(), &env, &log).await.unwrap();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("CC=x86_64-linux-musl-gcc"));
  }

  #[tokio::test]
  async fn logged_failure_names_the_log() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("build.log");
    let env = BTreeMap::new();

    let err = run_logged("/bin/sh", ["-c", "echo doomed; exit 2"], tmp.path(), &env, &log)
      .await
      .unwrap_err();

    match err {
      ProcessError::LoggedCommandFailed { code, log: reported, .. } => {
        assert_eq!(code, Some(2));
        assert_eq!(reported, log);
      }
      other => panic!("unexpected error: {other:?}"),
    }
    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("doomed"));
  }
}

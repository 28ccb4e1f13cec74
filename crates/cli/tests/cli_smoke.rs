//! CLI smoke tests for forgeron.
//!
//! Every subcommand is exercised for exit code and message without reaching
//! docker or the network; each scenario stops at argument validation or an
//! artifact precondition.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the forgeron binary.
fn forgeron_cmd() -> Command {
  cargo_bin_cmd!("forgeron")
}

const DIGEST: &str = "6e2fc072711a4a87e1a8d943a70e4bda90c77e983c7ed41f746ab0582754ff55";

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  forgeron_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  forgeron_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("forgeron"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["deps", "image", "build", "merge", "status"] {
    forgeron_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Architecture validation
// =============================================================================

#[test]
#[serial]
fn unsupported_architecture_fails_fast() {
  let temp = TempDir::new().unwrap();

  for cmd in &["deps", "image", "build", "status"] {
    forgeron_cmd()
      .arg(cmd)
      .arg("riscv64")
      .env("FORGERON_CACHE_DIR", temp.path())
      .assert()
      .failure()
      .stderr(predicate::str::contains("unsupported architecture"));
  }
}

// =============================================================================
// build
// =============================================================================

#[test]
#[serial]
fn build_requires_an_existing_source_tree() {
  let temp = TempDir::new().unwrap();

  forgeron_cmd()
    .args(["build", "x86_64", "--source", "/nonexistent/forgeron-app"])
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("does not exist"));
}

// =============================================================================
// image
// =============================================================================

#[test]
#[serial]
fn image_requires_a_complete_prefix() {
  let temp = TempDir::new().unwrap();

  forgeron_cmd()
    .args(["image", "aarch64"])
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("no completion marker"));
}

// =============================================================================
// merge
// =============================================================================

#[test]
#[serial]
fn merge_requires_digest_artifacts() {
  let temp = TempDir::new().unwrap();
  let digests = temp.path().join("digests");
  std::fs::create_dir_all(&digests).unwrap();

  forgeron_cmd()
    .arg("merge")
    .arg("--digests-dir")
    .arg(&digests)
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("no digest directory"));
}

#[test]
#[serial]
fn merge_rejects_a_single_platform() {
  let temp = TempDir::new().unwrap();
  let digests = temp.path().join("digests");
  std::fs::create_dir_all(digests.join("linux-amd64")).unwrap();
  std::fs::File::create(digests.join("linux-amd64").join(DIGEST)).unwrap();

  forgeron_cmd()
    .arg("merge")
    .arg("--digests-dir")
    .arg(&digests)
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("linux-arm64"));
}

// =============================================================================
// status
// =============================================================================

#[test]
#[serial]
fn status_on_an_empty_cache_succeeds() {
  let temp = TempDir::new().unwrap();

  forgeron_cmd()
    .arg("status")
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache"));
}

#[test]
#[serial]
fn status_json_lists_both_targets() {
  let temp = TempDir::new().unwrap();

  forgeron_cmd()
    .args(["status", "--json"])
    .env("FORGERON_CACHE_DIR", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"targets\""))
    .stdout(predicate::str::contains("x86_64"))
    .stdout(predicate::str::contains("aarch64"));
}

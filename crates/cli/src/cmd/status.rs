//! Implementation of the `forgeron status` command.
//!
//! Shows per-target prefix state and cache usage without changing anything.

use std::path::Path;

use anyhow::Result;

use forgeron_lib::arch::Arch;
use forgeron_lib::lock::{CacheLock, LockMode};
use forgeron_lib::paths::CachePaths;
use forgeron_lib::prefix::{self, PrefixMarker};
use forgeron_lib::toolchain::Toolchain;

use crate::output::{
  self, format_bytes, print_info, print_json, print_stat, print_success, print_warning,
};

pub fn cmd_status(arch: Option<&str>, json: bool) -> Result<()> {
  let _lock = CacheLock::acquire(LockMode::Shared, "status")?;
  let paths = CachePaths::current()?;

  let targets: Vec<Arch> = match arch {
    Some(name) => vec![Arch::parse(name)?],
    None => Arch::ALL.to_vec(),
  };

  let mut entries: Vec<(Arch, std::path::PathBuf, Option<PrefixMarker>)> = Vec::new();
  for arch in &targets {
    let tc = Toolchain::for_arch(*arch);
    let marker = match prefix::read_marker(tc.prefix()) {
      Ok(marker) => marker,
      Err(e) => {
        print_warning(&format!("Unreadable marker in {}: {}", tc.prefix().display(), e));
        None
      }
    };
    entries.push((*arch, tc.prefix().to_path_buf(), marker));
  }

  if json {
    let targets_json: Vec<_> = entries
      .iter()
      .map(|(arch, prefix, marker)| {
        serde_json::json!({
          "arch": arch.as_str(),
          "prefix": prefix,
          "complete": marker.as_ref().is_some_and(|m| m.status == "complete"),
          "libraries": marker.as_ref().map(|m| m.installed.clone()),
        })
      })
      .collect();
    let json_output = serde_json::json!({
      "targets": targets_json,
      "cache": {
        "root": paths.root,
        "downloads_bytes": dir_size(&paths.downloads),
        "work_bytes": dir_size(&paths.work),
        "cargo_bytes": dir_size(&paths.cargo),
      },
    });
    print_json(&json_output)?;
    return Ok(());
  }

  for (arch, prefix, marker) in &entries {
    match marker {
      Some(marker) if marker.status == "complete" => {
        print_success(&format!("{}: complete at {}", arch, prefix.display()));
        for (name, version) in &marker.installed {
          println!("  {} {} {}", output::symbols::INFO, name, version);
        }
      }
      _ => {
        print_info(&format!("{}: not built (run 'forgeron deps {}')", arch, arch));
      }
    }
  }

  println!();
  print_stat("Cache", &paths.root.display().to_string());
  print_stat("Downloads", &format_bytes(dir_size(&paths.downloads)));
  print_stat("Work", &format_bytes(dir_size(&paths.work)));
  print_stat("Cargo", &format_bytes(dir_size(&paths.cargo)));

  Ok(())
}

fn dir_size(path: &Path) -> u64 {
  if !path.exists() {
    return 0;
  }

  let mut size = 0;
  if let Ok(entries) = std::fs::read_dir(path) {
    for entry in entries.flatten() {
      let entry_path = entry.path();
      if entry_path.is_file() {
        size += entry.metadata().map(|m| m.len()).unwrap_or(0);
      } else if entry_path.is_dir() {
        size += dir_size(&entry_path);
      }
    }
  }
  size
}

//! Cross toolchain configuration.
//!
//! A [`Toolchain`] is constructed once per target from the architecture and
//! the ambient environment, then never mutated. Every build step of a run
//! sees the same compilers and flags, and the derived environment is a
//! `BTreeMap` so its ordering (and any log of it) is deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::arch::Arch;
use crate::consts::{DEFAULT_OPT_FLAGS, DEFAULT_PREFIX_ROOT, ENV_EXTRA_CFLAGS_PREFIX, ENV_OPT_FLAGS};

/// Immutable description of how to compile for one target architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
  arch: Arch,
  prefix: PathBuf,
  opt_flags: String,
  extra_cflags: Vec<String>,
  path: String,
}

impl Toolchain {
  /// Capture a toolchain for `arch` from the current environment.
  ///
  /// `FORGERON_OPT_FLAGS` replaces the default optimization flags and
  /// `FORGERON_EXTRA_CFLAGS_<ARCH>` appends target-specific flags. Both are
  /// read here, once; later environment changes do not affect the toolchain.
  pub fn for_arch(arch: Arch) -> Self {
    Self::with_prefix_root(arch, Path::new(DEFAULT_PREFIX_ROOT))
  }

  /// Like [`Toolchain::for_arch`] with the prefix tree relocated under
  /// `prefix_root`. Relocated prefixes don't match what builder images
  /// expect, so this stays out of the CLI.
  pub fn with_prefix_root(arch: Arch, prefix_root: &Path) -> Self {
    let opt_flags = std::env::var(ENV_OPT_FLAGS)
      .ok()
      .filter(|v| !v.is_empty())
      .unwrap_or_else(|| DEFAULT_OPT_FLAGS.to_string());

    let mut extra_cflags: Vec<String> =
      arch.extra_cflags().iter().map(|f| f.to_string()).collect();
    let user_var = format!("{ENV_EXTRA_CFLAGS_PREFIX}{}", arch.env_suffix());
    if let Ok(user_flags) = std::env::var(&user_var) {
      extra_cflags.extend(user_flags.split_whitespace().map(str::to_string));
    }

    Self {
      arch,
      prefix: prefix_root.join(arch.musl_triple()),
      opt_flags,
      extra_cflags,
      path: std::env::var("PATH").unwrap_or_default(),
    }
  }

  pub fn arch(&self) -> Arch {
    self.arch
  }

  /// Installation prefix for this target. The same absolute path is used on
  /// the build host and inside the builder image, so pkg-config metadata
  /// written during installation stays valid.
  pub fn prefix(&self) -> &Path {
    &self.prefix
  }

  pub fn cc(&self) -> String {
    format!("{}-gcc", self.arch.musl_triple())
  }

  pub fn cxx(&self) -> String {
    format!("{}-g++", self.arch.musl_triple())
  }

  pub fn ar(&self) -> String {
    format!("{}-ar", self.arch.musl_triple())
  }

  pub fn ranlib(&self) -> String {
    format!("{}-ranlib", self.arch.musl_triple())
  }

  pub fn strip_tool(&self) -> String {
    format!("{}-strip", self.arch.musl_triple())
  }

  /// Compiler flags shared by every C dependency: optimization, PIC for
  /// linking into the final binary, the prefix include path, then the
  /// target-specific extras so they can override the shared set.
  pub fn cflags(&self) -> String {
    let mut flags = vec![self.opt_flags.clone(), "-fPIC".to_string()];
    flags.push(format!("-I{}", self.prefix.join("include").display()));
    flags.extend(self.extra_cflags.iter().cloned());
    flags.join(" ")
  }

  pub fn ldflags(&self) -> String {
    format!("-L{}", self.prefix.join("lib").display())
  }

  /// Target-specific flag overlay, built-in flags first, then anything from
  /// `FORGERON_EXTRA_CFLAGS_<ARCH>`. Empty for targets that need none.
  pub fn extra_cflags(&self) -> &[String] {
    &self.extra_cflags
  }

  pub fn pkg_config_path(&self) -> String {
    format!(
      "{}:{}",
      self.prefix.join("lib/pkgconfig").display(),
      self.prefix.join("share/pkgconfig").display()
    )
  }

  /// Complete build-step environment for this target.
  ///
  /// `PKG_CONFIG_LIBDIR` is pinned to the prefix so pkg-config can never
  /// resolve host libraries into a cross build. `PATH` is the one captured
  /// at construction; the cross tools must be on it.
  pub fn env(&self) -> BTreeMap<String, String> {
    let pkg_config = self.pkg_config_path();

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), self.path.clone());
    env.insert("CC".to_string(), self.cc());
    env.insert("CXX".to_string(), self.cxx());
    env.insert("AR".to_string(), self.ar());
    env.insert("RANLIB".to_string(), self.ranlib());
    env.insert("STRIP".to_string(), self.strip_tool());
    env.insert("CFLAGS".to_string(), self.cflags());
    env.insert("CXXFLAGS".to_string(), self.cflags());
    env.insert("LDFLAGS".to_string(), self.ldflags());
    env.insert("PKG_CONFIG_PATH".to_string(), pkg_config.clone());
    env.insert("PKG_CONFIG_LIBDIR".to_string(), pkg_config);
    env
  }
}

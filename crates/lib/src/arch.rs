//! Target CPU architectures and their names across the tool ecosystems.
//!
//! The same target goes by a different name in almost every tool this crate
//! drives: `uname -m` and the musl cross toolchains say `x86_64`/`aarch64`,
//! Docker and Go say `amd64`/`arm64`, OpenSSL's Configure and libvpx each
//! have their own target strings. All of those spellings are derived from
//! one [`Arch`] value so a target can never be half-renamed.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// CPU architectures the pipeline can build for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
  X86_64,
  Aarch64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported architecture {name:?}, expected x86_64/amd64 or aarch64/arm64")]
pub struct UnsupportedArch {
  pub name: String,
}

impl Arch {
  /// Both supported architectures, in deterministic order.
  pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

  /// Parse an architecture name. Accepts the `uname -m` spelling and the
  /// Docker/Go spelling of each target, case-insensitively.
  pub fn parse(name: &str) -> Result<Self, UnsupportedArch> {
    match name.trim().to_ascii_lowercase().as_str() {
      "x86_64" | "amd64" => Ok(Self::X86_64),
      "aarch64" | "arm64" => Ok(Self::Aarch64),
      _ => Err(UnsupportedArch { name: name.to_string() }),
    }
  }

  /// Detect the architecture of the build host.
  pub fn current() -> Result<Self, UnsupportedArch> {
    Self::parse(std::env::consts::ARCH)
  }

  /// Canonical lowercase identifier (`uname -m` spelling).
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
    }
  }

  /// Docker/Go spelling, used in image tags and digest artifact paths.
  pub fn short_name(&self) -> &'static str {
    match self {
      Self::X86_64 => "amd64",
      Self::Aarch64 => "arm64",
    }
  }

  /// Triple of the musl cross toolchain (`<triple>-gcc` and friends).
  pub fn musl_triple(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64-linux-musl",
      Self::Aarch64 => "aarch64-linux-musl",
    }
  }

  /// Rust target triple for the final static binary.
  pub fn rust_triple(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64-unknown-linux-musl",
      Self::Aarch64 => "aarch64-unknown-linux-musl",
    }
  }

  /// Platform string for `docker buildx --platform` and manifest entries.
  pub fn docker_platform(&self) -> &'static str {
    match self {
      Self::X86_64 => "linux/amd64",
      Self::Aarch64 => "linux/arm64",
    }
  }

  /// Subdirectory for this target's digest artifact, mirroring the Docker
  /// platform string with `/` flattened to `-`.
  pub fn artifact_dir(&self) -> &'static str {
    match self {
      Self::X86_64 => "linux-amd64",
      Self::Aarch64 => "linux-arm64",
    }
  }

  /// Target string for OpenSSL's Configure script.
  pub fn openssl_target(&self) -> &'static str {
    match self {
      Self::X86_64 => "linux-x86_64",
      Self::Aarch64 => "linux-aarch64",
    }
  }

  /// Target string for libvpx's configure script.
  pub fn vpx_target(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64-linux-gcc",
      Self::Aarch64 => "arm64-linux-gcc",
    }
  }

  /// Compiler flags required on this target beyond the shared set.
  ///
  /// On aarch64, gcc's LSE outline atomics helpers land in libgcc and drag
  /// in symbols some of the C dependencies never resolve when linked
  /// statically, so they are disabled outright.
  pub fn extra_cflags(&self) -> &'static [&'static str] {
    match self {
      Self::X86_64 => &[],
      Self::Aarch64 => &["-mno-outline-atomics"],
    }
  }

  /// Uppercase suffix for per-architecture environment variables.
  pub fn env_suffix(&self) -> &'static str {
    match self {
      Self::X86_64 => "X86_64",
      Self::Aarch64 => "AARCH64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = UnsupportedArch;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_accepts_both_spellings() {
    assert_eq!(Arch::parse("x86_64").unwrap(), Arch::X86_64);
    assert_eq!(Arch::parse("amd64").unwrap(), Arch::X86_64);
    assert_eq!(Arch::parse("aarch64").unwrap(), Arch::Aarch64);
    assert_eq!(Arch::parse("arm64").unwrap(), Arch::Aarch64);
  }

  #[test]
  fn parse_is_case_insensitive_and_trims() {
    assert_eq!(Arch::parse("AMD64").unwrap(), Arch::X86_64);
    assert_eq!(Arch::parse(" arm64\n").unwrap(), Arch::Aarch64);
  }

  #[test]
  fn parse_rejects_unknown_names() {
    assert!(Arch::parse("riscv64").is_err());
    assert!(Arch::parse("armv7l").is_err());
    assert!(Arch::parse("").is_err());
    let err = Arch::parse("i686").unwrap_err();
    assert_eq!(err.name, "i686");
  }

  #[test]
  fn parse_round_trips_canonical_names() {
    for arch in Arch::ALL {
      assert_eq!(Arch::parse(arch.as_str()).unwrap(), arch);
      assert_eq!(Arch::parse(arch.short_name()).unwrap(), arch);
    }
  }

  #[test]
  fn names_are_consistent_per_target() {
    let x = Arch::X86_64;
    assert_eq!(x.musl_triple(), "x86_64-linux-musl");
    assert_eq!(x.rust_triple(), "x86_64-unknown-linux-musl");
    assert_eq!(x.docker_platform(), "linux/amd64");
    assert_eq!(x.artifact_dir(), "linux-amd64");
    assert_eq!(x.openssl_target(), "linux-x86_64");
    assert_eq!(x.vpx_target(), "x86_64-linux-gcc");

    let a = Arch::Aarch64;
    assert_eq!(a.musl_triple(), "aarch64-linux-musl");
    assert_eq!(a.rust_triple(), "aarch64-unknown-linux-musl");
    assert_eq!(a.docker_platform(), "linux/arm64");
    assert_eq!(a.artifact_dir(), "linux-arm64");
    assert_eq!(a.openssl_target(), "linux-aarch64");
    assert_eq!(a.vpx_target(), "arm64-linux-gcc");
  }

  #[test]
  fn artifact_dir_matches_flattened_platform() {
    for arch in Arch::ALL {
      assert_eq!(arch.artifact_dir(), arch.docker_platform().replace('/', "-"));
    }
  }

  #[test]
  fn outline_atomics_disabled_only_on_aarch64() {
    assert!(Arch::X86_64.extra_cflags().is_empty());
    assert_eq!(Arch::Aarch64.extra_cflags(), &["-mno-outline-atomics"]);
  }
}

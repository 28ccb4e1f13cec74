use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forgeron_lib::consts::{DEFAULT_DIGESTS_DIR, DEFAULT_IMAGE};

mod cmd;
mod output;

use cmd::{cmd_build, cmd_deps, cmd_image, cmd_merge, cmd_status};

/// forgeron - Containerized static cross-compilation toolchains
#[derive(Parser)]
#[command(name = "forgeron")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the native libraries for a target into its shared prefix
  Deps {
    /// Target architecture (x86_64 or aarch64, defaults to the host)
    arch: Option<String>,

    /// Rebuild even when the prefix is already complete
    #[arg(short, long)]
    force: bool,

    /// Parallel jobs inside each library build (defaults to the CPU count)
    #[arg(short, long)]
    jobs: Option<usize>,
  },

  /// Assemble the builder image for a target from its completed prefix
  Image {
    /// Target architecture (defaults to the host)
    arch: Option<String>,

    /// Image repository to tag
    #[arg(long, default_value = DEFAULT_IMAGE)]
    repo: String,

    /// Push the image to the registry instead of loading it locally
    #[arg(long)]
    push: bool,

    /// Directory receiving the digest artifact
    #[arg(long, default_value = DEFAULT_DIGESTS_DIR)]
    digests_dir: PathBuf,
  },

  /// Build the release binary for a target inside its builder image
  Build {
    /// Target architecture (defaults to the host)
    arch: Option<String>,

    /// Application source tree to build
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Image repository to tag and run
    #[arg(long, default_value = DEFAULT_IMAGE)]
    repo: String,

    /// Push the builder image to the registry
    #[arg(long)]
    push: bool,

    /// Directory receiving the digest artifact
    #[arg(long, default_value = DEFAULT_DIGESTS_DIR)]
    digests_dir: PathBuf,

    /// Rebuild native libraries even when the prefix is complete
    #[arg(short, long)]
    force: bool,
  },

  /// Merge per-architecture image digests into one multi-platform tag
  Merge {
    /// Image repository holding the per-architecture images
    #[arg(long, default_value = DEFAULT_IMAGE)]
    repo: String,

    /// Directory holding the digest artifacts
    #[arg(long, default_value = DEFAULT_DIGESTS_DIR)]
    digests_dir: PathBuf,

    /// Date tag to publish (defaults to today, YYYYMMDD in UTC)
    #[arg(long)]
    date: Option<String>,

    /// Also move the floating latest tag
    #[arg(long)]
    latest: bool,
  },

  /// Show prefix completion and cache usage
  Status {
    /// Limit to one architecture (defaults to all)
    arch: Option<String>,

    /// Emit machine-readable JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_directive = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
  tracing_subscriber::fmt().with_env_filter(filter).without_time().init();

  match cli.command {
    Commands::Deps { arch, force, jobs } => cmd_deps(arch.as_deref(), force, jobs),
    Commands::Image {
      arch,
      repo,
      push,
      digests_dir,
    } => cmd_image(arch.as_deref(), &repo, push, &digests_dir),
    Commands::Build {
      arch,
      source,
      repo,
      push,
      digests_dir,
      force,
    } => cmd_build(arch.as_deref(), &source, &repo, &digests_dir, push, force),
    Commands::Merge {
      repo,
      digests_dir,
      date,
      latest,
    } => cmd_merge(&repo, &digests_dir, date.as_deref(), latest),
    Commands::Status { arch, json } => cmd_status(arch.as_deref(), json),
  }
}

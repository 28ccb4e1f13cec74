//! Per-library build recipes.
//!
//! A [`BuildStep`] is the fully resolved plan for one library on one
//! target: the exact tool invocations, in order, with any environment the
//! tool needs beyond the shared toolchain environment. Planning is pure so
//! recipes can be asserted in tests without running anything.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::deps::DependencySpec;
use crate::process::{self, ProcessError};
use crate::toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum StepError {
  #[error("no build recipe for dependency {0}")]
  NoRecipe(String),

  #[error("{dep} {stage} failed: {source}")]
  StageFailed {
    dep: String,
    stage: String,
    #[source]
    source: ProcessError,
  },
}

/// One tool invocation within a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  /// Short label for logs and errors ("configure", "build", "install").
  pub stage: &'static str,
  pub program: String,
  pub args: Vec<String>,
  /// Environment merged over the toolchain environment for this invocation.
  pub extra_env: BTreeMap<String, String>,
}

/// Resolved build plan for one library on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
  pub name: &'static str,
  pub version: &'static str,
  pub invocations: Vec<Invocation>,
}

/// Static archives each library must leave under the prefix's `lib` tree.
pub fn expected_artifacts(name: &str) -> &'static [&'static str] {
  match name {
    "zlib" => &["libz.a"],
    "openssl" => &["libssl.a", "libcrypto.a"],
    "libvpx" => &["libvpx.a"],
    "ffmpeg" => &["libavcodec.a", "libavformat.a", "libavutil.a", "libswresample.a", "libswscale.a"],
    "rlottie" => &["librlottie.a"],
    "opencv" => &[
      "libopencv_core.a",
      "libopencv_imgproc.a",
      "libopencv_imgcodecs.a",
      "libopencv_objdetect.a",
      // Bundled codec archives, renamed from liblib*.a by the fixup pass.
      "libwebp.a",
      "libpng.a",
    ],
    _ => &[],
  }
}

/// Parallelism for `make`/`cmake --build` within a single step.
pub fn default_jobs() -> usize {
  std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

/// Plan the invocations for `spec` on the toolchain's target.
///
/// `stage_root` is the `DESTDIR` the install lands in before promotion.
pub fn plan_step(
  spec: &DependencySpec,
  tc: &Toolchain,
  stage_root: &Path,
  jobs: usize,
) -> Result<BuildStep, StepError> {
  let prefix = tc.prefix().display().to_string();
  let stage = stage_root.display().to_string();
  let make_jobs = format!("-j{jobs}");
  let triple = tc.arch().musl_triple();

  let invocations = match spec.name {
    "zlib" => vec![
      Invocation {
        stage: "configure",
        program: "./configure".to_string(),
        args: vec![format!("--prefix={prefix}"), "--static".to_string()],
        extra_env: BTreeMap::new(),
      },
      make(&make_jobs),
      make_install(&stage),
    ],

    "openssl" => vec![
      Invocation {
        stage: "configure",
        program: "./Configure".to_string(),
        args: vec![
          tc.arch().openssl_target().to_string(),
          format!("--prefix={prefix}"),
          format!("--openssldir={prefix}/ssl"),
          "--libdir=lib".to_string(),
          "no-shared".to_string(),
          "no-tests".to_string(),
          "no-apps".to_string(),
          "no-engine".to_string(),
          "zlib".to_string(),
          format!("--with-zlib-include={prefix}/include"),
          format!("--with-zlib-lib={prefix}/lib"),
        ],
        extra_env: BTreeMap::new(),
      },
      make(&make_jobs),
      Invocation {
        stage: "install",
        program: "make".to_string(),
        args: vec!["install_sw".to_string(), format!("DESTDIR={stage}")],
        extra_env: BTreeMap::new(),
      },
    ],

    "libvpx" => vec![
      Invocation {
        stage: "configure",
        program: "./configure".to_string(),
        args: vec![
          format!("--target={}", tc.arch().vpx_target()),
          format!("--prefix={prefix}"),
          "--disable-shared".to_string(),
          "--enable-static".to_string(),
          "--enable-pic".to_string(),
          "--disable-examples".to_string(),
          "--disable-tools".to_string(),
          "--disable-docs".to_string(),
          "--disable-unit-tests".to_string(),
        ],
        // libvpx derives its cross tools from CROSS, not CC.
        extra_env: BTreeMap::from([("CROSS".to_string(), format!("{triple}-"))]),
      },
      make(&make_jobs),
      make_install(&stage),
    ],

    "ffmpeg" => vec![
      Invocation {
        stage: "configure",
        program: "./configure".to_string(),
        args: vec![
          format!("--prefix={prefix}"),
          "--pkg-config=pkg-config".to_string(),
          "--pkg-config-flags=--static".to_string(),
          "--enable-cross-compile".to_string(),
          format!("--cross-prefix={triple}-"),
          format!("--arch={}", tc.arch()),
          "--target-os=linux".to_string(),
          format!("--cc={}", tc.cc()),
          format!("--cxx={}", tc.cxx()),
          "--enable-static".to_string(),
          "--disable-shared".to_string(),
          "--disable-programs".to_string(),
          "--disable-doc".to_string(),
          "--disable-autodetect".to_string(),
          "--enable-zlib".to_string(),
          "--enable-openssl".to_string(),
          "--enable-libvpx".to_string(),
        ],
        extra_env: BTreeMap::new(),
      },
      make(&make_jobs),
      make_install(&stage),
    ],

    "rlottie" => vec![
      cmake_configure(
        &prefix,
        tc,
        &[
          "-DLOTTIE_MODULE=OFF",
          "-DLOTTIE_TEST=OFF",
          "-DLOTTIE_EXAMPLE=OFF",
        ],
      ),
      cmake_build(jobs),
      cmake_install(&stage),
    ],

    "opencv" => vec![
      cmake_configure(
        &prefix,
        tc,
        &[
          "-DBUILD_LIST=core,imgproc,imgcodecs,objdetect",
          "-DBUILD_opencv_apps=OFF",
          "-DBUILD_TESTS=OFF",
          "-DBUILD_PERF_TESTS=OFF",
          "-DBUILD_EXAMPLES=OFF",
          // Bundled codecs become the static 3rdparty archives; zlib comes
          // from the prefix instead.
          "-DBUILD_JPEG=ON",
          "-DBUILD_PNG=ON",
          "-DBUILD_TIFF=ON",
          "-DBUILD_WEBP=ON",
          "-DBUILD_OPENJPEG=ON",
          "-DBUILD_ZLIB=OFF",
          "-DWITH_FFMPEG=OFF",
          "-DWITH_GTK=OFF",
          "-DWITH_QT=OFF",
          "-DWITH_V4L=OFF",
          "-DWITH_OPENCL=OFF",
          "-DWITH_IPP=OFF",
          "-DOPENCV_GENERATE_PKGCONFIG=ON",
        ],
      ),
      cmake_build(jobs),
      cmake_install(&stage),
    ],

    other => return Err(StepError::NoRecipe(other.to_string())),
  };

  Ok(BuildStep {
    name: spec.name,
    version: spec.version,
    invocations,
  })
}

fn make(jobs_flag: &str) -> Invocation {
  Invocation {
    stage: "build",
    program: "make".to_string(),
    args: vec![jobs_flag.to_string()],
    extra_env: BTreeMap::new(),
  }
}

fn make_install(stage: &str) -> Invocation {
  Invocation {
    stage: "install",
    program: "make".to_string(),
    args: vec!["install".to_string(), format!("DESTDIR={stage}")],
    extra_env: BTreeMap::new(),
  }
}

fn cmake_configure(prefix: &str, tc: &Toolchain, extra: &[&str]) -> Invocation {
  let mut args = vec![
    "-S".to_string(),
    ".".to_string(),
    "-B".to_string(),
    "build".to_string(),
    "-DCMAKE_BUILD_TYPE=Release".to_string(),
    format!("-DCMAKE_INSTALL_PREFIX={prefix}"),
    "-DCMAKE_SYSTEM_NAME=Linux".to_string(),
    format!("-DCMAKE_SYSTEM_PROCESSOR={}", tc.arch()),
    format!("-DCMAKE_C_COMPILER={}", tc.cc()),
    format!("-DCMAKE_CXX_COMPILER={}", tc.cxx()),
    format!("-DCMAKE_FIND_ROOT_PATH={prefix}"),
    "-DBUILD_SHARED_LIBS=OFF".to_string(),
  ];
  args.extend(extra.iter().map(|s| s.to_string()));

  Invocation {
    stage: "configure",
    program: "cmake".to_string(),
    args,
    extra_env: BTreeMap::new(),
  }
}

fn cmake_build(jobs: usize) -> Invocation {
  Invocation {
    stage: "build",
    program: "cmake".to_string(),
    args: vec![
      "--build".to_string(),
      "build".to_string(),
      "--parallel".to_string(),
      jobs.to_string(),
    ],
    extra_env: BTreeMap::new(),
  }
}

fn cmake_install(stage: &str) -> Invocation {
  Invocation {
    stage: "install",
    program: "cmake".to_string(),
    args: vec!["--install".to_string(), "build".to_string()],
    // cmake --install honors DESTDIR from the environment only.
    extra_env: BTreeMap::from([("DESTDIR".to_string(), stage.to_string())]),
  }
}

/// Run every invocation of a step in `src_dir`, appending output to `log`.
///
/// `base_env` is the shared toolchain environment; invocation extras are
/// layered over it.
pub async fn run_step(
  step: &BuildStep,
  base_env: &BTreeMap<String, String>,
  src_dir: &Path,
  log: &Path,
) -> Result<(), StepError> {
  for invocation in &step.invocations {
    info!(dep = %step.name, stage = %invocation.stage, "running stage");

    let mut env = base_env.clone();
    env.extend(invocation.extra_env.clone());

    process::run_logged(&invocation.program, &invocation.args, src_dir, &env, log)
      .await
      .map_err(|source| StepError::StageFailed {
        dep: step.name.to_string(),
        stage: invocation.stage.to_string(),
        source,
      })?;
  }

  Ok(())
}

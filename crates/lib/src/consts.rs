//! Shared constants: names, environment variables, fixed paths.

/// Application name, used for cache directories and lock metadata.
pub const APP_NAME: &str = "forgeron";

/// Overrides the dependency cache root (downloads, cargo cache, work dirs).
pub const ENV_CACHE_DIR: &str = "FORGERON_CACHE_DIR";

/// Overrides the default optimization flags, forwarded verbatim into every
/// compiler invocation of a run.
pub const ENV_OPT_FLAGS: &str = "FORGERON_OPT_FLAGS";

/// Prefix for the per-architecture extra compiler flag variables
/// (`FORGERON_EXTRA_CFLAGS_X86_64`, `FORGERON_EXTRA_CFLAGS_AARCH64`).
/// The value is appended verbatim to CFLAGS, only for the matching target.
pub const ENV_EXTRA_CFLAGS_PREFIX: &str = "FORGERON_EXTRA_CFLAGS_";

/// Default optimization flags when `FORGERON_OPT_FLAGS` is unset.
pub const DEFAULT_OPT_FLAGS: &str = "-O2";

/// Root under which each target's installation prefix lives. The prefix path
/// must be identical on the build host and inside the builder image, because
/// installed pkg-config metadata embeds it.
pub const DEFAULT_PREFIX_ROOT: &str = "/opt/forgeron";

/// Marker file written into a prefix after every dependency installed and
/// verified. A prefix without this marker is treated as partial.
pub const PREFIX_MARKER: &str = ".forgeron-complete";

/// Default builder image repository.
pub const DEFAULT_IMAGE: &str = "forgeron-builder";

/// Base image for the generated builder Dockerfile.
pub const BASE_IMAGE: &str = "rust:1.82-alpine3.20";

/// Default directory for per-architecture digest artifact exchange.
pub const DEFAULT_DIGESTS_DIR: &str = "digests";

/// Mount point of the application source tree inside the builder container.
pub const CONTAINER_SRC_DIR: &str = "/src";

/// Mount point of the persistent cargo cache inside the builder container.
pub const CONTAINER_CARGO_HOME: &str = "/cache/cargo";

/// Fixed `SOURCE_DATE_EPOCH` exported to every build step so repeated runs
/// produce identical artifacts modulo timestamps.
/// Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

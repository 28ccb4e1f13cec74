//! forgeron-lib: build orchestration for static cross-compilation
//!
//! This crate provides the pieces the `forgeron` CLI drives:
//! - `deps`: the pinned native library catalog and its dependency graph
//! - `pipeline`: fetch, compile and install each library into a shared prefix
//! - `image`: assemble builder images from a completed prefix
//! - `driver`: run per-architecture release builds inside those images
//! - `merge`: combine per-architecture images into one multi-platform tag

pub mod arch;
pub mod consts;
pub mod deps;
pub mod driver;
pub mod extract;
pub mod fetch;
pub mod image;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod pipeline;
pub mod prefix;
pub mod process;
pub mod toolchain;

mod build;
mod deps;
mod image;
mod merge;
mod status;

pub use build::cmd_build;
pub use deps::cmd_deps;
pub use image::cmd_image;
pub use merge::cmd_merge;
pub use status::cmd_status;

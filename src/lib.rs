pub mod connection;
pub mod engine;
pub mod http;
pub mod models;
pub mod probe;
mod worker;

/// Convenient re-exports of the public surface.
pub mod prelude {
    pub use crate::engine::DownloadEngine;
    pub use crate::models::{ChunkSpan, DownloadOptions, Progress, ProgressFn};
}

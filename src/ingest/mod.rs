//! Frame ingestion.
//!
//! - Local video files decoded with FFmpeg (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` clips for tests and dry runs
//! - Frame decimation ahead of inference
//!
//! A session opens exactly one source through a [`SourceFactory`] and releases
//! it exactly once when the session ends, however it ends.

mod decimate;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::Result;

use crate::frame::RawFrame;

pub use decimate::FrameDecimator;
pub use file::{FileSource, FileSourceFactory, FileStats};

/// Successive decoded frames from one video.
pub trait FrameSource: Send {
    /// Next frame in decode order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Free decoder resources. Further calls to `next_frame` return `None`.
    fn release(&mut self);

    /// Decode statistics so far.
    fn stats(&self) -> FileStats;
}

/// Opens frame sources for paths handed to the controller.
pub trait SourceFactory: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>>;
}

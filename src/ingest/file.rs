//! Local file frame source.
//!
//! `FileSource` yields decoded RGB frames from a local video file (MP4, AVI or
//! anything else the FFmpeg build can demux), or from a synthetic `stub://`
//! clip. Synthetic clips take their shape from query parameters:
//! `stub://clip?frames=10&width=64&height=48`. Without `frames` the clip never
//! ends.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, SourceFactory};
use crate::frame::RawFrame;

const STUB_SCHEME: &str = "stub://";
const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 480;

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
    Released { frames_decoded: u64 },
}

impl FileSource {
    /// Open `path` for decoding. Fails if the path is not local, does not
    /// exist, or cannot be demuxed.
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if let Some(spec) = path.strip_prefix(STUB_SCHEME) {
            FileBackend::Synthetic(SyntheticFileSource::parse(spec)?)
        } else {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("cannot open video '{}'", path))?;
            if !meta.is_file() {
                return Err(anyhow!("'{}' is not a file", path));
            }
            open_decoder(path)?
        };
        log::info!("FileSource: opened {}", path);
        Ok(Self {
            path: path.to_string(),
            backend,
        })
    }

    pub fn is_released(&self) -> bool {
        matches!(self.backend, FileBackend::Released { .. })
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_decoder(path: &str) -> Result<FileBackend> {
    Ok(FileBackend::Ffmpeg(Box::new(FfmpegFileSource::open(path)?)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_decoder(_path: &str) -> Result<FileBackend> {
    Err(anyhow!(
        "video decoding requires the ingest-file-ffmpeg feature"
    ))
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            FileBackend::Released { .. } => Ok(None),
        }
    }

    fn release(&mut self) {
        if self.is_released() {
            return;
        }
        let frames_decoded = self.stats().frames_decoded;
        // Dropping the backend closes the demuxer and decoder.
        self.backend = FileBackend::Released { frames_decoded };
        log::info!(
            "FileSource: released {} after {} frames",
            self.path,
            frames_decoded
        );
    }

    fn stats(&self) -> FileStats {
        let frames_decoded = match &self.backend {
            FileBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_decoded(),
            FileBackend::Released { frames_decoded } => *frames_decoded,
        };
        FileStats {
            frames_decoded,
            path: self.path.clone(),
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

/// Opens [`FileSource`]s. The production factory.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSourceFactory;

impl SourceFactory for FileSourceFactory {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FileSource::open(path)?))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    width: u32,
    height: u32,
    total_frames: Option<u64>,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn parse(spec: &str) -> Result<Self> {
        let mut source = Self {
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
            total_frames: None,
            frame_count: 0,
        };
        let Some((_, query)) = spec.split_once('?') else {
            return Ok(source);
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            let parse = |value: &str| -> Result<u64> {
                value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("stub parameter '{}' must be an integer", key))
            };
            let dimension = |value: &str| -> Result<u32> {
                u32::try_from(parse(value)?)
                    .map_err(|_| anyhow!("stub parameter '{}' is too large", key))
            };
            match key {
                "frames" => source.total_frames = Some(parse(value)?),
                "width" => source.width = dimension(value)?,
                "height" => source.height = dimension(value)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(source)
    }

    fn next_frame(&mut self) -> Option<RawFrame> {
        if self
            .total_frames
            .is_some_and(|total| self.frame_count >= total)
        {
            return None;
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Some(RawFrame::new(
            pixels,
            self.width,
            self.height,
            self.frame_count,
        ))
    }

    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count) % 256) as u8)
            .collect()
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

/// Container formats offered by the file picker.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi"];

/// True when the path carries one of [`VIDEO_EXTENSIONS`].
pub fn has_video_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

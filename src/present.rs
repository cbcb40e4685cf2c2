//! Presentation side of the frame hand-off.
//!
//! Workers send finished frames over a bounded channel; the presentation
//! context receives them through [`FrameReceiver`] and passes them to a
//! [`PresentationSink`]. With the default zero-capacity channel a worker
//! cannot run ahead of the display.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::frame::AnnotatedFrame;

/// Consumes finished frames. Runs on the presentation context only.
pub trait PresentationSink {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()>;
}

/// Receiving end of the frame hand-off. Frames from any session other than
/// the active one are dropped, so a worker abandoned by a forced stop cannot
/// paint over its successor.
pub struct FrameReceiver {
    rx: Receiver<AnnotatedFrame>,
    active_session: Arc<AtomicU64>,
}

impl FrameReceiver {
    pub(crate) fn new(rx: Receiver<AnnotatedFrame>, active_session: Arc<AtomicU64>) -> Self {
        Self { rx, active_session }
    }

    /// Wait up to `timeout` for a frame of the active session. `Ok(None)` on
    /// timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<AnnotatedFrame>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(frame) if self.is_current(&frame) => return Ok(Some(frame)),
                Ok(frame) => {
                    log::debug!(
                        "dropping frame {} of stale session {}",
                        frame.position,
                        frame.session
                    );
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow::anyhow!("pipeline controller dropped"))
                }
            }
        }
    }

    fn is_current(&self, frame: &AnnotatedFrame) -> bool {
        frame.session == self.active_session.load(Ordering::Acquire)
    }
}

/// Discards frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn present(&mut self, _frame: &AnnotatedFrame) -> Result<()> {
        Ok(())
    }
}

/// Writes each frame as `session-<id>-frame-<position>.jpg` into a directory.
pub struct JpegDirectorySink {
    dir: PathBuf,
    written: u64,
}

impl JpegDirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir, written: 0 })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn frame_path(&self, frame: &AnnotatedFrame) -> PathBuf {
        self.dir.join(format!(
            "session-{}-frame-{:06}.jpg",
            frame.session, frame.position
        ))
    }
}

impl PresentationSink for JpegDirectorySink {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        let path = self.frame_path(frame);
        frame
            .image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(session: u64, position: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            session,
            position,
            image: RgbImage::new(8, 8),
            detections: Vec::new(),
            overlays: Vec::new(),
        }
    }

    #[test]
    fn stale_session_frames_are_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let active = Arc::new(AtomicU64::new(2));
        let receiver = FrameReceiver::new(rx, active);

        tx.send(frame(1, 3)).unwrap();
        tx.send(frame(2, 6)).unwrap();

        let received = receiver
            .recv_timeout(Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert_eq!((received.session, received.position), (2, 6));
        assert!(receiver
            .recv_timeout(Duration::from_millis(10))
            .unwrap()
            .is_none());
    }

    #[test]
    fn disconnected_channel_is_an_error() {
        let (tx, rx) = crossbeam_channel::unbounded::<AnnotatedFrame>();
        drop(tx);
        let receiver = FrameReceiver::new(rx, Arc::new(AtomicU64::new(1)));
        assert!(receiver.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn jpeg_sink_writes_one_file_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JpegDirectorySink::new(dir.path().join("out")).unwrap();
        sink.present(&frame(3, 12)).unwrap();
        assert_eq!(sink.written(), 1);
        assert!(dir
            .path()
            .join("out")
            .join("session-3-frame-000012.jpg")
            .is_file());
    }
}

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{SendTimeoutError, Sender};

use super::notice::Notification;
use super::session::{CancellationToken, RunState, SessionResources, SessionState};
use crate::detect::{DetectionFilter, ModelDescriptor};
use crate::frame::{AnnotatedFrame, ModelInput};
use crate::ingest::FrameDecimator;
use crate::render::OverlayRenderer;

const HAND_OFF_POLL: Duration = Duration::from_millis(20);

/// Why the frame loop stopped without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopExit {
    EndOfStream,
    Cancelled,
}

/// Everything one session's background thread owns or shares.
pub(crate) struct Worker {
    pub(crate) session: u64,
    pub(crate) path: String,
    pub(crate) resources: Arc<SessionResources>,
    pub(crate) state: SessionState,
    pub(crate) cancel: CancellationToken,
    pub(crate) decimator: FrameDecimator,
    pub(crate) filter: DetectionFilter,
    pub(crate) renderer: OverlayRenderer,
    pub(crate) descriptor: ModelDescriptor,
    pub(crate) presentation: (u32, u32),
    pub(crate) frame_delay: Duration,
    pub(crate) frames: Sender<AnnotatedFrame>,
    pub(crate) notices: Sender<Notification>,
    /// Dropped when the worker exits; the controller waits on its receiver.
    pub(crate) done: Sender<()>,
    pub(crate) processed: u64,
}

impl Worker {
    /// Thread body. Every exit path, including a panic inside a collaborator,
    /// releases the session's resources before the done signal drops.
    pub(crate) fn run(mut self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop()))
            .unwrap_or_else(|_| Err(anyhow!("processing thread panicked")));

        self.resources.release();
        let frames_decoded = self.decimator.seen();

        match result {
            Ok(LoopExit::EndOfStream) => {
                log::info!(
                    "session {}: end of stream after {} frames ({} processed)",
                    self.session,
                    frames_decoded,
                    self.processed
                );
                if self.state.transition(RunState::Running, RunState::Completed) {
                    self.notify(Notification::Completed {
                        path: self.path.clone(),
                        frames_decoded,
                        frames_processed: self.processed,
                    });
                }
            }
            Ok(LoopExit::Cancelled) => {
                log::info!(
                    "session {}: cancelled after {} frames ({} processed)",
                    self.session,
                    frames_decoded,
                    self.processed
                );
            }
            Err(err) => {
                log::error!("session {}: processing failed: {:#}", self.session, err);
                if self.state.transition(RunState::Running, RunState::Failed) {
                    self.notify(Notification::Failed {
                        path: self.path.clone(),
                        message: format!("{:#}", err),
                    });
                }
            }
        }
        drop(self.done);
    }

    fn run_loop(&mut self) -> Result<LoopExit> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            let next = {
                let mut slot = self
                    .resources
                    .source
                    .lock()
                    .map_err(|_| anyhow!("frame source lock poisoned"))?;
                match slot.as_mut() {
                    Some(source) => source.next_frame()?,
                    // Released out from under us by a forced stop.
                    None => return Ok(LoopExit::Cancelled),
                }
            };
            let frame = match next {
                Some(frame) if !frame.is_empty() => frame,
                Some(frame) => {
                    log::warn!(
                        "session {}: empty frame at position {}, ending stream",
                        self.session,
                        frame.position
                    );
                    return Ok(LoopExit::EndOfStream);
                }
                None => return Ok(LoopExit::EndOfStream),
            };

            let Some(position) = self.decimator.accept() else {
                continue;
            };

            let (width, height) = self.presentation;
            let image = frame.to_presentation(width, height)?;
            let input = ModelInput::from_image(&image, &self.descriptor);
            let candidates = {
                let mut slot = self
                    .resources
                    .engine
                    .lock()
                    .map_err(|_| anyhow!("inference engine lock poisoned"))?;
                match slot.as_mut() {
                    Some(engine) => engine.infer(&input)?,
                    None => return Ok(LoopExit::Cancelled),
                }
            };
            // A stop may have timed out while inference ran.
            if self.cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }
            let detections = self.filter.apply(&candidates, image.width(), image.height());
            let annotated = self
                .renderer
                .render(self.session, position, image, detections);

            if !self.hand_off(annotated)? {
                return Ok(LoopExit::Cancelled);
            }
            self.processed += 1;

            if !self.frame_delay.is_zero() {
                std::thread::sleep(self.frame_delay);
            }
        }
    }

    /// Blocks until the presentation side takes the frame. Returns `false`
    /// when cancelled while waiting.
    fn hand_off(&self, mut frame: AnnotatedFrame) -> Result<bool> {
        loop {
            match self.frames.send_timeout(frame, HAND_OFF_POLL) {
                Ok(()) => return Ok(true),
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.cancel.is_cancelled() {
                        return Ok(false);
                    }
                    frame = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(anyhow!("presentation sink disconnected"))
                }
            }
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notices.send(notification).is_err() {
            log::debug!("session {}: notification dropped, no listener", self.session);
        }
    }
}

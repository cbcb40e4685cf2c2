use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};

use super::notice::Notification;
use super::session::{CancellationToken, RunState, SessionResources, SessionState};
use super::teardown::{stop_session, ActiveSession, StopOutcome};
use super::worker::Worker;
use crate::config::PipelineConfig;
use crate::detect::{
    ClassNames, ClassPolicy, DetectionFilter, EngineLoader, InferenceEngine, ModelArtifacts,
    ModelDescriptor, PolicyHandle, PolicySource,
};
use crate::frame::AnnotatedFrame;
use crate::ingest::{FrameDecimator, FrameSource, SourceFactory};
use crate::present::FrameReceiver;
use crate::render::OverlayRenderer;

/// Receiving ends handed to the presentation side.
pub struct PipelineOutputs {
    pub frames: FrameReceiver,
    pub notices: Receiver<Notification>,
}

/// Owns at most one session and drives its lifecycle.
///
/// `start`, `stop` and `replay` are called from the UI side; the frame loop
/// runs on a dedicated thread per session. A new session is only created after
/// the previous one is fully torn down, so two frame sources are never open at
/// once.
pub struct PipelineController {
    config: PipelineConfig,
    artifacts: ModelArtifacts,
    sources: Arc<dyn SourceFactory>,
    engines: Arc<dyn EngineLoader>,
    policy: PolicyHandle,
    frames_tx: Sender<AnnotatedFrame>,
    notices_tx: Sender<Notification>,
    active_session: Arc<AtomicU64>,
    next_session: u64,
    session: Option<ActiveSession>,
    last_path: Option<String>,
}

/// What a session needs from the model side before its worker can start.
struct PreparedModel {
    engine: Box<dyn InferenceEngine>,
    descriptor: ModelDescriptor,
    filter: DetectionFilter,
    renderer: OverlayRenderer,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        sources: Arc<dyn SourceFactory>,
        engines: Arc<dyn EngineLoader>,
    ) -> (Self, PipelineOutputs) {
        let (frames_tx, frames_rx) = crossbeam_channel::bounded(config.frame_queue);
        let (notices_tx, notices_rx) = crossbeam_channel::unbounded();
        let active_session = Arc::new(AtomicU64::new(0));
        let policy = PolicyHandle::new(config.policy);
        let artifacts = config.artifacts();

        let controller = Self {
            config,
            artifacts,
            sources,
            engines,
            policy,
            frames_tx,
            notices_tx,
            active_session: active_session.clone(),
            next_session: 0,
            session: None,
            last_path: None,
        };
        let outputs = PipelineOutputs {
            frames: FrameReceiver::new(frames_rx, active_session),
            notices: notices_rx,
        };
        (controller, outputs)
    }

    /// Start processing `path`, stopping any active session first.
    ///
    /// Reports `CouldNotOpen` and returns an error without spawning a worker
    /// when the source cannot be opened; likewise reports `Failed` when the
    /// model artifacts cannot be loaded. Returns the new session id.
    pub fn start(&mut self, path: &str) -> Result<u64> {
        self.stop();
        self.last_path = Some(path.to_string());

        let source = match self.sources.open(path) {
            Ok(source) => source,
            Err(err) => {
                log::warn!("could not open video {}: {:#}", path, err);
                self.notify(Notification::CouldNotOpen {
                    path: path.to_string(),
                    reason: format!("{:#}", err),
                });
                return Err(err.context(format!("could not open video {}", path)));
            }
        };

        let prepared = match self.prepare_model() {
            Ok(prepared) => prepared,
            Err(err) => {
                release_source(source);
                log::error!("model unavailable for {}: {:#}", path, err);
                self.notify(Notification::Failed {
                    path: path.to_string(),
                    message: format!("{:#}", err),
                });
                return Err(err);
            }
        };

        self.spawn_session(path, source, prepared)
    }

    /// Stop the active session, if any. Never blocks longer than the
    /// configured stop timeout plus the release of the session's handles.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(session) = self.session.take() else {
            return StopOutcome::NotRunning;
        };
        self.active_session.store(0, Ordering::Release);
        let id = session.id;
        let outcome = stop_session(session, self.config.stop_timeout);
        log::info!("session {} stopped ({:?})", id, outcome);
        outcome
    }

    /// Restart `path` from its first frame with a freshly opened source.
    pub fn replay(&mut self, path: &str) -> Result<u64> {
        self.stop();
        self.start(path)
    }

    /// Replay the most recently started path.
    pub fn replay_current(&mut self) -> Result<u64> {
        match self.last_path.clone() {
            Some(path) => self.replay(&path),
            None => {
                self.notify(Notification::NoVideoSelected);
                Err(anyhow!("no video selected"))
            }
        }
    }

    /// Lifecycle state. Sessions that completed or failed have already been
    /// torn down by their worker and read as `Idle`.
    pub fn state(&self) -> RunState {
        match &self.session {
            Some(session) => match session.state.load() {
                RunState::Completed | RunState::Failed => RunState::Idle,
                state => state,
            },
            None => RunState::Idle,
        }
    }

    /// Terminal state of the current session, if it ended on its own.
    pub fn outcome(&self) -> Option<RunState> {
        self.session
            .as_ref()
            .map(|session| session.state.load())
            .filter(|state| matches!(state, RunState::Completed | RunState::Failed))
    }

    pub fn current_session(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn current_path(&self) -> Option<&str> {
        self.last_path.as_deref()
    }

    /// Update the live class-policy toggles. Changes reach a running session
    /// on its next detection. The fixed allow-list variant ignores them.
    pub fn set_policy(&self, selection: Option<ClassPolicy>) {
        if self.config.fixed_allow_list {
            log::warn!("class policy is fixed to the allow-list; toggle ignored");
        }
        self.policy.set(selection);
    }

    fn prepare_model(&self) -> Result<PreparedModel> {
        self.artifacts.verify()?;
        let classes = ClassNames::load(&self.artifacts.class_names)?;
        let loaded = self
            .engines
            .load(&self.artifacts)
            .with_context(|| format!("failed to load {} backend", self.engines.name()))?;
        log::info!(
            "loaded {} engine ({} classes, input {}x{})",
            loaded.engine.name(),
            classes.len(),
            loaded.descriptor.input_width,
            loaded.descriptor.input_height
        );

        let source = if self.config.fixed_allow_list {
            PolicySource::Fixed
        } else {
            PolicySource::Toggles(self.policy.clone())
        };
        let filter = DetectionFilter::new(classes, source, self.config.allow_list.clone());
        let renderer = match &self.config.label_font {
            Some(font) => OverlayRenderer::with_font_file(self.config.data_dir.join(font))?,
            None => OverlayRenderer::new(),
        };

        Ok(PreparedModel {
            engine: loaded.engine,
            descriptor: loaded.descriptor,
            filter,
            renderer,
        })
    }

    fn spawn_session(
        &mut self,
        path: &str,
        source: Box<dyn FrameSource>,
        prepared: PreparedModel,
    ) -> Result<u64> {
        self.next_session += 1;
        let id = self.next_session;
        let decimator = FrameDecimator::new(self.config.frame_skip)?;
        let resources = Arc::new(SessionResources::new(source, prepared.engine));
        let state = SessionState::new(RunState::Running);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);

        let worker = Worker {
            session: id,
            path: path.to_string(),
            resources: resources.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            decimator,
            filter: prepared.filter,
            renderer: prepared.renderer,
            descriptor: prepared.descriptor,
            presentation: (self.config.presentation_width, self.config.presentation_height),
            frame_delay: self.config.frame_delay,
            frames: self.frames_tx.clone(),
            notices: self.notices_tx.clone(),
            done: done_tx,
            processed: 0,
        };

        // Publish before the first frame can be sent.
        self.active_session.store(id, Ordering::Release);
        let join = match std::thread::Builder::new()
            .name(format!("vidsight-session-{}", id))
            .spawn(move || worker.run())
        {
            Ok(join) => join,
            Err(err) => {
                self.active_session.store(0, Ordering::Release);
                resources.release();
                return Err(anyhow!("failed to spawn processing thread: {}", err));
            }
        };

        log::info!(
            "session {} started for {} (frame skip {})",
            id,
            path,
            self.config.frame_skip
        );
        self.session = Some(ActiveSession {
            id,
            path: path.to_string(),
            state,
            cancel,
            resources,
            done: done_rx,
            join: Some(join),
        });
        Ok(id)
    }

    fn notify(&self, notification: Notification) {
        if self.notices_tx.send(notification).is_err() {
            log::debug!("notification dropped, no listener");
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn release_source(mut source: Box<dyn FrameSource>) {
    source.release();
}

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::session::{CancellationToken, RunState, SessionResources, SessionState};

/// Controller-side handle on a running session.
pub(crate) struct ActiveSession {
    pub(crate) id: u64,
    pub(crate) path: String,
    pub(crate) state: SessionState,
    pub(crate) cancel: CancellationToken,
    pub(crate) resources: Arc<SessionResources>,
    pub(crate) done: Receiver<()>,
    pub(crate) join: Option<JoinHandle<()>>,
}

/// How a stop request was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no session to stop.
    NotRunning,
    /// The worker exited within the timeout and was joined.
    Joined,
    /// The worker did not exit in time; its resources were released anyway
    /// and the thread was left to finish on its own.
    ForcedRelease,
}

/// Bounded-wait-then-force-release teardown.
///
/// Signals cancellation, waits up to `timeout` for the worker to exit, then
/// releases the frame source and engine whether or not it did. After a timeout
/// the release never waits: a handle the worker is inside (a slow inference or
/// decode call) is released by the worker when that call returns. Always
/// leaves the session `Idle` within `timeout` plus the release itself.
pub(crate) fn stop_session(mut session: ActiveSession, timeout: Duration) -> StopOutcome {
    session.cancel.cancel();
    session
        .state
        .transition(RunState::Running, RunState::StopRequested);

    let outcome = match session.done.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if let Some(join) = session.join.take() {
                if join.join().is_err() {
                    log::error!("session {}: worker thread panicked", session.id);
                }
            }
            session.resources.release();
            StopOutcome::Joined
        }
        Err(RecvTimeoutError::Timeout) => {
            log::debug!(
                "session {}: worker still busy after {:?}, forcing release of {}",
                session.id,
                timeout,
                session.path
            );
            // Detach; the thread exits at its next checkpoint.
            drop(session.join.take());
            if !session.resources.try_release() {
                log::debug!(
                    "session {}: worker still holds a handle, it releases it on exit",
                    session.id
                );
            }
            StopOutcome::ForcedRelease
        }
    };

    session.state.store(RunState::Idle);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubEngine;
    use crate::ingest::FileSource;

    fn session_with_worker<F>(body: F) -> ActiveSession
    where
        F: FnOnce(crossbeam_channel::Sender<()>, CancellationToken) + Send + 'static,
    {
        let source = FileSource::open("stub://clip?width=2&height=2").unwrap();
        let resources = Arc::new(SessionResources::new(
            Box::new(source),
            Box::new(StubEngine::default()),
        ));
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let join = std::thread::spawn(move || body(done_tx, worker_cancel));
        ActiveSession {
            id: 1,
            path: "stub://clip".to_string(),
            state: SessionState::new(RunState::Running),
            cancel,
            resources,
            done: done_rx,
            join: Some(join),
        }
    }

    #[test]
    fn cooperative_worker_is_joined() {
        let session = session_with_worker(|done, cancel| {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            drop(done);
        });
        let resources = session.resources.clone();
        let state = session.state.clone();

        assert_eq!(
            stop_session(session, Duration::from_secs(5)),
            StopOutcome::Joined
        );
        assert!(resources.is_released());
        assert_eq!(state.load(), RunState::Idle);
    }

    #[test]
    fn stuck_worker_is_released_after_timeout() {
        let (unblock_tx, unblock_rx) = crossbeam_channel::bounded::<()>(0);
        let session = session_with_worker(move |done, _cancel| {
            // Simulates a hand-off nobody is consuming.
            let _ = unblock_rx.recv();
            drop(done);
        });
        let resources = session.resources.clone();
        let state = session.state.clone();

        let started = std::time::Instant::now();
        assert_eq!(
            stop_session(session, Duration::from_millis(50)),
            StopOutcome::ForcedRelease
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(resources.is_released());
        assert_eq!(state.load(), RunState::Idle);
        drop(unblock_tx);
    }
}

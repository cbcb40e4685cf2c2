use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, TryLockResult};

use crate::detect::InferenceEngine;
use crate::ingest::FrameSource;

/// Lifecycle of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    StopRequested,
    Completed,
    Failed,
}

impl RunState {
    fn to_bits(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::StopRequested => 2,
            RunState::Completed => 3,
            RunState::Failed => 4,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => RunState::Running,
            2 => RunState::StopRequested,
            3 => RunState::Completed,
            4 => RunState::Failed,
            _ => RunState::Idle,
        }
    }

    /// Running or stopping: the session still owns its resources.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::StopRequested)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::StopRequested => "stop-requested",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomic run state shared by the controller and its worker.
///
/// The controller moves `Idle -> Running`, `Running -> StopRequested` and
/// back to `Idle`; the worker only moves `Running -> Completed | Failed`.
#[derive(Clone, Debug)]
pub struct SessionState {
    bits: Arc<AtomicU8>,
}

impl SessionState {
    pub fn new(state: RunState) -> Self {
        Self {
            bits: Arc::new(AtomicU8::new(state.to_bits())),
        }
    }

    pub fn load(&self) -> RunState {
        RunState::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn store(&self, state: RunState) {
        self.bits.store(state.to_bits(), Ordering::Release);
    }

    /// Move `from -> to` only if the state is still `from`.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.bits
            .compare_exchange(
                from.to_bits(),
                to.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Cooperative stop flag. The worker polls it once per loop iteration and
/// while waiting on the frame hand-off; it does not interrupt inference.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The exclusively owned handles of one session.
///
/// Both the worker (on exit) and the controller (on forced release) may
/// release them; whoever comes first takes them out of their slot, so each is
/// released exactly once.
pub(crate) struct SessionResources {
    pub(crate) source: Mutex<Option<Box<dyn FrameSource>>>,
    pub(crate) engine: Mutex<Option<Box<dyn InferenceEngine>>>,
}

impl SessionResources {
    pub(crate) fn new(source: Box<dyn FrameSource>, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            engine: Mutex::new(Some(engine)),
        }
    }

    /// Release whatever is still held. Returns true if this call released the
    /// frame source.
    pub(crate) fn release(&self) -> bool {
        let source = recover(self.source.lock()).take();
        let released_source = match source {
            Some(mut source) => {
                source.release();
                true
            }
            None => false,
        };
        drop(recover(self.engine.lock()).take());
        released_source
    }

    /// Release without waiting, for the forced-release path. A slot the worker
    /// is still using (an inference or decode call in progress) is left for
    /// the worker's own exit release. Returns true when both slots are empty.
    pub(crate) fn try_release(&self) -> bool {
        let source_clear = match try_recover(self.source.try_lock()) {
            Some(mut slot) => {
                if let Some(mut source) = slot.take() {
                    source.release();
                }
                true
            }
            None => false,
        };
        let engine_clear = match try_recover(self.engine.try_lock()) {
            Some(mut slot) => {
                drop(slot.take());
                true
            }
            None => false,
        };
        source_clear && engine_clear
    }

    pub(crate) fn is_released(&self) -> bool {
        recover(self.source.lock()).is_none() && recover(self.engine.lock()).is_none()
    }
}

/// Teardown must run even after a collaborator panicked while holding a lock.
fn recover<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn try_recover<T>(result: TryLockResult<MutexGuard<'_, T>>) -> Option<MutexGuard<'_, T>> {
    match result {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

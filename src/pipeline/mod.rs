//! Session lifecycle and the frame loop.
//!
//! One background thread per session runs decode -> decimate -> infer ->
//! filter -> render -> hand-off, strictly one frame at a time in decode order.
//! Cancellation is cooperative and checked at the top of each iteration;
//! `stop` waits a bounded time for the worker and then releases the session's
//! handles itself.

mod controller;
mod notice;
mod session;
mod teardown;
mod worker;

pub use controller::{PipelineController, PipelineOutputs};
pub use notice::Notification;
pub use session::{CancellationToken, RunState, SessionState};
pub use teardown::StopOutcome;

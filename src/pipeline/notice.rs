use std::fmt;

/// Informational, non-blocking message for the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The frame source could not open the path; no session was started.
    CouldNotOpen { path: String, reason: String },
    /// The video decoded to its end.
    Completed {
        path: String,
        frames_decoded: u64,
        frames_processed: u64,
    },
    /// The session could not start, or stopped on an error.
    Failed { path: String, message: String },
    /// Replay was requested before any video was chosen.
    NoVideoSelected,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::CouldNotOpen { path, .. } => write!(f, "could not open video {}", path),
            Notification::Completed { .. } => {
                f.write_str("processing complete, select a new video")
            }
            Notification::Failed { message, .. } => write!(f, "error: {}", message),
            Notification::NoVideoSelected => {
                f.write_str("no video selected, select a video first")
            }
        }
    }
}

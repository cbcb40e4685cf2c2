use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::frame::AnnotatedFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Console status output for the presentation side.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Progress line for one session. Finishes when dropped.
    pub fn playback(&self, session: u64, path: &str) -> PlaybackProgress {
        let label = format!("session {} {}", session, path);
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{label}: waiting for frames"));
            PlaybackProgress::new(session, label, Some(spinner))
        } else {
            eprintln!("==> {}", label);
            PlaybackProgress::new(session, label, None)
        }
    }

    /// One-off status line that does not tear a running spinner.
    pub fn notice(&self, progress: Option<&PlaybackProgress>, message: &str) {
        match progress.and_then(|p| p.spinner.as_ref()) {
            Some(spinner) => spinner.println(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct PlaybackProgress {
    session: u64,
    label: String,
    start: Instant,
    presented: u64,
    last_position: u64,
    spinner: Option<ProgressBar>,
}

impl PlaybackProgress {
    fn new(session: u64, label: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            session,
            label,
            start: Instant::now(),
            presented: 0,
            last_position: 0,
            spinner,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn record(&mut self, frame: &AnnotatedFrame) {
        self.presented += 1;
        self.last_position = frame.position;
        let message = format!(
            "{}: frame {} ({} shown, {} detections)",
            self.label,
            frame.position,
            self.presented,
            frame.detections.len()
        );
        match &self.spinner {
            Some(spinner) => spinner.set_message(message),
            None => {
                for detection in &frame.detections {
                    eprintln!("    frame {}: {}", frame.position, detection.caption());
                }
            }
        }
    }
}

impl Drop for PlaybackProgress {
    fn drop(&mut self) {
        let message = format!(
            "✔ {} ({} frames shown, last {}, {})",
            self.label,
            self.presented,
            self.last_position,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_never_draws_a_spinner() {
        let ui = Ui::from_args(Some("plain"), true);
        let progress = ui.playback(1, "clip.mp4");
        assert!(progress.spinner.is_none());
    }

    #[test]
    fn non_tty_falls_back_to_plain() {
        let ui = Ui::from_args(Some("pretty"), false);
        assert!(!ui.pretty());
    }

    #[test]
    fn record_counts_presented_frames() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut progress = ui.playback(4, "clip.mp4");
        let frame = AnnotatedFrame {
            session: 4,
            position: 9,
            image: image::RgbImage::new(2, 2),
            detections: Vec::new(),
            overlays: Vec::new(),
        };
        progress.record(&frame);
        assert_eq!(progress.presented(), 1);
        assert_eq!(progress.session(), 4);
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}

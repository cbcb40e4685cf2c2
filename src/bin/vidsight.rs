//! vidsight - run object detection over a local video file
//!
//! The processing thread decodes, decimates, detects and annotates; this
//! thread presents the annotated frames, prints notifications and reads
//! console commands:
//!
//!   open <path>   start a new video (stops the current one)
//!   replay        restart the current video from the first frame
//!   stop          stop processing
//!   policy <p>    humans-only | all-except-humans | fixed | none
//!   quit          stop and exit

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vidsight::config::PipelineConfig;
use vidsight::detect::{parse_policy, ClassPolicy, EngineRegistry};
use vidsight::frame::AnnotatedFrame;
use vidsight::ingest::file::{has_video_extension, VIDEO_EXTENSIONS};
use vidsight::ingest::FileSourceFactory;
use vidsight::pipeline::{Notification, PipelineController, PipelineOutputs};
use vidsight::present::{JpegDirectorySink, NullSink, PresentationSink};
use vidsight::ui::{PlaybackProgress, Ui};

const PRESENT_POLL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to start with.
    video: Option<String>,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "VIDSIGHT_CONFIG")]
    config: Option<PathBuf>,
    /// Initial class policy: humans-only, all-except-humans, fixed or none.
    #[arg(long)]
    policy: Option<String>,
    /// Write annotated frames as JPEGs into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Read open/replay/stop/policy/quit commands from stdin.
    #[arg(long)]
    interactive: bool,
    /// Console output: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Open(String),
    Replay,
    Stop,
    Policy(Option<ClassPolicy>),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let command = match verb {
        "open" if !rest.is_empty() => {
            check_video_path(rest)?;
            Command::Open(rest.to_string())
        }
        "open" => return Err(anyhow!("usage: open <path>")),
        "replay" => Command::Replay,
        "stop" => Command::Stop,
        "policy" => Command::Policy(parse_policy(rest)?),
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// Only MP4 and AVI files are offered; synthetic `stub://` clips always pass.
fn check_video_path(path: &str) -> Result<()> {
    if path.starts_with("stub://") || has_video_extension(path) {
        return Ok(());
    }
    Err(anyhow!(
        "not a video file: {} (expected {})",
        path,
        VIDEO_EXTENSIONS.join(" or ")
    ))
}

/// A sink failure costs one frame, not the session.
fn present_or_report(sink: &mut dyn PresentationSink, frame: &AnnotatedFrame) -> Option<String> {
    match sink.present(frame) {
        Ok(()) => None,
        Err(err) => {
            log::error!("could not present frame {}: {:#}", frame.position, err);
            Some(format!("could not present frame {}: {:#}", frame.position, err))
        }
    }
}

fn spawn_console(commands: Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("vidsight-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => eprintln!("{err}"),
                }
            }
            let _ = commands.send(Command::Quit);
        })?;
    Ok(())
}

struct App {
    controller: PipelineController,
    outputs: PipelineOutputs,
    sink: Box<dyn PresentationSink>,
    ui: Ui,
    progress: Option<PlaybackProgress>,
    interactive: bool,
}

impl App {
    fn start(&mut self, path: &str, replay: bool) {
        self.progress = None;
        let started = if replay {
            self.controller.replay(path)
        } else {
            self.controller.start(path)
        };
        // Failures arrive as notifications.
        if let Ok(session) = started {
            self.progress = Some(self.ui.playback(session, path));
        }
    }

    /// Returns `false` when the app should exit.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Open(path) => self.start(&path, false),
            Command::Replay => {
                self.progress = None;
                if let Ok(session) = self.controller.replay_current() {
                    let path = self.controller.current_path().unwrap_or_default().to_string();
                    self.progress = Some(self.ui.playback(session, &path));
                }
            }
            Command::Stop => {
                let outcome = self.controller.stop();
                self.progress = None;
                log::debug!("stop: {:?}", outcome);
            }
            Command::Policy(selection) => {
                self.controller.set_policy(selection);
                let label = selection
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.ui
                    .notice(self.progress.as_ref(), &format!("class policy: {label}"));
            }
            Command::Quit => return false,
        }
        true
    }

    fn present_pending(&mut self) -> Result<()> {
        if let Some(frame) = self.outputs.frames.recv_timeout(PRESENT_POLL)? {
            if let Some(message) = present_or_report(self.sink.as_mut(), &frame) {
                self.ui.notice(self.progress.as_ref(), &message);
            }
            if let Some(progress) = self
                .progress
                .as_mut()
                .filter(|p| p.session() == frame.session)
            {
                progress.record(&frame);
            }
        }
        Ok(())
    }

    /// Returns `false` when a session ended and nothing else will arrive.
    fn drain_notices(&mut self) -> bool {
        let mut keep_running = true;
        while let Ok(notice) = self.outputs.notices.try_recv() {
            let terminal = matches!(
                notice,
                Notification::Completed { .. }
                    | Notification::Failed { .. }
                    | Notification::CouldNotOpen { .. }
            );
            if terminal {
                self.progress = None;
            }
            self.ui.notice(self.progress.as_ref(), &notice.to_string());
            if terminal && !self.interactive {
                keep_running = false;
            }
        }
        keep_running
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(policy) = args.policy.as_deref() {
        config.policy = parse_policy(policy)?;
        config.validate()?;
    }
    if args.video.is_none() && !args.interactive {
        return Err(anyhow!("no video given; pass a path or use --interactive"));
    }

    let mut registry = EngineRegistry::with_builtin();
    registry.set_default(&config.backend)?;
    log::info!(
        "backend {} (available: {})",
        config.backend,
        registry.list().join(", ")
    );

    let sink: Box<dyn PresentationSink> = match &args.out {
        Some(dir) => Box::new(JpegDirectorySink::new(dir)?),
        None => Box::new(NullSink),
    };

    let (controller, outputs) =
        PipelineController::new(config, Arc::new(FileSourceFactory), Arc::new(registry));
    let mut app = App {
        controller,
        outputs,
        sink,
        ui: Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal()),
        progress: None,
        interactive: args.interactive,
    };

    let (commands_tx, commands_rx): (Sender<Command>, Receiver<Command>) =
        crossbeam_channel::unbounded();
    let ctrlc_tx = commands_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    if args.interactive {
        spawn_console(commands_tx)?;
    }

    if let Some(path) = args.video.as_deref() {
        check_video_path(path)?;
        app.start(path, false);
    } else {
        app.ui
            .notice(None, &Notification::NoVideoSelected.to_string());
    }

    loop {
        match commands_rx.try_recv() {
            Ok(command) => {
                if !app.handle(command) {
                    break;
                }
                continue;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
        app.present_pending()?;
        if !app.drain_notices() {
            break;
        }
    }

    let outcome = app.controller.stop();
    app.progress = None;
    log::info!("shutting down ({:?})", outcome);
    Ok(())
}

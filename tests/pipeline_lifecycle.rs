use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use vidsight::config::PipelineConfig;
use vidsight::detect::{
    ClassPolicy, DetectionCandidate, EngineLoader, EngineRegistry, InferenceEngine, LoadedEngine,
    ModelArtifacts, NormalizedBox, StubLoader,
};
use vidsight::frame::{AnnotatedFrame, ModelInput, RawFrame};
use vidsight::ingest::{FileSourceFactory, FileStats, FrameSource, SourceFactory};
use vidsight::pipeline::{Notification, PipelineController, PipelineOutputs, RunState, StopOutcome};
use vidsight::render::TEXT_COLOR;

const CLASS_NAMES: &str = "person\nbicycle\ncar\ncat\n";

fn candidate(class_index: usize, confidence: f32) -> DetectionCandidate {
    DetectionCandidate {
        class_index,
        confidence,
        bbox: NormalizedBox::new(0.5, 0.5, 0.2, 0.2),
    }
}

fn model_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("temp data dir");
    std::fs::write(
        dir.path().join("yolov3-tiny.json"),
        r#"{"input_width": 32, "input_height": 32}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("yolov3-tiny.onnx"), b"weights").unwrap();
    std::fs::write(dir.path().join("coco.names"), CLASS_NAMES).unwrap();
    dir
}

fn test_config(data_dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig {
        data_dir: data_dir.path().to_path_buf(),
        frame_skip: 2,
        presentation_width: 64,
        presentation_height: 48,
        frame_delay: Duration::ZERO,
        stop_timeout: Duration::from_secs(2),
        policy: Some(ClassPolicy::HumansOnly),
        ..PipelineConfig::default()
    };
    config.validate().unwrap();
    config
}

fn controller_with(
    config: PipelineConfig,
    sources: Arc<dyn SourceFactory>,
    candidates: Vec<DetectionCandidate>,
) -> (PipelineController, PipelineOutputs) {
    let engines = StubLoader::new().with_candidates(candidates);
    PipelineController::new(config, sources, Arc::new(engines))
}

/// Consume frames until a notification arrives or the deadline passes.
fn run_to_notice(outputs: &PipelineOutputs) -> (Vec<AnnotatedFrame>, Option<Notification>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut frames = Vec::new();
    while Instant::now() < deadline {
        if let Some(frame) = outputs
            .frames
            .recv_timeout(Duration::from_millis(20))
            .unwrap()
        {
            frames.push(frame);
        }
        if let Ok(notice) = outputs.notices.try_recv() {
            return (frames, Some(notice));
        }
    }
    (frames, None)
}

fn captions(frame: &AnnotatedFrame) -> Vec<String> {
    frame
        .overlays
        .iter()
        .map(|overlay| overlay.caption.clone())
        .collect()
}

/// Wraps the file factory and records opens and releases in order.
struct RecordingFactory {
    events: Arc<Mutex<Vec<String>>>,
}

struct RecordingSource {
    name: String,
    inner: Box<dyn FrameSource>,
    events: Arc<Mutex<Vec<String>>>,
    released: bool,
}

impl SourceFactory for RecordingFactory {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>> {
        let inner = FileSourceFactory.open(path)?;
        let name = path
            .trim_start_matches("stub://")
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        self.events.lock().unwrap().push(format!("open {}", name));
        Ok(Box::new(RecordingSource {
            name,
            inner,
            events: self.events.clone(),
            released: false,
        }))
    }
}

impl FrameSource for RecordingSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        self.inner.next_frame()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release();
            self.events
                .lock()
                .unwrap()
                .push(format!("release {}", self.name));
        }
    }

    fn stats(&self) -> FileStats {
        self.inner.stats()
    }
}

/// The first engine it loads takes `first_delay` per frame; later ones are
/// immediate. Records when the first engine is dropped.
struct SlowFirstLoader {
    loads: AtomicUsize,
    first_delay: Duration,
    first_dropped: Arc<AtomicBool>,
}

struct SlowEngine {
    delay: Duration,
    dropped: Option<Arc<AtomicBool>>,
}

impl InferenceEngine for SlowEngine {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn infer(&mut self, _input: &ModelInput) -> Result<Vec<DetectionCandidate>> {
        std::thread::sleep(self.delay);
        Ok(vec![candidate(0, 0.9)])
    }
}

impl Drop for SlowEngine {
    fn drop(&mut self) {
        if let Some(dropped) = &self.dropped {
            dropped.store(true, Ordering::SeqCst);
        }
    }
}

impl EngineLoader for SlowFirstLoader {
    fn name(&self) -> &str {
        "slow"
    }

    fn load(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        let first = self.loads.fetch_add(1, Ordering::SeqCst) == 0;
        let engine = if first {
            SlowEngine {
                delay: self.first_delay,
                dropped: Some(self.first_dropped.clone()),
            }
        } else {
            SlowEngine {
                delay: Duration::ZERO,
                dropped: None,
            }
        };
        Ok(LoadedEngine {
            engine: Box::new(engine),
            descriptor: artifacts.descriptor()?,
        })
    }
}

struct BrokenLoader;

impl EngineLoader for BrokenLoader {
    fn name(&self) -> &str {
        "broken"
    }

    fn load(&self, _artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        Err(anyhow!("weights are corrupt"))
    }
}

#[test]
fn processes_every_nth_frame_and_completes() {
    let dir = model_dir();
    let (mut controller, outputs) = controller_with(
        test_config(&dir),
        Arc::new(FileSourceFactory),
        vec![candidate(0, 0.9)],
    );

    controller
        .start("stub://clip?frames=10&width=64&height=48")
        .unwrap();
    let (frames, notice) = run_to_notice(&outputs);

    let positions: Vec<u64> = frames.iter().map(|frame| frame.position).collect();
    assert_eq!(positions, vec![2, 4, 6, 8, 10]);
    for frame in &frames {
        assert_eq!(frame.image.dimensions(), (64, 48));
        assert_eq!(captions(frame), vec!["person 90%"]);
        // The synthetic clip never produces pure green, so these pixels are caption text.
        let top = frame.overlays[0].rect.y.max(0) as u32;
        assert!(frame
            .image
            .enumerate_pixels()
            .any(|(_, y, p)| y < top && *p == TEXT_COLOR));
    }
    match notice {
        Some(Notification::Completed {
            frames_decoded,
            frames_processed,
            ..
        }) => {
            assert_eq!(frames_decoded, 10);
            assert_eq!(frames_processed, 5);
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(controller.outcome(), Some(RunState::Completed));

    // Completion is reported exactly once.
    std::thread::sleep(Duration::from_millis(100));
    assert!(outputs.notices.try_recv().is_err());
}

#[test]
fn unopenable_video_reports_and_stays_idle() {
    let dir = model_dir();
    let (mut controller, outputs) =
        controller_with(test_config(&dir), Arc::new(FileSourceFactory), Vec::new());

    assert!(controller.start("/no/such/video.mp4").is_err());
    match outputs.notices.try_recv() {
        Ok(Notification::CouldNotOpen { path, .. }) => assert_eq!(path, "/no/such/video.mp4"),
        other => panic!("expected could-not-open, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(controller.current_session(), None);
}

#[test]
fn missing_model_artifacts_fail_without_a_worker() {
    let empty = tempfile::tempdir().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let factory = RecordingFactory {
        events: events.clone(),
    };
    let (mut controller, outputs) =
        controller_with(test_config(&empty), Arc::new(factory), Vec::new());

    assert!(controller.start("stub://clip?frames=3&width=8&height=8").is_err());
    assert!(matches!(
        outputs.notices.try_recv(),
        Ok(Notification::Failed { .. })
    ));
    assert_eq!(controller.current_session(), None);
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(*events.lock().unwrap(), vec!["open clip", "release clip"]);
}

#[test]
fn stop_without_a_session_is_a_no_op() {
    let dir = model_dir();
    let (mut controller, _outputs) =
        controller_with(test_config(&dir), Arc::new(FileSourceFactory), Vec::new());

    assert_eq!(controller.stop(), StopOutcome::NotRunning);
    assert_eq!(controller.state(), RunState::Idle);
}

#[test]
fn stop_while_blocked_on_hand_off_joins_promptly() {
    let dir = model_dir();
    let (mut controller, outputs) =
        controller_with(test_config(&dir), Arc::new(FileSourceFactory), Vec::new());

    controller.start("stub://endless?width=16&height=16").unwrap();
    assert_eq!(controller.state(), RunState::Running);
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert_eq!(controller.stop(), StopOutcome::Joined);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(controller.state(), RunState::Idle);

    // A user stop is not a completion.
    std::thread::sleep(Duration::from_millis(50));
    assert!(outputs.notices.try_recv().is_err());
}

#[test]
fn starting_a_new_video_releases_the_previous_source_first() {
    let dir = model_dir();
    let events = Arc::new(Mutex::new(Vec::new()));
    let factory = RecordingFactory {
        events: events.clone(),
    };
    let (mut controller, outputs) =
        controller_with(test_config(&dir), Arc::new(factory), vec![candidate(0, 0.9)]);

    let first = controller.start("stub://a?width=16&height=16").unwrap();
    let frame = outputs
        .frames
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("frame from first session");
    assert_eq!(frame.session, first);

    let second = controller.start("stub://b?width=16&height=16").unwrap();
    assert!(second > first);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["open a", "release a", "open b"]
    );

    let frame = outputs
        .frames
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("frame from second session");
    assert_eq!(frame.session, second);

    controller.stop();
    assert_eq!(
        *events.lock().unwrap(),
        vec!["open a", "release a", "open b", "release b"]
    );
}

#[test]
fn stop_during_slow_inference_forces_release_and_drops_stale_frames() {
    let dir = model_dir();
    let mut config = test_config(&dir);
    config.stop_timeout = Duration::from_millis(100);
    let events = Arc::new(Mutex::new(Vec::new()));
    let first_dropped = Arc::new(AtomicBool::new(false));
    let loader = SlowFirstLoader {
        loads: AtomicUsize::new(0),
        first_delay: Duration::from_millis(1500),
        first_dropped: first_dropped.clone(),
    };
    let (mut controller, outputs) = PipelineController::new(
        config,
        Arc::new(RecordingFactory {
            events: events.clone(),
        }),
        Arc::new(loader),
    );

    let first = controller.start("stub://a?width=16&height=16").unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    assert_eq!(controller.stop(), StopOutcome::ForcedRelease);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.state(), RunState::Idle);
    // The source was idle and is released now; the engine is still in use.
    assert_eq!(*events.lock().unwrap(), vec!["open a", "release a"]);
    assert!(!first_dropped.load(Ordering::SeqCst));

    let second = controller.start("stub://b?width=16&height=16").unwrap();
    assert!(second > first);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["open a", "release a", "open b"]
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut frames = Vec::new();
    while Instant::now() < deadline {
        if let Some(frame) = outputs
            .frames
            .recv_timeout(Duration::from_millis(20))
            .unwrap()
        {
            frames.push(frame);
        }
    }
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|frame| frame.session == second));

    // The abandoned worker releases its engine once inference returns.
    assert!(first_dropped.load(Ordering::SeqCst));
    controller.stop();
}

#[test]
fn model_load_failure_names_the_backend() {
    let dir = model_dir();
    let mut registry = EngineRegistry::new();
    registry.register(BrokenLoader);
    let (mut controller, outputs) = PipelineController::new(
        test_config(&dir),
        Arc::new(FileSourceFactory),
        Arc::new(registry),
    );

    assert!(controller.start("stub://clip?frames=3&width=8&height=8").is_err());
    match outputs.notices.try_recv() {
        Ok(Notification::Failed { message, .. }) => {
            assert!(message.contains("broken"), "{}", message);
            assert!(!message.contains("registry"), "{}", message);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Idle);
}

#[test]
fn replay_without_a_video_asks_for_one() {
    let dir = model_dir();
    let (mut controller, outputs) =
        controller_with(test_config(&dir), Arc::new(FileSourceFactory), Vec::new());

    assert!(controller.replay_current().is_err());
    assert!(matches!(
        outputs.notices.try_recv(),
        Ok(Notification::NoVideoSelected)
    ));
    assert_eq!(controller.current_session(), None);
}

#[test]
fn replay_restarts_from_the_first_frame() {
    let dir = model_dir();
    let mut config = test_config(&dir);
    config.frame_skip = 1;
    let (mut controller, outputs) =
        controller_with(config, Arc::new(FileSourceFactory), Vec::new());

    let first = controller.start("stub://clip?frames=3&width=8&height=8").unwrap();
    let (frames, notice) = run_to_notice(&outputs);
    assert_eq!(frames.len(), 3);
    assert!(matches!(notice, Some(Notification::Completed { .. })));

    let second = controller.replay_current().unwrap();
    assert!(second > first);
    let (frames, notice) = run_to_notice(&outputs);
    let positions: Vec<u64> = frames.iter().map(|frame| frame.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert!(frames.iter().all(|frame| frame.session == second));
    assert!(matches!(notice, Some(Notification::Completed { .. })));
}

#[test]
fn policy_toggle_applies_to_a_running_session() {
    let dir = model_dir();
    let (mut controller, outputs) = controller_with(
        test_config(&dir),
        Arc::new(FileSourceFactory),
        vec![candidate(0, 0.9), candidate(2, 0.9)],
    );

    controller.start("stub://clip?width=16&height=16").unwrap();
    let frame = outputs
        .frames
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(captions(&frame), vec!["person 90%"]);

    controller.set_policy(Some(ClassPolicy::AllExceptHumans));
    let mut switched = false;
    for _ in 0..20 {
        let frame = outputs
            .frames
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        if captions(&frame) == vec!["car 90%"] {
            switched = true;
            break;
        }
    }
    assert!(switched, "toggle never reached the running session");

    controller.set_policy(None);
    let mut cleared = false;
    for _ in 0..20 {
        let frame = outputs
            .frames
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        if frame.overlays.is_empty() {
            cleared = true;
            break;
        }
    }
    assert!(cleared, "clearing the policy never reached the running session");
    controller.stop();
}

#[test]
fn fixed_variant_ignores_toggles() {
    let dir = model_dir();
    let mut config = test_config(&dir);
    config.policy = Some(ClassPolicy::FixedAllowList);
    config.validate().unwrap();
    let (mut controller, outputs) = controller_with(
        config,
        Arc::new(FileSourceFactory),
        vec![candidate(0, 0.9), candidate(2, 0.9), candidate(3, 0.5)],
    );

    controller.set_policy(Some(ClassPolicy::AllExceptHumans));
    controller
        .start("stub://clip?frames=4&width=16&height=16")
        .unwrap();
    let (frames, _) = run_to_notice(&outputs);

    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(captions(frame), vec!["person 90%", "cat 50%"]);
    }
}

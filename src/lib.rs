//! vidsight - object detection over local video files
//!
//! A session decodes a video, keeps every Nth frame, runs a YOLO-family
//! detector on it, filters the detections by a class policy and hands an
//! annotated frame to the presentation side.
//!
//! # Module Structure
//!
//! - `frame`: Decoded frames, model input tensors, annotated output frames
//! - `ingest`: Frame sources (FFmpeg file decoding, synthetic clips) and decimation
//! - `detect`: Inference engines, class names, output decoding, class policy filter
//! - `render`: Box and caption overlays
//! - `pipeline`: Session lifecycle, background frame loop, bounded teardown
//! - `present`: Frame hand-off to the presentation context and sinks
//! - `config`: File and environment configuration
//! - `ui`: Console progress output

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod present;
pub mod render;
pub mod ui;

pub use config::PipelineConfig;
pub use detect::{AcceptedDetection, ClassPolicy, DetectionCandidate, PolicyHandle};
pub use frame::{AnnotatedFrame, ModelInput, Overlay, RawFrame};
pub use ingest::{FileSource, FileSourceFactory, FrameSource, SourceFactory};
pub use pipeline::{Notification, PipelineController, PipelineOutputs, RunState, StopOutcome};
pub use present::{FrameReceiver, JpegDirectorySink, NullSink, PresentationSink};

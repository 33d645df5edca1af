//! Multi-camera face capture pipeline
//!
//! Four concurrent stages connected by bounded queues:
//!
//! 1. [`ingestor::StreamIngestor`] - one thread per camera, pulls decoded
//!    frames and pushes them with drop-oldest backpressure
//! 2. [`detector::DetectorStage`] - one thread per device, drains frames in
//!    batches and emits one event per detected face
//! 3. [`track_manager::TrackManager`] - single worker associating events to
//!    tracks and selecting the best face per track
//! 4. [`forwarder::ForwarderPool`] - worker pool submitting best faces to the
//!    recognition service over a pooled HTTP client
//!
//! Cross-cutting services: [`logger::AsyncLogger`] (non-blocking log sink),
//! [`reclaimer::BackgroundReclaimer`] (off-hot-path cache reclamation) and
//! [`orchestrator::Orchestrator`] (lifecycle, signals, drain-on-shutdown).

pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod findface;
pub mod forwarder;
pub mod ingestor;
pub mod logger;
pub mod model;
pub mod orchestrator;
pub mod quality;
pub mod queues;
pub mod reclaimer;
pub mod source;
pub mod track_manager;

pub use config::AppConfig;
pub use error::{CaptureError, Result};
pub use orchestrator::Orchestrator;

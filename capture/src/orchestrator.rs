//! Application lifecycle
//!
//! Owns every component handle and the shared stop flag. Startup runs in
//! dependency order (reclaimer, forwarders, track manager, detectors,
//! ingestors - the logger is installed by `main` before anything else);
//! shutdown reverses it: flip the flag, close the frame queue, wait for the
//! downstream queues to drain within the configured deadline, then join the
//! workers. Signal handlers flip the same flag, so Ctrl-C and a programmatic
//! stop take the identical path.

use crate::camera::CameraInfo;
use crate::config::AppConfig;
use crate::detector::{DetectorSettings, DetectorStage};
use crate::error::{CaptureError, Result};
use crate::findface::RecognitionGateway;
use crate::forwarder::ForwarderPool;
use crate::ingestor::{IngestorSettings, StreamIngestor};
use crate::model::FaceDetector;
use crate::quality::FaceQualityService;
use crate::queues::{
    event_channel, forward_channel, DropCounters, DropSnapshot, FrameQueue, TrackCommand,
};
use crate::reclaimer::{BackgroundReclaimer, CacheReclaim, DetectorCacheReclaim};
use crate::track_manager::{TrackManager, TrackManagerSettings};
use crossbeam::channel::Receiver;
use facetrack::{matching, Event};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);
const RUN_POLL: Duration = Duration::from_millis(200);

/// Spawned components, kept for ordered shutdown.
struct Runtime {
    frame_queue: Arc<FrameQueue>,
    ingestors: Vec<StreamIngestor>,
    detectors: Vec<DetectorStage>,
    manager: TrackManager,
    forwarders: ForwarderPool,
    reclaimer: BackgroundReclaimer,
    // Depth taps; never received from, only measured.
    event_depth: Receiver<TrackCommand>,
    forward_depth: Receiver<Event>,
}

pub struct Orchestrator {
    config: AppConfig,
    cameras: Vec<CameraInfo>,
    factory: Arc<dyn crate::source::SourceFactory>,
    models: Vec<Arc<dyn FaceDetector>>,
    gateway: Arc<dyn RecognitionGateway>,
    stop: Arc<AtomicBool>,
    counters: Arc<DropCounters>,
    runtime: Option<Runtime>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        cameras: Vec<CameraInfo>,
        factory: Arc<dyn crate::source::SourceFactory>,
        models: Vec<Arc<dyn FaceDetector>>,
        gateway: Arc<dyn RecognitionGateway>,
    ) -> Self {
        Self {
            config,
            cameras,
            factory,
            models,
            gateway,
            stop: Arc::new(AtomicBool::new(false)),
            counters: DropCounters::new(),
            runtime: None,
        }
    }

    /// Shared stop flag; signal handlers flip it.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn drop_counters(&self) -> Arc<DropCounters> {
        Arc::clone(&self.counters)
    }

    /// Start every component in dependency order.
    pub fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Err(CaptureError::config("orchestrator already started"));
        }
        if self.models.is_empty() {
            return Err(CaptureError::config("no detector devices configured"));
        }

        log::info!(
            "Starting pipeline: {} cameras, {} devices, {} forwarders",
            self.cameras.len(),
            self.models.len(),
            self.config.findface_workers
        );

        // Startup credential exchange; failure aborts before any thread runs.
        self.gateway.login()?;

        let camera_ids: Vec<u32> = self.cameras.iter().map(|c| c.camera_id).collect();
        let assignment = FrameQueue::assign_round_robin(&camera_ids, self.models.len());
        let frame_queue = Arc::new(FrameQueue::new(
            self.models.len(),
            self.config.queues.frame_queue_max_size,
            assignment,
            Arc::clone(&self.counters),
        ));

        let (event_sender, event_rx) = event_channel(
            self.config.queues.event_queue_max_size,
            Arc::clone(&self.counters),
        );
        let (forward_sender, forward_rx) = forward_channel(
            self.config.queues.findface_queue_max_size,
            Arc::clone(&self.counters),
        );
        let event_depth = event_rx.clone();
        let forward_depth = forward_rx.clone();

        let hooks: Vec<Arc<dyn CacheReclaim>> = self
            .models
            .iter()
            .map(|model| DetectorCacheReclaim::new(Arc::clone(model)) as Arc<dyn CacheReclaim>)
            .collect();
        let reclaimer = BackgroundReclaimer::spawn(
            hooks,
            Duration::from_secs_f64(self.config.gc_interval_seconds.max(0.1)),
            Arc::clone(&self.stop),
        );

        let forwarders = ForwarderPool::spawn(
            self.config.findface_workers,
            forward_rx,
            Arc::clone(&self.gateway),
            Arc::clone(&self.stop),
        );

        let manager = TrackManager::spawn(
            event_rx,
            forward_sender,
            TrackManagerSettings {
                max_age: self.config.tracking.max_age,
                max_frames: self.config.tracking.max_frames,
                min_hits: self.config.tracking.min_hits,
                min_movement_pixels: self.config.track.min_movement_pixels,
                min_movement_percentage: self.config.track.min_movement_percentage,
                distance_fraction: matching::DEFAULT_DISTANCE_FRACTION,
                track_ttl: Duration::from_secs(self.config.tracks_ttl_seconds),
            },
            Arc::clone(&self.stop),
        );

        let event_ids = Arc::new(AtomicU64::new(0));
        let quality = FaceQualityService::new(self.config.performance.inference_size);
        let detectors = self
            .models
            .iter()
            .enumerate()
            .map(|(device_index, model)| {
                DetectorStage::spawn(
                    device_index,
                    Arc::clone(model),
                    Arc::clone(&frame_queue),
                    event_sender.clone(),
                    DetectorSettings {
                        batch_size: self.config.processing.batch_size_for(model.gpu_backed()),
                        skip_frames: self.config.performance.detection_skip_frames,
                        min_bbox_width: self.config.filter.min_bbox_width as f32,
                        min_confidence: self.config.filter.min_confidence,
                    },
                    quality,
                    Arc::clone(&event_ids),
                    Arc::clone(&self.stop),
                )
            })
            .collect();
        // The detector clones own the channel now; dropping the original
        // lets the event queue close when the last detector exits.
        drop(event_sender);

        let ingestor_settings = IngestorSettings {
            reconnect_delay: Duration::from_secs(self.config.camera.rtsp_reconnect_delay),
            max_retries: self.config.camera.rtsp_max_retries,
        };
        let ingestors = self
            .cameras
            .iter()
            .map(|camera| {
                StreamIngestor::spawn(
                    camera.clone(),
                    Arc::clone(&self.factory),
                    Arc::clone(&frame_queue),
                    ingestor_settings.clone(),
                    Arc::clone(&self.stop),
                )
            })
            .collect();

        self.runtime = Some(Runtime {
            frame_queue,
            ingestors,
            detectors,
            manager,
            forwarders,
            reclaimer,
            event_depth,
            forward_depth,
        });
        log::info!("✓ Pipeline started");
        Ok(())
    }

    /// Park until the stop flag flips, reporting drop totals periodically.
    pub fn run(&self) {
        self.run_with_interval(SUMMARY_INTERVAL);
    }

    fn run_with_interval(&self, summary_interval: Duration) {
        let mut last_summary = Instant::now();
        let mut last_snapshot = self.counters.snapshot();

        while !self.stop.load(Ordering::Relaxed) {
            thread::sleep(RUN_POLL);
            if last_summary.elapsed() >= summary_interval {
                let snapshot = self.counters.snapshot();
                report_drops(last_snapshot, snapshot);
                last_snapshot = snapshot;
                last_summary = Instant::now();
            }
        }
    }

    /// Ordered shutdown: signal, close, drain, join, report.
    pub fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        log::info!("Stopping pipeline...");
        self.stop.store(true, Ordering::Relaxed);
        runtime.frame_queue.close();

        for ingestor in runtime.ingestors {
            ingestor.join();
        }

        // Give the downstream queues the configured window to empty.
        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_seconds);
        while Instant::now() < deadline {
            if runtime.frame_queue.depth() == 0
                && runtime.event_depth.is_empty()
                && runtime.forward_depth.is_empty()
            {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        if runtime.frame_queue.depth() > 0 {
            log::warn!(
                "Frame queue still holds {} frames past the drain deadline",
                runtime.frame_queue.depth()
            );
        }
        if !runtime.event_depth.is_empty() {
            log::warn!(
                "Event queue still holds {} entries past the drain deadline",
                runtime.event_depth.len()
            );
        }

        for detector in runtime.detectors {
            detector.join();
        }
        runtime.manager.join();
        runtime.forwarders.join();
        let reclaim_stats = runtime.reclaimer.join();

        let drops = self.counters.snapshot();
        log::info!(
            "Pipeline stopped | dropped frames: {}, events: {}, submissions: {} | reclaim passes: {}",
            drops.frames,
            drops.events,
            drops.submissions,
            reclaim_stats.reclaim_count
        );
    }

    /// Registry handle of the running track manager, for inspection.
    pub fn registry(&self) -> Option<Arc<std::sync::Mutex<facetrack::TrackRegistry>>> {
        self.runtime.as_ref().map(|r| r.manager.registry())
    }
}

fn report_drops(previous: DropSnapshot, current: DropSnapshot) {
    let frames = current.frames - previous.frames;
    let events = current.events - previous.events;
    let submissions = current.submissions - previous.submissions;
    if frames + events + submissions > 0 {
        log::info!(
            "Dropped items in the last period: {} frames, {} events, {} submissions",
            frames,
            events,
            submissions
        );
    }
}

/// Install SIGINT/SIGTERM handlers flipping the stop flag.
pub fn install_signal_handlers(stop: Arc<AtomicBool>, interrupted: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Signal received, starting graceful shutdown");
        interrupted.store(true, Ordering::Relaxed);
        stop.store(true, Ordering::Relaxed);
    })
    .map_err(|e| CaptureError::config(format!("cannot install signal handler: {}", e)))
}

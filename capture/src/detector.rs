//! Detection stage
//!
//! One thread per device. Drains its frame lane in batches, thins frames per
//! camera according to the skip policy, runs the model on the surviving
//! batch and emits one event per face that passes the size and confidence
//! filters. A frame-done marker follows every processed frame, detections or
//! not, so downstream track aging keeps pace with empty frames.
//!
//! No reclamation happens here; the model's cache hook is driven by the
//! background reclaimer.

use crate::model::{FaceDetector, RawDetection};
use crate::quality::FaceQualityService;
use crate::queues::{EventSender, FrameQueue};
use facetrack::{Event, Frame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub batch_size: usize,
    /// Keep every Nth frame per camera; `<= 1` keeps all.
    pub skip_frames: u64,
    pub min_bbox_width: f32,
    pub min_confidence: f32,
}

/// Handle to one running device detector.
pub struct DetectorStage {
    device_index: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl DetectorStage {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        device_index: usize,
        model: Arc<dyn FaceDetector>,
        frames: Arc<FrameQueue>,
        events: EventSender,
        settings: DetectorSettings,
        quality: FaceQualityService,
        event_ids: Arc<AtomicU64>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(format!("detector-{}", device_index))
            .spawn(move || {
                detection_loop(
                    device_index,
                    model,
                    frames,
                    events,
                    settings,
                    quality,
                    event_ids,
                    stop,
                )
            })
            .expect("failed to spawn detector thread");
        Self {
            device_index,
            thread: Some(thread),
        }
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn detection_loop(
    device_index: usize,
    model: Arc<dyn FaceDetector>,
    frames: Arc<FrameQueue>,
    mut events: EventSender,
    settings: DetectorSettings,
    quality: FaceQualityService,
    event_ids: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) {
    log::info!(
        "Detector {} started ({}, batch size {})",
        device_index,
        model.name(),
        settings.batch_size
    );

    // Per-camera frame counters backing the skip policy.
    let mut seen: HashMap<u32, u64> = HashMap::new();
    let mut frames_processed: u64 = 0;
    let mut faces_emitted: u64 = 0;

    loop {
        let batch = frames.pop_batch(device_index, settings.batch_size, POLL_INTERVAL);
        if batch.is_empty() {
            if frames.is_closed() || stop.load(Ordering::Relaxed) {
                break;
            }
            continue;
        }

        // Thin the batch: every Nth frame per camera survives.
        let kept: Vec<Arc<Frame>> = batch
            .into_iter()
            .filter(|frame| {
                let counter = seen.entry(frame.camera_id).or_insert(0);
                *counter += 1;
                settings.skip_frames <= 1 || (*counter - 1) % settings.skip_frames == 0
            })
            .map(Arc::new)
            .collect();

        if kept.is_empty() {
            continue;
        }

        let detections = match model.detect(&kept) {
            Ok(detections) => detections,
            Err(e) => {
                log::error!("Detector {} inference failed: {}", device_index, e);
                // The frames are gone; downstream still needs the aging tick.
                for frame in &kept {
                    events.frame_done(frame.camera_id);
                }
                continue;
            }
        };

        for (frame, raw) in kept.iter().zip(detections) {
            faces_emitted += emit_events(frame, &raw, &settings, &quality, &event_ids, &mut events);
            events.frame_done(frame.camera_id);
        }

        frames_processed += kept.len() as u64;
        if frames_processed % 1000 == 0 {
            log::debug!(
                "Detector {}: {} frames processed, {} faces emitted",
                device_index,
                frames_processed,
                faces_emitted
            );
        }
    }

    log::info!(
        "Detector {} stopped ({} frames, {} faces)",
        device_index,
        frames_processed,
        faces_emitted
    );
}

/// Filter raw boxes and push one event per surviving face.
fn emit_events(
    frame: &Arc<Frame>,
    detections: &[RawDetection],
    settings: &DetectorSettings,
    quality: &FaceQualityService,
    event_ids: &AtomicU64,
    events: &mut EventSender,
) -> u64 {
    let mut emitted = 0;
    for detection in detections {
        if !detection.bbox.is_valid() {
            log::error!(
                "Invariant violation: camera {} frame {} produced degenerate bbox {}, discarding",
                frame.camera_id,
                frame.sequence,
                detection.bbox
            );
            continue;
        }
        if detection.bbox.width() < settings.min_bbox_width
            || detection.confidence < settings.min_confidence
        {
            continue;
        }

        let score = quality.score(&detection.bbox, detection.confidence);
        let id = event_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let event = Event::new(
            id,
            Arc::clone(frame),
            detection.bbox,
            detection.confidence,
            score,
        );
        events.observe(Arc::new(event));
        emitted += 1;
    }
    emitted
}

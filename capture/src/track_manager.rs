//! Track management stage
//!
//! Single worker draining the event queue. For each event the association
//! runs in three steps: snapshot the camera's active tracks under the
//! registry lock, score the candidates with the lock released, then reacquire
//! the lock only to mutate. The chosen track is re-validated on the second
//! acquisition; if it finalized in between, the event seeds a new track.
//! Keeping the matching math out of the lock is what keeps this single
//! worker from becoming the pipeline's stall point.

use crate::queues::{ForwardSender, TrackCommand};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use facetrack::{
    matching, registry::FinalizedTrack, select_track, Event, MatchParams, RecordOutcome,
    TrackRegistry,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TrackManagerSettings {
    pub max_age: u32,
    pub max_frames: u32,
    pub min_hits: u32,
    pub min_movement_pixels: f32,
    pub min_movement_percentage: f32,
    /// Fraction of the frame diagonal bounding the center-distance fallback.
    pub distance_fraction: f32,
    pub track_ttl: Duration,
}

impl TrackManagerSettings {
    /// Movement a track must cover, first to last, to be worth submitting.
    fn movement_floor(&self, frame_diagonal: f32) -> f32 {
        self.min_movement_pixels
            .max(self.min_movement_percentage * frame_diagonal)
    }
}

/// Handle to the running track manager worker.
pub struct TrackManager {
    registry: Arc<Mutex<TrackRegistry>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TrackManager {
    pub fn spawn(
        events: Receiver<TrackCommand>,
        submissions: ForwardSender,
        settings: TrackManagerSettings,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(TrackRegistry::new()));
        let worker_registry = Arc::clone(&registry);
        let thread = thread::Builder::new()
            .name("track-manager".to_string())
            .spawn(move || management_loop(events, submissions, worker_registry, settings, stop))
            .expect("failed to spawn track manager thread");
        Self {
            registry,
            thread: Some(thread),
        }
    }

    /// Shared registry handle, for inspection and shutdown accounting.
    pub fn registry(&self) -> Arc<Mutex<TrackRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

fn management_loop(
    events: Receiver<TrackCommand>,
    submissions: ForwardSender,
    registry: Arc<Mutex<TrackRegistry>>,
    settings: TrackManagerSettings,
    stop: Arc<AtomicBool>,
) {
    log::info!("Track manager started");

    // Track ids touched by the current frame, per camera.
    let mut touched: HashMap<u32, HashSet<u64>> = HashMap::new();
    let mut last_expiry = Instant::now();
    // Cumulative registry lock-hold time, surfaced in the periodic debug
    // line so a slow association shows up in the logs.
    let mut lock_held = Duration::ZERO;
    let mut events_handled: u64 = 0;

    loop {
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(TrackCommand::Observe(event)) => {
                let track_id = associate(&registry, &event, &settings, &mut lock_held);
                touched.entry(event.camera_id()).or_default().insert(track_id);
                events_handled += 1;
                if events_handled % 1000 == 0 {
                    let avg_us = lock_held.as_micros() as u64 / events_handled.max(1);
                    log::debug!(
                        "Track manager: {} events, avg lock hold {}us",
                        events_handled,
                        avg_us
                    );
                }
            }
            Ok(TrackCommand::FrameDone { camera_id }) => {
                let active = touched.remove(&camera_id).unwrap_or_default();
                let finalized = {
                    let mut guard = registry.lock().unwrap();
                    guard.mark_missed(camera_id, &active);
                    guard.take_expired(settings.max_age, settings.max_frames, Instant::now())
                };
                submit_finalized(finalized, &submissions, &settings);
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Relaxed) && events.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_expiry.elapsed() >= EXPIRY_INTERVAL {
            let now = Instant::now();
            let (finalized, purged) = {
                let mut guard = registry.lock().unwrap();
                let finalized =
                    guard.take_expired(settings.max_age, settings.max_frames, now);
                let purged = guard.purge_finalized(settings.track_ttl, now);
                (finalized, purged)
            };
            submit_finalized(finalized, &submissions, &settings);
            if purged > 0 {
                log::debug!("Purged {} expired tracks", purged);
            }
            last_expiry = now;
        }
    }

    // Shutdown: every remaining track finalizes; qualifying ones still ship.
    let finalized = registry.lock().unwrap().finalize_all(Instant::now());
    if !finalized.is_empty() {
        log::info!("Finalizing {} tracks on shutdown", finalized.len());
        submit_finalized(finalized, &submissions, &settings);
    }
    log::info!("Track manager stopped ({} events handled)", events_handled);
}

/// Double-lock association: snapshot, match lock-free, mutate re-validated.
fn associate(
    registry: &Mutex<TrackRegistry>,
    event: &Arc<Event>,
    settings: &TrackManagerSettings,
    lock_held: &mut Duration,
) -> u64 {
    let camera_id = event.camera_id();

    let hold = Instant::now();
    let candidates = registry.lock().unwrap().snapshot_candidates(camera_id);
    *lock_held += hold.elapsed();

    // Matching math runs with no lock held.
    let params = MatchParams::for_frame(
        event.frame.width,
        event.frame.height,
        settings.distance_fraction,
    );
    let chosen = select_track(&candidates, &event.bbox, event.captured_at(), &params);

    let hold = Instant::now();
    let mut guard = registry.lock().unwrap();
    let track_id = match chosen {
        Some(track_id) => match guard.record(camera_id, track_id, Arc::clone(event)) {
            RecordOutcome::Recorded => track_id,
            // Finalized between the two lock sections; fall through to a
            // fresh track.
            RecordOutcome::Missed => guard.insert(camera_id, Arc::clone(event)),
        },
        None => guard.insert(camera_id, Arc::clone(event)),
    };
    drop(guard);
    *lock_held += hold.elapsed();

    track_id
}

/// Apply the submission gate and forward the winners.
fn submit_finalized(
    finalized: Vec<FinalizedTrack>,
    submissions: &ForwardSender,
    settings: &TrackManagerSettings,
) {
    for track in finalized {
        if track.frame_count < settings.min_hits {
            log::debug!(
                "Track {} discarded: only {} events (min {})",
                track.track_id,
                track.frame_count,
                settings.min_hits
            );
            continue;
        }
        let floor = settings.movement_floor(track.frame_diagonal);
        if track.movement_px < floor {
            log::debug!(
                "Track {} discarded: movement {:.1}px below {:.1}px",
                track.track_id,
                track.movement_px,
                floor
            );
            continue;
        }

        // The detached copy owns its pixels; built outside the registry lock.
        let best = track.best.detach();
        if submissions.try_send(best) {
            log::info!(
                "✓ Track {} finalized and queued for submission | events: {} | movement: {:.1}px | quality: {:.4}",
                track.track_id,
                track.frame_count,
                track.movement_px,
                track.best.quality
            );
        }
    }
}

/// Default distance fraction re-exported for settings construction.
pub fn default_distance_fraction() -> f32 {
    matching::DEFAULT_DISTANCE_FRACTION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::{event_channel, forward_channel, DropCounters, EventSender};
    use facetrack::{BoundingBox, Frame};
    use std::time::Instant;

    fn settings() -> TrackManagerSettings {
        TrackManagerSettings {
            max_age: 30,
            max_frames: 500,
            min_hits: 1,
            min_movement_pixels: 0.0,
            min_movement_percentage: 0.0,
            distance_fraction: matching::DEFAULT_DISTANCE_FRACTION,
            track_ttl: Duration::from_secs(30),
        }
    }

    struct Harness {
        events: EventSender,
        submissions: Receiver<Event>,
        manager: TrackManager,
        stop: Arc<AtomicBool>,
        next_event_id: u64,
    }

    impl Harness {
        fn new(settings: TrackManagerSettings) -> Self {
            let counters = DropCounters::new();
            let (events, event_rx) = event_channel(1024, Arc::clone(&counters));
            let (forward_tx, submissions) = forward_channel(64, counters);
            let stop = Arc::new(AtomicBool::new(false));
            let manager =
                TrackManager::spawn(event_rx, forward_tx, settings, Arc::clone(&stop));
            Self {
                events,
                submissions,
                manager,
                stop,
                next_event_id: 0,
            }
        }

        fn observe(&mut self, camera_id: u32, sequence: u64, bbox: BoundingBox, quality: f32) {
            self.observe_at(camera_id, sequence, bbox, quality, Instant::now());
        }

        fn observe_at(
            &mut self,
            camera_id: u32,
            sequence: u64,
            bbox: BoundingBox,
            quality: f32,
            captured_at: Instant,
        ) {
            self.next_event_id += 1;
            let mut frame = Frame::new(camera_id, sequence, 1280, 720, Vec::new());
            frame.captured_at = captured_at;
            let event = Event::new(self.next_event_id, Arc::new(frame), bbox, 0.9, quality);
            self.events.observe(Arc::new(event));
        }

        fn frame_done(&mut self, camera_id: u32) {
            self.events.frame_done(camera_id);
        }

        fn empty_frames(&mut self, camera_id: u32, count: u32) {
            for _ in 0..count {
                self.frame_done(camera_id);
            }
        }

        fn settle(&self) {
            // Let the worker drain the queue.
            thread::sleep(Duration::from_millis(150));
        }

        fn shutdown(mut self) -> Vec<Event> {
            self.settle();
            self.stop.store(true, Ordering::Relaxed);
            drop(self.events);
            self.manager.join();
            let mut submitted = Vec::new();
            while let Ok(event) = self.submissions.try_recv() {
                submitted.push(event);
            }
            submitted
        }
    }

    fn bbox_at(x: f32) -> BoundingBox {
        BoundingBox::new(x, 100.0, x + 100.0, 200.0)
    }

    #[test]
    fn test_single_face_single_camera_lifecycle() {
        // 10 frames with one face, then 31 empty frames: one track, aged out
        // by max_age, submitted (movement floor disabled).
        let mut harness = Harness::new(settings());
        for seq in 1..=10 {
            harness.observe(1, seq, bbox_at(100.0 + seq as f32), 0.5);
            harness.frame_done(1);
        }
        harness.settle();
        {
            let registry = harness.manager.registry();
            let guard = registry.lock().unwrap();
            assert_eq!(guard.active_count(), 1);
        }

        harness.empty_frames(1, 31);
        harness.settle();
        {
            let registry = harness.manager.registry();
            let guard = registry.lock().unwrap();
            assert_eq!(guard.active_count(), 0);
        }

        let submitted = harness.shutdown();
        assert_eq!(submitted.len(), 1);
    }

    #[test]
    fn test_insufficient_movement_discards_single_event_track() {
        let mut config = settings();
        config.min_movement_pixels = 50.0;
        let mut harness = Harness::new(config);

        harness.observe(1, 1, bbox_at(100.0), 0.5);
        harness.frame_done(1);
        harness.empty_frames(1, 31);

        let submitted = harness.shutdown();
        assert!(submitted.is_empty());
    }

    #[test]
    fn test_two_faces_update_their_own_tracks() {
        // Two faces per frame, shifted 10px on frame 2: both tracks updated,
        // no third track created.
        let mut harness = Harness::new(settings());
        harness.observe(1, 1, bbox_at(100.0), 0.5);
        harness.observe(1, 1, bbox_at(500.0), 0.5);
        harness.frame_done(1);
        harness.observe(1, 2, bbox_at(110.0), 0.5);
        harness.observe(1, 2, bbox_at(510.0), 0.5);
        harness.frame_done(1);
        harness.settle();

        let registry = harness.manager.registry();
        let guard = registry.lock().unwrap();
        assert_eq!(guard.active_count(), 2);
        assert_eq!(guard.get(1, 1).unwrap().frame_count, 2);
        assert_eq!(guard.get(1, 2).unwrap().frame_count, 2);
        drop(guard);
        harness.shutdown();
    }

    #[test]
    fn test_temporal_gate_creates_second_track() {
        let mut harness = Harness::new(settings());
        let base = Instant::now();
        harness.observe_at(1, 1, bbox_at(100.0), 0.5, base);
        harness.frame_done(1);
        // Identical face 3 seconds later: must not match.
        harness.observe_at(1, 2, bbox_at(100.0), 0.5, base + Duration::from_secs(3));
        harness.frame_done(1);
        harness.settle();

        let registry = harness.manager.registry();
        assert_eq!(registry.lock().unwrap().len(), 2);
        harness.shutdown();
    }

    #[test]
    fn test_max_frames_finalizes_on_next_sweep() {
        let mut config = settings();
        config.max_frames = 5;
        let mut harness = Harness::new(config);

        for seq in 1..=5 {
            harness.observe(1, seq, bbox_at(100.0 + 10.0 * seq as f32), 0.5);
            harness.frame_done(1);
        }
        harness.settle();

        let registry = harness.manager.registry();
        let guard = registry.lock().unwrap();
        assert_eq!(guard.active_count(), 0);
        assert_eq!(guard.len(), 1);
        drop(guard);

        let submitted = harness.shutdown();
        assert_eq!(submitted.len(), 1);
    }

    #[test]
    fn test_min_hits_gates_submission() {
        let mut config = settings();
        config.min_hits = 3;
        let mut harness = Harness::new(config);

        // Two events only; finalized at shutdown but below min_hits.
        harness.observe(1, 1, bbox_at(100.0), 0.5);
        harness.frame_done(1);
        harness.observe(1, 2, bbox_at(160.0), 0.5);
        harness.frame_done(1);

        let submitted = harness.shutdown();
        assert!(submitted.is_empty());
    }

    #[test]
    fn test_best_event_is_submitted_detached() {
        let mut harness = Harness::new(settings());
        harness.observe(1, 1, bbox_at(100.0), 0.2);
        harness.frame_done(1);
        harness.observe(1, 2, bbox_at(150.0), 0.9);
        harness.frame_done(1);
        harness.observe(1, 3, bbox_at(200.0), 0.4);
        harness.frame_done(1);

        let submitted = harness.shutdown();
        assert_eq!(submitted.len(), 1);
        assert!((submitted[0].quality - 0.9).abs() < 1e-6);
        // The copy owns its frame exclusively.
        assert_eq!(Arc::strong_count(&submitted[0].frame), 1);
    }

    #[test]
    fn test_events_from_different_cameras_do_not_cross() {
        let mut harness = Harness::new(settings());
        harness.observe(1, 1, bbox_at(100.0), 0.5);
        harness.observe(2, 1, bbox_at(100.0), 0.5);
        harness.frame_done(1);
        harness.frame_done(2);
        harness.observe(1, 2, bbox_at(105.0), 0.5);
        harness.observe(2, 2, bbox_at(105.0), 0.5);
        harness.frame_done(1);
        harness.frame_done(2);
        harness.settle();

        let registry = harness.manager.registry();
        let guard = registry.lock().unwrap();
        // One track per camera, each with both its events.
        assert_eq!(guard.active_count(), 2);
        assert_eq!(guard.snapshot_candidates(1).len(), 1);
        assert_eq!(guard.snapshot_candidates(2).len(), 1);
        drop(guard);
        harness.shutdown();
    }
}

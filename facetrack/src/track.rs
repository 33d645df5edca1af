//! Track lifecycle: active accumulation, best-event selection, finalization

use crate::event::Event;
use std::sync::Arc;
use std::time::Instant;

/// The three event slots every track carries for its whole lifetime.
///
/// None of them is optional: a track is seeded with one event filling all
/// three, `first` keeps its identity forever, `last` is replaced on every
/// association and `best` only by a strictly higher quality score. The slots
/// survive finalization untouched; events drop when the track is removed from
/// the registry.
#[derive(Debug, Clone)]
struct TrackFaces {
    first: Arc<Event>,
    best: Arc<Event>,
    last: Arc<Event>,
}

/// One-way lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Active,
    Finalized { at: Instant },
}

/// A temporal sequence of events believed to belong to the same face.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub camera_id: u32,
    faces: TrackFaces,
    /// Consecutive frame sweeps without an associated detection.
    pub frames_without_detection: u32,
    /// Number of events associated to this track, seed included.
    pub frame_count: u32,
    state: TrackState,
}

impl Track {
    /// Seed a new track; the event fills all three slots.
    pub fn new(id: u64, seed: Arc<Event>) -> Self {
        let camera_id = seed.camera_id();
        Self {
            id,
            camera_id,
            faces: TrackFaces {
                first: seed.clone(),
                best: seed.clone(),
                last: seed,
            },
            frames_without_detection: 0,
            frame_count: 1,
            state: TrackState::Active,
        }
    }

    pub fn first(&self) -> &Arc<Event> {
        &self.faces.first
    }

    pub fn best(&self) -> &Arc<Event> {
        &self.faces.best
    }

    pub fn last(&self) -> &Arc<Event> {
        &self.faces.last
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TrackState::Active)
    }

    pub fn finalized_at(&self) -> Option<Instant> {
        match self.state {
            TrackState::Active => None,
            TrackState::Finalized { at } => Some(at),
        }
    }

    /// Monotonic timestamp of the most recent associated event.
    pub fn last_seen(&self) -> Instant {
        self.faces.last.captured_at()
    }

    /// Associate an event with this track.
    ///
    /// Replaces `last`, bumps the event counter, resets the miss counter and
    /// promotes `best` when the incoming quality is strictly higher. Returns
    /// `false` without touching anything on a finalized track; the caller
    /// falls through to creating a new track.
    pub fn record(&mut self, event: Arc<Event>) -> bool {
        if !self.is_active() {
            return false;
        }

        self.frame_count += 1;
        self.frames_without_detection = 0;
        if event.quality > self.faces.best.quality {
            self.faces.best = event.clone();
        }
        self.faces.last = event;
        true
    }

    /// Bump the miss counter after a frame sweep that did not touch this track.
    pub fn mark_missed(&mut self) {
        if self.is_active() {
            self.frames_without_detection += 1;
        }
    }

    /// One-way transition to the read-only finalized state.
    pub fn finalize(&mut self, at: Instant) {
        if self.is_active() {
            self.state = TrackState::Finalized { at };
        }
    }

    /// Total displacement of the bbox center between first and last event.
    pub fn movement_px(&self) -> f32 {
        self.faces.first.bbox.center_distance(&self.faces.last.bbox)
    }
}

//! Per-camera catalog of live tracks
//!
//! The registry is plain data; the pipeline wraps it in a single mutex and
//! follows the double-lock pattern: `snapshot_candidates` copies the matching
//! inputs out under the lock, the association math runs lock-free, and
//! `record`/`insert` re-acquire the lock to mutate. `record` re-validates the
//! chosen track because it may have been finalized between the two sections.

use crate::bbox::BoundingBox;
use crate::event::Event;
use crate::track::Track;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Matching input copied out of the registry while the lock is held.
#[derive(Debug, Clone)]
pub struct TrackCandidate {
    pub track_id: u64,
    /// Bbox of the track's last event.
    pub bbox: BoundingBox,
    /// Monotonic timestamp of the track's last event.
    pub last_seen: Instant,
}

/// Result of re-validated association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The chosen track vanished or finalized between the two lock sections.
    Missed,
}

/// Summary of a freshly finalized track, handed to the submission policy.
#[derive(Debug, Clone)]
pub struct FinalizedTrack {
    pub track_id: u64,
    pub camera_id: u32,
    pub frame_count: u32,
    pub movement_px: f32,
    pub frame_diagonal: f32,
    pub best: Arc<Event>,
}

/// Mapping `camera_id -> ordered tracks`, plus the track id counter.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    tracks: HashMap<u32, Vec<Track>>,
    next_track_id: u64,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the matching inputs of every active track of a camera.
    ///
    /// Returned in insertion order, so track ids ascend and a first-wins scan
    /// breaks ties toward the earlier track.
    pub fn snapshot_candidates(&self, camera_id: u32) -> Vec<TrackCandidate> {
        self.tracks
            .get(&camera_id)
            .map(|tracks| {
                tracks
                    .iter()
                    .filter(|t| t.is_active())
                    .map(|t| TrackCandidate {
                        track_id: t.id,
                        bbox: t.last().bbox,
                        last_seen: t.last_seen(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Associate an event to a previously chosen track, re-validating it.
    pub fn record(&mut self, camera_id: u32, track_id: u64, event: Arc<Event>) -> RecordOutcome {
        let Some(tracks) = self.tracks.get_mut(&camera_id) else {
            return RecordOutcome::Missed;
        };
        match tracks.iter_mut().find(|t| t.id == track_id) {
            Some(track) => {
                if track.record(event) {
                    RecordOutcome::Recorded
                } else {
                    RecordOutcome::Missed
                }
            }
            None => RecordOutcome::Missed,
        }
    }

    /// Create a new track seeded with this event.
    pub fn insert(&mut self, camera_id: u32, event: Arc<Event>) -> u64 {
        self.next_track_id += 1;
        let id = self.next_track_id;
        self.tracks
            .entry(camera_id)
            .or_default()
            .push(Track::new(id, event));
        id
    }

    /// Per-frame sweep: bump the miss counter of every active track of the
    /// camera that was not touched by the frame's events.
    pub fn mark_missed(&mut self, camera_id: u32, touched: &HashSet<u64>) {
        if let Some(tracks) = self.tracks.get_mut(&camera_id) {
            for track in tracks.iter_mut() {
                if track.is_active() && !touched.contains(&track.id) {
                    track.mark_missed();
                }
            }
        }
    }

    /// Finalize every active track that aged out or hit the event ceiling.
    ///
    /// Returns a summary per newly finalized track; the caller applies the
    /// submission gate and queues the best event where it passes.
    pub fn take_expired(&mut self, max_age: u32, max_frames: u32, now: Instant) -> Vec<FinalizedTrack> {
        let mut finalized = Vec::new();
        for tracks in self.tracks.values_mut() {
            for track in tracks.iter_mut() {
                if track.is_active()
                    && (track.frames_without_detection >= max_age || track.frame_count >= max_frames)
                {
                    track.finalize(now);
                    finalized.push(Self::summarize(track));
                }
            }
        }
        finalized
    }

    /// Finalize every remaining active track (shutdown path).
    pub fn finalize_all(&mut self, now: Instant) -> Vec<FinalizedTrack> {
        let mut finalized = Vec::new();
        for tracks in self.tracks.values_mut() {
            for track in tracks.iter_mut() {
                if track.is_active() {
                    track.finalize(now);
                    finalized.push(Self::summarize(track));
                }
            }
        }
        finalized
    }

    /// Drop finalized tracks older than the TTL. Detached copies already in
    /// flight are unaffected; the events drop with the track.
    pub fn purge_finalized(&mut self, ttl: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.tracks.retain(|_, tracks| {
            tracks.retain(|track| match track.finalized_at() {
                Some(at) => {
                    let expired = now.saturating_duration_since(at) >= ttl;
                    if expired {
                        removed += 1;
                    }
                    !expired
                }
                None => true,
            });
            !tracks.is_empty()
        });
        removed
    }

    pub fn active_count(&self) -> usize {
        self.tracks
            .values()
            .map(|tracks| tracks.iter().filter(|t| t.is_active()).count())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.tracks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct access for inspection; mutation stays within this module.
    pub fn get(&self, camera_id: u32, track_id: u64) -> Option<&Track> {
        self.tracks
            .get(&camera_id)
            .and_then(|tracks| tracks.iter().find(|t| t.id == track_id))
    }

    fn summarize(track: &Track) -> FinalizedTrack {
        FinalizedTrack {
            track_id: track.id,
            camera_id: track.camera_id,
            frame_count: track.frame_count,
            movement_px: track.movement_px(),
            frame_diagonal: track.best().frame.diagonal(),
            best: track.best().clone(),
        }
    }
}

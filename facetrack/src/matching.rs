//! Event-to-track association: adaptive thresholds and candidate selection
//!
//! Matching runs over a snapshot of candidate boxes copied out of the
//! registry, so no lock is held while the scores are computed.

use crate::bbox::BoundingBox;
use crate::registry::TrackCandidate;
use std::time::{Duration, Instant};

/// Events older than this relative to a track's last event never match it.
pub const TEMPORAL_GATE: Duration = Duration::from_secs(2);

/// Default center-distance ceiling as a fraction of the frame diagonal.
pub const DEFAULT_DISTANCE_FRACTION: f32 = 0.07;

/// Overlap threshold adapted to the frame resolution.
///
/// Small frames produce proportionally larger boxes per pixel of motion, so
/// the threshold tightens as resolution drops.
pub fn overlap_threshold_for(width: u32, height: u32) -> f32 {
    match width.max(height) {
        0..=640 => 0.20,
        641..=1280 => 0.15,
        1281..=1920 => 0.12,
        _ => 0.10,
    }
}

/// Maximum center distance for the fallback match, in pixels.
pub fn distance_threshold_for(width: u32, height: u32, fraction: f32) -> f32 {
    (width as f32).hypot(height as f32) * fraction
}

/// Matching parameters resolved for one frame geometry.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    pub overlap_threshold: f32,
    pub distance_threshold: f32,
    pub temporal_gate: Duration,
}

impl MatchParams {
    pub fn for_frame(width: u32, height: u32, distance_fraction: f32) -> Self {
        Self {
            overlap_threshold: overlap_threshold_for(width, height),
            distance_threshold: distance_threshold_for(width, height, distance_fraction),
            temporal_gate: TEMPORAL_GATE,
        }
    }
}

/// Pick the track an incoming detection belongs to, if any.
///
/// Two strategies, in order: greatest overlap at or above the overlap
/// threshold, then smallest center distance at or below the distance
/// threshold. Candidates whose last event is older than the temporal gate are
/// skipped outright. Ties go to the earlier track id, which is the iteration
/// order of the snapshot.
pub fn select_track(
    candidates: &[TrackCandidate],
    bbox: &BoundingBox,
    at: Instant,
    params: &MatchParams,
) -> Option<u64> {
    let mut by_overlap: Option<(u64, f32)> = None;
    let mut by_distance: Option<(u64, f32)> = None;

    for candidate in candidates {
        if at.saturating_duration_since(candidate.last_seen) > params.temporal_gate {
            continue;
        }

        let overlap = candidate.bbox.overlap(bbox);
        if overlap >= params.overlap_threshold
            && by_overlap.map_or(true, |(_, best)| overlap > best)
        {
            by_overlap = Some((candidate.track_id, overlap));
        }

        let distance = candidate.bbox.center_distance(bbox);
        if distance <= params.distance_threshold
            && by_distance.map_or(true, |(_, best)| distance < best)
        {
            by_distance = Some((candidate.track_id, distance));
        }
    }

    by_overlap.or(by_distance).map(|(id, _)| id)
}

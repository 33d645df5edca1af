//! Face tracking domain library
//!
//! Provides the building blocks for online multi-face tracking:
//! bounding-box geometry with mean-area overlap, frame/event entities,
//! track lifecycle (active → finalized, best-event selection) and the
//! per-camera track registry with out-of-lock candidate matching.
//!
//! The library is I/O free and thread agnostic; the pipeline crate owns
//! the threads and the registry mutex.

pub mod bbox;
pub mod event;
pub mod matching;
pub mod registry;
pub mod track;

pub use bbox::BoundingBox;
pub use event::{Event, Frame};
pub use matching::{distance_threshold_for, overlap_threshold_for, select_track, MatchParams};
pub use registry::{FinalizedTrack, RecordOutcome, TrackCandidate, TrackRegistry};
pub use track::{Track, TrackState};

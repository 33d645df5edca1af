//! Frame and face-detection event entities

use crate::bbox::BoundingBox;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// A single decoded image pulled from a camera stream.
///
/// Immutable after construction. Owned by the frame queue entry until the
/// detector wraps it in an `Arc`, at which point every event derived from it
/// shares the same buffer. The frame is released when the last event
/// referencing it drops.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: u32,
    /// Per-camera capture counter, used to delimit frame boundaries downstream.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// RGB24 pixel buffer, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    /// Monotonic capture timestamp, used for temporal gating.
    pub captured_at: Instant,
    /// Wall-clock capture timestamp, used for upstream submission.
    pub wall_clock: DateTime<Utc>,
}

impl Frame {
    pub fn new(camera_id: u32, sequence: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            camera_id,
            sequence,
            width,
            height,
            pixels,
            captured_at: Instant::now(),
            wall_clock: Utc::now(),
        }
    }

    pub fn diagonal(&self) -> f32 {
        (self.width as f32).hypot(self.height as f32)
    }
}

/// A single face detection tied to one frame.
///
/// No field is ever mutated after construction and `frame` can never be
/// absent, so a reader holding an event never observes partial state.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub frame: Arc<Frame>,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Higher is better; drives per-track best-event selection.
    pub quality: f32,
}

impl Event {
    pub fn new(id: u64, frame: Arc<Frame>, bbox: BoundingBox, confidence: f32, quality: f32) -> Self {
        Self {
            id,
            frame,
            bbox,
            confidence,
            quality,
        }
    }

    pub fn camera_id(&self) -> u32 {
        self.frame.camera_id
    }

    pub fn captured_at(&self) -> Instant {
        self.frame.captured_at
    }

    pub fn wall_clock(&self) -> DateTime<Utc> {
        self.frame.wall_clock
    }

    /// Produce a copy backed by an independently-owned pixel buffer.
    ///
    /// The detached event shares nothing with the source frame, so it can
    /// cross into the forwarding stage while the originating frame is
    /// released on its own schedule.
    pub fn detach(&self) -> Event {
        let frame = Frame {
            camera_id: self.frame.camera_id,
            sequence: self.frame.sequence,
            width: self.frame.width,
            height: self.frame.height,
            pixels: self.frame.pixels.clone(),
            captured_at: self.frame.captured_at,
            wall_clock: self.frame.wall_clock,
        };
        Event {
            id: self.id,
            frame: Arc::new(frame),
            bbox: self.bbox,
            confidence: self.confidence,
            quality: self.quality,
        }
    }
}

//! Bounded queues connecting the pipeline stages
//!
//! Three queues, three overflow policies:
//!
//! - frame queue: drop-oldest (freshness over completeness), custom deque
//!   because the drop targets the oldest frame of the *same camera*
//! - event queue: block with a 500 ms timeout, then drop
//! - findface queue: non-blocking try-put, drop on full
//!
//! Every drop lands in a shared counter; the orchestrator reports the
//! totals periodically.

use crossbeam::channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use facetrack::{Event, Frame};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// How long an event producer blocks before dropping.
pub const EVENT_PUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// One aggregated warning per this many dropped events.
const DROP_WARN_EVERY: u64 = 100;

/// Shared drop accounting, one counter per category.
#[derive(Debug, Default)]
pub struct DropCounters {
    pub frames: AtomicU64,
    pub events: AtomicU64,
    pub submissions: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropSnapshot {
    pub frames: u64,
    pub events: u64,
    pub submissions: u64,
}

impl DropCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> DropSnapshot {
        DropSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
        }
    }
}

impl DropSnapshot {
    pub fn total(&self) -> u64 {
        self.frames + self.events + self.submissions
    }
}

struct Lane {
    frames: Mutex<VecDeque<Frame>>,
    available: Condvar,
}

/// Bounded frame queue with one FIFO lane per detector device.
///
/// Cameras are assigned to lanes at startup, so per-camera capture order is
/// preserved all the way into the detector and one frame's detections never
/// interleave with another detector's output. With a single device this is
/// exactly one queue of the configured capacity.
pub struct FrameQueue {
    lanes: Vec<Lane>,
    assignment: HashMap<u32, usize>,
    capacity: usize,
    counters: Arc<DropCounters>,
    closed: AtomicBool,
}

impl FrameQueue {
    pub fn new(
        lane_count: usize,
        capacity: usize,
        assignment: HashMap<u32, usize>,
        counters: Arc<DropCounters>,
    ) -> Self {
        let lanes = (0..lane_count.max(1))
            .map(|_| Lane {
                frames: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Condvar::new(),
            })
            .collect();
        Self {
            lanes,
            assignment,
            capacity,
            counters,
            closed: AtomicBool::new(false),
        }
    }

    /// Round-robin camera-to-lane assignment.
    pub fn assign_round_robin(cameras: &[u32], lane_count: usize) -> HashMap<u32, usize> {
        cameras
            .iter()
            .enumerate()
            .map(|(i, &camera_id)| (camera_id, i % lane_count.max(1)))
            .collect()
    }

    fn lane_for(&self, camera_id: u32) -> &Lane {
        let index = self.assignment.get(&camera_id).copied().unwrap_or(0);
        &self.lanes[index.min(self.lanes.len() - 1)]
    }

    /// Insert a frame, dropping the oldest pending frame of the same camera
    /// when the lane is full (or the globally oldest when the camera has
    /// none pending). Never rejects the incoming frame while open.
    pub fn push(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.counters.frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let lane = self.lane_for(frame.camera_id);
        let mut frames = lane.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            let victim = frames
                .iter()
                .position(|f| f.camera_id == frame.camera_id)
                .unwrap_or(0);
            frames.remove(victim);
            self.counters.frames.fetch_add(1, Ordering::Relaxed);
        }
        frames.push_back(frame);
        drop(frames);
        lane.available.notify_one();
        true
    }

    /// Take up to `max` frames from a lane, waiting up to `timeout` for the
    /// first one. Returns an empty batch on timeout, and immediately once the
    /// queue is closed and the lane drained.
    pub fn pop_batch(&self, lane_index: usize, max: usize, timeout: Duration) -> Vec<Frame> {
        let lane = &self.lanes[lane_index.min(self.lanes.len() - 1)];
        let deadline = Instant::now() + timeout;
        let mut frames = lane.frames.lock().unwrap();

        while frames.is_empty() && !self.closed.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            let (guard, _) = lane.available.wait_timeout(frames, deadline - now).unwrap();
            frames = guard;
        }

        let take = frames.len().min(max);
        frames.drain(..take).collect()
    }

    /// Close the queue: producers drop, consumers drain what remains and exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for lane in &self.lanes {
            lane.available.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total frames currently queued across lanes.
    pub fn depth(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.frames.lock().unwrap().len())
            .sum()
    }
}

/// Message from the detectors to the track manager.
///
/// `FrameDone` delimits one frame's contiguous run of events and is emitted
/// for empty frames too, so tracks age even when nothing is detected.
#[derive(Debug, Clone)]
pub enum TrackCommand {
    Observe(Arc<Event>),
    FrameDone { camera_id: u32 },
}

/// Producer half of the event queue; one clone per detector thread.
pub struct EventSender {
    tx: Sender<TrackCommand>,
    counters: Arc<DropCounters>,
    timeout: Duration,
    dropped: u64,
}

impl Clone for EventSender {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
            timeout: self.timeout,
            dropped: 0,
        }
    }
}

impl EventSender {
    /// Push one detection, blocking up to the configured timeout, then drop.
    pub fn observe(&mut self, event: Arc<Event>) {
        match self.tx.send_timeout(TrackCommand::Observe(event), self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                self.counters.events.fetch_add(1, Ordering::Relaxed);
                self.dropped += 1;
                if self.dropped % DROP_WARN_EVERY == 0 {
                    log::warn!(
                        "⚠️  Event queue saturated, {} events dropped by this detector",
                        self.dropped
                    );
                }
            }
        }
    }

    /// Mark the end of one frame's events. Not counted as a data drop when
    /// the queue is saturated; the next frame's marker resynchronizes.
    pub fn frame_done(&mut self, camera_id: u32) {
        let _ = self
            .tx
            .send_timeout(TrackCommand::FrameDone { camera_id }, self.timeout);
    }
}

/// Bounded MPMC event queue; the receiver side is plain crossbeam.
pub fn event_channel(
    capacity: usize,
    counters: Arc<DropCounters>,
) -> (EventSender, Receiver<TrackCommand>) {
    event_channel_with_timeout(capacity, counters, EVENT_PUSH_TIMEOUT)
}

pub fn event_channel_with_timeout(
    capacity: usize,
    counters: Arc<DropCounters>,
    timeout: Duration,
) -> (EventSender, Receiver<TrackCommand>) {
    let (tx, rx) = bounded(capacity);
    (
        EventSender {
            tx,
            counters,
            timeout,
            dropped: 0,
        },
        rx,
    )
}

/// Producer half of the findface queue: non-blocking, drop on full.
#[derive(Clone)]
pub struct ForwardSender {
    tx: Sender<Event>,
    counters: Arc<DropCounters>,
}

impl ForwardSender {
    pub fn try_send(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.counters.submissions.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "⚠️  Findface queue full, best event {} discarded",
                    event.id
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.submissions.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

pub fn forward_channel(
    capacity: usize,
    counters: Arc<DropCounters>,
) -> (ForwardSender, Receiver<Event>) {
    let (tx, rx) = bounded(capacity);
    (ForwardSender { tx, counters }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetrack::BoundingBox;

    fn frame(camera_id: u32, sequence: u64) -> Frame {
        Frame::new(camera_id, sequence, 640, 480, Vec::new())
    }

    fn queue(capacity: usize) -> FrameQueue {
        let mut assignment = HashMap::new();
        assignment.insert(1, 0);
        assignment.insert(2, 0);
        FrameQueue::new(1, capacity, assignment, DropCounters::new())
    }

    #[test]
    fn test_fifo_within_capacity() {
        let queue = queue(4);
        for seq in 0..4 {
            assert!(queue.push(frame(1, seq)));
        }
        let batch = queue.pop_batch(0, 10, Duration::from_millis(10));
        let sequences: Vec<u64> = batch.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drop_oldest_prefers_same_camera() {
        let queue = queue(3);
        queue.push(frame(2, 100));
        queue.push(frame(1, 0));
        queue.push(frame(1, 1));

        // Queue full; pushing camera 1 again must evict camera 1's oldest,
        // not camera 2's older frame.
        queue.push(frame(1, 2));
        let batch = queue.pop_batch(0, 10, Duration::from_millis(10));
        let kept: Vec<(u32, u64)> = batch.iter().map(|f| (f.camera_id, f.sequence)).collect();
        assert_eq!(kept, vec![(2, 100), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_drop_oldest_falls_back_to_global_oldest() {
        let queue = queue(2);
        queue.push(frame(1, 0));
        queue.push(frame(1, 1));

        // Camera 2 has nothing pending; the globally oldest frame goes.
        queue.push(frame(2, 7));
        let batch = queue.pop_batch(0, 10, Duration::from_millis(10));
        let kept: Vec<(u32, u64)> = batch.iter().map(|f| (f.camera_id, f.sequence)).collect();
        assert_eq!(kept, vec![(1, 1), (2, 7)]);
    }

    #[test]
    fn test_depth_bounded_under_overload() {
        // Scenario: sustained 2x overproduction. Depth must stay at capacity
        // and the drop counter must grow by exactly the excess.
        let counters = DropCounters::new();
        let queue = FrameQueue::new(
            1,
            100,
            FrameQueue::assign_round_robin(&[1], 1),
            Arc::clone(&counters),
        );
        for seq in 0..300 {
            queue.push(frame(1, seq));
            assert!(queue.depth() <= 100);
        }
        assert_eq!(queue.depth(), 100);
        assert_eq!(counters.snapshot().frames, 200);

        // The survivors are the freshest 100.
        let batch = queue.pop_batch(0, 100, Duration::from_millis(10));
        assert_eq!(batch.first().unwrap().sequence, 200);
        assert_eq!(batch.last().unwrap().sequence, 299);
    }

    #[test]
    fn test_pop_batch_times_out_empty() {
        let queue = queue(4);
        let start = Instant::now();
        let batch = queue.pop_batch(0, 10, Duration::from_millis(30));
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_close_drains_then_returns_empty() {
        let queue = queue(4);
        queue.push(frame(1, 0));
        queue.close();

        // Push after close is refused and counted.
        assert!(!queue.push(frame(1, 1)));

        // Remaining frames still drain.
        let batch = queue.pop_batch(0, 10, Duration::from_millis(10));
        assert_eq!(batch.len(), 1);

        // Closed and empty: immediate empty result, no waiting.
        let start = Instant::now();
        assert!(queue.pop_batch(0, 10, Duration::from_secs(5)).is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_round_robin_assignment() {
        let assignment = FrameQueue::assign_round_robin(&[10, 11, 12, 13, 14], 2);
        assert_eq!(assignment[&10], 0);
        assert_eq!(assignment[&11], 1);
        assert_eq!(assignment[&12], 0);
        assert_eq!(assignment[&13], 1);
        assert_eq!(assignment[&14], 0);
    }

    fn test_event(id: u64) -> Arc<Event> {
        let frame = Arc::new(Frame::new(1, id, 640, 480, Vec::new()));
        Arc::new(Event::new(
            id,
            frame,
            BoundingBox::new(0.0, 0.0, 50.0, 50.0),
            0.9,
            0.5,
        ))
    }

    #[test]
    fn test_event_channel_drops_after_timeout() {
        let counters = DropCounters::new();
        let (mut sender, rx) =
            event_channel_with_timeout(2, Arc::clone(&counters), Duration::from_millis(10));

        sender.observe(test_event(1));
        sender.observe(test_event(2));
        // Queue full, no consumer: this one is dropped after the timeout.
        sender.observe(test_event(3));

        assert_eq!(counters.snapshot().events, 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_forward_channel_try_put_drops_on_full() {
        let counters = DropCounters::new();
        let (sender, rx) = forward_channel(1, Arc::clone(&counters));

        assert!(sender.try_send(test_event(1).detach()));
        assert!(!sender.try_send(test_event(2).detach()));
        assert_eq!(counters.snapshot().submissions, 1);
        assert_eq!(rx.len(), 1);
    }
}

//! Submission stage
//!
//! Worker pool draining the findface queue. Transient failures (network,
//! 5xx) retry with exponential backoff; client-side rejections drop the
//! event with a warning. The workers drain whatever remains in the queue on
//! shutdown before exiting.

use crate::error::CaptureError;
use crate::findface::RecognitionGateway;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use facetrack::Event;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Submission outcome counters shared by all workers.
#[derive(Debug, Default)]
pub struct ForwardStats {
    pub submitted: AtomicU64,
    pub failed: AtomicU64,
}

impl ForwardStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Backoff delay before retry `attempt` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt - 1)
}

/// Pool of submission workers.
pub struct ForwarderPool {
    stats: Arc<ForwardStats>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ForwarderPool {
    pub fn spawn(
        worker_count: usize,
        queue: Receiver<Event>,
        gateway: Arc<dyn RecognitionGateway>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let stats = ForwardStats::new();
        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let gateway = Arc::clone(&gateway);
                let stop = Arc::clone(&stop);
                let stats = Arc::clone(&stats);
                thread::Builder::new()
                    .name(format!("forwarder-{}", worker_id))
                    .spawn(move || send_loop(worker_id, queue, gateway, stop, stats))
                    .expect("failed to spawn forwarder thread")
            })
            .collect();
        Self { stats, workers }
    }

    pub fn stats(&self) -> Arc<ForwardStats> {
        Arc::clone(&self.stats)
    }

    pub fn join(self) {
        for worker in self.workers {
            worker.join().ok();
        }
        let submitted = self.stats.submitted.load(Ordering::Relaxed);
        let failed = self.stats.failed.load(Ordering::Relaxed);
        let total = submitted + failed;
        if total > 0 {
            log::info!(
                "Forwarder statistics: {} submitted, {} failed ({:.1}% success)",
                submitted,
                failed,
                submitted as f64 * 100.0 / total as f64
            );
        }
    }
}

fn send_loop(
    worker_id: usize,
    queue: Receiver<Event>,
    gateway: Arc<dyn RecognitionGateway>,
    stop: Arc<AtomicBool>,
    stats: Arc<ForwardStats>,
) {
    log::debug!("Forwarder worker {} started", worker_id);

    loop {
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(event) => submit_with_retry(&*gateway, event, &stats),
            Err(RecvTimeoutError::Timeout) => {
                // Drain before exiting, never abandon queued submissions.
                if stop.load(Ordering::Relaxed) && queue.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("Forwarder worker {} stopped", worker_id);
}

fn submit_with_retry(gateway: &dyn RecognitionGateway, event: Event, stats: &ForwardStats) {
    for attempt in 1..=MAX_ATTEMPTS {
        match gateway.submit(&event) {
            Ok(()) => {
                stats.submitted.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "✓ Event {} submitted | camera: {} | quality: {:.4}",
                    event.id,
                    event.camera_id(),
                    event.quality
                );
                return;
            }
            Err(e @ CaptureError::PermanentUpstream { .. }) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Event {} rejected upstream, dropping: {}", event.id, e);
                return;
            }
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "Event {} submission failed (attempt {}/{}), retrying: {}",
                    event.id,
                    attempt,
                    MAX_ATTEMPTS,
                    e
                );
                thread::sleep(backoff_delay(attempt));
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "Event {} dropped after {} attempts: {}",
                    event.id,
                    attempt,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::queues::{forward_channel, DropCounters};
    use facetrack::{BoundingBox, Frame};
    use std::sync::Mutex;

    /// Gateway that replays a scripted outcome sequence.
    struct ScriptedGateway {
        outcomes: Mutex<Vec<Result<()>>>,
        calls: AtomicU64,
    }

    impl ScriptedGateway {
        fn new(outcomes: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU64::new(0),
            })
        }
    }

    impl RecognitionGateway for ScriptedGateway {
        fn login(&self) -> Result<()> {
            Ok(())
        }

        fn submit(&self, _event: &Event) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn test_event(id: u64) -> Event {
        let frame = Arc::new(Frame::new(1, id, 64, 64, vec![0; 64 * 64 * 3]));
        Event::new(id, frame, BoundingBox::new(0.0, 0.0, 32.0, 32.0), 0.9, 0.5)
    }

    fn run_pool(gateway: Arc<ScriptedGateway>, events: Vec<Event>) -> Arc<ForwardStats> {
        let (tx, rx) = forward_channel(64, DropCounters::new());
        let stop = Arc::new(AtomicBool::new(false));
        let pool = ForwarderPool::spawn(1, rx, gateway, Arc::clone(&stop));
        let stats = pool.stats();

        for event in events {
            assert!(tx.try_send(event));
        }
        drop(tx);
        pool.join();
        stats
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(250));
        assert_eq!(backoff_delay(2), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_success_first_try() {
        let gateway = ScriptedGateway::new(vec![Ok(())]);
        let stats = run_pool(gateway.clone(), vec![test_event(1)]);
        assert_eq!(stats.submitted.load(Ordering::Relaxed), 1);
        assert_eq!(gateway.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_transient_failure_retried_to_success() {
        let gateway = ScriptedGateway::new(vec![
            Err(CaptureError::network("connection reset")),
            Ok(()),
        ]);
        let stats = run_pool(gateway.clone(), vec![test_event(1)]);
        assert_eq!(stats.submitted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 0);
        assert_eq!(gateway.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_transient_failure_exhausts_retries() {
        let gateway = ScriptedGateway::new(vec![
            Err(CaptureError::network("timeout")),
            Err(CaptureError::network("timeout")),
            Err(CaptureError::network("timeout")),
        ]);
        let stats = run_pool(gateway.clone(), vec![test_event(1)]);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(gateway.calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let gateway = ScriptedGateway::new(vec![Err(CaptureError::PermanentUpstream {
            status: 400,
            body: "bad bbox".to_string(),
        })]);
        let stats = run_pool(gateway.clone(), vec![test_event(1)]);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(gateway.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_queue_drained_on_shutdown() {
        let gateway = ScriptedGateway::new(Vec::new());
        let events: Vec<Event> = (1..=5).map(test_event).collect();
        let stats = run_pool(gateway, events);
        assert_eq!(stats.submitted.load(Ordering::Relaxed), 5);
    }
}

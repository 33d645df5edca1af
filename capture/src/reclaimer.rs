//! Background reclamation worker
//!
//! The only place cache release happens. Stage threads register hooks at
//! startup (the detector's device cache, pool trims) and never call them
//! directly; this worker runs every hook on a fixed interval and keeps
//! counters for inspection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A reclaimable cache; returns the number of objects released.
pub trait CacheReclaim: Send + Sync {
    fn reclaim(&self) -> usize;
    fn name(&self) -> &str;
}

/// Read-only statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    pub reclaim_count: u64,
    pub objects_reclaimed: u64,
}

#[derive(Default)]
struct Counters {
    reclaim_count: AtomicU64,
    objects_reclaimed: AtomicU64,
}

/// Handle to the running reclaimer worker.
pub struct BackgroundReclaimer {
    counters: Arc<Counters>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BackgroundReclaimer {
    pub fn spawn(
        hooks: Vec<Arc<dyn CacheReclaim>>,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let thread = thread::Builder::new()
            .name("reclaimer".to_string())
            .spawn(move || reclaim_loop(hooks, interval, stop, worker_counters))
            .expect("failed to spawn reclaimer thread");
        Self {
            counters,
            thread: Some(thread),
        }
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            reclaim_count: self.counters.reclaim_count.load(Ordering::Relaxed),
            objects_reclaimed: self.counters.objects_reclaimed.load(Ordering::Relaxed),
        }
    }

    pub fn join(mut self) -> ReclaimStats {
        let stats = self.stats();
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
        stats
    }
}

fn reclaim_loop(
    hooks: Vec<Arc<dyn CacheReclaim>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    log::info!(
        "Background reclaimer started ({} hooks, every {:?})",
        hooks.len(),
        interval
    );

    while !stop.load(Ordering::Relaxed) {
        sleep_interruptible(interval, &stop);
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let mut released = 0usize;
        for hook in &hooks {
            released += hook.reclaim();
        }
        counters.reclaim_count.fetch_add(1, Ordering::Relaxed);
        counters
            .objects_reclaimed
            .fetch_add(released as u64, Ordering::Relaxed);
        if released > 0 {
            log::debug!("Reclaim pass released {} objects", released);
        }
    }

    log::info!(
        "Background reclaimer stopped ({} passes, {} objects)",
        counters.reclaim_count.load(Ordering::Relaxed),
        counters.objects_reclaimed.load(Ordering::Relaxed)
    );
}

fn sleep_interruptible(total: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && !stop.load(Ordering::Relaxed) {
        let chunk = step.min(total - slept);
        thread::sleep(chunk);
        slept += chunk;
    }
}

/// Hook releasing a face detector's device-side cache.
pub struct DetectorCacheReclaim {
    detector: Arc<dyn crate::model::FaceDetector>,
}

impl DetectorCacheReclaim {
    pub fn new(detector: Arc<dyn crate::model::FaceDetector>) -> Arc<Self> {
        Arc::new(Self { detector })
    }
}

impl CacheReclaim for DetectorCacheReclaim {
    fn reclaim(&self) -> usize {
        self.detector.release_cache()
    }

    fn name(&self) -> &str {
        "detector-cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHook {
        calls: AtomicU64,
        per_call: usize,
    }

    impl CacheReclaim for CountingHook {
        fn reclaim(&self) -> usize {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.per_call
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_hooks_run_periodically_and_stats_accumulate() {
        let hook = Arc::new(CountingHook {
            calls: AtomicU64::new(0),
            per_call: 3,
        });
        let stop = Arc::new(AtomicBool::new(false));
        let reclaimer = BackgroundReclaimer::spawn(
            vec![hook.clone()],
            Duration::from_millis(20),
            Arc::clone(&stop),
        );

        thread::sleep(Duration::from_millis(120));
        stop.store(true, Ordering::Relaxed);
        let stats = reclaimer.join();

        let calls = hook.calls.load(Ordering::Relaxed);
        assert!(calls >= 2, "expected at least 2 passes, got {}", calls);
        assert_eq!(stats.reclaim_count, calls);
        assert_eq!(stats.objects_reclaimed, calls * 3);
    }

    #[test]
    fn test_stop_wakes_sleep_early() {
        let stop = Arc::new(AtomicBool::new(false));
        let reclaimer = BackgroundReclaimer::spawn(
            Vec::new(),
            Duration::from_secs(60),
            Arc::clone(&stop),
        );

        let started = std::time::Instant::now();
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        reclaimer.join();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

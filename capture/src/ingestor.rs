//! Per-camera stream ingestion
//!
//! One thread per camera: decode, stamp, push with drop-oldest backpressure.
//! Read failures are transient: the ingestor backs off and reconnects.
//! Consecutive failed reconnect attempts consume the retry budget; a
//! successful open resets it. A camera exhausting its budget exits alone,
//! the rest of the pipeline keeps running.

use crate::camera::CameraInfo;
use crate::queues::FrameQueue;
use crate::source::SourceFactory;
use facetrack::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IngestorSettings {
    pub reconnect_delay: Duration,
    pub max_retries: u32,
}

/// Handle to one running camera ingestor.
pub struct StreamIngestor {
    camera_id: u32,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamIngestor {
    pub fn spawn(
        camera: CameraInfo,
        factory: Arc<dyn SourceFactory>,
        queue: Arc<FrameQueue>,
        settings: IngestorSettings,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let camera_id = camera.camera_id;
        let thread = thread::Builder::new()
            .name(format!("ingestor-{}", camera_id))
            .spawn(move || ingest_loop(camera, factory, queue, settings, stop))
            .expect("failed to spawn ingestor thread");
        Self {
            camera_id,
            thread: Some(thread),
        }
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

fn ingest_loop(
    camera: CameraInfo,
    factory: Arc<dyn SourceFactory>,
    queue: Arc<FrameQueue>,
    settings: IngestorSettings,
    stop: Arc<AtomicBool>,
) {
    log::info!("Ingestor started for camera {}", camera.camera_id);

    let mut sequence: u64 = 0;
    let mut failed_opens: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        let mut source = match factory.open(&camera) {
            Ok(source) => {
                failed_opens = 0;
                log::info!("Camera {} stream opened", camera.camera_id);
                source
            }
            Err(e) => {
                failed_opens += 1;
                log::error!(
                    "Camera {} open failed (attempt {}/{}): {}",
                    camera.camera_id,
                    failed_opens,
                    settings.max_retries,
                    e
                );
                if failed_opens >= settings.max_retries {
                    log::error!(
                        "Camera {} dropped after {} consecutive failed connects",
                        camera.camera_id,
                        failed_opens
                    );
                    break;
                }
                sleep_interruptible(settings.reconnect_delay, &stop);
                continue;
            }
        };

        // Capture loop for one connection; a read failure is transient and
        // sends us back around to reconnect.
        while !stop.load(Ordering::Relaxed) {
            match source.read_frame() {
                Ok(image) => {
                    sequence += 1;
                    let frame = Frame::new(
                        camera.camera_id,
                        sequence,
                        image.width,
                        image.height,
                        image.pixels,
                    );
                    queue.push(frame);
                }
                Err(e) => {
                    log::warn!(
                        "Camera {} read failed, reconnecting in {:?}: {}",
                        camera.camera_id,
                        settings.reconnect_delay,
                        e
                    );
                    break;
                }
            }
        }

        if !stop.load(Ordering::Relaxed) {
            sleep_interruptible(settings.reconnect_delay, &stop);
        }
    }

    log::info!(
        "Ingestor stopped for camera {} ({} frames captured)",
        camera.camera_id,
        sequence
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

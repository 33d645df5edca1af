//! Video source abstraction
//!
//! RTSP demuxing and decoding live behind these traits; the pipeline only
//! sees decoded RGB images. The synthetic implementation backs `synthetic://`
//! URLs and is what the test suite drives the pipeline with.

use crate::camera::CameraInfo;
use crate::error::{CaptureError, Result};
use std::thread;
use std::time::Duration;

/// One decoded image as it comes off the wire.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub width: u32,
    pub height: u32,
    /// RGB24, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
}

/// An open, decoding stream for a single camera.
pub trait VideoSource: Send + std::fmt::Debug {
    /// Block until the next frame is decoded.
    ///
    /// `TransientDecode` signals a recoverable read failure; the ingestor
    /// reconnects with backoff.
    fn read_frame(&mut self) -> Result<SourceImage>;
}

/// Opens streams; one factory is shared by all ingestors.
pub trait SourceFactory: Send + Sync {
    fn open(&self, camera: &CameraInfo) -> Result<Box<dyn VideoSource>>;
}

/// Built-in source producing gray frames at a fixed rate.
///
/// Serves `synthetic://` URLs so the binary runs end to end without a real
/// RTSP stack; the frame budget makes stream termination reproducible.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    remaining: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, interval: Duration, frame_budget: u64) -> Self {
        Self {
            width,
            height,
            interval,
            remaining: frame_budget,
        }
    }
}

impl VideoSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<SourceImage> {
        if self.remaining == 0 {
            return Err(CaptureError::decode("synthetic stream exhausted"));
        }
        self.remaining -= 1;
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        Ok(SourceImage {
            width: self.width,
            height: self.height,
            pixels: vec![114; (self.width * self.height * 3) as usize],
        })
    }
}

/// Factory for [`SyntheticSource`] streams.
pub struct SyntheticSourceFactory {
    pub frame_interval: Duration,
    pub frame_budget: u64,
}

impl Default for SyntheticSourceFactory {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(40),
            frame_budget: u64::MAX,
        }
    }
}

impl SourceFactory for SyntheticSourceFactory {
    fn open(&self, camera: &CameraInfo) -> Result<Box<dyn VideoSource>> {
        if !camera.rtsp_url.starts_with("synthetic://") {
            return Err(CaptureError::IngestorFatal {
                camera_id: camera.camera_id,
                reason: format!("unsupported stream url '{}'", camera.rtsp_url),
            });
        }
        Ok(Box::new(SyntheticSource::new(
            camera.width,
            camera.height,
            self.frame_interval,
            self.frame_budget,
        )))
    }
}

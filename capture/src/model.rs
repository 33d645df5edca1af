//! Face detection model interface
//!
//! The model itself (weights, runtime, device placement) is a black box;
//! the pipeline hands it a batch of frames and gets back per-frame box
//! lists. One instance per device, used from that device's detector thread
//! only; `release_cache` is the single entry point the background reclaimer
//! drives.

use crate::error::Result;
use facetrack::{BoundingBox, Frame};
use std::sync::{Arc, Mutex};

/// One raw box straight out of the model, before filtering.
#[derive(Debug, Clone, Copy)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// Common interface for face detectors.
pub trait FaceDetector: Send + Sync {
    /// Run the model on a batch; returns one detection list per input frame.
    fn detect(&self, frames: &[Arc<Frame>]) -> Result<Vec<Vec<RawDetection>>>;

    /// Release device-side caches; returns the number of objects freed.
    /// Only ever called from the background reclaimer, never from hot paths.
    fn release_cache(&self) -> usize {
        0
    }

    /// Whether this detector runs on a GPU device; drives batch sizing.
    fn gpu_backed(&self) -> bool {
        true
    }

    /// Detector name for logging.
    fn name(&self) -> &str;
}

/// Scripted detector used when no real model is linked in.
///
/// Plays back a fixed per-frame script (cycled when shorter than the input),
/// or detects nothing at all by default.
pub struct StubDetector {
    script: Mutex<Vec<Vec<RawDetection>>>,
    cursor: Mutex<usize>,
}

impl StubDetector {
    /// A detector that never finds a face.
    pub fn silent() -> Self {
        Self::scripted(Vec::new())
    }

    /// A detector that replays `script`, one entry per frame, cycling.
    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
        }
    }
}

impl FaceDetector for StubDetector {
    fn detect(&self, frames: &[Arc<Frame>]) -> Result<Vec<Vec<RawDetection>>> {
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(frames.iter().map(|_| Vec::new()).collect());
        }

        let mut cursor = self.cursor.lock().unwrap();
        let mut results = Vec::with_capacity(frames.len());
        for _ in frames {
            results.push(script[*cursor % script.len()].clone());
            *cursor += 1;
        }
        Ok(results)
    }

    fn gpu_backed(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<Arc<Frame>> {
        (0..n)
            .map(|i| Arc::new(Frame::new(1, i as u64, 640, 480, Vec::new())))
            .collect()
    }

    #[test]
    fn test_stub_detector_is_cpu_backed() {
        assert!(!StubDetector::silent().gpu_backed());
    }

    #[test]
    fn test_silent_detector_finds_nothing() {
        let detector = StubDetector::silent();
        let results = detector.detect(&frames(3)).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_scripted_detector_cycles() {
        let a = vec![RawDetection::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0.9)];
        let b = Vec::new();
        let detector = StubDetector::scripted(vec![a.clone(), b]);

        let results = detector.detect(&frames(4)).unwrap();
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[1].len(), 0);
        assert_eq!(results[2].len(), 1);
        assert_eq!(results[3].len(), 0);
    }
}

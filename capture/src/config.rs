//! Application configuration
//!
//! A single YAML document with per-concern sections. Every option carries the
//! documented default, so a partial document (or none of a section at all)
//! still yields a runnable configuration. Recognition-service credentials
//! come from the environment, never from the file.

use crate::error::{CaptureError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub cpu_batch_size: usize,
    pub gpu_batch_size: usize,
    pub gpu_devices: Vec<u32>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            cpu_batch_size: 1,
            gpu_batch_size: 32,
            gpu_devices: vec![0],
        }
    }
}

impl ProcessingConfig {
    /// Batch size for one detector, chosen by its device class.
    pub fn batch_size_for(&self, gpu_backed: bool) -> usize {
        if gpu_backed {
            self.gpu_batch_size
        } else {
            self.cpu_batch_size
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub detection_skip_frames: u64,
    pub inference_size: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            detection_skip_frames: 2,
            inference_size: 640,
        }
    }
}

/// Detection model thresholds, passed through to the model implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub iou_threshold: f32,
    pub max_age: u32,
    pub min_hits: u32,
    pub max_frames: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_age: 30,
            min_hits: 3,
            max_frames: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_bbox_width: u32,
    pub min_confidence: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_bbox_width: 30,
            min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub min_movement_percentage: f32,
    pub min_movement_pixels: f32,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            min_movement_percentage: 0.1,
            min_movement_pixels: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub frame_queue_max_size: usize,
    pub event_queue_max_size: usize,
    pub findface_queue_max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            frame_queue_max_size: 100,
            event_queue_max_size: 1000,
            findface_queue_max_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub prefix: String,
    pub rtsp_reconnect_delay: u64,
    pub rtsp_max_retries: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            rtsp_reconnect_delay: 5,
            rtsp_max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "application.log".to_string(),
        }
    }
}

/// One camera entry in the registry section of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub camera_id: u32,
    pub rtsp_url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub prefix: String,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub processing: ProcessingConfig,
    pub performance: PerformanceConfig,
    pub yolo: YoloConfig,
    pub tracking: TrackingConfig,
    pub filter: FilterConfig,
    pub track: TrackConfig,
    pub queues: QueueConfig,
    pub camera: CameraSettings,
    pub logging: LoggingConfig,
    pub cameras: Vec<CameraEntry>,
    pub gc_interval_seconds: f64,
    pub tracks_ttl_seconds: u64,
    pub findface_workers: usize,
    pub drain_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            performance: PerformanceConfig::default(),
            yolo: YoloConfig::default(),
            tracking: TrackingConfig::default(),
            filter: FilterConfig::default(),
            track: TrackConfig::default(),
            queues: QueueConfig::default(),
            camera: CameraSettings::default(),
            logging: LoggingConfig::default(),
            cameras: Vec::new(),
            gc_interval_seconds: 5.0,
            tracks_ttl_seconds: 30,
            findface_workers: 2,
            drain_timeout_seconds: 10,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.gpu_devices.is_empty() {
            return Err(CaptureError::config("processing.gpu_devices must not be empty"));
        }
        if self.processing.gpu_batch_size == 0 || self.processing.cpu_batch_size == 0 {
            return Err(CaptureError::config("batch sizes must be positive"));
        }
        if self.queues.frame_queue_max_size == 0
            || self.queues.event_queue_max_size == 0
            || self.queues.findface_queue_max_size == 0
        {
            return Err(CaptureError::config("queue capacities must be positive"));
        }
        if self.findface_workers == 0 {
            return Err(CaptureError::config("findface_workers must be positive"));
        }
        if !(0.0..=1.0).contains(&self.filter.min_confidence) {
            return Err(CaptureError::config("filter.min_confidence must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Recognition-service credentials, taken from the environment.
#[derive(Debug, Clone)]
pub struct FindfaceCredentials {
    pub url: String,
    pub user: String,
    pub password: String,
    pub uuid: String,
}

impl FindfaceCredentials {
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            env::var(name).map_err(|_| CaptureError::config(format!("{} is not set", name)))
        };
        Ok(Self {
            url: var("FINDFACE_URL")?,
            user: var("FINDFACE_USER")?,
            password: var("FINDFACE_PASSWORD")?,
            uuid: var("FINDFACE_UUID")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.processing.gpu_batch_size, 32);
        assert_eq!(config.processing.gpu_devices, vec![0]);
        assert_eq!(config.performance.detection_skip_frames, 2);
        assert_eq!(config.tracking.max_age, 30);
        assert_eq!(config.tracking.min_hits, 3);
        assert_eq!(config.tracking.max_frames, 500);
        assert_eq!(config.filter.min_bbox_width, 30);
        assert_eq!(config.track.min_movement_pixels, 50.0);
        assert_eq!(config.queues.frame_queue_max_size, 100);
        assert_eq!(config.queues.event_queue_max_size, 1000);
        assert_eq!(config.camera.rtsp_reconnect_delay, 5);
        assert_eq!(config.gc_interval_seconds, 5.0);
        assert_eq!(config.tracks_ttl_seconds, 30);
        assert_eq!(config.findface_workers, 2);
        assert_eq!(config.drain_timeout_seconds, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let doc = r#"
tracking:
  max_age: 10
cameras:
  - camera_id: 7
    rtsp_url: "rtsp://10.0.0.7/stream"
    width: 1920
    height: 1080
    prefix: "LOBBY"
"#;
        let config: AppConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.tracking.max_age, 10);
        assert_eq!(config.tracking.min_hits, 3);
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].camera_id, 7);
        assert_eq!(config.cameras[0].prefix, "LOBBY");
    }

    #[test]
    fn test_batch_size_follows_device_class() {
        let config = ProcessingConfig::default();
        assert_eq!(config.batch_size_for(true), 32);
        assert_eq!(config.batch_size_for(false), 1);
    }

    #[test]
    fn test_top_level_scalars_parse() {
        let doc = "gc_interval_seconds: 2.5\nfindface_workers: 4\n";
        let config: AppConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.gc_interval_seconds, 2.5);
        assert_eq!(config.findface_workers, 4);
    }

    #[test]
    fn test_validation_rejects_empty_devices() {
        let mut config = AppConfig::default();
        config.processing.gpu_devices.clear();
        assert!(config.validate().is_err());
    }
}

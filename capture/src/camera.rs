//! Camera registry access
//!
//! Read-only enumeration resolved once at startup, filtered by the
//! configured prefix.

use crate::config::{AppConfig, CameraEntry};
use crate::error::{CaptureError, Result};

/// Descriptor of one camera stream.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub camera_id: u32,
    pub rtsp_url: String,
    pub width: u32,
    pub height: u32,
    pub prefix: String,
}

impl From<&CameraEntry> for CameraInfo {
    fn from(entry: &CameraEntry) -> Self {
        Self {
            camera_id: entry.camera_id,
            rtsp_url: entry.rtsp_url.clone(),
            width: entry.width,
            height: entry.height,
            prefix: entry.prefix.clone(),
        }
    }
}

/// Read-only camera enumeration, invoked once at startup.
pub trait CameraRepository: Send + Sync {
    fn active_cameras(&self) -> Result<Vec<CameraInfo>>;
}

/// Repository backed by the `cameras` section of the configuration document.
pub struct ConfigCameraRepository {
    entries: Vec<CameraEntry>,
    prefix: String,
}

impl ConfigCameraRepository {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            entries: config.cameras.clone(),
            prefix: config.camera.prefix.clone(),
        }
    }
}

impl CameraRepository for ConfigCameraRepository {
    fn active_cameras(&self) -> Result<Vec<CameraInfo>> {
        let cameras: Vec<CameraInfo> = self
            .entries
            .iter()
            .filter(|entry| entry.prefix.starts_with(&self.prefix))
            .map(CameraInfo::from)
            .collect();

        if cameras.is_empty() {
            return Err(CaptureError::CameraEnumeration(format!(
                "no active cameras found with prefix '{}'",
                self.prefix
            )));
        }
        Ok(cameras)
    }
}

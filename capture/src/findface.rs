//! Recognition service client
//!
//! Pooled blocking HTTP client for the face-recognition endpoint. One login
//! at startup yields a bearer token; every submission is a multipart POST
//! carrying the event metadata and a JPEG crop of the face. Connections are
//! kept alive and reused across submissions, so the per-request cost on the
//! forwarder workers is the transfer itself.

use crate::config::FindfaceCredentials;
use crate::error::{CaptureError, Result};
use facetrack::Event;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

const POOL_MAX_CONNECTIONS: usize = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const JPEG_QUALITY: u8 = 85;

/// Seam to the external recognition service.
pub trait RecognitionGateway: Send + Sync {
    /// Obtain credentials; called once at orchestrator startup.
    fn login(&self) -> Result<()>;

    /// Submit one event. `PermanentUpstream` means do not retry.
    fn submit(&self, event: &Event) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Production gateway speaking the multipart wire protocol.
pub struct FindfaceClient {
    http: reqwest::blocking::Client,
    credentials: FindfaceCredentials,
    token: Mutex<Option<String>>,
}

impl FindfaceClient {
    pub fn new(credentials: FindfaceCredentials) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_CONNECTIONS)
            .build()?;
        Ok(Self {
            http,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn bearer_token(&self) -> Result<String> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CaptureError::Login("no session token, login first".to_string()))
    }
}

impl RecognitionGateway for FindfaceClient {
    fn login(&self) -> Result<()> {
        let url = format!("{}/login", self.credentials.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "user": self.credentials.user,
                "password": self.credentials.password,
                "uuid": self.credentials.uuid,
            }))
            .send()
            .map_err(|e| CaptureError::Login(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CaptureError::Login(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body: LoginResponse = response
            .json()
            .map_err(|e| CaptureError::Login(format!("malformed login response: {}", e)))?;
        *self.token.lock().unwrap() = Some(body.token);
        log::info!("✓ Recognition service login succeeded");
        Ok(())
    }

    fn submit(&self, event: &Event) -> Result<()> {
        let token = self.bearer_token()?;
        let jpeg = encode_face_crop(event)?;
        let part = reqwest::blocking::multipart::Part::bytes(jpeg)
            .file_name("face.jpg")
            .mime_str("image/jpeg")?;
        let mut form = reqwest::blocking::multipart::Form::new();
        for (name, value) in metadata_fields(event) {
            form = form.text(name, value);
        }
        let form = form.part("image", part);

        let url = format!("{}/events", self.credentials.url.trim_end_matches('/'));
        let response = self.http.post(&url).bearer_auth(token).multipart(form).send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        if status.is_client_error() {
            Err(CaptureError::PermanentUpstream {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(CaptureError::network(format!("HTTP {}: {}", status, body)))
        }
    }
}

/// Multipart metadata fields in wire order; the `image` part follows them.
pub fn metadata_fields(event: &Event) -> [(&'static str, String); 4] {
    [
        ("event_id", event.id.to_string()),
        ("camera_id", event.camera_id().to_string()),
        ("timestamp", event.wall_clock().to_rfc3339()),
        ("bbox", bbox_field(event)),
    ]
}

/// Render the bbox as four comma-separated integers.
pub fn bbox_field(event: &Event) -> String {
    let b = &event.bbox;
    format!(
        "{},{},{},{}",
        b.x1 as i64, b.y1 as i64, b.x2 as i64, b.y2 as i64
    )
}

/// Crop the face bbox out of the event frame and JPEG-encode it.
///
/// The bbox is clamped to the frame and padded to at least one pixel, so a
/// box hugging the border still encodes.
pub fn encode_face_crop(event: &Event) -> Result<Vec<u8>> {
    let frame = &event.frame;
    if frame.width == 0 || frame.height == 0 {
        return Err(CaptureError::invariant(format!(
            "event {} frame has zero dimensions",
            event.id
        )));
    }
    if frame.pixels.len() != (frame.width * frame.height * 3) as usize {
        return Err(CaptureError::invariant(format!(
            "event {} frame buffer is {} bytes, expected {}",
            event.id,
            frame.pixels.len(),
            frame.width * frame.height * 3
        )));
    }

    let x1 = (event.bbox.x1.max(0.0) as u32).min(frame.width.saturating_sub(1));
    let y1 = (event.bbox.y1.max(0.0) as u32).min(frame.height.saturating_sub(1));
    let x2 = (event.bbox.x2.max(0.0) as u32).clamp(x1 + 1, frame.width);
    let y2 = (event.bbox.y2.max(0.0) as u32).clamp(y1 + 1, frame.height);
    let (crop_w, crop_h) = (x2 - x1, y2 - y1);

    let mut crop = Vec::with_capacity((crop_w * crop_h * 3) as usize);
    for row in y1..y2 {
        let start = ((row * frame.width + x1) * 3) as usize;
        let end = start + (crop_w * 3) as usize;
        crop.extend_from_slice(&frame.pixels[start..end]);
    }

    let image = image::RgbImage::from_raw(crop_w, crop_h, crop)
        .ok_or_else(|| CaptureError::invariant("face crop buffer size mismatch".to_string()))?;
    let mut jpeg = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(jpeg.into_inner())
}

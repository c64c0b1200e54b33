//! Detection backend client: status and health snapshots over HTTP/JSON.
//! No retries here; the poll timer is the retry cadence.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const STATUS_PATH: &str = "/api/detection_status";
const HEALTH_PATH: &str = "/api/health";
const VIDEO_PATH: &str = "/video_feed";
const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// One poll's worth of detector counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    #[serde(rename = "pothole_detected")]
    pub detected_now: bool,
    #[serde(rename = "current_detections")]
    pub current_count: u32,
    #[serde(rename = "total_detections")]
    pub total_count: u64,
    /// Fraction of recent frames with a detection, 0.0-1.0.
    pub detection_rate: f64,
    pub total_frames: u64,
    /// Backend clock, seconds since epoch.
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub backend_timestamp: Option<f64>,
}

impl StatusSample {
    /// A detection that should raise the alarm.
    pub fn is_alert(&self) -> bool {
        self.detected_now && self.current_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSample {
    pub status: String,
    #[serde(default)]
    pub model_loaded: Option<bool>,
    #[serde(default)]
    pub camera_active: Option<bool>,
}

impl HealthSample {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Outcome of the one-shot video resource probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoFeedStatus {
    Connected,
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Source of status samples; the HTTP client in production, fakes in tests.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> Result<StatusSample, FetchError>;
    async fn fetch_health(&self) -> Result<HealthSample, FetchError>;
    /// Open the video resource once and report whether it streams.
    async fn probe_video(&self, url: &str) -> VideoFeedStatus;
    /// Cache-busted video URL for the given wall-clock millis.
    fn video_url(&self, now_ms: u64) -> String;
}

pub struct StatusClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl StatusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StatusSource for StatusClient {
    async fn fetch_status(&self) -> Result<StatusSample, FetchError> {
        self.get_json(STATUS_PATH).await
    }

    async fn fetch_health(&self) -> Result<HealthSample, FetchError> {
        self.get_json(HEALTH_PATH).await
    }

    async fn probe_video(&self, url: &str) -> VideoFeedStatus {
        // No overall timeout: the body is an endless stream. Only the headers
        // and the first chunk are awaited, each bounded separately.
        let resp = match tokio::time::timeout(self.timeout, self.http.get(url).send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return VideoFeedStatus::Unavailable(FetchError::from(e).to_string()),
            Err(_) => return VideoFeedStatus::Unavailable(FetchError::Timeout.to_string()),
        };
        if !resp.status().is_success() {
            return VideoFeedStatus::Unavailable(FetchError::Status(resp.status().as_u16()).to_string());
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(MJPEG_CONTENT_TYPE) {
            return VideoFeedStatus::Unavailable(format!("unexpected content type {content_type:?}"));
        }

        let mut stream = resp.bytes_stream();
        match tokio::time::timeout(self.timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                debug!(bytes = chunk.len(), "video feed first chunk");
                VideoFeedStatus::Connected
            }
            Ok(Some(Err(e))) => VideoFeedStatus::Unavailable(FetchError::from(e).to_string()),
            Ok(None) => VideoFeedStatus::Unavailable("video stream ended immediately".into()),
            Err(_) => VideoFeedStatus::Unavailable("no video frame within timeout".into()),
        }
    }

    fn video_url(&self, now_ms: u64) -> String {
        format!("{}{}?{}", self.base_url, VIDEO_PATH, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StatusClient {
        match StatusClient::new(&server.uri(), Duration::from_millis(500)) {
            Ok(c) => c,
            Err(e) => panic!("client build failed: {e}"),
        }
    }

    #[tokio::test]
    async fn parses_status_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(STATUS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pothole_detected": true,
                "current_detections": 2,
                "total_detections": 17,
                "total_frames": 940,
                "detection_rate": 0.25,
                "timestamp": 1_700_000_000.5
            })))
            .mount(&server)
            .await;

        let sample = client(&server).fetch_status().await.ok();
        let expected = StatusSample {
            detected_now: true,
            current_count: 2,
            total_count: 17,
            detection_rate: 0.25,
            total_frames: 940,
            backend_timestamp: Some(1_700_000_000.5),
        };
        assert_eq!(sample, Some(expected));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(STATUS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).fetch_status().await.err();
        assert!(matches!(err, Some(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(STATUS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"pothole_detected\": tru"))
            .mount(&server)
            .await;

        let err = client(&server).fetch_status().await.err();
        assert!(matches!(err, Some(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "healthy"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client(&server).fetch_health().await.err();
        assert!(matches!(err, Some(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn health_reports_extra_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "healthy",
                "model_loaded": true,
                "camera_active": false
            })))
            .mount(&server)
            .await;

        let health = client(&server).fetch_health().await.ok();
        assert!(health.as_ref().is_some_and(HealthSample::is_healthy));
        assert_eq!(health.and_then(|h| h.camera_active), Some(false));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let c = match StatusClient::new("http://127.0.0.1:9", Duration::from_millis(300)) {
            Ok(c) => c,
            Err(e) => panic!("client build failed: {e}"),
        };
        let err = c.fetch_status().await.err();
        assert!(matches!(err, Some(FetchError::Network(_)) | Some(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn video_probe_checks_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VIDEO_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "multipart/x-mixed-replace; boundary=frame")
                    .set_body_bytes(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec()),
            )
            .mount(&server)
            .await;

        let c = client(&server);
        let url = c.video_url(42);
        assert!(url.ends_with("/video_feed?42"));
        assert_eq!(c.probe_video(&url).await, VideoFeedStatus::Connected);
    }

    #[tokio::test]
    async fn video_probe_rejects_plain_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VIDEO_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a stream"))
            .mount(&server)
            .await;

        let c = client(&server);
        let status = c.probe_video(&c.video_url(1)).await;
        assert!(matches!(status, VideoFeedStatus::Unavailable(_)));
    }
}

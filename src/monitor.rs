//! Detection monitor: turns status samples into alarm transitions, debounced
//! history rows and throttled notifications.
//!
//! Per sample, in this order:
//! 1. publish counters
//! 2. on an alert sample: alert count, history (debounced), alarm start,
//!    notification (throttled by the gateway)
//! 3. otherwise: stop the alarm if it is running
//!
//! A failed fetch returns before step 1 and leaves every piece of state as it was.
//!
//! Network calls are handed out as owned futures (`begin_poll`,
//! `health_check`, `probe_video`) so the event loop can keep serving user
//! commands while a request is in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::alarm::{AlarmController, AlarmState};
use crate::client::{FetchError, HealthSample, StatusSample, StatusSource, VideoFeedStatus};
use crate::history::HistoryLog;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::notify::NotificationGateway;
use crate::view::StatusView;

/// An in-flight status request, detached from the monitor borrow.
pub type StatusFetch = Pin<Box<dyn Future<Output = Result<StatusSample, FetchError>> + Send>>;

pub struct DetectionMonitor {
    source: Arc<dyn StatusSource>,
    view: Arc<dyn StatusView>,
    alarm: AlarmController,
    history: HistoryLog,
    notifications: NotificationGateway,
    metrics: Arc<MetricsRegistry>,
    history_debounce: Duration,
    /// None until the first history row; acts as minus infinity.
    last_alert_ms: Option<u64>,
}

impl DetectionMonitor {
    pub fn new(
        source: Arc<dyn StatusSource>,
        view: Arc<dyn StatusView>,
        alarm: AlarmController,
        history: HistoryLog,
        notifications: NotificationGateway,
        metrics: Arc<MetricsRegistry>,
        history_debounce: Duration,
    ) -> Self {
        Self {
            source,
            view,
            alarm,
            history,
            notifications,
            metrics,
            history_debounce,
            last_alert_ms: None,
        }
    }

    /// Startup hook: initial render and the one-time permission prompt.
    pub fn start(&self) {
        self.view.show_muted(self.alarm.is_muted());
        self.view.show_history(&self.history.snapshot());
        // Completion is observed through the gateway's shared permission slot.
        let _ = self.notifications.request_permission_if_undetermined();
    }

    /// Start one poll tick. Apply the result with [`Self::on_poll_result`].
    pub fn begin_poll(&self) -> StatusFetch {
        self.metrics.incr(metric_names::POLLS);
        let source = Arc::clone(&self.source);
        let span = self.metrics.span(metric_names::FETCH_STATUS);
        Box::pin(async move {
            let result = source.fetch_status().await;
            span.finish();
            result
        })
    }

    pub fn on_poll_result(&mut self, result: Result<StatusSample, FetchError>, now_ms: u64) {
        match result {
            Ok(sample) => self.on_sample(&sample, now_ms),
            Err(e) => {
                self.metrics.incr(metric_names::POLL_FAILURES);
                warn!(error = %e, "status poll failed");
            }
        }
    }

    /// Apply one sample taken at `now_ms`.
    pub fn on_sample(&mut self, sample: &StatusSample, now_ms: u64) {
        self.view.show_counters(sample);

        if sample.is_alert() {
            self.metrics.incr(metric_names::ALERT_SAMPLES);
            self.view.show_alert_count(sample.current_count);

            if self.history_due(now_ms) {
                self.history.add(sample.current_count, now_ms);
                self.last_alert_ms = Some(now_ms);
                self.view.show_history(&self.history.snapshot());
                info!(
                    count = sample.current_count,
                    total = sample.total_count,
                    backend_ts = ?sample.backend_timestamp,
                    "pothole_detected"
                );
            }

            if self.alarm.state() == AlarmState::Idle {
                self.alarm.start();
            }

            self.notifications.notify(sample.current_count, now_ms);
        } else if self.alarm.state() == AlarmState::Alarming {
            self.alarm.stop();
        }
    }

    fn history_due(&self, now_ms: u64) -> bool {
        match self.last_alert_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.history_debounce.as_millis() as u64,
        }
    }

    /// One-shot backend reachability check; feed the result to [`Self::on_health`].
    pub fn health_check(
        &self,
    ) -> impl Future<Output = Result<HealthSample, FetchError>> + Send + 'static {
        let source = Arc::clone(&self.source);
        let span = self.metrics.span(metric_names::FETCH_HEALTH);
        async move {
            let result = source.fetch_health().await;
            span.finish();
            result
        }
    }

    /// Log a health result. Never touches alarm, history or notification state.
    pub fn on_health(&self, result: Result<HealthSample, FetchError>) -> Option<HealthSample> {
        match result {
            Ok(health) if health.is_healthy() => {
                info!(
                    model_loaded = ?health.model_loaded,
                    camera_active = ?health.camera_active,
                    "backend healthy"
                );
                Some(health)
            }
            Ok(health) => {
                warn!(status = %health.status, "backend reports unhealthy status");
                Some(health)
            }
            Err(e) => {
                warn!(error = %e, "backend health check failed");
                None
            }
        }
    }

    /// Point the view at the cache-busted video resource and return its URL.
    pub fn begin_video(&self, now_ms: u64) -> String {
        let url = self.source.video_url(now_ms);
        self.view.show_video_source(&url);
        url
    }

    pub fn on_video_status(&self, url: &str, status: &VideoFeedStatus) {
        match status {
            VideoFeedStatus::Connected => info!(url = %url, "video feed connected"),
            VideoFeedStatus::Unavailable(reason) => {
                warn!(url = %url, reason = %reason, "video feed unavailable")
            }
        }
        self.view.show_video_status(status);
    }

    pub fn probe_video(
        &self,
        url: String,
    ) -> impl Future<Output = VideoFeedStatus> + Send + 'static {
        let source = Arc::clone(&self.source);
        async move { source.probe_video(&url).await }
    }

    /// Mute shortcut / control.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.alarm.toggle_mute();
        self.view.show_muted(muted);
        muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.alarm.set_muted(muted);
        self.view.show_muted(muted);
    }

    /// Silence shortcut: stop an active alarm without muting. The next alert
    /// sample raises it again.
    pub fn silence(&mut self) {
        if self.alarm.is_alarming() {
            debug!("alarm silenced by user");
            self.alarm.stop();
        }
    }

    /// Teardown hook.
    pub fn shutdown(&mut self) {
        self.alarm.stop();
        info!(
            history = self.history.len(),
            cues = self.alarm.cues_emitted(),
            notifications = self.notifications.emitted(),
            "monitor shut down"
        );
        self.metrics.log_summary();
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    pub fn alarm(&self) -> &AlarmController {
        &self.alarm
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn notifications(&self) -> &NotificationGateway {
        &self.notifications
    }

    pub fn last_alert_ms(&self) -> Option<u64> {
        self.last_alert_ms
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::client::FetchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted status source; an empty script yields network errors.
    #[derive(Default)]
    pub struct ScriptedSource {
        pub statuses: Mutex<VecDeque<Result<StatusSample, FetchError>>>,
        pub health: Mutex<Option<HealthSample>>,
        pub video: Mutex<Option<VideoFeedStatus>>,
    }

    impl ScriptedSource {
        pub fn push(&self, result: Result<StatusSample, FetchError>) {
            self.statuses.lock().push_back(result);
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self) -> Result<StatusSample, FetchError> {
            self.statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
        }

        async fn fetch_health(&self) -> Result<HealthSample, FetchError> {
            self.health
                .lock()
                .clone()
                .ok_or_else(|| FetchError::Network("unreachable".into()))
        }

        async fn probe_video(&self, _url: &str) -> VideoFeedStatus {
            self.video
                .lock()
                .clone()
                .unwrap_or_else(|| VideoFeedStatus::Unavailable("no camera".into()))
        }

        fn video_url(&self, now_ms: u64) -> String {
            format!("http://backend/video_feed?{now_ms}")
        }
    }

    pub fn alert(count: u32) -> StatusSample {
        StatusSample {
            detected_now: true,
            current_count: count,
            total_count: count as u64,
            detection_rate: 0.5,
            total_frames: 100,
            backend_timestamp: None,
        }
    }

    pub fn clear() -> StatusSample {
        StatusSample {
            detected_now: false,
            current_count: 0,
            total_count: 3,
            detection_rate: 0.0,
            total_frames: 120,
            backend_timestamp: None,
        }
    }
}

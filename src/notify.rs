//! Desktop notifications with permission gating and an emission throttle.
//! The throttle window runs from the last notification the platform accepted,
//! not from the last call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const NOTIFICATION_TITLE: &str = "Pothole detected!";
const NOTIFICATION_ICON: &str = "dialog-warning";
const APP_NAME: &str = "pothole-watch";

/// Platform notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Default => write!(f, "default"),
            Permission::Granted => write!(f, "granted"),
            Permission::Denied => write!(f, "denied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
}

impl Notification {
    pub fn for_detection(count: u32) -> Self {
        let plural = if count == 1 { "" } else { "s" };
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: format!("{count} pothole{plural} detected on the road."),
            icon: NOTIFICATION_ICON.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification backend error: {0}")]
    Backend(String),
}

/// OS notification surface.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// Permission as known before any prompt.
    fn permission(&self) -> Permission;
    /// Ask the platform/user. Only called while permission is `Default`.
    async fn request_permission(&self) -> Permission;
    /// Hand a notification to the platform. Must not block the caller.
    fn show(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub struct NotificationGateway {
    platform: Arc<dyn NotificationPlatform>,
    permission: Arc<RwLock<Permission>>,
    throttle: Duration,
    last_emitted_ms: Option<u64>,
    emitted: u64,
}

impl NotificationGateway {
    pub fn new(platform: Arc<dyn NotificationPlatform>, throttle: Duration) -> Self {
        let permission = platform.permission();
        Self {
            platform,
            permission: Arc::new(RwLock::new(permission)),
            throttle,
            last_emitted_ms: None,
            emitted: 0,
        }
    }

    pub fn permission(&self) -> Permission {
        *self.permission.read()
    }

    /// Prompt once if permission is undetermined. The prompt runs as its own
    /// task so the poll loop keeps ticking while it is pending.
    pub fn request_permission_if_undetermined(&self) -> Option<JoinHandle<Permission>> {
        if self.permission() != Permission::Default {
            debug!(permission = %self.permission(), "notification permission already decided");
            return None;
        }
        let platform = Arc::clone(&self.platform);
        let slot = Arc::clone(&self.permission);
        Some(tokio::spawn(async move {
            let decided = platform.request_permission().await;
            *slot.write() = decided;
            match decided {
                Permission::Granted => info!("notification permission granted"),
                other => info!(permission = %other, "notifications disabled"),
            }
            decided
        }))
    }

    /// Show a detection notification unless denied or inside the throttle window.
    pub fn notify(&mut self, count: u32, now_ms: u64) {
        if self.permission() != Permission::Granted {
            return;
        }
        if let Some(last) = self.last_emitted_ms {
            if now_ms.saturating_sub(last) <= self.throttle.as_millis() as u64 {
                return;
            }
        }
        match self.platform.show(&Notification::for_detection(count)) {
            Ok(()) => {
                self.last_emitted_ms = Some(now_ms);
                self.emitted += 1;
                debug!(count, "notification_shown");
            }
            Err(e) => warn!(error = %e, "notification failed"),
        }
    }

    pub fn last_emitted_ms(&self) -> Option<u64> {
        self.last_emitted_ms
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// How the desktop backend starts out, chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NotificationMode {
    /// Probe the notification server at startup.
    Ask,
    Allow,
    Deny,
}

/// notify-rust backed notifications.
pub struct DesktopNotifier {
    initial: Permission,
}

impl DesktopNotifier {
    pub fn new(mode: NotificationMode) -> Self {
        let initial = match mode {
            NotificationMode::Ask => Permission::Default,
            NotificationMode::Allow => Permission::Granted,
            NotificationMode::Deny => Permission::Denied,
        };
        Self { initial }
    }
}

#[async_trait]
impl NotificationPlatform for DesktopNotifier {
    fn permission(&self) -> Permission {
        self.initial
    }

    async fn request_permission(&self) -> Permission {
        match tokio::task::spawn_blocking(probe_notification_server).await {
            Ok(permission) => permission,
            Err(e) => {
                warn!(error = %e, "notification probe panicked");
                Permission::Denied
            }
        }
    }

    /// Delivery is a blocking D-Bus round trip, so it runs on the blocking
    /// pool; delivery failures are logged from there.
    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        let notification = notification.clone();
        dispatch_blocking(move || show_desktop(&notification))
    }
}

fn show_desktop(notification: &Notification) -> Result<(), NotifyError> {
    notify_rust::Notification::new()
        .appname(APP_NAME)
        .summary(&notification.title)
        .body(&notification.body)
        .icon(&notification.icon)
        .show()
        .map(|_| ())
        .map_err(|e| NotifyError::Backend(e.to_string()))
}

/// Run `deliver` on the runtime's blocking pool and return immediately.
fn dispatch_blocking<F>(deliver: F) -> Result<(), NotifyError>
where
    F: FnOnce() -> Result<(), NotifyError> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| NotifyError::Backend(format!("no runtime to deliver on: {e}")))?;
    runtime.spawn_blocking(move || {
        if let Err(e) = deliver() {
            warn!(error = %e, "notification delivery failed");
        }
    });
    Ok(())
}

/// A reachable notification daemon is the desktop equivalent of a granted prompt.
#[cfg(all(unix, not(target_os = "macos")))]
fn probe_notification_server() -> Permission {
    match notify_rust::get_server_information() {
        Ok(info) => {
            debug!(server = %info.name, "notification server found");
            Permission::Granted
        }
        Err(e) => {
            warn!(error = %e, "no notification server");
            Permission::Denied
        }
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn probe_notification_server() -> Permission {
    Permission::Granted
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    pub struct FakePlatform {
        pub initial: Permission,
        pub answer: Permission,
        pub shown: Mutex<Vec<Notification>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl FakePlatform {
        pub fn new(initial: Permission, answer: Permission) -> Self {
            Self {
                initial,
                answer,
                shown: Mutex::new(Vec::new()),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub fn granted() -> Self {
            Self::new(Permission::Granted, Permission::Granted)
        }
    }

    #[async_trait]
    impl NotificationPlatform for FakePlatform {
        fn permission(&self) -> Permission {
            self.initial
        }

        async fn request_permission(&self) -> Permission {
            self.answer
        }

        fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError::Backend("offline".into()));
            }
            self.shown.lock().push(notification.clone());
            Ok(())
        }
    }
}

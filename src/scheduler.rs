//! Event loop: poll tick, user commands, startup one-shots and teardown on a
//! single task. Every branch body runs to completion before the next event is
//! taken, so monitor state never needs a lock.
//!
//! The status fetch of a tick stays in flight as one more branch of the
//! select, so commands and shutdown are served while the backend is slow. At
//! most one fetch is outstanding; ticks that land meanwhile are skipped.
//!
//! Startup one-shots (health check, video probe) run as spawned tasks and
//! report back over a channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cancellation::run_until_cancelled;
use crate::client::{FetchError, HealthSample, StatusSample, VideoFeedStatus};
use crate::input::UserCommand;
use crate::monitor::{DetectionMonitor, StatusFetch};

/// Wall-clock source in Unix milliseconds. Injectable for tests.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn wall_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis().max(0) as u64)
}

/// Loop timings taken from the monitor configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoopTimings {
    pub poll_period: Duration,
    pub video_delay: Duration,
}

/// Results of the spawned startup one-shots.
#[derive(Debug)]
enum StartupEvent {
    Health(Result<HealthSample, FetchError>),
    Video { url: String, status: VideoFeedStatus },
}

/// Drive `monitor` until `shutdown` fires or the user quits, then run the
/// teardown hook. Returns the monitor for inspection.
pub async fn run_event_loop(
    mut monitor: DetectionMonitor,
    timings: LoopTimings,
    mut commands: mpsc::UnboundedReceiver<UserCommand>,
    shutdown: CancellationToken,
    clock: Clock,
) -> DetectionMonitor {
    let (startup_tx, mut startup_rx) = mpsc::unbounded_channel::<StartupEvent>();

    monitor.start();
    spawn_health_check(&monitor, startup_tx.clone(), shutdown.child_token());

    let mut ticker = time::interval(timings.poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let video_delay = time::sleep(timings.video_delay);
    tokio::pin!(video_delay);
    let mut video_pending = true;
    let mut commands_open = true;
    let mut in_flight: Option<StatusFetch> = None;

    info!(poll_ms = timings.poll_period.as_millis() as u64, "event loop started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                break;
            }

            cmd = commands.recv(), if commands_open => match cmd {
                Some(UserCommand::ToggleMute) => {
                    let muted = monitor.toggle_mute();
                    info!(muted, "sound toggled");
                }
                Some(UserCommand::Silence) => monitor.silence(),
                Some(UserCommand::Quit) => {
                    info!("quit requested");
                    break;
                }
                None => {
                    debug!("command channel closed");
                    commands_open = false;
                }
            },

            Some(event) = startup_rx.recv() => match event {
                StartupEvent::Health(result) => {
                    monitor.on_health(result);
                }
                StartupEvent::Video { url, status } => monitor.on_video_status(&url, &status),
            },

            _ = &mut video_delay, if video_pending => {
                video_pending = false;
                let url = monitor.begin_video(clock());
                spawn_video_probe(&monitor, url, startup_tx.clone(), shutdown.child_token());
            }

            result = settle(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                monitor.on_poll_result(result, clock());
            }

            _ = ticker.tick(), if in_flight.is_none() => {
                in_flight = Some(monitor.begin_poll());
            }
        }
    }

    // Dropping an unfinished fetch abandons the request.
    drop(in_flight);
    shutdown.cancel();
    monitor.shutdown();
    monitor
}

async fn settle(fetch: &mut Option<StatusFetch>) -> Result<StatusSample, FetchError> {
    match fetch {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

fn spawn_health_check(
    monitor: &DetectionMonitor,
    tx: mpsc::UnboundedSender<StartupEvent>,
    token: CancellationToken,
) {
    let check = monitor.health_check();
    tokio::spawn(async move {
        if let Some(result) = run_until_cancelled(&token, check).await {
            let _ = tx.send(StartupEvent::Health(result));
        }
    });
}

fn spawn_video_probe(
    monitor: &DetectionMonitor,
    url: String,
    tx: mpsc::UnboundedSender<StartupEvent>,
    token: CancellationToken,
) {
    let probe = monitor.probe_video(url.clone());
    tokio::spawn(async move {
        if let Some(status) = run_until_cancelled(&token, probe).await {
            let _ = tx.send(StartupEvent::Video { url, status });
        }
    });
}

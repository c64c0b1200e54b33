//! pothole-watch: live pothole detection monitor.
//! Main library: tracing setup, component wiring, runtime start.

pub mod alarm;
pub mod audio;
pub mod cancellation;
pub mod client;
pub mod config;
pub mod history;
pub mod input;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod scheduler;
pub mod view;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use alarm::{AlarmController, AlarmIndicator};
use client::{StatusClient, StatusSource};
use config::{Cli, MonitorConfig};
use history::HistoryLog;
use metrics::MetricsRegistry;
use monitor::DetectionMonitor;
use notify::{DesktopNotifier, NotificationGateway};
use scheduler::LoopTimings;
use view::{StatusView, TerminalView};

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must outlive the monitor.
fn init_tracing(json: bool, log_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pothole_watch=info"));

    let mut open_error = None;
    let (writer, guard, ansi) = match log_path.map(open_log_file) {
        Some(Ok(file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(guard), false)
        }
        Some(Err(e)) => {
            open_error = Some(e);
            (BoxMakeWriter::new(std::io::stderr), None, true)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    if let Some(e) = open_error {
        warn!(error = %e, "log file unavailable, logging to stderr");
    }
    guard
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Parse the command line and run the monitor until quit or Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_path = cli.log_path();
    let log_guard = init_tracing(cli.log_json, log_path.as_deref());
    if let (Some(path), Some(_)) = (&log_path, &log_guard) {
        eprintln!("pothole-watch: logging to {}", path.display());
    }
    let config = cli.into_config()?;

    info!(url = %config.base_url, "pothole-watch starting");

    // Single-threaded: poll ticks, cue ticks and commands never run in parallel.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_monitor(config))
}

async fn run_monitor(config: MonitorConfig) -> anyhow::Result<()> {
    let source: Arc<dyn StatusSource> =
        Arc::new(StatusClient::new(&config.base_url, config.request_timeout)?);
    let view = Arc::new(TerminalView::new());
    let metrics = Arc::new(MetricsRegistry::new());

    let alarm = AlarmController::new(
        audio::open_tone_sink(config.audio_enabled),
        Arc::clone(&view) as Arc<dyn AlarmIndicator>,
        config.tone,
        config.cue_period,
    );
    let notifications = NotificationGateway::new(
        Arc::new(DesktopNotifier::new(config.notifications)),
        config.notify_throttle,
    );
    let history = HistoryLog::new(config.history_capacity, config.time_format.clone());

    let mut monitor = DetectionMonitor::new(
        source,
        Arc::clone(&view) as Arc<dyn StatusView>,
        alarm,
        history,
        notifications,
        metrics,
        config.history_debounce,
    );
    if config.start_muted {
        monitor.set_muted(true);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let keyboard = if config.keyboard_enabled {
        match input::spawn_keyboard_reader(config.keys, cmd_tx) {
            Ok(handle) => {
                info!("keyboard shortcuts: space = toggle sound, esc = stop alarm, q = quit");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "keyboard unavailable, shortcuts disabled");
                None
            }
        }
    } else {
        drop(cmd_tx);
        None
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let timings = LoopTimings {
        poll_period: config.poll_period,
        video_delay: config.video_delay,
    };
    let _monitor =
        scheduler::run_event_loop(monitor, timings, cmd_rx, shutdown, scheduler::wall_clock()).await;

    // Restores the terminal before the final newline.
    drop(keyboard);
    println!();
    info!("pothole-watch stopped");
    Ok(())
}

//! Runtime configuration: command line / environment via clap, resolved into
//! a plain `MonitorConfig` whose `Default` holds the stock timings.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::audio::Tone;
use crate::history::{is_valid_time_format, DEFAULT_CAPACITY, DEFAULT_TIME_FORMAT};
use crate::input::{parse_key, KeyBindings};
use crate::notify::NotificationMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown key name: {0:?}")]
    UnknownKey(String),
    #[error("invalid backend URL {0:?}: must start with http:// or https://")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("invalid time format {0:?}")]
    InvalidTimeFormat(String),
}

/// Live pothole detection monitor.
#[derive(Debug, Parser)]
#[command(name = "pothole-watch")]
#[command(about = "Poll a pothole detection backend and raise alarms")]
#[command(version)]
pub struct Cli {
    /// Detection backend base URL
    #[arg(long, env = "POTHOLE_WATCH_URL", default_value = "http://localhost:5000")]
    pub url: String,

    /// Status poll period in milliseconds
    #[arg(long, env = "POTHOLE_WATCH_POLL_MS", default_value_t = 200)]
    pub poll_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "POTHOLE_WATCH_TIMEOUT_MS", default_value_t = 2_000)]
    pub timeout_ms: u64,

    /// Key that toggles sound
    #[arg(long, default_value = "space")]
    pub mute_key: String,

    /// Key that silences a ringing alarm
    #[arg(long, default_value = "escape")]
    pub silence_key: String,

    /// Start muted
    #[arg(long)]
    pub muted: bool,

    /// Disable audio output entirely (banner-only alarm)
    #[arg(long)]
    pub no_audio: bool,

    /// Desktop notification permission at startup
    #[arg(long, value_enum, env = "POTHOLE_WATCH_NOTIFICATIONS", default_value = "ask")]
    pub notifications: NotificationMode,

    /// strftime format for history time labels
    #[arg(long, default_value = DEFAULT_TIME_FORMAT)]
    pub time_format: String,

    /// Do not read keyboard shortcuts (for non-interactive use)
    #[arg(long)]
    pub no_keyboard: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Append logs to this file. Defaults to pothole-watch.log in the temp
    /// directory while keyboard shortcuts are active, stderr otherwise
    #[arg(long, env = "POTHOLE_WATCH_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

pub const DEFAULT_LOG_FILE: &str = "pothole-watch.log";

/// Resolved settings for one monitor run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub base_url: String,
    pub poll_period: Duration,
    pub request_timeout: Duration,
    pub cue_period: Duration,
    pub history_debounce: Duration,
    pub notify_throttle: Duration,
    pub history_capacity: usize,
    pub time_format: String,
    pub video_delay: Duration,
    pub tone: Tone,
    pub keys: KeyBindings,
    pub start_muted: bool,
    pub audio_enabled: bool,
    pub keyboard_enabled: bool,
    pub notifications: NotificationMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            poll_period: Duration::from_millis(200),
            request_timeout: Duration::from_millis(2_000),
            cue_period: Duration::from_millis(600),
            history_debounce: Duration::from_millis(2_000),
            notify_throttle: Duration::from_millis(5_000),
            history_capacity: DEFAULT_CAPACITY,
            time_format: DEFAULT_TIME_FORMAT.into(),
            video_delay: Duration::from_millis(500),
            tone: Tone::default(),
            keys: KeyBindings::default(),
            start_muted: false,
            audio_enabled: true,
            keyboard_enabled: true,
            notifications: NotificationMode::Ask,
        }
    }
}

impl Cli {
    /// Where logs go. `None` means stderr; raw mode owns the terminal, so
    /// interactive runs log to a file unless told otherwise.
    pub fn log_path(&self) -> Option<PathBuf> {
        match &self.log_file {
            Some(path) => Some(path.clone()),
            None if !self.no_keyboard => Some(std::env::temp_dir().join(DEFAULT_LOG_FILE)),
            None => None,
        }
    }

    pub fn into_config(self) -> Result<MonitorConfig, ConfigError> {
        let url = self.url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url));
        }
        if self.poll_ms == 0 {
            return Err(ConfigError::ZeroDuration("poll period"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        if !is_valid_time_format(&self.time_format) {
            return Err(ConfigError::InvalidTimeFormat(self.time_format));
        }
        Ok(MonitorConfig {
            base_url: url,
            poll_period: Duration::from_millis(self.poll_ms),
            request_timeout: Duration::from_millis(self.timeout_ms),
            time_format: self.time_format,
            keys: KeyBindings {
                mute: parse_key(&self.mute_key)?,
                silence: parse_key(&self.silence_key)?,
            },
            start_muted: self.muted,
            audio_enabled: !self.no_audio,
            keyboard_enabled: !self.no_keyboard,
            notifications: self.notifications,
            ..MonitorConfig::default()
        })
    }
}

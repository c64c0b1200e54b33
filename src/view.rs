//! Terminal rendering of live status.
//! A single status line is redrawn in place; history rows and video/health
//! notices scroll above it.

use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::style::{style, Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{queue, QueueableCommand};
use parking_lot::Mutex;
use tracing::debug;

use crate::alarm::AlarmIndicator;
use crate::client::{StatusSample, VideoFeedStatus};
use crate::history::HistoryEntry;

pub const EMPTY_HISTORY: &str = "no detections recorded";

/// Display surface the monitor publishes to. Rendering only, no decisions.
pub trait StatusView: Send + Sync {
    fn show_counters(&self, sample: &StatusSample);
    fn show_alert_count(&self, count: u32);
    /// Full history, newest first.
    fn show_history(&self, entries: &[HistoryEntry]);
    fn show_muted(&self, muted: bool);
    fn show_video_source(&self, url: &str);
    fn show_video_status(&self, status: &VideoFeedStatus);
}

/// `detection_rate` as a percentage with one decimal, e.g. "25.0%".
pub fn format_rate(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

pub fn format_history_row(entry: &HistoryEntry) -> String {
    let plural = if entry.count == 1 { "" } else { "s" };
    format!("{}  {} pothole{} detected", entry.time_label, entry.count, plural)
}

#[derive(Default)]
struct LineState {
    current: u32,
    total: u64,
    rate: f64,
    frames: u64,
    alert_count: u32,
    banner: bool,
    muted: bool,
}

impl LineState {
    fn render(&self) -> String {
        let sound = if self.muted { "muted" } else { "sound on" };
        format!(
            "current {} | total {} | rate {} | frames {} | {}",
            self.current,
            self.total,
            format_rate(self.rate),
            self.frames,
            sound
        )
    }
}

/// Crossterm view writing to stdout. Newlines are emitted as CRLF so output
/// stays aligned while the terminal is in raw mode.
pub struct TerminalView {
    state: Mutex<LineState>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LineState::default()),
        }
    }

    fn redraw(&self, state: &LineState) {
        let mut out = io::stdout().lock();
        let _ = queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        if state.banner {
            let banner = format!(" POTHOLE x{} ", state.alert_count);
            let _ = out.queue(Print(style(banner).white().on_red().bold()));
            let _ = out.queue(Print(" "));
        }
        let _ = out.queue(Print(state.render()));
        let _ = out.flush();
    }

    /// Print a line above the status line, then restore the status line.
    fn print_above(&self, line: &str) {
        let state = self.state.lock();
        {
            let mut out = io::stdout().lock();
            let _ = queue!(
                out,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(line),
                Print("\r\n")
            );
        }
        self.redraw(&state);
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmIndicator for TerminalView {
    fn set_alarm_banner(&self, active: bool) {
        let mut state = self.state.lock();
        state.banner = active;
        self.redraw(&state);
    }
}

impl StatusView for TerminalView {
    fn show_counters(&self, sample: &StatusSample) {
        let mut state = self.state.lock();
        state.current = sample.current_count;
        state.total = sample.total_count;
        state.rate = sample.detection_rate;
        state.frames = sample.total_frames;
        self.redraw(&state);
    }

    fn show_alert_count(&self, count: u32) {
        let mut state = self.state.lock();
        state.alert_count = count;
        self.redraw(&state);
    }

    fn show_history(&self, entries: &[HistoryEntry]) {
        match entries.first() {
            Some(newest) => self.print_above(&format_history_row(newest)),
            None => self.print_above(EMPTY_HISTORY),
        }
        debug!(len = entries.len(), "history rendered");
    }

    fn show_muted(&self, muted: bool) {
        let mut state = self.state.lock();
        state.muted = muted;
        self.redraw(&state);
    }

    fn show_video_source(&self, url: &str) {
        self.print_above(&format!("video feed: {url}"));
    }

    fn show_video_status(&self, status: &VideoFeedStatus) {
        match status {
            VideoFeedStatus::Connected => self.print_above("video feed connected"),
            VideoFeedStatus::Unavailable(reason) => self.print_above(&format!(
                "camera connection failed ({reason}); restart the backend"
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum ViewEvent {
        Counters(u32),
        AlertCount(u32),
        History(usize),
        Muted(bool),
        Banner(bool),
        VideoSource(String),
        VideoStatus(VideoFeedStatus),
    }

    #[derive(Default)]
    pub struct RecordingView {
        pub events: Mutex<Vec<ViewEvent>>,
    }

    impl RecordingView {
        pub fn take(&self) -> Vec<ViewEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl AlarmIndicator for RecordingView {
        fn set_alarm_banner(&self, active: bool) {
            self.events.lock().push(ViewEvent::Banner(active));
        }
    }

    impl StatusView for RecordingView {
        fn show_counters(&self, sample: &StatusSample) {
            self.events.lock().push(ViewEvent::Counters(sample.current_count));
        }
        fn show_alert_count(&self, count: u32) {
            self.events.lock().push(ViewEvent::AlertCount(count));
        }
        fn show_history(&self, entries: &[HistoryEntry]) {
            self.events.lock().push(ViewEvent::History(entries.len()));
        }
        fn show_muted(&self, muted: bool) {
            self.events.lock().push(ViewEvent::Muted(muted));
        }
        fn show_video_source(&self, url: &str) {
            self.events.lock().push(ViewEvent::VideoSource(url.to_string()));
        }
        fn show_video_status(&self, status: &VideoFeedStatus) {
            self.events.lock().push(ViewEvent::VideoStatus(status.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_shown_as_percentage() {
        assert_eq!(format_rate(0.25), "25.0%");
        assert_eq!(format_rate(0.0), "0.0%");
        assert_eq!(format_rate(1.0), "100.0%");
    }

    #[test]
    fn history_row_mentions_count() {
        let entry = HistoryEntry {
            time_label: "14:03:27".into(),
            count: 3,
            timestamp_ms: 0,
        };
        assert_eq!(format_history_row(&entry), "14:03:27  3 potholes detected");
    }

    #[test]
    fn status_line_reflects_mute() {
        let state = LineState {
            current: 1,
            total: 4,
            rate: 0.5,
            frames: 80,
            muted: true,
            ..LineState::default()
        };
        assert_eq!(
            state.render(),
            "current 1 | total 4 | rate 50.0% | frames 80 | muted"
        );
    }
}

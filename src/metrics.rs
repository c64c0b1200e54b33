//! In-process metrics: fetch latency rings and event counters, written to
//! the log once at teardown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

const LATENCY_WINDOW: usize = 1024;

/// Well-known metric names.
pub mod metric_names {
    pub const FETCH_STATUS: &str = "t_fetch_status";
    pub const FETCH_HEALTH: &str = "t_fetch_health";
    pub const POLLS: &str = "polls";
    pub const POLL_FAILURES: &str = "poll_failures";
    pub const ALERT_SAMPLES: &str = "alert_samples";
}

/// Open latency measurement; recorded into the registry by `finish`.
pub struct TimingSpan {
    name: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn finish(self) {
        let elapsed_us = self.started.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
    }
}

/// p50/p95/p99 over the most recent window, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
}

fn summarize(window: &VecDeque<f64>) -> LatencySummary {
    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let at = |p: f64| -> f64 {
        match sorted.len() {
            0 => 0.0,
            n => sorted[((p / 100.0) * (n - 1) as f64).round() as usize],
        }
    };
    LatencySummary {
        count: sorted.len(),
        p50_us: at(50.0),
        p95_us: at(95.0),
        p99_us: at(99.0),
    }
}

#[derive(Default)]
pub struct MetricsRegistry {
    latencies: Mutex<HashMap<&'static str, VecDeque<f64>>>,
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `name`. Nothing is recorded unless the span is finished.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut latencies = self.latencies.lock();
        let window = latencies
            .entry(name)
            .or_insert_with(|| VecDeque::with_capacity(LATENCY_WINDOW));
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(value_us);
    }

    pub fn incr(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn latency(&self, name: &str) -> Option<LatencySummary> {
        self.latencies.lock().get(name).map(summarize)
    }

    pub fn log_summary(&self) {
        for (name, window) in self.latencies.lock().iter() {
            let s = summarize(window);
            info!(
                metric = *name,
                count = s.count,
                p50_us = s.p50_us,
                p95_us = s.p95_us,
                p99_us = s.p99_us,
                "latency_summary"
            );
        }
        for (name, value) in self.counters.lock().iter() {
            info!(counter = *name, value = *value, "counter_summary");
        }
    }
}

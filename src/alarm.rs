//! Alarm state machine: Idle <-> Alarming, plus the user mute flag.
//! While Alarming a cue task plays the alarm tone on a fixed period; muting
//! always silences an active alarm instead of merely suppressing cues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::{Tone, ToneSink};
use crate::cancellation::PeriodicTask;

/// Alarm lifecycle. Written only by [`AlarmController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmState {
    Idle,
    Alarming,
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmState::Idle => write!(f, "Idle"),
            AlarmState::Alarming => write!(f, "Alarming"),
        }
    }
}

/// Visual alarm banner, toggled in lockstep with [`AlarmState`].
pub trait AlarmIndicator: Send + Sync {
    fn set_alarm_banner(&self, active: bool);
}

/// Everything the cue task needs, cloned into it on `start()`.
#[derive(Clone)]
struct CueEmitter {
    sink: Arc<dyn ToneSink>,
    tone: Tone,
    muted: Arc<AtomicBool>,
    emitted: Arc<AtomicU64>,
}

impl CueEmitter {
    fn emit(&self) {
        if self.muted.load(Ordering::SeqCst) {
            return;
        }
        match self.sink.play_tone(self.tone) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::SeqCst);
            }
            // Banner is already up; audio failing leaves a visual-only alarm.
            Err(e) => warn!(error = %e, "alarm cue failed"),
        }
    }
}

pub struct AlarmController {
    state: AlarmState,
    cue: Option<PeriodicTask>,
    cue_period: Duration,
    emitter: CueEmitter,
    indicator: Arc<dyn AlarmIndicator>,
}

impl AlarmController {
    pub fn new(
        sink: Arc<dyn ToneSink>,
        indicator: Arc<dyn AlarmIndicator>,
        tone: Tone,
        cue_period: Duration,
    ) -> Self {
        Self {
            state: AlarmState::Idle,
            cue: None,
            cue_period,
            emitter: CueEmitter {
                sink,
                tone,
                muted: Arc::new(AtomicBool::new(false)),
                emitted: Arc::new(AtomicU64::new(0)),
            },
            indicator,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn is_alarming(&self) -> bool {
        self.state == AlarmState::Alarming
    }

    pub fn is_muted(&self) -> bool {
        self.emitter.muted.load(Ordering::SeqCst)
    }

    /// Total cues actually handed to the tone sink.
    pub fn cues_emitted(&self) -> u64 {
        self.emitter.emitted.load(Ordering::SeqCst)
    }

    /// Enter Alarming: banner on, one cue now, then one per cue period.
    /// No-op when already alarming or muted. Needs a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_alarming() || self.is_muted() {
            return;
        }
        self.state = AlarmState::Alarming;
        self.indicator.set_alarm_banner(true);
        self.emitter.emit();

        let emitter = self.emitter.clone();
        self.cue = Some(PeriodicTask::spawn("alarm-cue", self.cue_period, move || {
            emitter.emit()
        }));
        info!(from = %AlarmState::Idle, to = %AlarmState::Alarming, "alarm_transition");
    }

    /// Leave Alarming: cancel the cue task, banner off. No-op when idle.
    pub fn stop(&mut self) {
        if !self.is_alarming() {
            return;
        }
        if let Some(cue) = self.cue.take() {
            cue.cancel();
        }
        self.emitter.sink.silence();
        self.state = AlarmState::Idle;
        self.indicator.set_alarm_banner(false);
        info!(from = %AlarmState::Alarming, to = %AlarmState::Idle, "alarm_transition");
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.emitter.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "mute_set");
        if muted {
            self.stop();
        }
    }

    /// Flip the mute flag, returning the new value.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.is_muted();
        self.set_muted(muted);
        muted
    }
}

impl Drop for AlarmController {
    fn drop(&mut self) {
        self.stop();
    }
}

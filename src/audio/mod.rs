//! Alarm audio: tone description, the `ToneSink` capability and output selection.
//! The alarm controller only decides *when* a cue plays; synthesis and the
//! output device live here and never depend on alarm state.

pub mod output;
pub mod synth;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

pub use output::CpalToneSink;
pub use synth::ToneVoice;

/// A short decaying sine pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration: Duration,
    /// Amplitude at onset (0.0-1.0).
    pub start_gain: f32,
    /// Amplitude reached at the end of the exponential ramp. Must be > 0.
    pub end_gain: f32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency_hz: 800.0,
            duration: Duration::from_millis(500),
            start_gain: 0.3,
            end_gain: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("unsupported sample format: {0}")]
    Unsupported(String),
}

/// Stateless "play this tone now" capability.
pub trait ToneSink: Send + Sync {
    fn play_tone(&self, tone: Tone) -> Result<(), AudioError>;
    /// Cut off a tone that is still ringing.
    fn silence(&self) {}
}

/// Sink used when no output device could be opened: the alarm runs visual-only.
pub struct NullToneSink;

impl ToneSink for NullToneSink {
    fn play_tone(&self, _tone: Tone) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Open the default output device, degrading to [`NullToneSink`] when audio
/// is unavailable so the monitor keeps running with the banner only.
pub fn open_tone_sink(enabled: bool) -> Arc<dyn ToneSink> {
    if !enabled {
        info!("audio disabled by configuration, alarm is visual-only");
        return Arc::new(NullToneSink);
    }
    match CpalToneSink::open() {
        Ok(sink) => {
            info!(sample_rate = sink.sample_rate(), "tone output opened");
            Arc::new(sink)
        }
        Err(e) => {
            warn!(error = %e, "audio unavailable, alarm degrades to visual-only");
            Arc::new(NullToneSink)
        }
    }
}

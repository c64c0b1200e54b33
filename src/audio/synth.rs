//! Sine voice with an exponential gain ramp, rendered sample by sample from
//! the output callback. Pre-computes its length; never allocates while playing.

use std::f32::consts::TAU;

use super::Tone;

/// One playing tone at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct ToneVoice {
    phase: f32,
    phase_step: f32,
    gain: f32,
    /// Per-sample multiplier so that gain goes start -> end over the duration.
    decay: f32,
    remaining: u64,
}

impl ToneVoice {
    pub fn new(tone: Tone, sample_rate: u32) -> Self {
        let total = (tone.duration.as_secs_f64() * sample_rate as f64).round() as u64;
        let end_gain = tone.end_gain.max(f32::MIN_POSITIVE);
        let decay = if total > 1 && tone.start_gain > 0.0 {
            (end_gain / tone.start_gain).powf(1.0 / (total - 1) as f32)
        } else {
            1.0
        };
        Self {
            phase: 0.0,
            phase_step: TAU * tone.frequency_hz / sample_rate as f32,
            gain: tone.start_gain,
            decay,
            remaining: total,
        }
    }

    /// Next mono sample, or `None` once the tone has finished.
    #[inline]
    pub fn next_sample(&mut self) -> Option<f32> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.phase.sin() * self.gain;
        self.phase = (self.phase + self.phase_step) % TAU;
        self.gain *= self.decay;
        self.remaining -= 1;
        Some(value)
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    pub fn remaining_samples(&self) -> u64 {
        self.remaining
    }

    pub fn current_gain(&self) -> f32 {
        self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_tone_lasts_half_a_second() {
        let voice = ToneVoice::new(Tone::default(), 48_000);
        assert_eq!(voice.remaining_samples(), 24_000);
    }

    #[test]
    fn gain_decays_from_start_to_end() {
        let tone = Tone::default();
        let mut voice = ToneVoice::new(tone, 8_000);
        assert!((voice.current_gain() - 0.3).abs() < 1e-6);

        let mut peak_early = 0.0f32;
        let mut peak_late = 0.0f32;
        let total = voice.remaining_samples();
        let mut i = 0;
        while let Some(s) = voice.next_sample() {
            if i < 200 {
                peak_early = peak_early.max(s.abs());
            }
            if i > total - 200 {
                peak_late = peak_late.max(s.abs());
            }
            i += 1;
        }
        assert!(peak_early > 0.25);
        assert!(peak_late < 0.02);
        assert!(voice.is_finished());
        assert_eq!(voice.next_sample(), None);
    }

    #[test]
    fn zero_duration_is_silent() {
        let tone = Tone {
            duration: Duration::ZERO,
            ..Tone::default()
        };
        let mut voice = ToneVoice::new(tone, 44_100);
        assert!(voice.is_finished());
        assert_eq!(voice.next_sample(), None);
    }
}

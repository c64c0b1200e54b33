//! cpal output stream for alarm tones.
//! The stream is created and owned by a dedicated thread (cpal streams are not
//! `Send` on every host). `play_tone` only swaps the active voice under a lock;
//! the audio callback renders it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{AudioError, Tone, ToneSink, ToneVoice};

/// Voice shared between `play_tone` callers and the audio callback.
type SharedVoice = Arc<Mutex<Option<ToneVoice>>>;

pub struct CpalToneSink {
    voice: SharedVoice,
    sample_rate: u32,
    failed: Arc<AtomicBool>,
    /// Dropping this sender tells the output thread to release the stream.
    shutdown_tx: Option<mpsc::Sender<()>>,
    output_thread: Option<JoinHandle<()>>,
}

impl CpalToneSink {
    /// Open the default output device and start a silent stream.
    pub fn open() -> Result<Self, AudioError> {
        let voice: SharedVoice = Arc::new(Mutex::new(None));
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let voice_thread = Arc::clone(&voice);
        let failed_thread = Arc::clone(&failed);
        let output_thread = std::thread::Builder::new()
            .name("tone-output".into())
            .spawn(move || {
                let stream = match build_output_stream(voice_thread, failed_thread) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Block until the sink is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("tone output thread exiting");
            })
            .map_err(|e| AudioError::Stream(format!("failed to spawn output thread: {e}")))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err(AudioError::Stream("output thread exited during setup".into()));
            }
        };

        Ok(Self {
            voice,
            sample_rate,
            failed,
            shutdown_tx: Some(shutdown_tx),
            output_thread: Some(output_thread),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl ToneSink for CpalToneSink {
    fn play_tone(&self, tone: Tone) -> Result<(), AudioError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(AudioError::Stream("output stream reported an error".into()));
        }
        // A new cue replaces whatever is still ringing.
        *self.voice.lock() = Some(ToneVoice::new(tone, self.sample_rate));
        Ok(())
    }

    fn silence(&self) {
        self.voice.lock().take();
    }
}

impl Drop for CpalToneSink {
    fn drop(&mut self) {
        self.shutdown_tx.take();
        if let Some(handle) = self.output_thread.take() {
            let _ = handle.join();
        }
    }
}

fn build_output_stream(
    voice: SharedVoice,
    failed: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let rate = config.sample_rate.0;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &config, voice, failed)?,
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &config, voice, failed)?,
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &config, voice, failed)?,
        other => return Err(AudioError::Unsupported(format!("{other:?}"))),
    };

    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("failed to start output stream: {e}")))?;
    info!(rate, channels = config.channels, "tone output stream started");

    Ok((stream, rate))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    voice: SharedVoice,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut slot = voice.lock();
                for frame in data.chunks_mut(channels) {
                    let value = slot.as_mut().and_then(ToneVoice::next_sample).unwrap_or(0.0);
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(value);
                    }
                }
                if slot.as_ref().is_some_and(ToneVoice::is_finished) {
                    *slot = None;
                }
            },
            move |err| {
                error!(error = %err, "tone output stream error");
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(format!("failed to build output stream: {e}")))
}

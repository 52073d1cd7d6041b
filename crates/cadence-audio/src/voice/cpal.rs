//! Hardware voices on the default cpal output device.

use std::sync::Arc;
use std::thread::JoinHandle;

use cadence_core::{Error, PcmFormat, Result, VoiceId};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info};

use super::{PlaybackBackend, PlaybackVoice, RefillNotifier, SoftwareVoice, VoiceState};
use crate::buffer::PcmBuffer;

/// Opens one output stream per voice on the default device.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    notifier: Option<RefillNotifier>,
}

impl CpalBackend {
    pub const fn new() -> Self {
        Self { notifier: None }
    }

    pub const fn with_notifier(notifier: RefillNotifier) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }
}

impl PlaybackBackend for CpalBackend {
    fn create_voice(&self, format: PcmFormat) -> Result<Arc<dyn PlaybackVoice>> {
        let voice: Arc<dyn PlaybackVoice> =
            Arc::new(CpalVoice::spawn(format, self.notifier.clone())?);
        Ok(voice)
    }
}

/// A [`SoftwareVoice`] rendered by a cpal output stream.
///
/// The stream lives on its own thread (`cpal::Stream` is not `Send`) until the voice is dropped.
pub struct CpalVoice {
    inner: Arc<SoftwareVoice>,
    device_name: String,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalVoice {
    pub fn spawn(format: PcmFormat, notifier: Option<RefillNotifier>) -> Result<Self> {
        if !format.is_valid() {
            return Err(Error::AudioOutput(format!("Cannot play {format:?}")));
        }
        let inner = Arc::new(match notifier {
            Some(notifier) => SoftwareVoice::with_notifier(format, notifier),
            None => SoftwareVoice::new(format),
        });

        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let render = Arc::clone(&inner);

        let thread = std::thread::Builder::new()
            .name(format!("cadence-voice-{}", inner.id().as_raw()))
            .spawn(move || match open_stream(render) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    // Blocks until the voice drops its sender.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn voice thread: {e}")))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Voice thread exited during setup".to_string()))??;

        info!("Voice {} playing on {}", inner.id(), device_name);

        Ok(Self {
            inner,
            device_name,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for CpalVoice {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Voice {} output closed", self.inner.id());
    }
}

impl PlaybackVoice for CpalVoice {
    fn id(&self) -> VoiceId {
        self.inner.id()
    }

    fn submit_buffer(&self, buffer: Arc<PcmBuffer>) -> Result<()> {
        self.inner.submit_buffer(buffer)
    }

    fn play(&self) {
        self.inner.play();
    }

    fn pause(&self) {
        self.inner.pause();
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn state(&self) -> VoiceState {
        self.inner.state()
    }

    fn flush_queued(&self) -> Vec<Arc<PcmBuffer>> {
        self.inner.flush_queued()
    }

    fn queued_count(&self) -> usize {
        self.inner.queued_count()
    }

    fn take_processed(&self) -> Option<Arc<PcmBuffer>> {
        self.inner.take_processed()
    }

    fn playback_byte_offset(&self) -> u64 {
        self.inner.playback_byte_offset()
    }
}

fn open_stream(voice: Arc<SoftwareVoice>) -> Result<(Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;

    let format = voice.format();
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    debug!("Output config for {}: {:?}", device_name, config);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, voice)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, voice)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, voice)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {other:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    Ok((stream, device_name))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    voice: Arc<SoftwareVoice>,
) -> Result<Stream> {
    let width = usize::from(voice.format().sample_width);
    let mut scratch: Vec<u8> = Vec::new();

    let err_fn = |err| {
        error!("Audio stream error: {err}");
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * width, 0);
                let samples = voice.render(&mut scratch) / width;

                for (i, sample) in data.iter_mut().enumerate() {
                    *sample = if i < samples {
                        T::from_sample(pcm_to_f32(&scratch[i * width..(i + 1) * width]))
                    } else {
                        T::from_sample(0.0f32)
                    };
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

/// One little-endian integer PCM sample as a float in `[-1, 1)`.
#[allow(clippy::cast_precision_loss)]
fn pcm_to_f32(sample: &[u8]) -> f32 {
    match *sample {
        [b] => (f32::from(b) - 128.0) / 128.0,
        [b0, b1] => f32::from(i16::from_le_bytes([b0, b1])) / 32_768.0,
        [b0, b1, b2] => {
            // sign-extend through the top byte
            let value = i32::from_le_bytes([0, b0, b1, b2]) >> 8;
            value as f32 / 8_388_608.0
        }
        [b0, b1, b2, b3] => i32::from_le_bytes([b0, b1, b2, b3]) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

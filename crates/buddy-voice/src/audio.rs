//! Audio inputs for the lip-sync analyzer
//!
//! An [`AudioInput`] hands out a stream of mono [`AudioChunk`]s. Two sources exist:
//! the microphone (CPAL) and a [`SampleTap`] that any producer can publish into,
//! used to route synthesized speech back into the analyzer.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Mono samples per chunk sent to the analyzer (default: 512)
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { chunk_size: 512 }
    }
}

/// Mono audio chunk
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,

    /// Timestamp when captured
    pub timestamp: Instant,
}

/// Source of audio for one analysis session.
pub trait AudioInput: Send + Sync {
    /// Acquire the source. Dropping the returned handle releases it.
    ///
    /// May block the calling thread until the device is running; from async
    /// code that stalls the current worker for the length of device startup.
    fn open(&self) -> VoiceResult<CaptureHandle>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// An open audio source: the chunk receiver plus whatever keeps the source alive.
pub struct CaptureHandle {
    receiver: mpsc::UnboundedReceiver<AudioChunk>,
    guard: CaptureGuard,
}

impl CaptureHandle {
    /// Split into the receiver (for the analysis task) and the guard (kept by the session).
    pub fn split(self) -> (mpsc::UnboundedReceiver<AudioChunk>, CaptureGuard) {
        (self.receiver, self.guard)
    }
}

/// Keeps a capture alive; dropping it stops the capture and waits for it to be released.
///
/// The wait is a blocking thread join. It is short (the capture thread only
/// drops its stream) but it does block an async worker if dropped there.
#[derive(Default)]
pub struct CaptureGuard {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        // Dropping the sender wakes the capture thread, which drops its stream.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio capture thread panicked");
            }
        }
    }
}

/// Microphone capture using CPAL
#[derive(Debug, Clone, Default)]
pub struct MicrophoneInput {
    config: AudioConfig,
}

impl MicrophoneInput {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl AudioInput for MicrophoneInput {
    fn open(&self) -> VoiceResult<CaptureHandle> {
        let (chunk_tx, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let chunk_size = self.config.chunk_size.max(1);

        // cpal Stream is !Send on some platforms, so it lives and dies on its own thread.
        let thread = thread::Builder::new()
            .name("buddy-mic".to_string())
            .spawn(move || {
                let stream = match build_input_stream(chunk_tx, chunk_size) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the guard drops its sender.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Microphone capture released");
            })?;

        let guard = CaptureGuard {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CaptureHandle { receiver, guard }),
            Ok(Err(e)) => Err(VoiceError::Acquisition(e.to_string())),
            Err(_) => Err(VoiceError::Acquisition(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }

    fn describe(&self) -> String {
        "microphone".to_string()
    }
}

fn build_input_stream(
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
    chunk_size: usize,
) -> VoiceResult<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.config();
    let channels = stream_config.channels.max(1) as usize;

    debug!(?stream_config, ?sample_format, "Microphone stream config");

    let mut chunker = MonoChunker::new(channels, chunk_size, chunk_tx);
    let on_error = |err| warn!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| chunker.push(data.iter().copied()),
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                chunker.push(data.iter().map(|&s| s as f32 / i16::MAX as f32))
            },
            on_error,
            None,
        )?,
        other => {
            return Err(VoiceError::AudioDevice(format!(
                "Unsupported input sample format: {:?}",
                other
            )))
        }
    };

    stream.play()?;
    info!("Microphone capture started");

    Ok(stream)
}

/// Folds interleaved frames into mono and sends fixed-size chunks.
struct MonoChunker {
    channels: usize,
    chunk_size: usize,
    frame_sum: f32,
    frame_pos: usize,
    buffer: Vec<f32>,
    tx: mpsc::UnboundedSender<AudioChunk>,
}

impl MonoChunker {
    fn new(channels: usize, chunk_size: usize, tx: mpsc::UnboundedSender<AudioChunk>) -> Self {
        Self {
            channels,
            chunk_size,
            frame_sum: 0.0,
            frame_pos: 0,
            buffer: Vec::with_capacity(chunk_size),
            tx,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            self.frame_sum += sample;
            self.frame_pos += 1;
            if self.frame_pos < self.channels {
                continue;
            }
            self.buffer.push(self.frame_sum / self.channels as f32);
            self.frame_sum = 0.0;
            self.frame_pos = 0;

            if self.buffer.len() >= self.chunk_size {
                let full = Vec::with_capacity(self.chunk_size);
                let chunk = AudioChunk {
                    samples: std::mem::replace(&mut self.buffer, full),
                    timestamp: Instant::now(),
                };
                // Receiver gone means the session ended; the guard will stop us shortly.
                let _ = self.tx.send(chunk);
            }
        }
    }
}

/// Publish/subscribe point for samples produced inside the process.
///
/// Each `open` replaces the previous listener, so only one analysis session
/// reads the tap at a time. Publishing with nobody listening is a no-op.
#[derive(Clone, Default)]
pub struct SampleTap {
    listener: Arc<Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>>,
}

impl SampleTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Send mono samples to the current listener, if any.
    pub fn publish(&self, samples: Vec<f32>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = listener.as_ref() {
            let chunk = AudioChunk {
                samples,
                timestamp: Instant::now(),
            };
            if tx.send(chunk).is_err() {
                *listener = None;
            }
        }
    }
}

impl AudioInput for SampleTap {
    fn open(&self) -> VoiceResult<CaptureHandle> {
        let (tx, receiver) = mpsc::unbounded_channel();
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(CaptureHandle {
            receiver,
            guard: CaptureGuard::default(),
        })
    }

    fn describe(&self) -> String {
        "sample tap".to_string()
    }
}

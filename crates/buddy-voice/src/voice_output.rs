//! **VoiceOutput** — network TTS played through rodio.
//!
//! [`RodioEngine`] is a [`SpeechEngine`]: each utterance is synthesized by a
//! [`TtsBackend`] on a worker thread and played on a fresh `rodio::Sink`. The
//! played samples are also published to an output tap so audio-driven lip-sync
//! can follow the real speech.

use crate::audio::{AudioInput, SampleTap};
use crate::config::VoiceConfig;
use crate::engine::{EngineEvent, SpeechEngine, Utterance, VoiceInfo};
use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Text to synthesize plus the voice parameters the backend can honour.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Option<String>,
    /// Speaking speed multiplier (1.0 = normal)
    pub speed: f32,
}

/// Backend that turns text into audio bytes (WAV/MP3).
pub trait TtsBackend: Send + Sync {
    /// Synthesize to encoded audio. An empty vec means there is nothing to play.
    fn synthesize(&self, request: &SynthesisRequest) -> VoiceResult<Vec<u8>>;

    /// Voices this backend accepts in [`SynthesisRequest::voice`].
    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }
}

/// Placeholder TTS: returns empty audio so nothing plays.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl TtsBackend for PlaceholderTts {
    fn synthesize(&self, _request: &SynthesisRequest) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// OpenAI-compatible `/audio/speech` backend (OpenAI, OpenRouter, local servers).
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd (higher quality).
    pub model: String,
    /// Voice used when the request does not name one.
    pub default_voice: String,
    client: reqwest::blocking::Client,
}

impl OpenAiTts {
    /// Build from `tts_api_url`, `tts_api_key`, `tts_model` and `tts_voice`.
    pub fn from_config(config: &VoiceConfig) -> VoiceResult<Self> {
        let api_key = config
            .tts_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                VoiceError::Config("TTS requires tts_api_key (BUDDY__TTS_API_KEY)".to_string())
            })?;
        let tts = Self::new(&config.tts_api_url, api_key, &config.tts_model)?;
        Ok(tts.with_voice(&config.tts_voice))
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_voice: "shimmer".to_string(),
            client,
        })
    }

    /// Set the voice used when a request does not name one.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    fn request_body(&self, request: &SynthesisRequest) -> serde_json::Value {
        let voice = request
            .voice
            .as_deref()
            .unwrap_or(self.default_voice.as_str());
        serde_json::json!({
            "model": self.model,
            "input": request.text.trim(),
            "voice": voice,
            // the API accepts 0.25 - 4.0
            "speed": request.speed.clamp(0.25, 4.0),
        })
    }
}

impl TtsBackend for OpenAiTts {
    fn synthesize(&self, request: &SynthesisRequest) -> VoiceResult<Vec<u8>> {
        if request.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        OPENAI_VOICES
            .iter()
            .map(|&id| VoiceInfo {
                id: id.to_string(),
                name: id.to_string(),
                lang: "en-US".to_string(),
                default: id == self.default_voice,
            })
            .collect()
    }
}

enum PlayerCommand {
    Play {
        id: u64,
        bytes: Vec<u8>,
        volume: f32,
        events: mpsc::UnboundedSender<EngineEvent>,
    },
    Pause,
    Resume,
    Stop,
}

struct Playing {
    id: u64,
    sink: Sink,
    events: mpsc::UnboundedSender<EngineEvent>,
}

/// Speech engine playing [`TtsBackend`] audio on the default output device.
pub struct RodioEngine {
    tts: Arc<dyn TtsBackend>,
    commands: Mutex<std_mpsc::Sender<PlayerCommand>>,
    /// Id of the utterance allowed to play; bumped by every speak and cancel.
    current: Arc<AtomicU64>,
    tap: SampleTap,
}

impl RodioEngine {
    /// Open the default output device. Fails with `PlatformUnsupported` when there is none.
    pub fn new(tts: Arc<dyn TtsBackend>) -> VoiceResult<Self> {
        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let current = Arc::new(AtomicU64::new(0));
        let tap = SampleTap::new();

        // OutputStream is !Send, so the player thread owns it for its whole life.
        {
            let current = Arc::clone(&current);
            let tap = tap.clone();
            thread::Builder::new()
                .name("buddy-speaker".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(output) => output,
                        Err(e) => {
                            let _ = ready_tx.send(Err(VoiceError::PlatformUnsupported(format!(
                                "no audio output: {}",
                                e
                            ))));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    run_player(&handle, command_rx, &current, &tap);
                    debug!("Speaker thread exiting");
                })?;
        }

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoiceError::PlatformUnsupported(
                    "speaker thread exited during startup".to_string(),
                ))
            }
        }
        info!("VoiceOutput: output device ready for TTS playback");

        Ok(Self {
            tts,
            commands: Mutex::new(command_tx),
            current,
            tap,
        })
    }

    fn send(&self, command: PlayerCommand) {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if commands.send(command).is_err() {
            warn!("VoiceOutput: speaker thread is gone");
        }
    }
}

impl SpeechEngine for RodioEngine {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.tts.voices()
    }

    fn speak(&self, utterance: &Utterance) -> VoiceResult<mpsc::UnboundedReceiver<EngineEvent>> {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let (events, rx) = mpsc::unbounded_channel();
        let request = SynthesisRequest {
            text: utterance.text.clone(),
            voice: utterance.voice.clone(),
            speed: utterance.rate,
        };
        if (utterance.pitch - 1.0).abs() > f32::EPSILON {
            debug!(pitch = utterance.pitch, "pitch is not supported by TTS playback");
        }

        let tts = Arc::clone(&self.tts);
        let current = Arc::clone(&self.current);
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let volume = utterance.volume;

        thread::Builder::new()
            .name("buddy-tts".to_string())
            .spawn(move || {
                let result = tts.synthesize(&request);
                if current.load(Ordering::SeqCst) != id {
                    debug!(id, "utterance superseded during synthesis");
                    return;
                }
                match result {
                    Ok(bytes) if bytes.is_empty() => {
                        let _ = events.send(EngineEvent::Start);
                        let _ = events.send(EngineEvent::End);
                    }
                    Ok(bytes) => {
                        let _ = commands.send(PlayerCommand::Play {
                            id,
                            bytes,
                            volume,
                            events,
                        });
                    }
                    Err(e) => {
                        warn!("TTS synthesis failed: {}", e);
                        let _ = events.send(EngineEvent::Error {
                            code: "synthesis-failed".to_string(),
                        });
                    }
                }
            })?;

        Ok(rx)
    }

    fn cancel(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        self.send(PlayerCommand::Stop);
    }

    fn pause(&self) {
        self.send(PlayerCommand::Pause);
    }

    fn resume(&self) {
        self.send(PlayerCommand::Resume);
    }

    fn output_tap(&self) -> Option<Arc<dyn AudioInput>> {
        Some(Arc::new(self.tap.clone()))
    }
}

fn run_player(
    handle: &OutputStreamHandle,
    commands: std_mpsc::Receiver<PlayerCommand>,
    current: &AtomicU64,
    tap: &SampleTap,
) {
    let mut playing: Option<Playing> = None;

    loop {
        match commands.recv_timeout(Duration::from_millis(20)) {
            Ok(PlayerCommand::Play {
                id,
                bytes,
                volume,
                events,
            }) => {
                if let Some(previous) = playing.take() {
                    previous.sink.stop();
                }
                if current.load(Ordering::SeqCst) != id {
                    continue;
                }
                playing = start_playback(handle, id, bytes, volume, events, tap);
            }
            Ok(PlayerCommand::Pause) => {
                if let Some(p) = &playing {
                    p.sink.pause();
                }
            }
            Ok(PlayerCommand::Resume) => {
                if let Some(p) = &playing {
                    p.sink.play();
                }
            }
            Ok(PlayerCommand::Stop) => {
                if let Some(previous) = playing.take() {
                    previous.sink.stop();
                    info!(id = previous.id, "VoiceOutput: stopped");
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if playing.as_ref().is_some_and(|p| p.sink.empty()) {
            if let Some(done) = playing.take() {
                debug!(id = done.id, "VoiceOutput: playback finished");
                let _ = done.events.send(EngineEvent::End);
            }
        }
    }
}

fn start_playback(
    handle: &OutputStreamHandle,
    id: u64,
    bytes: Vec<u8>,
    volume: f32,
    events: mpsc::UnboundedSender<EngineEvent>,
    tap: &SampleTap,
) -> Option<Playing> {
    let sink = match Sink::try_new(handle) {
        Ok(sink) => sink,
        Err(e) => {
            warn!("VoiceOutput: sink unavailable: {}", e);
            let _ = events.send(EngineEvent::Error {
                code: "audio-busy".to_string(),
            });
            return None;
        }
    };
    let source = match rodio::Decoder::new(Cursor::new(bytes)) {
        Ok(source) => source,
        Err(e) => {
            warn!("VoiceOutput: decode failed: {}", e);
            let _ = events.send(EngineEvent::Error {
                code: "audio-decode".to_string(),
            });
            return None;
        }
    };

    sink.set_volume(volume);
    sink.append(TapSource::new(source.convert_samples::<f32>(), tap.clone()));
    let _ = events.send(EngineEvent::Start);
    debug!(id, "VoiceOutput: playback started");
    Some(Playing { id, sink, events })
}

/// Samples per mono chunk published to the tap.
const TAP_CHUNK: usize = 512;

/// Pass-through source that publishes a mono copy of what it plays.
struct TapSource<S> {
    inner: S,
    tap: SampleTap,
    channels: usize,
    frame_sum: f32,
    frame_pos: usize,
    buffer: Vec<f32>,
}

impl<S> TapSource<S>
where
    S: Source<Item = f32>,
{
    fn new(inner: S, tap: SampleTap) -> Self {
        let channels = inner.channels().max(1) as usize;
        Self {
            inner,
            tap,
            channels,
            frame_sum: 0.0,
            frame_pos: 0,
            buffer: Vec::with_capacity(TAP_CHUNK),
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(TAP_CHUNK));
            self.tap.publish(chunk);
        }
    }
}

impl<S> Iterator for TapSource<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next();
        match sample {
            Some(value) => {
                self.frame_sum += value;
                self.frame_pos += 1;
                if self.frame_pos >= self.channels {
                    self.buffer.push(self.frame_sum / self.channels as f32);
                    self.frame_sum = 0.0;
                    self.frame_pos = 0;
                    if self.buffer.len() >= TAP_CHUNK {
                        self.flush();
                    }
                }
            }
            None => self.flush(),
        }
        sample
    }
}

impl<S> Source for TapSource<S>
where
    S: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

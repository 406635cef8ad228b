//! The platform speech engine seam.
//!
//! [`SpeechSynthesis`](crate::synthesis::SpeechSynthesis) never talks to audio
//! hardware directly; it drives a [`SpeechEngine`] and listens to the events the
//! engine reports for each utterance.

use crate::audio::{AudioInput, SampleTap};
use crate::cancel::{CancellationToken, PlaybackGate};
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

/// Text plus playback parameters, bound once per `speak()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    /// Engine voice identifier; `None` uses the engine default.
    pub voice: Option<String>,
    /// 0.5 - 2.0
    pub rate: f32,
    /// 0.5 - 2.0
    pub pitch: f32,
    /// 0.0 - 1.0
    pub volume: f32,
}

/// A voice offered by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub lang: String,
    pub default: bool,
}

impl VoiceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
            default: false,
        }
    }
}

/// Progress of one utterance, in the order the engine produces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Audio started playing.
    Start,
    /// A word is about to be spoken; `offset` is its byte offset in the utterance text.
    Boundary { offset: usize, fragment: String },
    /// Playback finished naturally.
    End,
    /// Playback failed; `code` is the engine's error code.
    Error { code: String },
}

/// Speech output the synthesizer drives.
///
/// Engines are shared process-wide; `cancel`, `pause` and `resume` act on
/// whatever the engine is currently playing.
pub trait SpeechEngine: Send + Sync {
    /// Whether speech output works in this runtime at all.
    fn is_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<VoiceInfo>;

    /// Begin speaking and return the utterance's event stream.
    ///
    /// The stream closes after `End` or `Error`, or early when cancelled.
    fn speak(&self, utterance: &Utterance) -> VoiceResult<mpsc::UnboundedReceiver<EngineEvent>>;

    fn cancel(&self);

    fn pause(&self);

    fn resume(&self);

    /// Audio of the speech being played, for audio-driven lip-sync.
    fn output_tap(&self) -> Option<Arc<dyn AudioInput>> {
        None
    }
}

/// Timer-paced engine that produces no sound.
///
/// Emits `Start`, one `Boundary` per word and `End`, pacing words at
/// `char_duration / rate` per character. Used for headless runs and tests.
///
/// It produces no samples itself; with [`with_output_tap`](Self::with_output_tap)
/// whatever is published into the tap is reported as its output.
pub struct SimulatedEngine {
    char_duration: Duration,
    tap: Option<SampleTap>,
    voices: Vec<VoiceInfo>,
    available: bool,
    failure: Option<String>,
    current: Mutex<Option<CancellationToken>>,
    gate: PlaybackGate,
    spoken: Mutex<Vec<Utterance>>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let mut default_voice = VoiceInfo::new("simulated", "Simulated Voice", "en-US");
        default_voice.default = true;
        Self {
            char_duration: Duration::from_millis(50),
            tap: None,
            voices: vec![default_voice],
            available: true,
            failure: None,
            current: Mutex::new(None),
            gate: PlaybackGate::new(),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn with_char_duration(mut self, char_duration: Duration) -> Self {
        self.char_duration = char_duration;
        self
    }

    pub fn with_voices(mut self, voices: Vec<VoiceInfo>) -> Self {
        self.voices = voices;
        self
    }

    /// Expose `tap` as the engine's output for audio-driven lip-sync.
    pub fn with_output_tap(mut self, tap: SampleTap) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Report `code` right after `Start` for every utterance.
    pub fn failing_with(mut self, code: impl Into<String>) -> Self {
        self.failure = Some(code.into());
        self
    }

    /// Behave like a runtime without speech output.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Every utterance handed to `speak`, in order.
    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }
}

impl SpeechEngine for SimulatedEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    fn speak(&self, utterance: &Utterance) -> VoiceResult<mpsc::UnboundedReceiver<EngineEvent>> {
        if !self.available {
            return Err(VoiceError::PlatformUnsupported(
                "simulated engine is disabled".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::PlatformUnsupported(format!("no async runtime: {}", e)))?;

        self.spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(utterance.clone());

        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let rate = if utterance.rate > 0.0 { utterance.rate } else { 1.0 };
        let per_char = Duration::from_secs_f64(self.char_duration.as_secs_f64() / rate as f64);

        runtime.spawn(play_simulated(
            utterance.text.clone(),
            per_char,
            self.failure.clone(),
            self.gate.clone(),
            token,
            tx,
        ));
        Ok(rx)
    }

    fn cancel(&self) {
        if let Some(token) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        self.gate.resume();
    }

    fn pause(&self) {
        self.gate.pause();
    }

    fn resume(&self) {
        self.gate.resume();
    }

    fn output_tap(&self) -> Option<Arc<dyn AudioInput>> {
        self.tap
            .clone()
            .map(|tap| Arc::new(tap) as Arc<dyn AudioInput>)
    }
}

async fn play_simulated(
    text: String,
    per_char: Duration,
    failure: Option<String>,
    gate: PlaybackGate,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<EngineEvent>,
) {
    let _ = tx.send(EngineEvent::Start);
    if let Some(code) = failure {
        let _ = tx.send(EngineEvent::Error { code });
        return;
    }

    for (offset, word) in words(&text) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = gate.wait_open() => {}
        }
        let _ = tx.send(EngineEvent::Boundary {
            offset,
            fragment: word.to_string(),
        });
        // the word plus the gap after it
        let spoken_for = per_char * (word.chars().count() as u32 + 1);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(spoken_for) => {}
        }
    }

    tokio::select! {
        _ = token.cancelled() => return,
        _ = gate.wait_open() => {}
    }
    if !token.is_cancelled() {
        debug!("simulated utterance finished");
        let _ = tx.send(EngineEvent::End);
    }
}

/// Whitespace-separated words with their byte offsets.
fn words(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_whitespace()
        .map(move |word| (word.as_ptr() as usize - text.as_ptr() as usize, word))
}

//! Lip-sync strategies: how mouth shapes are produced for one utterance.

use crate::analyzer::{AnalyzerConfig, AudioAnalyzer};
use crate::animator::TextAnimator;
use crate::audio::AudioInput;
use crate::cancel::{CancellationToken, PlaybackGate};
use crate::emitter::ShapeSink;
use crate::error::VoiceError;
use crate::phoneme::shape_for_fragment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of mouth shapes during speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LipSyncMode {
    /// Character-paced estimate from the text. Needs no audio.
    #[default]
    Text,
    /// Real-time spectrum analysis of an audio source.
    Audio,
    /// One shape per word-boundary event from the speech engine.
    Voice,
}

impl LipSyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LipSyncMode::Text => "text",
            LipSyncMode::Audio => "audio",
            LipSyncMode::Voice => "voice",
        }
    }
}

impl fmt::Display for LipSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LipSyncMode {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LipSyncMode::Text),
            "audio" => Ok(LipSyncMode::Audio),
            "voice" => Ok(LipSyncMode::Voice),
            other => Err(VoiceError::Config(format!(
                "Unknown lip-sync mode '{}' (expected text, audio or voice)",
                other
            ))),
        }
    }
}

/// Per-utterance shape producer driven by the synthesis orchestrator.
///
/// `start` is called when the engine reports that audio began; `stop` may be
/// called at any time, including before `start`, and more than once.
pub trait LipSyncStrategy: Send {
    fn mode(&self) -> LipSyncMode;

    fn start(&mut self, sink: ShapeSink);

    /// A word-boundary event from the engine.
    fn on_boundary(&mut self, _fragment: &str) {}

    /// Work still running after the engine finished, to be awaited before the
    /// utterance closes.
    fn take_completion(&mut self) -> Option<JoinHandle<()>> {
        None
    }

    fn stop(&mut self);
}

/// Everything a strategy may need, bound once per utterance.
pub struct StrategyParams {
    pub text: String,
    pub rate: f32,
    pub char_duration: Duration,
    pub token: CancellationToken,
    pub gate: PlaybackGate,
    pub audio_input: Option<Arc<dyn AudioInput>>,
    pub analyzer: AnalyzerConfig,
}

pub fn for_mode(mode: LipSyncMode, params: StrategyParams) -> Box<dyn LipSyncStrategy> {
    match mode {
        LipSyncMode::Text => Box::new(TextStrategy::new(params)),
        LipSyncMode::Audio => Box::new(AudioStrategy::new(params)),
        LipSyncMode::Voice => Box::new(BoundaryStrategy::new(params.token)),
    }
}

/// Runs the [`TextAnimator`] over the utterance text.
pub struct TextStrategy {
    text: String,
    animator: TextAnimator,
    token: CancellationToken,
    gate: PlaybackGate,
    task: Option<JoinHandle<()>>,
}

impl TextStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            animator: TextAnimator::for_rate(params.char_duration, params.rate),
            text: params.text,
            token: params.token,
            gate: params.gate,
            task: None,
        }
    }
}

impl LipSyncStrategy for TextStrategy {
    fn mode(&self) -> LipSyncMode {
        LipSyncMode::Text
    }

    fn start(&mut self, sink: ShapeSink) {
        if self.token.is_cancelled() || self.task.is_some() {
            return;
        }
        let animator = self.animator;
        let text = self.text.clone();
        let token = self.token.clone();
        let gate = self.gate.clone();
        self.task = Some(tokio::spawn(async move {
            let outcome = animator
                .animate(&text, &token, Some(&gate), |shape| sink(shape))
                .await;
            debug!(?outcome, "text lip-sync finished");
        }));
    }

    fn take_completion(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }

    fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Maps each engine word boundary to the shape of the word's first letter.
pub struct BoundaryStrategy {
    token: CancellationToken,
    sink: Option<ShapeSink>,
}

impl BoundaryStrategy {
    pub fn new(token: CancellationToken) -> Self {
        Self { token, sink: None }
    }
}

impl LipSyncStrategy for BoundaryStrategy {
    fn mode(&self) -> LipSyncMode {
        LipSyncMode::Voice
    }

    fn start(&mut self, sink: ShapeSink) {
        if !self.token.is_cancelled() {
            self.sink = Some(sink);
        }
    }

    fn on_boundary(&mut self, fragment: &str) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(shape_for_fragment(fragment));
        }
    }

    fn stop(&mut self) {
        self.token.cancel();
        self.sink = None;
    }
}

/// Runs an [`AudioAnalyzer`] over the engine's output, when there is one.
pub struct AudioStrategy {
    token: CancellationToken,
    input: Option<Arc<dyn AudioInput>>,
    config: AnalyzerConfig,
    analyzer: Option<AudioAnalyzer>,
}

impl AudioStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            token: params.token,
            input: params.audio_input,
            config: params.analyzer,
            analyzer: None,
        }
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzer
            .as_ref()
            .is_some_and(|analyzer| analyzer.is_running())
    }
}

impl LipSyncStrategy for AudioStrategy {
    fn mode(&self) -> LipSyncMode {
        LipSyncMode::Audio
    }

    fn start(&mut self, sink: ShapeSink) {
        if self.token.is_cancelled() {
            return;
        }
        let Some(input) = self.input.clone() else {
            debug!("No audio source for audio lip-sync; mouth stays at rest");
            return;
        };
        let mut analyzer = AudioAnalyzer::new(input, self.config.clone());
        analyzer.start(move |shape| sink(shape));
        self.analyzer = Some(analyzer);
    }

    fn stop(&mut self) {
        self.token.cancel();
        if let Some(mut analyzer) = self.analyzer.take() {
            analyzer.stop();
        }
    }
}

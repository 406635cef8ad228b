//! Speech Synthesis - the single entry point for speaking with lip-sync
//!
//! Owns the one active utterance: preprocesses text, starts the speech engine,
//! drives the selected lip-sync strategy and closes everything down when speech
//! ends, fails or is interrupted.

use crate::analyzer::AnalyzerConfig;
use crate::animator::BASE_CHAR_DURATION;
use crate::cancel::{CancellationToken, PlaybackGate};
use crate::config::{clamp_or, VoiceConfig};
use crate::emitter::{ShapeEmitter, ShapeSink, Subscription};
use crate::engine::{EngineEvent, SpeechEngine, Utterance, VoiceInfo};
use crate::error::{VoiceError, VoiceResult};
use crate::mouth::MouthShape;
use crate::preprocess::preprocess_text;
use crate::strategy::{self, LipSyncMode, LipSyncStrategy, StrategyParams};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Per-call speech options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakOptions {
    /// Engine voice id or name; unknown voices fall back to the engine default.
    pub voice: Option<String>,
    /// 0.5 - 2.0
    pub rate: f32,
    /// 0.5 - 2.0
    pub pitch: f32,
    /// 0.0 - 1.0
    pub volume: f32,
    /// Cancel the active utterance first.
    pub interrupt: bool,
    pub lip_sync_mode: LipSyncMode,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 0.9,
            pitch: 1.0,
            volume: 1.0,
            interrupt: false,
            lip_sync_mode: LipSyncMode::Text,
        }
    }
}

/// Snapshot of the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    pub is_speaking: bool,
    pub is_paused: bool,
    pub current_shape: MouthShape,
}

struct Active {
    id: u64,
    token: CancellationToken,
    /// Taken out while a strategy call runs outside the lock.
    strategy: Option<Box<dyn LipSyncStrategy>>,
    speaking: bool,
}

struct Inner {
    engine: Arc<dyn SpeechEngine>,
    emitter: ShapeEmitter,
    active: Mutex<Option<Active>>,
    gate: PlaybackGate,
    char_duration: Duration,
    analyzer: AnalyzerConfig,
}

/// Speech output with mouth-shape animation. Clones share the same state.
///
/// The shared lock is never held while listeners run, so callbacks may call
/// back into the synthesizer (including `stop` and `speak`).
///
/// Starting, starting to speak and closing an utterance each run inside an
/// emitter [`Transition`](crate::emitter::Transition), so they are ordered
/// with respect to one another across threads.
#[derive(Clone)]
pub struct SpeechSynthesis {
    inner: Arc<Inner>,
}

/// Completion of one `speak` call.
///
/// Resolves `Ok` when speech ends naturally, `Err(Interrupted)` when it is
/// stopped or superseded, and `Err(Playback { .. })` on engine failure.
/// Dropping it does not stop the speech.
#[must_use = "the completion reports how the utterance ended"]
pub struct SpeechCompletion {
    state: CompletionState,
}

enum CompletionState {
    Ready(Option<VoiceResult<()>>),
    Pending(oneshot::Receiver<VoiceResult<()>>),
}

impl SpeechCompletion {
    fn ready(result: VoiceResult<()>) -> Self {
        Self {
            state: CompletionState::Ready(Some(result)),
        }
    }
}

impl Future for SpeechCompletion {
    type Output = VoiceResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            CompletionState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(VoiceError::Interrupted))),
        }
    }
}

impl SpeechSynthesis {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self::build(engine, BASE_CHAR_DURATION, AnalyzerConfig::default())
    }

    pub fn with_config(engine: Arc<dyn SpeechEngine>, config: &VoiceConfig) -> Self {
        Self::build(engine, config.base_char_duration(), config.analyzer_config())
    }

    fn build(
        engine: Arc<dyn SpeechEngine>,
        char_duration: Duration,
        analyzer: AnalyzerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                emitter: ShapeEmitter::new(),
                active: Mutex::new(None),
                gate: PlaybackGate::new(),
                char_duration,
                analyzer,
            }),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Speak `text`. Speech starts before this returns; the completion reports how it ended.
    ///
    /// Must be called from within a tokio runtime.
    pub fn speak(&self, text: &str, options: SpeakOptions) -> SpeechCompletion {
        match self.begin(text, options) {
            Ok(Some(rx)) => SpeechCompletion {
                state: CompletionState::Pending(rx),
            },
            Ok(None) => SpeechCompletion::ready(Ok(())),
            Err(e) => SpeechCompletion::ready(Err(e)),
        }
    }

    fn begin(
        &self,
        text: &str,
        options: SpeakOptions,
    ) -> VoiceResult<Option<oneshot::Receiver<VoiceResult<()>>>> {
        let inner = &self.inner;
        if !inner.engine.is_available() {
            return Err(VoiceError::PlatformUnsupported(
                "speech synthesis is not available".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::PlatformUnsupported(format!("no async runtime: {}", e)))?;

        let text = preprocess_text(text);
        if text.is_empty() {
            debug!("Nothing to speak");
            return Ok(None);
        }

        let transition = inner.emitter.transition();
        if self.active().is_some() {
            if !options.interrupt {
                warn!(
                    "speak() while speech is active without interrupt; \
                     replacing the active utterance"
                );
            }
            self.stop();
            if self.active().is_some() {
                // a listener started newer speech while the old utterance closed
                return Err(VoiceError::Interrupted);
            }
        }

        let utterance = self.bind(&text, &options);
        let mode = options.lip_sync_mode;
        let id = inner.emitter.advance_epoch();
        let token = CancellationToken::new();
        let strategy = strategy::for_mode(
            mode,
            StrategyParams {
                text: text.clone(),
                rate: utterance.rate,
                char_duration: inner.char_duration,
                token: token.child_token(),
                gate: inner.gate.clone(),
                audio_input: match mode {
                    LipSyncMode::Audio => inner.engine.output_tap(),
                    _ => None,
                },
                analyzer: inner.analyzer.clone(),
            },
        );
        inner.gate.resume();

        *self.active() = Some(Active {
            id,
            token: token.clone(),
            strategy: Some(strategy),
            speaking: false,
        });

        let events = match inner.engine.speak(&utterance) {
            Ok(events) => events,
            Err(e) => {
                if let Some(active) = self.take_active(id) {
                    self.close(active);
                }
                return Err(e);
            }
        };
        drop(transition);

        info!(
            id,
            mode = %mode,
            chars = text.chars().count(),
            rate = utterance.rate,
            "🗣️ Speaking"
        );

        let (done_tx, done_rx) = oneshot::channel();
        runtime.spawn(self.clone().drive(id, token, events, done_tx));
        Ok(Some(done_rx))
    }

    /// Bind options onto an engine utterance, clamping out-of-range values.
    fn bind(&self, text: &str, options: &SpeakOptions) -> Utterance {
        Utterance {
            text: text.to_string(),
            voice: self.resolve_voice(options.voice.as_deref()),
            rate: clamp_or(options.rate, 0.5, 2.0, 0.9),
            pitch: clamp_or(options.pitch, 0.5, 2.0, 1.0),
            volume: clamp_or(options.volume, 0.0, 1.0, 1.0),
        }
    }

    fn resolve_voice(&self, requested: Option<&str>) -> Option<String> {
        let requested = requested.map(str::trim).filter(|v| !v.is_empty())?;
        let voices = self.inner.engine.voices();
        if voices.is_empty() {
            return Some(requested.to_string());
        }
        match voices
            .iter()
            .find(|v| v.id == requested || v.name.eq_ignore_ascii_case(requested))
        {
            Some(voice) => Some(voice.id.clone()),
            None => {
                warn!("Unknown voice '{}', using the engine default", requested);
                None
            }
        }
    }

    async fn drive(
        self,
        id: u64,
        token: CancellationToken,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        done: oneshot::Sender<VoiceResult<()>>,
    ) {
        let result = loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break Err(VoiceError::Interrupted),
                event = events.recv() => event,
            };

            match event {
                Some(EngineEvent::Start) => self.on_start(id),
                Some(EngineEvent::Boundary { offset, fragment }) => {
                    debug!(id, offset, %fragment, "word boundary");
                    self.with_strategy(id, |strategy| strategy.on_boundary(&fragment));
                }
                Some(EngineEvent::End) => {
                    // let text animation finish its last pause and close the mouth
                    let completion = self
                        .with_strategy(id, |strategy| strategy.take_completion())
                        .flatten();
                    if let Some(completion) = completion {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break Err(VoiceError::Interrupted),
                            _ = completion => {}
                        }
                    }
                    break Ok(());
                }
                Some(EngineEvent::Error { code }) => break Err(VoiceError::playback(code)),
                None => break Err(VoiceError::playback("interrupted")),
            }
        };

        {
            let _transition = self.inner.emitter.transition();
            if let Some(active) = self.take_active(id) {
                self.close(active);
            }
        }
        match &result {
            Ok(()) => info!(id, "✅ Speech finished"),
            Err(VoiceError::Interrupted) => debug!(id, "Speech interrupted"),
            Err(e) => warn!(id, "Speech failed: {}", e),
        }
        let _ = done.send(result);
    }

    fn on_start(&self, id: u64) {
        {
            let _transition = self.inner.emitter.transition();
            {
                let mut active = self.active();
                match active.as_mut() {
                    Some(a) if a.id == id && !a.speaking => a.speaking = true,
                    _ => return,
                }
            }
            self.inner.emitter.emit_state(id, true);
        }
        let sink = self.inner.emitter.sink(id);
        self.with_strategy(id, |strategy| strategy.start(sink));
    }

    /// Run `f` on the active strategy with the lock released.
    fn with_strategy<R>(
        &self,
        id: u64,
        f: impl FnOnce(&mut Box<dyn LipSyncStrategy>) -> R,
    ) -> Option<R> {
        let mut strategy = {
            let mut active = self.active();
            match active.as_mut() {
                Some(a) if a.id == id => a.strategy.take()?,
                _ => return None,
            }
        };

        let result = f(&mut strategy);

        let mut active = self.active();
        match active.as_mut() {
            Some(a) if a.id == id && a.strategy.is_none() => a.strategy = Some(strategy),
            _ => {
                drop(active);
                strategy.stop();
            }
        }
        Some(result)
    }

    fn take_active(&self, id: u64) -> Option<Active> {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            active.take()
        } else {
            None
        }
    }

    /// Tear down an utterance that has already been removed from the active slot.
    ///
    /// Callers hold a transition, so nothing from another thread lands between
    /// the removal and the closing `DEFAULT`/`false`.
    fn close(&self, active: Active) {
        active.token.cancel();
        if let Some(mut strategy) = active.strategy {
            strategy.stop();
        }
        self.inner.emitter.retire(active.speaking);
    }

    /// Cancel `active` at the engine, then close it.
    fn interrupt(&self, active: Active) {
        // before the engine drops its event stream, so the driver reads this as an interruption
        active.token.cancel();
        self.inner.engine.cancel();
        self.inner.gate.resume();
        info!(id = active.id, "🛑 Speech stopped");
        self.close(active);
    }

    /// Cancel the active utterance, if any. Safe to call at any time.
    pub fn stop(&self) {
        let _transition = self.inner.emitter.transition();
        let active = self.active().take();
        match active {
            Some(active) => self.interrupt(active),
            None => {
                self.inner.engine.cancel();
                self.inner.gate.resume();
            }
        }
    }

    /// Pause speech and text animation. No-op unless speaking.
    pub fn pause(&self) {
        if self.is_speaking() {
            self.inner.engine.pause();
            self.inner.gate.pause();
            debug!("Speech paused");
        }
    }

    /// Resume paused speech. No-op unless speaking.
    pub fn resume(&self) {
        if self.is_speaking() {
            self.inner.engine.resume();
            self.inner.gate.resume();
            debug!("Speech resumed");
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.active().as_ref().is_some_and(|a| a.speaking)
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            is_speaking: self.is_speaking(),
            is_paused: self.inner.gate.is_paused(),
            current_shape: self.inner.emitter.current_shape(),
        }
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.inner.engine.voices()
    }

    /// Listen for mouth shapes until the returned subscription is dropped.
    pub fn on_shape_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(MouthShape) + Send + Sync + 'static,
    {
        self.inner.emitter.subscribe_shape(Arc::new(listener))
    }

    /// Listen for speaking/not-speaking changes until the subscription is dropped.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.emitter.subscribe_state(Arc::new(listener))
    }

    /// Replace the single bound shape callback (last caller wins).
    pub fn set_phoneme_change_callback<F>(&self, callback: F)
    where
        F: Fn(MouthShape) + Send + Sync + 'static,
    {
        self.inner.emitter.bind_shape(Some(Arc::new(callback)));
    }

    /// Replace the single bound state callback (last caller wins).
    pub fn set_state_change_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.emitter.bind_state(Some(Arc::new(callback)));
    }

    pub fn clear_callbacks(&self) {
        self.inner.emitter.bind_shape(None);
        self.inner.emitter.bind_state(None);
    }

    /// Sink for shapes produced outside the synthesizer (e.g. a microphone
    /// analyzer in audio mode). Only available while speaking, and it goes quiet
    /// once that utterance ends.
    pub fn shape_sink(&self) -> Option<ShapeSink> {
        let active = self.active();
        let id = active.as_ref().filter(|a| a.speaking)?.id;
        drop(active);
        Some(self.inner.emitter.sink(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;

    fn synth_with_voices() -> SpeechSynthesis {
        let mut nova = VoiceInfo::new("nova", "Nova", "en-US");
        nova.default = true;
        let onyx = VoiceInfo::new("onyx", "Onyx", "en-GB");
        let engine = SimulatedEngine::new().with_voices(vec![nova, onyx]);
        SpeechSynthesis::new(Arc::new(engine))
    }

    #[test]
    fn default_options() {
        let options = SpeakOptions::default();
        assert_eq!(options.rate, 0.9);
        assert_eq!(options.pitch, 1.0);
        assert_eq!(options.volume, 1.0);
        assert!(!options.interrupt);
        assert_eq!(options.lip_sync_mode, LipSyncMode::Text);
    }

    #[test]
    fn options_are_clamped_when_bound() {
        let synth = synth_with_voices();
        let utterance = synth.bind(
            "hi",
            &SpeakOptions {
                rate: 9.0,
                pitch: 0.0,
                volume: -1.0,
                ..Default::default()
            },
        );
        assert_eq!(utterance.rate, 2.0);
        assert_eq!(utterance.pitch, 0.5);
        assert_eq!(utterance.volume, 0.0);
    }

    #[test]
    fn voices_resolve_by_id_or_name() {
        let synth = synth_with_voices();
        assert_eq!(synth.resolve_voice(Some("onyx")).as_deref(), Some("onyx"));
        assert_eq!(synth.resolve_voice(Some("NOVA")).as_deref(), Some("nova"));
        assert_eq!(synth.resolve_voice(Some("robot")), None);
        assert_eq!(synth.resolve_voice(Some("  ")), None);
        assert_eq!(synth.resolve_voice(None), None);
        assert_eq!(synth.voices().len(), 2);
    }

    #[test]
    fn speaking_outside_a_runtime_is_unsupported() {
        let synth = synth_with_voices();
        let result = synth.begin("hello", SpeakOptions::default());
        assert!(matches!(result, Err(VoiceError::PlatformUnsupported(_))));
    }

    #[test]
    fn idle_controls_are_no_ops() {
        let synth = synth_with_voices();
        synth.pause();
        synth.resume();
        synth.stop();
        synth.stop();
        assert_eq!(
            synth.state(),
            PlaybackState {
                is_speaking: false,
                is_paused: false,
                current_shape: MouthShape::Default,
            }
        );
        assert!(synth.shape_sink().is_none());
    }
}

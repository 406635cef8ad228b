//! # Buddy Voice - Speech Output with Lip-Sync
//!
//! Speaks text through a pluggable speech engine while producing a stream of
//! mouth shapes for an animated face. Shapes come from one of three strategies:
//! a character-paced text estimate, live spectrum analysis of audio, or the
//! engine's word-boundary events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      SpeechSynthesis                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────┐      │
//! │  │  Preprocess  │ → │ SpeechEngine │ → │  EngineEvents  │      │
//! │  │ (Dr.→Doctor) │   │ (rodio/sim)  │   │ start/word/end │      │
//! │  └──────────────┘   └──────┬───────┘   └───────┬────────┘      │
//! │                            │ output tap        │               │
//! │  ┌──────────────┐   ┌──────▼───────┐   ┌───────▼────────┐      │
//! │  │ TextAnimator │   │AudioAnalyzer │   │   Boundaries   │      │
//! │  │  (phoneme)   │   │  (rustfft)   │   │   (phoneme)    │      │
//! │  └──────┬───────┘   └──────┬───────┘   └───────┬────────┘      │
//! │         └──────────────────┼────────────────────┘              │
//! │                     ┌──────▼───────┐                           │
//! │                     │ ShapeEmitter │ → MouthShape listeners    │
//! │                     │ (epoch gate) │                           │
//! │                     └──────────────┘                           │
//! └────────────────────────────────────────────────────────────────┘
//! ```

pub mod analyzer;
pub mod animator;
pub mod audio;
pub mod cancel;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod mouth;
pub mod phoneme;
pub mod preprocess;
pub mod spectrum;
pub mod strategy;
pub mod synthesis;
pub mod voice_output;

pub use analyzer::{AnalysisSession, AnalyzerConfig, AudioAnalyzer};
pub use animator::{AnimationOutcome, TextAnimator, BASE_CHAR_DURATION};
pub use audio::{
    AudioChunk, AudioConfig, AudioInput, CaptureGuard, CaptureHandle, MicrophoneInput, SampleTap,
};
pub use cancel::{CancellationToken, PlaybackGate};
pub use config::VoiceConfig;
pub use emitter::{ShapeEmitter, ShapeSink, StateListener, Subscription, Transition};
pub use engine::{EngineEvent, SimulatedEngine, SpeechEngine, Utterance, VoiceInfo};
pub use error::{VoiceError, VoiceResult};
pub use mouth::{classify, BandLayout, FrequencyBands, MouthShape};
pub use phoneme::{estimate, estimate_single, shape_for_fragment};
pub use preprocess::preprocess_text;
pub use spectrum::{SpectrumAnalyzer, SpectrumConfig};
pub use strategy::{LipSyncMode, LipSyncStrategy};
pub use synthesis::{PlaybackState, SpeakOptions, SpeechCompletion, SpeechSynthesis};
pub use voice_output::{OpenAiTts, PlaceholderTts, RodioEngine, SynthesisRequest, TtsBackend};

//! Error types for the Buddy voice system

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while speaking or animating
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Speech synthesis or audio APIs are not available in this runtime.
    #[error("Platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// The speech engine reported an error mid-utterance.
    #[error("Speech playback failed: {code}")]
    Playback { code: String },

    /// The utterance was cancelled by `stop()` or an interrupting `speak()`.
    #[error("Speech interrupted")]
    Interrupted,

    /// Microphone or audio source could not be acquired.
    #[error("Audio acquisition failed: {0}")]
    Acquisition(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Playback error carrying the engine's error code.
    pub fn playback(code: impl Into<String>) -> Self {
        VoiceError::Playback { code: code.into() }
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

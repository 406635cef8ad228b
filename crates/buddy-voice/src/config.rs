//! Voice configuration: defaults, then an optional file, then `BUDDY__*` env vars.

use crate::analyzer::AnalyzerConfig;
use crate::audio::AudioConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::spectrum::SpectrumConfig;
use crate::strategy::LipSyncMode;
use crate::synthesis::SpeakOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<String>,
    pub lip_sync_mode: LipSyncMode,
    /// Text animator time per letter at rate 1.0
    pub base_char_ms: u64,
    pub fft_size: usize,
    pub smoothing: f32,
    pub frame_interval_ms: u64,
    pub capture_chunk: usize,
    pub tts_api_url: String,
    pub tts_api_key: Option<String>,
    pub tts_model: String,
    pub tts_voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
            lip_sync_mode: LipSyncMode::Text,
            base_char_ms: 50,
            fft_size: 2048,
            smoothing: 0.8,
            frame_interval_ms: 16,
            capture_chunk: 512,
            tts_api_url: "https://api.openai.com/v1".to_string(),
            tts_api_key: None,
            tts_model: "tts-1".to_string(),
            tts_voice: "shimmer".to_string(),
        }
    }
}

impl VoiceConfig {
    /// Load from `BUDDY_CONFIG` (default `config/voice`, extension optional) and
    /// `BUDDY__`-prefixed environment variables.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("BUDDY_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("rate", defaults.rate as f64)?
            .set_default("pitch", defaults.pitch as f64)?
            .set_default("volume", defaults.volume as f64)?
            .set_default("lip_sync_mode", defaults.lip_sync_mode.as_str())?
            .set_default("base_char_ms", defaults.base_char_ms as i64)?
            .set_default("fft_size", defaults.fft_size as i64)?
            .set_default("smoothing", defaults.smoothing as f64)?
            .set_default("frame_interval_ms", defaults.frame_interval_ms as i64)?
            .set_default("capture_chunk", defaults.capture_chunk as i64)?
            .set_default("tts_api_url", defaults.tts_api_url)?
            .set_default("tts_model", defaults.tts_model)?
            .set_default("tts_voice", defaults.tts_voice)?;

        let built = builder
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("BUDDY").separator("__"))
            .build()?;

        let loaded: Self = built.try_deserialize()?;
        loaded.validated()
    }

    /// Clamp speech parameters into range and reject unusable analysis settings.
    pub fn validated(mut self) -> VoiceResult<Self> {
        self.rate = clamp_or(self.rate, 0.5, 2.0, 0.9);
        self.pitch = clamp_or(self.pitch, 0.5, 2.0, 1.0);
        self.volume = clamp_or(self.volume, 0.0, 1.0, 1.0);
        self.spectrum().validate()?;
        if self.base_char_ms == 0 {
            return Err(VoiceError::Config("base_char_ms must be positive".to_string()));
        }
        if self.frame_interval_ms == 0 {
            return Err(VoiceError::Config(
                "frame_interval_ms must be positive".to_string(),
            ));
        }
        if self.capture_chunk == 0 {
            return Err(VoiceError::Config("capture_chunk must be positive".to_string()));
        }
        Ok(self)
    }

    pub fn speak_options(&self) -> SpeakOptions {
        SpeakOptions {
            voice: self.voice.clone(),
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
            interrupt: false,
            lip_sync_mode: self.lip_sync_mode,
        }
    }

    pub fn spectrum(&self) -> SpectrumConfig {
        SpectrumConfig {
            fft_size: self.fft_size,
            smoothing: self.smoothing,
            ..SpectrumConfig::default()
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            spectrum: self.spectrum(),
            frame_interval: Duration::from_millis(self.frame_interval_ms),
        }
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            chunk_size: self.capture_chunk,
        }
    }

    pub fn base_char_duration(&self) -> Duration {
        Duration::from_millis(self.base_char_ms)
    }
}

/// Clamp into `[min, max]`; non-finite values fall back to `default`.
pub(crate) fn clamp_or(value: f32, min: f32, max: f32, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VoiceConfig::default().validated().unwrap();
        assert_eq!(config.rate, 0.9);
        assert_eq!(config.lip_sync_mode, LipSyncMode::Text);
        assert_eq!(config.base_char_duration(), Duration::from_millis(50));
        assert_eq!(config.analyzer_config().frame_interval, Duration::from_millis(16));
        assert_eq!(config.audio_config().chunk_size, 512);
    }

    #[test]
    fn speech_parameters_are_clamped() {
        let config = VoiceConfig {
            rate: 5.0,
            pitch: 0.1,
            volume: f32::NAN,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(config.rate, 2.0);
        assert_eq!(config.pitch, 0.5);
        assert_eq!(config.volume, 1.0);
    }

    #[test]
    fn bad_fft_size_is_rejected() {
        let err = VoiceConfig {
            fft_size: 1000,
            ..Default::default()
        }
        .validated()
        .unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }

    #[test]
    fn speak_options_follow_config() {
        let config = VoiceConfig {
            voice: Some("nova".to_string()),
            lip_sync_mode: LipSyncMode::Voice,
            ..Default::default()
        };
        let options = config.speak_options();
        assert_eq!(options.voice.as_deref(), Some("nova"));
        assert_eq!(options.lip_sync_mode, LipSyncMode::Voice);
        assert!(!options.interrupt);
    }

    // The only test that touches the process environment.
    #[test]
    fn load_layers_defaults_file_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.toml");
        std::fs::write(
            &path,
            "rate = 1.5\nlip_sync_mode = \"voice\"\ntts_voice = \"nova\"\n",
        )
        .unwrap();

        std::env::set_var("BUDDY_CONFIG", &path);
        std::env::set_var("BUDDY__TTS_VOICE", "onyx");
        let layered = VoiceConfig::load();
        std::env::set_var("BUDDY_CONFIG", dir.path().join("missing"));
        std::env::remove_var("BUDDY__TTS_VOICE");
        let defaults = VoiceConfig::load();
        std::env::remove_var("BUDDY_CONFIG");

        let layered = layered.unwrap();
        assert_eq!(layered.rate, 1.5);
        assert_eq!(layered.lip_sync_mode, LipSyncMode::Voice);
        assert_eq!(layered.tts_voice, "onyx");
        assert_eq!(layered.tts_model, "tts-1");
        assert_eq!(layered.fft_size, 2048);

        let defaults = defaults.unwrap();
        assert_eq!(defaults.rate, 0.9);
        assert_eq!(defaults.tts_voice, "shimmer");
        assert_eq!(defaults.lip_sync_mode, LipSyncMode::Text);
    }

    #[test]
    fn partial_file_contents_fill_from_defaults() {
        let config: VoiceConfig =
            serde_json::from_str(r#"{"rate": 1.2, "lip_sync_mode": "audio"}"#).unwrap();
        assert_eq!(config.rate, 1.2);
        assert_eq!(config.lip_sync_mode, LipSyncMode::Audio);
        assert_eq!(config.fft_size, 2048);
    }
}

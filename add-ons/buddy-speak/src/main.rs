//! Buddy Speak
//!
//! Speaks its command-line text (or each line of stdin) and animates Buddy's
//! mouth in the terminal. Uses OpenAI-compatible TTS through the speakers when
//! `BUDDY__TTS_API_KEY` is set, otherwise the silent simulated engine.
//!
//! `--mode=text|voice|audio` picks the lip-sync strategy.

mod face;

use anyhow::Context;
use buddy_voice::{
    LipSyncMode, OpenAiTts, RodioEngine, SimulatedEngine, SpeakOptions, SpeechEngine,
    SpeechSynthesis, VoiceConfig,
};
use std::io::BufRead;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[buddy-speak] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = VoiceConfig::load().context("load VoiceConfig")?;

    let mut options = config.speak_options();
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.strip_prefix("--mode=") {
            Some(mode) => options.lip_sync_mode = mode.parse::<LipSyncMode>()?,
            None => words.push(arg),
        }
    }

    // The blocking HTTP client inside the TTS backend must be built and dropped
    // outside the async runtime.
    let engine = select_engine(&config);
    let synth = SpeechSynthesis::with_config(engine, &config);
    synth.set_phoneme_change_callback(face::render);
    synth.set_state_change_callback(|speaking| {
        if !speaking {
            println!();
        }
    });

    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    let result = runtime.block_on(run(&synth, words, options));
    drop(runtime);
    result
}

async fn run(
    synth: &SpeechSynthesis,
    words: Vec<String>,
    options: SpeakOptions,
) -> anyhow::Result<()> {
    tracing::info!(mode = %options.lip_sync_mode, "Buddy ready");

    if !words.is_empty() {
        say(synth, &words.join(" "), options).await;
        return Ok(());
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        if !line.trim().is_empty() {
            say(synth, &line, options.clone()).await;
        }
    }
    Ok(())
}

fn select_engine(config: &VoiceConfig) -> Arc<dyn SpeechEngine> {
    if config.tts_api_key.is_some() {
        let engine = OpenAiTts::from_config(config)
            .and_then(|tts| RodioEngine::new(Arc::new(tts)));
        match engine {
            Ok(engine) => {
                tracing::info!(
                    model = %config.tts_model,
                    voice = %config.tts_voice,
                    "Using OpenAI TTS"
                );
                return Arc::new(engine);
            }
            Err(e) => tracing::warn!(
                error = %e,
                "TTS playback unavailable; falling back to silent speech"
            ),
        }
    }
    Arc::new(SimulatedEngine::new())
}

/// Speak one line; CTRL-C cuts it short.
async fn say(synth: &SpeechSynthesis, text: &str, options: SpeakOptions) {
    let speech = synth.speak(text, options);
    tokio::select! {
        result = speech => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "speech failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; stopping speech");
            synth.stop();
        }
    }
}

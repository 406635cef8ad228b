//! Lip-Sync Demo — the three lip-sync modes side by side.
//!
//! Speaks one sentence per mode through the simulated engine and prints the
//! mouth shapes as they arrive. With `--mic`, also runs the audio analyzer on
//! the microphone for a few seconds (requires an input device).

use buddy_voice::{
    AudioAnalyzer, LipSyncMode, MicrophoneInput, SimulatedEngine, SpeechSynthesis, VoiceConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = VoiceConfig::load()?;
    let synth = SpeechSynthesis::with_config(Arc::new(SimulatedEngine::new()), &config);

    let started = Instant::now();
    let _shapes = synth.on_shape_change(move |shape| {
        println!("{:>6}ms  {}", started.elapsed().as_millis(), shape);
    });
    let _states = synth.on_state_change(|speaking| {
        info!("{}", if speaking { "🗣️  speaking" } else { "🤐 quiet" });
    });

    for mode in [LipSyncMode::Text, LipSyncMode::Voice] {
        info!("── {} mode ──", mode);
        let mut options = config.speak_options();
        options.lip_sync_mode = mode;
        synth
            .speak("Hello there, Dr. Smith! How are you today?", options)
            .await?;
    }

    if std::env::args().any(|arg| arg == "--mic") {
        info!("── microphone analysis (5s) ──");
        let input = Arc::new(MicrophoneInput::new(config.audio_config()));
        let mut analyzer = AudioAnalyzer::new(input, config.analyzer_config());
        let started = Instant::now();
        let mut last = None;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        // opening the device blocks until it is running
        let started_mic = tokio::task::block_in_place(|| {
            analyzer.start(move |shape| {
                let _ = tx.send(shape);
            })
        });
        if started_mic {
            let deadline = tokio::time::sleep(Duration::from_secs(5));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    Some(shape) = rx.recv() => {
                        if last != Some(shape) {
                            println!("{:>6}ms  {}", started.elapsed().as_millis(), shape);
                            last = Some(shape);
                        }
                    }
                }
            }
            tokio::task::block_in_place(|| analyzer.stop());
        }
    }

    info!("Done.");
    Ok(())
}

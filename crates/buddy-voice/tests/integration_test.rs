//! Integration tests for speech synthesis with lip-sync
//!
//! Driven by the simulated engine on a paused clock, so no audio hardware is needed.

use buddy_voice::{
    LipSyncMode, MouthShape, SampleTap, SimulatedEngine, SpeakOptions, SpeechEngine,
    SpeechSynthesis, Subscription, VoiceError, VoiceInfo,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Shape(MouthShape),
    Speaking(bool),
    Marker,
}

/// Records shapes and state changes into one ordered log.
struct Recorder {
    log: Arc<Mutex<Vec<Seen>>>,
    _shapes: Subscription,
    _states: Subscription,
}

impl Recorder {
    fn attach(synth: &SpeechSynthesis) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shapes = {
            let log = Arc::clone(&log);
            synth.on_shape_change(move |shape| log.lock().unwrap().push(Seen::Shape(shape)))
        };
        let states = {
            let log = Arc::clone(&log);
            synth.on_state_change(move |speaking| {
                log.lock().unwrap().push(Seen::Speaking(speaking))
            })
        };
        Self {
            log,
            _shapes: shapes,
            _states: states,
        }
    }

    fn mark(&self) {
        self.log.lock().unwrap().push(Seen::Marker);
    }

    fn all(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    fn shapes(&self) -> Vec<MouthShape> {
        self.all()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Shape(shape) => Some(shape),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<bool> {
        self.all()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Speaking(speaking) => Some(speaking),
                _ => None,
            })
            .collect()
    }
}

fn setup(engine: SimulatedEngine) -> (Arc<SimulatedEngine>, SpeechSynthesis) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = Arc::new(engine);
    let synth = SpeechSynthesis::new(Arc::clone(&engine) as Arc<dyn SpeechEngine>);
    (engine, synth)
}

fn at_rate(rate: f32) -> SpeakOptions {
    SpeakOptions {
        rate,
        ..Default::default()
    }
}

/// Voiced buzz: harmonics of 110 Hz, one analysis window long.
fn buzz() -> Vec<f32> {
    (0..2048)
        .map(|i| {
            let t = i as f32 / 48_000.0;
            (1..=16)
                .map(|h| 0.04 * (2.0 * std::f32::consts::PI * 110.0 * h as f32 * t).sin())
                .sum()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn speaks_expanded_text_and_closes_the_mouth() {
    use MouthShape::*;
    let (engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    synth
        .speak("Hello, Dr. Smith!", at_rate(1.0))
        .await
        .expect("speech should finish");

    assert_eq!(engine.spoken()[0].text, "Hello, Doctor Smith!");
    assert_eq!(
        recorder.shapes(),
        vec![
            Default, Aei, L, L, O, // Hello
            Default, Default, // ", "
            Cdgknstxyz, O, Cdgknstxyz, Cdgknstxyz, O, Default, // Doctor
            Default,
            Cdgknstxyz, Bmp, Aei, Th, Default, // Smith
            Default, // "!"
            Default, // animation closes
            Default, // utterance closes
        ]
    );
    assert_eq!(recorder.states(), vec![true, false]);
    assert!(!synth.is_speaking());
    assert_eq!(synth.state().current_shape, MouthShape::Default);
}

#[tokio::test(start_paused = true)]
async fn interrupting_silences_the_previous_utterance() {
    let (engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    let first = synth.speak("oooo oooo oooo oooo oooo", at_rate(2.0));
    sleep(Duration::from_millis(35)).await;
    assert!(recorder.shapes().contains(&MouthShape::O));

    recorder.mark();
    let second = synth.speak(
        "mmm",
        SpeakOptions {
            interrupt: true,
            ..at_rate(2.0)
        },
    );

    assert!(matches!(first.await, Err(VoiceError::Interrupted)));
    second.await.expect("second utterance should finish");

    let log = recorder.all();
    let marker = log.iter().position(|seen| *seen == Seen::Marker).unwrap();
    assert!(
        !log[marker..].contains(&Seen::Shape(MouthShape::O)),
        "stale shape after interruption: {:?}",
        &log[marker..]
    );
    assert!(log[marker..].contains(&Seen::Shape(MouthShape::Bmp)));
    assert_eq!(recorder.states(), vec![true, false, true, false]);
    assert_eq!(engine.spoken().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let (_engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    synth.stop();
    synth.stop();
    assert!(!synth.is_speaking());

    let speech = synth.speak("A fairly long sentence to cut short.", SpeakOptions::default());
    sleep(Duration::from_millis(120)).await;
    assert!(synth.is_speaking());

    synth.stop();
    synth.stop();
    assert!(!synth.is_speaking());
    assert!(matches!(speech.await, Err(VoiceError::Interrupted)));

    let after_stop = recorder.all().len();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(recorder.all().len(), after_stop);
    assert_eq!(recorder.states(), vec![true, false]);
    assert_eq!(recorder.shapes().last(), Some(&MouthShape::Default));
}

#[tokio::test(start_paused = true)]
async fn voice_mode_follows_word_boundaries() {
    let (_engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    synth
        .speak(
            "Oh my dear",
            SpeakOptions {
                lip_sync_mode: LipSyncMode::Voice,
                ..at_rate(1.0)
            },
        )
        .await
        .unwrap();

    assert_eq!(
        recorder.shapes(),
        vec![
            MouthShape::O,
            MouthShape::Bmp,
            MouthShape::Cdgknstxyz,
            MouthShape::Default,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn engine_errors_reject_and_reset() {
    let (_engine, synth) = setup(SimulatedEngine::new().failing_with("voice-unavailable"));
    let recorder = Recorder::attach(&synth);

    let err = synth
        .speak("Hello", SpeakOptions::default())
        .await
        .unwrap_err();

    match err {
        VoiceError::Playback { code } => assert_eq!(code, "voice-unavailable"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!synth.is_speaking());
    assert_eq!(recorder.states(), vec![true, false]);
    assert_eq!(recorder.shapes().last(), Some(&MouthShape::Default));
}

#[tokio::test]
async fn unavailable_engine_rejects_immediately() {
    let (engine, synth) = setup(SimulatedEngine::new().unavailable());
    let recorder = Recorder::attach(&synth);

    let err = synth.speak("Hello", SpeakOptions::default()).await.unwrap_err();
    assert!(matches!(err, VoiceError::PlatformUnsupported(_)));
    assert!(engine.spoken().is_empty());
    assert!(recorder.all().is_empty());
}

#[tokio::test]
async fn blank_text_resolves_without_speaking() {
    let (engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    synth.speak("   \n\t ", SpeakOptions::default()).await.unwrap();
    assert!(engine.spoken().is_empty());
    assert!(recorder.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pause_holds_speech_and_animation() {
    let (engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    let speech = synth.speak("Lovely weather today", at_rate(1.0));
    sleep(Duration::from_millis(100)).await;

    synth.pause();
    assert!(synth.state().is_paused);
    assert!(engine.is_paused());
    let held = recorder.shapes().len();

    sleep(Duration::from_secs(3)).await;
    assert_eq!(recorder.shapes().len(), held);
    assert!(synth.is_speaking());

    synth.resume();
    assert!(!synth.state().is_paused);
    speech.await.unwrap();
    assert!(recorder.shapes().len() > held);
}

#[tokio::test(start_paused = true)]
async fn unknown_voice_falls_back_and_options_are_clamped() {
    let mut nova = VoiceInfo::new("nova", "Nova", "en-US");
    nova.default = true;
    let (engine, synth) = setup(SimulatedEngine::new().with_voices(vec![nova]));

    synth
        .speak(
            "Hi",
            SpeakOptions {
                voice: Some("robot".to_string()),
                rate: 10.0,
                volume: 3.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    synth
        .speak(
            "Hi",
            SpeakOptions {
                voice: Some("Nova".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let spoken = engine.spoken();
    assert_eq!(spoken[0].voice, None);
    assert_eq!(spoken[0].rate, 2.0);
    assert_eq!(spoken[0].volume, 1.0);
    assert_eq!(spoken[1].voice.as_deref(), Some("nova"));
}

#[tokio::test(start_paused = true)]
async fn bound_callbacks_are_last_write_wins() {
    let (_engine, synth) = setup(SimulatedEngine::new());
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    {
        let first = Arc::clone(&first);
        synth.set_phoneme_change_callback(move |shape| first.lock().unwrap().push(shape));
    }
    {
        let second = Arc::clone(&second);
        synth.set_phoneme_change_callback(move |shape| second.lock().unwrap().push(shape));
    }
    let states = Arc::new(Mutex::new(Vec::new()));
    {
        let states = Arc::clone(&states);
        synth.set_state_change_callback(move |speaking| states.lock().unwrap().push(speaking));
    }

    synth.speak("Ma", at_rate(1.0)).await.unwrap();

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(
        *second.lock().unwrap(),
        vec![MouthShape::Bmp, MouthShape::Aei, MouthShape::Default, MouthShape::Default]
    );
    assert_eq!(*states.lock().unwrap(), vec![true, false]);

    synth.clear_callbacks();
    synth.speak("Ma", at_rate(1.0)).await.unwrap();
    assert_eq!(second.lock().unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn audio_mode_without_a_tap_accepts_external_shapes() {
    let (_engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);
    assert!(synth.shape_sink().is_none());

    let speech = synth.speak(
        "Audio driven",
        SpeakOptions {
            lip_sync_mode: LipSyncMode::Audio,
            ..at_rate(1.0)
        },
    );
    sleep(Duration::from_millis(20)).await;

    let sink = synth.shape_sink().expect("speaking");
    sink(MouthShape::O);
    speech.await.unwrap();
    sink(MouthShape::U);

    assert_eq!(recorder.shapes(), vec![MouthShape::O, MouthShape::Default]);
    assert!(synth.shape_sink().is_none());
}

#[tokio::test(start_paused = true)]
async fn listener_may_stop_speech_from_a_callback() {
    let (_engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);
    let stopper = synth.clone();
    let _stopper = synth.on_shape_change(move |shape| {
        if shape == MouthShape::Bmp {
            stopper.stop();
        }
    });

    let result = synth.speak("a bomb", at_rate(1.0)).await;
    assert!(matches!(result, Err(VoiceError::Interrupted)));

    let shapes = recorder.shapes();
    let bmp = shapes.iter().position(|s| *s == MouthShape::Bmp).unwrap();
    assert_eq!(&shapes[bmp + 1..], &[MouthShape::Default]);
    assert_eq!(recorder.states(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn listener_may_start_the_next_utterance_as_the_mouth_closes() {
    let (engine, synth) = setup(SimulatedEngine::new());
    let recorder = Recorder::attach(&synth);

    let (next_tx, next_rx) = tokio::sync::oneshot::channel();
    let next_tx = Mutex::new(Some(next_tx));
    let _follow_up = {
        let speaker = synth.clone();
        synth.on_shape_change(move |shape| {
            if shape != MouthShape::Default || speaker.is_speaking() {
                return;
            }
            let tx = next_tx.lock().unwrap().take();
            if let Some(tx) = tx {
                let _ = tx.send(speaker.speak("Ma", at_rate(1.0)));
            }
        })
    };

    synth.speak("Hi", at_rate(1.0)).await.unwrap();
    let next = next_rx.await.expect("follow-up speech started");
    next.await.expect("follow-up speech finished");

    assert_eq!(recorder.states(), vec![true, false, true, false]);
    assert_eq!(engine.spoken().len(), 2);
    assert!(recorder.shapes().contains(&MouthShape::Bmp));
    assert!(!synth.is_speaking());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_speakers_keep_states_paired() {
    let (_engine, synth) =
        setup(SimulatedEngine::new().with_char_duration(Duration::from_millis(1)));
    let recorder = Recorder::attach(&synth);

    let mut speakers = Vec::new();
    for worker in 0..4 {
        let synth = synth.clone();
        speakers.push(tokio::spawn(async move {
            for round in 0..10 {
                let text = if (worker + round) % 2 == 0 { "Hi there" } else { "Ma" };
                let options = SpeakOptions {
                    interrupt: true,
                    lip_sync_mode: LipSyncMode::Voice,
                    ..at_rate(2.0)
                };
                let _ = synth.speak(text, options).await;
            }
        }));
    }
    for speaker in speakers {
        speaker.await.unwrap();
    }

    let states = recorder.states();
    assert!(!states.is_empty());
    for pair in states.chunks(2) {
        assert_eq!(pair, [true, false], "unpaired states: {:?}", states);
    }
    assert!(!synth.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn audio_mode_analyzes_the_engine_output() {
    let tap = SampleTap::new();
    let (_engine, synth) = setup(SimulatedEngine::new().with_output_tap(tap.clone()));
    let recorder = Recorder::attach(&synth);

    let speech = synth.speak(
        "Audio driven",
        SpeakOptions {
            lip_sync_mode: LipSyncMode::Audio,
            ..at_rate(1.0)
        },
    );
    sleep(Duration::from_millis(20)).await;
    assert!(tap.is_listening());

    for _ in 0..8 {
        tap.publish(buzz());
        sleep(Duration::from_millis(16)).await;
    }
    assert!(recorder.shapes().contains(&MouthShape::O));

    speech.await.unwrap();
    assert!(!tap.is_listening());
    let closed = recorder.all().len();

    for _ in 0..4 {
        tap.publish(buzz());
        sleep(Duration::from_millis(16)).await;
    }
    assert_eq!(recorder.all().len(), closed);
    assert_eq!(recorder.shapes().last(), Some(&MouthShape::Default));
    assert_eq!(recorder.states(), vec![true, false]);
}

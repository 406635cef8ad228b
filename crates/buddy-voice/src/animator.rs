//! Text-driven lip-sync.
//!
//! Walks an utterance one character at a time, paced from the speech rate, and
//! emits an estimated mouth shape per letter. Needs no audio, so it is the
//! default and the most dependable mode.

use crate::cancel::{CancellationToken, PlaybackGate};
use crate::mouth::MouthShape;
use crate::phoneme::estimate;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Base time per character at rate 1.0.
pub const BASE_CHAR_DURATION: Duration = Duration::from_millis(50);

/// How a run of [`TextAnimator::animate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationOutcome {
    /// Every character was walked and the mouth was closed.
    Completed,
    /// The token fired; nothing was emitted after that point.
    Cancelled,
}

/// Character-paced mouth shape animator.
#[derive(Debug, Clone, Copy)]
pub struct TextAnimator {
    speed: Duration,
}

impl TextAnimator {
    /// Animator with `speed` per letter.
    pub fn new(speed: Duration) -> Self {
        Self { speed }
    }

    /// Animator whose per-letter time is `base / rate`, so faster speech animates faster.
    pub fn for_rate(base: Duration, rate: f32) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        Self::new(Duration::from_secs_f64(base.as_secs_f64() / rate as f64))
    }

    pub fn speed(&self) -> Duration {
        self.speed
    }

    /// Animate `text`, calling `on_shape` for each emitted shape in order.
    ///
    /// `token` is checked before every emission and raced against every pause.
    /// When `gate` is paused the walk holds before the next character. The
    /// closing `DEFAULT` is only emitted on completion; a canceller is
    /// responsible for closing the mouth itself.
    pub async fn animate<F>(
        &self,
        text: &str,
        token: &CancellationToken,
        gate: Option<&PlaybackGate>,
        mut on_shape: F,
    ) -> AnimationOutcome
    where
        F: FnMut(MouthShape),
    {
        let chars: Vec<char> = text.chars().collect();
        debug!(
            chars = chars.len(),
            speed_ms = self.speed.as_millis() as u64,
            "text animation started"
        );

        for (i, &c) in chars.iter().enumerate() {
            if let Some(gate) = gate {
                tokio::select! {
                    _ = token.cancelled() => return AnimationOutcome::Cancelled,
                    _ = gate.wait_open() => {}
                }
            }
            if token.is_cancelled() {
                return AnimationOutcome::Cancelled;
            }

            let (shape, pace) = step(c, chars.get(i + 1).copied());
            if let Some(shape) = shape {
                on_shape(shape);
            }

            tokio::select! {
                _ = token.cancelled() => return AnimationOutcome::Cancelled,
                _ = sleep(pace.of(self.speed)) => {}
            }
        }

        if token.is_cancelled() {
            return AnimationOutcome::Cancelled;
        }
        on_shape(MouthShape::Default);
        AnimationOutcome::Completed
    }
}

/// Pause after a character, in tenths of the per-letter speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pace(u32);

impl Pace {
    const SENTENCE: Pace = Pace(30);
    const CLAUSE: Pace = Pace(20);
    const SPACE: Pace = Pace(3);
    const LETTER: Pace = Pace(10);
    const OTHER: Pace = Pace(2);

    fn of(self, speed: Duration) -> Duration {
        speed * self.0 / 10
    }
}

fn step(c: char, next: Option<char>) -> (Option<MouthShape>, Pace) {
    match c {
        '.' | '!' | '?' => (Some(MouthShape::Default), Pace::SENTENCE),
        ',' | ';' | ':' => (Some(MouthShape::Default), Pace::CLAUSE),
        ' ' => (Some(MouthShape::Default), Pace::SPACE),
        c if c.is_alphabetic() => (Some(estimate(c, next)), Pace::LETTER),
        // digits, symbols: keep the current shape
        _ => (None, Pace::OTHER),
    }
}

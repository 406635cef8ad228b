//! Audio-driven lip-sync.
//!
//! Samples a live audio source once per animation frame, reduces the spectrum
//! to four band energies and classifies them into a mouth shape. This is a
//! visual enhancement only: failing to acquire audio is logged and the mouth
//! simply stays at rest.

use crate::audio::{AudioChunk, AudioInput, CaptureGuard};
use crate::cancel::CancellationToken;
use crate::error::{VoiceError, VoiceResult};
use crate::mouth::{BandLayout, FrequencyBands, MouthShape};
use crate::spectrum::{SpectrumAnalyzer, SpectrumConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Configuration for the audio analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub spectrum: SpectrumConfig,
    /// Time between analysis frames (default: 16ms, one display refresh)
    pub frame_interval: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            spectrum: SpectrumConfig::default(),
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// A running analysis: the frame loop plus the acquired audio source.
pub struct AnalysisSession {
    token: CancellationToken,
    task: JoinHandle<()>,
    capture: CaptureGuard,
}

/// Real-time audio → mouth shape analyzer. At most one session runs at a time.
pub struct AudioAnalyzer {
    input: Arc<dyn AudioInput>,
    config: AnalyzerConfig,
    session: Option<AnalysisSession>,
}

impl AudioAnalyzer {
    pub fn new(input: Arc<dyn AudioInput>, config: AnalyzerConfig) -> Self {
        Self {
            input,
            config,
            session: None,
        }
    }

    /// Start analysing, logging instead of failing when audio is unavailable.
    ///
    /// Returns whether a session is now running.
    pub fn start<F>(&mut self, on_shape: F) -> bool
    where
        F: Fn(MouthShape) + Send + Sync + 'static,
    {
        match self.try_start(on_shape) {
            Ok(()) => true,
            Err(e) => {
                warn!("Lip-sync audio analysis not started: {}", e);
                false
            }
        }
    }

    /// Start analysing, reporting why audio could not be acquired.
    ///
    /// Any running session is fully stopped first. Acquiring a device blocks
    /// briefly (see [`AudioInput::open`]).
    pub fn try_start<F>(&mut self, on_shape: F) -> VoiceResult<()>
    where
        F: Fn(MouthShape) + Send + Sync + 'static,
    {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::PlatformUnsupported(format!("no async runtime: {}", e)))?;
        let spectrum = SpectrumAnalyzer::new(self.config.spectrum.clone())?;
        let (receiver, capture) = self.input.open()?.split();

        let token = CancellationToken::new();
        let task = runtime.spawn(run_frames(
            receiver,
            spectrum,
            self.config.frame_interval,
            token.clone(),
            on_shape,
        ));

        info!(
            source = %self.input.describe(),
            fft_size = self.config.spectrum.fft_size,
            "Lip-sync audio analysis started"
        );

        self.session = Some(AnalysisSession {
            token,
            task,
            capture,
        });
        Ok(())
    }

    /// Stop the frame loop and release the audio source. Safe to call repeatedly.
    ///
    /// Releasing a device joins its capture thread (see [`CaptureGuard`]).
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            // The loop checks the token before emitting; abort only cuts the wait short.
            session.task.abort();
            drop(session.capture);
            debug!("Lip-sync audio analysis stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }
}

impl Drop for AudioAnalyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_frames<F>(
    mut receiver: mpsc::UnboundedReceiver<AudioChunk>,
    mut spectrum: SpectrumAnalyzer,
    frame_interval: Duration,
    token: CancellationToken,
    on_shape: F,
) where
    F: Fn(MouthShape),
{
    let layout = BandLayout::for_bin_count(spectrum.bin_count());
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut source_closed = false;
        loop {
            match receiver.try_recv() {
                Ok(chunk) => spectrum.push_samples(&chunk.samples),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    source_closed = true;
                    break;
                }
            }
        }

        let bands = FrequencyBands::from_spectrum(spectrum.byte_frequency_data(), &layout);
        let shape = bands.classify();
        trace!(?bands, %shape, "analysis frame");

        if token.is_cancelled() {
            return;
        }
        if source_closed {
            debug!("Audio source closed, ending analysis");
            on_shape(MouthShape::Default);
            return;
        }
        on_shape(shape);
    }
}

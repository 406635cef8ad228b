//! Byte-range magnitude spectrum, computed the way a browser `AnalyserNode` does.
//!
//! Keeping the same windowing, smoothing and decibel mapping means the mouth
//! classifier thresholds (tuned against byte frequency data) carry over as-is.

use crate::error::{VoiceError, VoiceResult};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Configuration for [`SpectrumAnalyzer`]
#[derive(Debug, Clone)]
pub struct SpectrumConfig {
    /// FFT size (power of two, 32..=32768)
    pub fft_size: usize,
    /// Weight of the previous frame when smoothing magnitudes (0.0 - 1.0)
    pub smoothing: f32,
    /// Magnitude mapped to byte 0
    pub min_decibels: f32,
    /// Magnitude mapped to byte 255
    pub max_decibels: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl SpectrumConfig {
    pub fn validate(&self) -> VoiceResult<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(VoiceError::Config(format!(
                "FFT size must be a power of two between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(VoiceError::Config(format!(
                "Smoothing must be between 0 and 1, got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(VoiceError::Config(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }
}

/// Rolling FFT over the most recent `fft_size` samples.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    config: SpectrumConfig,

    /// Ring buffer of the latest time-domain samples
    samples: Vec<f32>,
    write_pos: usize,

    /// Blackman window coefficients
    window: Vec<f32>,

    fft_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,

    /// Smoothed linear magnitudes (half of FFT size)
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig) -> VoiceResult<Self> {
        config.validate()?;
        let fft_size = config.fft_size;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window = blackman_window(fft_size);
        let bins = fft_size / 2;

        debug!(fft_size, bins, "spectrum analyzer created");

        Ok(Self {
            fft,
            config,
            samples: vec![0.0; fft_size],
            write_pos: 0,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            smoothed: vec![0.0; bins],
            bytes: vec![0; bins],
        })
    }

    /// Number of frequency bins (half the FFT size).
    pub fn bin_count(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Append mono samples (-1.0..1.0) to the analysis window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.samples.len();
        for &sample in samples {
            self.samples[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    /// Recompute the spectrum from the current window and return it as bytes.
    pub fn byte_frequency_data(&mut self) -> &[u8] {
        let size = self.config.fft_size;

        // oldest sample first
        for i in 0..size {
            let sample = self.samples[(self.write_pos + i) % size];
            self.fft_buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        for (k, byte) in self.bytes.iter_mut().enumerate() {
            let magnitude = self.fft_buffer[k].norm() / size as f32;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            *byte = if self.smoothed[k] <= 0.0 {
                0
            } else {
                let db = 20.0 * self.smoothed[k].log10();
                let scaled = 255.0 * (db - self.config.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            };
        }
        &self.bytes
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * std::f32::consts::PI * x).cos()
                + a2 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn rejects_bad_sizes() {
        for fft_size in [0, 16, 1000, 65536] {
            let config = SpectrumConfig {
                fft_size,
                ..Default::default()
            };
            assert!(SpectrumAnalyzer::new(config).is_err());
        }
    }

    #[test]
    fn silence_is_all_zero() {
        let mut analyzer = SpectrumAnalyzer::new(SpectrumConfig::default()).unwrap();
        analyzer.push_samples(&vec![0.0; 2048]);
        assert_eq!(analyzer.bin_count(), 1024);
        assert!(analyzer.byte_frequency_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let config = SpectrumConfig {
            smoothing: 0.0,
            ..Default::default()
        };
        let mut analyzer = SpectrumAnalyzer::new(config).unwrap();
        // bin width at 48 kHz / 2048 = 23.4375 Hz; 750 Hz lands on bin 32.
        // Quiet enough that neighbouring bins stay below the 255 ceiling.
        analyzer.push_samples(&sine(750.0, 48_000.0, 2048, 0.05));
        let bytes = analyzer.byte_frequency_data().to_vec();

        let (peak_bin, &peak) = bytes
            .iter()
            .enumerate()
            .max_by_key(|&(_, b)| *b)
            .unwrap();
        assert_eq!(peak_bin, 32);
        assert!(peak > 200, "peak byte was {}", peak);
        assert!(bytes[700] < peak / 2);
    }

    #[test]
    fn smoothing_decays_after_signal_stops() {
        let mut analyzer = SpectrumAnalyzer::new(SpectrumConfig::default()).unwrap();
        analyzer.push_samples(&sine(750.0, 48_000.0, 2048, 0.5));
        let loud = analyzer.byte_frequency_data()[32];

        analyzer.push_samples(&vec![0.0; 2048]);
        let after = analyzer.byte_frequency_data()[32];
        assert!(after > 0, "smoothing should keep some energy");
        assert!(after < loud);
    }
}

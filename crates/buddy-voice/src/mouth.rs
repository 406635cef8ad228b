//! Mouth shapes and the frequency-band classifier.
//!
//! A [`MouthShape`] is the only thing a face renderer needs per frame. Shapes are
//! produced either from live audio (band energies → [`classify`]) or from text
//! (see [`crate::phoneme`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visually distinct mouth positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MouthShape {
    /// Closed / resting mouth.
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "O")]
    O,
    #[serde(rename = "CDGKNSTXYZ")]
    Cdgknstxyz,
    #[serde(rename = "EE")]
    Ee,
    #[serde(rename = "BMP")]
    Bmp,
    #[serde(rename = "AEI")]
    Aei,
    #[serde(rename = "U")]
    U,
    #[serde(rename = "TH")]
    Th,
    #[serde(rename = "SH_CH_J")]
    ShChJ,
    #[serde(rename = "QW")]
    Qw,
    #[serde(rename = "L")]
    L,
    #[serde(rename = "FV")]
    Fv,
}

impl MouthShape {
    /// The symbol used by face renderers to look up mouth artwork.
    pub fn as_str(&self) -> &'static str {
        match self {
            MouthShape::Default => "DEFAULT",
            MouthShape::O => "O",
            MouthShape::Cdgknstxyz => "CDGKNSTXYZ",
            MouthShape::Ee => "EE",
            MouthShape::Bmp => "BMP",
            MouthShape::Aei => "AEI",
            MouthShape::U => "U",
            MouthShape::Th => "TH",
            MouthShape::ShChJ => "SH_CH_J",
            MouthShape::Qw => "QW",
            MouthShape::L => "L",
            MouthShape::Fv => "FV",
        }
    }

    /// Parse a renderer symbol back into a shape.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let shape = match symbol {
            "DEFAULT" => MouthShape::Default,
            "O" => MouthShape::O,
            "CDGKNSTXYZ" => MouthShape::Cdgknstxyz,
            "EE" => MouthShape::Ee,
            "BMP" => MouthShape::Bmp,
            "AEI" => MouthShape::Aei,
            "U" => MouthShape::U,
            "TH" => MouthShape::Th,
            "SH_CH_J" => MouthShape::ShChJ,
            "QW" => MouthShape::Qw,
            "L" => MouthShape::L,
            "FV" => MouthShape::Fv,
            _ => return None,
        };
        Some(shape)
    }
}

impl fmt::Display for MouthShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Average band energies for one analysis frame, each in byte range (0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyBands {
    /// ~0-300 Hz
    pub low: f32,
    /// ~300-900 Hz
    pub mid: f32,
    /// ~900-2000 Hz
    pub high: f32,
    /// ~2000 Hz and up
    pub very_high: f32,
}

impl FrequencyBands {
    /// Average the bins of a byte spectrum into the four bands of `layout`.
    pub fn from_spectrum(spectrum: &[u8], layout: &BandLayout) -> Self {
        let end = spectrum.len();
        let low_end = layout.low_end.min(end);
        let mid_end = layout.mid_end.clamp(low_end, end);
        let high_end = layout.high_end.clamp(mid_end, end);
        Self {
            low: average(&spectrum[..low_end]),
            mid: average(&spectrum[low_end..mid_end]),
            high: average(&spectrum[mid_end..high_end]),
            very_high: average(&spectrum[high_end..]),
        }
    }

    /// Mean of the four bands.
    pub fn volume(&self) -> f32 {
        (self.low + self.mid + self.high + self.very_high) / 4.0
    }

    pub fn classify(&self) -> MouthShape {
        classify(self.low, self.mid, self.high, self.very_high, self.volume())
    }
}

fn average(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32
}

/// Bin index boundaries of the four bands: `[0, low_end)`, `[low_end, mid_end)`,
/// `[mid_end, high_end)`, `[high_end, bin_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    pub low_end: usize,
    pub mid_end: usize,
    pub high_end: usize,
}

impl BandLayout {
    /// Boundaries for a 1024-bin spectrum (FFT size 2048).
    pub const REFERENCE: BandLayout = BandLayout {
        low_end: 85,
        mid_end: 255,
        high_end: 512,
    };
    const REFERENCE_BINS: usize = 1024;

    /// Scale the reference boundaries to `bin_count` bins.
    pub fn for_bin_count(bin_count: usize) -> Self {
        let scale =
            |edge: usize| (edge * bin_count + Self::REFERENCE_BINS / 2) / Self::REFERENCE_BINS;
        Self {
            low_end: scale(Self::REFERENCE.low_end),
            mid_end: scale(Self::REFERENCE.mid_end),
            high_end: scale(Self::REFERENCE.high_end),
        }
    }
}

/// Classify band energies into a mouth shape.
///
/// First match wins. The thresholds are tuned by eye against the mouth artwork
/// and must stay exactly as they are.
pub fn classify(low: f32, mid: f32, high: f32, very_high: f32, volume: f32) -> MouthShape {
    if volume < 10.0 {
        return MouthShape::Default;
    }
    // Sibilants
    if very_high > high && very_high > 40.0 {
        return MouthShape::ShChJ;
    }
    if high > mid && high > low {
        return if mid > 30.0 {
            MouthShape::Ee
        } else {
            MouthShape::Cdgknstxyz
        };
    }
    if low > mid && low > high {
        return if low > 50.0 { MouthShape::O } else { MouthShape::U };
    }
    if mid > 30.0 && low > 20.0 {
        return MouthShape::Aei;
    }
    MouthShape::Default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_floor_wins_over_everything() {
        assert_eq!(classify(255.0, 255.0, 255.0, 255.0, 9.99), MouthShape::Default);
        assert_eq!(classify(0.0, 0.0, 0.0, 200.0, 0.0), MouthShape::Default);
    }

    #[test]
    fn sibilants_checked_before_band_comparisons() {
        assert_eq!(classify(5.0, 10.0, 30.0, 50.0, 25.0), MouthShape::ShChJ);
        // very_high above high but not above 40 falls through
        assert_eq!(classify(5.0, 10.0, 30.0, 35.0, 20.0), MouthShape::Cdgknstxyz);
    }

    #[test]
    fn high_dominant_splits_on_mid() {
        assert_eq!(classify(20.0, 35.0, 60.0, 10.0, 31.25), MouthShape::Ee);
        assert_eq!(classify(20.0, 25.0, 60.0, 10.0, 28.75), MouthShape::Cdgknstxyz);
    }

    #[test]
    fn low_dominant_splits_on_loudness() {
        assert_eq!(classify(80.0, 30.0, 20.0, 5.0, 33.75), MouthShape::O);
        assert_eq!(classify(45.0, 30.0, 20.0, 5.0, 25.0), MouthShape::U);
    }

    #[test]
    fn open_vowel_and_fallthrough() {
        // mid dominant with enough low energy
        assert_eq!(classify(25.0, 40.0, 20.0, 5.0, 22.5), MouthShape::Aei);
        // mid dominant without low energy
        assert_eq!(classify(10.0, 40.0, 20.0, 5.0, 18.75), MouthShape::Default);
    }

    #[test]
    fn classify_is_deterministic() {
        let bands = FrequencyBands {
            low: 12.0,
            mid: 44.0,
            high: 31.0,
            very_high: 7.0,
        };
        assert_eq!(bands.classify(), bands.classify());
    }

    #[test]
    fn reference_layout_matches_2048_point_analyser() {
        assert_eq!(BandLayout::for_bin_count(1024), BandLayout::REFERENCE);
        let small = BandLayout::for_bin_count(128);
        assert_eq!((small.low_end, small.mid_end, small.high_end), (11, 32, 64));
    }

    #[test]
    fn bands_average_their_slices() {
        let mut spectrum = vec![0u8; 1024];
        spectrum[..85].fill(100);
        spectrum[512..].fill(50);
        let bands = FrequencyBands::from_spectrum(&spectrum, &BandLayout::REFERENCE);
        assert_eq!(bands.low, 100.0);
        assert_eq!(bands.mid, 0.0);
        assert_eq!(bands.high, 0.0);
        assert_eq!(bands.very_high, 50.0);
        assert_eq!(bands.volume(), 37.5);
    }

    #[test]
    fn symbols_round_trip_through_names() {
        assert_eq!(MouthShape::ShChJ.to_string(), "SH_CH_J");
        assert_eq!(MouthShape::from_symbol("CDGKNSTXYZ"), Some(MouthShape::Cdgknstxyz));
        assert_eq!(MouthShape::from_symbol("nope"), None);
        assert_eq!(serde_json::to_string(&MouthShape::Default).unwrap(), "\"DEFAULT\"");
    }
}

//! Text-based mouth shape estimation.
//!
//! Rough letter-to-viseme rules used when no audio is available. Accuracy is
//! "looks like talking", not phonetics.

use crate::mouth::MouthShape;

/// Estimate the mouth shape for `current`, looking ahead at `next` for digraphs.
pub fn estimate(current: char, next: Option<char>) -> MouthShape {
    let c = current.to_ascii_uppercase();
    let n = next.map(|n| n.to_ascii_uppercase());

    match (c, n) {
        ('T', Some('H')) => return MouthShape::Th,
        ('S', Some('H')) | ('C', Some('H')) => return MouthShape::ShChJ,
        ('Q', Some('U')) | ('W', Some('H')) => return MouthShape::Qw,
        _ => {}
    }

    if is_vowel(c) {
        return match (c, n) {
            ('O', _) => MouthShape::O,
            ('E', Some('E')) | ('I', Some('I')) => MouthShape::Ee,
            ('U', _) => MouthShape::U,
            _ => MouthShape::Aei,
        };
    }

    consonant_shape(c)
}

/// Single-character estimate without digraph or doubled-vowel detection.
///
/// Used for speech-boundary events, which deliver word fragments rather than
/// reliable character pairs.
pub fn estimate_single(current: char) -> MouthShape {
    let c = current.to_ascii_uppercase();
    match c {
        'O' => MouthShape::O,
        'U' => MouthShape::U,
        'A' | 'E' | 'I' => MouthShape::Aei,
        _ => consonant_shape(c),
    }
}

/// Shape for a boundary fragment (usually one word): its first letter decides.
pub fn shape_for_fragment(fragment: &str) -> MouthShape {
    fragment
        .chars()
        .find(|c| c.is_alphabetic())
        .map(estimate_single)
        .unwrap_or(MouthShape::Default)
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'A' | 'E' | 'I' | 'O' | 'U')
}

fn consonant_shape(c: char) -> MouthShape {
    match c {
        'B' | 'M' | 'P' => MouthShape::Bmp,
        'F' | 'V' => MouthShape::Fv,
        'L' => MouthShape::L,
        'Q' | 'W' => MouthShape::Qw,
        'C' | 'D' | 'G' | 'K' | 'N' | 'S' | 'T' | 'X' | 'Y' | 'Z' => MouthShape::Cdgknstxyz,
        'J' => MouthShape::ShChJ,
        _ => MouthShape::Default,
    }
}

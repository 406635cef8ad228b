//! Text normalisation before synthesis.
//!
//! Speech engines read "Dr." as "D R" and "&" as nothing at all. Expanding these
//! up front makes speech sound natural and keeps the text animator walking the
//! same words the listener hears.

use once_cell::sync::Lazy;
use regex::Regex;

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bDr\.", "Doctor"),
        (r"\bMrs\.", "Missus"),
        (r"\bMr\.", "Mister"),
        (r"\bMs\.", "Miss"),
        (r"\bProf\.", "Professor"),
        (r"\betc\.", "etcetera"),
        (r"\bvs\.", "versus"),
        (r"\be\.g\.", "for example"),
        (r"\bi\.e\.", "that is"),
    ]
    .into_iter()
    .map(|(pattern, expansion)| (Regex::new(pattern).unwrap(), expansion))
    .collect()
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const SYMBOLS: [(char, &str); 5] = [
    ('&', " and "),
    ('@', " at "),
    ('#', " number "),
    ('$', " dollar "),
    ('%', " percent "),
];

/// Expand abbreviations and symbols, then collapse whitespace.
pub fn preprocess_text(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, expansion) in ABBREVIATIONS.iter() {
        result = pattern.replace_all(&result, *expansion).into_owned();
    }

    let mut expanded = String::with_capacity(result.len());
    for c in result.chars() {
        match SYMBOLS.iter().find(|(symbol, _)| *symbol == c) {
            Some((_, word)) => expanded.push_str(word),
            None => expanded.push(c),
        }
    }

    WHITESPACE_RE.replace_all(expanded.trim(), " ").into_owned()
}

//! ATS score extraction from a free-text analysis.
//!
//! The analysis prompt asks for a "Score: N" line. When the model complies the
//! score is read exactly; otherwise the first 1-3 digit number on a line that
//! mentions "score" or "ats" is used, and as a last resort a value is drawn
//! from a band chosen by the analysis wording.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::Serialize;

pub const MAX_SCORE: u8 = 100;

// "Score: 72", "ATS Score (0-100): 72", "score = 72"
static EXPLICIT_SCORE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)score(?:[ \t]*\([ \t]*0[ \t]*-[ \t]*100[ \t]*\))?[ \t]*[:=]?[ \t]*(\d{1,3})\b").ok()
});

static LOOSE_SCORE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(?:score|ats)[^\n]*?(\d{1,3})").ok());

static BANDS: LazyLock<Vec<(Option<Regex>, RangeInclusive<u8>)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(?:excellent|outstanding|perfect)\b", 85..=100),
        (r"(?i)\b(?:good|strong|solid)\b", 70..=85),
        (r"(?i)\b(?:average|fair|moderate)\b", 50..=70),
        (r"(?i)\b(?:poor|weak|low)\b", 20..=50),
    ]
    .into_iter()
    .map(|(pattern, range)| (Regex::new(pattern).ok(), range))
    .collect()
});

const DEFAULT_BAND: RangeInclusive<u8> = 60..=80;

/// How a score was obtained. Parsed scores are deterministic; estimates are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Parsed,
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtsScore {
    pub value: u8,
    pub source: ScoreSource,
}

fn first_capture(re: &LazyLock<Option<Regex>>, text: &str) -> Option<u8> {
    let re = re.as_ref()?;
    let digits = re.captures(text)?.get(1)?.as_str();
    let value: u16 = digits.parse().ok()?;
    Some(value.min(u16::from(MAX_SCORE)) as u8)
}

/// Reads a score in [0, 100] from `analysis`, capping anything larger.
pub fn extract_score(analysis: &str) -> AtsScore {
    if let Some(value) =
        first_capture(&EXPLICIT_SCORE, analysis).or_else(|| first_capture(&LOOSE_SCORE, analysis))
    {
        return AtsScore {
            value,
            source: ScoreSource::Parsed,
        };
    }

    AtsScore {
        value: rand::thread_rng().gen_range(estimate_band(analysis)),
        source: ScoreSource::Estimated,
    }
}

/// Band used when no number can be read.
pub fn estimate_band(analysis: &str) -> RangeInclusive<u8> {
    BANDS
        .iter()
        .find(|(re, _)| re.as_ref().is_some_and(|re| re.is_match(analysis)))
        .map(|(_, range)| range.clone())
        .unwrap_or(DEFAULT_BAND)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreColor {
    Red,
    Yellow,
    Green,
}

pub fn score_color(score: u8) -> ScoreColor {
    match score {
        0..=40 => ScoreColor::Red,
        41..=70 => ScoreColor::Yellow,
        _ => ScoreColor::Green,
    }
}

//! Provider and parameter policy: maps each use case (and tone / length for
//! cover letters) to a provider, model, temperature, and token ceiling.
//!
//! Everything here is deterministic given its inputs. A variation's
//! parameters depend only on its index, never on sibling results.

use crate::models::artifact::{LetterLength, ProviderKind, Tone};

pub const OPENAI_FLAGSHIP_MODEL: &str = "gpt-4o";
pub const OPENAI_FAST_MODEL: &str = "gpt-4o-mini";
pub const ANTHROPIC_FLAGSHIP_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const GOOGLE_FLAGSHIP_MODEL: &str = "gemini-1.5-pro";

/// Temperature added per variation index to push lexical diversity.
pub const VARIATION_TEMPERATURE_STEP: f32 = 0.1;

const OPTIMIZE_TEMPERATURE: f32 = 0.3;
const OPTIMIZE_MAX_TOKENS: u32 = 3000;
const ATS_TEMPERATURE: f32 = 0.1;
const ATS_MAX_TOKENS: u32 = 800;
const KEYWORDS_TEMPERATURE: f32 = 0.2;
const KEYWORDS_MAX_TOKENS: u32 = 500;

/// Concrete parameters for one provider call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionPlan {
    pub provider: ProviderKind,
    pub model: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderKind {
    pub fn flagship_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => OPENAI_FLAGSHIP_MODEL,
            ProviderKind::Anthropic => ANTHROPIC_FLAGSHIP_MODEL,
            ProviderKind::Google => GOOGLE_FLAGSHIP_MODEL,
        }
    }

    /// Upper bound each API accepts for `temperature`.
    pub fn max_temperature(&self) -> f32 {
        match self {
            ProviderKind::Anthropic => 1.0,
            ProviderKind::OpenAi | ProviderKind::Google => 2.0,
        }
    }
}

impl Tone {
    /// Monotonic from most conservative (professional) to most creative (casual).
    pub fn temperature(&self) -> f32 {
        match self {
            Tone::Professional => 0.3,
            Tone::Confident => 0.4,
            Tone::Friendly => 0.6,
            Tone::Enthusiastic => 0.7,
            Tone::Casual => 0.8,
        }
    }

    /// Expressive tones read better from provider B; formal ones from provider A.
    pub fn is_expressive(&self) -> bool {
        matches!(self, Tone::Friendly | Tone::Enthusiastic | Tone::Casual)
    }
}

impl LetterLength {
    pub fn token_ceiling(&self) -> u32 {
        match self {
            LetterLength::Short => 400,
            LetterLength::Medium => 600,
            LetterLength::Long => 900,
        }
    }

    /// Target word-count range embedded in the prompt.
    pub fn word_range(&self) -> (u32, u32) {
        match self {
            LetterLength::Short => (200, 250),
            LetterLength::Medium => (300, 400),
            LetterLength::Long => (450, 600),
        }
    }

    pub fn word_range_label(&self) -> String {
        let (low, high) = self.word_range();
        format!("{low}-{high}")
    }
}

pub fn optimize_plan() -> CompletionPlan {
    CompletionPlan {
        provider: ProviderKind::OpenAi,
        model: OPENAI_FLAGSHIP_MODEL,
        temperature: OPTIMIZE_TEMPERATURE,
        max_tokens: OPTIMIZE_MAX_TOKENS,
    }
}

pub fn ats_plan() -> CompletionPlan {
    CompletionPlan {
        provider: ProviderKind::OpenAi,
        model: OPENAI_FLAGSHIP_MODEL,
        temperature: ATS_TEMPERATURE,
        max_tokens: ATS_MAX_TOKENS,
    }
}

pub fn keywords_plan() -> CompletionPlan {
    CompletionPlan {
        provider: ProviderKind::OpenAi,
        model: OPENAI_FAST_MODEL,
        temperature: KEYWORDS_TEMPERATURE,
        max_tokens: KEYWORDS_MAX_TOKENS,
    }
}

/// Cover-letter draft. An explicit provider preference overrides the tone rule.
pub fn cover_letter_plan(
    tone: Tone,
    length: LetterLength,
    preferred: Option<ProviderKind>,
) -> CompletionPlan {
    let provider = preferred.unwrap_or(if tone.is_expressive() {
        ProviderKind::Anthropic
    } else {
        ProviderKind::OpenAi
    });

    CompletionPlan {
        provider,
        model: provider.flagship_model(),
        temperature: tone.temperature().min(provider.max_temperature()),
        max_tokens: length.token_ceiling(),
    }
}

/// Variation `index` (0-based): provider alternates by parity, temperature
/// rises by a fixed step per index and is clamped to the provider's maximum.
pub fn variation_plan(tone: Tone, length: LetterLength, index: u8) -> CompletionPlan {
    let provider = if index % 2 == 0 {
        ProviderKind::OpenAi
    } else {
        ProviderKind::Anthropic
    };
    let temperature = tone.temperature() + VARIATION_TEMPERATURE_STEP * f32::from(index);

    CompletionPlan {
        provider,
        model: provider.flagship_model(),
        temperature: temperature.min(provider.max_temperature()),
        max_tokens: length.token_ceiling(),
    }
}

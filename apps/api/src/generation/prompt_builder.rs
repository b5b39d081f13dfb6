//! Pure message builders. No I/O, no state: the same inputs always produce
//! the same ordered (system, user) message pair.

use crate::llm_client::prompts::{FACTUAL_INSTRUCTION, PLAIN_DOCUMENT_INSTRUCTION};
use crate::llm_client::ChatMessage;
use crate::models::artifact::{LetterLength, Tone};

use super::prompts::{
    ATS_SYSTEM, ATS_USER_TEMPLATE, BALANCED_VARIATION_APPROACH, COVER_LETTER_SYSTEM_TEMPLATE,
    COVER_LETTER_USER_TEMPLATE, KEYWORDS_SYSTEM, KEYWORDS_USER_TEMPLATE,
    OPTIMIZE_SYSTEM_TEMPLATE, OPTIMIZE_USER_TEMPLATE, VARIATION_APPROACHES,
    VARIATION_SUFFIX_TEMPLATE,
};

const DEFAULT_JOB_MARKET: &str = "US";
const NOT_SPECIFIED: &str = "Not specified";

/// Attributes the resume prompts read.
#[derive(Debug, Clone, Copy)]
pub struct ResumePromptInput<'a> {
    pub content: &'a str,
    pub job_description: &'a str,
    pub target_role: &'a str,
    pub industry: Option<&'a str>,
    pub experience_level: Option<&'a str>,
    pub country_code: Option<&'a str>,
}

/// Attributes the cover-letter prompts read.
#[derive(Debug, Clone, Copy)]
pub struct CoverLetterPromptInput<'a> {
    pub resume_content: &'a str,
    pub job_description: &'a str,
    pub target_role: &'a str,
    pub company_name: &'a str,
    pub hiring_manager_name: Option<&'a str>,
    pub tone: Tone,
    pub length: LetterLength,
    pub country_code: Option<&'a str>,
}

/// Replaces `{key}` placeholders in one left-to-right pass.
///
/// Substituted values are copied verbatim, so braces inside user text are
/// never treated as placeholders. Unknown placeholders are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Regional business-writing convention for the cover-letter prompt.
pub fn regional_context(country_code: Option<&str>) -> &'static str {
    match country_code.map(|c| c.trim().to_ascii_uppercase()).as_deref() {
        Some("US") => "American",
        Some("UK") | Some("GB") => "British",
        _ => "International",
    }
}

pub fn greeting(hiring_manager_name: Option<&str>) -> String {
    match hiring_manager_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Dear {name},"),
        None => "Dear Hiring Manager,".to_string(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn or_not_specified(value: Option<&str>) -> &str {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_SPECIFIED)
}

pub fn optimization_messages(input: &ResumePromptInput<'_>) -> Vec<ChatMessage> {
    let job_market = input
        .country_code
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_JOB_MARKET)
        .to_ascii_uppercase();

    let system = render(
        OPTIMIZE_SYSTEM_TEMPLATE,
        &[
            ("job_market", &job_market),
            ("factual_instruction", FACTUAL_INSTRUCTION),
            ("plain_document_instruction", PLAIN_DOCUMENT_INSTRUCTION),
        ],
    );
    let user = render(
        OPTIMIZE_USER_TEMPLATE,
        &[
            ("content", input.content),
            ("job_description", input.job_description),
            ("target_role", input.target_role),
            ("industry", or_not_specified(input.industry)),
            ("experience_level", or_not_specified(input.experience_level)),
        ],
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn keyword_messages(job_description: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(KEYWORDS_SYSTEM),
        ChatMessage::user(render(
            KEYWORDS_USER_TEMPLATE,
            &[("job_description", job_description)],
        )),
    ]
}

pub fn ats_messages(content: &str, job_description: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ATS_SYSTEM),
        ChatMessage::user(render(
            ATS_USER_TEMPLATE,
            &[("content", content), ("job_description", job_description)],
        )),
    ]
}

pub fn cover_letter_messages(input: &CoverLetterPromptInput<'_>) -> Vec<ChatMessage> {
    let regional = regional_context(input.country_code);
    let word_range = input.length.word_range_label();

    let system = render(
        COVER_LETTER_SYSTEM_TEMPLATE,
        &[
            ("regional_context", regional),
            ("tone", input.tone.as_str()),
            ("length", input.length.as_str()),
            ("word_range", &word_range),
            ("factual_instruction", FACTUAL_INSTRUCTION),
            ("plain_document_instruction", PLAIN_DOCUMENT_INSTRUCTION),
        ],
    );

    let greeting = greeting(input.hiring_manager_name);
    let tone_title = title_case(input.tone.as_str());
    let length_title = title_case(input.length.as_str());
    let user = render(
        COVER_LETTER_USER_TEMPLATE,
        &[
            ("resume_content", input.resume_content),
            ("job_description", input.job_description),
            ("target_role", input.target_role),
            ("company_name", input.company_name),
            ("greeting", &greeting),
            ("tone_title", &tone_title),
            ("length_title", &length_title),
            ("word_range", &word_range),
        ],
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Approach text for a 0-based variation index.
pub fn variation_approach(index: u8) -> &'static str {
    VARIATION_APPROACHES
        .get(usize::from(index))
        .copied()
        .unwrap_or(BALANCED_VARIATION_APPROACH)
}

/// The cover-letter messages with a per-index approach appended to the user turn.
pub fn variation_messages(input: &CoverLetterPromptInput<'_>, index: u8) -> Vec<ChatMessage> {
    let mut messages = cover_letter_messages(input);
    let version = (u16::from(index) + 1).to_string();
    let suffix = render(
        VARIATION_SUFFIX_TEMPLATE,
        &[("version", &version), ("approach", variation_approach(index))],
    );
    if let Some(user) = messages.last_mut() {
        user.content.push_str(&suffix);
    }
    messages
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, Error)]
#[error("unknown {field} value '{value}'")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// The two artifact families that pass through the generation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Resume,
    CoverLetter,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Resume => "resume",
            ArtifactKind::CoverLetter => "cover_letter",
        }
    }
}

/// Per-artifact generation status.
///
/// Resumes move through `processing`/`optimized`, cover letters through
/// `generating`/`generated`. `draft` and `failed` are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    Processing,
    Optimized,
    Generating,
    Generated,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Draft => "draft",
            ArtifactStatus::Processing => "processing",
            ArtifactStatus::Optimized => "optimized",
            ArtifactStatus::Generating => "generating",
            ArtifactStatus::Generated => "generated",
            ArtifactStatus::Failed => "failed",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ArtifactStatus::Processing | ArtifactStatus::Generating)
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArtifactStatus::Draft),
            "processing" => Ok(ArtifactStatus::Processing),
            "optimized" => Ok(ArtifactStatus::Optimized),
            "generating" => Ok(ArtifactStatus::Generating),
            "generated" => Ok(ArtifactStatus::Generated),
            "failed" => Ok(ArtifactStatus::Failed),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// External text-generation backends. A = OpenAI, B = Anthropic, C = Google.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" => Ok(ProviderKind::Google),
            other => Err(UnknownVariant::new("provider", other)),
        }
    }
}

/// Cover-letter tone, ordered from most conservative to most creative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Confident,
    Friendly,
    Enthusiastic,
    Casual,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Confident => "confident",
            Tone::Friendly => "friendly",
            Tone::Enthusiastic => "enthusiastic",
            Tone::Casual => "casual",
        }
    }
}

impl FromStr for Tone {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "professional" => Ok(Tone::Professional),
            "confident" => Ok(Tone::Confident),
            "friendly" => Ok(Tone::Friendly),
            "enthusiastic" => Ok(Tone::Enthusiastic),
            "casual" => Ok(Tone::Casual),
            other => Err(UnknownVariant::new("tone", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl LetterLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            LetterLength::Short => "short",
            LetterLength::Medium => "medium",
            LetterLength::Long => "long",
        }
    }
}

impl FromStr for LetterLength {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(LetterLength::Short),
            "medium" => Ok(LetterLength::Medium),
            "long" => Ok(LetterLength::Long),
            other => Err(UnknownVariant::new("length", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub id: Uuid,
    pub user_id: Uuid,
    pub original_content: String,
    pub job_description: Option<String>,
    pub target_role: String,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
    pub optimized_content: Option<String>,
    pub keywords: Vec<String>,
    pub ats_score: Option<u8>,
    pub status: ArtifactStatus,
    pub provider: Option<ProviderKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resume {
    /// Text a cover letter should be written from: the optimized version when one exists.
    pub fn best_content(&self) -> &str {
        self.optimized_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.original_content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverLetter {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resume_id: Uuid,
    pub company_name: String,
    pub hiring_manager_name: Option<String>,
    pub target_role: String,
    pub tone: Tone,
    pub length: LetterLength,
    pub job_description: Option<String>,
    pub content: Option<String>,
    pub status: ArtifactStatus,
    pub provider: Option<ProviderKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoverLetter {
    pub fn word_count(&self) -> usize {
        self.content
            .as_deref()
            .map(|c| c.split_whitespace().count())
            .unwrap_or(0)
    }

    /// Reading time at 200 words per minute.
    pub fn estimated_read_time(&self) -> String {
        let words = self.word_count();
        if words < 200 {
            return "< 1 min".to_string();
        }
        let minutes = words.div_ceil(200);
        if minutes > 1 {
            format!("{minutes} mins")
        } else {
            format!("{minutes} min")
        }
    }
}

/// Minimal identity of an artifact, enough to address it in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub id: Uuid,
}

impl ArtifactRef {
    pub fn resume(id: Uuid) -> Self {
        Self {
            kind: ArtifactKind::Resume,
            id,
        }
    }

    pub fn cover_letter(id: Uuid) -> Self {
        Self {
            kind: ArtifactKind::CoverLetter,
            id,
        }
    }
}

/// Rendered state of an artifact as pushed to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSnapshot {
    pub artifact_id: Uuid,
    pub kind: ArtifactKind,
    pub status: ArtifactStatus,
    pub output: Option<String>,
    pub score: Option<u8>,
    pub provider: Option<ProviderKind>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Resume> for ArtifactSnapshot {
    fn from(resume: &Resume) -> Self {
        Self {
            artifact_id: resume.id,
            kind: ArtifactKind::Resume,
            status: resume.status,
            output: resume.optimized_content.clone(),
            score: resume.ats_score,
            provider: resume.provider,
            updated_at: resume.updated_at,
        }
    }
}

impl From<&CoverLetter> for ArtifactSnapshot {
    fn from(letter: &CoverLetter) -> Self {
        Self {
            artifact_id: letter.id,
            kind: ArtifactKind::CoverLetter,
            status: letter.status,
            output: letter.content.clone(),
            score: None,
            provider: letter.provider,
            updated_at: letter.updated_at,
        }
    }
}

//! Artifact persistence.
//!
//! Every status change goes through `transition` or `complete`, both of which
//! are compare-and-set against the `from` set of a `TransitionPlan`. Output
//! is written in the same statement as the success transition, so a reader
//! never sees a success status without its content.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::artifact::{
    ArtifactKind, ArtifactRef, ArtifactSnapshot, ArtifactStatus, CoverLetter, LetterLength,
    ProviderKind, Resume, Tone, UnknownVariant,
};
use crate::state_machine::TransitionPlan;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("{0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct NewResume {
    pub user_id: Uuid,
    pub original_content: String,
    pub job_description: Option<String>,
    pub target_role: String,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCoverLetter {
    pub user_id: Uuid,
    pub resume_id: Uuid,
    pub company_name: String,
    pub hiring_manager_name: Option<String>,
    pub target_role: String,
    pub tone: Tone,
    pub length: LetterLength,
    pub job_description: Option<String>,
}

impl NewCoverLetter {
    /// Attributes of an existing letter, for creating a sibling variation.
    pub fn from_source(source: &CoverLetter) -> Self {
        Self {
            user_id: source.user_id,
            resume_id: source.resume_id,
            company_name: source.company_name.clone(),
            hiring_manager_name: source.hiring_manager_name.clone(),
            target_role: source.target_role.clone(),
            tone: source.tone,
            length: source.length,
            job_description: source.job_description.clone(),
        }
    }
}

/// What a successful generation writes alongside the terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutput {
    OptimizedResume {
        content: String,
        keywords: Vec<String>,
        provider: ProviderKind,
    },
    AtsScore {
        score: u8,
    },
    CoverLetter {
        content: String,
        provider: ProviderKind,
    },
}

impl ArtifactOutput {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactOutput::OptimizedResume { .. } | ArtifactOutput::AtsScore { .. } => {
                ArtifactKind::Resume
            }
            ArtifactOutput::CoverLetter { .. } => ArtifactKind::CoverLetter,
        }
    }
}

/// Result of a compare-and-set status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The row exists but its status was not in the plan's `from` set.
    Rejected { current: ArtifactStatus },
    /// The row no longer exists.
    Missing,
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn create_resume(&self, new: NewResume) -> Result<Resume, StoreError>;

    async fn resume(&self, id: Uuid) -> Result<Option<Resume>, StoreError>;

    /// Deletes the resume and every cover letter written from it.
    async fn delete_resume(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn create_cover_letter(&self, new: NewCoverLetter) -> Result<CoverLetter, StoreError>;

    /// Inserts a letter directly in `generated` with its content set.
    async fn create_generated_letter(
        &self,
        new: NewCoverLetter,
        content: String,
        provider: ProviderKind,
    ) -> Result<CoverLetter, StoreError>;

    async fn cover_letter(&self, id: Uuid) -> Result<Option<CoverLetter>, StoreError>;

    async fn delete_cover_letter(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Applies `plan.to` only if the current status is in `plan.from`.
    async fn transition(
        &self,
        artifact: ArtifactRef,
        plan: &TransitionPlan,
    ) -> Result<TransitionOutcome, StoreError>;

    /// `in_flight → success_terminal` with the output written atomically.
    async fn complete(&self, id: Uuid, output: ArtifactOutput)
        -> Result<TransitionOutcome, StoreError>;

    async fn snapshot(&self, artifact: ArtifactRef)
        -> Result<Option<ArtifactSnapshot>, StoreError>;
}

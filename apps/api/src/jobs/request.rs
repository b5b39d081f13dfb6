use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credits::Reservation;
use crate::generation::GenerationContext;
use crate::models::artifact::{ArtifactKind, ArtifactRef};

pub const MAX_VARIATIONS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "use_case", rename_all = "snake_case")]
pub enum UseCase {
    Optimize,
    AtsScore,
    GenerateCoverLetter,
    GenerateVariations { count: u8 },
}

impl UseCase {
    /// Variation batch with the requested count clamped to `[1, MAX_VARIATIONS]`.
    pub fn variations(requested: u32) -> Self {
        let count = requested.clamp(1, u32::from(MAX_VARIATIONS)) as u8;
        UseCase::GenerateVariations { count }
    }

    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            UseCase::Optimize | UseCase::AtsScore => ArtifactKind::Resume,
            UseCase::GenerateCoverLetter | UseCase::GenerateVariations { .. } => {
                ArtifactKind::CoverLetter
            }
        }
    }

    /// Whether one accepted request holds one credit until it finishes.
    /// ATS scoring is free; variation batches are charged once after the batch.
    pub fn reserves_credit(&self) -> bool {
        matches!(self, UseCase::Optimize | UseCase::GenerateCoverLetter)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::Optimize => "optimize",
            UseCase::AtsScore => "ats_score",
            UseCase::GenerateCoverLetter => "generate_cover_letter",
            UseCase::GenerateVariations { .. } => "generate_variations",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sources with a variation batch queued or running.
#[derive(Clone, Default)]
pub struct ActiveBatches {
    sources: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActiveBatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `source_id`; `None` if a batch for it is already active.
    pub fn try_claim(&self, source_id: Uuid) -> Option<BatchGuard> {
        let mut sources = self.sources.lock().unwrap_or_else(|p| p.into_inner());
        sources.insert(source_id).then(|| BatchGuard {
            sources: Arc::clone(&self.sources),
            source_id,
        })
    }
}

/// Releases the claim when the batch job is dropped, whether it ran or not.
pub struct BatchGuard {
    sources: Arc<Mutex<HashSet<Uuid>>>,
    source_id: Uuid,
}

impl fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGuard")
            .field("source_id", &self.source_id)
            .finish()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.sources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.source_id);
    }
}

/// A queued unit of work. Consumed exactly once by the runner.
#[derive(Debug)]
pub struct GenerationRequest {
    pub job_id: Uuid,
    pub artifact_id: Uuid,
    pub use_case: UseCase,
    pub context: GenerationContext,
    pub reservation: Option<Reservation>,
    pub enqueued_at: DateTime<Utc>,
    pub batch_guard: Option<BatchGuard>,
}

impl GenerationRequest {
    pub fn new(artifact_id: Uuid, use_case: UseCase, context: GenerationContext) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            artifact_id,
            use_case,
            context,
            reservation: None,
            enqueued_at: Utc::now(),
            batch_guard: None,
        }
    }

    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef {
            kind: self.use_case.artifact_kind(),
            id: self.artifact_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.context.user_id
    }
}

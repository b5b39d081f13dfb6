//! Enqueue API: turns a user request into a guarded, metered, queued job.
//!
//! Order of checks: validate inputs, check entitlement (holding a credit when
//! the use case is metered), then compare-and-set the artifact into its
//! in-flight status. Only after the transition is applied is the job queued,
//! so a second request for the same artifact is rejected and never queued.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::queue::JobQueue;
use super::request::{ActiveBatches, GenerationRequest, UseCase};
use crate::credits::{CreditLedger, LedgerError, Reservation};
use crate::generation::{CoverLetterInput, GenerationContext, ResumeInput, ValidationError};
use crate::models::artifact::{ArtifactStatus, ProviderKind};
use crate::state_machine::{failure_plan, start_plan, TransitionError};
use crate::storage::{ArtifactRepository, StoreError, TransitionOutcome};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("a generation is already in flight for this artifact")]
    AlreadyInFlight,

    #[error("artifact is {current} and cannot start this generation")]
    NotReady { current: ArtifactStatus },

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("job queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<TransitionError> for DispatchError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyInFlight => DispatchError::AlreadyInFlight,
            TransitionError::NotReady { current } => DispatchError::NotReady { current },
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits => DispatchError::InsufficientCredits,
            LedgerError::UnknownUser(id) => DispatchError::NotFound(format!("User {id}")),
            other => DispatchError::Ledger(other),
        }
    }
}

/// Returned once the artifact is in flight and the job is queued.
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub job_id: Uuid,
    pub artifact_id: Uuid,
    pub status: ArtifactStatus,
    #[serde(flatten)]
    pub use_case: UseCase,
}

#[derive(Clone)]
pub struct Dispatcher {
    artifacts: Arc<dyn ArtifactRepository>,
    ledger: Arc<dyn CreditLedger>,
    queue: JobQueue,
    batches: ActiveBatches,
}

impl Dispatcher {
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        ledger: Arc<dyn CreditLedger>,
        queue: JobQueue,
        batches: ActiveBatches,
    ) -> Self {
        Self {
            artifacts,
            ledger,
            queue,
            batches,
        }
    }

    /// Validates the artifact's inputs for `use_case` and returns its current status.
    async fn check_artifact(
        &self,
        user_id: Uuid,
        artifact_id: Uuid,
        use_case: &UseCase,
    ) -> Result<ArtifactStatus, DispatchError> {
        let not_found = || DispatchError::NotFound(format!("Artifact {artifact_id}"));

        match use_case {
            UseCase::Optimize | UseCase::AtsScore => {
                let resume = self
                    .artifacts
                    .resume(artifact_id)
                    .await?
                    .filter(|r| r.user_id == user_id)
                    .ok_or_else(not_found)?;
                let input = if *use_case == UseCase::Optimize {
                    ResumeInput::for_optimization(&resume)
                } else {
                    ResumeInput::for_scoring(&resume)
                };
                input.validate()?;
                Ok(resume.status)
            }
            UseCase::GenerateCoverLetter | UseCase::GenerateVariations { .. } => {
                let letter = self
                    .artifacts
                    .cover_letter(artifact_id)
                    .await?
                    .filter(|l| l.user_id == user_id)
                    .ok_or_else(not_found)?;
                let resume = self
                    .artifacts
                    .resume(letter.resume_id)
                    .await?
                    .ok_or_else(not_found)?;
                CoverLetterInput::new(&letter, &resume).validate()?;
                Ok(letter.status)
            }
        }
    }

    pub async fn request_generation(
        &self,
        user_id: Uuid,
        artifact_id: Uuid,
        use_case: UseCase,
        preferred_provider: Option<ProviderKind>,
    ) -> Result<Accepted, DispatchError> {
        let account = self
            .ledger
            .account(user_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("User {user_id}")))?;

        let current = self.check_artifact(user_id, artifact_id, &use_case).await?;

        let context = GenerationContext {
            user_id,
            country_code: account.country_code.clone(),
            preferred_provider,
        };
        let mut request = GenerationRequest::new(artifact_id, use_case, context);

        // Reject a status that cannot start before any credit is held
        if let Some(plan) = start_plan(&use_case) {
            if !plan.permits(current) {
                return Err(plan.rejection(current).into());
            }
        }

        if use_case.reserves_credit() {
            request.reservation = Some(self.ledger.reserve(user_id).await?);
        } else if let UseCase::GenerateVariations { .. } = use_case {
            if current != ArtifactStatus::Generated {
                return Err(DispatchError::NotReady { current });
            }
            if !account.can_generate(Utc::now()) {
                return Err(DispatchError::InsufficientCredits);
            }
            request.batch_guard = Some(
                self.batches
                    .try_claim(artifact_id)
                    .ok_or(DispatchError::AlreadyInFlight)?,
            );
        }

        let status = match start_plan(&use_case) {
            Some(plan) => {
                let outcome = self.artifacts.transition(request.artifact(), &plan).await;
                let rejection = match outcome {
                    Ok(TransitionOutcome::Applied) => None,
                    Ok(TransitionOutcome::Rejected { current }) => {
                        Some(DispatchError::from(plan.rejection(current)))
                    }
                    Ok(TransitionOutcome::Missing) => {
                        Some(DispatchError::NotFound(format!("Artifact {artifact_id}")))
                    }
                    Err(e) => Some(DispatchError::Store(e)),
                };
                if let Some(err) = rejection {
                    self.release(user_id, request.reservation).await;
                    return Err(err);
                }
                plan.to
            }
            None => current,
        };

        let job_id = request.job_id;
        let reservation = request.reservation;
        if let Err(closed) = self.queue.submit(request).await {
            warn!("Job queue closed, failing {artifact_id}");
            let artifact = closed.0.artifact();
            if start_plan(&use_case).is_some() {
                self.artifacts
                    .transition(artifact, &failure_plan(artifact.kind))
                    .await?;
            }
            self.release(user_id, reservation).await;
            return Err(DispatchError::QueueClosed);
        }

        info!("Queued {use_case} job {job_id} for {artifact_id}");
        Ok(Accepted {
            job_id,
            artifact_id,
            status,
            use_case,
        })
    }

    async fn release(&self, user_id: Uuid, reservation: Option<Reservation>) {
        if let Some(r) = reservation {
            if let Err(e) = self.ledger.release(user_id, r).await {
                warn!("Failed to release credit hold for {user_id}: {e}");
            }
        }
    }
}

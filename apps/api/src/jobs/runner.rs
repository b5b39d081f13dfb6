//! JobRunner: executes one dequeued generation request.
//!
//! A job only proceeds while its artifact is still in the in-flight status
//! the dispatcher put it in. Success writes output and status together,
//! then commits the held credit, then notifies. Failure moves the artifact
//! to `failed` without touching its content and releases the credit. A
//! storage or ledger error part way through gets the same treatment on a
//! best-effort basis before it is surfaced.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::request::{GenerationRequest, UseCase};
use super::retry::RetryPolicy;
use crate::credits::{variation_batch_cost, ChargeOutcome, CreditLedger, LedgerError, Reservation};
use crate::generation::{
    Completion, CoverLetterInput, GenerationContext, GenerationError, GenerationService,
    ResumeInput,
};
use crate::models::artifact::{ArtifactRef, ArtifactStatus, CoverLetter, Resume};
use crate::notifications::{notify, Notification, NotificationSink};
use crate::state_machine::{failure_plan, in_flight_status, start_plan};
use crate::storage::{
    ArtifactOutput, ArtifactRepository, NewCoverLetter, StoreError, TransitionOutcome,
};

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded {
        charge: Option<ChargeOutcome>,
    },
    Failed {
        reason: String,
    },
    /// The user or artifact no longer exists.
    Discarded,
    /// The artifact left the expected in-flight status before or during the job.
    Skipped {
        current: ArtifactStatus,
    },
    VariationsFinished {
        created: Vec<Uuid>,
        failed: u8,
        charge: Option<ChargeOutcome>,
    },
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{use_case} for {artifact_id} failed after the retry budget: {source}")]
    Unexpected {
        use_case: UseCase,
        artifact_id: Uuid,
        #[source]
        source: GenerationError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone)]
pub struct JobRunner {
    artifacts: Arc<dyn ArtifactRepository>,
    ledger: Arc<dyn CreditLedger>,
    generation: GenerationService,
    sink: Arc<dyn NotificationSink>,
    base_delay: Duration,
}

/// A record loaded for a job, or the reason the job stops before generating.
enum Loaded<T> {
    Ready(T),
    Stop(JobOutcome),
}

impl JobRunner {
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        ledger: Arc<dyn CreditLedger>,
        generation: GenerationService,
        sink: Arc<dyn NotificationSink>,
        base_delay: Duration,
    ) -> Self {
        Self {
            artifacts,
            ledger,
            generation,
            sink,
            base_delay,
        }
    }

    /// Worker entry point. Outcomes are logged; unexpected failures at error level.
    pub async fn run(&self, request: GenerationRequest) {
        let job_id = request.job_id;
        let use_case = request.use_case;
        let artifact_id = request.artifact_id;
        let waited = chrono::Utc::now() - request.enqueued_at;
        info!(
            "Job {job_id} started: {use_case} for {artifact_id} (queued {}ms)",
            waited.num_milliseconds()
        );

        match self.execute(request).await {
            Ok(outcome) => info!("Job {job_id} finished: {outcome:?}"),
            Err(e) => error!("Job {job_id} ({use_case} for {artifact_id}) errored: {e:?}"),
        }
    }

    pub async fn execute(&self, mut request: GenerationRequest) -> Result<JobOutcome, JobError> {
        // Held until this function returns, so the source stays claimed while the batch runs
        let _batch_guard = request.batch_guard.take();
        // Cleared once the hold is committed or released
        let mut reservation = request.reservation.take();

        match self.run_use_case(&request, &mut reservation).await {
            Err(e @ (JobError::Store(_) | JobError::Ledger(_))) => {
                self.recover(&request, reservation.take()).await;
                Err(e)
            }
            result => result,
        }
    }

    async fn run_use_case(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
    ) -> Result<JobOutcome, JobError> {
        let user_id = request.user_id();
        if self.ledger.account(user_id).await?.is_none() {
            info!("User {user_id} no longer exists, discarding job {}", request.job_id);
            self.release(user_id, reservation.take()).await;
            return Ok(JobOutcome::Discarded);
        }

        match request.use_case {
            UseCase::Optimize => self.optimize(request, reservation).await,
            UseCase::AtsScore => self.score(request, reservation).await,
            UseCase::GenerateCoverLetter => self.cover_letter(request, reservation).await,
            UseCase::GenerateVariations { count } => self.variations(request, count).await,
        }
    }

    /// Moves the artifact out of its in-flight status and drops the credit
    /// hold after a storage or ledger error, so it can be requested again.
    async fn recover(&self, request: &GenerationRequest, reservation: Option<Reservation>) {
        if start_plan(&request.use_case).is_some() {
            let artifact = request.artifact();
            match self
                .artifacts
                .transition(artifact, &failure_plan(artifact.kind))
                .await
            {
                Ok(TransitionOutcome::Applied) => {
                    warn!(
                        "{} for {} marked failed after a storage error",
                        request.use_case, artifact.id
                    );
                    self.notify_snapshot(artifact).await;
                }
                // Already terminal, e.g. the output was saved before the ledger failed
                Ok(TransitionOutcome::Rejected { .. }) => self.notify_snapshot(artifact).await,
                Ok(TransitionOutcome::Missing) => {}
                Err(e) => error!(
                    "Could not mark {} failed, it stays in flight: {e}",
                    artifact.id
                ),
            }
        }
        self.release(request.user_id(), reservation).await;
    }

    fn retry_policy(&self, use_case: &UseCase) -> RetryPolicy {
        RetryPolicy::for_use_case(use_case, self.base_delay)
    }

    async fn release(&self, user_id: Uuid, reservation: Option<Reservation>) {
        if let Some(r) = reservation {
            if let Err(e) = self.ledger.release(user_id, r).await {
                warn!("Failed to release credit hold for {user_id}: {e}");
            }
        }
    }

    async fn notify_snapshot(&self, artifact: ArtifactRef) {
        match self.artifacts.snapshot(artifact).await {
            Ok(Some(snapshot)) => {
                notify(self.sink.as_ref(), Notification::ArtifactUpdated(snapshot)).await
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load {} for notification: {e}", artifact.id),
        }
    }

    async fn load_resume(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
    ) -> Result<Loaded<Resume>, JobError> {
        let Some(resume) = self.artifacts.resume(request.artifact_id).await? else {
            self.release(request.user_id(), reservation.take()).await;
            return Ok(Loaded::Stop(JobOutcome::Discarded));
        };
        let expected = in_flight_status(request.artifact().kind);
        if resume.status != expected {
            self.release(request.user_id(), reservation.take()).await;
            return Ok(Loaded::Stop(JobOutcome::Skipped {
                current: resume.status,
            }));
        }
        Ok(Loaded::Ready(resume))
    }

    /// Loads a letter and the resume it is written from.
    async fn load_letter(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
        expected: ArtifactStatus,
    ) -> Result<Loaded<(CoverLetter, Resume)>, JobError> {
        let Some(letter) = self.artifacts.cover_letter(request.artifact_id).await? else {
            self.release(request.user_id(), reservation.take()).await;
            return Ok(Loaded::Stop(JobOutcome::Discarded));
        };
        if letter.status != expected {
            self.release(request.user_id(), reservation.take()).await;
            return Ok(Loaded::Stop(JobOutcome::Skipped {
                current: letter.status,
            }));
        }
        let Some(resume) = self.artifacts.resume(letter.resume_id).await? else {
            self.release(request.user_id(), reservation.take()).await;
            return Ok(Loaded::Stop(JobOutcome::Discarded));
        };
        Ok(Loaded::Ready((letter, resume)))
    }

    async fn optimize(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
    ) -> Result<JobOutcome, JobError> {
        let resume = match self.load_resume(request, reservation).await? {
            Loaded::Ready(r) => r,
            Loaded::Stop(outcome) => return Ok(outcome),
        };
        let ctx = &request.context;
        let input = ResumeInput::for_optimization(&resume);

        let result = self
            .retry_policy(&request.use_case)
            .run("optimize", |_| self.generation.optimize(ctx, &input))
            .await;

        match result {
            Ok(completion) => {
                let keywords = self.best_effort_keywords(ctx, &input).await;
                let output = ArtifactOutput::OptimizedResume {
                    content: completion.text,
                    keywords,
                    provider: completion.provider,
                };
                self.finish_success(request, reservation, output).await
            }
            Err(e) => self.finish_failure(request, reservation, e).await,
        }
    }

    async fn best_effort_keywords(
        &self,
        ctx: &GenerationContext,
        input: &ResumeInput,
    ) -> Vec<String> {
        let Some(jd) = input.job_description.as_deref() else {
            return Vec::new();
        };
        match self.generation.extract_keywords(ctx, jd).await {
            Ok(keywords) => keywords,
            Err(e) => {
                warn!("Keyword extraction failed, continuing without keywords: {e}");
                Vec::new()
            }
        }
    }

    async fn score(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
    ) -> Result<JobOutcome, JobError> {
        let resume = match self.load_resume(request, reservation).await? {
            Loaded::Ready(r) => r,
            Loaded::Stop(outcome) => return Ok(outcome),
        };
        let ctx = &request.context;
        let input = ResumeInput::for_scoring(&resume);

        let result = self
            .retry_policy(&request.use_case)
            .run("ats_score", |_| self.generation.ats_score(ctx, &input))
            .await;

        match result {
            Ok((score, _)) => {
                info!("ATS score for {}: {}/100 ({:?})", resume.id, score.value, score.source);
                let output = ArtifactOutput::AtsScore { score: score.value };
                self.finish_success(request, reservation, output).await
            }
            Err(e) => self.finish_failure(request, reservation, e).await,
        }
    }

    async fn cover_letter(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
    ) -> Result<JobOutcome, JobError> {
        let (letter, resume) = match self
            .load_letter(request, reservation, ArtifactStatus::Generating)
            .await?
        {
            Loaded::Ready(pair) => pair,
            Loaded::Stop(outcome) => return Ok(outcome),
        };
        let ctx = &request.context;
        let input = CoverLetterInput::new(&letter, &resume);

        let result = self
            .retry_policy(&request.use_case)
            .run("cover_letter", |_| self.generation.cover_letter(ctx, &input))
            .await;

        match result {
            Ok(completion) => {
                let output = ArtifactOutput::CoverLetter {
                    content: completion.text,
                    provider: completion.provider,
                };
                self.finish_success(request, reservation, output).await
            }
            Err(e) => self.finish_failure(request, reservation, e).await,
        }
    }

    /// Each variation runs with its own attempt budget; one failing never
    /// aborts its siblings. The batch is charged once, only if something was created.
    async fn variations(
        &self,
        request: &GenerationRequest,
        count: u8,
    ) -> Result<JobOutcome, JobError> {
        let (source, resume) = match self
            .load_letter(request, &mut None, ArtifactStatus::Generated)
            .await?
        {
            Loaded::Ready(pair) => pair,
            Loaded::Stop(outcome) => return Ok(outcome),
        };
        let ctx = &request.context;
        let input = CoverLetterInput::new(&source, &resume);
        let policy = self.retry_policy(&request.use_case);

        let results: Vec<(u8, Result<Completion, GenerationError>)> =
            join_all((0..count).map(|index| {
                let input = &input;
                async move {
                    let label = format!("variation {}", index + 1);
                    let result = policy
                        .run(&label, |_| {
                            self.generation.cover_letter_variation(ctx, input, index)
                        })
                        .await;
                    (index, result)
                }
            }))
            .await;

        let mut created = Vec::new();
        let mut failed: u8 = 0;
        for (index, result) in results {
            match result {
                Ok(completion) => match self
                    .artifacts
                    .create_generated_letter(
                        NewCoverLetter::from_source(&source),
                        completion.text,
                        completion.provider,
                    )
                    .await
                {
                    Ok(letter) => created.push(letter.id),
                    Err(e) => {
                        failed += 1;
                        error!(
                            "Variation {} of {} generated but could not be saved: {e}",
                            index + 1,
                            source.id
                        );
                    }
                },
                Err(e) => {
                    failed += 1;
                    if e.is_unexpected() {
                        error!(
                            "Variation {} of {} failed unexpectedly: {e:?}",
                            index + 1,
                            source.id
                        );
                    } else {
                        warn!("Variation {} of {} failed: {e}", index + 1, source.id);
                    }
                }
            }
        }

        let charge = if created.is_empty() {
            Ok(None)
        } else {
            let cost = variation_batch_cost(count);
            self.ledger
                .charge_batch(request.user_id(), cost)
                .await
                .map(|outcome| {
                    if let ChargeOutcome::Skipped { available } = outcome {
                        warn!(
                            "Variation batch for {} not charged: cost {cost}, available {available}",
                            source.id
                        );
                    }
                    Some(outcome)
                })
        };

        info!(
            "Variation batch for {}: {} created, {failed} failed",
            source.id,
            created.len()
        );
        notify(
            self.sink.as_ref(),
            Notification::VariationsReady {
                source_id: source.id,
                created: created.clone(),
                failed,
            },
        )
        .await;

        // The created letters stand even if charging failed
        Ok(JobOutcome::VariationsFinished {
            created,
            failed,
            charge: charge?,
        })
    }

    async fn finish_success(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
        output: ArtifactOutput,
    ) -> Result<JobOutcome, JobError> {
        let user_id = request.user_id();
        match self.artifacts.complete(request.artifact_id, output).await? {
            TransitionOutcome::Applied => {
                let charge = match *reservation {
                    Some(r) => {
                        let outcome = self.ledger.commit(user_id, r).await?;
                        *reservation = None;
                        Some(outcome)
                    }
                    None => None,
                };
                self.notify_snapshot(request.artifact()).await;
                Ok(JobOutcome::Succeeded { charge })
            }
            TransitionOutcome::Missing => {
                self.release(user_id, reservation.take()).await;
                Ok(JobOutcome::Discarded)
            }
            TransitionOutcome::Rejected { current } => {
                self.release(user_id, reservation.take()).await;
                Ok(JobOutcome::Skipped { current })
            }
        }
    }

    async fn finish_failure(
        &self,
        request: &GenerationRequest,
        reservation: &mut Option<Reservation>,
        error: GenerationError,
    ) -> Result<JobOutcome, JobError> {
        let artifact = request.artifact();
        let outcome = self
            .artifacts
            .transition(artifact, &failure_plan(artifact.kind))
            .await?;
        self.release(request.user_id(), reservation.take()).await;

        match outcome {
            TransitionOutcome::Applied => self.notify_snapshot(artifact).await,
            TransitionOutcome::Missing => return Ok(JobOutcome::Discarded),
            TransitionOutcome::Rejected { current } => {
                return Ok(JobOutcome::Skipped { current })
            }
        }

        if error.is_unexpected() {
            return Err(JobError::Unexpected {
                use_case: request.use_case,
                artifact_id: request.artifact_id,
                source: error,
            });
        }

        warn!(
            "{} for {} failed: {error}",
            request.use_case, request.artifact_id
        );
        Ok(JobOutcome::Failed {
            reason: error.to_string(),
        })
    }
}

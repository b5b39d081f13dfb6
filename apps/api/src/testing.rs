//! Test doubles and fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::credits::CreditLedger;
use crate::extraction::DocumentExtractor;
use crate::generation::GenerationService;
use crate::jobs::{ActiveBatches, Dispatcher, GenerationRequest, JobError, JobOutcome, JobQueue, JobRunner};
use crate::llm_client::{CompletionRequest, ProviderClient, ProviderError, ProviderRegistry};
use crate::models::artifact::{
    ArtifactRef, ArtifactSnapshot, ArtifactStatus, CoverLetter, LetterLength, ProviderKind,
    Resume, Tone,
};
use crate::notifications::{BroadcastHub, Notification, NotificationSink, NotifyError};
use crate::state::AppState;
use crate::state_machine::{start_plan, TransitionPlan};
use crate::storage::{
    ArtifactOutput, ArtifactRepository, MemoryStore, NewCoverLetter, NewResume, StoreError,
    TransitionOutcome,
};

/// Provider that replays a script, then either keeps succeeding or keeps failing.
pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    then: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn scripted(
        kind: ProviderKind,
        script: Vec<Result<String, ProviderError>>,
        then: Option<&str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script.into()),
            then: then.map(str::to_string),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always_ok(kind: ProviderKind, text: &str) -> Arc<Self> {
        Self::scripted(kind, Vec::new(), Some(text))
    }

    pub fn always_failing(kind: ProviderKind) -> Arc<Self> {
        Self::scripted(kind, Vec::new(), None)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

pub fn server_error() -> ProviderError {
    ProviderError::Server {
        status: 503,
        message: "overloaded".to_string(),
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.then {
            Some(text) => Ok(text.clone()),
            None => Err(server_error()),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(notification);
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn publish(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("subscriber went away".to_string()))
    }
}

/// Memory store whose writes can be made to fail with a database error.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_complete: AtomicBool,
    failing_letter_inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_complete: AtomicBool::new(false),
            failing_letter_inserts: AtomicUsize::new(0),
        }
    }

    pub fn failing_complete(self) -> Self {
        self.fail_complete.store(true, Ordering::SeqCst);
        self
    }

    /// The next `n` generated-letter inserts fail.
    pub fn failing_letter_inserts(self, n: usize) -> Self {
        self.failing_letter_inserts.store(n, Ordering::SeqCst);
        self
    }
}

fn pool_timed_out() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ArtifactRepository for FlakyStore {
    async fn create_resume(&self, new: NewResume) -> Result<Resume, StoreError> {
        self.inner.create_resume(new).await
    }

    async fn resume(&self, id: Uuid) -> Result<Option<Resume>, StoreError> {
        self.inner.resume(id).await
    }

    async fn delete_resume(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_resume(id).await
    }

    async fn create_cover_letter(&self, new: NewCoverLetter) -> Result<CoverLetter, StoreError> {
        self.inner.create_cover_letter(new).await
    }

    async fn create_generated_letter(
        &self,
        new: NewCoverLetter,
        content: String,
        provider: ProviderKind,
    ) -> Result<CoverLetter, StoreError> {
        let should_fail = self
            .failing_letter_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(pool_timed_out());
        }
        self.inner.create_generated_letter(new, content, provider).await
    }

    async fn cover_letter(&self, id: Uuid) -> Result<Option<CoverLetter>, StoreError> {
        self.inner.cover_letter(id).await
    }

    async fn delete_cover_letter(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_cover_letter(id).await
    }

    async fn transition(
        &self,
        artifact: ArtifactRef,
        plan: &TransitionPlan,
    ) -> Result<TransitionOutcome, StoreError> {
        self.inner.transition(artifact, plan).await
    }

    async fn complete(
        &self,
        id: Uuid,
        output: ArtifactOutput,
    ) -> Result<TransitionOutcome, StoreError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(pool_timed_out());
        }
        self.inner.complete(id, output).await
    }

    async fn snapshot(
        &self,
        artifact: ArtifactRef,
    ) -> Result<Option<ArtifactSnapshot>, StoreError> {
        self.inner.snapshot(artifact).await
    }
}

pub mod fixtures {
    use super::*;

    pub const RESUME_TEXT: &str = "Jane Doe\nSenior Software Engineer\n\
        Seven years building distributed backend systems in Rust and Go. \
        Led the migration of a payments platform to async Rust, cutting p99 latency by 40%. \
        Mentored four engineers and owned on-call for a 24/7 service.";

    pub const JOB_DESCRIPTION: &str = "We are hiring a Senior Backend Engineer to design \
        and operate high-throughput Rust services, own reliability, and mentor the team.";

    pub fn new_resume(user_id: Uuid) -> NewResume {
        NewResume {
            user_id,
            original_content: RESUME_TEXT.to_string(),
            job_description: Some(JOB_DESCRIPTION.to_string()),
            target_role: "Senior Backend Engineer".to_string(),
            industry: Some("Fintech".to_string()),
            experience_level: Some("Senior".to_string()),
        }
    }

    pub fn resume(user_id: Uuid) -> Resume {
        let new = new_resume(user_id);
        let now = Utc::now();
        Resume {
            id: Uuid::new_v4(),
            user_id,
            original_content: new.original_content,
            job_description: new.job_description,
            target_role: new.target_role,
            industry: new.industry,
            experience_level: new.experience_level,
            optimized_content: None,
            keywords: Vec::new(),
            ats_score: None,
            status: ArtifactStatus::Draft,
            provider: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_cover_letter(resume: &Resume) -> NewCoverLetter {
        NewCoverLetter {
            user_id: resume.user_id,
            resume_id: resume.id,
            company_name: "Acme Payments".to_string(),
            hiring_manager_name: None,
            target_role: "Senior Backend Engineer".to_string(),
            tone: Tone::Professional,
            length: LetterLength::Medium,
            job_description: None,
        }
    }

    pub fn cover_letter(resume: &Resume) -> CoverLetter {
        let new = new_cover_letter(resume);
        let now = Utc::now();
        CoverLetter {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            resume_id: new.resume_id,
            company_name: new.company_name,
            hiring_manager_name: new.hiring_manager_name,
            target_role: new.target_role,
            tone: new.tone,
            length: new.length,
            job_description: new.job_description,
            content: None,
            status: ArtifactStatus::Draft,
            provider: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        openai_api_key: "test".to_string(),
        anthropic_api_key: None,
        google_api_key: None,
        port: 0,
        rust_log: "debug".to_string(),
        worker_concurrency: 2,
        queue_capacity: 64,
        provider_timeout: Duration::from_secs(5),
        retry_base_delay: Duration::from_millis(1000),
        max_upload_bytes: 1024 * 1024,
    }
}

/// Dispatcher, runner and an in-memory store wired together. Jobs stay on the
/// queue until a test pulls them with `run_next`.
pub struct Harness {
    pub store: MemoryStore,
    pub sink: Arc<RecordingSink>,
    pub generation: GenerationService,
    pub dispatcher: Dispatcher,
    pub runner: JobRunner,
    rx: mpsc::Receiver<GenerationRequest>,
}

impl Harness {
    pub fn new(providers: Vec<Arc<ScriptedProvider>>) -> Self {
        let registry = providers
            .into_iter()
            .fold(ProviderRegistry::new(), |registry, p| registry.register(p));
        let store = MemoryStore::new();
        let sink = Arc::new(RecordingSink::default());
        let generation = GenerationService::new(registry);
        let (queue, rx) = JobQueue::bounded(64);
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            queue,
            ActiveBatches::new(),
        );
        let runner = JobRunner::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            generation.clone(),
            sink.clone(),
            Duration::from_millis(1000),
        );
        Self {
            store,
            sink,
            generation,
            dispatcher,
            runner,
            rx,
        }
    }

    pub async fn user(&self, credits: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.store.open_account(id, Some("US".to_string())).await.unwrap();
        let start = crate::models::user::DEFAULT_STARTING_CREDITS;
        if credits > start {
            self.store.add_credits(id, credits - start).await.unwrap();
        } else if credits < start {
            self.store.charge_batch(id, start - credits).await.unwrap();
        }
        id
    }

    pub async fn balance(&self, user_id: Uuid) -> i32 {
        self.store
            .account(user_id)
            .await
            .unwrap()
            .unwrap()
            .credits_remaining
    }

    pub async fn resume(&self, user_id: Uuid) -> Resume {
        self.store
            .create_resume(fixtures::new_resume(user_id))
            .await
            .unwrap()
    }

    pub async fn draft_letter(&self, resume: &Resume) -> CoverLetter {
        self.store
            .create_cover_letter(fixtures::new_cover_letter(resume))
            .await
            .unwrap()
    }

    /// A letter already in `generated`, ready to be a variation source.
    pub async fn generated_letter(&self, resume: &Resume) -> CoverLetter {
        let letter = self.draft_letter(resume).await;
        let plan = start_plan(&crate::jobs::UseCase::GenerateCoverLetter).unwrap();
        self.store
            .transition(ArtifactRef::cover_letter(letter.id), &plan)
            .await
            .unwrap();
        self.store
            .complete(
                letter.id,
                ArtifactOutput::CoverLetter {
                    content: "Dear Hiring Manager, I am writing to apply.".to_string(),
                    provider: ProviderKind::OpenAi,
                },
            )
            .await
            .unwrap();
        self.store.cover_letter(letter.id).await.unwrap().unwrap()
    }

    /// A runner sharing this harness's ledger, providers and sink but
    /// reading and writing artifacts through `artifacts`.
    pub fn runner_with(
        &self,
        artifacts: Arc<dyn ArtifactRepository>,
        sink: Arc<dyn NotificationSink>,
    ) -> JobRunner {
        JobRunner::new(
            artifacts,
            Arc::new(self.store.clone()),
            self.generation.clone(),
            sink,
            Duration::from_millis(1000),
        )
    }

    pub fn queued(&mut self) -> Option<GenerationRequest> {
        self.rx.try_recv().ok()
    }

    /// Runs the next queued job to completion.
    pub async fn run_next(&mut self) -> Result<JobOutcome, JobError> {
        let request = self.queued().expect("no job queued");
        self.runner.execute(request).await
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            artifacts: Arc::new(self.store.clone()),
            ledger: Arc::new(self.store.clone()),
            generation: self.generation.clone(),
            dispatcher: self.dispatcher.clone(),
            hub: Arc::new(BroadcastHub::new()),
            extractor: DocumentExtractor::new(test_config().max_upload_bytes),
        }
    }
}

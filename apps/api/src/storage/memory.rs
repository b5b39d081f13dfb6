//! In-process store behind one mutex. Used when no `DATABASE_URL` is set,
//! and by tests. Each trait method takes the lock once, so every
//! compare-and-set and ledger update is atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    ArtifactOutput, ArtifactRepository, NewCoverLetter, NewResume, StoreError, TransitionOutcome,
};
use crate::credits::{ChargeOutcome, CreditLedger, LedgerError, Reservation};
use crate::models::artifact::{
    ArtifactKind, ArtifactRef, ArtifactSnapshot, ArtifactStatus, CoverLetter, ProviderKind, Resume,
};
use crate::models::user::{Entitlement, UserAccount, DEFAULT_STARTING_CREDITS};
use crate::state_machine::{success_plan, TransitionPlan};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserAccount>,
    resumes: HashMap<Uuid, Resume>,
    letters: HashMap<Uuid, CoverLetter>,
}

impl Tables {
    fn user_mut(&mut self, id: Uuid) -> Result<&mut UserAccount, LedgerError> {
        self.users.get_mut(&id).ok_or(LedgerError::UnknownUser(id))
    }

    fn status(&self, artifact: ArtifactRef) -> Option<ArtifactStatus> {
        match artifact.kind {
            ArtifactKind::Resume => self.resumes.get(&artifact.id).map(|r| r.status),
            ArtifactKind::CoverLetter => self.letters.get(&artifact.id).map(|l| l.status),
        }
    }

    fn set_status(&mut self, artifact: ArtifactRef, status: ArtifactStatus, now: DateTime<Utc>) {
        match artifact.kind {
            ArtifactKind::Resume => {
                if let Some(resume) = self.resumes.get_mut(&artifact.id) {
                    resume.status = status;
                    resume.updated_at = now;
                }
            }
            ArtifactKind::CoverLetter => {
                if let Some(letter) = self.letters.get_mut(&artifact.id) {
                    letter.status = status;
                    letter.updated_at = now;
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cover_letter_count(&self) -> usize {
        self.lock().letters.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn new_letter(new: NewCoverLetter, now: DateTime<Utc>) -> CoverLetter {
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

#[async_trait]
impl ArtifactRepository for MemoryStore {
    async fn create_resume(&self, new: NewResume) -> Result<Resume, StoreError> {
        let now = Utc::now();
        let resume = Resume {
            id: Uuid::new_v4(),
            user_id: new.user_id,
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
        };
        let mut tables = self.lock();
        if !tables.users.contains_key(&new.user_id) {
            return Err(StoreError::NotFound(format!("User {}", new.user_id)));
        }
        tables.resumes.insert(resume.id, resume.clone());
        Ok(resume)
    }

    async fn resume(&self, id: Uuid) -> Result<Option<Resume>, StoreError> {
        Ok(self.lock().resumes.get(&id).cloned())
    }

    async fn delete_resume(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        let removed = tables.resumes.remove(&id).is_some();
        if removed {
            tables.letters.retain(|_, letter| letter.resume_id != id);
        }
        Ok(removed)
    }

    async fn create_cover_letter(&self, new: NewCoverLetter) -> Result<CoverLetter, StoreError> {
        let mut tables = self.lock();
        if !tables.resumes.contains_key(&new.resume_id) {
            return Err(StoreError::NotFound(format!("Resume {}", new.resume_id)));
        }
        let letter = new_letter(new, Utc::now());
        tables.letters.insert(letter.id, letter.clone());
        Ok(letter)
    }

    async fn create_generated_letter(
        &self,
        new: NewCoverLetter,
        content: String,
        provider: ProviderKind,
    ) -> Result<CoverLetter, StoreError> {
        let mut tables = self.lock();
        if !tables.resumes.contains_key(&new.resume_id) {
            return Err(StoreError::NotFound(format!("Resume {}", new.resume_id)));
        }
        let mut letter = new_letter(new, Utc::now());
        letter.content = Some(content);
        letter.provider = Some(provider);
        letter.status = ArtifactStatus::Generated;
        tables.letters.insert(letter.id, letter.clone());
        Ok(letter)
    }

    async fn cover_letter(&self, id: Uuid) -> Result<Option<CoverLetter>, StoreError> {
        Ok(self.lock().letters.get(&id).cloned())
    }

    async fn delete_cover_letter(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().letters.remove(&id).is_some())
    }

    async fn transition(
        &self,
        artifact: ArtifactRef,
        plan: &TransitionPlan,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tables = self.lock();
        let Some(current) = tables.status(artifact) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !plan.permits(current) {
            return Ok(TransitionOutcome::Rejected { current });
        }
        tables.set_status(artifact, plan.to, Utc::now());
        Ok(TransitionOutcome::Applied)
    }

    async fn complete(
        &self,
        id: Uuid,
        output: ArtifactOutput,
    ) -> Result<TransitionOutcome, StoreError> {
        let plan = success_plan(output.kind());
        let now = Utc::now();
        let mut tables = self.lock();

        match output {
            ArtifactOutput::OptimizedResume {
                content,
                keywords,
                provider,
            } => {
                let Some(resume) = tables.resumes.get_mut(&id) else {
                    return Ok(TransitionOutcome::Missing);
                };
                if !plan.permits(resume.status) {
                    return Ok(TransitionOutcome::Rejected {
                        current: resume.status,
                    });
                }
                resume.optimized_content = Some(content);
                resume.keywords = keywords;
                resume.provider = Some(provider);
                resume.status = plan.to;
                resume.updated_at = now;
            }
            ArtifactOutput::AtsScore { score } => {
                let Some(resume) = tables.resumes.get_mut(&id) else {
                    return Ok(TransitionOutcome::Missing);
                };
                if !plan.permits(resume.status) {
                    return Ok(TransitionOutcome::Rejected {
                        current: resume.status,
                    });
                }
                resume.ats_score = Some(score);
                resume.status = plan.to;
                resume.updated_at = now;
            }
            ArtifactOutput::CoverLetter { content, provider } => {
                let Some(letter) = tables.letters.get_mut(&id) else {
                    return Ok(TransitionOutcome::Missing);
                };
                if !plan.permits(letter.status) {
                    return Ok(TransitionOutcome::Rejected {
                        current: letter.status,
                    });
                }
                letter.content = Some(content);
                letter.provider = Some(provider);
                letter.status = plan.to;
                letter.updated_at = now;
            }
        }

        Ok(TransitionOutcome::Applied)
    }

    async fn snapshot(
        &self,
        artifact: ArtifactRef,
    ) -> Result<Option<ArtifactSnapshot>, StoreError> {
        let tables = self.lock();
        Ok(match artifact.kind {
            ArtifactKind::Resume => tables.resumes.get(&artifact.id).map(ArtifactSnapshot::from),
            ArtifactKind::CoverLetter => {
                tables.letters.get(&artifact.id).map(ArtifactSnapshot::from)
            }
        })
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn open_account(
        &self,
        id: Uuid,
        country_code: Option<String>,
    ) -> Result<UserAccount, LedgerError> {
        let mut tables = self.lock();
        let account = tables.users.entry(id).or_insert_with(|| UserAccount {
            id,
            country_code,
            credits_remaining: DEFAULT_STARTING_CREDITS,
            credits_reserved: 0,
            subscription_active_until: None,
            trial_ends_at: None,
            created_at: Utc::now(),
        });
        Ok(account.clone())
    }

    async fn account(&self, id: Uuid) -> Result<Option<UserAccount>, LedgerError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn reserve(&self, user_id: Uuid) -> Result<Reservation, LedgerError> {
        let now = Utc::now();
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        match account.entitlement(now) {
            Entitlement::Unlimited => Ok(Reservation::Unlimited),
            Entitlement::Credits { available } if available > 0 => {
                account.credits_reserved += 1;
                Ok(Reservation::Credit)
            }
            Entitlement::Credits { .. } => Err(LedgerError::InsufficientCredits),
        }
    }

    async fn commit(
        &self,
        user_id: Uuid,
        reservation: Reservation,
    ) -> Result<ChargeOutcome, LedgerError> {
        let now = Utc::now();
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        if reservation == Reservation::Unlimited {
            return Ok(ChargeOutcome::Waived);
        }

        account.credits_reserved = (account.credits_reserved - 1).max(0);
        if account.entitlement(now) == Entitlement::Unlimited {
            return Ok(ChargeOutcome::Waived);
        }
        account.credits_remaining = (account.credits_remaining - 1).max(0);
        Ok(ChargeOutcome::Charged {
            remaining: account.credits_remaining,
        })
    }

    async fn release(&self, user_id: Uuid, reservation: Reservation) -> Result<(), LedgerError> {
        if reservation == Reservation::Unlimited {
            return Ok(());
        }
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        account.credits_reserved = (account.credits_reserved - 1).max(0);
        Ok(())
    }

    async fn charge_batch(&self, user_id: Uuid, cost: i32) -> Result<ChargeOutcome, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let now = Utc::now();
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        match account.entitlement(now) {
            Entitlement::Unlimited => Ok(ChargeOutcome::Waived),
            Entitlement::Credits { available } if available >= cost => {
                account.credits_remaining -= cost;
                Ok(ChargeOutcome::Charged {
                    remaining: account.credits_remaining,
                })
            }
            Entitlement::Credits { available } => Ok(ChargeOutcome::Skipped { available }),
        }
    }

    async fn add_credits(&self, user_id: Uuid, amount: i32) -> Result<UserAccount, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        account.credits_remaining = account
            .credits_remaining
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(amount))?;
        Ok(account.clone())
    }

    async fn set_subscription(
        &self,
        user_id: Uuid,
        active_until: Option<DateTime<Utc>>,
    ) -> Result<UserAccount, LedgerError> {
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        account.subscription_active_until = active_until;
        Ok(account.clone())
    }

    async fn start_trial(
        &self,
        user_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<UserAccount, LedgerError> {
        let mut tables = self.lock();
        let account = tables.user_mut(user_id)?;
        account.trial_ends_at = Some(ends_at);
        Ok(account.clone())
    }
}

//! Postgres-backed store. Status changes are `UPDATE … WHERE status = ANY($n)`
//! and ledger changes are single conditional `UPDATE … RETURNING` statements,
//! so concurrent requests for the same row serialize on the row lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
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

#[derive(Debug, FromRow)]
struct ResumeRow {
    id: Uuid,
    user_id: Uuid,
    original_content: String,
    job_description: Option<String>,
    target_role: String,
    industry: Option<String>,
    experience_level: Option<String>,
    optimized_content: Option<String>,
    keywords: Vec<String>,
    ats_score: Option<i16>,
    status: String,
    provider: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResumeRow> for Resume {
    type Error = StoreError;

    fn try_from(row: ResumeRow) -> Result<Self, Self::Error> {
        Ok(Resume {
            id: row.id,
            user_id: row.user_id,
            original_content: row.original_content,
            job_description: row.job_description,
            target_role: row.target_role,
            industry: row.industry,
            experience_level: row.experience_level,
            optimized_content: row.optimized_content,
            keywords: row.keywords,
            // CHECK constraint keeps this in 0..=100
            ats_score: row.ats_score.map(|s| s.clamp(0, 100) as u8),
            status: row.status.parse()?,
            provider: row
                .provider
                .as_deref()
                .map(str::parse::<ProviderKind>)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CoverLetterRow {
    id: Uuid,
    user_id: Uuid,
    resume_id: Uuid,
    company_name: String,
    hiring_manager_name: Option<String>,
    target_role: String,
    tone: String,
    length: String,
    job_description: Option<String>,
    content: Option<String>,
    status: String,
    provider: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CoverLetterRow> for CoverLetter {
    type Error = StoreError;

    fn try_from(row: CoverLetterRow) -> Result<Self, Self::Error> {
        Ok(CoverLetter {
            id: row.id,
            user_id: row.user_id,
            resume_id: row.resume_id,
            company_name: row.company_name,
            hiring_manager_name: row.hiring_manager_name,
            target_role: row.target_role,
            tone: row.tone.parse()?,
            length: row.length.parse()?,
            job_description: row.job_description,
            content: row.content,
            status: row.status.parse()?,
            provider: row
                .provider
                .as_deref()
                .map(str::parse::<ProviderKind>)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn table(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Resume => "resumes",
        ArtifactKind::CoverLetter => "cover_letters",
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes a rejected compare-and-set from a vanished row.
    async fn miss(&self, artifact: ArtifactRef) -> Result<TransitionOutcome, StoreError> {
        let sql = format!("SELECT status FROM {} WHERE id = $1", table(artifact.kind));
        let status: Option<String> = sqlx::query_scalar(&sql)
            .bind(artifact.id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match status {
            Some(s) => TransitionOutcome::Rejected { current: s.parse()? },
            None => TransitionOutcome::Missing,
        })
    }

    async fn insert_letter(
        &self,
        new: NewCoverLetter,
        content: Option<String>,
        provider: Option<ProviderKind>,
        status: ArtifactStatus,
    ) -> Result<CoverLetter, StoreError> {
        let row = sqlx::query_as::<_, CoverLetterRow>(
            r#"
            INSERT INTO cover_letters
                (id, user_id, resume_id, company_name, hiring_manager_name, target_role,
                 tone, length, job_description, content, status, provider)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.resume_id)
        .bind(&new.company_name)
        .bind(&new.hiring_manager_name)
        .bind(&new.target_role)
        .bind(new.tone.as_str())
        .bind(new.length.as_str())
        .bind(&new.job_description)
        .bind(content)
        .bind(status.as_str())
        .bind(provider.map(|p| p.as_str()))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn fetch_account(&self, id: Uuid) -> Result<UserAccount, LedgerError> {
        self.account(id).await?.ok_or(LedgerError::UnknownUser(id))
    }
}

#[async_trait]
impl ArtifactRepository for PgStore {
    async fn create_resume(&self, new: NewResume) -> Result<Resume, StoreError> {
        let row = sqlx::query_as::<_, ResumeRow>(
            r#"
            INSERT INTO resumes
                (id, user_id, original_content, job_description, target_role,
                 industry, experience_level)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.original_content)
        .bind(&new.job_description)
        .bind(&new.target_role)
        .bind(&new.industry)
        .bind(&new.experience_level)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn resume(&self, id: Uuid) -> Result<Option<Resume>, StoreError> {
        sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Resume::try_from)
            .transpose()
    }

    async fn delete_resume(&self, id: Uuid) -> Result<bool, StoreError> {
        // cover_letters.resume_id is ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM resumes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_cover_letter(&self, new: NewCoverLetter) -> Result<CoverLetter, StoreError> {
        self.insert_letter(new, None, None, ArtifactStatus::Draft)
            .await
    }

    async fn create_generated_letter(
        &self,
        new: NewCoverLetter,
        content: String,
        provider: ProviderKind,
    ) -> Result<CoverLetter, StoreError> {
        self.insert_letter(new, Some(content), Some(provider), ArtifactStatus::Generated)
            .await
    }

    async fn cover_letter(&self, id: Uuid) -> Result<Option<CoverLetter>, StoreError> {
        sqlx::query_as::<_, CoverLetterRow>("SELECT * FROM cover_letters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CoverLetter::try_from)
            .transpose()
    }

    async fn delete_cover_letter(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cover_letters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        artifact: ArtifactRef,
        plan: &TransitionPlan,
    ) -> Result<TransitionOutcome, StoreError> {
        let sql = format!(
            "UPDATE {} SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = ANY($3) RETURNING id",
            table(artifact.kind)
        );
        let updated: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(plan.to.as_str())
            .bind(artifact.id)
            .bind(plan.from_names())
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(_) => Ok(TransitionOutcome::Applied),
            None => self.miss(artifact).await,
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        output: ArtifactOutput,
    ) -> Result<TransitionOutcome, StoreError> {
        let kind = output.kind();
        let plan = success_plan(kind);

        let query = match &output {
            ArtifactOutput::OptimizedResume {
                content,
                keywords,
                provider,
            } => sqlx::query_scalar::<_, Uuid>(
                r#"
                UPDATE resumes
                SET optimized_content = $3, keywords = $4, provider = $5,
                    status = $6, updated_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(plan.from_names())
            .bind(content)
            .bind(keywords)
            .bind(provider.as_str())
            .bind(plan.to.as_str()),
            ArtifactOutput::AtsScore { score } => sqlx::query_scalar::<_, Uuid>(
                r#"
                UPDATE resumes
                SET ats_score = $3, status = $4, updated_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(plan.from_names())
            .bind(i16::from(*score))
            .bind(plan.to.as_str()),
            ArtifactOutput::CoverLetter { content, provider } => sqlx::query_scalar::<_, Uuid>(
                r#"
                UPDATE cover_letters
                SET content = $3, provider = $4, status = $5, updated_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(plan.from_names())
            .bind(content)
            .bind(provider.as_str())
            .bind(plan.to.as_str()),
        };

        match query.fetch_optional(&self.pool).await? {
            Some(_) => Ok(TransitionOutcome::Applied),
            None => self.miss(ArtifactRef { kind, id }).await,
        }
    }

    async fn snapshot(
        &self,
        artifact: ArtifactRef,
    ) -> Result<Option<ArtifactSnapshot>, StoreError> {
        Ok(match artifact.kind {
            ArtifactKind::Resume => self
                .resume(artifact.id)
                .await?
                .map(|r| ArtifactSnapshot::from(&r)),
            ArtifactKind::CoverLetter => self
                .cover_letter(artifact.id)
                .await?
                .map(|l| ArtifactSnapshot::from(&l)),
        })
    }
}

#[async_trait]
impl CreditLedger for PgStore {
    async fn open_account(
        &self,
        id: Uuid,
        country_code: Option<String>,
    ) -> Result<UserAccount, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, country_code, credits_remaining)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&country_code)
        .bind(DEFAULT_STARTING_CREDITS)
        .execute(&self.pool)
        .await?;

        self.fetch_account(id).await
    }

    async fn account(&self, id: Uuid) -> Result<Option<UserAccount>, LedgerError> {
        let account = sqlx::query_as::<_, UserAccount>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn reserve(&self, user_id: Uuid) -> Result<Reservation, LedgerError> {
        let account = self.fetch_account(user_id).await?;
        if account.entitlement(Utc::now()) == Entitlement::Unlimited {
            return Ok(Reservation::Unlimited);
        }

        let held: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE users SET credits_reserved = credits_reserved + 1
            WHERE id = $1 AND credits_remaining - credits_reserved > 0
            RETURNING id
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        held.map(|_| Reservation::Credit)
            .ok_or(LedgerError::InsufficientCredits)
    }

    async fn commit(
        &self,
        user_id: Uuid,
        reservation: Reservation,
    ) -> Result<ChargeOutcome, LedgerError> {
        if reservation == Reservation::Unlimited {
            return Ok(ChargeOutcome::Waived);
        }

        let account = self.fetch_account(user_id).await?;
        if account.entitlement(Utc::now()) == Entitlement::Unlimited {
            self.release(user_id, reservation).await?;
            return Ok(ChargeOutcome::Waived);
        }

        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits_remaining = credits_remaining - 1,
                credits_reserved = credits_reserved - 1
            WHERE id = $1 AND credits_reserved > 0
            RETURNING credits_remaining
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        remaining
            .map(|remaining| ChargeOutcome::Charged { remaining })
            .ok_or(LedgerError::InsufficientCredits)
    }

    async fn release(&self, user_id: Uuid, reservation: Reservation) -> Result<(), LedgerError> {
        if reservation == Reservation::Unlimited {
            return Ok(());
        }
        sqlx::query(
            "UPDATE users SET credits_reserved = GREATEST(credits_reserved - 1, 0) WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn charge_batch(&self, user_id: Uuid, cost: i32) -> Result<ChargeOutcome, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let account = self.fetch_account(user_id).await?;
        if account.entitlement(Utc::now()) == Entitlement::Unlimited {
            return Ok(ChargeOutcome::Waived);
        }

        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users SET credits_remaining = credits_remaining - $2
            WHERE id = $1 AND credits_remaining - credits_reserved >= $2
            RETURNING credits_remaining
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match remaining {
            Some(remaining) => ChargeOutcome::Charged { remaining },
            None => ChargeOutcome::Skipped {
                available: account.available_credits(),
            },
        })
    }

    async fn add_credits(&self, user_id: Uuid, amount: i32) -> Result<UserAccount, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let updated = sqlx::query_as::<_, UserAccount>(
            "UPDATE users SET credits_remaining = credits_remaining + $2 \
             WHERE id = $1 AND credits_remaining <= 2147483647 - $2 RETURNING *",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(account) => Ok(account),
            None => {
                // Either the user is gone or the balance would overflow INTEGER
                self.fetch_account(user_id).await?;
                Err(LedgerError::BalanceOverflow(amount))
            }
        }
    }

    async fn set_subscription(
        &self,
        user_id: Uuid,
        active_until: Option<DateTime<Utc>>,
    ) -> Result<UserAccount, LedgerError> {
        sqlx::query_as::<_, UserAccount>(
            "UPDATE users SET subscription_active_until = $2 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(active_until)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::UnknownUser(user_id))
    }

    async fn start_trial(
        &self,
        user_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<UserAccount, LedgerError> {
        sqlx::query_as::<_, UserAccount>(
            "UPDATE users SET trial_ends_at = $2 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(ends_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::UnknownUser(user_id))
    }
}

//! Runs one generation use case end to end. Validates the input, builds the
//! messages, picks the provider through the policy table and makes one call.
//!
//! One call per method. The job runner owns the attempt budget.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm_client::{
    ChatMessage, CompletionRequest, ProviderClient, ProviderError, ProviderRegistry,
};
use crate::models::artifact::{CoverLetter, LetterLength, ProviderKind, Resume, Tone};

use super::ats::{extract_score, AtsScore};
use super::policy::{self, CompletionPlan};
use super::prompt_builder::{self, CoverLetterPromptInput, ResumePromptInput};

pub const MIN_CONTENT_CHARS: usize = 100;
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 50;
pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_KEYWORDS: usize = 20;

const JOB_DESCRIPTION_NOT_PROVIDED: &str = "Not provided";

/// Immutable per-request context passed explicitly to every generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub user_id: Uuid,
    pub country_code: Option<String>,
    pub preferred_provider: Option<ProviderKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("content must be at least {min} characters (got {actual})")]
    ContentTooShort { min: usize, actual: usize },

    #[error("job description is required")]
    MissingJobDescription,

    #[error("job description must be at least {min} characters (got {actual})")]
    JobDescriptionTooShort { min: usize, actual: usize },

    #[error("{field} must be at least {min} characters")]
    FieldTooShort { field: &'static str, min: usize },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{provider} call failed: {source}")]
    Provider {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("no provider registered for {0}")]
    ProviderUnavailable(ProviderKind),
}

impl GenerationError {
    /// Validation failures are local and deterministic; everything else may clear.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Validation(_))
    }

    /// Failures an operator should look at once the attempt budget is spent.
    pub fn is_unexpected(&self) -> bool {
        match self {
            GenerationError::Provider { source, .. } => !source.is_transient(),
            GenerationError::ProviderUnavailable(_) => true,
            GenerationError::Validation(_) => false,
        }
    }
}

/// Text returned by a provider together with who produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub provider: ProviderKind,
    pub model: &'static str,
}

fn char_len(s: &str) -> usize {
    s.trim().chars().count()
}

fn require_min(field: &'static str, value: &str, min: usize) -> Result<(), ValidationError> {
    if char_len(value) < min {
        return Err(ValidationError::FieldTooShort { field, min });
    }
    Ok(())
}

fn check_job_description(jd: &str) -> Result<(), ValidationError> {
    let actual = char_len(jd);
    if actual < MIN_JOB_DESCRIPTION_CHARS {
        return Err(ValidationError::JobDescriptionTooShort {
            min: MIN_JOB_DESCRIPTION_CHARS,
            actual,
        });
    }
    Ok(())
}

/// Resume attributes a generation call needs.
#[derive(Debug, Clone)]
pub struct ResumeInput {
    pub content: String,
    pub job_description: Option<String>,
    pub target_role: String,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
}

impl ResumeInput {
    /// Optimization always starts from the user's original text.
    pub fn for_optimization(resume: &Resume) -> Self {
        Self::with_content(resume, resume.original_content.clone())
    }

    /// Scoring reads the optimized text.
    pub fn for_scoring(resume: &Resume) -> Self {
        Self::with_content(resume, resume.best_content().to_string())
    }

    fn with_content(resume: &Resume, content: String) -> Self {
        Self {
            content,
            job_description: resume.job_description.clone(),
            target_role: resume.target_role.clone(),
            industry: resume.industry.clone(),
            experience_level: resume.experience_level.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let actual = char_len(&self.content);
        if actual < MIN_CONTENT_CHARS {
            return Err(ValidationError::ContentTooShort {
                min: MIN_CONTENT_CHARS,
                actual,
            });
        }
        require_min("target_role", &self.target_role, MIN_NAME_CHARS)?;
        match self.job_description.as_deref() {
            Some(jd) if !jd.trim().is_empty() => check_job_description(jd),
            _ => Err(ValidationError::MissingJobDescription),
        }
    }

    pub fn job_description(&self) -> &str {
        self.job_description.as_deref().unwrap_or_default()
    }

    fn prompt<'a>(&'a self, ctx: &'a GenerationContext) -> ResumePromptInput<'a> {
        ResumePromptInput {
            content: &self.content,
            job_description: self.job_description(),
            target_role: &self.target_role,
            industry: self.industry.as_deref(),
            experience_level: self.experience_level.as_deref(),
            country_code: ctx.country_code.as_deref(),
        }
    }
}

/// Cover-letter attributes, with the source resume already resolved.
#[derive(Debug, Clone)]
pub struct CoverLetterInput {
    pub resume_content: String,
    pub job_description: Option<String>,
    pub target_role: String,
    pub company_name: String,
    pub hiring_manager_name: Option<String>,
    pub tone: Tone,
    pub length: LetterLength,
}

impl CoverLetterInput {
    /// The letter's own job description wins; the resume's is inherited otherwise.
    pub fn new(letter: &CoverLetter, resume: &Resume) -> Self {
        let job_description = letter
            .job_description
            .clone()
            .filter(|jd| !jd.trim().is_empty())
            .or_else(|| resume.job_description.clone());

        Self {
            resume_content: resume.best_content().to_string(),
            job_description,
            target_role: letter.target_role.clone(),
            company_name: letter.company_name.clone(),
            hiring_manager_name: letter.hiring_manager_name.clone(),
            tone: letter.tone,
            length: letter.length,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let actual = char_len(&self.resume_content);
        if actual < MIN_CONTENT_CHARS {
            return Err(ValidationError::ContentTooShort {
                min: MIN_CONTENT_CHARS,
                actual,
            });
        }
        require_min("company_name", &self.company_name, MIN_NAME_CHARS)?;
        require_min("target_role", &self.target_role, MIN_NAME_CHARS)?;
        match self.job_description.as_deref() {
            Some(jd) if !jd.trim().is_empty() => check_job_description(jd),
            _ => Ok(()),
        }
    }

    fn prompt<'a>(&'a self, ctx: &'a GenerationContext) -> CoverLetterPromptInput<'a> {
        CoverLetterPromptInput {
            resume_content: &self.resume_content,
            job_description: self
                .job_description
                .as_deref()
                .filter(|jd| !jd.trim().is_empty())
                .unwrap_or(JOB_DESCRIPTION_NOT_PROVIDED),
            target_role: &self.target_role,
            company_name: &self.company_name,
            hiring_manager_name: self.hiring_manager_name.as_deref(),
            tone: self.tone,
            length: self.length,
            country_code: ctx.country_code.as_deref(),
        }
    }
}

/// Splits a comma or line separated keyword list, dropping numbering and duplicates.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for item in raw.split([',', '\n']) {
        let keyword = item
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
            .trim()
            .trim_matches('"');
        if keyword.is_empty() || keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
            continue;
        }
        keywords.push(keyword.to_string());
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

#[derive(Clone)]
pub struct GenerationService {
    providers: ProviderRegistry,
}

impl GenerationService {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    /// Swaps an unregistered provider for provider A's flagship.
    fn resolve(
        &self,
        plan: CompletionPlan,
    ) -> Result<(Arc<dyn ProviderClient>, CompletionPlan), GenerationError> {
        if let Some(client) = self.providers.get(plan.provider) {
            return Ok((client, plan));
        }

        let fallback = ProviderKind::OpenAi;
        warn!(
            "Provider {} is not configured, falling back to {fallback}",
            plan.provider
        );
        let client = self
            .providers
            .get(fallback)
            .ok_or(GenerationError::ProviderUnavailable(plan.provider))?;

        Ok((
            client,
            CompletionPlan {
                provider: fallback,
                model: fallback.flagship_model(),
                temperature: plan.temperature.min(fallback.max_temperature()),
                max_tokens: plan.max_tokens,
            },
        ))
    }

    async fn run(
        &self,
        ctx: &GenerationContext,
        plan: CompletionPlan,
        messages: Vec<ChatMessage>,
    ) -> Result<Completion, GenerationError> {
        let (client, plan) = self.resolve(plan)?;
        let request = CompletionRequest {
            model: plan.model.to_string(),
            messages,
            max_tokens: plan.max_tokens,
            temperature: plan.temperature,
            user: Some(ctx.user_id.to_string()),
        };

        let text = client
            .complete(&request)
            .await
            .map_err(|source| GenerationError::Provider {
                provider: plan.provider,
                source,
            })?;

        Ok(Completion {
            text,
            provider: plan.provider,
            model: plan.model,
        })
    }

    pub async fn optimize(
        &self,
        ctx: &GenerationContext,
        input: &ResumeInput,
    ) -> Result<Completion, GenerationError> {
        input.validate()?;
        let messages = prompt_builder::optimization_messages(&input.prompt(ctx));
        let completion = self.run(ctx, policy::optimize_plan(), messages).await?;
        info!(
            "Resume optimized for user {} via {} ({} chars)",
            ctx.user_id,
            completion.provider,
            completion.text.len()
        );
        Ok(completion)
    }

    pub async fn extract_keywords(
        &self,
        ctx: &GenerationContext,
        job_description: &str,
    ) -> Result<Vec<String>, GenerationError> {
        check_job_description(job_description)?;
        let messages = prompt_builder::keyword_messages(job_description);
        let completion = self.run(ctx, policy::keywords_plan(), messages).await?;
        Ok(parse_keywords(&completion.text))
    }

    /// Returns the parsed score along with the raw analysis.
    pub async fn ats_score(
        &self,
        ctx: &GenerationContext,
        input: &ResumeInput,
    ) -> Result<(AtsScore, Completion), GenerationError> {
        input.validate()?;
        let messages = prompt_builder::ats_messages(&input.content, input.job_description());
        let completion = self.run(ctx, policy::ats_plan(), messages).await?;
        Ok((extract_score(&completion.text), completion))
    }

    pub async fn cover_letter(
        &self,
        ctx: &GenerationContext,
        input: &CoverLetterInput,
    ) -> Result<Completion, GenerationError> {
        input.validate()?;
        let plan = policy::cover_letter_plan(input.tone, input.length, ctx.preferred_provider);
        let messages = prompt_builder::cover_letter_messages(&input.prompt(ctx));
        self.run(ctx, plan, messages).await
    }

    pub async fn cover_letter_variation(
        &self,
        ctx: &GenerationContext,
        input: &CoverLetterInput,
        index: u8,
    ) -> Result<Completion, GenerationError> {
        input.validate()?;
        let plan = policy::variation_plan(input.tone, input.length, index);
        let messages = prompt_builder::variation_messages(&input.prompt(ctx), index);
        self.run(ctx, plan, messages).await
    }
}
